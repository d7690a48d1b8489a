//! Static partition of environment rows across workers.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Contiguous `[start, end)` row range owned exclusively by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSlot {
    pub worker: usize,
    pub start: usize,
    pub end: usize,
}

impl WorkerSlot {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, env: usize) -> bool {
        self.start <= env && env < self.end
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("gap in slot partition at row {at}")]
    Gap { at: usize },
    #[error("overlapping slots at row {at}")]
    Overlap { at: usize },
    #[error("slot partition covers {covered} rows, expected {total}")]
    Coverage { covered: usize, total: usize },
}

/// Slot `i` covers `[i * env_per_worker, (i + 1) * env_per_worker)`.
pub fn slots_for(n_workers: usize, env_per_worker: usize) -> Vec<WorkerSlot> {
    (0..n_workers)
        .map(|worker| WorkerSlot {
            worker,
            start: worker * env_per_worker,
            end: (worker + 1) * env_per_worker,
        })
        .collect()
}

/// Verify that `slots` partition `[0, total)` with no gap and no overlap.
pub fn check_partition(slots: &[WorkerSlot], total: usize) -> Result<(), SlotError> {
    let mut sorted: Vec<&WorkerSlot> = slots.iter().collect();
    sorted.sort_by_key(|s| (s.start, s.end));
    let mut next = 0usize;
    for s in sorted {
        if s.start > next {
            return Err(SlotError::Gap { at: next });
        }
        if s.start < next {
            return Err(SlotError::Overlap { at: s.start });
        }
        next = s.end;
    }
    if next != total {
        return Err(SlotError::Coverage {
            covered: next,
            total,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_partition_total_for_many_shapes() {
        for n_workers in 1..=8 {
            for env_per_worker in 1..=12 {
                let slots = slots_for(n_workers, env_per_worker);
                assert_eq!(slots.len(), n_workers);
                check_partition(&slots, n_workers * env_per_worker).unwrap();
                let mut owner = vec![None; n_workers * env_per_worker];
                for s in &slots {
                    for env in s.range() {
                        assert!(owner[env].is_none(), "row {env} owned twice");
                        owner[env] = Some(s.worker);
                    }
                }
                assert!(owner.iter().all(|o| o.is_some()));
            }
        }
    }

    #[test]
    fn detects_gap_overlap_and_short_cover() {
        let a = WorkerSlot { worker: 0, start: 0, end: 3 };
        let b = WorkerSlot { worker: 1, start: 4, end: 6 };
        assert_eq!(check_partition(&[a, b], 6), Err(SlotError::Gap { at: 3 }));

        let c = WorkerSlot { worker: 1, start: 2, end: 6 };
        assert_eq!(check_partition(&[a, c], 6), Err(SlotError::Overlap { at: 2 }));

        let d = WorkerSlot { worker: 1, start: 3, end: 5 };
        assert_eq!(
            check_partition(&[a, d], 6),
            Err(SlotError::Coverage { covered: 5, total: 6 })
        );
    }

    #[test]
    fn slot_accessors() {
        let s = WorkerSlot { worker: 2, start: 6, end: 9 };
        assert_eq!(s.len(), 3);
        assert!(s.contains(6));
        assert!(!s.contains(9));
        assert!(!s.is_empty());
    }
}
