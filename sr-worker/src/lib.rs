//! sr-worker: simulation workers.
//!
//! A worker owns a contiguous slot of environments, writes only that slot's rows of the shared
//! region, and answers each coordinator command in order. Any error ends the worker; the
//! coordinator sees the closed channel.

pub mod game;
pub mod worker;

use thiserror::Error;

pub use game::{GameEnv, Phase, StepOutcome, SOFT_DONE_LINES};
pub use worker::{run_worker, Worker, CURRICULUM_SEED_INDEX};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("shared memory: {0}")]
    Shm(#[from] sr_shm::ShmError),
    #[error("simulation: {0}")]
    Sim(#[from] sr_sim::SimError),
    #[error("curriculum: {0}")]
    Curriculum(#[from] sr_curriculum::CurriculumError),
    #[error("protocol: {0}")]
    Proto(#[from] sr_proto::ProtoError),
    #[error("step carried {got} actions, slot holds {expected}")]
    ActionCount { got: usize, expected: usize },
    #[error("timestep {t} outside window of {window}")]
    Timestep { t: u32, window: usize },
    #[error("slot {start}..{end} outside region of {total} environments")]
    SlotOutOfRange {
        start: usize,
        end: usize,
        total: usize,
    },
    #[error("kernel {kernel} observation layout differs from the region")]
    ObsMismatch { kernel: String },
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}

#[cfg(test)]
mod worker_tests;
