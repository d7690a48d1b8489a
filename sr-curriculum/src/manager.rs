//! Per-worker curriculum state.
//!
//! Counts how often each (timing, delay, aggression, line bucket) cell has been played and
//! draws new scenarios with probability `exp(-count)`, so under-visited cells dominate. Board
//! and short episodes are steered toward their target shares by comparing running piece
//! counters against the current ratios at every episode start.

use std::collections::VecDeque;
use std::path::PathBuf;

use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use sr_core::{GameParams, Scenario};
use thiserror::Error;

use crate::corpus::{CorpusError, CorpusReader, CorpusRecord};
use crate::tables::{
    cell_count, ADJ_DELAYS, AGGRESSION_LEVELS, BUCKETS, BUCKET_INTERVAL, COUNT_DIVISORS,
    LEVEL_LINES, SLOW_TAP_CUTOFF_BUCKET, TAP_SEQUENCES,
};

#[derive(Debug, Error)]
pub enum CurriculumError {
    #[error("empty line bucket range {start}..{end}")]
    EmptyBucketRange { start: usize, end: usize },
    #[error("corpus: {0}")]
    Corpus(#[from] CorpusError),
    #[error("corpus record has difficulty level {0}, expected < {max}", max = LEVEL_LINES.len() - 1)]
    BadLevel(u8),
    #[error("scenario weights: {0}")]
    Weights(#[from] WeightedError),
}

/// Index of one curriculum cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketKey {
    pub tap_id: usize,
    pub adj_delay_id: usize,
    pub aggression_level: usize,
    pub bucket: usize,
}

impl BucketKey {
    fn index(&self) -> usize {
        ((self.tap_id * ADJ_DELAYS.len() + self.adj_delay_id) * AGGRESSION_LEVELS
            + self.aggression_level)
            * BUCKETS
            + self.bucket
    }

    fn from_index(mut i: usize) -> Self {
        let bucket = i % BUCKETS;
        i /= BUCKETS;
        let aggression_level = i % AGGRESSION_LEVELS;
        i /= AGGRESSION_LEVELS;
        let adj_delay_id = i % ADJ_DELAYS.len();
        Self {
            tap_id: i / ADJ_DELAYS.len(),
            adj_delay_id,
            aggression_level,
            bucket,
        }
    }
}

pub struct CurriculumManager {
    counts: Vec<u64>,
    total_cnt: u64,
    board_cnt: u64,
    board_short_cnt: u64,
    params: GameParams,
    rng: ChaCha8Rng,
    corpus: Option<CorpusReader>,
    pending: VecDeque<CorpusRecord>,
    eof: bool,
}

impl CurriculumManager {
    /// `board_file: None` disables corpus sampling.
    pub fn new(board_file: Option<PathBuf>, chunk_records: usize, seed: u64) -> Self {
        let corpus = board_file.map(|p| CorpusReader::new(p, chunk_records));
        Self {
            counts: vec![0; cell_count()],
            total_cnt: 0,
            board_cnt: 0,
            board_short_cnt: 0,
            params: GameParams::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            eof: corpus.is_none(),
            corpus,
            pending: VecDeque::new(),
        }
    }

    pub fn params(&self) -> GameParams {
        self.params
    }

    pub fn count(&self, key: BucketKey) -> u64 {
        self.counts[key.index()]
    }

    /// Flattened `(tap, delay, aggression, bucket)` visitation counts.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// `(total, board, short board)` piece counters.
    pub fn piece_counters(&self) -> (u64, u64, u64) {
        (self.total_cnt, self.board_cnt, self.board_short_cnt)
    }

    /// The corpus is exhausted (or absent); only fresh scenarios are issued from now on.
    pub fn corpus_exhausted(&self) -> bool {
        self.eof
    }

    /// Adopt new ratios. A negative component first wipes every visitation count.
    pub fn update_params(&mut self, params: &GameParams) {
        if params.has_reset_signal() {
            self.counts.fill(0);
            log::info!("curriculum counts reset");
        }
        self.total_cnt = 0;
        self.board_cnt = 0;
        self.board_short_cnt = 0;
        self.params = params.abs();
    }

    /// Fold a finished episode back into the counters.
    pub fn update_state(&mut self, scenario: &Scenario, pieces: u32, run_lines: u32) {
        let pieces = pieces as u64;
        self.total_cnt += pieces;
        if scenario.is_board {
            self.board_cnt += pieces;
            if scenario.is_short {
                self.board_short_cnt += pieces;
            }
        }
        let start = ((scenario.lines / BUCKET_INTERVAL) as usize).min(BUCKETS);
        let end = (((scenario.lines + run_lines) / BUCKET_INTERVAL) as usize + 1).min(BUCKETS);
        for bucket in start..end {
            let key = BucketKey {
                tap_id: scenario.tap_id as usize,
                adj_delay_id: scenario.adj_delay_id as usize,
                aggression_level: scenario.aggression_level as usize,
                bucket,
            };
            self.counts[key.index()] += 1;
        }
    }

    /// Issue the starting scenario of the next episode.
    pub fn next_scenario(&mut self) -> Result<Scenario, CurriculumError> {
        if let Some((rec, is_short)) = self.next_board()? {
            let level = rec.level as usize;
            if level + 1 >= LEVEL_LINES.len() {
                return Err(CurriculumError::BadLevel(rec.level));
            }
            let start = (LEVEL_LINES[level] / BUCKET_INTERVAL) as usize;
            let end = (LEVEL_LINES[level + 1] / BUCKET_INTERVAL) as usize;
            let mut s = self.sample_buckets(rec.board.occupied_cells(), start, end)?;
            s.is_board = true;
            s.is_short = is_short;
            s.board = Some(rec.board);
            s.now_piece = Some(rec.piece);
            return Ok(s);
        }
        self.sample_buckets(0, 0, BUCKETS)
    }

    fn next_board(&mut self) -> Result<Option<(CorpusRecord, bool)>, CurriculumError> {
        if self.eof {
            return Ok(None);
        }
        let is_board = (self.board_cnt as f64) < self.params.board_ratio * self.total_cnt as f64;
        if !is_board {
            return Ok(None);
        }
        if self.pending.is_empty() {
            let chunk = match &self.corpus {
                Some(reader) => reader.read_chunk()?,
                None => Vec::new(),
            };
            if chunk.is_empty() {
                log::info!("board corpus exhausted; falling back to fresh scenarios");
                self.eof = true;
                return Ok(None);
            }
            self.pending.extend(chunk);
        }
        let is_short = (self.board_short_cnt as f64) < self.params.short_ratio * self.board_cnt as f64;
        Ok(self.pending.pop_front().map(|r| (r, is_short)))
    }

    /// Draw a cell within line buckets `[start, end)`, then a start line count whose parity
    /// agrees with the board's occupied cells.
    pub fn sample_buckets(
        &mut self,
        cells: u32,
        start: usize,
        end: usize,
    ) -> Result<Scenario, CurriculumError> {
        let (start, end) = (start.min(BUCKETS), end.min(BUCKETS));
        if start >= end {
            return Err(CurriculumError::EmptyBucketRange { start, end });
        }
        let weights = self.weights(start, end);
        let cell = WeightedIndex::new(&weights)?.sample(&mut self.rng);
        let key = BucketKey::from_index(cell);

        let mut lo = key.bucket as u32 * BUCKET_INTERVAL;
        if (lo % 2 != 0) != (cells % 4 != 0) {
            lo += 1;
        }
        let hi = (key.bucket as u32 + 1) * BUCKET_INTERVAL;
        let choices = (hi - lo + 1) / 2;
        let lines = lo + 2 * self.rng.gen_range(0..choices);

        Ok(Scenario {
            tap_id: key.tap_id as u8,
            tap_sequence: TAP_SEQUENCES[key.tap_id],
            adj_delay_id: key.adj_delay_id as u8,
            adj_delay: ADJ_DELAYS[key.adj_delay_id],
            aggression_level: key.aggression_level as u8,
            burn_over_multiplier: self.params.burn_over_multiplier,
            lines,
            is_board: false,
            is_short: false,
            board: None,
            now_piece: None,
        })
    }

    /// `exp(-(count - min))` per cell; excluded cells get 0.
    fn weights(&self, start: usize, end: usize) -> Vec<f64> {
        let mut eff: Vec<f64> = self.counts.iter().map(|&c| c as f64).collect();
        for (tap, delay, div) in COUNT_DIVISORS {
            for level in 0..AGGRESSION_LEVELS {
                for bucket in 0..BUCKETS {
                    let key = BucketKey {
                        tap_id: tap,
                        adj_delay_id: delay,
                        aggression_level: level,
                        bucket,
                    };
                    eff[key.index()] /= div;
                }
            }
        }
        for (i, e) in eff.iter_mut().enumerate() {
            let key = BucketKey::from_index(i);
            let slow_late = (3..6).contains(&key.tap_id) && key.bucket >= SLOW_TAP_CUTOFF_BUCKET;
            if slow_late || key.bucket < start || key.bucket >= end {
                *e = f64::INFINITY;
            }
        }
        let min = eff.iter().copied().fold(f64::INFINITY, f64::min);
        eff.iter().map(|&e| if e.is_finite() { (min - e).exp() } else { 0.0 }).collect()
    }
}

impl std::fmt::Debug for CurriculumManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurriculumManager")
            .field("params", &self.params)
            .field("total_cnt", &self.total_cnt)
            .field("board_cnt", &self.board_cnt)
            .field("board_short_cnt", &self.board_short_cnt)
            .field("pending", &self.pending.len())
            .field("eof", &self.eof)
            .finish()
    }
}
