//! Reduced block-stacking kernel.
//!
//! Pieces hard-drop into the requested column; full rows clear. The row component of an
//! action is ignored. This is enough game to exercise the sampler, not a rules-faithful
//! implementation.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use sr_core::{Board, Scenario, BOARD_COLS, BOARD_ROWS};
use sr_shm::{Dtype, ObsComponentDesc, RowMut};

use crate::kernel::{Reward, SimError, SimulationKernel};
use crate::piece::{Piece, NUM_PIECES};

/// `rotation * 200 + row * 10 + column`.
pub const ACTIONS: usize = 800;
/// Episodes end once the total line count reaches this.
pub const LINE_CAP: u32 = 430;
pub const OVER_REWARD: f32 = -1.0;

const SCORE_TABLE: [u64; 5] = [0, 40, 100, 300, 1200];
const SCORE_SCALE: f32 = 1e-5;
const PIECE_REWARD: f32 = 1e-4;
const DEFAULT_TAPS: [u8; 10] = [0, 2, 4, 6, 8, 10, 12, 14, 16, 18];
const DEFAULT_ADJ_DELAY: u8 = 18;
const META_LEN: usize = 16;

/// Speed level reached at `lines`, for an 18 start.
pub fn level_for(lines: u32) -> u32 {
    if lines < 130 {
        18
    } else {
        19 + (lines - 130) / 10
    }
}

#[derive(Debug, Clone)]
pub struct Stacker {
    rng: ChaCha8Rng,
    board: Board,
    lines: u32,
    now: Piece,
    next: Piece,
    over: bool,
    tap_sequence: [u8; 10],
    adj_delay: u8,
    burn_over_multiplier: f64,
    run_score: u64,
    run_lines: u32,
    run_pieces: u32,
}

impl Stacker {
    pub fn new(seed: u64) -> Self {
        let mut s = Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            board: Board::EMPTY,
            lines: 0,
            now: Piece::T,
            next: Piece::T,
            over: false,
            tap_sequence: DEFAULT_TAPS,
            adj_delay: DEFAULT_ADJ_DELAY,
            burn_over_multiplier: 0.0,
            run_score: 0,
            run_lines: 0,
            run_pieces: 0,
        };
        s.reset_random();
        s
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Total line count including the scenario's starting lines.
    pub fn lines(&self) -> u32 {
        self.lines
    }

    pub fn now_piece(&self) -> Piece {
        self.now
    }

    pub fn next_piece(&self) -> Piece {
        self.next
    }

    fn random_piece(&mut self) -> Piece {
        Piece::ALL[self.rng.gen_range(0..NUM_PIECES)]
    }

    fn fits(&self, piece: Piece, rot: u32, top: usize, left: usize) -> bool {
        piece.cells(rot).iter().all(|&(r, c)| {
            let (r, c) = (top + r, left + c);
            r < BOARD_ROWS && c < BOARD_COLS && self.board.is_empty_cell(r, c)
        })
    }

    /// Some rotation and column accepts the piece at the top row.
    fn can_spawn(&self, piece: Piece) -> bool {
        (0..4).any(|rot| (0..=BOARD_COLS - piece.width(rot)).any(|c| self.fits(piece, rot, 0, c)))
    }

    fn clear_full_rows(&mut self) -> u32 {
        let mut out = Board::EMPTY;
        let mut dst = BOARD_ROWS;
        let mut cleared = 0;
        for r in (0..BOARD_ROWS).rev() {
            if self.board.row_is_full(r) {
                cleared += 1;
                continue;
            }
            dst -= 1;
            for c in 0..BOARD_COLS {
                if self.board.is_filled(r, c) {
                    out.set_filled(dst, c, true);
                }
            }
        }
        self.board = out;
        cleared
    }

    /// Continuation probability after a burn (1-3 line clear). Slower timing profiles are
    /// likelier to top out; the multiplier scales the effect.
    fn burn_live_prob(&self) -> f32 {
        let slowness = (self.tap_sequence[9] as f64 / 60.0).clamp(0.0, 0.95);
        (1.0 - slowness * 0.5).powf(self.burn_over_multiplier) as f32
    }

    fn terminal_reward(&self) -> Reward {
        Reward {
            reward: 0.0,
            raw_reward: 0.0,
            live_prob: 0.0,
            over_reward: OVER_REWARD,
        }
    }

    fn start(&mut self, board: Board, lines: u32, now: Piece) {
        self.board = board;
        self.lines = lines;
        self.now = now;
        self.next = self.random_piece();
        self.run_score = 0;
        self.run_lines = 0;
        self.run_pieces = 0;
        self.over = lines >= LINE_CAP || !self.can_spawn(now);
    }
}

impl SimulationKernel for Stacker {
    fn obs_spec(&self) -> Vec<ObsComponentDesc> {
        vec![
            ObsComponentDesc::new("board", &[2, BOARD_ROWS, BOARD_COLS], Dtype::F32),
            ObsComponentDesc::new("meta", &[META_LEN], Dtype::F32),
            ObsComponentDesc::new("meta_int", &[2], Dtype::I32),
        ]
    }

    fn num_actions(&self) -> usize {
        ACTIONS
    }

    fn reset(&mut self, scenario: &Scenario) -> Result<(), SimError> {
        let board = scenario.board.unwrap_or(Board::EMPTY);
        let cells = board.occupied_cells();
        if (scenario.lines * 10 + cells) % 4 != 0 {
            // Piece alignment is off for the rest of the episode; the board is still playable.
            log::warn!(
                "start lines {} inconsistent with {} occupied cells",
                scenario.lines,
                cells
            );
        }
        let now = match scenario.now_piece {
            Some(id) => Piece::from_id(id).ok_or(SimError::InvalidPiece(id))?,
            None => self.random_piece(),
        };
        self.tap_sequence = scenario.tap_sequence;
        self.adj_delay = scenario.adj_delay;
        self.burn_over_multiplier = scenario.burn_over_multiplier;
        self.start(board, scenario.lines, now);
        Ok(())
    }

    fn reset_random(&mut self) {
        self.tap_sequence = DEFAULT_TAPS;
        self.adj_delay = DEFAULT_ADJ_DELAY;
        self.burn_over_multiplier = 0.0;
        let now = self.random_piece();
        self.start(Board::EMPTY, 0, now);
    }

    fn step(&mut self, action: u32) -> Reward {
        if self.over {
            return self.terminal_reward();
        }
        let action = action as usize % ACTIONS;
        let rot = (action / 200) as u32;
        let piece = self.now;
        let left = (action % 10).min(BOARD_COLS - piece.width(rot));
        if !self.fits(piece, rot, 0, left) {
            self.over = true;
            return self.terminal_reward();
        }
        let mut top = 0;
        while self.fits(piece, rot, top + 1, left) {
            top += 1;
        }
        for (r, c) in piece.cells(rot) {
            self.board.set_filled(top + r, left + c, true);
        }

        let cleared = self.clear_full_rows();
        let delta = SCORE_TABLE[cleared as usize] * (level_for(self.lines) as u64 + 1);
        self.lines += cleared;
        self.run_lines += cleared;
        self.run_score += delta;
        self.run_pieces += 1;
        self.now = self.next;
        self.next = self.random_piece();
        self.over = self.lines >= LINE_CAP || !self.can_spawn(self.now);

        let raw_reward = delta as f32 * SCORE_SCALE;
        let live_prob = if self.over {
            0.0
        } else if (1..4).contains(&cleared) {
            self.burn_live_prob()
        } else {
            1.0
        };
        Reward {
            reward: raw_reward + PIECE_REWARD,
            raw_reward,
            live_prob,
            over_reward: OVER_REWARD,
        }
    }

    fn is_over(&self) -> bool {
        self.over
    }

    fn run_lines(&self) -> u32 {
        self.run_lines
    }

    fn run_pieces(&self) -> u32 {
        self.run_pieces
    }

    fn run_score(&self) -> u64 {
        self.run_score
    }

    fn board_is_clean(&self) -> bool {
        self.board.is_clean()
    }

    fn write_observation(&self, rows: &mut [RowMut<'_>]) -> Result<(), SimError> {
        let [board, meta, meta_int] = rows else {
            return Err(SimError::Observation(format!(
                "expected 3 components, got {}",
                rows.len()
            )));
        };
        let (RowMut::F32(board), RowMut::F32(meta), RowMut::I32(meta_int)) =
            (board, meta, meta_int)
        else {
            return Err(SimError::Observation("component dtypes differ".into()));
        };
        let plane = BOARD_ROWS * BOARD_COLS;
        if board.len() != 2 * plane || meta.len() != META_LEN || meta_int.len() != 2 {
            return Err(SimError::Observation("component lengths differ".into()));
        }

        board.fill(0.0);
        for r in 0..BOARD_ROWS {
            for c in 0..BOARD_COLS {
                if self.board.is_filled(r, c) {
                    board[r * BOARD_COLS + c] = 1.0;
                }
            }
        }
        for (r, c) in self.now.cells(0) {
            board[plane + r * BOARD_COLS + c] = 1.0;
        }

        meta.fill(0.0);
        meta[self.now as usize] = 1.0;
        meta[NUM_PIECES + self.next as usize] = 1.0;
        meta[2 * NUM_PIECES] = self.lines as f32 / LINE_CAP as f32;
        meta[2 * NUM_PIECES + 1] = self.adj_delay as f32 / 61.0;

        meta_int[0] = self.now as i32;
        meta_int[1] = self.next as i32;
        Ok(())
    }
}
