//! Scenario / episode records and the packed board used by the corpus format.

pub const BOARD_ROWS: usize = 20;
pub const BOARD_COLS: usize = 10;
pub const BOARD_CELLS: usize = BOARD_ROWS * BOARD_COLS;
/// Packed size of a board bitmask (200 bits).
pub const BOARD_BYTES: usize = 25;

/// 20x10 board packed as a little-endian bitmask, bit `row * 10 + col`.
///
/// A set bit marks an EMPTY cell, so `Board::EMPTY` is all ones. This matches the corpus
/// record layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Board([u8; BOARD_BYTES]);

impl Board {
    pub const EMPTY: Board = Board([0xFF; BOARD_BYTES]);

    pub fn from_bytes(bytes: [u8; BOARD_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BOARD_BYTES] {
        &self.0
    }

    pub fn is_empty_cell(&self, row: usize, col: usize) -> bool {
        let i = row * BOARD_COLS + col;
        self.0[i / 8] & (1 << (i % 8)) != 0
    }

    pub fn is_filled(&self, row: usize, col: usize) -> bool {
        !self.is_empty_cell(row, col)
    }

    pub fn set_filled(&mut self, row: usize, col: usize, filled: bool) {
        let i = row * BOARD_COLS + col;
        let bit = 1u8 << (i % 8);
        if filled {
            self.0[i / 8] &= !bit;
        } else {
            self.0[i / 8] |= bit;
        }
    }

    /// Number of occupied cells (`200 - popcount`).
    pub fn occupied_cells(&self) -> u32 {
        let empty: u32 = self.0.iter().map(|b| b.count_ones()).sum();
        BOARD_CELLS as u32 - empty
    }

    pub fn is_clean(&self) -> bool {
        self.occupied_cells() == 0
    }

    pub fn row_is_full(&self, row: usize) -> bool {
        (0..BOARD_COLS).all(|c| self.is_filled(row, c))
    }
}

impl Default for Board {
    fn default() -> Self {
        Board::EMPTY
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Board(occupied={})", self.occupied_cells())?;
        for r in 0..BOARD_ROWS {
            let line: String = (0..BOARD_COLS)
                .map(|c| if self.is_filled(r, c) { 'x' } else { '.' })
                .collect();
            writeln!(f, "  {line}")?;
        }
        Ok(())
    }
}

/// Initial configuration for one episode. Issued by the curriculum manager, consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// Index into the timing-profile table.
    pub tap_id: u8,
    /// Frame offsets of the 10 taps for this timing profile.
    pub tap_sequence: [u8; 10],
    pub adj_delay_id: u8,
    pub adj_delay: u8,
    /// Difficulty level (aggression).
    pub aggression_level: u8,
    pub burn_over_multiplier: f64,
    /// Line count the episode starts at.
    pub lines: u32,
    pub is_board: bool,
    /// Episode should stop early once the soft condition is met.
    pub is_short: bool,
    pub board: Option<Board>,
    pub now_piece: Option<u8>,
}

/// Summary emitted once per finished episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeRecord {
    pub is_short: bool,
    /// The simulation truly topped out (as opposed to a soft finish).
    pub is_over: bool,
    pub reward: f64,
    pub score: u64,
    pub lines: u32,
    pub pieces: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_board_is_clean() {
        assert!(Board::EMPTY.is_clean());
        assert_eq!(Board::EMPTY.occupied_cells(), 0);
    }

    #[test]
    fn set_filled_roundtrips_cells() {
        let mut b = Board::EMPTY;
        b.set_filled(19, 3, true);
        b.set_filled(0, 9, true);
        assert!(b.is_filled(19, 3));
        assert!(b.is_filled(0, 9));
        assert!(!b.is_filled(19, 4));
        assert_eq!(b.occupied_cells(), 2);
        b.set_filled(19, 3, false);
        assert_eq!(b.occupied_cells(), 1);
    }

    #[test]
    fn bit_layout_is_little_endian_row_major() {
        let mut b = Board::EMPTY;
        // cell 11 = row 1, col 1 -> byte 1, bit 3
        b.set_filled(1, 1, true);
        assert_eq!(b.as_bytes()[1], 0xFF & !(1 << 3));
    }

    #[test]
    fn full_row_detection() {
        let mut b = Board::EMPTY;
        for c in 0..BOARD_COLS {
            b.set_filled(19, c, true);
        }
        assert!(b.row_is_full(19));
        assert!(!b.row_is_full(18));
    }
}
