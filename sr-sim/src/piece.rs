//! Tetromino footprints.

pub const NUM_PIECES: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece {
    T,
    J,
    Z,
    O,
    S,
    L,
    I,
}

const BASE: [[(i8, i8); 4]; NUM_PIECES] = [
    [(0, 0), (0, 1), (0, 2), (1, 1)],
    [(0, 0), (0, 1), (0, 2), (1, 2)],
    [(0, 0), (0, 1), (1, 1), (1, 2)],
    [(0, 0), (0, 1), (1, 0), (1, 1)],
    [(0, 1), (0, 2), (1, 0), (1, 1)],
    [(0, 0), (0, 1), (0, 2), (1, 0)],
    [(0, 0), (0, 1), (0, 2), (0, 3)],
];

impl Piece {
    pub const ALL: [Piece; NUM_PIECES] = [
        Piece::T,
        Piece::J,
        Piece::Z,
        Piece::O,
        Piece::S,
        Piece::L,
        Piece::I,
    ];

    pub fn from_id(id: u8) -> Option<Piece> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Cells `(row, col)` of rotation `rot` (clockwise quarter turns), normalised to a
    /// zero top-left corner.
    pub fn cells(self, rot: u32) -> [(usize, usize); 4] {
        let mut pts = BASE[self as usize];
        for _ in 0..rot % 4 {
            for p in &mut pts {
                *p = (p.1, -p.0);
            }
        }
        let min_r = pts.iter().map(|p| p.0).min().unwrap_or(0);
        let min_c = pts.iter().map(|p| p.1).min().unwrap_or(0);
        pts.map(|(r, c)| ((r - min_r) as usize, (c - min_c) as usize))
    }

    pub fn width(self, rot: u32) -> usize {
        self.cells(rot).iter().map(|c| c.1).max().unwrap_or(0) + 1
    }

    pub fn height(self, rot: u32) -> usize {
        self.cells(rot).iter().map(|c| c.0).max().unwrap_or(0) + 1
    }
}
