//! Scenario axes sampled by the curriculum.

/// Frame offsets of the 10 taps, per timing profile: 30hz, 24hz, 20hz, 15hz, 12hz, 10hz, slow5.
pub const TAP_SEQUENCES: [[u8; 10]; 7] = [
    [0, 2, 4, 6, 8, 10, 12, 14, 16, 18],
    [0, 3, 5, 8, 10, 13, 15, 18, 20, 23],
    [0, 3, 6, 9, 12, 15, 18, 21, 24, 27],
    [0, 4, 8, 12, 16, 20, 24, 28, 32, 36],
    [0, 5, 10, 15, 20, 25, 30, 35, 40, 45],
    [0, 6, 12, 18, 24, 30, 36, 42, 48, 54],
    [0, 2, 4, 6, 18, 20, 22, 24, 36, 38],
];

pub const ADJ_DELAYS: [u8; 6] = [0, 18, 21, 24, 30, 61];

/// high, mid, low.
pub const AGGRESSION_LEVELS: usize = 3;

pub const BUCKET_INTERVAL: u32 = 5;

/// Matches the kernel's line cap of 430.
pub const LINE_CAP: u32 = 430;

pub const BUCKETS: usize = (LINE_CAP / BUCKET_INTERVAL) as usize - 1;

/// Line counts at which the corpus difficulty levels begin.
pub const LEVEL_LINES: [u32; 5] = [0, 130, 230, 330, 430];

/// First bucket where the slow timing profiles (ids 3..6) are excluded.
pub const SLOW_TAP_CUTOFF_BUCKET: usize = (LEVEL_LINES[3] / BUCKET_INTERVAL) as usize;

/// `(tap, delay, divisor)` cells whose counts are scaled down so they are drawn more often.
pub const COUNT_DIVISORS: [(usize, usize, f64); 4] = [(0, 0, 3.0), (0, 1, 6.0), (2, 2, 3.0), (4, 2, 6.0)];

pub const fn cell_count() -> usize {
    TAP_SEQUENCES.len() * ADJ_DELAYS.len() * AGGRESSION_LEVELS * BUCKETS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_constants() {
        assert_eq!(BUCKETS, 85);
        assert_eq!(SLOW_TAP_CUTOFF_BUCKET, 66);
        assert_eq!(cell_count(), 7 * 6 * 3 * 85);
        for seq in TAP_SEQUENCES {
            assert!(seq.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
