//! sr-core: configuration schema and the data model shared between coordinator and workers.

pub mod config;
pub mod slot;
pub mod types;

pub use config::{Config, ConfigError, GameParams};
pub use slot::{check_partition, slots_for, SlotError, WorkerSlot};
pub use types::{Board, EpisodeRecord, Scenario, BOARD_BYTES, BOARD_CELLS, BOARD_COLS, BOARD_ROWS};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }
}
