//! sr-sim: the simulation kernel seam.
//!
//! Workers drive any [`SimulationKernel`]; the sampler only relies on the trait. [`Stacker`] is
//! the reduced block-stacking kernel shipped with the workspace so the pool runs end to end.

pub mod kernel;
pub mod piece;
pub mod seed;
pub mod stacker;

pub use kernel::{kernel_by_name, Reward, SimError, SimulationKernel};
pub use piece::{Piece, NUM_PIECES};
pub use seed::derive_seed;
pub use stacker::{Stacker, ACTIONS, LINE_CAP, OVER_REWARD};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
