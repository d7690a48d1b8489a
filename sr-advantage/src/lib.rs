//! sr-advantage: returns from reward streams.
//!
//! Two value channels are estimated side by side: channel 0 is the shaped, discounted return
//! with a per-step continuation probability; channel 1 is the raw score, undiscounted and
//! always continuing. Channel 1 also carries a λ-mixture variance trace whose square root is
//! the score deviation target.

pub mod estimator;

pub use estimator::{AdvantageError, AdvantageTrace, Estimator, RolloutView};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
