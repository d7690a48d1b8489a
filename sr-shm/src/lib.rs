//! sr-shm: the shared observation region.
//!
//! A region is a set of named POSIX shared-memory segments with fixed shape and dtype. The
//! coordinator creates (and later unlinks) them; workers attach by name and write only into
//! their own row range.

pub mod block;
pub mod layout;
pub mod region;

pub use block::{BlockDesc, Dtype, Element, RowMut, ShmBlock, ShmError};
pub use layout::{ObsComponentDesc, RegionLayout, FLAG_CHANNELS, REWARD_CHANNELS};
pub use region::SharedRegion;

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
mod region_tests;
