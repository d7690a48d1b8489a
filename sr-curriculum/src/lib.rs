//! sr-curriculum: chooses where each episode starts.

pub mod corpus;
pub mod manager;
pub mod tables;

pub use corpus::{
    append_records, read_offset, record_count, CorpusError, CorpusReader, CorpusRecord,
    RECORD_LEN,
};
pub use manager::{BucketKey, CurriculumError, CurriculumManager};

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
