//! sr-bench: criterion benchmarks live under `benches/`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
