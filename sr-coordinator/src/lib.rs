//! crate: `sr-coordinator` drives the worker pool through rollout windows.
//!
//! Each timestep: read every observation, sample actions from the policy, send each worker its
//! slot's actions, and wait for all replies. After the window the advantage estimator runs
//! over the shared reward and flag blocks and the result is flattened into a batch.

use thiserror::Error;

pub mod coordinator;
pub mod policy;
pub mod pool;
pub mod stats;

pub use coordinator::{Coordinator, Rollout};
pub use policy::{
    log_softmax, sample_action, ObsBatch, ObsComponent, ObsSlice, PolicyError, PolicyModel,
    PolicyOutput, UniformPolicy,
};
pub use pool::{Launcher, WorkerExit, WorkerPool};
pub use stats::{GameTotals, StatsAccumulator};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Config(#[from] sr_core::ConfigError),
    #[error("worker slots: {0}")]
    Slot(#[from] sr_core::SlotError),
    #[error("shared memory: {0}")]
    Shm(#[from] sr_shm::ShmError),
    #[error("kernel: {0}")]
    Sim(#[from] sr_sim::SimError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("advantage: {0}")]
    Advantage(#[from] sr_advantage::AdvantageError),
    #[error("batch: {0}")]
    Batch(#[from] sr_batch::BatchError),
    #[error("event log: {0}")]
    Events(#[from] sr_logging::NdjsonError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start worker {worker}: {source}")]
    Spawn {
        worker: usize,
        source: std::io::Error,
    },
    #[error("worker {worker} disconnected")]
    WorkerDisconnected { worker: usize },
    #[error("protocol error with worker {worker}: {source}")]
    Protocol {
        worker: usize,
        source: sr_proto::ProtoError,
    },
    #[error("worker {worker} sent an unexpected reply, expected {expected}")]
    UnexpectedReply {
        worker: usize,
        expected: &'static str,
    },
    #[error("observation component {0} changed dtype")]
    ObsMismatch(String),
    #[error("policy update channel closed")]
    UpdateChannelClosed,
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
