//! The collaborator interface every simulation must expose.

use sr_core::Scenario;
use sr_shm::{ObsComponentDesc, RowMut, REWARD_CHANNELS};
use thiserror::Error;

use crate::stacker::Stacker;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown simulation kernel: {0}")]
    UnknownKernel(String),
    #[error("invalid piece id {0}")]
    InvalidPiece(u8),
    #[error("observation buffer mismatch: {0}")]
    Observation(String),
}

/// Per-step reward vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reward {
    /// Shaped reward, discounted by the estimator.
    pub reward: f32,
    /// Raw score increment, undiscounted.
    pub raw_reward: f32,
    /// Probability mass of the episode continuing past this step.
    pub live_prob: f32,
    /// Value of the terminating branch.
    pub over_reward: f32,
}

impl Reward {
    pub fn to_array(self) -> [f32; REWARD_CHANNELS] {
        [self.reward, self.raw_reward, self.live_prob, self.over_reward]
    }
}

/// A single game simulation, driven one placement at a time.
pub trait SimulationKernel {
    /// Observation components, without the environment dimension.
    fn obs_spec(&self) -> Vec<ObsComponentDesc>;

    fn num_actions(&self) -> usize;

    /// Start a new episode from `scenario`.
    fn reset(&mut self, scenario: &Scenario) -> Result<(), SimError>;

    /// Start a new episode from an empty board with default timing.
    fn reset_random(&mut self);

    /// Apply `action` and advance one placement.
    fn step(&mut self, action: u32) -> Reward;

    fn is_over(&self) -> bool;

    /// Lines cleared since the last reset.
    fn run_lines(&self) -> u32;

    /// Pieces placed since the last reset.
    fn run_pieces(&self) -> u32;

    /// Score gained since the last reset.
    fn run_score(&self) -> u64;

    fn board_is_clean(&self) -> bool;

    /// Write the current observation, one row per component in `obs_spec` order.
    fn write_observation(&self, rows: &mut [RowMut<'_>]) -> Result<(), SimError>;
}

/// Build a kernel by its configured name.
pub fn kernel_by_name(name: &str, seed: u64) -> Result<Box<dyn SimulationKernel + Send>, SimError> {
    match name {
        "stacker" => Ok(Box::new(Stacker::new(seed))),
        other => Err(SimError::UnknownKernel(other.to_string())),
    }
}
