//! One environment's episode lifecycle.
//!
//! `step` is two-phase: advance the kernel, and if the episode ended move `Running ->
//! Terminal`, report it, then take the explicit `Terminal -> Running` edge by resetting from
//! the curriculum. Callers always see a running environment with a fresh observation.

use sr_core::{EpisodeRecord, Scenario};
use sr_curriculum::CurriculumManager;
use sr_shm::{RowMut, FLAG_CHANNELS, REWARD_CHANNELS};
use sr_sim::{SimError, SimulationKernel};

use crate::WorkerError;

/// Lines a short episode must clear before a clean board ends it.
pub const SOFT_DONE_LINES: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Terminal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub reward: [f32; REWARD_CHANNELS],
    /// `(done, soft_done)`; `done` includes a carried soft finish.
    pub flags: [u8; FLAG_CHANNELS],
    pub finished: Option<EpisodeRecord>,
}

pub struct GameEnv {
    kernel: Box<dyn SimulationKernel + Send>,
    scenario: Option<Scenario>,
    phase: Phase,
    prev_soft_done: bool,
    reward_sum: f64,
}

impl GameEnv {
    pub fn new(kernel: Box<dyn SimulationKernel + Send>) -> Self {
        Self {
            kernel,
            scenario: None,
            phase: Phase::Terminal,
            prev_soft_done: false,
            reward_sum: 0.0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn scenario(&self) -> Option<&Scenario> {
        self.scenario.as_ref()
    }

    /// Start an episode from the next curriculum scenario.
    pub fn reset(&mut self, manager: &mut CurriculumManager) -> Result<(), WorkerError> {
        let scenario = manager.next_scenario()?;
        self.start(scenario)?;
        Ok(())
    }

    /// Start an episode from `scenario`.
    pub fn start(&mut self, scenario: Scenario) -> Result<(), SimError> {
        self.kernel.reset(&scenario)?;
        self.scenario = Some(scenario);
        self.prev_soft_done = false;
        self.reward_sum = 0.0;
        self.phase = Phase::Running;
        Ok(())
    }

    pub fn step(
        &mut self,
        action: u32,
        manager: &mut CurriculumManager,
    ) -> Result<StepOutcome, WorkerError> {
        if self.phase != Phase::Running {
            self.reset(manager)?;
        }
        let is_short = self.scenario.as_ref().is_some_and(|s| s.is_short);

        let reward = self.kernel.step(action);
        self.reward_sum += reward.reward as f64;

        let soft_done = self.prev_soft_done;
        let done = soft_done || self.kernel.is_over();
        let run_lines = self.kernel.run_lines();
        self.prev_soft_done =
            is_short && run_lines >= SOFT_DONE_LINES && self.kernel.board_is_clean();

        let mut finished = None;
        if done {
            self.phase = Phase::Terminal;
            let pieces = self.kernel.run_pieces();
            finished = Some(EpisodeRecord {
                is_short,
                is_over: self.kernel.is_over(),
                reward: self.reward_sum,
                score: self.kernel.run_score(),
                lines: run_lines,
                pieces,
            });
            if let Some(s) = &self.scenario {
                manager.update_state(s, pieces, run_lines);
            }
            self.reset(manager)?;
        }

        Ok(StepOutcome {
            reward: reward.to_array(),
            flags: [done as u8, soft_done as u8],
            finished,
        })
    }

    pub fn write_observation(&self, rows: &mut [RowMut<'_>]) -> Result<(), SimError> {
        self.kernel.write_observation(rows)
    }
}

impl std::fmt::Debug for GameEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameEnv")
            .field("phase", &self.phase)
            .field("scenario", &self.scenario)
            .field("prev_soft_done", &self.prev_soft_done)
            .finish()
    }
}
