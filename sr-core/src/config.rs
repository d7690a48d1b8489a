//! Unified configuration schema for the stackrl sampler.
//!
//! One YAML file drives the coordinator, the worker pool and the curriculum. Every section
//! has defaults so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading / validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Worker pool / rollout window settings.
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Return estimation settings.
    #[serde(default)]
    pub advantage: AdvantageConfig,
    /// Scenario curriculum settings.
    #[serde(default)]
    pub curriculum: CurriculumConfig,
    /// Training-side batch shape (used for validation only).
    #[serde(default)]
    pub training: TrainingConfig,
    /// Run event logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplerConfig {
    /// Number of worker processes.
    #[serde(default = "default_n_workers")]
    pub n_workers: u32,
    /// Simulations owned by each worker.
    #[serde(default = "default_env_per_worker")]
    pub env_per_worker: u32,
    /// Rollout window length (timesteps per sampling cycle).
    #[serde(default = "default_worker_steps")]
    pub worker_steps: u32,
    /// Number of policy snapshot swaps accepted within one window.
    #[serde(default = "default_weight_sync_per_epoch")]
    pub weight_sync_per_epoch: u32,
    /// Base seed for per-environment seeds. If None, drawn from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Simulation kernel name. Only `stacker` ships with the sampler.
    #[serde(default = "default_kernel")]
    pub kernel: String,
}

fn default_kernel() -> String {
    "stacker".to_string()
}

fn default_n_workers() -> u32 {
    2
}

fn default_env_per_worker() -> u32 {
    100
}

fn default_worker_steps() -> u32 {
    128
}

fn default_weight_sync_per_epoch() -> u32 {
    2
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_workers: default_n_workers(),
            env_per_worker: default_env_per_worker(),
            worker_steps: default_worker_steps(),
            weight_sync_per_epoch: default_weight_sync_per_epoch(),
            seed: None,
            kernel: default_kernel(),
        }
    }
}

/// Advantage estimator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdvantageConfig {
    /// Discount for the shaped reward channel. The raw score channel is undiscounted.
    #[serde(default = "default_gamma")]
    pub gamma: f32,
    /// GAE lambda, also the mixture weight of the score-variance trace.
    #[serde(default = "default_lambda")]
    pub lambda: f32,
}

fn default_gamma() -> f32 {
    0.999f32.sqrt()
}

fn default_lambda() -> f32 {
    0.9
}

impl Default for AdvantageConfig {
    fn default() -> Self {
        Self {
            gamma: default_gamma(),
            lambda: default_lambda(),
        }
    }
}

/// Curriculum configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CurriculumConfig {
    /// Scales the probability of forced top-outs after burns.
    #[serde(default)]
    pub burn_over_multiplier: f64,
    /// Target share of pieces played on corpus boards. Negative wipes visitation counts.
    #[serde(default)]
    pub board_ratio: f64,
    /// Target share of corpus-board pieces played in short episodes.
    #[serde(default)]
    pub short_ratio: f64,
    /// Corpus of stored boards (26-byte records). None disables corpus sampling.
    #[serde(default)]
    pub board_file: Option<PathBuf>,
    /// Records read per locked corpus transaction.
    #[serde(default = "default_chunk_records")]
    pub chunk_records: u32,
}

fn default_chunk_records() -> u32 {
    4096
}

impl Default for CurriculumConfig {
    fn default() -> Self {
        Self {
            burn_over_multiplier: 0.0,
            board_ratio: 0.0,
            short_ratio: 0.0,
            board_file: None,
            chunk_records: default_chunk_records(),
        }
    }
}

/// Training batch shape. The sampler never trains; these fields only constrain the window.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_n_update_per_epoch")]
    pub n_update_per_epoch: u32,
    #[serde(default = "default_mini_batch_size")]
    pub mini_batch_size: u32,
    /// If true, the batch also carries the sampling-time policy logits.
    #[serde(default)]
    pub use_kl: bool,
}

fn default_epochs() -> u32 {
    1
}

fn default_n_update_per_epoch() -> u32 {
    32
}

fn default_mini_batch_size() -> u32 {
    800
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            n_update_per_epoch: default_n_update_per_epoch(),
            mini_batch_size: default_mini_batch_size(),
            use_kl: false,
        }
    }
}

/// NDJSON event logging.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Append rollout events here. None disables event logging.
    #[serde(default)]
    pub events_path: Option<PathBuf>,
    /// `0` disables periodic flushing.
    #[serde(default = "default_flush_every_lines")]
    pub flush_every_lines: u64,
}

fn default_flush_every_lines() -> u64 {
    1
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            events_path: None,
            flush_every_lines: default_flush_every_lines(),
        }
    }
}

/// Curriculum ratio tuple forwarded to workers with `set_param`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GameParams {
    pub burn_over_multiplier: f64,
    pub board_ratio: f64,
    pub short_ratio: f64,
}

impl GameParams {
    /// A negative component is the visitation-count reset signal.
    pub fn has_reset_signal(&self) -> bool {
        self.burn_over_multiplier < 0.0 || self.board_ratio < 0.0 || self.short_ratio < 0.0
    }

    pub fn abs(&self) -> Self {
        Self {
            burn_over_multiplier: self.burn_over_multiplier.abs(),
            board_ratio: self.board_ratio.abs(),
            short_ratio: self.short_ratio.abs(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn total_envs(&self) -> usize {
        self.sampler.n_workers as usize * self.sampler.env_per_worker as usize
    }

    /// Rows in one flattened batch.
    pub fn batch_size(&self) -> usize {
        self.total_envs() * self.sampler.worker_steps as usize
    }

    /// Timesteps between policy snapshot swaps.
    pub fn weight_sync_interval(&self) -> u32 {
        self.sampler.worker_steps / self.sampler.weight_sync_per_epoch.max(1)
    }

    pub fn game_params(&self) -> GameParams {
        GameParams {
            burn_over_multiplier: self.curriculum.burn_over_multiplier,
            board_ratio: self.curriculum.board_ratio,
            short_ratio: self.curriculum.short_ratio,
        }
    }

    /// Reject degenerate window configurations. Must pass before any worker is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sampler;
        let t = &self.training;
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if s.n_workers == 0 {
            return invalid("sampler.n_workers must be > 0".into());
        }
        if s.env_per_worker == 0 {
            return invalid("sampler.env_per_worker must be > 0".into());
        }
        if s.worker_steps == 0 {
            return invalid("sampler.worker_steps must be > 0".into());
        }
        if s.weight_sync_per_epoch == 0 {
            return invalid("sampler.weight_sync_per_epoch must be > 0".into());
        }
        if t.n_update_per_epoch == 0 || t.mini_batch_size == 0 {
            return invalid("training.n_update_per_epoch and mini_batch_size must be > 0".into());
        }
        let chunk = t.n_update_per_epoch as usize * t.mini_batch_size as usize;
        if self.batch_size() % chunk != 0 {
            return invalid(format!(
                "batch size {} is not divisible by n_update_per_epoch*mini_batch_size={}",
                self.batch_size(),
                chunk
            ));
        }
        if t.n_update_per_epoch % s.weight_sync_per_epoch != 0 {
            return invalid(format!(
                "training.n_update_per_epoch={} is not divisible by weight_sync_per_epoch={}",
                t.n_update_per_epoch, s.weight_sync_per_epoch
            ));
        }
        if s.worker_steps % s.weight_sync_per_epoch != 0 {
            return invalid(format!(
                "sampler.worker_steps={} is not divisible by weight_sync_per_epoch={}",
                s.worker_steps, s.weight_sync_per_epoch
            ));
        }
        let a = &self.advantage;
        if !(0.0..=1.0).contains(&a.lambda) {
            return invalid(format!("advantage.lambda={} outside [0, 1]", a.lambda));
        }
        if !(a.gamma > 0.0 && a.gamma <= 1.0) {
            return invalid(format!("advantage.gamma={} outside (0, 1]", a.gamma));
        }
        if s.kernel.is_empty() {
            return invalid("sampler.kernel must not be empty".into());
        }
        if self.curriculum.chunk_records == 0 {
            return invalid("curriculum.chunk_records must be > 0".into());
        }
        Ok(())
    }
}
