//! Tensor names inside a batch file.

/// Batch file format version.
pub const BATCH_FORMAT_VERSION: u32 = 1;

/// Observation components are stored as `obs.<label>`.
pub const T_OBS_PREFIX: &str = "obs.";
pub const T_ACTIONS: &str = "actions";
pub const T_LOG_PIS: &str = "log_pis";
pub const T_SKIP_MASK: &str = "skip_mask";
pub const T_VALUES: &str = "values";
pub const T_ADVANTAGES: &str = "advantages";
pub const T_RAW_DEVS: &str = "raw_devs";
pub const T_RAW_VALUES: &str = "raw_values";
pub const T_PI_LOGITS: &str = "pi_logits";
