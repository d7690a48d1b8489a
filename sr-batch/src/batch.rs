//! Rollout buffers and the flattened batch built from them.

use sr_advantage::AdvantageTrace;
use sr_shm::{Dtype, ObsComponentDesc};

use crate::BatchError;

/// Owned storage of one observation component over many rows.
#[derive(Debug, Clone, PartialEq)]
pub enum ObsData {
    F32(Vec<f32>),
    I32(Vec<i32>),
    U8(Vec<u8>),
}

impl ObsData {
    pub fn zeros(dtype: Dtype, len: usize) -> Self {
        match dtype {
            Dtype::F32 => ObsData::F32(vec![0.0; len]),
            Dtype::I32 => ObsData::I32(vec![0; len]),
            Dtype::U8 => ObsData::U8(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ObsData::F32(v) => v.len(),
            ObsData::I32(v) => v.len(),
            ObsData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            ObsData::F32(_) => Dtype::F32,
            ObsData::I32(_) => Dtype::I32,
            ObsData::U8(_) => Dtype::U8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ObsData::F32(v) => bytemuck::cast_slice(v),
            ObsData::I32(v) => bytemuck::cast_slice(v),
            ObsData::U8(v) => v,
        }
    }
}

/// One observation component, `rows x shape`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObsTensor {
    pub label: String,
    /// Per-row shape.
    pub shape: Vec<usize>,
    pub data: ObsData,
}

impl ObsTensor {
    pub fn zeros(desc: &ObsComponentDesc, rows: usize) -> Self {
        Self {
            label: desc.label.clone(),
            shape: desc.shape.clone(),
            data: ObsData::zeros(desc.dtype, rows * desc.row_len()),
        }
    }

    pub fn row_len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn rows(&self) -> usize {
        match self.row_len() {
            0 => 0,
            n => self.data.len() / n,
        }
    }
}

/// Everything the coordinator records while sampling, time-major (`t * envs + env`).
#[derive(Debug, Clone)]
pub struct RolloutBuffers {
    pub window: usize,
    pub envs: usize,
    pub num_actions: usize,
    pub obs: Vec<ObsTensor>,
    pub actions: Vec<u32>,
    pub log_pis: Vec<f32>,
    /// Predicted `(value, score)`.
    pub values: Vec<[f32; 2]>,
    /// Predicted score deviation.
    pub devs: Vec<f32>,
    /// Sampling-time logits, `num_actions` per row, when requested.
    pub pi_logits: Option<Vec<f32>>,
}

impl RolloutBuffers {
    pub fn new(
        window: usize,
        envs: usize,
        num_actions: usize,
        obs_spec: &[ObsComponentDesc],
        keep_logits: bool,
    ) -> Self {
        let rows = window * envs;
        Self {
            window,
            envs,
            num_actions,
            obs: obs_spec.iter().map(|d| ObsTensor::zeros(d, rows)).collect(),
            actions: vec![0; rows],
            log_pis: vec![0.0; rows],
            values: vec![[0.0; 2]; rows],
            devs: vec![0.0; rows],
            pi_logits: keep_logits.then(|| vec![0.0; rows * num_actions]),
        }
    }

    pub fn rows(&self) -> usize {
        self.window * self.envs
    }
}

/// A flattened training batch, one row per `(t, env)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingBatch {
    pub window: usize,
    pub envs: usize,
    pub num_actions: usize,
    pub obs: Vec<ObsTensor>,
    pub actions: Vec<i32>,
    pub log_pis: Vec<f32>,
    pub skip_mask: Vec<u8>,
    /// Channel 0 prediction.
    pub values: Vec<f32>,
    /// Channel 0 advantage.
    pub advantages: Vec<f32>,
    pub raw_devs: Vec<f32>,
    /// Channel 1 prediction plus its advantage.
    pub raw_values: Vec<f32>,
    pub pi_logits: Option<Vec<f32>>,
}

impl TrainingBatch {
    /// Join the sampled buffers with their advantage trace. The trace is consumed.
    pub fn assemble(buf: RolloutBuffers, trace: AdvantageTrace) -> Result<Self, BatchError> {
        let rows = buf.rows();
        let lens = [
            ("actions", buf.actions.len()),
            ("log_pis", buf.log_pis.len()),
            ("values", buf.values.len()),
            ("advantages", trace.advantages.len()),
            ("raw_devs", trace.raw_devs.len()),
            ("raw_values", trace.raw_values.len()),
            ("skip_mask", trace.skip_mask.len()),
        ];
        for (name, len) in lens {
            if len != rows {
                return Err(BatchError::Shape(format!(
                    "{name} has {len} rows, expected {rows}"
                )));
            }
        }
        for o in &buf.obs {
            if o.rows() != rows || o.data.len() != rows * o.row_len() {
                return Err(BatchError::Shape(format!(
                    "obs {} has {} elements, expected {}",
                    o.label,
                    o.data.len(),
                    rows * o.row_len()
                )));
            }
        }
        if let Some(l) = &buf.pi_logits {
            if l.len() != rows * buf.num_actions {
                return Err(BatchError::Shape(format!(
                    "pi_logits has {} elements, expected {}",
                    l.len(),
                    rows * buf.num_actions
                )));
            }
        }

        Ok(Self {
            window: buf.window,
            envs: buf.envs,
            num_actions: buf.num_actions,
            obs: buf.obs,
            actions: buf.actions.iter().map(|&a| a as i32).collect(),
            log_pis: buf.log_pis,
            skip_mask: trace.skip_mask,
            values: buf.values.iter().map(|v| v[0]).collect(),
            advantages: trace.advantages.iter().map(|a| a[0]).collect(),
            raw_devs: trace.raw_devs,
            raw_values: trace.raw_values,
            pi_logits: buf.pi_logits,
        })
    }

    pub fn rows(&self) -> usize {
        self.window * self.envs
    }

    /// Row index of `(t, env)`.
    pub fn row(&self, t: usize, env: usize) -> usize {
        t * self.envs + env
    }
}
