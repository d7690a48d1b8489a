//! Fixed block layout of the region.

use serde::{Deserialize, Serialize};

use crate::block::{BlockDesc, Dtype};

/// `(reward, raw_reward, live_prob, over_reward)`.
pub const REWARD_CHANNELS: usize = 4;
/// `(hard_done, soft_done)`.
pub const FLAG_CHANNELS: usize = 2;

pub const REWARDS_LABEL: &str = "rewards";
pub const FLAGS_LABEL: &str = "flags";

/// One observation component, per environment (no leading env dimension).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsComponentDesc {
    pub label: String,
    pub shape: Vec<usize>,
    pub dtype: Dtype,
}

impl ObsComponentDesc {
    pub fn new(label: &str, shape: &[usize], dtype: Dtype) -> Self {
        Self {
            label: label.to_string(),
            shape: shape.to_vec(),
            dtype,
        }
    }

    pub fn row_len(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Shapes of every block for one rollout lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionLayout {
    pub total_envs: usize,
    pub window: usize,
    pub obs: Vec<ObsComponentDesc>,
}

impl RegionLayout {
    pub fn new(total_envs: usize, window: usize, obs: Vec<ObsComponentDesc>) -> Self {
        Self {
            total_envs,
            window,
            obs,
        }
    }

    /// Block descriptors in region order: observation components, rewards, flags.
    /// Segment names are `{prefix}-{idx}`.
    pub fn block_descs(&self, prefix: &str) -> Vec<BlockDesc> {
        let mut out = Vec::with_capacity(self.obs.len() + 2);
        for c in &self.obs {
            let mut shape = Vec::with_capacity(c.shape.len() + 1);
            shape.push(self.total_envs);
            shape.extend_from_slice(&c.shape);
            out.push(BlockDesc {
                name: String::new(),
                label: c.label.clone(),
                shape,
                dtype: c.dtype,
            });
        }
        out.push(BlockDesc {
            name: String::new(),
            label: REWARDS_LABEL.to_string(),
            shape: vec![self.total_envs, self.window, REWARD_CHANNELS],
            dtype: Dtype::F32,
        });
        out.push(BlockDesc {
            name: String::new(),
            label: FLAGS_LABEL.to_string(),
            shape: vec![self.total_envs, self.window, FLAG_CHANNELS],
            dtype: Dtype::U8,
        });
        for (i, d) in out.iter_mut().enumerate() {
            d.name = format!("{prefix}-{i}");
        }
        out
    }

    /// Recover the layout from descriptors received at spawn time.
    pub fn from_descs(descs: &[BlockDesc]) -> Option<Self> {
        let n = descs.len();
        if n < 2 {
            return None;
        }
        let rewards = &descs[n - 2];
        let flags = &descs[n - 1];
        if rewards.label != REWARDS_LABEL
            || flags.label != FLAGS_LABEL
            || rewards.shape.len() != 3
            || rewards.shape[2] != REWARD_CHANNELS
            || flags.shape.get(..2) != rewards.shape.get(..2)
        {
            return None;
        }
        let (total_envs, window) = (rewards.shape[0], rewards.shape[1]);
        let mut obs = Vec::with_capacity(n - 2);
        for d in &descs[..n - 2] {
            if d.shape.first() != Some(&total_envs) {
                return None;
            }
            obs.push(ObsComponentDesc {
                label: d.label.clone(),
                shape: d.shape[1..].to_vec(),
                dtype: d.dtype,
            });
        }
        Some(Self::new(total_envs, window, obs))
    }
}
