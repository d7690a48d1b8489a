//! The policy model seam and categorical action sampling.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use sr_shm::{Dtype, ObsComponentDesc, ShmError, SharedRegion};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("policy: {0}")]
pub struct PolicyError(pub String);

/// One observation component for every environment, borrowed from the shared region.
#[derive(Debug, Clone, Copy)]
pub enum ObsSlice<'a> {
    F32(&'a [f32]),
    I32(&'a [i32]),
    U8(&'a [u8]),
}

#[derive(Debug, Clone, Copy)]
pub struct ObsComponent<'a> {
    pub desc: &'a ObsComponentDesc,
    pub data: ObsSlice<'a>,
}

/// Current observation of all environments, row `env`.
#[derive(Debug, Clone)]
pub struct ObsBatch<'a> {
    pub envs: usize,
    pub components: Vec<ObsComponent<'a>>,
}

impl<'a> ObsBatch<'a> {
    pub fn from_region(region: &'a SharedRegion) -> Result<Self, ShmError> {
        let layout = region.layout();
        let rows = 0..layout.total_envs;
        let components = layout
            .obs
            .iter()
            .enumerate()
            .map(|(i, desc)| {
                let data = match desc.dtype {
                    Dtype::F32 => ObsSlice::F32(region.obs_rows::<f32>(i, rows.clone())?),
                    Dtype::I32 => ObsSlice::I32(region.obs_rows::<i32>(i, rows.clone())?),
                    Dtype::U8 => ObsSlice::U8(region.obs_rows::<u8>(i, rows.clone())?),
                };
                Ok(ObsComponent { desc, data })
            })
            .collect::<Result<Vec<_>, ShmError>>()?;
        Ok(Self {
            envs: layout.total_envs,
            components,
        })
    }

    pub fn component(&self, label: &str) -> Option<&ObsComponent<'a>> {
        self.components.iter().find(|c| c.desc.label == label)
    }

    /// Row `env` of an f32 component.
    pub fn row_f32(&self, label: &str, env: usize) -> Option<&'a [f32]> {
        let c = self.component(label)?;
        let n = c.desc.row_len();
        match c.data {
            ObsSlice::F32(v) => v.get(env * n..(env + 1) * n),
            _ => None,
        }
    }
}

/// Model outputs for one observation batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    /// `envs x num_actions`, row-major.
    pub logits: Vec<f32>,
    /// `(value, score)` per environment.
    pub values: Vec<[f32; 2]>,
    /// Score deviation per environment.
    pub devs: Vec<f32>,
}

impl PolicyOutput {
    pub fn check(&self, envs: usize, num_actions: usize) -> Result<(), PolicyError> {
        if self.logits.len() != envs * num_actions
            || self.values.len() != envs
            || self.devs.len() != envs
        {
            return Err(PolicyError(format!(
                "output sizes logits={} values={} devs={} do not match {envs} envs x {num_actions} actions",
                self.logits.len(),
                self.values.len(),
                self.devs.len()
            )));
        }
        Ok(())
    }
}

/// The network the coordinator samples from. Snapshots are swapped wholesale.
pub trait PolicyModel: Send {
    fn num_actions(&self) -> usize;

    fn forward(&mut self, obs: &ObsBatch<'_>) -> Result<PolicyOutput, PolicyError>;
}

/// Uniform logits and zero value predictions. Drives the pool without a trained network.
#[derive(Debug, Clone)]
pub struct UniformPolicy {
    num_actions: usize,
}

impl UniformPolicy {
    pub fn new(num_actions: usize) -> Self {
        Self { num_actions }
    }
}

impl PolicyModel for UniformPolicy {
    fn num_actions(&self) -> usize {
        self.num_actions
    }

    fn forward(&mut self, obs: &ObsBatch<'_>) -> Result<PolicyOutput, PolicyError> {
        Ok(PolicyOutput {
            logits: vec![0.0; obs.envs * self.num_actions],
            values: vec![[0.0; 2]; obs.envs],
            devs: vec![0.0; obs.envs],
        })
    }
}

/// Log-probabilities of `logits`.
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = logits.iter().map(|&l| (l - max).exp()).sum();
    let log_z = max + sum.ln();
    logits.iter().map(|&l| l - log_z).collect()
}

/// Draw one action from the categorical distribution over `logits`.
/// Returns the action and its log-probability.
pub fn sample_action<R: Rng + ?Sized>(
    logits: &[f32],
    rng: &mut R,
) -> Result<(u32, f32), PolicyError> {
    let log_p = log_softmax(logits);
    let weights = log_p.iter().map(|&l| l.exp());
    let dist = WeightedIndex::new(weights)
        .map_err(|e| PolicyError(format!("cannot sample from logits: {e}")))?;
    let a = dist.sample(rng);
    Ok((a as u32, log_p[a]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn log_softmax_normalises() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = lp.iter().map(|l| l.exp()).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(lp[2] > lp[1] && lp[1] > lp[0]);
    }

    #[test]
    fn uniform_logits_give_log_one_over_n() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (a, lp) = sample_action(&[0.0; 800], &mut rng).unwrap();
        assert!(a < 800);
        assert!((lp - (1.0f32 / 800.0).ln()).abs() < 1e-5);
    }

    #[test]
    fn dominant_logit_is_sampled() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut logits = vec![-100.0; 10];
        logits[7] = 100.0;
        for _ in 0..50 {
            assert_eq!(sample_action(&logits, &mut rng).unwrap().0, 7);
        }
    }

    #[test]
    fn nan_logits_are_an_error() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(sample_action(&[f32::NAN, 0.0], &mut rng).is_err());
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let logits: Vec<f32> = (0..32).map(|i| (i as f32 * 0.37).sin()).collect();
        let draw = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..20)
                .map(|_| sample_action(&logits, &mut rng).unwrap().0)
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
    }

    #[test]
    fn output_check_rejects_wrong_sizes() {
        let out = PolicyOutput {
            logits: vec![0.0; 8],
            values: vec![[0.0; 2]; 2],
            devs: vec![0.0; 1],
        };
        assert!(out.check(2, 4).is_err());
    }
}
