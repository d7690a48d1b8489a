use sr_shm::{FLAG_CHANNELS, REWARD_CHANNELS};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvantageError {
    #[error("shape mismatch: {0}")]
    Shape(String),
}

/// Borrowed inputs for one rollout window.
///
/// `rewards` and `flags` use the shared-region layout `(envs, window, channels)`. Model
/// outputs are time-major, index `t * envs + env`.
#[derive(Debug, Clone, Copy)]
pub struct RolloutView<'a> {
    pub window: usize,
    pub envs: usize,
    pub rewards: &'a [f32],
    pub flags: &'a [u8],
    /// Predicted `(value, score)` per step.
    pub values: &'a [[f32; 2]],
    /// Predicted score deviation per step.
    pub devs: &'a [f32],
    /// Bootstrap `(value, score)` for the observation after the window.
    pub last_values: &'a [[f32; 2]],
    pub last_devs: &'a [f32],
}

impl RolloutView<'_> {
    fn check(&self) -> Result<(), AdvantageError> {
        let steps = self.window * self.envs;
        let expect = [
            ("rewards", self.rewards.len(), steps * REWARD_CHANNELS),
            ("flags", self.flags.len(), steps * FLAG_CHANNELS),
            ("values", self.values.len(), steps),
            ("devs", self.devs.len(), steps),
            ("last_values", self.last_values.len(), self.envs),
            ("last_devs", self.last_devs.len(), self.envs),
        ];
        for (name, got, want) in expect {
            if got != want {
                return Err(AdvantageError::Shape(format!(
                    "{name} has {got} elements, expected {want}"
                )));
            }
        }
        Ok(())
    }
}

/// Per-step estimator output, time-major like the model outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvantageTrace {
    pub advantages: Vec<[f32; 2]>,
    /// Square root of the carried score variance.
    pub raw_devs: Vec<f32>,
    /// Predicted score plus its advantage.
    pub raw_values: Vec<f32>,
    /// Soft-finish steps; excluded from the policy loss.
    pub skip_mask: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimator {
    pub gamma: f32,
    pub lambda: f32,
}

impl Estimator {
    pub fn new(gamma: f32, lambda: f32) -> Self {
        Self { gamma, lambda }
    }

    /// Walk each environment's window from the last step to the first.
    ///
    /// At every step the target is
    /// `r + (1 - live) * over + live * γ * (V' + λ * A') * !done`, per channel, with
    /// `live = 1` and `γ = 1` on the score channel. A done step also zeroes the carried
    /// variance. A soft-done step reports zero advantage and the predicted variance, and
    /// restarts the carry from them so nothing leaks across the boundary.
    pub fn estimate(&self, v: &RolloutView<'_>) -> Result<AdvantageTrace, AdvantageError> {
        v.check()?;
        let (window, envs) = (v.window, v.envs);
        let lambda = self.lambda;
        let gammas = [self.gamma, 1.0];

        let mut advantages = vec![[0.0f32; 2]; window * envs];
        let mut raw_vars = vec![0.0f32; window * envs];
        let mut skip_mask = vec![0u8; window * envs];

        for e in 0..envs {
            let mut last_value = v.last_values[e];
            let mut last_var = v.last_devs[e] * v.last_devs[e];
            let mut last_adv = [0.0f32; 2];

            for t in (0..window).rev() {
                let cell = e * window + t;
                let r = &v.rewards[cell * REWARD_CHANNELS..(cell + 1) * REWARD_CHANNELS];
                let f = &v.flags[cell * FLAG_CHANNELS..(cell + 1) * FLAG_CHANNELS];
                let i = t * envs + e;

                let not_done = if f[0] != 0 { 0.0 } else { 1.0 };
                let soft = f[1] != 0;
                let live = [r[2], 1.0];
                let over = r[3];
                let pred = v.values[i];
                let pred_var = v.devs[i] * v.devs[i];

                last_var *= not_done;
                let mut ground = [0.0f32; 2];
                for c in 0..2 {
                    ground[c] = r[c]
                        + (1.0 - live[c]) * over
                        + live[c] * gammas[c] * (last_value[c] + lambda * last_adv[c]) * not_done;
                    last_adv[c] = ground[c] - pred[c];
                }
                advantages[i] = last_adv;
                raw_vars[i] = last_var;

                let mix = lambda * ground[1] + (1.0 - lambda) * pred[1];
                last_var = lambda * (last_var + ground[1] * ground[1])
                    + (1.0 - lambda) * (pred_var + pred[1] * pred[1])
                    - mix * mix;

                if soft {
                    last_adv = [0.0; 2];
                    last_var = pred_var;
                    advantages[i] = last_adv;
                    raw_vars[i] = pred_var;
                    skip_mask[i] = 1;
                }
                last_value = pred;
            }
        }

        let raw_values = v
            .values
            .iter()
            .zip(&advantages)
            .map(|(p, a)| p[1] + a[1])
            .collect();
        Ok(AdvantageTrace {
            advantages,
            // Rounding can leave a tiny negative variance.
            raw_devs: raw_vars.iter().map(|&x| x.max(0.0).sqrt()).collect(),
            raw_values,
            skip_mask,
        })
    }
}
