//! The rollout loop.

use std::sync::mpsc::Receiver;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sr_advantage::{Estimator, RolloutView};
use sr_batch::{ObsData, RolloutBuffers, TrainingBatch};
use sr_core::{check_partition, slots_for, Config, EpisodeRecord, GameParams};
use sr_logging::{
    now_ms, NdjsonWriter, RolloutStatsEventV1, RolloutStatsV1, VersionInfoV1, WorkerExitEventV1,
    EVENT_ROLLOUT_STATS, EVENT_WORKER_EXIT,
};
use sr_proto::{Command, Reply, WorkerInit, PROTOCOL_VERSION};
use sr_shm::{RegionLayout, SharedRegion, REWARD_CHANNELS};
use sr_sim::{derive_seed, kernel_by_name};

use crate::policy::{sample_action, ObsBatch, ObsSlice, PolicyError, PolicyModel};
use crate::pool::{Launcher, WorkerExit, WorkerPool};
use crate::stats::{GameTotals, StatsAccumulator};
use crate::CoordinatorError;

/// Seed index of the coordinator's action-sampling RNG.
const SAMPLER_SEED_INDEX: u64 = u64::MAX;

/// Output of one sampling window.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub batch: TrainingBatch,
    pub stats: RolloutStatsV1,
    /// Episodes that finished during the window, in worker order per timestep.
    pub episodes: Vec<EpisodeRecord>,
}

/// Owns the shared region, the worker pool and the current policy snapshot.
pub struct Coordinator {
    // Declared before `region` so workers are closed before the segments are unlinked.
    pool: WorkerPool,
    region: SharedRegion,
    policy: Box<dyn PolicyModel>,
    updates: Option<Receiver<Box<dyn PolicyModel>>>,
    cfg: Config,
    estimator: Estimator,
    sent_params: Option<GameParams>,
    rng: ChaCha8Rng,
    totals: GameTotals,
    events: Option<NdjsonWriter>,
    version: VersionInfoV1,
    num_actions: usize,
    base_seed: u64,
    rollouts: u64,
}

impl Coordinator {
    /// Validate `cfg`, create the region, start the workers and reset every environment.
    pub fn new(
        cfg: Config,
        launcher: &Launcher,
        policy: Box<dyn PolicyModel>,
    ) -> Result<Self, CoordinatorError> {
        cfg.validate()?;
        let probe = kernel_by_name(&cfg.sampler.kernel, 0)?;
        let num_actions = probe.num_actions();
        if policy.num_actions() != num_actions {
            return Err(PolicyError(format!(
                "policy emits {} actions, kernel {} expects {}",
                policy.num_actions(),
                cfg.sampler.kernel,
                num_actions
            ))
            .into());
        }

        let total = cfg.total_envs();
        let window = cfg.sampler.worker_steps as usize;
        let region = SharedRegion::create(&RegionLayout::new(total, window, probe.obs_spec()))?;
        let slots = slots_for(
            cfg.sampler.n_workers as usize,
            cfg.sampler.env_per_worker as usize,
        );
        check_partition(&slots, total)?;

        let base_seed = cfg
            .sampler
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..1u64 << 40));
        let blocks = region.descs();
        let inits = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| WorkerInit {
                protocol_version: PROTOCOL_VERSION,
                worker: i,
                slot: *slot,
                seed: base_seed.wrapping_add(i as u64),
                kernel: cfg.sampler.kernel.clone(),
                board_file: cfg.curriculum.board_file.clone(),
                chunk_records: cfg.curriculum.chunk_records,
                blocks: blocks.clone(),
            })
            .collect();
        let pool = WorkerPool::spawn(launcher, inits)?;

        let events = match &cfg.logging.events_path {
            Some(path) => Some(NdjsonWriter::open_append_with_flush(
                path,
                cfg.logging.flush_every_lines,
            )?),
            None => None,
        };

        let mut c = Self {
            pool,
            region,
            policy,
            updates: None,
            estimator: Estimator::new(cfg.advantage.gamma, cfg.advantage.lambda),
            sent_params: None,
            rng: ChaCha8Rng::seed_from_u64(derive_seed(base_seed, SAMPLER_SEED_INDEX)),
            totals: GameTotals::default(),
            events,
            version: VersionInfoV1 {
                protocol_version: PROTOCOL_VERSION,
                obs_schema_id: cfg.sampler.kernel.clone(),
            },
            num_actions,
            base_seed,
            rollouts: 0,
            cfg,
        };
        let (params, gamma, lambda) = (
            c.cfg.game_params(),
            c.cfg.advantage.gamma,
            c.cfg.advantage.lambda,
        );
        c.set_params(params, gamma, lambda)?;

        c.pool.broadcast(&Command::Reset)?;
        for w in 0..c.pool.len() {
            match c.pool.recv(w)? {
                Reply::Ack => {}
                Reply::Episodes(_) => {
                    return Err(CoordinatorError::UnexpectedReply {
                        worker: w,
                        expected: "ack",
                    })
                }
            }
        }
        log::info!(
            "coordinator ready: {} workers x {} envs, window {}, seed {}",
            c.pool.len(),
            c.cfg.sampler.env_per_worker,
            window,
            base_seed
        );
        Ok(c)
    }

    /// Policy snapshots arrive here. Each sync point within a window blocks for the next one.
    pub fn attach_updates(&mut self, rx: Receiver<Box<dyn PolicyModel>>) {
        self.updates = Some(rx);
    }

    /// Replace the policy immediately.
    pub fn update_policy(&mut self, policy: Box<dyn PolicyModel>) -> Result<(), CoordinatorError> {
        self.policy = self.checked(policy)?;
        Ok(())
    }

    /// Forward the curriculum ratios to workers if they changed. `gamma` and `lambda` stay local.
    pub fn set_params(
        &mut self,
        params: GameParams,
        gamma: f32,
        lambda: f32,
    ) -> Result<(), CoordinatorError> {
        if self.sent_params != Some(params) {
            self.pool.broadcast(&Command::SetParam(params))?;
            self.sent_params = Some(params);
        }
        self.estimator = Estimator::new(gamma, lambda);
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    pub fn totals(&self) -> GameTotals {
        self.totals
    }

    pub fn rollouts(&self) -> u64 {
        self.rollouts
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    /// Run one window of `worker_steps` timesteps and assemble its training batch.
    pub fn sample(&mut self, epoch: u32) -> Result<Rollout, CoordinatorError> {
        let layout = self.region.layout().clone();
        let (envs, window, na) = (layout.total_envs, layout.window, self.num_actions);
        let interval = self.cfg.weight_sync_interval().max(1) as usize;
        let slots = self.pool.slots();

        let mut buf = RolloutBuffers::new(window, envs, na, &layout.obs, self.cfg.training.use_kl);
        let mut acc = StatsAccumulator::default();
        let mut episodes = Vec::new();

        for t in 0..window {
            let row0 = t * envs;
            {
                let obs = ObsBatch::from_region(&self.region)?;
                copy_obs(&mut buf, row0, &obs)?;
                let out = self.policy.forward(&obs)?;
                out.check(envs, na)?;
                for e in 0..envs {
                    let row = row0 + e;
                    let logits = &out.logits[e * na..(e + 1) * na];
                    let (a, log_pi) = sample_action(logits, &mut self.rng)?;
                    buf.actions[row] = a;
                    buf.log_pis[row] = log_pi;
                    buf.values[row] = out.values[e];
                    buf.devs[row] = out.devs[e];
                    if let Some(kept) = &mut buf.pi_logits {
                        kept[row * na..(row + 1) * na].copy_from_slice(logits);
                    }
                }
            }

            for (w, slot) in slots.iter().enumerate() {
                let actions = buf.actions[row0 + slot.start..row0 + slot.end].to_vec();
                self.pool.send(
                    w,
                    &Command::Step {
                        t: t as u32,
                        actions,
                        epoch,
                    },
                )?;
            }
            // Every worker has written its rows once all replies are in.
            for w in 0..slots.len() {
                match self.pool.recv(w)? {
                    Reply::Episodes(eps) => {
                        for ep in eps {
                            acc.record(&mut self.totals, &ep);
                            episodes.push(ep);
                        }
                    }
                    Reply::Ack => {
                        return Err(CoordinatorError::UnexpectedReply {
                            worker: w,
                            expected: "episodes",
                        })
                    }
                }
            }

            if (t + 1) % interval == 0 {
                if let Some(rx) = &self.updates {
                    let next = rx.recv().map_err(|_| CoordinatorError::UpdateChannelClosed)?;
                    self.policy = self.checked(next)?;
                    log::debug!("policy snapshot swapped after t={t}");
                }
            }
        }

        let last = {
            let obs = ObsBatch::from_region(&self.region)?;
            let out = self.policy.forward(&obs)?;
            out.check(envs, na)?;
            out
        };
        let rewards = self.region.rewards()?;
        let flags = self.region.flags()?;
        let max_raw = rewards
            .chunks_exact(REWARD_CHANNELS)
            .map(|r| r[1])
            .fold(f32::NEG_INFINITY, f32::max);
        let trace = self.estimator.estimate(&RolloutView {
            window,
            envs,
            rewards,
            flags,
            values: &buf.values,
            devs: &buf.devs,
            last_values: &last.values,
            last_devs: &last.devs,
        })?;

        let stats = acc.finish(&self.totals, max_raw);
        let batch = TrainingBatch::assemble(buf, trace)?;
        self.rollouts += 1;

        if let Some(w) = &mut self.events {
            w.write_event(&RolloutStatsEventV1 {
                event: EVENT_ROLLOUT_STATS.to_string(),
                ts_ms: now_ms(),
                v: self.version.clone(),
                rollout: self.rollouts,
                window: window as u32,
                envs: envs as u32,
                finished_episodes: acc.episodes(),
                stats: stats.clone(),
            })?;
        }
        Ok(Rollout {
            batch,
            stats,
            episodes,
        })
    }

    /// Close every worker, record how each ended and unlink the region.
    pub fn close(mut self) -> Result<Vec<WorkerExit>, CoordinatorError> {
        let exits = self.pool.shutdown();
        if let Some(w) = &mut self.events {
            for e in &exits {
                w.write_event(&WorkerExitEventV1 {
                    event: EVENT_WORKER_EXIT.to_string(),
                    ts_ms: now_ms(),
                    v: self.version.clone(),
                    worker: e.worker as u32,
                    slot_start: e.slot.start as u32,
                    slot_end: e.slot.end as u32,
                    status: e.status().to_string(),
                    error: e.error.clone(),
                })?;
            }
            w.flush()?;
        }
        self.region.release()?;
        Ok(exits)
    }

    fn checked(&self, policy: Box<dyn PolicyModel>) -> Result<Box<dyn PolicyModel>, CoordinatorError> {
        if policy.num_actions() != self.num_actions {
            return Err(PolicyError(format!(
                "policy snapshot emits {} actions, expected {}",
                policy.num_actions(),
                self.num_actions
            ))
            .into());
        }
        Ok(policy)
    }
}

fn copy_obs(buf: &mut RolloutBuffers, row0: usize, obs: &ObsBatch<'_>) -> Result<(), CoordinatorError> {
    for (dst, src) in buf.obs.iter_mut().zip(&obs.components) {
        let n = dst.row_len();
        let range = row0 * n..(row0 + obs.envs) * n;
        match (&mut dst.data, src.data) {
            (ObsData::F32(d), ObsSlice::F32(s)) => d[range].copy_from_slice(s),
            (ObsData::I32(d), ObsSlice::I32(s)) => d[range].copy_from_slice(s),
            (ObsData::U8(d), ObsSlice::U8(s)) => d[range].copy_from_slice(s),
            _ => return Err(CoordinatorError::ObsMismatch(dst.label.clone())),
        }
    }
    Ok(())
}
