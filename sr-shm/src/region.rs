//! Creator/attacher lifecycle over the set of blocks.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block::{BlockDesc, Element, RowMut, ShmBlock, ShmError};
use crate::layout::{RegionLayout, FLAG_CHANNELS, REWARD_CHANNELS};

static NONCE: AtomicU64 = AtomicU64::new(0);

fn fresh_prefix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0);
    let n = NONCE.fetch_add(1, Ordering::Relaxed);
    format!("/sr-{}-{:x}{:x}", std::process::id(), nanos, n)
}

/// All blocks of one rollout lifetime.
///
/// The coordinator holds the creating instance; each worker attaches its own. Workers write
/// only rows of their slot; the coordinator reads only after every worker acknowledged.
#[derive(Debug)]
pub struct SharedRegion {
    layout: RegionLayout,
    blocks: Vec<ShmBlock>,
}

impl SharedRegion {
    /// Create every block zero-filled under a process-unique name prefix.
    pub fn create(layout: &RegionLayout) -> Result<Self, ShmError> {
        let descs = layout.block_descs(&fresh_prefix());
        let mut blocks = Vec::with_capacity(descs.len());
        for d in descs {
            // Already created blocks unlink on drop if a later one fails.
            blocks.push(ShmBlock::create(d)?);
        }
        Ok(Self {
            layout: layout.clone(),
            blocks,
        })
    }

    /// Attach to every block named in `descs`. All must open or none stay mapped.
    pub fn attach(descs: &[BlockDesc]) -> Result<Self, ShmError> {
        let layout = RegionLayout::from_descs(descs)
            .ok_or_else(|| ShmError::Layout("descriptors do not form a region".into()))?;
        let blocks = descs
            .iter()
            .cloned()
            .map(ShmBlock::attach)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { layout, blocks })
    }

    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// The `(name, shape, dtype)` triples to hand to workers.
    pub fn descs(&self) -> Vec<BlockDesc> {
        self.blocks.iter().map(|b| b.desc().clone()).collect()
    }

    pub fn is_owner(&self) -> bool {
        self.blocks.first().is_some_and(|b| b.is_owner())
    }

    fn n_obs(&self) -> usize {
        self.layout.obs.len()
    }

    fn find(&self, label: &str) -> Result<usize, ShmError> {
        self.blocks
            .iter()
            .position(|b| b.desc().label == label)
            .ok_or_else(|| ShmError::Layout(format!("no block labelled {label}")))
    }

    pub fn block<T: Element>(&self, label: &str) -> Result<&[T], ShmError> {
        self.blocks[self.find(label)?].as_slice::<T>()
    }

    pub fn block_mut<T: Element>(&mut self, label: &str) -> Result<&mut [T], ShmError> {
        let i = self.find(label)?;
        self.blocks[i].as_mut_slice::<T>()
    }

    /// Observation rows `rows` of component `component`.
    pub fn obs_rows<T: Element>(&self, component: usize, rows: Range<usize>) -> Result<&[T], ShmError> {
        self.obs_block(component)?.rows::<T>(rows)
    }

    pub fn obs_block(&self, component: usize) -> Result<&ShmBlock, ShmError> {
        if component >= self.n_obs() {
            return Err(ShmError::Layout(format!("no observation component {component}")));
        }
        Ok(&self.blocks[component])
    }

    /// One row view per observation component, for a single environment.
    pub fn obs_rows_mut(&mut self, env: usize) -> Result<Vec<RowMut<'_>>, ShmError> {
        let n = self.n_obs();
        self.blocks[..n]
            .iter_mut()
            .map(|b| b.row_mut_dyn(env))
            .collect()
    }

    fn cell(&self, env: usize, t: usize) -> Result<usize, ShmError> {
        if env >= self.layout.total_envs || t >= self.layout.window {
            return Err(ShmError::Rows {
                name: format!("step cell (env {env}, t {t})"),
                start: env,
                end: env + 1,
                rows: self.layout.total_envs,
            });
        }
        Ok(env * self.layout.window + t)
    }

    /// Record the reward vector and termination flags of `env` at timestep `t`.
    pub fn write_step(
        &mut self,
        env: usize,
        t: usize,
        reward: [f32; REWARD_CHANNELS],
        flags: [u8; FLAG_CHANNELS],
    ) -> Result<(), ShmError> {
        let cell = self.cell(env, t)?;
        let n = self.n_obs();
        let r = self.blocks[n].as_mut_slice::<f32>()?;
        r[cell * REWARD_CHANNELS..(cell + 1) * REWARD_CHANNELS].copy_from_slice(&reward);
        let f = self.blocks[n + 1].as_mut_slice::<u8>()?;
        f[cell * FLAG_CHANNELS..(cell + 1) * FLAG_CHANNELS].copy_from_slice(&flags);
        Ok(())
    }

    pub fn reward_at(&self, env: usize, t: usize) -> Result<[f32; REWARD_CHANNELS], ShmError> {
        let cell = self.cell(env, t)?;
        let r = self.rewards()?;
        let mut out = [0.0; REWARD_CHANNELS];
        out.copy_from_slice(&r[cell * REWARD_CHANNELS..(cell + 1) * REWARD_CHANNELS]);
        Ok(out)
    }

    pub fn flags_at(&self, env: usize, t: usize) -> Result<[u8; FLAG_CHANNELS], ShmError> {
        let cell = self.cell(env, t)?;
        let f = self.flags()?;
        Ok([f[cell * FLAG_CHANNELS], f[cell * FLAG_CHANNELS + 1]])
    }

    /// Whole reward block, `(total_envs, window, 4)` row-major.
    pub fn rewards(&self) -> Result<&[f32], ShmError> {
        self.blocks[self.n_obs()].as_slice::<f32>()
    }

    /// Whole flag block, `(total_envs, window, 2)` row-major.
    pub fn flags(&self) -> Result<&[u8], ShmError> {
        self.blocks[self.n_obs() + 1].as_slice::<u8>()
    }

    /// Unmap every block; the creating side also unlinks the names.
    pub fn release(&mut self) -> Result<(), ShmError> {
        let mut first_err = None;
        for b in &mut self.blocks {
            if let Err(e) = b.release() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
