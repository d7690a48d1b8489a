//! The worker command loop.

use std::io::{Read, Write};

use sr_core::WorkerSlot;
use sr_curriculum::CurriculumManager;
use sr_proto::{read_command, read_init, write_reply, Command, MsgKind, Reply, WorkerInit};
use sr_shm::SharedRegion;
use sr_sim::{derive_seed, kernel_by_name};

use crate::game::GameEnv;
use crate::WorkerError;

/// Seed index reserved for the curriculum RNG; environments use `0..n`.
pub const CURRICULUM_SEED_INDEX: u64 = 12345;

/// A worker's owned state: its environments, its curriculum and its view of the region.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    slot: WorkerSlot,
    envs: Vec<GameEnv>,
    manager: CurriculumManager,
    region: SharedRegion,
    last_command: Option<MsgKind>,
    epoch: u32,
}

impl Worker {
    /// Attach every shared block and build the slot's environments.
    pub fn from_init(init: &WorkerInit) -> Result<Self, WorkerError> {
        let region = SharedRegion::attach(&init.blocks)?;
        let layout = region.layout();
        if init.slot.end > layout.total_envs || init.slot.start > init.slot.end {
            return Err(WorkerError::SlotOutOfRange {
                start: init.slot.start,
                end: init.slot.end,
                total: layout.total_envs,
            });
        }
        let mut envs = Vec::with_capacity(init.slot.len());
        for i in 0..init.slot.len() {
            let kernel = kernel_by_name(&init.kernel, derive_seed(init.seed, i as u64))?;
            if kernel.obs_spec() != layout.obs {
                return Err(WorkerError::ObsMismatch {
                    kernel: init.kernel.clone(),
                });
            }
            envs.push(GameEnv::new(kernel));
        }
        let manager = CurriculumManager::new(
            init.board_file.clone(),
            init.chunk_records as usize,
            derive_seed(init.seed, CURRICULUM_SEED_INDEX),
        );
        Ok(Self {
            index: init.worker,
            slot: init.slot,
            envs,
            manager,
            region,
            last_command: None,
            epoch: 0,
        })
    }

    pub fn slot(&self) -> WorkerSlot {
        self.slot
    }

    pub fn manager(&self) -> &CurriculumManager {
        &self.manager
    }

    pub fn envs(&self) -> &[GameEnv] {
        &self.envs
    }

    fn write_obs(&mut self, local: usize) -> Result<(), WorkerError> {
        let mut rows = self.region.obs_rows_mut(self.slot.start + local)?;
        self.envs[local].write_observation(&mut rows)?;
        Ok(())
    }

    /// Execute one command. Returns the reply to send, if the command has one.
    pub fn handle(&mut self, cmd: Command) -> Result<Option<Reply>, WorkerError> {
        self.last_command = Some(cmd.kind());
        match cmd {
            Command::Reset => {
                for i in 0..self.envs.len() {
                    self.envs[i].reset(&mut self.manager)?;
                    self.write_obs(i)?;
                }
                Ok(Some(Reply::Ack))
            }
            Command::Step { t, actions, epoch } => {
                if actions.len() != self.envs.len() {
                    return Err(WorkerError::ActionCount {
                        got: actions.len(),
                        expected: self.envs.len(),
                    });
                }
                let window = self.region.layout().window;
                if t as usize >= window {
                    return Err(WorkerError::Timestep { t, window });
                }
                self.epoch = epoch;
                let mut finished = Vec::new();
                for (i, &a) in actions.iter().enumerate() {
                    let out = self.envs[i].step(a, &mut self.manager)?;
                    self.write_obs(i)?;
                    self.region
                        .write_step(self.slot.start + i, t as usize, out.reward, out.flags)?;
                    finished.extend(out.finished);
                }
                Ok(Some(Reply::Episodes(finished)))
            }
            Command::SetParam(p) => {
                self.manager.update_params(&p);
                log::debug!("worker {} params {:?}", self.index, self.manager.params());
                Ok(None)
            }
            Command::Close => Ok(None),
        }
    }

    /// Serve commands until `Close`, then detach from the region.
    pub fn run<R: Read, W: Write>(mut self, r: &mut R, w: &mut W) -> Result<(), WorkerError> {
        let result = self.serve(r, w);
        if let Err(e) = &result {
            log::error!(
                "worker {} (slot {}..{}, epoch {}) failed after {:?}: {}",
                self.index,
                self.slot.start,
                self.slot.end,
                self.epoch,
                self.last_command,
                e
            );
        }
        let released = self.region.release();
        result?;
        Ok(released?)
    }

    fn serve<R: Read, W: Write>(&mut self, r: &mut R, w: &mut W) -> Result<(), WorkerError> {
        loop {
            let cmd = read_command(r)?;
            let close = cmd == Command::Close;
            if let Some(reply) = self.handle(cmd)? {
                write_reply(w, &reply)?;
            }
            if close {
                log::debug!("worker {} closing", self.index);
                return Ok(());
            }
        }
    }
}

/// Worker entry point: read the spawn handshake, then serve commands until `Close`.
pub fn run_worker<R: Read, W: Write>(r: &mut R, w: &mut W) -> Result<(), WorkerError> {
    let init = read_init(r)?;
    let worker = match Worker::from_init(&init) {
        Ok(worker) => worker,
        Err(e) => {
            log::error!("worker {} failed to start: {}", init.worker, e);
            return Err(e);
        }
    };
    log::debug!(
        "worker {} attached, slot {}..{}",
        init.worker,
        init.slot.start,
        init.slot.end
    );
    worker.run(r, w)
}
