//! Command protocol v1 between the coordinator and its workers.
//!
//! Every message travels inside one frame. The spawn-time [`WorkerInit`] is JSON; the hot-path
//! [`Command`]/[`Reply`] messages use the binary codec.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sr_core::{EpisodeRecord, GameParams, WorkerSlot};
use sr_shm::BlockDesc;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    Reset = 1,
    Step = 2,
    SetParam = 3,
    Close = 4,
    Ack = 16,
    Episodes = 17,
}

impl MsgKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            1 => MsgKind::Reset,
            2 => MsgKind::Step,
            3 => MsgKind::SetParam,
            4 => MsgKind::Close,
            16 => MsgKind::Ack,
            17 => MsgKind::Episodes,
            _ => return None,
        })
    }
}

/// Coordinator -> worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Reset every owned simulation. Replied with `Ack`.
    Reset,
    /// Advance every owned simulation once. `actions` is indexed by local environment.
    /// Replied with `Episodes`.
    Step {
        t: u32,
        actions: Vec<u32>,
        epoch: u32,
    },
    /// New curriculum ratios. No reply.
    SetParam(GameParams),
    /// Release resources and exit. No reply; the channel closes.
    Close,
}

impl Command {
    pub fn kind(&self) -> MsgKind {
        match self {
            Command::Reset => MsgKind::Reset,
            Command::Step { .. } => MsgKind::Step,
            Command::SetParam(_) => MsgKind::SetParam,
            Command::Close => MsgKind::Close,
        }
    }
}

/// Worker -> coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    /// Episodes that finished during the step, in local environment order.
    Episodes(Vec<EpisodeRecord>),
}

/// Everything a worker needs before entering its command loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInit {
    pub protocol_version: u32,
    pub worker: usize,
    pub slot: WorkerSlot,
    /// Worker base seed; per-environment seeds derive from it.
    pub seed: u64,
    pub kernel: String,
    pub board_file: Option<PathBuf>,
    pub chunk_records: u32,
    /// `(name, shape, dtype)` of every shared block, in region order.
    pub blocks: Vec<BlockDesc>,
}
