//! Binary codec for protocol v1 (payload inside a length-delimited frame).
//!
//! Header: u32 version, u8 kind, u8 flags, u16 reserved. Integers and floats little-endian.

use std::io::{Read, Write};

use sr_core::{EpisodeRecord, GameParams};
use thiserror::Error;

use crate::frame::{read_frame, write_frame, FrameError};
use crate::protocol::{Command, MsgKind, Reply, WorkerInit, PROTOCOL_VERSION};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload too short")]
    TooShort,
    #[error("unsupported protocol version: {0}")]
    BadVersion(u32),
    #[error("unexpected message kind: {0}")]
    BadKind(u8),
    #[error("{0} trailing bytes after message")]
    Trailing(usize),
    #[error("invalid worker init: {0}")]
    Init(#[from] serde_json::Error),
}

/// Framing or decoding failure on a protocol channel.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
}

impl ProtoError {
    /// The peer went away (cleanly or mid-frame).
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtoError::Frame(FrameError::Closed | FrameError::UnexpectedEof) => true,
            ProtoError::Frame(FrameError::Io(e)) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

const HEADER_LEN: usize = 8;
const RECORD_LEN: usize = 1 + 8 + 8 + 4 + 4;

fn header(out: &mut Vec<u8>, kind: MsgKind) {
    out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    out.push(kind as u8);
    out.push(0); // flags
    out.extend_from_slice(&[0, 0]); // reserved
}

fn read_header(c: &mut Cursor<'_>) -> Result<u8, DecodeError> {
    let version = c.read_u32()?;
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::BadVersion(version));
    }
    let kind = c.read_u8()?;
    let _flags = c.read_u8()?;
    c.skip(2)?;
    Ok(kind)
}

pub fn encode_command(cmd: &Command) -> Vec<u8> {
    let mut out = Vec::new();
    encode_command_into(&mut out, cmd);
    out
}

/// Encode into a reused buffer (the step path sends one per worker per timestep).
pub fn encode_command_into(out: &mut Vec<u8>, cmd: &Command) {
    out.clear();
    header(out, cmd.kind());
    match cmd {
        Command::Reset | Command::Close => {}
        Command::Step { t, actions, epoch } => {
            out.reserve(12 + actions.len() * 4);
            out.extend_from_slice(&t.to_le_bytes());
            out.extend_from_slice(&epoch.to_le_bytes());
            out.extend_from_slice(&(actions.len() as u32).to_le_bytes());
            for &a in actions {
                out.extend_from_slice(&a.to_le_bytes());
            }
        }
        Command::SetParam(p) => {
            out.extend_from_slice(&p.burn_over_multiplier.to_le_bytes());
            out.extend_from_slice(&p.board_ratio.to_le_bytes());
            out.extend_from_slice(&p.short_ratio.to_le_bytes());
        }
    }
}

pub fn decode_command(bytes: &[u8]) -> Result<Command, DecodeError> {
    let mut c = Cursor::new(bytes);
    let kind = read_header(&mut c)?;
    let cmd = match MsgKind::from_u8(kind) {
        Some(MsgKind::Reset) => Command::Reset,
        Some(MsgKind::Close) => Command::Close,
        Some(MsgKind::Step) => {
            let t = c.read_u32()?;
            let epoch = c.read_u32()?;
            let n = c.read_u32()? as usize;
            if c.remaining() < n * 4 {
                return Err(DecodeError::TooShort);
            }
            let mut actions = Vec::with_capacity(n);
            for _ in 0..n {
                actions.push(c.read_u32()?);
            }
            Command::Step { t, actions, epoch }
        }
        Some(MsgKind::SetParam) => Command::SetParam(GameParams {
            burn_over_multiplier: c.read_f64()?,
            board_ratio: c.read_f64()?,
            short_ratio: c.read_f64()?,
        }),
        _ => return Err(DecodeError::BadKind(kind)),
    };
    c.finish()?;
    Ok(cmd)
}

pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    match reply {
        Reply::Ack => header(&mut out, MsgKind::Ack),
        Reply::Episodes(records) => {
            out.reserve(4 + records.len() * RECORD_LEN);
            header(&mut out, MsgKind::Episodes);
            out.extend_from_slice(&(records.len() as u32).to_le_bytes());
            for r in records {
                out.push(r.is_short as u8 | (r.is_over as u8) << 1);
                out.extend_from_slice(&r.reward.to_le_bytes());
                out.extend_from_slice(&r.score.to_le_bytes());
                out.extend_from_slice(&r.lines.to_le_bytes());
                out.extend_from_slice(&r.pieces.to_le_bytes());
            }
        }
    }
    out
}

pub fn decode_reply(bytes: &[u8]) -> Result<Reply, DecodeError> {
    let mut c = Cursor::new(bytes);
    let kind = read_header(&mut c)?;
    let reply = match MsgKind::from_u8(kind) {
        Some(MsgKind::Ack) => Reply::Ack,
        Some(MsgKind::Episodes) => {
            let n = c.read_u32()? as usize;
            if c.remaining() < n * RECORD_LEN {
                return Err(DecodeError::TooShort);
            }
            let mut records = Vec::with_capacity(n);
            for _ in 0..n {
                let flags = c.read_u8()?;
                records.push(EpisodeRecord {
                    is_short: flags & 1 != 0,
                    is_over: flags & 2 != 0,
                    reward: c.read_f64()?,
                    score: c.read_u64()?,
                    lines: c.read_u32()?,
                    pieces: c.read_u32()?,
                });
            }
            Reply::Episodes(records)
        }
        _ => return Err(DecodeError::BadKind(kind)),
    };
    c.finish()?;
    Ok(reply)
}

pub fn encode_init(init: &WorkerInit) -> Result<Vec<u8>, DecodeError> {
    Ok(serde_json::to_vec(init)?)
}

pub fn decode_init(bytes: &[u8]) -> Result<WorkerInit, DecodeError> {
    let init: WorkerInit = serde_json::from_slice(bytes)?;
    if init.protocol_version != PROTOCOL_VERSION {
        return Err(DecodeError::BadVersion(init.protocol_version));
    }
    Ok(init)
}

pub fn write_command<W: Write>(w: &mut W, cmd: &Command) -> Result<(), ProtoError> {
    Ok(write_frame(w, &encode_command(cmd))?)
}

/// `write_command` encoding into `buf`, which keeps its capacity across calls.
pub fn write_command_buf<W: Write>(
    w: &mut W,
    cmd: &Command,
    buf: &mut Vec<u8>,
) -> Result<(), ProtoError> {
    encode_command_into(buf, cmd);
    Ok(write_frame(w, buf)?)
}

pub fn read_command<R: Read>(r: &mut R) -> Result<Command, ProtoError> {
    Ok(decode_command(&read_frame(r)?)?)
}

pub fn write_reply<W: Write>(w: &mut W, reply: &Reply) -> Result<(), ProtoError> {
    Ok(write_frame(w, &encode_reply(reply))?)
}

pub fn read_reply<R: Read>(r: &mut R) -> Result<Reply, ProtoError> {
    Ok(decode_reply(&read_frame(r)?)?)
}

pub fn write_init<W: Write>(w: &mut W, init: &WorkerInit) -> Result<(), ProtoError> {
    Ok(write_frame(w, &encode_init(init)?)?)
}

pub fn read_init<R: Read>(r: &mut R) -> Result<WorkerInit, ProtoError> {
    Ok(decode_init(&read_frame(r)?)?)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    off: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, off: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.off
    }

    fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::Trailing(n)),
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if self.off + N > self.bytes.len() {
            return Err(DecodeError::TooShort);
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.off..self.off + N]);
        self.off += N;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        if self.off + n > self.bytes.len() {
            return Err(DecodeError::TooShort);
        }
        self.off += n;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take()?))
    }
}
