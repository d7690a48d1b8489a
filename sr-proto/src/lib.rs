//! sr-proto: the coordinator <-> worker channel.
//!
//! One duplex byte stream per worker (child stdin/stdout, or a socket pair for in-process
//! workers) carrying length-delimited frames.

pub mod codec;
pub mod frame;
pub mod protocol;

pub use codec::{
    read_command, read_init, read_reply, write_command, write_command_buf, write_init,
    write_reply, DecodeError, ProtoError,
};
pub use frame::FrameError;
pub use protocol::{Command, MsgKind, Reply, WorkerInit, PROTOCOL_VERSION};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
