//! Length-delimited framing (u32 little-endian length prefix).

use std::io::{Read, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large: {len} > {max}")]
    TooLarge { len: u32, max: u32 },
    /// Peer closed the channel between frames.
    #[error("channel closed")]
    Closed,
    #[error("unexpected EOF while reading frame")]
    UnexpectedEof,
}

pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024; // 64 MiB guardrail

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len: u32 = payload.len().try_into().map_err(|_| FrameError::TooLarge {
        len: u32::MAX,
        max: MAX_FRAME_LEN,
    })?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_bytes = [0u8; 4];
    match read_exact_or_eof(r, &mut len_bytes)? {
        0 => return Err(FrameError::Closed),
        4 => {}
        _ => return Err(FrameError::UnexpectedEof),
    }
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len as usize];
    if read_exact_or_eof(r, &mut payload)? != payload.len() {
        return Err(FrameError::UnexpectedEof);
    }
    Ok(payload)
}

/// Fill `buf`, returning fewer bytes only at EOF.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, FrameError> {
    let mut off = 0usize;
    while off < buf.len() {
        match r.read(&mut buf[off..]) {
            Ok(0) => break,
            Ok(n) => off += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(off)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_eof_is_closed() {
        let mut empty: &[u8] = &[];
        assert!(matches!(read_frame(&mut empty), Err(FrameError::Closed)));
    }

    #[test]
    fn truncated_frame_is_unexpected_eof() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        let mut short: &[u8] = &buf[..6];
        assert!(matches!(
            read_frame(&mut short),
            Err(FrameError::UnexpectedEof)
        ));
        let mut partial_len: &[u8] = &buf[..2];
        assert!(matches!(
            read_frame(&mut partial_len),
            Err(FrameError::UnexpectedEof)
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let bytes = (MAX_FRAME_LEN + 1).to_le_bytes();
        let mut r: &[u8] = &bytes;
        assert!(matches!(read_frame(&mut r), Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn frames_are_read_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"a").unwrap();
        write_frame(&mut buf, b"").unwrap();
        write_frame(&mut buf, b"bc").unwrap();
        let mut r: &[u8] = &buf;
        assert_eq!(read_frame(&mut r).unwrap(), b"a");
        assert_eq!(read_frame(&mut r).unwrap(), b"");
        assert_eq!(read_frame(&mut r).unwrap(), b"bc");
        assert!(matches!(read_frame(&mut r), Err(FrameError::Closed)));
    }
}
