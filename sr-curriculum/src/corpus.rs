//! Append-only board corpus shared by every worker of a run.
//!
//! Records are 26 bytes: a 25-byte packed board, then `piece | level << 3`. The next unread
//! record index lives in `<file>.offset` (decimal, newline-terminated) and is advanced under an
//! exclusive `flock` on `<file>.lock`, so each record is handed out once across processes.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use rand::Rng;
use sr_core::{Board, BOARD_BYTES, BOARD_COLS, BOARD_ROWS};
use thiserror::Error;

pub const RECORD_LEN: usize = BOARD_BYTES + 1;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: nix::errno::Errno,
    },
    #[error("malformed offset file {path}: {contents:?}")]
    BadOffset { path: PathBuf, contents: String },
    #[error("piece {piece} or level {level} does not fit a record")]
    BadRecord { piece: u8, level: u8 },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CorpusError + '_ {
    move |source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One stored starting position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusRecord {
    pub board: Board,
    /// Current piece, 3 bits.
    pub piece: u8,
    /// Difficulty level, 5 bits.
    pub level: u8,
}

impl CorpusRecord {
    pub fn pack(&self) -> Result<[u8; RECORD_LEN], CorpusError> {
        if self.piece > 7 || self.level > 31 {
            return Err(CorpusError::BadRecord {
                piece: self.piece,
                level: self.level,
            });
        }
        let mut out = [0u8; RECORD_LEN];
        out[..BOARD_BYTES].copy_from_slice(self.board.as_bytes());
        out[BOARD_BYTES] = self.piece | self.level << 3;
        Ok(out)
    }

    /// A playable random record: no full rows, an even occupied-cell count, a real piece and
    /// a level the curriculum accepts.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut board = Board::EMPTY;
        let height = rng.gen_range(0..=8usize);
        for row in BOARD_ROWS - height..BOARD_ROWS {
            let hole = rng.gen_range(0..BOARD_COLS);
            for col in 0..BOARD_COLS {
                if col != hole && rng.gen_bool(0.6) {
                    board.set_filled(row, col, true);
                }
            }
        }
        if board.occupied_cells() % 2 == 1 {
            let first = (0..BOARD_ROWS * BOARD_COLS)
                .map(|i| (i / BOARD_COLS, i % BOARD_COLS))
                .find(|&(r, c)| board.is_filled(r, c));
            if let Some((row, col)) = first {
                board.set_filled(row, col, false);
            }
        }
        Self {
            board,
            piece: rng.gen_range(0..7),
            level: rng.gen_range(0..4),
        }
    }

    pub fn unpack(bytes: &[u8; RECORD_LEN]) -> Self {
        let mut board = [0u8; BOARD_BYTES];
        board.copy_from_slice(&bytes[..BOARD_BYTES]);
        let tag = bytes[BOARD_BYTES];
        Self {
            board: Board::from_bytes(board),
            piece: tag & 7,
            level: tag >> 3,
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

pub fn offset_path(corpus: &Path) -> PathBuf {
    sibling(corpus, ".offset")
}

pub fn lock_path(corpus: &Path) -> PathBuf {
    sibling(corpus, ".lock")
}

/// Exclusive advisory lock on `<corpus>.lock`, released on drop.
fn lock(corpus: &Path) -> Result<Flock<File>, CorpusError> {
    let path = lock_path(corpus);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(io_err(&path))?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, source)| CorpusError::Lock { path, source })
}

/// Persisted offset, 0 if no offset file exists yet.
pub fn read_offset(corpus: &Path) -> Result<u64, CorpusError> {
    let path = offset_path(corpus);
    let contents = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_err(&path)(e)),
    };
    contents
        .trim()
        .parse()
        .map_err(|_| CorpusError::BadOffset { path, contents })
}

fn write_offset(corpus: &Path, offset: u64) -> Result<(), CorpusError> {
    let path = offset_path(corpus);
    let tmp = sibling(&path, ".tmp");
    fs::write(&tmp, format!("{offset}\n")).map_err(io_err(&tmp))?;
    fs::rename(&tmp, &path).map_err(io_err(&path))
}

/// Number of whole records in the corpus file.
pub fn record_count(corpus: &Path) -> Result<u64, CorpusError> {
    let len = fs::metadata(corpus).map_err(io_err(corpus))?.len();
    Ok(len / RECORD_LEN as u64)
}

/// Hands out corpus records in file order, `chunk_records` per locked transaction.
#[derive(Debug, Clone)]
pub struct CorpusReader {
    path: PathBuf,
    chunk_records: usize,
}

impl CorpusReader {
    pub fn new(path: impl Into<PathBuf>, chunk_records: usize) -> Self {
        Self {
            path: path.into(),
            chunk_records: chunk_records.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim the next chunk. An empty result means the corpus is exhausted; the offset is
    /// left where it is.
    pub fn read_chunk(&self) -> Result<Vec<CorpusRecord>, CorpusError> {
        let _guard = lock(&self.path)?;
        let offset = read_offset(&self.path)?;

        let mut file = File::open(&self.path).map_err(io_err(&self.path))?;
        file.seek(SeekFrom::Start(offset * RECORD_LEN as u64))
            .map_err(io_err(&self.path))?;
        let mut data = Vec::with_capacity(self.chunk_records * RECORD_LEN);
        file.take((self.chunk_records * RECORD_LEN) as u64)
            .read_to_end(&mut data)
            .map_err(io_err(&self.path))?;

        let records: Vec<CorpusRecord> = data
            .chunks_exact(RECORD_LEN)
            .map(|c| {
                let mut rec = [0u8; RECORD_LEN];
                rec.copy_from_slice(c);
                CorpusRecord::unpack(&rec)
            })
            .collect();
        if !records.is_empty() {
            write_offset(&self.path, offset + records.len() as u64)?;
        }
        log::debug!(
            "corpus {}: claimed {} records at offset {}",
            self.path.display(),
            records.len(),
            offset
        );
        Ok(records)
    }
}

/// Append records under the corpus lock.
pub fn append_records(corpus: &Path, records: &[CorpusRecord]) -> Result<(), CorpusError> {
    let _guard = lock(corpus)?;
    let mut buf = Vec::with_capacity(records.len() * RECORD_LEN);
    for r in records {
        buf.extend_from_slice(&r.pack()?);
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(corpus)
        .map_err(io_err(corpus))?;
    f.write_all(&buf).map_err(io_err(corpus))?;
    f.flush().map_err(io_err(corpus))
}
