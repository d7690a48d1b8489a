//! One named shared-memory segment mapped into this process.

use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::ptr::NonNull;

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shm_open({name}) failed: {source}")]
    Open {
        name: String,
        source: nix::errno::Errno,
    },
    #[error("mmap({name}) failed: {source}")]
    Map {
        name: String,
        source: nix::errno::Errno,
    },
    #[error("munmap/unlink({name}) failed: {source}")]
    Release {
        name: String,
        source: nix::errno::Errno,
    },
    #[error("io error on {name}: {source}")]
    Io {
        name: String,
        source: std::io::Error,
    },
    #[error("segment {name} is {got} bytes, expected at least {expected}")]
    Size {
        name: String,
        got: u64,
        expected: usize,
    },
    #[error("block {name} has dtype {actual:?}, requested {requested:?}")]
    Dtype {
        name: String,
        actual: Dtype,
        requested: Dtype,
    },
    #[error("rows {start}..{end} out of bounds for block {name} with {rows} rows")]
    Rows {
        name: String,
        start: usize,
        end: usize,
        rows: usize,
    },
    #[error("region layout mismatch: {0}")]
    Layout(String),
}

/// Element type of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    F32,
    I32,
    U8,
}

impl Dtype {
    pub fn size(self) -> usize {
        match self {
            Dtype::F32 | Dtype::I32 => 4,
            Dtype::U8 => 1,
        }
    }
}

/// Rust element types that may view a block.
pub trait Element: bytemuck::Pod {
    const DTYPE: Dtype;
}

impl Element for f32 {
    const DTYPE: Dtype = Dtype::F32;
}

impl Element for i32 {
    const DTYPE: Dtype = Dtype::I32;
}

impl Element for u8 {
    const DTYPE: Dtype = Dtype::U8;
}

/// The `(name, shape, dtype)` triple handed to workers at spawn time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDesc {
    /// OS-level segment name (leading `/`).
    pub name: String,
    /// Logical component name, e.g. `board` or `rewards`.
    pub label: String,
    /// Full shape; dimension 0 is the environment row.
    pub shape: Vec<usize>,
    pub dtype: Dtype,
}

impl BlockDesc {
    pub fn elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.elements() * self.dtype.size()
    }

    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Elements per environment row.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }
}

/// Mutable typed view of one environment row, used to write observations.
#[derive(Debug)]
pub enum RowMut<'a> {
    F32(&'a mut [f32]),
    I32(&'a mut [i32]),
    U8(&'a mut [u8]),
}

impl RowMut<'_> {
    pub fn len(&self) -> usize {
        match self {
            RowMut::F32(s) => s.len(),
            RowMut::I32(s) => s.len(),
            RowMut::U8(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            RowMut::F32(_) => Dtype::F32,
            RowMut::I32(_) => Dtype::I32,
            RowMut::U8(_) => Dtype::U8,
        }
    }
}

/// A mapped segment. The creating side owns the name and unlinks it on release.
pub struct ShmBlock {
    desc: BlockDesc,
    ptr: NonNull<c_void>,
    map_len: usize,
    owner: bool,
    released: bool,
}

// The mapping is plain memory; exclusive access is enforced through `&mut self`.
unsafe impl Send for ShmBlock {}

impl ShmBlock {
    /// Create a fresh zero-filled segment. Fails if the name already exists.
    pub fn create(desc: BlockDesc) -> Result<Self, ShmError> {
        let fd = shm_open(
            desc.name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|source| ShmError::Open {
            name: desc.name.clone(),
            source,
        })?;
        let file = File::from(fd);
        let map_len = desc.byte_len().max(1);
        if let Err(source) = file.set_len(map_len as u64) {
            let _ = shm_unlink(desc.name.as_str());
            return Err(ShmError::Io {
                name: desc.name.clone(),
                source,
            });
        }
        match Self::map(&desc, &file, map_len) {
            Ok(ptr) => Ok(Self {
                desc,
                ptr,
                map_len,
                owner: true,
                released: false,
            }),
            Err(e) => {
                let _ = shm_unlink(desc.name.as_str());
                Err(e)
            }
        }
    }

    /// Attach to a segment created by another process.
    pub fn attach(desc: BlockDesc) -> Result<Self, ShmError> {
        let fd = shm_open(desc.name.as_str(), OFlag::O_RDWR, Mode::empty()).map_err(|source| {
            ShmError::Open {
                name: desc.name.clone(),
                source,
            }
        })?;
        let file = File::from(fd);
        let got = file
            .metadata()
            .map_err(|source| ShmError::Io {
                name: desc.name.clone(),
                source,
            })?
            .len();
        if (got as usize) < desc.byte_len() {
            return Err(ShmError::Size {
                name: desc.name.clone(),
                got,
                expected: desc.byte_len(),
            });
        }
        let map_len = desc.byte_len().max(1);
        let ptr = Self::map(&desc, &file, map_len)?;
        Ok(Self {
            desc,
            ptr,
            map_len,
            owner: false,
            released: false,
        })
    }

    fn map(desc: &BlockDesc, file: &File, map_len: usize) -> Result<NonNull<c_void>, ShmError> {
        let len = NonZeroUsize::new(map_len).ok_or_else(|| ShmError::Layout("zero map".into()))?;
        // SAFETY: fresh shared mapping of a file we hold open; no existing Rust references.
        unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                0,
            )
        }
        .map_err(|source| ShmError::Map {
            name: desc.name.clone(),
            source,
        })
    }

    pub fn desc(&self) -> &BlockDesc {
        &self.desc
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the mapping is at least byte_len long and lives until release().
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.desc.byte_len()) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; &mut self gives exclusive access within this process.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.desc.byte_len()) }
    }

    fn check<T: Element>(&self) -> Result<(), ShmError> {
        if T::DTYPE != self.desc.dtype {
            return Err(ShmError::Dtype {
                name: self.desc.label.clone(),
                actual: self.desc.dtype,
                requested: T::DTYPE,
            });
        }
        Ok(())
    }

    pub fn as_slice<T: Element>(&self) -> Result<&[T], ShmError> {
        self.check::<T>()?;
        Ok(bytemuck::cast_slice(self.bytes()))
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T], ShmError> {
        self.check::<T>()?;
        Ok(bytemuck::cast_slice_mut(self.bytes_mut()))
    }

    fn row_bounds(&self, rows: &Range<usize>) -> Result<Range<usize>, ShmError> {
        if rows.start > rows.end || rows.end > self.desc.rows() {
            return Err(ShmError::Rows {
                name: self.desc.label.clone(),
                start: rows.start,
                end: rows.end,
                rows: self.desc.rows(),
            });
        }
        let w = self.desc.row_len();
        Ok(rows.start * w..rows.end * w)
    }

    pub fn rows<T: Element>(&self, rows: Range<usize>) -> Result<&[T], ShmError> {
        let r = self.row_bounds(&rows)?;
        Ok(&self.as_slice::<T>()?[r])
    }

    pub fn rows_mut<T: Element>(&mut self, rows: Range<usize>) -> Result<&mut [T], ShmError> {
        let r = self.row_bounds(&rows)?;
        Ok(&mut self.as_mut_slice::<T>()?[r])
    }

    /// One environment row viewed with the block's own dtype.
    pub fn row_mut_dyn(&mut self, row: usize) -> Result<RowMut<'_>, ShmError> {
        Ok(match self.desc.dtype {
            Dtype::F32 => RowMut::F32(self.rows_mut::<f32>(row..row + 1)?),
            Dtype::I32 => RowMut::I32(self.rows_mut::<i32>(row..row + 1)?),
            Dtype::U8 => RowMut::U8(self.rows_mut::<u8>(row..row + 1)?),
        })
    }

    /// Unmap; the owner also unlinks the name. Idempotent.
    pub fn release(&mut self) -> Result<(), ShmError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        // SAFETY: ptr/map_len come from a successful mmap and are unmapped exactly once.
        unsafe { munmap(self.ptr, self.map_len) }.map_err(|source| ShmError::Release {
            name: self.desc.name.clone(),
            source,
        })?;
        if self.owner {
            shm_unlink(self.desc.name.as_str()).map_err(|source| ShmError::Release {
                name: self.desc.name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl Drop for ShmBlock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl std::fmt::Debug for ShmBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmBlock")
            .field("desc", &self.desc)
            .field("owner", &self.owner)
            .field("released", &self.released)
            .finish()
    }
}
