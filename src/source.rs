//! Byte sources: positioned, seekable byte stores that atoms load from and commit to.
//!
//! Every source keeps its own cursor. Callers always `seek` before `consume`/`store`, so two
//! atoms sharing a source never depend on where the other one left the cursor.
//!
//! | Source | Bounded | Writable |
//! |--------|---------|----------|
//! | [`BytesSource`] | yes | yes (grows on write past the end) |
//! | [`FileSource`] | yes | when opened read-write |
//! | [`ProxySource`] | yes (its window) | if the parent is |
//! | [`EmptySource`] | yes (zero bytes) | no |
//! | [`ProcessMemorySource`] | no | when opened read-write (Linux only) |

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("seek to {offset:#x} past the end of the source ({size:#x})")]
    OutOfBounds { offset: u64, size: u64 },
    #[error("consumed {got:#x} of {desired:#x} bytes at {offset:#x}")]
    Consume { offset: u64, desired: u64, got: u64 },
    #[error("stored {written:#x} of {desired:#x} bytes at {offset:#x}")]
    Store {
        offset: u64,
        desired: u64,
        written: u64,
    },
    #[error("source is read-only")]
    ReadOnly,
    #[error("source lock poisoned")]
    Poisoned,
}

/// A positioned byte store.
///
/// `consume` returns exactly `amount` bytes or fails with [`SourceError::Consume`] reporting
/// how many bytes were actually available. `size` is `None` for unbounded sources.
pub trait Source {
    /// Move the cursor to `offset`, returning the previous position.
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError>;
    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError>;
    /// Write `data` at the cursor, returning the number of bytes written.
    fn store(&mut self, data: &[u8]) -> Result<u64, SourceError>;
    fn size(&self) -> Option<u64>;
}

/// A source shared between a tree, its proxies and user code.
pub type SharedSource = Arc<Mutex<dyn Source + Send>>;

pub fn shared<S: Source + Send + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(source))
}

impl<S: Source + ?Sized> Source for &mut S {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        (**self).seek(offset)
    }
    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        (**self).consume(amount)
    }
    fn store(&mut self, data: &[u8]) -> Result<u64, SourceError> {
        (**self).store(data)
    }
    fn size(&self) -> Option<u64> {
        (**self).size()
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        (**self).seek(offset)
    }
    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        (**self).consume(amount)
    }
    fn store(&mut self, data: &[u8]) -> Result<u64, SourceError> {
        (**self).store(data)
    }
    fn size(&self) -> Option<u64> {
        (**self).size()
    }
}

/// Slice `data[offset..offset + amount]`, or report how much was there.
fn take(data: &[u8], offset: u64, amount: u64) -> Result<Vec<u8>, SourceError> {
    let len = data.len() as u64;
    match offset.checked_add(amount) {
        Some(end) if end <= len => Ok(data[offset as usize..end as usize].to_vec()),
        _ => Err(SourceError::Consume {
            offset,
            desired: amount,
            got: len.saturating_sub(offset),
        }),
    }
}

/// Mutable in-memory bytes.
#[derive(Debug, Clone, Default)]
pub struct BytesSource {
    data: Vec<u8>,
    offset: u64,
}

impl BytesSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        BytesSource {
            data: data.into(),
            offset: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Source for BytesSource {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        let size = self.data.len() as u64;
        if offset > size {
            return Err(SourceError::OutOfBounds { offset, size });
        }
        Ok(std::mem::replace(&mut self.offset, offset))
    }

    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        let bytes = take(&self.data, self.offset, amount)?;
        self.offset += amount;
        Ok(bytes)
    }

    fn store(&mut self, data: &[u8]) -> Result<u64, SourceError> {
        let start = self.offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        self.offset = end as u64;
        Ok(data.len() as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// A file on disk, read-only unless opened with [`FileSource::open_rw`].
#[derive(Debug)]
pub struct FileSource {
    file: File,
    writable: bool,
    offset: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        Ok(FileSource {
            file,
            writable: false,
            offset: 0,
        })
    }

    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(FileSource {
            file,
            writable: true,
            offset: 0,
        })
    }

    pub fn from_file(file: File, writable: bool) -> Self {
        FileSource {
            file,
            writable,
            offset: 0,
        }
    }

    fn len(&self) -> Result<u64, SourceError> {
        Ok(self.file.metadata()?.len())
    }
}

impl Source for FileSource {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        let size = self.len()?;
        if offset > size {
            return Err(SourceError::OutOfBounds { offset, size });
        }
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(std::mem::replace(&mut self.offset, offset))
    }

    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        let available = self.len()?.saturating_sub(self.offset);
        if amount > available {
            return Err(SourceError::Consume {
                offset: self.offset,
                desired: amount,
                got: available,
            });
        }
        let mut buf = vec![0u8; amount as usize];
        let mut got = 0usize;
        while got < buf.len() {
            match self.file.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if got < buf.len() {
            self.file.seek(SeekFrom::Start(self.offset))?;
            return Err(SourceError::Consume {
                offset: self.offset,
                desired: amount,
                got: got as u64,
            });
        }
        self.offset += amount;
        Ok(buf)
    }

    fn store(&mut self, data: &[u8]) -> Result<u64, SourceError> {
        if !self.writable {
            return Err(SourceError::ReadOnly);
        }
        self.file.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(data.len() as u64)
    }

    fn size(&self) -> Option<u64> {
        match self.len() {
            Ok(n) => Some(n),
            Err(e) => {
                log::debug!("file size unavailable: {e}");
                None
            }
        }
    }
}

/// A window `[base, base + len)` of another source, addressed from zero.
///
/// The proxy re-seeks its parent before every transfer, so interleaved use of the parent
/// and the proxy is safe.
pub struct ProxySource {
    parent: SharedSource,
    base: u64,
    len: u64,
    offset: u64,
}

impl ProxySource {
    pub fn new(parent: SharedSource, base: u64, len: u64) -> Self {
        ProxySource {
            parent,
            base,
            len,
            offset: 0,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }
}

impl Source for ProxySource {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        if offset > self.len {
            return Err(SourceError::OutOfBounds {
                offset,
                size: self.len,
            });
        }
        Ok(std::mem::replace(&mut self.offset, offset))
    }

    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        let available = self.len - self.offset;
        if amount > available {
            return Err(SourceError::Consume {
                offset: self.offset,
                desired: amount,
                got: available,
            });
        }
        let mut parent = self.parent.lock().map_err(|_| SourceError::Poisoned)?;
        parent.seek(self.base + self.offset)?;
        let bytes = parent.consume(amount).map_err(|e| match e {
            SourceError::Consume { desired, got, .. } => SourceError::Consume {
                offset: self.offset,
                desired,
                got,
            },
            other => other,
        })?;
        self.offset += amount;
        Ok(bytes)
    }

    fn store(&mut self, data: &[u8]) -> Result<u64, SourceError> {
        let available = self.len - self.offset;
        let desired = data.len() as u64;
        if desired > available {
            return Err(SourceError::Store {
                offset: self.offset,
                desired,
                written: 0,
            });
        }
        let mut parent = self.parent.lock().map_err(|_| SourceError::Poisoned)?;
        parent.seek(self.base + self.offset)?;
        let written = parent.store(data)?;
        self.offset += written;
        Ok(written)
    }

    fn size(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// A source with no bytes. Zero-length reads at offset 0 succeed; everything else fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySource;

impl Source for EmptySource {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        if offset > 0 {
            return Err(SourceError::OutOfBounds { offset, size: 0 });
        }
        Ok(0)
    }

    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        if amount == 0 {
            return Ok(Vec::new());
        }
        Err(SourceError::Consume {
            offset: 0,
            desired: amount,
            got: 0,
        })
    }

    fn store(&mut self, _data: &[u8]) -> Result<u64, SourceError> {
        Err(SourceError::ReadOnly)
    }

    fn size(&self) -> Option<u64> {
        Some(0)
    }
}

#[cfg(target_os = "linux")]
const PROCESS_CHUNK: u64 = 64 * 1024;

/// Memory of a live process, read through `/proc/<pid>/mem`. Unbounded: unmapped pages
/// surface as consume failures.
#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct ProcessMemorySource {
    mem: File,
    writable: bool,
    offset: u64,
}

#[cfg(target_os = "linux")]
impl ProcessMemorySource {
    pub fn open(pid: u32) -> Result<Self, SourceError> {
        let mem = File::open(format!("/proc/{pid}/mem"))?;
        Ok(ProcessMemorySource {
            mem,
            writable: false,
            offset: 0,
        })
    }

    pub fn open_rw(pid: u32) -> Result<Self, SourceError> {
        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/proc/{pid}/mem"))?;
        Ok(ProcessMemorySource {
            mem,
            writable: true,
            offset: 0,
        })
    }
}

#[cfg(target_os = "linux")]
impl Source for ProcessMemorySource {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        Ok(std::mem::replace(&mut self.offset, offset))
    }

    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        use std::os::unix::fs::FileExt;
        let short = |got: u64| SourceError::Consume {
            offset: self.offset,
            desired: amount,
            got,
        };
        if self.offset.checked_add(amount).is_none() {
            return Err(short(0));
        }
        let mut out = Vec::new();
        let mut chunk = vec![0u8; amount.min(PROCESS_CHUNK) as usize];
        while (out.len() as u64) < amount {
            let want = (amount - out.len() as u64).min(PROCESS_CHUNK) as usize;
            match self.mem.read_at(&mut chunk[..want], self.offset + out.len() as u64) {
                Ok(0) | Err(_) => return Err(short(out.len() as u64)),
                Ok(n) => out.extend_from_slice(&chunk[..n]),
            }
        }
        self.offset += amount;
        Ok(out)
    }

    fn store(&mut self, data: &[u8]) -> Result<u64, SourceError> {
        use std::os::unix::fs::FileExt;
        if !self.writable {
            return Err(SourceError::ReadOnly);
        }
        let written = self.mem.write_at(data, self.offset)? as u64;
        self.offset += written;
        Ok(written)
    }

    fn size(&self) -> Option<u64> {
        None
    }
}

/// Bytes that used to live at `origin` in some other source. Union members and
/// re-laid-out fields reload from these instead of touching the real source.
pub(crate) struct Detached<'a> {
    data: &'a [u8],
    origin: u64,
    offset: u64,
}

impl<'a> Detached<'a> {
    pub(crate) fn new(data: &'a [u8], origin: u64) -> Self {
        Detached {
            data,
            origin,
            offset: origin,
        }
    }
}

impl Source for Detached<'_> {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        let end = self.origin + self.data.len() as u64;
        if offset < self.origin || offset > end {
            return Err(SourceError::OutOfBounds { offset, size: end });
        }
        Ok(std::mem::replace(&mut self.offset, offset))
    }

    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        let bytes = take(self.data, self.offset - self.origin, amount).map_err(|e| match e {
            SourceError::Consume { desired, got, .. } => SourceError::Consume {
                offset: self.offset,
                desired,
                got,
            },
            other => other,
        })?;
        self.offset += amount;
        Ok(bytes)
    }

    fn store(&mut self, _data: &[u8]) -> Result<u64, SourceError> {
        Err(SourceError::ReadOnly)
    }

    fn size(&self) -> Option<u64> {
        Some(self.origin + self.data.len() as u64)
    }
}

/// Caps reads from an inner source at the absolute offset `limit`.
pub(crate) struct Window<'a> {
    inner: &'a mut dyn Source,
    limit: u64,
    offset: u64,
}

impl<'a> Window<'a> {
    pub(crate) fn new(inner: &'a mut dyn Source, limit: u64) -> Self {
        Window {
            inner,
            limit,
            offset: 0,
        }
    }
}

impl Source for Window<'_> {
    fn seek(&mut self, offset: u64) -> Result<u64, SourceError> {
        if offset > self.limit {
            return Err(SourceError::OutOfBounds {
                offset,
                size: self.limit,
            });
        }
        self.inner.seek(offset)?;
        Ok(std::mem::replace(&mut self.offset, offset))
    }

    fn consume(&mut self, amount: u64) -> Result<Vec<u8>, SourceError> {
        let available = self.limit.saturating_sub(self.offset);
        if amount > available {
            return Err(SourceError::Consume {
                offset: self.offset,
                desired: amount,
                got: available,
            });
        }
        let bytes = self.inner.consume(amount)?;
        self.offset += amount;
        Ok(bytes)
    }

    fn store(&mut self, data: &[u8]) -> Result<u64, SourceError> {
        let written = self.inner.store(data)?;
        self.offset += written;
        Ok(written)
    }

    fn size(&self) -> Option<u64> {
        Some(match self.inner.size() {
            Some(n) => n.min(self.limit),
            None => self.limit,
        })
    }
}
