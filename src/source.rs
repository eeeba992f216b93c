//! Random-access byte sources backing a database handle.
//!
//! A database only ever needs two things from its storage: the total size,
//! and "give me exactly `length` bytes at `offset`". [`ByteSource`] captures
//! that contract and two backends implement it:
//!
//! - [`MemorySource`] slices an in-memory buffer, which is either a
//!   memory-mapped file or a `Vec<u8>` (read from disk or handed over by the
//!   caller).
//! - [`FileSource`] issues positioned reads against an open file. On unix this
//!   is `pread(2)` and needs no locking; elsewhere a seek+read pair runs under
//!   a mutex.
//!
//! Both backends are `Send + Sync`, so a database can be shared across threads
//! once it is open.

use crate::error::{IpdbError, Result};
use memmap2::Mmap;
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

#[cfg(not(unix))]
use std::sync::Mutex;

/// Exact-length random access to the bytes of a database file
pub trait ByteSource: Send + Sync {
    /// Total length in bytes
    fn size(&self) -> u64;

    /// Read exactly `length` bytes starting at `offset`
    ///
    /// Fails with [`IpdbError::InvalidDatabase`] if fewer than `length` bytes
    /// are available. A zero-length read returns an empty slice without
    /// touching the underlying medium.
    fn read(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>>;

    /// Release the underlying resources. Later reads fail with [`IpdbError::Closed`].
    fn close(&mut self);
}

/// How a database file should be brought into the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Pick the best available backend (currently `Mmap`)
    #[default]
    Auto,
    /// Memory-map the file
    Mmap,
    /// Read the whole file into memory
    Memory,
    /// Keep the file open and issue a positioned read per access
    File,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpenMode::Auto => "auto",
            OpenMode::Mmap => "mmap",
            OpenMode::Memory => "memory",
            OpenMode::File => "file",
        };
        f.write_str(name)
    }
}

impl FromStr for OpenMode {
    type Err = IpdbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(OpenMode::Auto),
            "mmap" => Ok(OpenMode::Mmap),
            "memory" => Ok(OpenMode::Memory),
            "file" => Ok(OpenMode::File),
            other => Err(IpdbError::InvalidArgument(format!(
                "unknown open mode '{}' (expected auto, mmap, memory or file)",
                other
            ))),
        }
    }
}

/// Open `path` with the backend selected by `mode`
pub fn open_source<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Box<dyn ByteSource>> {
    let path = path.as_ref();
    let source: Box<dyn ByteSource> = match mode {
        OpenMode::Auto | OpenMode::Mmap => Box::new(MemorySource::map(path)?),
        OpenMode::Memory => Box::new(MemorySource::read_file(path)?),
        OpenMode::File => Box::new(FileSource::open(path)?),
    };
    log::debug!(
        "opened {} ({} bytes, mode={})",
        path.display(),
        source.size(),
        mode
    );
    Ok(source)
}

fn short_read(offset: u64, length: usize, size: u64) -> IpdbError {
    IpdbError::corrupt(format!(
        "unexpected end of file: wanted {} bytes at offset {}, file is {} bytes",
        length, offset, size
    ))
}

/// Storage for in-memory data - either owned or memory-mapped
enum Storage {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v.as_slice(),
            Storage::Mapped(m) => &m[..],
        }
    }
}

/// Byte source backed by a buffer in memory
pub struct MemorySource {
    data: Option<Storage>,
    size: u64,
}

impl MemorySource {
    /// Wrap a caller-provided buffer. No file I/O takes place.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            data: Some(Storage::Owned(data)),
            size,
        }
    }

    /// Read the whole file at `path` into memory
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| IpdbError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        Ok(Self::from_bytes(data))
    }

    /// Memory-map the file at `path`
    pub fn map<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| IpdbError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        // SAFETY: the mapping is read-only. Database files are immutable once
        // built; if another process truncates the file underneath us the OS
        // may raise SIGBUS, which is the usual mmap caveat.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| IpdbError::Io(format!("Failed to mmap {}: {}", path.display(), e)))?;
        let size = mmap.len() as u64;
        Ok(Self {
            data: Some(Storage::Mapped(mmap)),
            size,
        })
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>> {
        if length == 0 {
            return Ok(Cow::Borrowed(&[]));
        }
        let data = self.data.as_ref().ok_or(IpdbError::Closed)?.as_slice();
        let start = usize::try_from(offset).map_err(|_| short_read(offset, length, self.size))?;
        start
            .checked_add(length)
            .and_then(|end| data.get(start..end))
            .map(Cow::Borrowed)
            .ok_or_else(|| short_read(offset, length, self.size))
    }

    fn close(&mut self) {
        self.data = None;
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.data {
            Some(Storage::Owned(_)) => "owned",
            Some(Storage::Mapped(_)) => "mapped",
            None => "closed",
        };
        f.debug_struct("MemorySource")
            .field("size", &self.size)
            .field("storage", &kind)
            .finish()
    }
}

/// Byte source that reads from an open file on every access
#[derive(Debug)]
pub struct FileSource {
    file: Option<File>,
    size: u64,
    /// Serializes seek+read where positioned reads are unavailable
    #[cfg(not(unix))]
    lock: Mutex<()>,
}

impl FileSource {
    /// Open `path` for positioned reads
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| IpdbError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Some(file),
            size,
            #[cfg(not(unix))]
            lock: Mutex::new(()),
        })
    }

    #[cfg(unix)]
    fn read_into(&self, file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, offset)
    }

    #[cfg(not(unix))]
    fn read_into(&self, file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let _guard = self
            .lock
            .lock()
            .map_err(|_| std::io::Error::other("file source lock poisoned"))?;
        let mut handle = file;
        handle.seek(SeekFrom::Start(offset))?;
        handle.read_exact(buf)
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>> {
        if length == 0 {
            return Ok(Cow::Borrowed(&[]));
        }
        let file = self.file.as_ref().ok_or(IpdbError::Closed)?;
        match offset.checked_add(length as u64) {
            Some(end) if end <= self.size => {}
            _ => return Err(short_read(offset, length, self.size)),
        }

        let mut buf = vec![0u8; length];
        self.read_into(file, offset, &mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                short_read(offset, length, self.size)
            } else {
                IpdbError::from(e)
            }
        })?;
        Ok(Cow::Owned(buf))
    }

    fn close(&mut self) {
        self.file = None;
    }
}
