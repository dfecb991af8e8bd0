//! Random-access byte sources.
//!
//! The scanner never loads a span whole. Every read is a bounded window: a
//! directory segment, a `Doc` header, a header blob.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use scan_config::{SpanConfig, SpanKind};

use crate::{Result, ScanError};

/// Positioned, read-only access to a span image.
///
/// Implementations must be safe to read concurrently at independent offsets.
pub trait ByteSource: Send + Sync {
    /// Read exactly `len` bytes at `offset`.
    ///
    /// A window extending past the end fails with `ErrorKind::UnexpectedEof`.
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Total size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

fn past_end(offset: u64, len: usize, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "window {:#x}+{} exceeds source of {} bytes",
            offset, len, size
        ),
    )
}

/// Bounds-checked slice of an in-memory image.
fn window(bytes: &[u8], offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let size = bytes.len() as u64;
    let end = offset
        .checked_add(len as u64)
        .filter(|&end| end <= size)
        .ok_or_else(|| past_end(offset, len, size))?;
    Ok(bytes[offset as usize..end as usize].to_vec())
}

/// Plain file or block device, read with `pread`.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = File::open(path)?;
        // Block devices report a zero metadata length; seeking finds the real size.
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self { file, len })
    }
}

impl ByteSource for FileSource {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Memory-mapped image, for memory-backed stores.
#[derive(Debug)]
pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the image is opened read-only and the scanner assumes it is
        // not modified while being scanned.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl ByteSource for MmapSource {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        window(&self.mmap, offset, len)
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}

/// Owned in-memory image.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    bytes: Vec<u8>,
}

impl MemorySource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    /// Copy `data` in at `offset`, growing the image if needed.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        let end = start + data.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(data);
    }
}

impl ByteSource for MemorySource {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        window(&self.bytes, offset, len)
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Open the source backing a configured span.
pub fn open_span(span: &SpanConfig) -> io::Result<Box<dyn ByteSource>> {
    Ok(match span.kind {
        SpanKind::File | SpanKind::Device => Box::new(FileSource::open(&span.path)?),
        SpanKind::Memory => Box::new(MmapSource::open(&span.path)?),
    })
}

/// Read a window, attributing failures to the window.
pub(crate) fn read_exact<S: ByteSource + ?Sized>(
    source: &S,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    source
        .read_at(offset, len)
        .map_err(|source| ScanError::Io {
            offset,
            len,
            source,
        })
}

/// Read a window, mapping "past the end" to `None`. Other I/O failures escalate.
pub(crate) fn read_window<S: ByteSource + ?Sized>(
    source: &S,
    offset: u64,
    len: usize,
) -> Result<Option<Vec<u8>>> {
    match source.read_at(offset, len) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(source) => Err(ScanError::Io {
            offset,
            len,
            source,
        }),
    }
}
