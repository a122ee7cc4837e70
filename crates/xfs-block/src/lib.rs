#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the [`ByteDevice`] read contract the reader consumes, a
//! file-backed and an in-memory implementation, and the [`BlockReader`]
//! that turns `(block, intra-block offset)` pairs into device reads.
//! Nothing here buffers or caches.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;
use xfs_error::{Result, XfsError};
use xfs_types::{BlockNumber, BlockSize, ByteOffset, XFS_MIN_SECTOR_SIZE, XFS_SB_OFFSET};

fn short_read(offset: ByteOffset, len: usize, device_len: u64) -> XfsError {
    XfsError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("read out of bounds: offset={offset} len={len} device_len={device_len}"),
    ))
}

fn read_end(offset: ByteOffset, len: usize) -> Result<u64> {
    let len = u64::try_from(len)
        .map_err(|_| XfsError::Format("read length overflows u64".to_owned()))?;
    offset
        .0
        .checked_add(len)
        .ok_or_else(|| XfsError::Format("read range overflows u64".to_owned()))
}

/// Byte-addressed, read-only device (pread semantics).
///
/// Implementations must be safe to call from several threads at once; the
/// reader itself holds no locks around device access.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Fill `buf` from `offset` or fail. A short read is an error.
    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()>;
}

/// File-backed byte device.
///
/// Uses `std::os::unix::fs::FileExt`, which needs no shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    /// Open `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }

    #[must_use]
    pub fn file(&self) -> &Arc<File> {
        &self.file
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        if read_end(offset, buf.len())? > self.len {
            return Err(short_read(offset, buf.len(), self.len));
        }
        self.file.read_exact_at(buf, offset.0)?;
        Ok(())
    }
}

/// Device over an in-memory image, shared without copying.
#[derive(Debug, Clone)]
pub struct MemoryByteDevice {
    bytes: Arc<Vec<u8>>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    #[must_use]
    pub fn from_arc(bytes: Arc<Vec<u8>>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        let end = read_end(offset, buf.len())?;
        if end > self.len_bytes() {
            return Err(short_read(offset, buf.len(), self.len_bytes()));
        }
        let start = usize::try_from(offset.0)
            .map_err(|_| XfsError::Format("offset does not fit usize".to_owned()))?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

impl<D: ByteDevice + ?Sized> ByteDevice for Box<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<D: ByteDevice + ?Sized> ByteDevice for Arc<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Read the first `len` bytes of the device, where the superblock lives.
///
/// `len` is clamped below at the minimum sector size.
pub fn read_superblock_region(dev: &dyn ByteDevice, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0_u8; len.max(XFS_MIN_SECTOR_SIZE)];
    dev.read_exact_at(ByteOffset(XFS_SB_OFFSET), &mut buf)?;
    Ok(buf)
}

/// Translates block-relative positions into absolute device reads.
///
/// `absolute = block_size * block + intra_block_offset`, computed with
/// checked arithmetic. Errors from the device propagate unchanged.
pub struct BlockReader {
    dev: Box<dyn ByteDevice>,
    block_size: BlockSize,
}

impl std::fmt::Debug for BlockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("block_size", &self.block_size)
            .field("dev_len", &self.dev.len_bytes())
            .finish()
    }
}

impl BlockReader {
    #[must_use]
    pub fn new(dev: Box<dyn ByteDevice>, block_size: BlockSize) -> Self {
        Self { dev, block_size }
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn device(&self) -> &dyn ByteDevice {
        &*self.dev
    }

    /// Absolute byte offset of `intra_offset` inside `block`.
    pub fn block_offset(&self, block: BlockNumber, intra_offset: u64) -> Result<ByteOffset> {
        self.block_size
            .block_to_byte(block)
            .and_then(|base| base.checked_add(intra_offset))
            .map(ByteOffset)
            .ok_or_else(|| XfsError::Format(format!("block offset overflow: block={block}")))
    }

    /// Fill `dest` starting `intra_offset` bytes into `block`.
    pub fn read_block(&self, block: BlockNumber, intra_offset: u64, dest: &mut [u8]) -> Result<()> {
        let offset = self.block_offset(block, intra_offset)?;
        trace!(block = block.0, intra_offset, len = dest.len(), "block read");
        self.dev.read_exact_at(offset, dest)
    }

    /// Read `count` whole blocks starting at `block` into a fresh buffer.
    pub fn read_blocks_vec(&self, block: BlockNumber, count: u32) -> Result<Vec<u8>> {
        let len = u64::from(self.block_size.get()) * u64::from(count);
        let len = usize::try_from(len)
            .map_err(|_| XfsError::Format("block run does not fit usize".to_owned()))?;
        let mut buf = vec![0_u8; len];
        self.read_block(block, 0, &mut buf)?;
        Ok(buf)
    }

    /// Read at an absolute byte offset (used for inode records, which are
    /// addressed in bytes rather than blocks).
    pub fn read_at(&self, offset: ByteOffset, dest: &mut [u8]) -> Result<()> {
        trace!(offset = offset.0, len = dest.len(), "byte read");
        self.dev.read_exact_at(offset, dest)
    }
}
