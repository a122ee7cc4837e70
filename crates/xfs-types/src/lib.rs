#![forbid(unsafe_code)]
//! Shared primitives for the XFS reader: unit-carrying newtypes, the
//! big-endian [`ByteCursor`], field readers, and [`ParseError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const XFS_SB_MAGIC: u32 = 0x5846_5342; // "XFSB"
pub const XFS_AGF_MAGIC: u32 = 0x5841_4746; // "XAGF"
pub const XFS_AGI_MAGIC: u32 = 0x5841_4749; // "XAGI"
pub const XFS_DINODE_MAGIC: u16 = 0x494E; // "IN"
pub const XFS_BMAP_MAGIC: u32 = 0x424D_4150; // "BMAP"
pub const XFS_BMAP_CRC_MAGIC: u32 = 0x424D_4133; // "BMA3"

pub const XFS_DIR2_BLOCK_MAGIC: u32 = 0x5844_3242; // "XD2B"
pub const XFS_DIR3_BLOCK_MAGIC: u32 = 0x5844_4233; // "XDB3"
pub const XFS_DIR2_DATA_MAGIC: u32 = 0x5844_3244; // "XD2D"
pub const XFS_DIR3_DATA_MAGIC: u32 = 0x5844_4433; // "XDD3"
pub const XFS_DIR2_LEAF1_MAGIC: u16 = 0xD2F1;
pub const XFS_DIR3_LEAF1_MAGIC: u16 = 0x3DF1;
pub const XFS_DIR2_LEAFN_MAGIC: u16 = 0xD2FF;
pub const XFS_DIR3_LEAFN_MAGIC: u16 = 0x3DFF;
pub const XFS_DA_NODE_MAGIC: u16 = 0xFEBE;
pub const XFS_DA3_NODE_MAGIC: u16 = 0x3EBE;

/// Superblock lives at byte 0 of the device and occupies one sector.
pub const XFS_SB_OFFSET: u64 = 0;
/// Bytes of superblock actually decoded for a V4 filesystem.
pub const XFS_SB_SIZE_V4: usize = 208;
/// Bytes of superblock actually decoded for a V5 filesystem.
pub const XFS_SB_SIZE_V5: usize = 264;
/// Smallest sector size XFS supports; the superblock region is read at this size first.
pub const XFS_MIN_SECTOR_SIZE: usize = 512;

/// Directory logical byte offset where the leaf/node index region starts.
pub const XFS_DIR2_LEAF_OFFSET: u64 = 1 << 35;
/// Directory logical byte offset where the free-space index region starts.
pub const XFS_DIR2_FREE_OFFSET: u64 = 1 << 36;
/// Directory data entries and leaf addresses are in units of this many bytes.
pub const XFS_DIR2_DATA_ALIGN: usize = 8;
/// `xfs_dir2_dataptr_t` value of a stale leaf entry.
pub const XFS_DIR2_NULL_DATAPTR: u32 = 0;
/// Longest name a directory entry can carry.
pub const XFS_NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u64);

/// Filesystem block number as stored in extents and bmbt pointers:
/// `agno << agblklog | agbno`. Not a linear device block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FsBlock(pub u64);

/// Validated block size (power of two in 512..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [512, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(512..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 512..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    #[must_use]
    pub fn byte_to_block(self, byte_offset: u64) -> BlockNumber {
        BlockNumber(byte_offset >> u64::from(self.shift()))
    }

    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> Option<u64> {
        block.0.checked_mul(u64::from(self.0))
    }
}

/// Allocation group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

/// Byte offset on a `ByteDevice` (pread semantics).
///
/// This is a unit-carrying wrapper to prevent mixing bytes and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    #[must_use]
    pub fn checked_mul(self, factor: u64) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_be_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    Ok(u16::from_be_bytes(read_fixed::<2>(data, offset)?))
}

#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    Ok(u32::from_be_bytes(read_fixed::<4>(data, offset)?))
}

#[inline]
pub fn read_be_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    Ok(u64::from_be_bytes(read_fixed::<8>(data, offset)?))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

/// Round `value` up to the next multiple of `align` (a power of two).
#[must_use]
pub fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

// ── Byte cursor ─────────────────────────────────────────────────────────────

/// Big-endian view over an immutable buffer at a base offset.
///
/// Every accessor takes an offset relative to `base`. Errors report the
/// absolute position inside the underlying buffer, so a failure deep inside
/// a nested structure still points at the right byte.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    base: usize,
}

impl<'a> ByteCursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self { data, base }
    }

    /// Cursor whose base is `offset` bytes past this one.
    pub fn sub(&self, offset: usize) -> Result<Self, ParseError> {
        let base = self.abs(offset)?;
        if base > self.data.len() {
            return Err(ParseError::InsufficientData {
                needed: 0,
                offset: base,
                actual: 0,
            });
        }
        Ok(Self {
            data: self.data,
            base,
        })
    }

    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Bytes available from the base to the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.base)
    }

    fn abs(&self, offset: usize) -> Result<usize, ParseError> {
        self.base
            .checked_add(offset)
            .ok_or(ParseError::InvalidField {
                field: "offset",
                reason: "overflow",
            })
    }

    pub fn u8(&self, offset: usize) -> Result<u8, ParseError> {
        read_u8(self.data, self.abs(offset)?)
    }

    pub fn u16(&self, offset: usize) -> Result<u16, ParseError> {
        read_be_u16(self.data, self.abs(offset)?)
    }

    pub fn u32(&self, offset: usize) -> Result<u32, ParseError> {
        read_be_u32(self.data, self.abs(offset)?)
    }

    pub fn u64(&self, offset: usize) -> Result<u64, ParseError> {
        read_be_u64(self.data, self.abs(offset)?)
    }

    /// Signed 32-bit field (legacy inode timestamps).
    pub fn i32(&self, offset: usize) -> Result<i32, ParseError> {
        Ok(i32::from_be_bytes(self.fixed::<4>(offset)?))
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], ParseError> {
        ensure_slice(self.data, self.abs(offset)?, len)
    }

    pub fn fixed<const N: usize>(&self, offset: usize) -> Result<[u8; N], ParseError> {
        read_fixed::<N>(self.data, self.abs(offset)?)
    }

    /// Fail with `InvalidMagic` unless the u32 at `offset` equals `expected`.
    pub fn expect_u32(&self, offset: usize, expected: u32) -> Result<(), ParseError> {
        let actual = self.u32(offset)?;
        if actual != expected {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(expected),
                actual: u64::from(actual),
            });
        }
        Ok(())
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FsBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;
