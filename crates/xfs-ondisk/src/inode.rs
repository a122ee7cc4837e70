//! Inode core and data fork decoding.

use crate::bmap::{BmbtExtent, BmbtRoot, parse_bmbt_root, parse_extent_list};
use crate::superblock::XfsSuperblock;
use serde::{Deserialize, Serialize};
use xfs_types::{
    ByteCursor, InodeNumber, ParseError, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT,
    S_IFREG, S_IFSOCK, XFS_DINODE_MAGIC,
};

/// Core size of version 1 and 2 inodes.
pub const XFS_DINODE_CORE_SIZE_V2: usize = 100;
/// Core size of version 3 inodes (V5 filesystems).
pub const XFS_DINODE_CORE_SIZE_V3: usize = 176;
pub const XFS_DINODE_CRC_OFFSET: usize = 0x64;

pub const XFS_DIFLAG2_BIGTIME: u64 = 1 << 3;
pub const XFS_DIFLAG2_NREXT64: u64 = 1 << 4;

const XFS_DINODE_FMT_DEV: u8 = 0;
const XFS_DINODE_FMT_LOCAL: u8 = 1;
const XFS_DINODE_FMT_EXTENTS: u8 = 2;
const XFS_DINODE_FMT_BTREE: u8 = 3;

/// Seconds between the bigtime epoch and the Unix epoch.
const XFS_BIGTIME_EPOCH_OFFSET: i64 = 1 << 31;
const NSEC_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileKind {
    #[must_use]
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(Self::Regular),
            S_IFDIR => Some(Self::Directory),
            S_IFLNK => Some(Self::Symlink),
            S_IFCHR => Some(Self::CharDevice),
            S_IFBLK => Some(Self::BlockDevice),
            S_IFIFO => Some(Self::Fifo),
            S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct XfsTimestamp {
    pub secs: i64,
    pub nsec: u32,
}

impl XfsTimestamp {
    fn parse(c: &ByteCursor<'_>, offset: usize, bigtime: bool) -> Result<Self, ParseError> {
        if bigtime {
            let raw = c.u64(offset)?;
            let secs = i64::try_from(raw / NSEC_PER_SEC).map_err(|_| {
                ParseError::IntegerConversion {
                    field: "di_timestamp",
                }
            })?;
            let nsec = u32::try_from(raw % NSEC_PER_SEC).map_err(|_| {
                ParseError::IntegerConversion {
                    field: "di_timestamp",
                }
            })?;
            return Ok(Self {
                secs: secs - XFS_BIGTIME_EPOCH_OFFSET,
                nsec,
            });
        }
        Ok(Self {
            secs: i64::from(c.i32(offset)?),
            nsec: c.u32(offset + 4)?,
        })
    }

    #[must_use]
    pub fn to_system_time(self) -> Option<std::time::SystemTime> {
        let nanos = std::time::Duration::from_nanos(u64::from(self.nsec));
        if self.secs >= 0 {
            std::time::UNIX_EPOCH
                .checked_add(std::time::Duration::from_secs(self.secs.unsigned_abs()))?
                .checked_add(nanos)
        } else {
            std::time::UNIX_EPOCH
                .checked_sub(std::time::Duration::from_secs(self.secs.unsigned_abs()))?
                .checked_add(nanos)
        }
    }
}

/// Decoded data fork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFork {
    /// Device number of a special file.
    Device(u32),
    /// Inline payload: shortform directory or symlink target.
    Local(Vec<u8>),
    Extents(Vec<BmbtExtent>),
    Btree(BmbtRoot),
}

impl DataFork {
    #[must_use]
    pub fn format_name(&self) -> &'static str {
        match self {
            Self::Device(_) => "dev",
            Self::Local(_) => "local",
            Self::Extents(_) => "extents",
            Self::Btree(_) => "btree",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfsInode {
    pub ino: InodeNumber,
    pub mode: u16,
    pub version: u8,
    pub format: u8,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub projid: u32,
    pub atime: XfsTimestamp,
    pub mtime: XfsTimestamp,
    pub ctime: XfsTimestamp,
    pub size: u64,
    pub nblocks: u64,
    pub extsize: u32,
    pub nextents: u64,
    pub anextents: u32,
    pub forkoff: u8,
    pub aformat: u8,
    pub flags: u16,
    pub generation: u32,
    pub next_unlinked: u32,

    // ── Version 3 only ───────────────────────────────────────────────────
    pub crc: Option<u32>,
    pub change_count: Option<u64>,
    pub flags2: u64,
    pub cow_extsize: Option<u32>,
    pub crtime: Option<XfsTimestamp>,
    pub uuid: Option<[u8; 16]>,

    pub data_fork: DataFork,
}

impl XfsInode {
    /// Decode one on-disk inode record of `sb.inode_size` bytes.
    ///
    /// Version gating follows the superblock: V5 filesystems only carry
    /// version 3 inodes, V4 filesystems carry versions 1 and 2.
    pub fn parse(raw: &[u8], ino: InodeNumber, sb: &XfsSuperblock) -> Result<Self, ParseError> {
        let inode_size = usize::from(sb.inode_size);
        if raw.len() < inode_size {
            return Err(ParseError::InsufficientData {
                needed: inode_size,
                offset: 0,
                actual: raw.len(),
            });
        }
        let raw = &raw[..inode_size];
        let c = ByteCursor::new(raw, 0);
        let magic = c.u16(0x00)?;
        if magic != XFS_DINODE_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(XFS_DINODE_MAGIC),
                actual: u64::from(magic),
            });
        }
        let version = c.u8(0x04)?;
        let core_size = match (sb.is_v5(), version) {
            (true, 3) => XFS_DINODE_CORE_SIZE_V3,
            (false, 1 | 2) => XFS_DINODE_CORE_SIZE_V2,
            _ => {
                return Err(ParseError::InvalidField {
                    field: "di_version",
                    reason: "inode version does not match filesystem version",
                });
            }
        };
        if core_size >= inode_size {
            return Err(ParseError::InvalidField {
                field: "di_version",
                reason: "inode core larger than inode",
            });
        }

        let flags2 = if version == 3 { c.u64(0x78)? } else { 0 };
        let bigtime = flags2 & XFS_DIFLAG2_BIGTIME != 0;
        let (nextents, anextents) = if flags2 & XFS_DIFLAG2_NREXT64 != 0 {
            (c.u64(0x18)?, c.u32(0x4C)?)
        } else {
            (u64::from(c.u32(0x4C)?), u32::from(c.u16(0x50)?))
        };
        let (nlink, projid) = if version == 1 {
            (u32::from(c.u16(0x06)?), 0)
        } else {
            (
                c.u32(0x10)?,
                u32::from(c.u16(0x14)?) | (u32::from(c.u16(0x16)?) << 16),
            )
        };

        let size = c.u64(0x38)?;
        let mode = c.u16(0x02)?;
        let format = c.u8(0x05)?;
        let forkoff = c.u8(0x52)?;

        let literal = inode_size - core_size;
        let fork_size = if forkoff == 0 {
            literal
        } else {
            usize::from(forkoff) * 8
        };
        if fork_size > literal {
            return Err(ParseError::InvalidField {
                field: "di_forkoff",
                reason: "attribute fork offset beyond inode",
            });
        }
        let fork = c.bytes(core_size, fork_size)?;
        let data_fork = parse_data_fork(fork, format, size, nextents)?;

        let (crc, change_count, cow_extsize, crtime, uuid) = if version == 3 {
            let di_ino = c.u64(0x98)?;
            if di_ino != ino.0 {
                return Err(ParseError::InvalidField {
                    field: "di_ino",
                    reason: "inode number does not match its location",
                });
            }
            (
                crate::stored_crc(raw, XFS_DINODE_CRC_OFFSET),
                Some(c.u64(0x68)?),
                Some(c.u32(0x80)?),
                Some(XfsTimestamp::parse(&c, 0x90, bigtime)?),
                Some(c.fixed::<16>(0xA0)?),
            )
        } else {
            (None, None, None, None, None)
        };

        Ok(Self {
            ino,
            mode,
            version,
            format,
            uid: c.u32(0x08)?,
            gid: c.u32(0x0C)?,
            nlink,
            projid,
            atime: XfsTimestamp::parse(&c, 0x20, bigtime)?,
            mtime: XfsTimestamp::parse(&c, 0x28, bigtime)?,
            ctime: XfsTimestamp::parse(&c, 0x30, bigtime)?,
            size,
            nblocks: c.u64(0x40)?,
            extsize: c.u32(0x48)?,
            nextents,
            anextents,
            forkoff,
            aformat: c.u8(0x53)?,
            flags: c.u16(0x5A)?,
            generation: c.u32(0x5C)?,
            next_unlinked: c.u32(0x60)?,
            crc,
            change_count,
            flags2,
            cow_extsize,
            crtime,
            uuid,
            data_fork,
        })
    }

    #[must_use]
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & 0o7777
    }

    #[must_use]
    pub fn has_attr_fork(&self) -> bool {
        self.forkoff != 0
    }
}

fn parse_data_fork(
    fork: &[u8],
    format: u8,
    size: u64,
    nextents: u64,
) -> Result<DataFork, ParseError> {
    match format {
        XFS_DINODE_FMT_DEV => Ok(DataFork::Device(ByteCursor::new(fork, 0).u32(0)?)),
        XFS_DINODE_FMT_LOCAL => {
            let len = usize::try_from(size).map_err(|_| ParseError::IntegerConversion {
                field: "di_size",
            })?;
            if len > fork.len() {
                return Err(ParseError::InvalidField {
                    field: "di_size",
                    reason: "inline data larger than data fork",
                });
            }
            Ok(DataFork::Local(fork[..len].to_vec()))
        }
        XFS_DINODE_FMT_EXTENTS => {
            let count = usize::try_from(nextents).map_err(|_| ParseError::IntegerConversion {
                field: "di_nextents",
            })?;
            if count.saturating_mul(crate::bmap::XFS_BMBT_REC_SIZE) > fork.len() {
                return Err(ParseError::InvalidField {
                    field: "di_nextents",
                    reason: "extent list larger than data fork",
                });
            }
            Ok(DataFork::Extents(parse_extent_list(fork, count)?))
        }
        XFS_DINODE_FMT_BTREE => Ok(DataFork::Btree(parse_bmbt_root(fork)?)),
        _ => Err(ParseError::InvalidField {
            field: "di_format",
            reason: "unknown data fork format",
        }),
    }
}

/// Verify a version 3 inode CRC over the full inode record.
pub fn verify_inode_checksum(raw: &[u8]) -> Result<(), ParseError> {
    let stored = crate::stored_crc(raw, XFS_DINODE_CRC_OFFSET).ok_or(
        ParseError::InsufficientData {
            needed: XFS_DINODE_CRC_OFFSET + 4,
            offset: 0,
            actual: raw.len(),
        },
    )?;
    if crate::xfs_crc(raw, XFS_DINODE_CRC_OFFSET) != stored {
        return Err(ParseError::InvalidField {
            field: "di_crc",
            reason: "inode checksum mismatch",
        });
    }
    Ok(())
}
