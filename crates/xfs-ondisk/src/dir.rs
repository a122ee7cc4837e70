//! Directory structures: name hash, shortform, data blocks, leaf and
//! da-btree node blocks.
//!
//! Everything here borrows from the caller's buffer. Walking a directory
//! across blocks is the job of `xfs-core`.

use serde::{Deserialize, Serialize};
use xfs_types::{
    ByteCursor, ParseError, XFS_DA3_NODE_MAGIC, XFS_DA_NODE_MAGIC, XFS_DIR2_BLOCK_MAGIC,
    XFS_DIR2_DATA_ALIGN, XFS_DIR2_DATA_MAGIC, XFS_DIR2_LEAF1_MAGIC, XFS_DIR2_LEAFN_MAGIC,
    XFS_DIR2_NULL_DATAPTR, XFS_DIR3_BLOCK_MAGIC, XFS_DIR3_DATA_MAGIC, XFS_DIR3_LEAF1_MAGIC,
    XFS_DIR3_LEAFN_MAGIC, round_up,
};

pub const XFS_DIR2_DATA_HDR_SIZE_V4: usize = 16;
pub const XFS_DIR3_DATA_HDR_SIZE: usize = 64;
pub const XFS_DIR3_DATA_CRC_OFFSET: usize = 4;
pub const XFS_DIR2_LEAF_HDR_SIZE_V4: usize = 16;
pub const XFS_DIR3_LEAF_HDR_SIZE: usize = 64;
pub const XFS_DA_NODE_HDR_SIZE_V4: usize = 16;
pub const XFS_DA3_NODE_HDR_SIZE: usize = 64;
pub const XFS_DA3_CRC_OFFSET: usize = 12;
/// Size of a [`LeafEntry`] and of a da-node entry.
pub const XFS_DIR2_LEAF_ENTRY_SIZE: usize = 8;
pub const XFS_DIR2_BLOCK_TAIL_SIZE: usize = 8;

const XFS_DIR2_DATA_FREE_TAG: u16 = 0xFFFF;

// ── Name hash ───────────────────────────────────────────────────────────────

/// The XFS directory name hash (`xfs_da_hashname`).
///
/// Equivalent to folding each byte in with `hash = rotl(hash, 7) ^ byte`.
#[must_use]
pub fn dir_hash(name: &[u8]) -> u32 {
    name.iter()
        .fold(0_u32, |hash, &b| hash.rotate_left(7) ^ u32::from(b))
}

// ── File type byte ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirFileType {
    Unknown,
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Symlink,
}

impl DirFileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::CharDevice,
            4 => Self::BlockDevice,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

// ── Shortform ───────────────────────────────────────────────────────────────

/// Inline directory stored in the inode's data fork.
#[derive(Debug, Clone, Copy)]
pub struct ShortformDir<'a> {
    pub count: u8,
    pub i8count: u8,
    pub parent: u64,
    has_ftype: bool,
    entries: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortformEntry<'a> {
    pub name: &'a [u8],
    /// Logical offset the entry would have in a block directory; used as
    /// the iteration cookie.
    pub offset: u16,
    pub ftype: Option<DirFileType>,
    pub ino: u64,
}

impl<'a> ShortformDir<'a> {
    pub fn parse(fork: &'a [u8], has_ftype: bool) -> Result<Self, ParseError> {
        let c = ByteCursor::new(fork, 0);
        let count = c.u8(0)?;
        let i8count = c.u8(1)?;
        if i8count > count {
            return Err(ParseError::InvalidField {
                field: "sf_i8count",
                reason: "more 8-byte entries than entries",
            });
        }
        let (parent, hdr) = if i8count > 0 {
            (c.u64(2)?, 10)
        } else {
            (u64::from(c.u32(2)?), 6)
        };
        Ok(Self {
            count,
            i8count,
            parent,
            has_ftype,
            entries: &fork[hdr..],
        })
    }

    #[must_use]
    pub fn inumber_size(&self) -> usize {
        if self.i8count > 0 { 8 } else { 4 }
    }

    #[must_use]
    pub fn iter(&self) -> ShortformIter<'a> {
        ShortformIter {
            data: self.entries,
            pos: 0,
            remaining: self.count,
            has_ftype: self.has_ftype,
            ino_size: self.inumber_size(),
            done: false,
        }
    }

    /// Exact-name lookup over the inline entries, including `.` and `..`.
    pub fn lookup(&self, self_ino: u64, name: &[u8]) -> Result<Option<u64>, ParseError> {
        match name {
            b"." => return Ok(Some(self_ino)),
            b".." => return Ok(Some(self.parent)),
            _ => {}
        }
        for entry in self.iter() {
            let entry = entry?;
            if entry.name == name {
                return Ok(Some(entry.ino));
            }
        }
        Ok(None)
    }
}

pub struct ShortformIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: u8,
    has_ftype: bool,
    ino_size: usize,
    done: bool,
}

impl<'a> ShortformIter<'a> {
    fn next_entry(&mut self) -> Result<ShortformEntry<'a>, ParseError> {
        let c = ByteCursor::new(self.data, self.pos);
        let namelen = usize::from(c.u8(0)?);
        if namelen == 0 {
            return Err(ParseError::InvalidField {
                field: "sfe_namelen",
                reason: "empty name",
            });
        }
        let offset = c.u16(1)?;
        let name = c.bytes(3, namelen)?;
        let mut at = 3 + namelen;
        let ftype = if self.has_ftype {
            let raw = c.u8(at)?;
            at += 1;
            Some(DirFileType::from_raw(raw))
        } else {
            None
        };
        let ino = if self.ino_size == 8 {
            c.u64(at)?
        } else {
            u64::from(c.u32(at)?)
        };
        self.pos += at + self.ino_size;
        Ok(ShortformEntry {
            name,
            offset,
            ftype,
            ino,
        })
    }
}

impl<'a> Iterator for ShortformIter<'a> {
    type Item = Result<ShortformEntry<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let entry = self.next_entry();
        if entry.is_err() {
            self.done = true;
        }
        Some(entry)
    }
}

// ── Data blocks ─────────────────────────────────────────────────────────────

/// Header of a directory data block (`XD2D`/`XDD3`) or single-block
/// directory (`XD2B`/`XDB3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBlockHeader {
    pub magic: u32,
    /// Single-block directory: the block also holds leaf entries and a tail.
    pub is_block: bool,
    pub header_size: usize,
}

impl DataBlockHeader {
    pub fn parse(block: &[u8], v5: bool) -> Result<Self, ParseError> {
        let magic = ByteCursor::new(block, 0).u32(0)?;
        let (is_block, header_size) = match (v5, magic) {
            (false, XFS_DIR2_BLOCK_MAGIC) => (true, XFS_DIR2_DATA_HDR_SIZE_V4),
            (false, XFS_DIR2_DATA_MAGIC) => (false, XFS_DIR2_DATA_HDR_SIZE_V4),
            (true, XFS_DIR3_BLOCK_MAGIC) => (true, XFS_DIR3_DATA_HDR_SIZE),
            (true, XFS_DIR3_DATA_MAGIC) => (false, XFS_DIR3_DATA_HDR_SIZE),
            _ => {
                return Err(ParseError::InvalidMagic {
                    expected: u64::from(if v5 {
                        XFS_DIR3_DATA_MAGIC
                    } else {
                        XFS_DIR2_DATA_MAGIC
                    }),
                    actual: u64::from(magic),
                });
            }
        };
        if block.len() < header_size {
            return Err(ParseError::InsufficientData {
                needed: header_size,
                offset: 0,
                actual: block.len(),
            });
        }
        Ok(Self {
            magic,
            is_block,
            header_size,
        })
    }
}

/// Live entry inside a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataEntry<'a> {
    /// Byte offset of the entry inside its directory block.
    pub offset: usize,
    pub ino: u64,
    pub name: &'a [u8],
    pub ftype: Option<DirFileType>,
}

/// On-disk size of a data entry with a name of `namelen` bytes.
#[must_use]
pub fn data_entry_size(namelen: usize, has_ftype: bool) -> usize {
    round_up(
        8 + 1 + namelen + usize::from(has_ftype) + 2,
        XFS_DIR2_DATA_ALIGN,
    )
}

/// Decode the live entry starting at `offset`.
///
/// The trailing tag must point back at the entry; a leaf address that lands
/// on free space or mid-entry fails here.
pub fn data_entry_at(
    block: &[u8],
    offset: usize,
    has_ftype: bool,
) -> Result<DataEntry<'_>, ParseError> {
    if offset % XFS_DIR2_DATA_ALIGN != 0 {
        return Err(ParseError::InvalidField {
            field: "dataptr",
            reason: "misaligned directory entry",
        });
    }
    let c = ByteCursor::new(block, offset);
    if c.u16(0)? == XFS_DIR2_DATA_FREE_TAG {
        return Err(ParseError::InvalidField {
            field: "dataptr",
            reason: "address points at unused space",
        });
    }
    let ino = c.u64(0)?;
    let namelen = usize::from(c.u8(8)?);
    if namelen == 0 {
        return Err(ParseError::InvalidField {
            field: "dep_namelen",
            reason: "empty name",
        });
    }
    let name = c.bytes(9, namelen)?;
    let ftype = if has_ftype {
        Some(DirFileType::from_raw(c.u8(9 + namelen)?))
    } else {
        None
    };
    let size = data_entry_size(namelen, has_ftype);
    let tag = c.u16(size - 2)?;
    if usize::from(tag) != offset {
        return Err(ParseError::InvalidField {
            field: "dep_tag",
            reason: "entry tag does not match its offset",
        });
    }
    Ok(DataEntry {
        offset,
        ino,
        name,
        ftype,
    })
}

/// Walks the entries of one data block in on-disk order, skipping unused
/// regions.
pub struct DataEntryIter<'a> {
    block: &'a [u8],
    pos: usize,
    end: usize,
    has_ftype: bool,
    done: bool,
}

impl<'a> DataEntryIter<'a> {
    /// Iterate entries in `block` from `start` up to `end` (exclusive).
    ///
    /// For single-block directories `end` is the start of the leaf array.
    #[must_use]
    pub fn new(block: &'a [u8], start: usize, end: usize, has_ftype: bool) -> Self {
        Self {
            block,
            pos: start,
            end: end.min(block.len()),
            has_ftype,
            done: false,
        }
    }

    fn fail(&mut self, err: ParseError) -> Option<Result<DataEntry<'a>, ParseError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for DataEntryIter<'a> {
    type Item = Result<DataEntry<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.pos >= self.end {
                return None;
            }
            let c = ByteCursor::new(self.block, self.pos);
            let tag = match c.u16(0) {
                Ok(v) => v,
                Err(e) => return self.fail(e),
            };
            if tag == XFS_DIR2_DATA_FREE_TAG {
                let len = match c.u16(2) {
                    Ok(v) => usize::from(v),
                    Err(e) => return self.fail(e),
                };
                if len < XFS_DIR2_DATA_ALIGN || len % XFS_DIR2_DATA_ALIGN != 0 {
                    return self.fail(ParseError::InvalidField {
                        field: "dup_length",
                        reason: "unused region length not a multiple of 8",
                    });
                }
                if self.pos + len > self.end {
                    return self.fail(ParseError::InvalidField {
                        field: "dup_length",
                        reason: "unused region runs past entry area",
                    });
                }
                self.pos += len;
                continue;
            }
            let entry = match data_entry_at(self.block, self.pos, self.has_ftype) {
                Ok(e) => e,
                Err(e) => return self.fail(e),
            };
            let size = data_entry_size(entry.name.len(), self.has_ftype);
            if self.pos + size > self.end {
                return self.fail(ParseError::InvalidField {
                    field: "dep_namelen",
                    reason: "entry runs past entry area",
                });
            }
            self.pos += size;
            return Some(Ok(entry));
        }
    }
}

/// Trailer of a single-block directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTail {
    pub count: u32,
    pub stale: u32,
}

impl BlockTail {
    pub fn parse(block: &[u8]) -> Result<Self, ParseError> {
        let at = block
            .len()
            .checked_sub(XFS_DIR2_BLOCK_TAIL_SIZE)
            .ok_or(ParseError::InsufficientData {
                needed: XFS_DIR2_BLOCK_TAIL_SIZE,
                offset: 0,
                actual: block.len(),
            })?;
        let c = ByteCursor::new(block, at);
        let tail = Self {
            count: c.u32(0)?,
            stale: c.u32(4)?,
        };
        if tail.stale > tail.count {
            return Err(ParseError::InvalidField {
                field: "btp_stale",
                reason: "more stale entries than entries",
            });
        }
        Ok(tail)
    }

    /// Byte offset where the leaf array begins.
    pub fn leaf_start(&self, block_len: usize, header_size: usize) -> Result<usize, ParseError> {
        let count = usize::try_from(self.count).map_err(|_| ParseError::IntegerConversion {
            field: "btp_count",
        })?;
        count
            .checked_mul(XFS_DIR2_LEAF_ENTRY_SIZE)
            .and_then(|bytes| bytes.checked_add(XFS_DIR2_BLOCK_TAIL_SIZE))
            .and_then(|bytes| block_len.checked_sub(bytes))
            .filter(|start| *start >= header_size)
            .ok_or(ParseError::InvalidField {
                field: "btp_count",
                reason: "leaf array overlaps block header",
            })
    }
}

// ── Leaf entries ────────────────────────────────────────────────────────────

/// `{hashval, address}` pair; `address` is the entry's directory byte
/// offset divided by 8, zero when stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub hashval: u32,
    pub address: u32,
}

impl LeafEntry {
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.address == XFS_DIR2_NULL_DATAPTR
    }

    /// Directory logical byte offset the entry points at.
    #[must_use]
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.address) << 3
    }
}

/// Zero-copy view over a sorted array of [`LeafEntry`] records.
#[derive(Debug, Clone, Copy)]
pub struct LeafEntries<'a> {
    raw: &'a [u8],
}

impl<'a> LeafEntries<'a> {
    pub fn new(bytes: &'a [u8], offset: usize, count: usize) -> Result<Self, ParseError> {
        let len = count
            .checked_mul(XFS_DIR2_LEAF_ENTRY_SIZE)
            .ok_or(ParseError::InvalidField {
                field: "leaf_count",
                reason: "overflow",
            })?;
        let raw = ByteCursor::new(bytes, offset).bytes(0, len)?;
        Ok(Self { raw })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len() / XFS_DIR2_LEAF_ENTRY_SIZE
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<LeafEntry> {
        let at = index.checked_mul(XFS_DIR2_LEAF_ENTRY_SIZE)?;
        let rec = self.raw.get(at..at.checked_add(XFS_DIR2_LEAF_ENTRY_SIZE)?)?;
        Some(LeafEntry {
            hashval: u32::from_be_bytes([rec[0], rec[1], rec[2], rec[3]]),
            address: u32::from_be_bytes([rec[4], rec[5], rec[6], rec[7]]),
        })
    }

    fn hash_at(&self, index: usize) -> u32 {
        self.get(index).map_or(u32::MAX, |e| e.hashval)
    }

    /// Index of the first entry with `hashval >= hash`, or `len()`.
    ///
    /// Binary search; relies on the array being sorted by hashval.
    #[must_use]
    pub fn lower_bound(&self, hash: u32) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.hash_at(mid) < hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Entries with exactly `hash`, starting at the lower bound. Stale
    /// entries are included; callers skip them.
    #[must_use]
    pub fn hash_run(&self, hash: u32) -> HashRun<'a> {
        HashRun {
            entries: *self,
            index: self.lower_bound(hash),
            hash,
        }
    }

    #[must_use]
    pub fn last_hash(&self) -> Option<u32> {
        self.len().checked_sub(1).and_then(|i| self.get(i)).map(|e| e.hashval)
    }

    pub fn iter(&self) -> impl Iterator<Item = LeafEntry> + 'a {
        let entries = *self;
        (0..entries.len()).filter_map(move |i| entries.get(i))
    }

    /// Whether hashvals are non-decreasing.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        (1..self.len()).all(|i| self.hash_at(i - 1) <= self.hash_at(i))
    }
}

/// Equal-hash run produced by [`LeafEntries::hash_run`].
pub struct HashRun<'a> {
    entries: LeafEntries<'a>,
    index: usize,
    hash: u32,
}

impl HashRun<'_> {
    /// Whether the run was cut off by the end of the array, so it may
    /// continue in a sibling leaf.
    #[must_use]
    pub fn reached_end(&self) -> bool {
        self.index >= self.entries.len()
    }
}

impl Iterator for HashRun<'_> {
    type Item = LeafEntry;

    fn next(&mut self) -> Option<LeafEntry> {
        let entry = self.entries.get(self.index)?;
        if entry.hashval != self.hash {
            return None;
        }
        self.index += 1;
        Some(entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafKind {
    /// Single leaf of a leaf-format directory (`LEAF1`).
    Single,
    /// Leaf under a da-btree node (`LEAFN`).
    Node,
}

/// A leaf block's header and its entry array.
#[derive(Debug, Clone, Copy)]
pub struct LeafBlock<'a> {
    pub kind: LeafKind,
    /// Logical directory block of the next leaf, 0 if none.
    pub forw: u32,
    pub back: u32,
    pub count: u16,
    pub stale: u16,
    pub entries: LeafEntries<'a>,
}

impl<'a> LeafBlock<'a> {
    pub fn parse(block: &'a [u8], v5: bool) -> Result<Self, ParseError> {
        let c = ByteCursor::new(block, 0);
        let magic = c.u16(8)?;
        let kind = match (v5, magic) {
            (false, XFS_DIR2_LEAF1_MAGIC) | (true, XFS_DIR3_LEAF1_MAGIC) => LeafKind::Single,
            (false, XFS_DIR2_LEAFN_MAGIC) | (true, XFS_DIR3_LEAFN_MAGIC) => LeafKind::Node,
            _ => {
                return Err(ParseError::InvalidMagic {
                    expected: u64::from(if v5 {
                        XFS_DIR3_LEAF1_MAGIC
                    } else {
                        XFS_DIR2_LEAF1_MAGIC
                    }),
                    actual: u64::from(magic),
                });
            }
        };
        let (count, stale, hdr) = if v5 {
            (c.u16(56)?, c.u16(58)?, XFS_DIR3_LEAF_HDR_SIZE)
        } else {
            (c.u16(12)?, c.u16(14)?, XFS_DIR2_LEAF_HDR_SIZE_V4)
        };
        if stale > count {
            return Err(ParseError::InvalidField {
                field: "leaf_stale",
                reason: "more stale entries than entries",
            });
        }
        Ok(Self {
            kind,
            forw: c.u32(0)?,
            back: c.u32(4)?,
            count,
            stale,
            entries: LeafEntries::new(block, hdr, usize::from(count))?,
        })
    }
}

/// Peek at the magic of a block in the leaf region without fully parsing.
#[must_use]
pub fn peek_da_magic(block: &[u8]) -> Option<u16> {
    ByteCursor::new(block, 0).u16(8).ok()
}

#[must_use]
pub fn is_da_node_magic(magic: u16) -> bool {
    magic == XFS_DA_NODE_MAGIC || magic == XFS_DA3_NODE_MAGIC
}

#[must_use]
pub fn is_leaf1_magic(magic: u16) -> bool {
    magic == XFS_DIR2_LEAF1_MAGIC || magic == XFS_DIR3_LEAF1_MAGIC
}

// ── da-btree nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaNodeEntry {
    /// Largest hash stored under `before`.
    pub hashval: u32,
    /// Logical directory block of the child.
    pub before: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaNode {
    pub forw: u32,
    pub back: u32,
    pub level: u16,
    pub entries: Vec<DaNodeEntry>,
}

impl DaNode {
    pub fn parse(block: &[u8], v5: bool) -> Result<Self, ParseError> {
        let c = ByteCursor::new(block, 0);
        let magic = c.u16(8)?;
        let expected = if v5 {
            XFS_DA3_NODE_MAGIC
        } else {
            XFS_DA_NODE_MAGIC
        };
        if magic != expected {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(expected),
                actual: u64::from(magic),
            });
        }
        let (count, level, hdr) = if v5 {
            (c.u16(56)?, c.u16(58)?, XFS_DA3_NODE_HDR_SIZE)
        } else {
            (c.u16(12)?, c.u16(14)?, XFS_DA_NODE_HDR_SIZE_V4)
        };
        if level == 0 {
            return Err(ParseError::InvalidField {
                field: "da_level",
                reason: "node block at leaf level",
            });
        }
        let body = c.sub(hdr)?;
        let mut entries = Vec::with_capacity(usize::from(count));
        for i in 0..usize::from(count) {
            let at = i * XFS_DIR2_LEAF_ENTRY_SIZE;
            let entry = DaNodeEntry {
                hashval: body.u32(at)?,
                before: body.u32(at + 4)?,
            };
            if entries
                .last()
                .is_some_and(|prev: &DaNodeEntry| entry.hashval < prev.hashval)
            {
                return Err(ParseError::InvalidField {
                    field: "da_hashval",
                    reason: "node entries not sorted by hash",
                });
            }
            entries.push(entry);
        }
        Ok(Self {
            forw: c.u32(0)?,
            back: c.u32(4)?,
            level,
            entries,
        })
    }

    /// Child that may hold `hash`: the first entry whose hashval is at
    /// least `hash`. `None` when `hash` exceeds every key.
    #[must_use]
    pub fn child_for(&self, hash: u32) -> Option<u32> {
        let idx = self.entries.partition_point(|e| e.hashval < hash);
        self.entries.get(idx).map(|e| e.before)
    }
}

fn verify_crc_at(block: &[u8], offset: usize, field: &'static str) -> Result<(), ParseError> {
    let stored = crate::stored_crc(block, offset).ok_or(ParseError::InsufficientData {
        needed: offset + 4,
        offset: 0,
        actual: block.len(),
    })?;
    if crate::xfs_crc(block, offset) != stored {
        return Err(ParseError::InvalidField {
            field,
            reason: "directory block checksum mismatch",
        });
    }
    Ok(())
}

/// Verify a V5 data or single-block directory block.
pub fn verify_dir3_data_checksum(block: &[u8]) -> Result<(), ParseError> {
    verify_crc_at(block, XFS_DIR3_DATA_CRC_OFFSET, "dir3_data_crc")
}

/// Verify a V5 leaf or da-node block.
pub fn verify_da3_checksum(block: &[u8]) -> Result<(), ParseError> {
    verify_crc_at(block, XFS_DA3_CRC_OFFSET, "da3_crc")
}
