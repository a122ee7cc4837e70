//! Block map: packed extent records and the bmap btree.

use serde::{Deserialize, Serialize};
use xfs_types::{ByteCursor, FsBlock, ParseError, XFS_BMAP_CRC_MAGIC, XFS_BMAP_MAGIC};

/// Size of one packed extent record (`xfs_bmbt_rec`).
pub const XFS_BMBT_REC_SIZE: usize = 16;
/// Long-form btree block header, V4.
pub const XFS_BMBT_BLOCK_LEN_V4: usize = 24;
/// Long-form btree block header, V5 (adds blkno, lsn, uuid, owner, crc).
pub const XFS_BMBT_BLOCK_LEN_V5: usize = 72;
pub const XFS_BMBT_CRC_OFFSET: usize = 64;
/// Deepest bmap btree the reader will descend.
pub const XFS_BMBT_MAX_LEVELS: u16 = 9;

const NULL_FSBLOCK: u64 = u64::MAX;
const STARTOFF_MASK: u64 = (1 << 54) - 1;
const BLOCKCOUNT_MASK: u64 = (1 << 21) - 1;

/// One mapping of file blocks onto filesystem blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmbtExtent {
    /// First logical file block covered.
    pub file_offset: u64,
    pub start_block: FsBlock,
    pub block_count: u32,
    /// Preallocated, reads as zeros.
    pub unwritten: bool,
}

impl BmbtExtent {
    /// One past the last logical block covered.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.file_offset.saturating_add(u64::from(self.block_count))
    }

    #[must_use]
    pub fn contains(&self, logical: u64) -> bool {
        logical >= self.file_offset && logical < self.end()
    }
}

/// Decode one 128-bit extent record.
///
/// Layout from the most significant bit: unwritten flag (1), file offset
/// (54), start block (52), block count (21).
pub fn parse_extent_record(bytes: &[u8], offset: usize) -> Result<BmbtExtent, ParseError> {
    let c = ByteCursor::new(bytes, offset);
    let l0 = c.u64(0)?;
    let l1 = c.u64(8)?;
    let block_count = u32::try_from(l1 & BLOCKCOUNT_MASK).map_err(|_| {
        ParseError::IntegerConversion {
            field: "bmbt_blockcount",
        }
    })?;
    Ok(BmbtExtent {
        file_offset: (l0 >> 9) & STARTOFF_MASK,
        start_block: FsBlock(((l0 & 0x1FF) << 43) | (l1 >> 21)),
        block_count,
        unwritten: l0 >> 63 == 1,
    })
}

/// Decode `count` consecutive extent records and check they are sorted
/// and non-overlapping.
pub fn parse_extent_list(bytes: &[u8], count: usize) -> Result<Vec<BmbtExtent>, ParseError> {
    let needed = count
        .checked_mul(XFS_BMBT_REC_SIZE)
        .ok_or(ParseError::InvalidField {
            field: "nextents",
            reason: "overflow",
        })?;
    if needed > bytes.len() {
        return Err(ParseError::InsufficientData {
            needed,
            offset: 0,
            actual: bytes.len(),
        });
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let ext = parse_extent_record(bytes, i * XFS_BMBT_REC_SIZE)?;
        if ext.block_count == 0 {
            return Err(ParseError::InvalidField {
                field: "bmbt_blockcount",
                reason: "zero-length extent",
            });
        }
        if let Some(prev) = out.last().map(BmbtExtent::end) {
            if ext.file_offset < prev {
                return Err(ParseError::InvalidField {
                    field: "bmbt_startoff",
                    reason: "extents overlap or are out of order",
                });
            }
        }
        out.push(ext);
    }
    Ok(out)
}

/// Extent covering `logical`, by binary search over a sorted list.
#[must_use]
pub fn find_extent(extents: &[BmbtExtent], logical: u64) -> Option<&BmbtExtent> {
    let idx = extents.partition_point(|e| e.file_offset <= logical);
    let candidate = extents.get(idx.checked_sub(1)?)?;
    candidate.contains(logical).then_some(candidate)
}

/// Interior level of the bmap btree: separator keys and child pointers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmbtNode {
    pub level: u16,
    /// Lowest file offset reachable through the matching pointer.
    pub keys: Vec<u64>,
    pub ptrs: Vec<FsBlock>,
}

impl BmbtNode {
    /// Child whose key range covers `logical`.
    #[must_use]
    pub fn child_for(&self, logical: u64) -> Option<FsBlock> {
        let idx = self.keys.partition_point(|k| *k <= logical);
        self.ptrs.get(idx.checked_sub(1)?).copied()
    }

    fn parse_arrays(
        c: ByteCursor<'_>,
        level: u16,
        numrecs: u16,
        maxrecs: usize,
    ) -> Result<Self, ParseError> {
        let n = usize::from(numrecs);
        if n == 0 || n > maxrecs {
            return Err(ParseError::InvalidField {
                field: "bb_numrecs",
                reason: "record count exceeds node capacity",
            });
        }
        let ptr_base = maxrecs * 8;
        let mut keys = Vec::with_capacity(n);
        let mut ptrs = Vec::with_capacity(n);
        for i in 0..n {
            let key = c.u64(i * 8)?;
            if keys.last().is_some_and(|prev| key <= *prev) {
                return Err(ParseError::InvalidField {
                    field: "bmbt_key",
                    reason: "keys not strictly increasing",
                });
            }
            keys.push(key);
            ptrs.push(FsBlock(c.u64(ptr_base + i * 8)?));
        }
        Ok(Self { level, keys, ptrs })
    }
}

/// Btree root stored in an inode's data fork (`xfs_bmdr_block`).
pub type BmbtRoot = BmbtNode;

/// Parse the in-inode root from the whole data fork area.
///
/// Pointers begin after as many keys as the fork could hold:
/// `maxrecs = (fork_size - 4) / 16`.
pub fn parse_bmbt_root(fork: &[u8]) -> Result<BmbtRoot, ParseError> {
    let c = ByteCursor::new(fork, 0);
    let level = c.u16(0)?;
    let numrecs = c.u16(2)?;
    if level == 0 || level > XFS_BMBT_MAX_LEVELS {
        return Err(ParseError::InvalidField {
            field: "bb_level",
            reason: "invalid bmap root level",
        });
    }
    let maxrecs = fork.len().saturating_sub(4) / 16;
    BmbtNode::parse_arrays(c.sub(4)?, level, numrecs, maxrecs)
}

/// A bmap btree block read from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BmbtBlock {
    Leaf {
        extents: Vec<BmbtExtent>,
        right_sibling: Option<FsBlock>,
    },
    Node(BmbtNode),
}

/// Parse a long-form bmap btree block (`BMAP` on V4, `BMA3` on V5).
pub fn parse_bmbt_block(block: &[u8], v5: bool) -> Result<BmbtBlock, ParseError> {
    let (magic, hdr) = if v5 {
        (XFS_BMAP_CRC_MAGIC, XFS_BMBT_BLOCK_LEN_V5)
    } else {
        (XFS_BMAP_MAGIC, XFS_BMBT_BLOCK_LEN_V4)
    };
    let c = ByteCursor::new(block, 0);
    c.expect_u32(0, magic)?;
    let level = c.u16(4)?;
    let numrecs = c.u16(6)?;
    let right = c.u64(16)?;
    if level > XFS_BMBT_MAX_LEVELS {
        return Err(ParseError::InvalidField {
            field: "bb_level",
            reason: "bmap btree too deep",
        });
    }
    let body = c.sub(hdr)?;
    if level == 0 {
        let recs = body.bytes(0, usize::from(numrecs) * XFS_BMBT_REC_SIZE)?;
        let extents = parse_extent_list(recs, usize::from(numrecs))?;
        Ok(BmbtBlock::Leaf {
            extents,
            right_sibling: (right != NULL_FSBLOCK).then_some(FsBlock(right)),
        })
    } else {
        let maxrecs = block.len().saturating_sub(hdr) / 16;
        Ok(BmbtBlock::Node(BmbtNode::parse_arrays(
            body, level, numrecs, maxrecs,
        )?))
    }
}

/// Verify the CRC of a V5 bmap btree block.
pub fn verify_bmbt_checksum(block: &[u8]) -> Result<(), ParseError> {
    let stored = crate::stored_crc(block, XFS_BMBT_CRC_OFFSET).ok_or(
        ParseError::InsufficientData {
            needed: XFS_BMBT_CRC_OFFSET + 4,
            offset: 0,
            actual: block.len(),
        },
    )?;
    if crate::xfs_crc(block, XFS_BMBT_CRC_OFFSET) != stored {
        return Err(ParseError::InvalidField {
            field: "bb_crc",
            reason: "bmap btree block checksum mismatch",
        });
    }
    Ok(())
}
