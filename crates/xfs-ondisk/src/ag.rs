//! Allocation group headers.
//!
//! Each AG starts with four sectors: a superblock copy, the AGF (free space),
//! the AGI (inodes), and the AGFL. Only AGF and AGI are decoded here.

use serde::{Deserialize, Serialize};
use xfs_types::{ByteCursor, GroupNumber, ParseError, XFS_AGF_MAGIC, XFS_AGI_MAGIC};

pub const XFS_AGF_CRC_OFFSET: usize = 216;
pub const XFS_AGI_CRC_OFFSET: usize = 312;

const XFS_AGF_SIZE_V4: usize = 64;
const XFS_AGF_SIZE_V5: usize = 224;
const XFS_AGI_SIZE_V4: usize = 296;
const XFS_AGI_SIZE_V5: usize = 344;

/// Free-space header (`xfs_agf`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfsAgf {
    pub version: u32,
    pub seqno: u32,
    pub length: u32,
    pub bno_root: u32,
    pub cnt_root: u32,
    pub bno_level: u32,
    pub cnt_level: u32,
    pub fl_count: u32,
    pub free_blocks: u32,
    pub longest: u32,
    pub btree_blocks: u32,
    pub uuid: Option<[u8; 16]>,
    pub crc: Option<u32>,
}

impl XfsAgf {
    pub fn parse(bytes: &[u8], v5: bool) -> Result<Self, ParseError> {
        let needed = if v5 { XFS_AGF_SIZE_V5 } else { XFS_AGF_SIZE_V4 };
        if bytes.len() < needed {
            return Err(ParseError::InsufficientData {
                needed,
                offset: 0,
                actual: bytes.len(),
            });
        }
        let c = ByteCursor::new(bytes, 0);
        c.expect_u32(0, XFS_AGF_MAGIC)?;
        let version = c.u32(4)?;
        if version != 1 {
            return Err(ParseError::InvalidField {
                field: "agf_versionnum",
                reason: "unsupported AGF version",
            });
        }
        let (uuid, crc) = if v5 {
            (
                Some(c.fixed::<16>(64)?),
                crate::stored_crc(bytes, XFS_AGF_CRC_OFFSET),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            version,
            seqno: c.u32(8)?,
            length: c.u32(12)?,
            bno_root: c.u32(16)?,
            cnt_root: c.u32(20)?,
            bno_level: c.u32(28)?,
            cnt_level: c.u32(32)?,
            fl_count: c.u32(48)?,
            free_blocks: c.u32(52)?,
            longest: c.u32(56)?,
            btree_blocks: c.u32(60)?,
            uuid,
            crc,
        })
    }

    /// Cross-check the header against the AG it was read from.
    pub fn validate(&self, group: GroupNumber, ag_length: u32) -> Result<(), ParseError> {
        if self.seqno != group.0 {
            return Err(ParseError::InvalidField {
                field: "agf_seqno",
                reason: "does not match allocation group index",
            });
        }
        if self.length != ag_length {
            return Err(ParseError::InvalidField {
                field: "agf_length",
                reason: "does not match allocation group size",
            });
        }
        if self.free_blocks > self.length || self.longest > self.free_blocks {
            return Err(ParseError::InvalidField {
                field: "agf_freeblks",
                reason: "free space exceeds allocation group",
            });
        }
        Ok(())
    }
}

/// Inode allocation header (`xfs_agi`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfsAgi {
    pub version: u32,
    pub seqno: u32,
    pub length: u32,
    pub count: u32,
    pub root: u32,
    pub level: u32,
    pub free_count: u32,
    pub new_ino: u32,
    pub dir_ino: u32,
    pub uuid: Option<[u8; 16]>,
    pub crc: Option<u32>,
    /// Free inode btree root and level (V5 with finobt).
    pub free_root: Option<u32>,
    pub free_level: Option<u32>,
}

impl XfsAgi {
    pub fn parse(bytes: &[u8], v5: bool) -> Result<Self, ParseError> {
        let needed = if v5 { XFS_AGI_SIZE_V5 } else { XFS_AGI_SIZE_V4 };
        if bytes.len() < needed {
            return Err(ParseError::InsufficientData {
                needed,
                offset: 0,
                actual: bytes.len(),
            });
        }
        let c = ByteCursor::new(bytes, 0);
        c.expect_u32(0, XFS_AGI_MAGIC)?;
        let version = c.u32(4)?;
        if version != 1 {
            return Err(ParseError::InvalidField {
                field: "agi_versionnum",
                reason: "unsupported AGI version",
            });
        }
        let count = c.u32(16)?;
        let free_count = c.u32(28)?;
        if free_count > count {
            return Err(ParseError::InvalidField {
                field: "agi_freecount",
                reason: "more free inodes than allocated",
            });
        }
        let (uuid, crc, free_root, free_level) = if v5 {
            (
                Some(c.fixed::<16>(296)?),
                crate::stored_crc(bytes, XFS_AGI_CRC_OFFSET),
                Some(c.u32(328)?),
                Some(c.u32(332)?),
            )
        } else {
            (None, None, None, None)
        };
        Ok(Self {
            version,
            seqno: c.u32(8)?,
            length: c.u32(12)?,
            count,
            root: c.u32(20)?,
            level: c.u32(24)?,
            free_count,
            new_ino: c.u32(32)?,
            dir_ino: c.u32(36)?,
            uuid,
            crc,
            free_root,
            free_level,
        })
    }

    pub fn validate(&self, group: GroupNumber) -> Result<(), ParseError> {
        if self.seqno != group.0 {
            return Err(ParseError::InvalidField {
                field: "agi_seqno",
                reason: "does not match allocation group index",
            });
        }
        Ok(())
    }
}

fn verify_sector_crc(
    raw: &[u8],
    crc_offset: usize,
    field: &'static str,
) -> Result<(), ParseError> {
    let stored = crate::stored_crc(raw, crc_offset).ok_or(ParseError::InsufficientData {
        needed: crc_offset + 4,
        offset: 0,
        actual: raw.len(),
    })?;
    if crate::xfs_crc(raw, crc_offset) != stored {
        return Err(ParseError::InvalidField {
            field,
            reason: "checksum mismatch",
        });
    }
    Ok(())
}

/// Verify a V5 AGF sector. `raw` is exactly one sector.
pub fn verify_agf_checksum(raw: &[u8]) -> Result<(), ParseError> {
    verify_sector_crc(raw, XFS_AGF_CRC_OFFSET, "agf_crc")
}

/// Verify a V5 AGI sector. `raw` is exactly one sector.
pub fn verify_agi_checksum(raw: &[u8]) -> Result<(), ParseError> {
    verify_sector_crc(raw, XFS_AGI_CRC_OFFSET, "agi_crc")
}
