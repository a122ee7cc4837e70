use serde::{Deserialize, Serialize};
use xfs_types::{
    BlockNumber, ByteCursor, FsBlock, GroupNumber, InodeNumber, ParseError, XFS_SB_MAGIC,
    XFS_SB_SIZE_V4, XFS_SB_SIZE_V5, trim_nul_padded,
};

/// Offset of the little-endian CRC inside a V5 superblock sector.
pub const XFS_SB_CRC_OFFSET: usize = 0xE0;

const XFS_SB_VERSION_NUMBITS: u16 = 0x000F;
const XFS_SB_VERSION2_FTYPE: u32 = 0x0000_0200;

// ── Feature flags ───────────────────────────────────────────────────────────

/// V5 incompatible feature word (`sb_features_incompat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct XfsIncompatFeatures(pub u32);

impl XfsIncompatFeatures {
    pub const FTYPE: Self = Self(1 << 0);
    pub const SPINODES: Self = Self(1 << 1);
    pub const META_UUID: Self = Self(1 << 2);
    pub const BIGTIME: Self = Self(1 << 3);
    pub const NEEDSREPAIR: Self = Self(1 << 4);
    pub const NREXT64: Self = Self(1 << 5);

    /// Everything a read-only decoder of this layout understands.
    pub const READABLE: Self = Self(0x3F);

    const NAMES: &'static [(u32, &'static str)] = &[
        (1 << 0, "FTYPE"),
        (1 << 1, "SPINODES"),
        (1 << 2, "META_UUID"),
        (1 << 3, "BIGTIME"),
        (1 << 4, "NEEDSREPAIR"),
        (1 << 5, "NREXT64"),
    ];

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !Self::READABLE.0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::fmt::Display for XfsIncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.describe();
        if names.is_empty() && self.unknown_bits() == 0 {
            return write!(f, "(none)");
        }
        write!(f, "{}", names.join("|"))?;
        let unknown = self.unknown_bits();
        if unknown != 0 {
            if !names.is_empty() {
                write!(f, "|")?;
            }
            write!(f, "0x{unknown:X}")?;
        }
        Ok(())
    }
}

/// On-disk layout generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// Legacy layout, no metadata checksums.
    V4,
    /// CRC-enabled layout (self-describing metadata, v3 inodes).
    V5,
}

impl FormatVersion {
    fn from_versionnum(versionnum: u16) -> Result<Self, ParseError> {
        match versionnum & XFS_SB_VERSION_NUMBITS {
            4 => Ok(Self::V4),
            5 => Ok(Self::V5),
            _ => Err(ParseError::InvalidField {
                field: "sb_versionnum",
                reason: "unsupported superblock version",
            }),
        }
    }
}

/// Where an inode number lands on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeLocation {
    pub group: GroupNumber,
    /// AG-relative inode number (`agino`).
    pub ag_relative: u64,
    /// Block inside the AG holding the inode.
    pub ag_block: u64,
    /// Slot inside that block.
    pub index_in_block: u32,
    /// Absolute byte offset on the device.
    pub byte_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfsSuperblock {
    // ── Geometry ─────────────────────────────────────────────────────────
    pub block_size: u32,
    pub data_blocks: u64,
    pub rt_blocks: u64,
    pub rt_extents: u64,
    pub ag_blocks: u32,
    pub ag_count: u32,
    pub sector_size: u16,
    pub inode_size: u16,
    pub inodes_per_block: u16,
    pub block_log: u8,
    pub sector_log: u8,
    pub inode_log: u8,
    pub inodes_per_block_log: u8,
    pub ag_blocks_log: u8,
    pub rt_extents_log: u8,
    pub dir_block_log: u8,
    pub rt_extent_size: u32,
    pub rbm_blocks: u32,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u32,
    pub uuid: [u8; 16],
    pub volume_name: String,
    pub version_num: u16,
    pub format_version: FormatVersion,
    pub features2: u32,

    // ── Well-known inodes ────────────────────────────────────────────────
    pub root_ino: u64,
    pub rbm_ino: u64,
    pub rsum_ino: u64,

    // ── Log ──────────────────────────────────────────────────────────────
    pub log_start: u64,
    pub log_blocks: u32,

    // ── Counters ─────────────────────────────────────────────────────────
    pub inprogress: u8,
    pub imax_pct: u8,
    pub icount: u64,
    pub ifree: u64,
    pub free_blocks: u64,
    pub free_rt_extents: u64,

    // ── V5 ───────────────────────────────────────────────────────────────
    pub features_compat: u32,
    pub features_ro_compat: u32,
    pub features_incompat: XfsIncompatFeatures,
    pub features_log_incompat: u32,
    pub crc: u32,
    pub meta_uuid: [u8; 16],
}

impl XfsSuperblock {
    /// Parse the superblock from the start of block zero.
    ///
    /// Checks the magic, the version number, and that the block size is a
    /// power of two. Deeper geometry checks live in [`validate_geometry`].
    ///
    /// [`validate_geometry`]: Self::validate_geometry
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < XFS_SB_SIZE_V4 {
            return Err(ParseError::InsufficientData {
                needed: XFS_SB_SIZE_V4,
                offset: 0,
                actual: region.len(),
            });
        }
        let c = ByteCursor::new(region, 0);
        c.expect_u32(0x000, XFS_SB_MAGIC)?;

        let block_size = c.u32(0x004)?;
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(ParseError::InvalidField {
                field: "sb_blocksize",
                reason: "not a power of two",
            });
        }

        let version_num = c.u16(0x064)?;
        let format_version = FormatVersion::from_versionnum(version_num)?;

        let (features_compat, features_ro_compat, features_incompat, features_log_incompat) =
            match format_version {
                FormatVersion::V4 => (0, 0, 0, 0),
                FormatVersion::V5 => {
                    if region.len() < XFS_SB_SIZE_V5 {
                        return Err(ParseError::InsufficientData {
                            needed: XFS_SB_SIZE_V5,
                            offset: 0,
                            actual: region.len(),
                        });
                    }
                    (c.u32(0x0D0)?, c.u32(0x0D4)?, c.u32(0x0D8)?, c.u32(0x0DC)?)
                }
            };
        let (crc, meta_uuid) = match format_version {
            FormatVersion::V4 => (0, [0_u8; 16]),
            FormatVersion::V5 => (
                u32::from_le_bytes(c.fixed::<4>(XFS_SB_CRC_OFFSET)?),
                c.fixed::<16>(0x0F8)?,
            ),
        };

        Ok(Self {
            block_size,
            data_blocks: c.u64(0x008)?,
            rt_blocks: c.u64(0x010)?,
            rt_extents: c.u64(0x018)?,
            ag_blocks: c.u32(0x054)?,
            ag_count: c.u32(0x058)?,
            sector_size: c.u16(0x066)?,
            inode_size: c.u16(0x068)?,
            inodes_per_block: c.u16(0x06A)?,
            block_log: c.u8(0x078)?,
            sector_log: c.u8(0x079)?,
            inode_log: c.u8(0x07A)?,
            inodes_per_block_log: c.u8(0x07B)?,
            ag_blocks_log: c.u8(0x07C)?,
            rt_extents_log: c.u8(0x07D)?,
            dir_block_log: c.u8(0x0C0)?,
            rt_extent_size: c.u32(0x050)?,
            rbm_blocks: c.u32(0x05C)?,

            magic: XFS_SB_MAGIC,
            uuid: c.fixed::<16>(0x020)?,
            volume_name: trim_nul_padded(&c.fixed::<12>(0x06C)?),
            version_num,
            format_version,
            features2: c.u32(0x0C8)?,

            root_ino: c.u64(0x038)?,
            rbm_ino: c.u64(0x040)?,
            rsum_ino: c.u64(0x048)?,

            log_start: c.u64(0x030)?,
            log_blocks: c.u32(0x060)?,

            inprogress: c.u8(0x07E)?,
            imax_pct: c.u8(0x07F)?,
            icount: c.u64(0x080)?,
            ifree: c.u64(0x088)?,
            free_blocks: c.u64(0x090)?,
            free_rt_extents: c.u64(0x098)?,

            features_compat,
            features_ro_compat,
            features_incompat: XfsIncompatFeatures(features_incompat),
            features_log_incompat,
            crc,
            meta_uuid,
        })
    }

    #[must_use]
    pub fn is_v5(&self) -> bool {
        self.format_version == FormatVersion::V5
    }

    /// Whether directory entries carry a file-type byte.
    #[must_use]
    pub fn has_ftype(&self) -> bool {
        match self.format_version {
            FormatVersion::V5 => self.features_incompat.contains(XfsIncompatFeatures::FTYPE),
            FormatVersion::V4 => self.features2 & XFS_SB_VERSION2_FTYPE != 0,
        }
    }

    #[must_use]
    pub fn has_bigtime(&self) -> bool {
        self.is_v5() && self.features_incompat.contains(XfsIncompatFeatures::BIGTIME)
    }

    /// Directory block size in bytes (`blocksize << dirblklog`), or zero
    /// when that does not fit in 32 bits.
    #[must_use]
    pub fn dir_block_size(&self) -> u32 {
        let shift = u32::from(self.dir_block_log.min(32));
        u32::try_from(u64::from(self.block_size) << shift).unwrap_or(0)
    }

    /// Filesystem blocks per directory block.
    #[must_use]
    pub fn dir_block_fsbs(&self) -> u32 {
        1_u32.checked_shl(u32::from(self.dir_block_log)).unwrap_or(0)
    }

    /// Bits of an inode number that address inside one AG.
    #[must_use]
    pub fn agino_bits(&self) -> u32 {
        u32::from(self.ag_blocks_log) + u32::from(self.inodes_per_block_log)
    }

    /// Bytes covered by a full allocation group.
    #[must_use]
    pub fn ag_size_bytes(&self) -> u64 {
        u64::from(self.ag_blocks) * u64::from(self.block_size)
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.data_blocks.saturating_mul(u64::from(self.block_size))
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_blocks.saturating_mul(u64::from(self.block_size))
    }

    /// Map an absolute inode number to its AG and byte offset.
    ///
    /// `bits = agblklog + inopblog`, `ag = ino >> bits`,
    /// `offset = ag * agblocks * blocksize + (ino & mask) * inodesize`.
    pub fn locate_inode(&self, ino: InodeNumber) -> Result<InodeLocation, ParseError> {
        let bits = self.agino_bits();
        if bits >= 64 {
            return Err(ParseError::InvalidField {
                field: "sb_agblklog",
                reason: "inode number bit split exceeds 64 bits",
            });
        }
        let ag = ino.0 >> bits;
        if ag >= u64::from(self.ag_count) {
            return Err(ParseError::InvalidField {
                field: "inode_number",
                reason: "allocation group out of range",
            });
        }
        let ag_relative = ino.0 & ((1_u64 << bits) - 1);
        let ag_block = ag_relative >> self.inodes_per_block_log;
        if ag_block >= u64::from(self.ag_blocks) {
            return Err(ParseError::InvalidField {
                field: "inode_number",
                reason: "inode block beyond allocation group size",
            });
        }
        let index_in_block = u32::try_from(ag_relative & ((1_u64 << self.inodes_per_block_log) - 1))
            .map_err(|_| ParseError::IntegerConversion {
                field: "inode_index",
            })?;

        let ag_base = ag
            .checked_mul(self.ag_size_bytes())
            .ok_or(ParseError::InvalidField {
                field: "inode_number",
                reason: "byte offset overflow",
            })?;
        let byte_offset = ag_relative
            .checked_mul(u64::from(self.inode_size))
            .and_then(|rel| ag_base.checked_add(rel))
            .ok_or(ParseError::InvalidField {
                field: "inode_number",
                reason: "byte offset overflow",
            })?;

        let group = GroupNumber(u32::try_from(ag).map_err(|_| ParseError::IntegerConversion {
            field: "inode_ag",
        })?);

        Ok(InodeLocation {
            group,
            ag_relative,
            ag_block,
            index_in_block,
            byte_offset,
        })
    }

    /// Inverse of [`locate_inode`](Self::locate_inode): which inode starts
    /// at `byte_offset`. `None` if the offset is not inode-aligned or lies
    /// outside the AG range.
    #[must_use]
    pub fn inode_at_offset(&self, byte_offset: u64) -> Option<InodeNumber> {
        let ag_size = self.ag_size_bytes();
        if ag_size == 0 || self.inode_size == 0 {
            return None;
        }
        let ag = byte_offset / ag_size;
        if ag >= u64::from(self.ag_count) {
            return None;
        }
        let within = byte_offset % ag_size;
        if within % u64::from(self.inode_size) != 0 {
            return None;
        }
        let rel = within / u64::from(self.inode_size);
        let bits = self.agino_bits();
        if bits >= 64 || rel >> bits != 0 {
            return None;
        }
        Some(InodeNumber((ag << bits) | rel))
    }

    /// Translate an encoded filesystem block (`agno << agblklog | agbno`)
    /// into a linear device block.
    #[must_use]
    pub fn fsb_to_block(&self, fsb: FsBlock) -> Option<BlockNumber> {
        let shift = u32::from(self.ag_blocks_log);
        if shift >= 64 {
            return None;
        }
        let agno = fsb.0 >> shift;
        let agbno = fsb.0 & ((1_u64 << shift) - 1);
        if agno >= u64::from(self.ag_count) || agbno >= u64::from(self.ag_blocks) {
            return None;
        }
        agno.checked_mul(u64::from(self.ag_blocks))
            .and_then(|base| base.checked_add(agbno))
            .map(BlockNumber)
    }

    /// First linear block of an allocation group.
    #[must_use]
    pub fn ag_start_block(&self, group: GroupNumber) -> BlockNumber {
        BlockNumber(u64::from(group.0) * u64::from(self.ag_blocks))
    }

    /// Length of an AG in blocks; the last AG may be short.
    #[must_use]
    pub fn ag_length(&self, group: GroupNumber) -> u32 {
        let start = self.ag_start_block(group).0;
        let remaining = self.data_blocks.saturating_sub(start);
        u32::try_from(remaining.min(u64::from(self.ag_blocks))).unwrap_or(self.ag_blocks)
    }

    /// The logarithms every block and directory offset computation shifts
    /// by. Checked at mount even when other validation is skipped.
    pub fn validate_addressing(&self) -> Result<(), ParseError> {
        if 1_u32.checked_shl(u32::from(self.block_log)) != Some(self.block_size) {
            return Err(ParseError::InvalidField {
                field: "sb_blocklog",
                reason: "does not match block size",
            });
        }
        if self.dir_block_log > 16 || !(1..=65536).contains(&self.dir_block_size()) {
            return Err(ParseError::InvalidField {
                field: "sb_dirblklog",
                reason: "directory block larger than 64KiB",
            });
        }
        Ok(())
    }

    /// Mount-time geometry checks beyond what parsing enforces.
    pub fn validate_geometry(&self) -> Result<(), ParseError> {
        if !(512..=65536).contains(&self.block_size) {
            return Err(ParseError::InvalidField {
                field: "sb_blocksize",
                reason: "out of range 512..=65536",
            });
        }
        self.validate_addressing()?;
        if self.sector_size == 0
            || !self.sector_size.is_power_of_two()
            || u32::from(self.sector_size) > self.block_size
        {
            return Err(ParseError::InvalidField {
                field: "sb_sectsize",
                reason: "must be a power of two no larger than the block size",
            });
        }
        let min_inode = match self.format_version {
            FormatVersion::V4 => 256,
            FormatVersion::V5 => 512,
        };
        if !(min_inode..=2048).contains(&self.inode_size)
            || 1_u32.checked_shl(u32::from(self.inode_log)) != Some(u32::from(self.inode_size))
        {
            return Err(ParseError::InvalidField {
                field: "sb_inodesize",
                reason: "invalid inode size",
            });
        }
        if 1_u32.checked_shl(u32::from(self.inodes_per_block_log))
            != Some(u32::from(self.inodes_per_block))
            || u32::from(self.inodes_per_block) * u32::from(self.inode_size) != self.block_size
        {
            return Err(ParseError::InvalidField {
                field: "sb_inopblock",
                reason: "inodes per block inconsistent with block and inode size",
            });
        }
        if self.ag_count == 0 {
            return Err(ParseError::InvalidField {
                field: "sb_agcount",
                reason: "zero allocation groups",
            });
        }
        if self.ag_blocks == 0
            || self.ag_blocks_log >= 32
            || u64::from(self.ag_blocks) > 1_u64 << self.ag_blocks_log
        {
            return Err(ParseError::InvalidField {
                field: "sb_agblocks",
                reason: "inconsistent with sb_agblklog",
            });
        }
        if u64::from(self.ag_count - 1) * u64::from(self.ag_blocks) >= self.data_blocks {
            return Err(ParseError::InvalidField {
                field: "sb_agcount",
                reason: "allocation groups beyond the end of the filesystem",
            });
        }
        let ag_capacity = u64::from(self.ag_count) * u64::from(self.ag_blocks);
        if self.data_blocks > ag_capacity {
            return Err(ParseError::InvalidField {
                field: "sb_dblocks",
                reason: "more blocks than the allocation groups hold",
            });
        }
        self.locate_inode(InodeNumber(self.root_ino))
            .map_err(|_| ParseError::InvalidField {
                field: "sb_rootino",
                reason: "root inode does not resolve",
            })?;
        Ok(())
    }

    /// Reject V5 images with incompat feature bits this reader cannot decode.
    pub fn validate_features(&self) -> Result<(), ParseError> {
        if self.is_v5() && self.features_incompat.unknown_bits() != 0 {
            return Err(ParseError::InvalidField {
                field: "sb_features_incompat",
                reason: "unsupported incompatible feature",
            });
        }
        Ok(())
    }

    /// Verify the V5 superblock CRC over the whole first sector.
    ///
    /// V4 has no checksum and always passes.
    pub fn validate_checksum(&self, raw_sector: &[u8]) -> Result<(), ParseError> {
        if !self.is_v5() {
            return Ok(());
        }
        let len = usize::from(self.sector_size);
        if raw_sector.len() < len {
            return Err(ParseError::InsufficientData {
                needed: len,
                offset: 0,
                actual: raw_sector.len(),
            });
        }
        if crate::xfs_crc(&raw_sector[..len], XFS_SB_CRC_OFFSET) != self.crc {
            return Err(ParseError::InvalidField {
                field: "sb_crc",
                reason: "superblock checksum mismatch",
            });
        }
        Ok(())
    }
}
