#![forbid(unsafe_code)]
//! On-disk format parsing for XFS structures.
//!
//! Pure parsing crate: no I/O, no side effects. Parses byte slices into
//! typed Rust structures for the superblock, allocation group headers,
//! inodes and their forks, bmap btree blocks, and every directory encoding.

pub mod ag;
pub mod bmap;
pub mod dir;
pub mod inode;
pub mod superblock;

pub use ag::{XfsAgf, XfsAgi, verify_agf_checksum, verify_agi_checksum};
pub use bmap::{
    BmbtBlock, BmbtExtent, BmbtNode, BmbtRoot, find_extent, parse_bmbt_block, parse_bmbt_root,
    parse_extent_list, parse_extent_record, verify_bmbt_checksum,
};
pub use dir::{
    BlockTail, DaNode, DaNodeEntry, DataBlockHeader, DataEntry, DataEntryIter, DirFileType,
    HashRun, LeafBlock, LeafEntries, LeafEntry, LeafKind, ShortformDir, ShortformEntry,
    ShortformIter, data_entry_at, data_entry_size, dir_hash, is_da_node_magic, is_leaf1_magic,
    peek_da_magic, verify_da3_checksum, verify_dir3_data_checksum,
};
pub use inode::{DataFork, FileKind, XfsInode, XfsTimestamp, verify_inode_checksum};
pub use superblock::{FormatVersion, InodeLocation, XfsIncompatFeatures, XfsSuperblock};

/// CRC32C of `buf` with the 4-byte checksum field at `crc_offset` treated
/// as zero. Matches how every V5 metadata structure is checksummed.
#[must_use]
pub fn xfs_crc(buf: &[u8], crc_offset: usize) -> u32 {
    if crc_offset.saturating_add(4) > buf.len() {
        return crc32c::crc32c(buf);
    }
    let crc = crc32c::crc32c(&buf[..crc_offset]);
    let crc = crc32c::crc32c_append(crc, &[0_u8; 4]);
    crc32c::crc32c_append(crc, &buf[crc_offset + 4..])
}

/// Stored little-endian CRC at `crc_offset`, if the buffer holds it.
pub(crate) fn stored_crc(buf: &[u8], crc_offset: usize) -> Option<u32> {
    let bytes = buf.get(crc_offset..crc_offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
