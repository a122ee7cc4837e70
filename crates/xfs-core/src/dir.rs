//! Directory resolution across the five on-disk encodings.
//!
//! Lookups are hash-directed: node levels are descended by hash, the leaf
//! entry array is binary searched, and only data blocks named by a matching
//! leaf entry are ever read. Listing walks data blocks lazily.

use crate::{DirEntry, FileType, OpenFs, Result, XfsError, corruption, inode_kind};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::trace;
use xfs_ondisk::{
    BlockTail, DaNode, DataBlockHeader, DataEntryIter, DataFork, DirFileType, HashRun, LeafBlock,
    LeafEntries, LeafKind, ShortformDir, XfsInode, data_entry_at, dir_hash, is_da_node_magic,
    is_leaf1_magic, peek_da_magic, verify_da3_checksum, verify_dir3_data_checksum,
};
use xfs_types::{BlockNumber, InodeNumber, ParseError, XFS_DIR2_LEAF_OFFSET, XFS_NAME_MAX};

/// Deepest da-btree the kernel will build.
const XFS_DA_NODE_MAXDEPTH: usize = 5;

/// How a directory stores its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectoryFormat {
    /// Entries inline in the inode's data fork.
    Shortform,
    /// One directory block holding entries, leaf array and tail.
    Block,
    /// Data blocks plus a single `LEAF1` block.
    Leaf,
    /// Data blocks plus a da-btree of `LEAFN` blocks.
    Node,
    /// Node or leaf layout whose block map is itself a bmap btree.
    Btree,
}

impl DirectoryFormat {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Shortform => "shortform",
            Self::Block => "block",
            Self::Leaf => "leaf",
            Self::Node => "node",
            Self::Btree => "btree",
        }
    }
}

/// What sits at the start of the leaf region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    /// Nothing mapped: a single-block directory.
    SingleBlock,
    Leaf,
    Node,
}

/// One directory block, possibly spanning several filesystem blocks.
struct DirBlock {
    data: Vec<u8>,
    /// First device block, for error context.
    device_block: BlockNumber,
}

/// Entry decoded from disk, file type not yet resolved.
struct RawEntry {
    ino: u64,
    pos: u64,
    name: Vec<u8>,
    ftype: Option<DirFileType>,
}

impl OpenFs {
    /// First filesystem block of the leaf region (byte offset 32 GiB).
    fn leaf_region_fsb(&self) -> u64 {
        XFS_DIR2_LEAF_OFFSET >> self.sb.block_log
    }

    fn dir_corruption(&self, dir: &XfsInode, e: &ParseError) -> XfsError {
        let block = self
            .sb
            .locate_inode(dir.ino)
            .map_or(0, |loc| loc.byte_offset / u64::from(self.sb.block_size));
        XfsError::Corruption {
            block,
            detail: format!("directory inode {}: {e}", dir.ino),
        }
    }

    /// Read the directory block starting at logical filesystem block
    /// `first_fsb`. `None` when that block is a hole.
    fn read_dir_block(&self, dir: &XfsInode, first_fsb: u64) -> Result<Option<DirBlock>> {
        let fsbs = u64::from(self.geometry.dir_block_fsbs);
        let capacity = usize::try_from(self.geometry.dir_block_size).unwrap_or_default();
        let mut data = Vec::with_capacity(capacity);
        let mut device_block = None;
        let mut done = 0_u64;
        while done < fsbs {
            let Some(m) = self.map_block(dir, first_fsb + done)? else {
                if done == 0 {
                    return Ok(None);
                }
                return Err(XfsError::Corruption {
                    block: device_block.map_or(0, |b: BlockNumber| b.0),
                    detail: format!(
                        "directory {} block at {first_fsb} is partially mapped",
                        dir.ino
                    ),
                });
            };
            if m.unwritten {
                return Err(XfsError::Corruption {
                    block: m.block.0,
                    detail: format!("directory {} maps an unwritten extent", dir.ino),
                });
            }
            let run = m.contiguous.min(fsbs - done);
            let count = u32::try_from(run).map_err(|_| XfsError::Corruption {
                block: m.block.0,
                detail: "directory block run overflows u32".into(),
            })?;
            data.extend_from_slice(&self.reader.read_blocks_vec(m.block, count)?);
            device_block.get_or_insert(m.block);
            done += run;
        }
        trace!(ino = dir.ino.0, fsb = first_fsb, "read directory block");
        Ok(device_block.map(|device_block| DirBlock { data, device_block }))
    }

    fn index_kind(&self, dir: &XfsInode) -> Result<IndexKind> {
        let Some(blk) = self.read_dir_block(dir, self.leaf_region_fsb())? else {
            return Ok(IndexKind::SingleBlock);
        };
        match peek_da_magic(&blk.data) {
            Some(m) if is_leaf1_magic(m) => Ok(IndexKind::Leaf),
            Some(m) if is_da_node_magic(m) => Ok(IndexKind::Node),
            other => Err(XfsError::Corruption {
                block: blk.device_block.0,
                detail: format!(
                    "directory {} leaf region starts with magic {:#06x}",
                    dir.ino,
                    other.unwrap_or(0)
                ),
            }),
        }
    }

    /// Which of the five encodings `dir` uses.
    pub fn directory_format(&self, dir: &XfsInode) -> Result<DirectoryFormat> {
        if !dir.is_dir() {
            return Err(XfsError::NotDirectory);
        }
        match &dir.data_fork {
            DataFork::Local(_) => Ok(DirectoryFormat::Shortform),
            DataFork::Btree(_) => Ok(DirectoryFormat::Btree),
            DataFork::Extents(_) => Ok(match self.index_kind(dir)? {
                IndexKind::SingleBlock => DirectoryFormat::Block,
                IndexKind::Leaf => DirectoryFormat::Leaf,
                IndexKind::Node => DirectoryFormat::Node,
            }),
            DataFork::Device(_) => Err(XfsError::Format(format!(
                "directory {} has a device data fork",
                dir.ino
            ))),
        }
    }

    fn check_data_block(&self, blk: &DirBlock) -> Result<DataBlockHeader> {
        if self.sb.is_v5() {
            self.check(blk.device_block, verify_dir3_data_checksum(&blk.data))?;
        }
        DataBlockHeader::parse(&blk.data, self.sb.is_v5())
            .map_err(|e| corruption(blk.device_block, &e))
    }

    fn check_da_block(&self, blk: &DirBlock) -> Result<()> {
        if self.sb.is_v5() {
            self.check(blk.device_block, verify_da3_checksum(&blk.data))?;
        }
        Ok(())
    }

    /// Look up `name` in directory inode `dir`. `Ok(None)` when absent.
    pub(crate) fn lookup_in(&self, dir: &XfsInode, name: &[u8]) -> Result<Option<InodeNumber>> {
        if !dir.is_dir() {
            return Err(XfsError::NotDirectory);
        }
        if name.len() > XFS_NAME_MAX {
            return Err(XfsError::NameTooLong);
        }
        if name.is_empty() {
            return Ok(None);
        }
        let hash = dir_hash(name);
        trace!(
            ino = dir.ino.0,
            name = %String::from_utf8_lossy(name),
            hash,
            "directory lookup"
        );
        let found = match &dir.data_fork {
            DataFork::Local(fork) => ShortformDir::parse(fork, self.sb.has_ftype())
                .and_then(|sf| sf.lookup(dir.ino.0, name))
                .map_err(|e| self.dir_corruption(dir, &e))?,
            DataFork::Extents(_) | DataFork::Btree(_) => match self.index_kind(dir)? {
                IndexKind::SingleBlock => self.block_lookup(dir, name, hash)?,
                IndexKind::Leaf => self.leaf_lookup(dir, name, hash)?,
                IndexKind::Node => self.node_lookup(dir, name, hash)?,
            },
            DataFork::Device(_) => {
                return Err(XfsError::Format(format!(
                    "directory {} has a device data fork",
                    dir.ino
                )));
            }
        };
        Ok(found.map(InodeNumber))
    }

    fn block_lookup(&self, dir: &XfsInode, name: &[u8], hash: u32) -> Result<Option<u64>> {
        let blk = self.read_dir_block(dir, 0)?.ok_or_else(|| XfsError::Corruption {
            block: 0,
            detail: format!("block directory {} has no block 0", dir.ino),
        })?;
        let hdr = self.check_data_block(&blk)?;
        let at = blk.device_block;
        if !hdr.is_block {
            return Err(XfsError::Corruption {
                block: at.0,
                detail: format!("directory {} block 0 is not a single-block directory", dir.ino),
            });
        }
        let tail = BlockTail::parse(&blk.data).map_err(|e| corruption(at, &e))?;
        let start = tail
            .leaf_start(blk.data.len(), hdr.header_size)
            .map_err(|e| corruption(at, &e))?;
        let count = usize::try_from(tail.count).map_err(|_| XfsError::Corruption {
            block: at.0,
            detail: format!("leaf count {} overflows usize", tail.count),
        })?;
        let leaf =
            LeafEntries::new(&blk.data, start, count).map_err(|e| corruption(at, &e))?;
        let dir_block_size = u64::from(self.geometry.dir_block_size);
        for entry in leaf.hash_run(hash).filter(|e| !e.is_stale()) {
            let byte = entry.byte_offset();
            let off = usize::try_from(byte)
                .ok()
                .filter(|_| byte < dir_block_size)
                .ok_or_else(|| XfsError::Corruption {
                    block: at.0,
                    detail: format!("leaf address {byte:#x} outside the directory block"),
                })?;
            let found = data_entry_at(&blk.data, off, self.sb.has_ftype())
                .map_err(|e| corruption(at, &e))?;
            if found.name == name {
                return Ok(Some(found.ino));
            }
        }
        Ok(None)
    }

    fn leaf_lookup(&self, dir: &XfsInode, name: &[u8], hash: u32) -> Result<Option<u64>> {
        let blk = self
            .read_dir_block(dir, self.leaf_region_fsb())?
            .ok_or_else(|| XfsError::Corruption {
                block: 0,
                detail: format!("leaf directory {} lost its leaf block", dir.ino),
            })?;
        self.check_da_block(&blk)?;
        let leaf = LeafBlock::parse(&blk.data, self.sb.is_v5())
            .map_err(|e| corruption(blk.device_block, &e))?;
        if leaf.kind != LeafKind::Single {
            return Err(XfsError::Corruption {
                block: blk.device_block.0,
                detail: "node leaf where a single leaf was expected".into(),
            });
        }
        let mut data_cache = None;
        self.match_run(dir, &mut leaf.entries.hash_run(hash), name, &mut data_cache)
    }

    fn node_lookup(&self, dir: &XfsInode, name: &[u8], hash: u32) -> Result<Option<u64>> {
        let mut fsb = self.leaf_region_fsb();
        let mut parent_level = u16::MAX;
        for _ in 0..=XFS_DA_NODE_MAXDEPTH {
            let blk = self.read_dir_block(dir, fsb)?.ok_or_else(|| XfsError::Corruption {
                block: 0,
                detail: format!("directory {} da-btree points at hole {fsb}", dir.ino),
            })?;
            self.check_da_block(&blk)?;
            let magic = peek_da_magic(&blk.data).unwrap_or(0);
            if !is_da_node_magic(magic) {
                return self.leafn_lookup(dir, blk, fsb, name, hash);
            }
            let node = DaNode::parse(&blk.data, self.sb.is_v5())
                .map_err(|e| corruption(blk.device_block, &e))?;
            if node.level >= parent_level {
                return Err(XfsError::Corruption {
                    block: blk.device_block.0,
                    detail: format!(
                        "da node level {} under level {parent_level}",
                        node.level
                    ),
                });
            }
            parent_level = node.level;
            match node.child_for(hash) {
                Some(before) => fsb = u64::from(before),
                None => return Ok(None),
            }
        }
        Err(XfsError::Corruption {
            block: 0,
            detail: format!("directory {} da-btree deeper than {XFS_DA_NODE_MAXDEPTH}", dir.ino),
        })
    }

    /// Scan the equal-hash run starting in `blk`, following forward
    /// siblings while the run reaches the end of a leaf.
    fn leafn_lookup(
        &self,
        dir: &XfsInode,
        mut blk: DirBlock,
        mut fsb: u64,
        name: &[u8],
        hash: u32,
    ) -> Result<Option<u64>> {
        let mut visited = HashSet::new();
        let mut data_cache = None;
        loop {
            if !visited.insert(fsb) {
                return Err(XfsError::Corruption {
                    block: blk.device_block.0,
                    detail: format!("directory {} leaf sibling chain loops", dir.ino),
                });
            }
            let leaf = LeafBlock::parse(&blk.data, self.sb.is_v5())
                .map_err(|e| corruption(blk.device_block, &e))?;
            if leaf.kind != LeafKind::Node {
                return Err(XfsError::Corruption {
                    block: blk.device_block.0,
                    detail: "single leaf below a da node".into(),
                });
            }
            let mut run = leaf.entries.hash_run(hash);
            if let Some(ino) = self.match_run(dir, &mut run, name, &mut data_cache)? {
                return Ok(Some(ino));
            }
            let continues = run.reached_end() && leaf.entries.last_hash() == Some(hash);
            if !continues || leaf.forw == 0 {
                return Ok(None);
            }
            fsb = u64::from(leaf.forw);
            blk = self.read_dir_block(dir, fsb)?.ok_or_else(|| XfsError::Corruption {
                block: 0,
                detail: format!("directory {} leaf sibling {fsb} is a hole", dir.ino),
            })?;
            self.check_da_block(&blk)?;
        }
    }

    /// Dereference each live entry of `run` and compare names byte for byte.
    fn match_run(
        &self,
        dir: &XfsInode,
        run: &mut HashRun<'_>,
        name: &[u8],
        data_cache: &mut Option<(u64, DirBlock)>,
    ) -> Result<Option<u64>> {
        let dir_block_size = u64::from(self.geometry.dir_block_size);
        let fsbs = u64::from(self.geometry.dir_block_fsbs);
        for entry in run.by_ref().filter(|e| !e.is_stale()) {
            let byte = entry.byte_offset();
            let db = byte / dir_block_size;
            let off = usize::try_from(byte % dir_block_size).map_err(|_| XfsError::Corruption {
                block: 0,
                detail: format!("leaf address {byte:#x} overflows usize"),
            })?;
            let cached = data_cache.take().filter(|(at, _)| *at == db);
            let blk = match cached {
                Some((_, blk)) => blk,
                None => {
                    let blk = self.read_dir_block(dir, db * fsbs)?.ok_or_else(|| {
                        XfsError::Corruption {
                            block: 0,
                            detail: format!(
                                "directory {} leaf entry points into hole at data block {db}",
                                dir.ino
                            ),
                        }
                    })?;
                    self.check_data_block(&blk)?;
                    blk
                }
            };
            let found = data_entry_at(&blk.data, off, self.sb.has_ftype())
                .map_err(|e| corruption(blk.device_block, &e))?;
            let hit = (found.name == name).then_some(found.ino);
            *data_cache = Some((db, blk));
            if hit.is_some() {
                return Ok(hit);
            }
        }
        Ok(None)
    }

    /// List directory `ino` from the beginning.
    pub fn read_dir(&self, ino: InodeNumber) -> Result<DirEntries<'_>> {
        self.read_dir_from(ino, 0)
    }

    /// List directory `ino`, resuming after the entry whose `offset` is
    /// `cookie`. A cookie of 0 starts from the beginning.
    pub fn read_dir_from(&self, ino: InodeNumber, cookie: u64) -> Result<DirEntries<'_>> {
        let dir = self.get_inode(ino)?;
        if !dir.is_dir() {
            return Err(XfsError::NotDirectory);
        }
        DirEntries::new(self, dir, cookie)
    }
}

/// Lazy directory listing. Each call to `next` decodes at most one
/// directory block.
pub struct DirEntries<'a> {
    fs: &'a OpenFs,
    dir: XfsInode,
    pending: VecDeque<RawEntry>,
    next_db: u64,
    end_db: u64,
    cookie: u64,
    done: bool,
}

impl std::fmt::Debug for DirEntries<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirEntries")
            .field("ino", &self.dir.ino)
            .field("pending", &self.pending.len())
            .field("next_db", &self.next_db)
            .field("end_db", &self.end_db)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'a> DirEntries<'a> {
    fn new(fs: &'a OpenFs, dir: XfsInode, cookie: u64) -> Result<Self> {
        let dir_block_size = u64::from(fs.geometry.dir_block_size);
        let mut it = Self {
            fs,
            dir,
            pending: VecDeque::new(),
            next_db: cookie / dir_block_size,
            end_db: 0,
            cookie,
            done: false,
        };
        match &it.dir.data_fork {
            DataFork::Local(fork) => {
                it.pending = shortform_entries(fs, &it.dir, fork, cookie)?;
            }
            DataFork::Extents(_) | DataFork::Btree(_) => {
                it.end_db = match fs.index_kind(&it.dir)? {
                    IndexKind::SingleBlock => 1,
                    IndexKind::Leaf | IndexKind::Node => it
                        .dir
                        .size
                        .div_ceil(dir_block_size)
                        .min(XFS_DIR2_LEAF_OFFSET / dir_block_size),
                };
            }
            DataFork::Device(_) => {
                return Err(XfsError::Format(format!(
                    "directory {} has a device data fork",
                    it.dir.ino
                )));
            }
        }
        Ok(it)
    }

    /// Decode the next mapped data block into `pending`.
    fn fill(&mut self) -> Result<()> {
        let fs = self.fs;
        let dir_block_size = u64::from(fs.geometry.dir_block_size);
        let fsbs = u64::from(fs.geometry.dir_block_fsbs);
        while self.pending.is_empty() && self.next_db < self.end_db {
            let db = self.next_db;
            self.next_db += 1;
            let Some(blk) = fs.read_dir_block(&self.dir, db * fsbs)? else {
                continue;
            };
            let hdr = fs.check_data_block(&blk)?;
            let at = blk.device_block;
            let end = if hdr.is_block {
                let tail = BlockTail::parse(&blk.data).map_err(|e| corruption(at, &e))?;
                tail.leaf_start(blk.data.len(), hdr.header_size)
                    .map_err(|e| corruption(at, &e))?
            } else {
                blk.data.len()
            };
            let base = db * dir_block_size;
            for entry in DataEntryIter::new(&blk.data, hdr.header_size, end, fs.sb.has_ftype()) {
                let entry = entry.map_err(|e| corruption(at, &e))?;
                let pos = u64::try_from(entry.offset)
                    .ok()
                    .and_then(|o| base.checked_add(o))
                    .ok_or_else(|| XfsError::Corruption {
                        block: at.0,
                        detail: format!("entry offset {} overflows the cookie", entry.offset),
                    })?;
                if pos >= self.cookie {
                    self.pending.push_back(RawEntry {
                        ino: entry.ino,
                        pos,
                        name: entry.name.to_vec(),
                        ftype: entry.ftype,
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, raw: RawEntry) -> Result<DirEntry> {
        let kind = match raw.ftype.and_then(file_type_from_dir) {
            Some(kind) => kind,
            None => inode_kind(&self.fs.get_inode(InodeNumber(raw.ino))?)?,
        };
        Ok(DirEntry {
            ino: InodeNumber(raw.ino),
            offset: raw.pos + 1,
            kind,
            name: raw.name,
        })
    }
}

impl Iterator for DirEntries<'_> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(e) = self.fill() {
            self.done = true;
            return Some(Err(e));
        }
        let Some(raw) = self.pending.pop_front() else {
            self.done = true;
            return None;
        };
        let entry = self.resolve(raw);
        if entry.is_err() {
            self.done = true;
        }
        Some(entry)
    }
}

/// Shortform listing: `.` at position 0, `..` at 1, then each inline entry
/// at its stored offset.
fn shortform_entries(
    fs: &OpenFs,
    dir: &XfsInode,
    fork: &[u8],
    cookie: u64,
) -> Result<VecDeque<RawEntry>> {
    let sf =
        ShortformDir::parse(fork, fs.sb.has_ftype()).map_err(|e| fs.dir_corruption(dir, &e))?;
    let dir_type = Some(DirFileType::Directory);
    let mut out = VecDeque::new();
    out.push_back(RawEntry {
        ino: dir.ino.0,
        pos: 0,
        name: b".".to_vec(),
        ftype: dir_type,
    });
    out.push_back(RawEntry {
        ino: sf.parent,
        pos: 1,
        name: b"..".to_vec(),
        ftype: dir_type,
    });
    for entry in sf.iter() {
        let entry = entry.map_err(|e| fs.dir_corruption(dir, &e))?;
        out.push_back(RawEntry {
            ino: entry.ino,
            pos: u64::from(entry.offset),
            name: entry.name.to_vec(),
            ftype: entry.ftype,
        });
    }
    out.retain(|e| e.pos >= cookie);
    Ok(out)
}

fn file_type_from_dir(ftype: DirFileType) -> Option<FileType> {
    match ftype {
        DirFileType::Unknown => None,
        DirFileType::Regular => Some(FileType::RegularFile),
        DirFileType::Directory => Some(FileType::Directory),
        DirFileType::CharDevice => Some(FileType::CharDevice),
        DirFileType::BlockDevice => Some(FileType::BlockDevice),
        DirFileType::Fifo => Some(FileType::Fifo),
        DirFileType::Socket => Some(FileType::Socket),
        DirFileType::Symlink => Some(FileType::Symlink),
    }
}
