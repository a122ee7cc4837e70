#![forbid(unsafe_code)]
//! Read-only XFS filesystem facade.
//!
//! [`OpenFs`] mounts an image (superblock, then allocation group index),
//! resolves inode numbers to on-disk records, maps file blocks through
//! extent lists or the bmap btree, and resolves directory names across all
//! five directory encodings. Nothing is ever written back to the device.

mod dir;

pub use dir::{DirEntries, DirectoryFormat};
pub use xfs_block::{ByteDevice, FileByteDevice, MemoryByteDevice};
pub use xfs_error::{Result, XfsError};
pub use xfs_ondisk::{
    BmbtExtent, DataFork, FileKind, FormatVersion, InodeLocation, XfsAgf, XfsAgi, XfsInode,
    XfsSuperblock, XfsTimestamp,
};
pub use xfs_types::{BlockNumber, ByteOffset, FsBlock, GroupNumber, InodeNumber};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};
use xfs_block::{BlockReader, read_superblock_region};
use xfs_ondisk::bmap::{BmbtBlock, find_extent, parse_bmbt_block, verify_bmbt_checksum};
use xfs_ondisk::{verify_agf_checksum, verify_agi_checksum, verify_inode_checksum};
use xfs_types::{BlockSize, ParseError, XFS_MIN_SECTOR_SIZE};

// ── OpenFs API ──────────────────────────────────────────────────────────────

/// Options controlling how an image is opened.
///
/// The default validates everything and caches nothing.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Skip mount-time geometry, feature and checksum validation, and
    /// downgrade runtime checksum mismatches to warnings. For recovery and
    /// diagnostics only.
    pub skip_validation: bool,
    /// Keep up to this many decoded inodes, keyed by inode number.
    /// Zero disables the cache.
    pub inode_cache_capacity: usize,
}

/// Geometry derived once from the superblock at mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfsGeometry {
    pub block_size: u32,
    pub sector_size: u16,
    pub inode_size: u16,
    pub inodes_per_block: u16,
    pub ag_count: u32,
    pub ag_blocks: u32,
    /// Inode number bits addressing inside one AG (`agblklog + inopblog`).
    pub agino_bits: u32,
    pub dir_block_size: u32,
    /// Filesystem blocks per directory block.
    pub dir_block_fsbs: u32,
    pub is_v5: bool,
    pub has_ftype: bool,
}

impl XfsGeometry {
    fn from_superblock(sb: &XfsSuperblock) -> Self {
        Self {
            block_size: sb.block_size,
            sector_size: sb.sector_size,
            inode_size: sb.inode_size,
            inodes_per_block: sb.inodes_per_block,
            ag_count: sb.ag_count,
            ag_blocks: sb.ag_blocks,
            agino_bits: sb.agino_bits(),
            dir_block_size: sb.dir_block_size(),
            dir_block_fsbs: sb.dir_block_fsbs(),
            is_v5: sb.is_v5(),
            has_ftype: sb.has_ftype(),
        }
    }
}

/// One allocation group: its extent on disk and its AGF/AGI headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationGroup {
    pub index: GroupNumber,
    pub start_block: BlockNumber,
    /// Length in blocks; only the last AG may be shorter than `agblocks`.
    pub length: u32,
    pub agf: XfsAgf,
    pub agi: XfsAgi,
}

impl AllocationGroup {
    #[must_use]
    pub fn free_blocks(&self) -> u32 {
        self.agf.free_blocks
    }

    #[must_use]
    pub fn allocated_inodes(&self) -> u32 {
        self.agi.count
    }

    #[must_use]
    pub fn free_inodes(&self) -> u32 {
        self.agi.free_count
    }
}

/// Lazily populated, write-once table of allocation groups.
///
/// A group is decoded the first time it is referenced and never changes
/// afterwards. Concurrent first references may both decode; the first
/// insert wins.
#[derive(Debug)]
pub struct AllocationGroupIndex {
    count: u32,
    loaded: RwLock<BTreeMap<GroupNumber, Arc<AllocationGroup>>>,
}

impl AllocationGroupIndex {
    fn new(count: u32) -> Self {
        Self {
            count,
            loaded: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn contains(&self, group: GroupNumber) -> bool {
        group.0 < self.count
    }

    /// Groups decoded so far.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.loaded.read().len()
    }

    fn get_or_load(
        &self,
        group: GroupNumber,
        load: impl FnOnce() -> Result<AllocationGroup>,
    ) -> Result<Arc<AllocationGroup>> {
        if let Some(ag) = self.loaded.read().get(&group) {
            return Ok(Arc::clone(ag));
        }
        let ag = Arc::new(load()?);
        let mut slots = self.loaded.write();
        Ok(Arc::clone(slots.entry(group).or_insert(ag)))
    }
}

/// Bounded inode cache, evicting in insertion order.
#[derive(Debug)]
struct InodeCache {
    capacity: usize,
    inner: Mutex<InodeCacheInner>,
}

#[derive(Debug, Default)]
struct InodeCacheInner {
    map: HashMap<u64, XfsInode>,
    order: VecDeque<u64>,
}

impl InodeCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(InodeCacheInner::default()),
        }
    }

    fn get(&self, ino: InodeNumber) -> Option<XfsInode> {
        self.inner.lock().map.get(&ino.0).cloned()
    }

    fn insert(&self, inode: &XfsInode) {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&inode.ino.0) {
            return;
        }
        while inner.map.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.map.remove(&oldest);
        }
        inner.order.push_back(inode.ino.0);
        inner.map.insert(inode.ino.0, inode.clone());
    }

    fn len(&self) -> usize {
        self.inner.lock().map.len()
    }
}

/// Where a logical file block lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMapping {
    pub block: BlockNumber,
    /// Preallocated but never written; reads as zeros.
    pub unwritten: bool,
    /// Blocks left in the extent starting at `block` (at least 1).
    pub contiguous: u64,
}

/// A mounted, read-only XFS image.
///
/// Mounting is all-or-nothing: either the superblock (and, when validating,
/// the root inode's allocation group) decode cleanly or no `OpenFs` exists.
/// After mount the superblock is immutable and the value is `Send + Sync`.
///
/// ```ignore
/// let fs = OpenFs::open("/path/to/image.xfs")?;
/// let ino = fs.resolve_path("/etc/hostname")?.0;
/// let data = fs.read_file(ino, 0, 4096)?;
/// ```
pub struct OpenFs {
    sb: XfsSuperblock,
    geometry: XfsGeometry,
    reader: BlockReader,
    groups: AllocationGroupIndex,
    cache: Option<InodeCache>,
    options: OpenOptions,
}

impl std::fmt::Debug for OpenFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFs")
            .field("geometry", &self.geometry)
            .field("volume_name", &self.sb.volume_name)
            .field("loaded_groups", &self.groups.loaded_count())
            .field("cached_inodes", &self.cache.as_ref().map(InodeCache::len))
            .field("reader", &self.reader)
            .finish_non_exhaustive()
    }
}

impl OpenFs {
    /// Open an image at `path` with default options (validation enabled).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, &OpenOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(Box::new(dev), options)
    }

    /// Mount from an already-opened device.
    pub fn from_device(dev: Box<dyn ByteDevice>, options: &OpenOptions) -> Result<Self> {
        let region = read_superblock_region(&*dev, XFS_MIN_SECTOR_SIZE)?;
        let sb = XfsSuperblock::parse_superblock_region(&region)
            .map_err(|e| superblock_error(&e))?;
        sb.validate_addressing().map_err(|e| superblock_error(&e))?;

        if options.skip_validation {
            warn!(
                volume = %sb.volume_name,
                "mounting without superblock validation"
            );
        } else {
            sb.validate_geometry().map_err(|e| superblock_error(&e))?;
            sb.validate_features().map_err(|_| {
                XfsError::UnsupportedFeature(format!(
                    "incompatible features {}",
                    sb.features_incompat
                ))
            })?;
            let sector = usize::from(sb.sector_size);
            let raw = if sector > region.len() {
                read_superblock_region(&*dev, sector)?
            } else {
                region
            };
            sb.validate_checksum(&raw)
                .map_err(|e| superblock_error(&e))?;
        }

        let block_size = BlockSize::new(sb.block_size).map_err(|e| superblock_error(&e))?;
        if sb.inode_size == 0 || sb.ag_count == 0 {
            return Err(XfsError::CorruptSuperblock(
                "zero inode size or allocation group count".into(),
            ));
        }

        let geometry = XfsGeometry::from_superblock(&sb);
        let cache = (options.inode_cache_capacity > 0)
            .then(|| InodeCache::new(options.inode_cache_capacity));
        let fs = Self {
            groups: AllocationGroupIndex::new(sb.ag_count),
            reader: BlockReader::new(dev, block_size),
            geometry,
            cache,
            options: options.clone(),
            sb,
        };

        if !options.skip_validation {
            let root = fs.inode_address(fs.root_ino())?;
            fs.allocation_group(root.group)?;
        }

        debug!(
            volume = %fs.sb.volume_name,
            version = ?fs.sb.format_version,
            block_size = fs.sb.block_size,
            ag_count = fs.sb.ag_count,
            ag_blocks = fs.sb.ag_blocks,
            root_ino = fs.sb.root_ino,
            "mounted xfs image"
        );
        Ok(fs)
    }

    // ── Superblock and space accounting ──────────────────────────────

    #[must_use]
    pub fn superblock(&self) -> &XfsSuperblock {
        &self.sb
    }

    #[must_use]
    pub fn geometry(&self) -> &XfsGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    #[must_use]
    pub fn device(&self) -> &dyn ByteDevice {
        self.reader.device()
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.sb.block_size
    }

    /// Whether the image uses the CRC-enabled (version 5) layout.
    #[must_use]
    pub fn is_v5(&self) -> bool {
        self.sb.is_v5()
    }

    #[must_use]
    pub fn volume_name(&self) -> &str {
        &self.sb.volume_name
    }

    #[must_use]
    pub fn root_ino(&self) -> InodeNumber {
        InodeNumber(self.sb.root_ino)
    }

    /// Bytes covered by the data section (`dblocks * blocksize`).
    #[must_use]
    pub fn total_space(&self) -> u64 {
        self.sb.total_bytes()
    }

    /// Free bytes as recorded in the superblock counters.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.sb.free_bytes()
    }

    /// Bytes in use: total minus free.
    #[must_use]
    pub fn usable_space(&self) -> u64 {
        self.total_space().saturating_sub(self.free_space())
    }

    /// The root directory as a directory entry named `/`.
    pub fn root_entry(&self) -> Result<DirEntry> {
        let root = self.get_inode(self.root_ino())?;
        if !root.is_dir() {
            return Err(XfsError::Format(format!(
                "root inode {} is not a directory",
                root.ino
            )));
        }
        Ok(DirEntry {
            ino: root.ino,
            offset: 0,
            kind: FileType::Directory,
            name: b"/".to_vec(),
        })
    }

    // ── Allocation groups ────────────────────────────────────────────

    #[must_use]
    pub fn group_index(&self) -> &AllocationGroupIndex {
        &self.groups
    }

    /// Decode (once) and return allocation group `group`.
    pub fn allocation_group(&self, group: GroupNumber) -> Result<Arc<AllocationGroup>> {
        if !self.groups.contains(group) {
            return Err(XfsError::Format(format!(
                "allocation group {group} out of range (agcount {})",
                self.sb.ag_count
            )));
        }
        self.groups.get_or_load(group, || self.load_group(group))
    }

    fn load_group(&self, group: GroupNumber) -> Result<AllocationGroup> {
        let start_block = self.sb.ag_start_block(group);
        let length = self.sb.ag_length(group);
        let sector = usize::from(self.sb.sector_size);
        let sector_bytes = u64::from(self.sb.sector_size);
        let base = self.reader.block_offset(start_block, 0)?;
        let v5 = self.sb.is_v5();

        let mut agf_raw = vec![0_u8; sector];
        let mut agi_raw = vec![0_u8; sector];
        self.reader.read_at(
            base.checked_add(sector_bytes)
                .ok_or_else(|| XfsError::Format("AGF offset overflow".into()))?,
            &mut agf_raw,
        )?;
        self.reader.read_at(
            base.checked_add(2 * sector_bytes)
                .ok_or_else(|| XfsError::Format("AGI offset overflow".into()))?,
            &mut agi_raw,
        )?;

        let agf = XfsAgf::parse(&agf_raw, v5).map_err(|e| corruption(start_block, &e))?;
        let agi = XfsAgi::parse(&agi_raw, v5).map_err(|e| corruption(start_block, &e))?;
        if v5 {
            self.check(start_block, verify_agf_checksum(&agf_raw))?;
            self.check(start_block, verify_agi_checksum(&agi_raw))?;
        }
        self.check(start_block, agf.validate(group, length))?;
        self.check(start_block, agi.validate(group))?;

        trace!(
            group = group.0,
            free_blocks = agf.free_blocks,
            inodes = agi.count,
            "loaded allocation group"
        );
        Ok(AllocationGroup {
            index: group,
            start_block,
            length,
            agf,
            agi,
        })
    }

    /// Apply a metadata check: fail, or only warn when validation is off.
    fn check(&self, block: BlockNumber, outcome: std::result::Result<(), ParseError>) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if self.options.skip_validation => {
                warn!(block = block.0, error = %e, "ignoring metadata check failure");
                Ok(())
            }
            Err(e) => Err(corruption(block, &e)),
        }
    }

    // ── Inode resolution ─────────────────────────────────────────────

    /// Where inode `ino` lives on disk.
    pub fn inode_address(&self, ino: InodeNumber) -> Result<InodeLocation> {
        self.sb
            .locate_inode(ino)
            .map_err(|e| XfsError::InvalidInodeNumber {
                ino: ino.0,
                detail: match e {
                    ParseError::InvalidField { reason, .. } => reason.to_owned(),
                    other => other.to_string(),
                },
            })
    }

    /// Inverse of [`inode_address`](Self::inode_address).
    #[must_use]
    pub fn inode_number_at(&self, byte_offset: u64) -> Option<InodeNumber> {
        self.sb.inode_at_offset(byte_offset)
    }

    /// Read and decode inode `ino`.
    ///
    /// One device read of exactly one inode record per call, unless the
    /// optional cache already holds it.
    pub fn get_inode(&self, ino: InodeNumber) -> Result<XfsInode> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(ino)) {
            trace!(ino = ino.0, "inode cache hit");
            return Ok(cached);
        }
        let loc = self.inode_address(ino)?;
        let mut raw = vec![0_u8; usize::from(self.sb.inode_size)];
        self.reader.read_at(ByteOffset(loc.byte_offset), &mut raw)?;
        let block = BlockNumber(loc.byte_offset / u64::from(self.sb.block_size));
        trace!(ino = ino.0, offset = loc.byte_offset, "read inode");

        if self.sb.is_v5() {
            self.check(block, verify_inode_checksum(&raw))?;
        }
        let inode = XfsInode::parse(&raw, ino, &self.sb).map_err(|e| inode_error(ino, block, &e))?;
        if let Some(cache) = &self.cache {
            cache.insert(&inode);
        }
        Ok(inode)
    }

    /// VFS attributes of inode `ino`.
    pub fn inode_attr(&self, ino: InodeNumber) -> Result<InodeAttr> {
        let inode = self.get_inode(ino)?;
        inode_to_attr(&self.sb, &inode)
    }

    // ── Block mapping ────────────────────────────────────────────────

    /// Fill `dest` from `intra_offset` bytes into device block `block`.
    pub fn read_block(&self, block: BlockNumber, intra_offset: u64, dest: &mut [u8]) -> Result<()> {
        self.reader.read_block(block, intra_offset, dest)
    }

    fn read_block_vec(&self, block: BlockNumber) -> Result<Vec<u8>> {
        self.reader.read_blocks_vec(block, 1)
    }

    /// Translate an encoded filesystem block into a device block.
    pub fn fsb_to_block(&self, fsb: FsBlock) -> Result<BlockNumber> {
        self.sb.fsb_to_block(fsb).ok_or_else(|| XfsError::Corruption {
            block: fsb.0,
            detail: format!("filesystem block {fsb} lies outside the allocation groups"),
        })
    }

    /// Map logical file block `logical` of `inode` to a device block.
    ///
    /// `Ok(None)` is a hole. Local and device forks have no block map.
    pub fn map_block(&self, inode: &XfsInode, logical: u64) -> Result<Option<BlockMapping>> {
        let extent = match &inode.data_fork {
            DataFork::Extents(list) => find_extent(list, logical).copied(),
            DataFork::Btree(root) => self.bmbt_lookup(inode.ino, root, logical)?,
            DataFork::Local(_) | DataFork::Device(_) => {
                return Err(XfsError::Format(format!(
                    "inode {} has a {} data fork, not a block map",
                    inode.ino,
                    inode.data_fork.format_name()
                )));
            }
        };
        let Some(extent) = extent else {
            return Ok(None);
        };
        let delta = logical - extent.file_offset;
        let start = self.fsb_to_block(extent.start_block)?;
        let block = start.0.checked_add(delta).ok_or_else(|| XfsError::Corruption {
            block: start.0,
            detail: "extent runs past the end of the address space".into(),
        })?;
        Ok(Some(BlockMapping {
            block: BlockNumber(block),
            unwritten: extent.unwritten,
            contiguous: u64::from(extent.block_count) - delta,
        }))
    }

    /// Read one bmap btree block that must sit at `level`, checking its
    /// CRC on V5 and its header level.
    fn read_bmbt_block(&self, ino: InodeNumber, ptr: FsBlock, level: u16) -> Result<BmbtBlock> {
        let block = self.fsb_to_block(ptr)?;
        let buf = self.read_block_vec(block)?;
        if self.sb.is_v5() {
            self.check(block, verify_bmbt_checksum(&buf))?;
        }
        let parsed = parse_bmbt_block(&buf, self.sb.is_v5()).map_err(|e| corruption(block, &e))?;
        let found = match &parsed {
            BmbtBlock::Node(node) => node.level,
            BmbtBlock::Leaf { .. } => 0,
        };
        if found != level {
            return Err(XfsError::Corruption {
                block: block.0,
                detail: format!(
                    "bmap btree of inode {ino}: block at level {found} where {level} was expected"
                ),
            });
        }
        Ok(parsed)
    }

    /// Walk the bmap btree from the in-inode root down to the leaf that
    /// covers `logical`.
    fn bmbt_lookup(
        &self,
        ino: InodeNumber,
        root: &xfs_ondisk::BmbtRoot,
        logical: u64,
    ) -> Result<Option<BmbtExtent>> {
        let Some(mut ptr) = root.child_for(logical) else {
            return Ok(None);
        };
        let mut level = root.level;
        loop {
            level = level.checked_sub(1).ok_or_else(|| XfsError::Corruption {
                block: ptr.0,
                detail: format!("bmap btree of inode {ino} descends below leaf level"),
            })?;
            match self.read_bmbt_block(ino, ptr, level)? {
                BmbtBlock::Node(node) => {
                    let Some(next) = node.child_for(logical) else {
                        return Ok(None);
                    };
                    ptr = next;
                }
                BmbtBlock::Leaf { extents, .. } => {
                    return Ok(find_extent(&extents, logical).copied());
                }
            }
        }
    }

    /// Every extent of a block-mapped inode, in file order.
    pub fn collect_extents(&self, inode: &XfsInode) -> Result<Vec<BmbtExtent>> {
        let root = match &inode.data_fork {
            DataFork::Extents(list) => return Ok(list.clone()),
            DataFork::Btree(root) => root,
            DataFork::Local(_) | DataFork::Device(_) => return Ok(Vec::new()),
        };
        // Leftmost path down to the first leaf, then follow right siblings.
        let mut ptr = root.ptrs.first().copied();
        let mut level = root.level;
        while level > 1 {
            let Some(p) = ptr else { break };
            level -= 1;
            ptr = match self.read_bmbt_block(inode.ino, p, level)? {
                BmbtBlock::Node(node) => node.ptrs.first().copied(),
                BmbtBlock::Leaf { .. } => None,
            };
        }

        let mut out: Vec<BmbtExtent> = Vec::new();
        let budget = inode.nblocks.saturating_add(1);
        let mut visited = 0_u64;
        while let Some(p) = ptr {
            visited += 1;
            if visited > budget {
                return Err(XfsError::Corruption {
                    block: p.0,
                    detail: format!("bmap leaf chain of inode {} does not terminate", inode.ino),
                });
            }
            match self.read_bmbt_block(inode.ino, p, 0)? {
                BmbtBlock::Leaf {
                    extents,
                    right_sibling,
                } => {
                    out.extend(extents);
                    ptr = right_sibling;
                }
                BmbtBlock::Node(_) => ptr = None,
            }
        }
        Ok(out)
    }

    // ── File data ────────────────────────────────────────────────────

    /// Read file bytes at `offset` into `buf`, bounded by the file size.
    ///
    /// Holes and unwritten extents read as zeros. Returns bytes read.
    pub fn read_file_data(&self, inode: &XfsInode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= inode.size {
            return Ok(0);
        }
        let available = inode.size - offset;
        let len = usize::try_from(available).map_or(buf.len(), |a| a.min(buf.len()));

        if let DataFork::Local(data) = &inode.data_fork {
            let start = usize::try_from(offset)
                .map_err(|_| XfsError::Format("inline offset overflows usize".into()))?;
            let src = data.get(start..start + len).ok_or_else(|| {
                XfsError::Format(format!("inline data of inode {} shorter than size", inode.ino))
            })?;
            buf[..len].copy_from_slice(src);
            return Ok(len);
        }

        let bs = u64::from(self.sb.block_size);
        let mut done = 0_usize;
        while done < len {
            let pos = u64::try_from(done)
                .ok()
                .and_then(|d| offset.checked_add(d))
                .ok_or_else(|| XfsError::Format("file offset overflows u64".into()))?;
            let logical = pos / bs;
            let within = pos % bs;
            let want = len - done;
            match self.map_block(inode, logical)? {
                Some(m) if !m.unwritten => {
                    let avail = m.contiguous.saturating_mul(bs) - within;
                    let n = usize::try_from(avail).map_or(want, |a| a.min(want));
                    self.reader
                        .read_block(m.block, within, &mut buf[done..done + n])?;
                    done += n;
                }
                _ => {
                    let n = usize::try_from(bs - within).map_or(want, |a| a.min(want));
                    buf[done..done + n].fill(0);
                    done += n;
                }
            }
        }
        trace!(ino = inode.ino.0, offset, len, "read file data");
        Ok(len)
    }

    /// Read up to `size` bytes of inode `ino` at `offset`.
    pub fn read_file(&self, ino: InodeNumber, offset: u64, size: u32) -> Result<Vec<u8>> {
        let inode = self.get_inode(ino)?;
        if inode.is_dir() {
            return Err(XfsError::IsDirectory);
        }
        let len = usize::try_from(size)
            .map_err(|_| XfsError::Format("read size overflows usize".into()))?;
        let mut buf = vec![0_u8; len];
        let n = self.read_file_data(&inode, offset, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Target of a symbolic link, inline or extent-backed.
    pub fn read_symlink(&self, inode: &XfsInode) -> Result<Vec<u8>> {
        if !inode.is_symlink() {
            return Err(XfsError::Format(format!("inode {} is not a symlink", inode.ino)));
        }
        if let DataFork::Local(target) = &inode.data_fork {
            return Ok(target.clone());
        }
        let len = usize::try_from(inode.size).map_err(|_| XfsError::Corruption {
            block: 0,
            detail: "symlink size overflow".into(),
        })?;
        let mut buf = vec![0_u8; len];
        let n = self.read_file_data(inode, 0, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    // ── Names ────────────────────────────────────────────────────────

    /// Look up `name` in directory `parent`.
    pub fn lookup_name(&self, parent: InodeNumber, name: &[u8]) -> Result<InodeNumber> {
        let dir = self.get_inode(parent)?;
        self.lookup_in(&dir, name)?
            .ok_or_else(|| XfsError::NotFound(String::from_utf8_lossy(name).into_owned()))
    }

    /// Resolve an absolute path from the root directory.
    pub fn resolve_path(&self, path: &str) -> Result<(InodeNumber, XfsInode)> {
        if !path.starts_with('/') {
            return Err(XfsError::Format("path must be absolute (start with /)".into()));
        }
        let mut current = self.get_inode(self.root_ino())?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.is_dir() {
                return Err(XfsError::NotDirectory);
            }
            let child = self
                .lookup_in(&current, component.as_bytes())?
                .ok_or_else(|| XfsError::NotFound(component.to_owned()))?;
            current = self.get_inode(child)?;
        }
        Ok((current.ino, current))
    }
}

// ── Error conversion ────────────────────────────────────────────────────────

/// Mount-time parse failures all mean the superblock cannot be trusted.
fn superblock_error(e: &ParseError) -> XfsError {
    XfsError::CorruptSuperblock(e.to_string())
}

/// Live metadata at `block` failed to decode.
pub(crate) fn corruption(block: BlockNumber, e: &ParseError) -> XfsError {
    XfsError::Corruption {
        block: block.0,
        detail: e.to_string(),
    }
}

/// Unknown fork tags and version mismatches are format errors; anything
/// else in an inode record is corruption of the containing block.
fn inode_error(ino: InodeNumber, block: BlockNumber, e: &ParseError) -> XfsError {
    match e {
        ParseError::InvalidMagic { .. }
        | ParseError::InvalidField {
            field: "di_format" | "di_version",
            ..
        } => XfsError::Format(format!("inode {ino}: {e}")),
        _ => XfsError::Corruption {
            block: block.0,
            detail: format!("inode {ino}: {e}"),
        },
    }
}

// ── VFS semantics layer ─────────────────────────────────────────────────────

/// Filesystem-agnostic file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl From<FileKind> for FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Regular => Self::RegularFile,
            FileKind::Directory => Self::Directory,
            FileKind::Symlink => Self::Symlink,
            FileKind::BlockDevice => Self::BlockDevice,
            FileKind::CharDevice => Self::CharDevice,
            FileKind::Fifo => Self::Fifo,
            FileKind::Socket => Self::Socket,
        }
    }
}

/// Inode attributes, analogous to POSIX `struct stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttr {
    pub ino: InodeNumber,
    pub size: u64,
    /// Number of 512-byte blocks allocated.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// Creation time; V5 only, otherwise the epoch.
    pub crtime: SystemTime,
    pub kind: FileType,
    /// Lower 12 bits of the mode.
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

/// One name in a directory listing.
///
/// `offset` is the resume cookie: passing it back to
/// [`OpenFs::read_dir_from`] continues right after this entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub ino: InodeNumber,
    pub offset: u64,
    pub kind: FileType,
    pub name: Vec<u8>,
}

impl DirEntry {
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

fn inode_kind(inode: &XfsInode) -> Result<FileType> {
    inode.kind().map(FileType::from).ok_or_else(|| {
        XfsError::Format(format!(
            "inode {} has unknown file type in mode {:#o}",
            inode.ino, inode.mode
        ))
    })
}

fn inode_to_attr(sb: &XfsSuperblock, inode: &XfsInode) -> Result<InodeAttr> {
    let time = |ts: XfsTimestamp| ts.to_system_time().unwrap_or(SystemTime::UNIX_EPOCH);
    let rdev = match inode.data_fork {
        DataFork::Device(dev) => dev,
        _ => 0,
    };
    Ok(InodeAttr {
        ino: inode.ino,
        size: inode.size,
        blocks: inode
            .nblocks
            .saturating_mul(u64::from(sb.block_size / 512)),
        atime: time(inode.atime),
        mtime: time(inode.mtime),
        ctime: time(inode.ctime),
        crtime: inode.crtime.map_or(SystemTime::UNIX_EPOCH, time),
        kind: inode_kind(inode)?,
        perm: inode.permission_bits(),
        nlink: inode.nlink,
        uid: inode.uid,
        gid: inode.gid,
        rdev,
        blksize: sb.block_size,
    })
}

/// Read-only VFS operations, filesystem-agnostic.
///
/// This is the interface external adapters call; it is `Send + Sync` so an
/// adapter may dispatch from several threads at once.
pub trait FsOps: Send + Sync {
    /// Attributes of inode `ino`.
    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr>;

    /// Attributes of the child named `name` in directory `parent`.
    ///
    /// `NotFound` if absent, `NotDirectory` if `parent` is not a directory.
    fn lookup(&self, parent: InodeNumber, name: &OsStr) -> Result<InodeAttr>;

    /// Entries of directory `ino` after resume cookie `offset` (0 to start).
    /// An empty result marks the end.
    fn readdir(&self, ino: InodeNumber, offset: u64) -> Result<Vec<DirEntry>>;

    /// Up to `size` bytes at `offset`; fewer at end of file.
    fn read(&self, ino: InodeNumber, offset: u64, size: u32) -> Result<Vec<u8>>;

    fn readlink(&self, ino: InodeNumber) -> Result<Vec<u8>>;
}

impl FsOps for OpenFs {
    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr> {
        self.inode_attr(ino)
    }

    fn lookup(&self, parent: InodeNumber, name: &OsStr) -> Result<InodeAttr> {
        let child = self.lookup_name(parent, name.as_encoded_bytes())?;
        self.inode_attr(child)
    }

    fn readdir(&self, ino: InodeNumber, offset: u64) -> Result<Vec<DirEntry>> {
        self.read_dir_from(ino, offset)?.collect()
    }

    fn read(&self, ino: InodeNumber, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.read_file(ino, offset, size)
    }

    fn readlink(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        let inode = self.get_inode(ino)?;
        self.read_symlink(&inode)
    }
}
