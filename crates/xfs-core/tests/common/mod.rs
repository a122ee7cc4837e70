#![allow(dead_code)]
//! Synthetic XFS image builder for integration tests.
//!
//! Geometry: 1 KiB blocks, 512-byte sectors, two allocation groups of 60
//! blocks addressed with `agblklog = 6`, so AG 1 block numbers differ
//! between the encoded (`agno << 6 | agbno`) and linear (`agno * 60 +
//! agbno`) forms. V4 images use 256-byte inodes and no ftype byte; V5
//! images use 512-byte inodes, ftype and real CRCs everywhere.

use parking_lot::Mutex;
use std::sync::Arc;
use xfs_core::{ByteDevice, ByteOffset, MemoryByteDevice, OpenFs, OpenOptions, Result};

pub const BS: usize = 1024;
pub const BLOCK_LOG: u8 = 10;
pub const SECTOR: usize = 512;
pub const AG_BLOCKS: u64 = 60;
pub const AG_BLOCK_LOG: u8 = 6;
pub const AG_COUNT: u32 = 2;
pub const DBLOCKS: u64 = AG_BLOCKS * AG_COUNT as u64;
pub const LEAF_FSB: u64 = (1 << 35) >> BLOCK_LOG;

pub const S_IFDIR: u16 = 0o040_000;
pub const S_IFREG: u16 = 0o100_000;
pub const S_IFLNK: u16 = 0o120_000;
pub const S_IFCHR: u16 = 0o020_000;

pub const FT_REG: u8 = 1;
pub const FT_DIR: u8 = 2;
pub const FT_SYMLINK: u8 = 7;

const FIRST_INODE_BLOCK: u64 = 4;
const INODE_BLOCKS: u64 = 8;
const FIRST_DATA_BLOCK: u64 = FIRST_INODE_BLOCK + INODE_BLOCKS;
const MTIME: i32 = 1_700_000_000;

/// Seal a CRC32C field the way every V5 structure does: computed with the
/// field zeroed, stored little-endian.
pub fn seal(buf: &mut [u8], crc_offset: usize) {
    buf[crc_offset..crc_offset + 4].fill(0);
    let crc = crc32c::crc32c(buf);
    buf[crc_offset..crc_offset + 4].copy_from_slice(&crc.to_le_bytes());
}

pub fn name_hash(name: &[u8]) -> u32 {
    name.iter()
        .fold(0_u32, |h, &b| h.rotate_left(7) ^ u32::from(b))
}

fn put16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_be_bytes());
}

fn put32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
}

fn put64(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_be_bytes());
}

/// Directory entry to lay down.
#[derive(Debug, Clone)]
pub struct Ent {
    pub name: Vec<u8>,
    pub ino: u64,
    pub ftype: u8,
}

impl Ent {
    pub fn new(name: impl AsRef<[u8]>, ino: u64, ftype: u8) -> Self {
        Self {
            name: name.as_ref().to_vec(),
            ino,
            ftype,
        }
    }
}

/// One extent in file-relative terms; `start` is an encoded fsb.
#[derive(Debug, Clone, Copy)]
pub struct Ext {
    pub file_offset: u64,
    pub start: u64,
    pub count: u32,
    pub unwritten: bool,
}

impl Ext {
    pub fn new(file_offset: u64, start: u64, count: u32) -> Self {
        Self {
            file_offset,
            start,
            count,
            unwritten: false,
        }
    }
}

pub fn pack_extent(e: &Ext) -> [u8; 16] {
    let l0 = (u64::from(e.unwritten) << 63) | (e.file_offset << 9) | (e.start >> 43);
    let l1 = (e.start << 21) | u64::from(e.count);
    let mut out = [0_u8; 16];
    out[..8].copy_from_slice(&l0.to_be_bytes());
    out[8..].copy_from_slice(&l1.to_be_bytes());
    out
}

pub enum Fork {
    Local(Vec<u8>),
    Extents(Vec<Ext>),
    /// Root keys and child fsbs; the root sits at `level`.
    Btree { level: u16, keys: Vec<u64>, ptrs: Vec<u64> },
    Device(u32),
}

pub struct ImageBuilder {
    pub v5: bool,
    image: Vec<u8>,
    next_inode: [u64; 2],
    next_block: [u64; 2],
    pub root: u64,
}

impl ImageBuilder {
    pub fn new(v5: bool) -> Self {
        let mut b = Self {
            v5,
            image: vec![0_u8; DBLOCKS as usize * BS],
            next_inode: [0; 2],
            next_block: [FIRST_DATA_BLOCK; 2],
            root: 0,
        };
        b.root = b.alloc_inode();
        b
    }

    pub fn inode_size(&self) -> usize {
        if self.v5 { 512 } else { 256 }
    }

    pub fn inopblog(&self) -> u32 {
        if self.v5 { 1 } else { 2 }
    }

    fn core_size(&self) -> usize {
        if self.v5 { 176 } else { 100 }
    }

    pub fn ftype(&self) -> bool {
        self.v5
    }

    pub fn ino_at(&self, ag: u64, agbno: u64, idx: u64) -> u64 {
        let agino_bits = u32::from(AG_BLOCK_LOG) + self.inopblog();
        (ag << agino_bits) | (agbno << self.inopblog()) | idx
    }

    fn alloc_inode_in(&mut self, ag: usize) -> u64 {
        let per_block = 1_u64 << self.inopblog();
        let slot = self.next_inode[ag];
        assert!(slot < INODE_BLOCKS * per_block, "out of inode slots");
        self.next_inode[ag] += 1;
        self.ino_at(ag as u64, FIRST_INODE_BLOCK + slot / per_block, slot % per_block)
    }

    pub fn alloc_inode(&mut self) -> u64 {
        self.alloc_inode_in(0)
    }

    pub fn alloc_inode_ag1(&mut self) -> u64 {
        self.alloc_inode_in(1)
    }

    fn alloc_blocks_in(&mut self, ag: usize, n: u64) -> u64 {
        let agbno = self.next_block[ag];
        assert!(agbno + n <= AG_BLOCKS, "allocation group {ag} full");
        self.next_block[ag] += n;
        ((ag as u64) << AG_BLOCK_LOG) | agbno
    }

    /// Contiguous blocks in AG 0; returns the encoded fsb.
    pub fn alloc_blocks(&mut self, n: u64) -> u64 {
        self.alloc_blocks_in(0, n)
    }

    pub fn alloc_blocks_ag1(&mut self, n: u64) -> u64 {
        self.alloc_blocks_in(1, n)
    }

    pub fn used_blocks(&self) -> u64 {
        self.next_block.iter().sum()
    }

    /// Linear device block of an encoded fsb.
    pub fn device_block(fsb: u64) -> u64 {
        (fsb >> AG_BLOCK_LOG) * AG_BLOCKS + (fsb & ((1 << AG_BLOCK_LOG) - 1))
    }

    pub fn block_mut(&mut self, fsb: u64) -> &mut [u8] {
        let at = Self::device_block(fsb) as usize * BS;
        &mut self.image[at..at + BS]
    }

    pub fn inode_offset(&self, ino: u64) -> usize {
        let agino_bits = u32::from(AG_BLOCK_LOG) + self.inopblog();
        let ag = ino >> agino_bits;
        let rel = ino & ((1 << agino_bits) - 1);
        (ag * AG_BLOCKS * BS as u64 + rel * self.inode_size() as u64) as usize
    }

    pub fn write_inode(&mut self, ino: u64, mode: u16, size: u64, nblocks: u64, fork: &Fork) {
        let isize = self.inode_size();
        let core = self.core_size();
        let mut raw = vec![0_u8; isize];
        put16(&mut raw, 0x00, 0x494E);
        put16(&mut raw, 0x02, mode);
        raw[0x04] = if self.v5 { 3 } else { 2 };
        let nlink = if mode & 0o170_000 == S_IFDIR { 2 } else { 1 };
        put32(&mut raw, 0x08, 1000);
        put32(&mut raw, 0x0C, 100);
        put32(&mut raw, 0x10, nlink);
        for at in [0x20, 0x28, 0x30] {
            raw[at..at + 4].copy_from_slice(&MTIME.to_be_bytes());
        }
        put64(&mut raw, 0x38, size);
        put64(&mut raw, 0x40, nblocks);
        put32(&mut raw, 0x60, u32::MAX);
        let fork_area = core..isize;
        match fork {
            Fork::Device(dev) => {
                raw[0x05] = 0;
                put32(&mut raw, core, *dev);
            }
            Fork::Local(bytes) => {
                raw[0x05] = 1;
                raw[core..core + bytes.len()].copy_from_slice(bytes);
            }
            Fork::Extents(list) => {
                raw[0x05] = 2;
                put32(&mut raw, 0x4C, list.len() as u32);
                for (i, e) in list.iter().enumerate() {
                    let at = core + i * 16;
                    raw[at..at + 16].copy_from_slice(&pack_extent(e));
                }
            }
            Fork::Btree { level, keys, ptrs } => {
                raw[0x05] = 3;
                let fork_len = fork_area.len();
                let maxrecs = (fork_len - 4) / 16;
                put16(&mut raw, core, *level);
                put16(&mut raw, core + 2, keys.len() as u16);
                for (i, (k, p)) in keys.iter().zip(ptrs).enumerate() {
                    put64(&mut raw, core + 4 + i * 8, *k);
                    put64(&mut raw, core + 4 + maxrecs * 8 + i * 8, *p);
                }
            }
        }
        if self.v5 {
            raw[0x90..0x94].copy_from_slice(&MTIME.to_be_bytes());
            put64(&mut raw, 0x98, ino);
            raw[0xA0..0xB0].copy_from_slice(&[0xAB; 16]);
            seal(&mut raw, 0x64);
        }
        let at = self.inode_offset(ino);
        self.image[at..at + isize].copy_from_slice(&raw);
    }

    /// Regular file backed by one contiguous extent.
    pub fn add_file(&mut self, contents: &[u8]) -> u64 {
        let ino = self.alloc_inode();
        self.write_file(ino, contents);
        ino
    }

    pub fn write_file(&mut self, ino: u64, contents: &[u8]) {
        let blocks = contents.len().div_ceil(BS) as u64;
        let mut extents = Vec::new();
        if blocks > 0 {
            let fsb = self.alloc_blocks(blocks);
            for (i, chunk) in contents.chunks(BS).enumerate() {
                self.block_mut(fsb + i as u64)[..chunk.len()].copy_from_slice(chunk);
            }
            extents.push(Ext::new(0, fsb, blocks as u32));
        }
        self.write_inode(
            ino,
            S_IFREG | 0o644,
            contents.len() as u64,
            blocks,
            &Fork::Extents(extents),
        );
    }

    // ── Directories ──────────────────────────────────────────────────

    fn entry_size(&self, namelen: usize) -> usize {
        (8 + 1 + namelen + usize::from(self.ftype()) + 2).div_ceil(8) * 8
    }

    pub fn write_shortform_dir(&mut self, ino: u64, parent: u64, entries: &[Ent]) {
        let wide = entries.iter().any(|e| e.ino > u64::from(u32::MAX)) || parent > u64::from(u32::MAX);
        let ino_len = if wide { 8 } else { 4 };
        let mut fork = vec![entries.len() as u8, if wide { entries.len() as u8 } else { 0 }];
        if wide {
            fork.extend_from_slice(&parent.to_be_bytes());
        } else {
            fork.extend_from_slice(&(parent as u32).to_be_bytes());
        }
        let mut offset = if self.v5 { 0x60_u16 } else { 0x30 };
        for e in entries {
            fork.push(e.name.len() as u8);
            fork.extend_from_slice(&offset.to_be_bytes());
            fork.extend_from_slice(&e.name);
            if self.ftype() {
                fork.push(e.ftype);
            }
            if ino_len == 8 {
                fork.extend_from_slice(&e.ino.to_be_bytes());
            } else {
                fork.extend_from_slice(&(e.ino as u32).to_be_bytes());
            }
            offset += self.entry_size(e.name.len()) as u16;
        }
        let size = fork.len() as u64;
        self.write_inode(ino, S_IFDIR | 0o755, size, 0, &Fork::Local(fork));
    }

    fn data_header_size(&self) -> usize {
        if self.v5 { 64 } else { 16 }
    }

    fn leaf_header_size(&self) -> usize {
        if self.v5 { 64 } else { 16 }
    }

    fn put_data_entry(&self, block: &mut [u8], off: usize, e: &Ent) -> usize {
        put64(block, off, e.ino);
        block[off + 8] = e.name.len() as u8;
        block[off + 9..off + 9 + e.name.len()].copy_from_slice(&e.name);
        if self.ftype() {
            block[off + 9 + e.name.len()] = e.ftype;
        }
        let size = self.entry_size(e.name.len());
        put16(block, off + size - 2, off as u16);
        off + size
    }

    fn put_unused(block: &mut [u8], off: usize, end: usize) {
        if end <= off {
            return;
        }
        let len = end - off;
        put16(block, off, 0xFFFF);
        put16(block, off + 2, len as u16);
        put16(block, end - 2, off as u16);
    }

    /// Lay `entries` into a data block, returning `(hash, address)` pairs.
    fn fill_data_block(
        &self,
        block: &mut [u8],
        db: u64,
        entries: &[Ent],
        magic: u32,
        end: usize,
    ) -> Vec<(u32, u32)> {
        put32(block, 0, magic);
        let mut off = self.data_header_size();
        let mut leaf = Vec::new();
        for e in entries {
            let addr = (db * BS as u64 + off as u64) / 8;
            leaf.push((name_hash(&e.name), addr as u32));
            off = self.put_data_entry(block, off, e);
            assert!(off <= end, "data block overflow");
        }
        Self::put_unused(block, off, end);
        leaf
    }

    fn dot_entries(&self, ino: u64, parent: u64, entries: &[Ent]) -> Vec<Ent> {
        let mut all = vec![Ent::new(".", ino, FT_DIR), Ent::new("..", parent, FT_DIR)];
        all.extend_from_slice(entries);
        all
    }

    pub fn write_block_dir(&mut self, ino: u64, parent: u64, entries: &[Ent]) {
        self.write_block_dir_with_stale(ino, parent, entries, 0);
    }

    /// Single-block directory; `stale` extra stale leaf entries are
    /// appended with hash 0.
    pub fn write_block_dir_with_stale(&mut self, ino: u64, parent: u64, entries: &[Ent], stale: usize) {
        let all = self.dot_entries(ino, parent, entries);
        let fsb = self.alloc_blocks(1);
        let count = all.len() + stale;
        let leaf_start = BS - 8 - count * 8;
        let magic = if self.v5 { 0x5844_4233 } else { 0x5844_3242 };
        let mut block = vec![0_u8; BS];
        let mut leaf = self.fill_data_block(&mut block, 0, &all, magic, leaf_start);
        leaf.extend(std::iter::repeat_n((0_u32, 0_u32), stale));
        leaf.sort_by_key(|&(h, _)| h);
        for (i, (h, a)) in leaf.iter().enumerate() {
            put32(&mut block, leaf_start + i * 8, *h);
            put32(&mut block, leaf_start + i * 8 + 4, *a);
        }
        put32(&mut block, BS - 8, count as u32);
        put32(&mut block, BS - 4, stale as u32);
        if self.v5 {
            put64(&mut block, 8, Self::device_block(fsb));
            put64(&mut block, 40, ino);
            seal(&mut block, 4);
        }
        self.block_mut(fsb).copy_from_slice(&block);
        self.write_inode(
            ino,
            S_IFDIR | 0o755,
            BS as u64,
            1,
            &Fork::Extents(vec![Ext::new(0, fsb, 1)]),
        );
    }

    /// Write data blocks for `all` entries, `per_block` entries each, into
    /// consecutive fsbs starting at `first`. Returns the leaf pairs.
    fn write_data_blocks(&mut self, ino: u64, first: u64, all: &[Ent], per_block: usize) -> Vec<(u32, u32)> {
        let magic = if self.v5 { 0x5844_4433 } else { 0x5844_3244 };
        let mut leaf = Vec::new();
        for (db, chunk) in all.chunks(per_block).enumerate() {
            let mut block = vec![0_u8; BS];
            leaf.extend(self.fill_data_block(&mut block, db as u64, chunk, magic, BS));
            if self.v5 {
                put64(&mut block, 8, Self::device_block(first + db as u64));
                put64(&mut block, 40, ino);
                seal(&mut block, 4);
            }
            self.block_mut(first + db as u64).copy_from_slice(&block);
        }
        leaf.sort_by_key(|&(h, _)| h);
        leaf
    }

    fn leaf_block(&self, magic_v4: u16, magic_v5: u16, forw: u32, back: u32, entries: &[(u32, u32)], owner: u64) -> Vec<u8> {
        let mut block = vec![0_u8; BS];
        put32(&mut block, 0, forw);
        put32(&mut block, 4, back);
        put16(&mut block, 8, if self.v5 { magic_v5 } else { magic_v4 });
        let (count_at, stale_at) = if self.v5 { (56, 58) } else { (12, 14) };
        put16(&mut block, count_at, entries.len() as u16);
        let stale = entries.iter().filter(|(_, a)| *a == 0).count();
        put16(&mut block, stale_at, stale as u16);
        let hdr = self.leaf_header_size();
        for (i, (h, a)) in entries.iter().enumerate() {
            put32(&mut block, hdr + i * 8, *h);
            put32(&mut block, hdr + i * 8 + 4, *a);
        }
        if self.v5 {
            put64(&mut block, 48, owner);
        }
        block
    }

    fn store_da_block(&mut self, fsb: u64, mut block: Vec<u8>) {
        if self.v5 {
            put64(&mut block, 16, Self::device_block(fsb));
            seal(&mut block, 12);
        }
        self.block_mut(fsb).copy_from_slice(&block);
    }

    /// Leaf-format directory: data blocks plus one LEAF1 block.
    pub fn write_leaf_dir(&mut self, ino: u64, parent: u64, entries: &[Ent], per_block: usize) -> LeafDirLayout {
        let all = self.dot_entries(ino, parent, entries);
        let ndata = all.len().div_ceil(per_block) as u64;
        let data = self.alloc_blocks(ndata);
        let leaf_entries = self.write_data_blocks(ino, data, &all, per_block);
        let leaf_fsb = self.alloc_blocks(1);
        let mut block = self.leaf_block(0xD2F1, 0x3DF1, 0, 0, &leaf_entries, ino);
        // leaf tail: bestcount, with the bests array in front of it
        put32(&mut block, BS - 4, ndata as u32);
        self.store_da_block(leaf_fsb, block);
        self.write_inode(
            ino,
            S_IFDIR | 0o755,
            ndata * BS as u64,
            ndata + 1,
            &Fork::Extents(vec![
                Ext::new(0, data, ndata as u32),
                Ext::new(LEAF_FSB, leaf_fsb, 1),
            ]),
        );
        LeafDirLayout {
            data_fsb: data,
            data_blocks: ndata,
            index_fsb: leaf_fsb,
            index_blocks: 1,
        }
    }

    /// Node-format directory: data blocks, one da node at the start of the
    /// leaf region, then `nleaves` LEAFN blocks chained by `forw`. Leaves
    /// are split at `split_at` boundaries of the sorted entry array when
    /// given, otherwise evenly.
    pub fn write_node_dir(
        &mut self,
        ino: u64,
        parent: u64,
        entries: &[Ent],
        per_block: usize,
        splits: &[usize],
        btree: bool,
    ) -> LeafDirLayout {
        let all = self.dot_entries(ino, parent, entries);
        let ndata = all.len().div_ceil(per_block) as u64;
        let data = self.alloc_blocks(ndata);
        let leaf_entries = self.write_data_blocks(ino, data, &all, per_block);

        let mut bounds = vec![0];
        bounds.extend_from_slice(splits);
        bounds.push(leaf_entries.len());
        let nleaves = bounds.len() - 1;
        let index = self.alloc_blocks(1 + nleaves as u64);

        let mut node_entries = Vec::new();
        for i in 0..nleaves {
            let run = &leaf_entries[bounds[i]..bounds[i + 1]];
            let da = (LEAF_FSB + 1 + i as u64) as u32;
            let forw = if i + 1 < nleaves { da + 1 } else { 0 };
            let back = if i > 0 { da - 1 } else { 0 };
            let block = self.leaf_block(0xD2FF, 0x3DFF, forw, back, run, ino);
            self.store_da_block(index + 1 + i as u64, block);
            node_entries.push((run.last().map_or(0, |(h, _)| *h), da));
        }

        let mut node = vec![0_u8; BS];
        put16(&mut node, 8, if self.v5 { 0x3EBE } else { 0xFEBE });
        let (count_at, level_at, hdr) = if self.v5 { (56, 58, 64) } else { (12, 14, 16) };
        put16(&mut node, count_at, nleaves as u16);
        put16(&mut node, level_at, 1);
        for (i, (h, before)) in node_entries.iter().enumerate() {
            put32(&mut node, hdr + i * 8, *h);
            put32(&mut node, hdr + i * 8 + 4, *before);
        }
        if self.v5 {
            put64(&mut node, 48, ino);
        }
        self.store_da_block(index, node);

        let extents = vec![
            Ext::new(0, data, ndata as u32),
            Ext::new(LEAF_FSB, index, 1 + nleaves as u32),
        ];
        let nblocks = ndata + 1 + nleaves as u64;
        if btree {
            self.write_btree_fork(ino, S_IFDIR | 0o755, ndata * BS as u64, nblocks, &extents);
        } else {
            self.write_inode(ino, S_IFDIR | 0o755, ndata * BS as u64, nblocks, &Fork::Extents(extents));
        }
        LeafDirLayout {
            data_fsb: data,
            data_blocks: ndata,
            index_fsb: index,
            index_blocks: 1 + nleaves as u64,
        }
    }

    /// Write a bmap btree of height 1 holding `extents`, one extent per
    /// leaf block, leaves chained by right sibling.
    pub fn write_btree_fork(&mut self, ino: u64, mode: u16, size: u64, nblocks: u64, extents: &[Ext]) -> Vec<u64> {
        let leaves = self.alloc_blocks(extents.len() as u64);
        let hdr = if self.v5 { 72 } else { 24 };
        let mut keys = Vec::new();
        let mut ptrs = Vec::new();
        for (i, e) in extents.iter().enumerate() {
            let fsb = leaves + i as u64;
            let mut block = vec![0_u8; BS];
            put32(&mut block, 0, if self.v5 { 0x424D_4133 } else { 0x424D_4150 });
            put16(&mut block, 4, 0);
            put16(&mut block, 6, 1);
            let left = if i == 0 { u64::MAX } else { fsb - 1 };
            let right = if i + 1 == extents.len() { u64::MAX } else { fsb + 1 };
            put64(&mut block, 8, left);
            put64(&mut block, 16, right);
            block[hdr..hdr + 16].copy_from_slice(&pack_extent(e));
            if self.v5 {
                put64(&mut block, 24, Self::device_block(fsb));
                put64(&mut block, 56, ino);
                seal(&mut block, 64);
            }
            self.block_mut(fsb).copy_from_slice(&block);
            keys.push(e.file_offset);
            ptrs.push(fsb);
        }
        let all_ptrs = ptrs.clone();
        self.write_inode(
            ino,
            mode,
            size,
            nblocks + extents.len() as u64,
            &Fork::Btree { level: 1, keys, ptrs },
        );
        all_ptrs
    }

    // ── Finish ───────────────────────────────────────────────────────

    fn superblock(&self) -> Vec<u8> {
        let mut sb = vec![0_u8; SECTOR];
        put32(&mut sb, 0x00, 0x5846_5342);
        put32(&mut sb, 0x04, BS as u32);
        put64(&mut sb, 0x08, DBLOCKS);
        sb[0x20..0x30].copy_from_slice(&[0xAB; 16]);
        put64(&mut sb, 0x38, self.root);
        put32(&mut sb, 0x54, AG_BLOCKS as u32);
        put32(&mut sb, 0x58, AG_COUNT);
        put16(&mut sb, 0x64, if self.v5 { 0x8005 } else { 0xB4A4 });
        put16(&mut sb, 0x66, SECTOR as u16);
        put16(&mut sb, 0x68, self.inode_size() as u16);
        put16(&mut sb, 0x6A, 1 << self.inopblog());
        sb[0x6C..0x72].copy_from_slice(b"testfs");
        sb[0x78] = BLOCK_LOG;
        sb[0x79] = 9;
        sb[0x7A] = if self.v5 { 9 } else { 8 };
        sb[0x7B] = self.inopblog() as u8;
        sb[0x7C] = AG_BLOCK_LOG;
        put64(&mut sb, 0x80, 64);
        put64(&mut sb, 0x88, 64 - self.next_inode.iter().sum::<u64>());
        put64(&mut sb, 0x90, DBLOCKS - self.used_blocks());
        if self.v5 {
            put32(&mut sb, 0xD8, 1);
            seal(&mut sb, 0xE0);
        }
        sb
    }

    fn ag_headers(&self, ag: usize) -> (Vec<u8>, Vec<u8>) {
        let free = (AG_BLOCKS - self.next_block[ag]) as u32;
        let mut agf = vec![0_u8; SECTOR];
        put32(&mut agf, 0, 0x5841_4746);
        put32(&mut agf, 4, 1);
        put32(&mut agf, 8, ag as u32);
        put32(&mut agf, 12, AG_BLOCKS as u32);
        put32(&mut agf, 16, 1);
        put32(&mut agf, 20, 2);
        put32(&mut agf, 28, 1);
        put32(&mut agf, 32, 1);
        put32(&mut agf, 52, free);
        put32(&mut agf, 56, free);
        let mut agi = vec![0_u8; SECTOR];
        put32(&mut agi, 0, 0x5841_4749);
        put32(&mut agi, 4, 1);
        put32(&mut agi, 8, ag as u32);
        put32(&mut agi, 12, AG_BLOCKS as u32);
        put32(&mut agi, 16, 32);
        put32(&mut agi, 20, 3);
        put32(&mut agi, 24, 1);
        put32(&mut agi, 28, 32 - self.next_inode[ag] as u32);
        put32(&mut agi, 36, u32::MAX);
        if self.v5 {
            agf[64..80].copy_from_slice(&[0xAB; 16]);
            seal(&mut agf, 216);
            agi[296..312].copy_from_slice(&[0xAB; 16]);
            seal(&mut agi, 312);
        }
        (agf, agi)
    }

    pub fn finish(mut self) -> Vec<u8> {
        let sb = self.superblock();
        self.image[..SECTOR].copy_from_slice(&sb);
        for ag in 0..AG_COUNT as usize {
            let base = ag * AG_BLOCKS as usize * BS;
            let (agf, agi) = self.ag_headers(ag);
            self.image[base + SECTOR..base + 2 * SECTOR].copy_from_slice(&agf);
            self.image[base + 2 * SECTOR..base + 3 * SECTOR].copy_from_slice(&agi);
        }
        self.image
    }
}

/// Where a leaf/node directory's blocks landed.
#[derive(Debug, Clone, Copy)]
pub struct LeafDirLayout {
    pub data_fsb: u64,
    pub data_blocks: u64,
    pub index_fsb: u64,
    pub index_blocks: u64,
}

impl LeafDirLayout {
    /// Device byte range of the data blocks.
    pub fn data_range(&self) -> std::ops::Range<u64> {
        let start = ImageBuilder::device_block(self.data_fsb) * BS as u64;
        start..start + self.data_blocks * BS as u64
    }
}

pub fn mount(image: Vec<u8>) -> OpenFs {
    OpenFs::from_device(Box::new(MemoryByteDevice::new(image)), &OpenOptions::default())
        .expect("mount synthetic image")
}

/// Device that records the offset and length of every read.
#[derive(Debug)]
pub struct CountingDevice {
    inner: MemoryByteDevice,
    pub reads: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl CountingDevice {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            inner: MemoryByteDevice::new(image),
            reads: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ByteDevice for CountingDevice {
    fn len_bytes(&self) -> u64 {
        self.inner.len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        self.reads.lock().push((offset.0, buf.len()));
        self.inner.read_exact_at(offset, buf)
    }
}

/// Mount through a [`CountingDevice`], returning the shared read log.
pub fn mount_counting(image: Vec<u8>) -> (OpenFs, Arc<Mutex<Vec<(u64, usize)>>>) {
    let dev = CountingDevice::new(image);
    let reads = Arc::clone(&dev.reads);
    let fs = OpenFs::from_device(Box::new(dev), &OpenOptions::default()).expect("mount");
    (fs, reads)
}

/// Names `f000`, `f001`, ... pointing at `target`.
pub fn numbered(count: usize, target: u64) -> Vec<Ent> {
    (0..count)
        .map(|i| Ent::new(format!("f{i:03}"), target, FT_REG))
        .collect()
}
