#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use xfs_ondisk::{
    BlockTail, DaNode, DataBlockHeader, DataEntryIter, LeafBlock, ShortformDir, XfsAgf, XfsAgi,
    XfsInode, XfsSuperblock, dir_hash, parse_bmbt_block, parse_bmbt_root, parse_extent_list,
    verify_agf_checksum, verify_agi_checksum, verify_bmbt_checksum, verify_da3_checksum,
    verify_dir3_data_checksum, verify_inode_checksum,
};
use xfs_types::{InodeNumber, ParseError};

#[derive(Debug, Default)]
struct ErrorCoverage {
    insufficient_data: u32,
    invalid_magic: u32,
    invalid_field: u32,
    integer_conversion: u32,
}

impl ErrorCoverage {
    fn observe(&mut self, err: &ParseError) {
        match err {
            ParseError::InsufficientData { .. } => self.insufficient_data += 1,
            ParseError::InvalidMagic { .. } => self.invalid_magic += 1,
            ParseError::InvalidField { .. } => self.invalid_field += 1,
            ParseError::IntegerConversion { .. } => self.integer_conversion += 1,
        }
    }
}

/// Deterministic xorshift so failures reproduce without a corpus on disk.
struct Mutator(u64);

impl Mutator {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }

    fn mutate(&mut self, template: &[u8]) -> Vec<u8> {
        let mut out = template.to_vec();
        match self.below(4) {
            0 => out.truncate(self.below(template.len() + 1)),
            1 => {
                for _ in 0..=self.below(8) {
                    let at = self.below(out.len());
                    out[at] ^= 1 << self.below(8);
                }
            }
            2 => {
                let at = self.below(out.len());
                let len = self.below(16).min(out.len() - at);
                out[at..at + len].fill(0xFF);
            }
            _ => {
                // header fields live in the first 128 bytes of every structure
                let at = self.below(out.len().min(128));
                out[at] = self.next() as u8;
            }
        }
        out
    }
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

fn superblock_template() -> Vec<u8> {
    let mut sb = vec![0_u8; 512];
    sb[0..4].copy_from_slice(b"XFSB");
    put32(&mut sb, 0x04, 4096);
    put64(&mut sb, 0x08, 1000);
    put64(&mut sb, 0x38, 128);
    put32(&mut sb, 0x54, 500);
    put32(&mut sb, 0x58, 2);
    put16(&mut sb, 0x64, 4);
    put16(&mut sb, 0x66, 512);
    put16(&mut sb, 0x68, 256);
    put16(&mut sb, 0x6A, 16);
    sb[0x6C..0x70].copy_from_slice(b"fuzz");
    sb[0x78] = 12;
    sb[0x79] = 9;
    sb[0x7A] = 8;
    sb[0x7B] = 4;
    sb[0x7C] = 9;
    put64(&mut sb, 0x90, 800);
    sb
}

fn inode_template() -> Vec<u8> {
    let mut raw = vec![0_u8; 256];
    raw[0..2].copy_from_slice(b"IN");
    put16(&mut raw, 0x02, 0o100_644);
    raw[0x04] = 2;
    raw[0x05] = 2;
    put64(&mut raw, 0x38, 8192);
    put64(&mut raw, 0x40, 2);
    put32(&mut raw, 0x4C, 1);
    // one extent: offset 0, block 64, length 2
    let packed: u128 = (64_u128 << 21) | 2;
    raw[100..116].copy_from_slice(&packed.to_be_bytes());
    raw
}

fn shortform_template() -> Vec<u8> {
    let mut fork = vec![2, 0, 0, 0, 0, 128];
    for (i, name) in [&b"alpha"[..], b"be"].iter().enumerate() {
        fork.push(name.len() as u8);
        fork.extend_from_slice(&(0x30_u16 + 0x10 * i as u16).to_be_bytes());
        fork.extend_from_slice(name);
        fork.extend_from_slice(&(129_u32 + i as u32).to_be_bytes());
    }
    fork
}

fn block_dir_template() -> Vec<u8> {
    let mut block = vec![0_u8; 1024];
    block[0..4].copy_from_slice(b"XD2B");
    let mut at = 16;
    for (name, ino) in [(&b"."[..], 128_u64), (b"..", 128), (b"file", 131)] {
        put64(&mut block, at, ino);
        block[at + 8] = name.len() as u8;
        block[at + 9..at + 9 + name.len()].copy_from_slice(name);
        let size = (8 + 1 + name.len() + 2).next_multiple_of(8);
        put16(&mut block, at + size - 2, at as u16);
        at += size;
    }
    let leaf_at = 1024 - 8 - 3 * 8;
    put16(&mut block, at, 0xFFFF);
    put16(&mut block, at + 2, (leaf_at - at) as u16);
    let mut leaves = [(dir_hash(b"."), 16), (dir_hash(b".."), 32), (dir_hash(b"file"), 48)];
    leaves.sort_unstable();
    for (i, (hash, off)) in leaves.iter().enumerate() {
        put32(&mut block, leaf_at + i * 8, *hash);
        put32(&mut block, leaf_at + i * 8 + 4, off / 8);
    }
    put32(&mut block, 1024 - 8, 3);
    block
}

fn leaf_template() -> Vec<u8> {
    let mut block = vec![0_u8; 1024];
    put16(&mut block, 8, 0xD2F1);
    put16(&mut block, 12, 4);
    for i in 0..4_u32 {
        put32(&mut block, 16 + i as usize * 8, 0x1000 * (i + 1));
        put32(&mut block, 20 + i as usize * 8, 2 + i * 4);
    }
    block
}

fn da_node_template() -> Vec<u8> {
    let mut block = vec![0_u8; 1024];
    put16(&mut block, 8, 0xFEBE);
    put16(&mut block, 12, 2);
    put16(&mut block, 14, 1);
    put32(&mut block, 16, 0x8000_0000);
    put32(&mut block, 20, (1 << 25) + 1);
    put32(&mut block, 24, u32::MAX);
    put32(&mut block, 28, (1 << 25) + 2);
    block
}

fn bmbt_template() -> Vec<u8> {
    let mut block = vec![0_u8; 1024];
    block[0..4].copy_from_slice(b"BMAP");
    put16(&mut block, 6, 1);
    put64(&mut block, 8, u64::MAX);
    put64(&mut block, 16, u64::MAX);
    let packed: u128 = (10_u128 << 73) | (300_u128 << 21) | 4;
    block[24..40].copy_from_slice(&packed.to_be_bytes());
    block
}

fn run_parser<T, F>(
    sample: usize,
    parser_name: &'static str,
    parser_hits: &mut BTreeMap<&'static str, u32>,
    coverage: &mut ErrorCoverage,
    parser: F,
) -> bool
where
    F: FnOnce() -> Result<T, ParseError>,
{
    *parser_hits.entry(parser_name).or_default() += 1;
    match catch_unwind(AssertUnwindSafe(parser)) {
        Ok(Ok(_)) => false,
        Ok(Err(err)) => {
            coverage.observe(&err);
            true
        }
        Err(_) => panic!("parser `{parser_name}` panicked on sample {sample}"),
    }
}

fn drain<T>(iter: impl Iterator<Item = Result<T, ParseError>>) -> Result<usize, ParseError> {
    let mut seen = 0;
    for item in iter.take(256) {
        item?;
        seen += 1;
    }
    Ok(seen)
}

#[test]
#[allow(clippy::too_many_lines)]
fn mutated_structures_never_panic_and_hit_every_error_kind() {
    let templates = [
        superblock_template(),
        inode_template(),
        shortform_template(),
        block_dir_template(),
        leaf_template(),
        da_node_template(),
        bmbt_template(),
    ];
    let sb = XfsSuperblock::parse_superblock_region(&templates[0]).expect("template superblock");
    sb.validate_geometry().expect("template geometry");

    let mut rng = Mutator(0x9E37_79B9_7F4A_7C15);
    let mut parser_hits = BTreeMap::new();
    let mut coverage = ErrorCoverage::default();
    let mut samples_with_errors = 0;
    let rounds = 300;

    for round in 0..rounds {
        for template in &templates {
            let bytes = rng.mutate(template);
            let bytes = bytes.as_slice();
            let mut had_error = false;

            had_error |= run_parser(round, "superblock", &mut parser_hits, &mut coverage, || {
                let parsed = XfsSuperblock::parse_superblock_region(bytes)?;
                parsed.validate_geometry()?;
                parsed.validate_features()?;
                let _ = parsed.inode_at_offset(u64::MAX);
                parsed.locate_inode(InodeNumber(u64::MAX))
            });
            had_error |= run_parser(round, "agf", &mut parser_hits, &mut coverage, || {
                XfsAgf::parse(bytes, false)?.validate(xfs_types::GroupNumber(0), 500)
            });
            had_error |= run_parser(round, "agi", &mut parser_hits, &mut coverage, || {
                XfsAgi::parse(bytes, true)?.validate(xfs_types::GroupNumber(1))
            });
            had_error |= run_parser(round, "inode", &mut parser_hits, &mut coverage, || {
                XfsInode::parse(bytes, InodeNumber(131), &sb)
            });
            had_error |= run_parser(round, "extent_list", &mut parser_hits, &mut coverage, || {
                parse_extent_list(bytes, bytes.len() / 16 + 1)
            });
            had_error |= run_parser(round, "bmbt_root", &mut parser_hits, &mut coverage, || {
                parse_bmbt_root(bytes)
            });
            had_error |= run_parser(round, "bmbt_block", &mut parser_hits, &mut coverage, || {
                parse_bmbt_block(bytes, false)
            });
            had_error |= run_parser(round, "shortform", &mut parser_hits, &mut coverage, || {
                let dir = ShortformDir::parse(bytes, false)?;
                dir.lookup(128, b"be")?;
                drain(dir.iter())
            });
            had_error |= run_parser(round, "data_block", &mut parser_hits, &mut coverage, || {
                let header = DataBlockHeader::parse(bytes, false)?;
                let end = if header.is_block {
                    BlockTail::parse(bytes)?.leaf_start(bytes.len(), header.header_size)?
                } else {
                    bytes.len()
                };
                drain(DataEntryIter::new(bytes, header.header_size, end, false))
            });
            had_error |= run_parser(round, "leaf_block", &mut parser_hits, &mut coverage, || {
                let leaf = LeafBlock::parse(bytes, false)?;
                let _ = leaf.entries.is_sorted();
                Ok(leaf.entries.hash_run(0x2000).count())
            });
            had_error |= run_parser(round, "da_node", &mut parser_hits, &mut coverage, || {
                Ok(DaNode::parse(bytes, false)?.child_for(0x9000_0000))
            });
            had_error |= run_parser(round, "checksums", &mut parser_hits, &mut coverage, || {
                let results = [
                    verify_agf_checksum(bytes),
                    verify_agi_checksum(bytes),
                    verify_inode_checksum(bytes),
                    verify_bmbt_checksum(bytes),
                    verify_dir3_data_checksum(bytes),
                    verify_da3_checksum(bytes),
                ];
                results.into_iter().collect::<Result<Vec<()>, _>>()
            });

            if had_error {
                samples_with_errors += 1;
            }
        }
    }

    let expected_hits = u32::try_from(rounds * templates.len()).expect("fits");
    for (name, hits) in &parser_hits {
        assert_eq!(*hits, expected_hits, "parser {name} skipped samples");
    }
    assert_eq!(parser_hits.len(), 12);
    assert_eq!(samples_with_errors, rounds * templates.len());
    assert!(coverage.insufficient_data > 0, "{coverage:?}");
    assert!(coverage.invalid_magic > 0, "{coverage:?}");
    assert!(coverage.invalid_field > 0, "{coverage:?}");
}

#[test]
fn templates_parse_cleanly_before_mutation() {
    let sb = XfsSuperblock::parse_superblock_region(&superblock_template()).unwrap();
    assert_eq!(sb.volume_name, "fuzz");
    let inode = XfsInode::parse(&inode_template(), InodeNumber(131), &sb).unwrap();
    assert_eq!(inode.size, 8192);

    let sf = shortform_template();
    let dir = ShortformDir::parse(&sf, false).unwrap();
    assert_eq!(dir.lookup(128, b"be").unwrap(), Some(130));
    assert_eq!(drain(dir.iter()).unwrap(), 2);

    let block = block_dir_template();
    let header = DataBlockHeader::parse(&block, false).unwrap();
    assert!(header.is_block);
    let end = BlockTail::parse(&block)
        .unwrap()
        .leaf_start(block.len(), header.header_size)
        .unwrap();
    assert_eq!(drain(DataEntryIter::new(&block, 16, end, false)).unwrap(), 3);

    let leaf = leaf_template();
    let leaf = LeafBlock::parse(&leaf, false).unwrap();
    assert!(leaf.entries.is_sorted());
    assert_eq!(leaf.entries.hash_run(0x2000).count(), 1);

    assert_eq!(
        DaNode::parse(&da_node_template(), false).unwrap().entries.len(),
        2
    );
    assert!(parse_bmbt_block(&bmbt_template(), false).is_ok());
}
