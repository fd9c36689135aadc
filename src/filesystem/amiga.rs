/// Amiga Original and Fast File System (OFS/FFS)
///
/// Layout summary (all values big-endian longwords):
/// - Blocks 0-1: boot block, `DOS` + flags byte, checksum at offset 4
/// - Root block in the middle of the volume, hash table of directory entries
/// - Bitmap blocks listed in the root (and extension blocks), one bit per
///   block starting at block 2, a set bit means free
/// - Header, list and (OFS) data blocks carry a checksum at offset 20

use crate::error::{ImageError, Result};
use crate::filesystem::{
    AllocationChange, AllocationMap, BlockKind, BlockSet, DirEntry, EntryKind, FileSystemCodec,
    RootMetadata, Validation,
};
use crate::format::constants::*;
use crate::image::{BlockSource, Transaction};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Header key (own block number)
pub(crate) const HEADER_KEY: usize = 4;
/// High sequence (number of pointers used in the table)
pub(crate) const HIGH_SEQ: usize = 8;
/// Hash table size (root only)
pub(crate) const HT_SIZE: usize = 12;
/// First data block (OFS)
pub(crate) const FIRST_DATA: usize = 16;
/// Header checksum
pub(crate) const CHECKSUM: usize = 20;
/// Hash table or data block pointer table
pub(crate) const TABLE: usize = 24;

/// OFS data block: sequence number
pub(crate) const DATA_SEQ: usize = 8;
/// OFS data block: payload size
pub(crate) const DATA_SIZE: usize = 12;
/// OFS data block: next data block
pub(crate) const DATA_NEXT: usize = 16;
/// OFS data block: payload start
pub(crate) const DATA_START: usize = 24;

/// Offsets measured from the end of a block
pub(crate) mod tail {
    pub const BM_FLAG: usize = 200;
    pub const BM_PAGES: usize = 196;
    pub const BYTE_SIZE: usize = 188;
    pub const BM_EXT: usize = 96;
    pub const DATE: usize = 92;
    pub const NAME: usize = 80;
    pub const DISK_DATE: usize = 40;
    pub const CREATED: usize = 28;
    pub const HASH_CHAIN: usize = 16;
    pub const PARENT: usize = 12;
    pub const EXTENSION: usize = 8;
    pub const SEC_TYPE: usize = 4;
}

/// Read a big-endian longword
pub(crate) fn be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// Write a big-endian longword
pub(crate) fn put_be32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Wrapping sum of all longwords
pub(crate) fn sum_longs(data: &[u8]) -> u32 {
    data.chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .fold(0u32, u32::wrapping_add)
}

/// Checksum value that makes the longword sum of `data` zero
pub(crate) fn block_checksum(data: &[u8], offset: usize) -> u32 {
    sum_longs(data).wrapping_sub(be32(data, offset)).wrapping_neg()
}

/// Boot block checksum over both boot blocks (carry wraps around)
pub(crate) fn boot_checksum(boot: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for (i, chunk) in boot.chunks_exact(4).enumerate() {
        if i == 1 {
            continue;
        }
        let (next, carry) = sum.overflowing_add(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        sum = next.wrapping_add(carry as u32);
    }
    !sum
}

/// Number of hash table entries for a block size
pub(crate) fn table_size(block_size: usize) -> usize {
    block_size / 4 - 56
}

/// Bitmap bits held by one bitmap block
pub(crate) fn bits_per_page(block_size: usize) -> u64 {
    (block_size as u64 - 4) * 8
}

/// Convert an Amiga date stamp to POSIX seconds
pub fn amiga_to_posix(days: u32, mins: u32, ticks: u32) -> i64 {
    AMIGA_EPOCH_OFFSET + days as i64 * 86_400 + mins as i64 * 60 + ticks as i64 / 50
}

/// Convert POSIX seconds to an Amiga date stamp
pub fn posix_to_amiga(secs: i64) -> (u32, u32, u32) {
    let rel = (secs - AMIGA_EPOCH_OFFSET).max(0);
    let days = rel / 86_400;
    let rem = rel % 86_400;
    (days as u32, (rem / 60) as u32, ((rem % 60) * 50) as u32)
}

fn to_upper(c: u8, intl: bool) -> u8 {
    match c {
        b'a'..=b'z' => c - 32,
        224..=254 if intl && c != 247 => c - 32,
        _ => c,
    }
}

/// Hash table slot of a name
pub(crate) fn hash_name(name: &[u8], table_size: usize, intl: bool) -> usize {
    let hash = name.iter().fold(name.len() as u32, |hash, &c| {
        (hash.wrapping_mul(13).wrapping_add(to_upper(c, intl) as u32)) & 0x7ff
    });
    hash as usize % table_size
}

/// Read a BCPL string (length byte followed by Latin-1 characters)
pub(crate) fn bcpl_string(data: &[u8], offset: usize) -> String {
    let len = (data[offset] as usize).min(AMIGA_NAME_MAX);
    data[offset + 1..offset + 1 + len].iter().map(|&b| b as char).collect()
}

fn sec_type(data: &[u8]) -> i32 {
    be32(data, data.len() - tail::SEC_TYPE) as i32
}

fn is_root(data: &[u8]) -> bool {
    be32(data, 0) == T_HEADER && sec_type(data) == ST_ROOT
}

/// DOS type flags from the boot block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosType(u8);

impl DosType {
    /// Original File System
    pub const OFS: DosType = DosType(0);
    /// Fast File System
    pub const FFS: DosType = DosType(1);
    /// Fast File System, international mode
    pub const FFS_INTL: DosType = DosType(3);

    /// Create from the fourth byte of the boot block
    pub fn from_flags(flags: u8) -> Self {
        DosType(flags & 0x07)
    }

    /// Flags byte
    pub fn flags(&self) -> u8 {
        self.0
    }

    /// Data blocks without headers?
    pub fn is_ffs(&self) -> bool {
        self.0 & 0x01 != 0
    }

    /// International character handling in name hashing?
    pub fn is_intl(&self) -> bool {
        self.0 & 0x06 != 0
    }

    /// Directory cache blocks?
    pub fn is_dircache(&self) -> bool {
        self.0 & 0x04 != 0
    }
}

impl fmt::Display for DosType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_ffs() { "FFS" } else { "OFS" })?;
        if self.is_dircache() {
            f.write_str("-DC")
        } else if self.is_intl() {
            f.write_str("-INTL")
        } else {
            Ok(())
        }
    }
}

/// Bitmap locations read from the root block
#[derive(Debug, Default)]
struct Layout {
    root_ok: bool,
    /// Bitmap block per page; `None` where the pointer is missing
    pages: Vec<Option<u64>>,
    extensions: Vec<u64>,
}

impl Layout {
    fn is_page(&self, block: u64) -> bool {
        self.pages.contains(&Some(block))
    }

    fn is_extension(&self, block: u64) -> bool {
        self.extensions.contains(&block)
    }
}

/// Codec for Amiga OFS/FFS volumes
#[derive(Debug, Clone)]
pub struct AmigaCodec {
    dos: DosType,
    root: u64,
}

impl AmigaCodec {
    /// Create a codec with a known root block
    pub fn new(dos: DosType, root: u64) -> Self {
        Self { dos, root }
    }

    /// Recognise an Amiga volume from its boot block
    pub fn detect(volume: &dyn BlockSource) -> Result<Option<Self>> {
        if volume.num_blocks() < 4 {
            return Ok(None);
        }
        let boot = volume.read_block(0)?;
        if &boot[0..3] != AMIGA_DOS_ID || boot[3] > 7 {
            log::debug!("amiga: no DOS signature in boot block");
            return Ok(None);
        }

        let codec = Self::new(DosType::from_flags(boot[3]), root_block(volume.num_blocks()));
        log::debug!("amiga: {} volume, root block {}", codec.dos, codec.root);
        Ok(Some(codec))
    }

    /// DOS type
    pub fn dos_type(&self) -> DosType {
        self.dos
    }

    /// Root block number
    pub fn root(&self) -> u64 {
        self.root
    }

    fn layout(&self, volume: &dyn BlockSource) -> Result<Layout> {
        let blocks = volume.num_blocks();
        let bsize = volume.block_size();
        if self.root >= blocks {
            return Ok(Layout::default());
        }

        let root = volume.read_block(self.root)?;
        if !is_root(&root) {
            log::warn!("amiga: block {} is not a root block", self.root);
            return Ok(Layout::default());
        }

        let valid = |ptr: u32| (ptr != 0 && (ptr as u64) < blocks).then_some(ptr as u64);
        let mut pages: Vec<Option<u64>> = (0..AMIGA_BM_PAGES)
            .map(|i| valid(be32(&root, bsize - tail::BM_PAGES + i * 4)))
            .collect();

        let mut extensions = Vec::new();
        let mut next = be32(&root, bsize - tail::BM_EXT);
        while let Some(ext) = valid(next) {
            if extensions.contains(&ext) {
                log::warn!("amiga: bitmap extension chain loops at block {}", ext);
                break;
            }
            extensions.push(ext);
            let data = volume.read_block(ext)?;
            pages.extend((0..bsize / 4 - 1).map(|i| valid(be32(&data, i * 4))));
            next = be32(&data, bsize - 4);
        }

        let needed = blocks.saturating_sub(2).div_ceil(bits_per_page(bsize)) as usize;
        pages.truncate(needed);

        Ok(Layout {
            root_ok: true,
            pages,
            extensions,
        })
    }

    fn mark_file(&self, volume: &dyn BlockSource, header: &[u8], set: &mut BlockSet) -> Result<()> {
        let blocks = volume.num_blocks();
        let bsize = volume.block_size();
        let entries = table_size(bsize);

        // OFS data blocks are also chained through their headers
        if !self.dos.is_ffs() {
            let mut chain = HashSet::new();
            let mut next = be32(header, FIRST_DATA) as u64;
            while next != 0 && next < blocks && chain.insert(next) {
                let data = volume.read_block(next)?;
                if be32(&data, 0) != T_DATA {
                    break;
                }
                set.insert(next);
                next = be32(&data, DATA_NEXT) as u64;
            }
        }

        let mut data = header.to_vec();
        loop {
            let count = (be32(&data, HIGH_SEQ) as usize).min(entries);
            for i in 0..count {
                let ptr = be32(&data, TABLE + (entries - 1 - i) * 4) as u64;
                if ptr != 0 && ptr < blocks {
                    set.insert(ptr);
                }
            }

            let ext = be32(&data, bsize - tail::EXTENSION) as u64;
            if ext == 0 || ext >= blocks || !set.insert(ext) {
                return Ok(());
            }
            data = volume.read_block(ext)?;
            if be32(&data, 0) != T_LIST {
                return Ok(());
            }
        }
    }

    fn classify_with(&self, layout: &Layout, block: u64, data: &[u8]) -> BlockKind {
        if block < 2 {
            return BlockKind::Boot;
        }
        if layout.is_page(block) {
            return BlockKind::Bitmap;
        }
        if layout.is_extension(block) {
            return BlockKind::BitmapExt;
        }
        if data.iter().all(|&b| b == 0) {
            return BlockKind::Unclassified;
        }

        match (be32(data, 0), sec_type(data)) {
            (T_HEADER, ST_ROOT) => BlockKind::Root,
            (T_HEADER, ST_USERDIR | ST_LINKDIR) => BlockKind::UserDir,
            (T_HEADER, ST_FILE | ST_LINKFILE | ST_SOFTLINK) => BlockKind::FileHeader,
            (T_LIST, ST_FILE) => BlockKind::FileList,
            (T_DATA, _) if !self.dos.is_ffs() => BlockKind::Data,
            _ if self.dos.is_ffs() => BlockKind::Data,
            _ => BlockKind::Unclassified,
        }
    }

    fn validate_with(
        &self,
        volume: &dyn BlockSource,
        layout: &Layout,
        block: u64,
        data: &[u8],
        strict: bool,
    ) -> Result<Validation> {
        let blocks = volume.num_blocks();
        let bsize = volume.block_size();
        let checksum = |what: &str| {
            if strict && sum_longs(data) != 0 {
                Validation::Invalid(format!("{} checksum mismatch", what))
            } else {
                Validation::Valid
            }
        };

        if block == 0 {
            if &data[0..3] != AMIGA_DOS_ID {
                return Ok(Validation::Invalid("boot block lacks DOS signature".into()));
            }
            if strict {
                let mut boot = data.to_vec();
                boot.extend(volume.read_block(1)?);
                if boot_checksum(&boot) != be32(data, 4) {
                    return Ok(Validation::Invalid("boot block checksum mismatch".into()));
                }
            }
            return Ok(Validation::Valid);
        }
        if block == 1 {
            return Ok(Validation::Valid);
        }

        if block == self.root {
            if !is_root(data) {
                return Ok(Validation::Invalid(format!(
                    "root block has type {}/{}",
                    be32(data, 0),
                    sec_type(data)
                )));
            }
            if be32(data, HT_SIZE) as usize != table_size(bsize) {
                return Ok(Validation::Invalid("root hash table size is wrong".into()));
            }
            if strict && be32(data, bsize - tail::BM_FLAG) != 0xFFFF_FFFF {
                return Ok(Validation::Invalid("bitmap is flagged invalid".into()));
            }
            return Ok(checksum("root block"));
        }

        if layout.is_page(block) {
            return Ok(checksum("bitmap"));
        }
        if layout.is_extension(block) || data.iter().all(|&b| b == 0) {
            return Ok(Validation::Valid);
        }

        let in_range = |ptr: u32| (ptr as u64) < blocks;
        let header_key = be32(data, HEADER_KEY);
        let st = sec_type(data);
        match be32(data, 0) {
            T_HEADER if matches!(st, ST_USERDIR | ST_FILE | ST_SOFTLINK | ST_LINKDIR | ST_LINKFILE) => {
                let parent = be32(data, bsize - tail::PARENT);
                if header_key as u64 != block {
                    Ok(Validation::Invalid(format!("header key {} does not match", header_key)))
                } else if parent == 0 || !in_range(parent) {
                    Ok(Validation::Invalid(format!("parent {} out of range", parent)))
                } else if !in_range(be32(data, bsize - tail::HASH_CHAIN)) {
                    Ok(Validation::Invalid("hash chain out of range".into()))
                } else {
                    Ok(checksum("header"))
                }
            }
            T_LIST if st == ST_FILE => {
                let parent = be32(data, bsize - tail::PARENT);
                if header_key as u64 != block {
                    Ok(Validation::Invalid(format!("header key {} does not match", header_key)))
                } else if parent == 0 || !in_range(parent) {
                    Ok(Validation::Invalid(format!("file header {} out of range", parent)))
                } else {
                    Ok(checksum("extension block"))
                }
            }
            T_DATA if !self.dos.is_ffs() => {
                if header_key == 0 || !in_range(header_key) {
                    Ok(Validation::Invalid(format!("file header {} out of range", header_key)))
                } else if be32(data, DATA_SEQ) == 0 {
                    Ok(Validation::Invalid("data block sequence number is zero".into()))
                } else if be32(data, DATA_SIZE) as usize > bsize - DATA_START {
                    Ok(Validation::Invalid("data block size too large".into()))
                } else if !in_range(be32(data, DATA_NEXT)) {
                    Ok(Validation::Invalid("next data block out of range".into()))
                } else {
                    Ok(checksum("data block"))
                }
            }
            _ => Ok(Validation::Valid),
        }
    }
}

/// Root block position for a volume of `blocks` blocks with two reserved blocks
pub fn root_block(blocks: u64) -> u64 {
    (blocks + 1) / 2
}

impl FileSystemCodec for AmigaCodec {
    fn name(&self) -> String {
        self.dos.to_string()
    }

    fn metadata(&self, volume: &dyn BlockSource) -> Result<RootMetadata> {
        let allocated = self.allocated(volume)?;
        let used = allocated.count();
        let mut meta = RootMetadata {
            free_blocks: volume.num_blocks() - used,
            used_blocks: used,
            ..RootMetadata::default()
        };

        if self.root < volume.num_blocks() {
            let root = volume.read_block(self.root)?;
            if is_root(&root) {
                let bsize = root.len();
                let stamp = |off: usize| {
                    amiga_to_posix(be32(&root, off), be32(&root, off + 4), be32(&root, off + 8))
                };
                meta.name = bcpl_string(&root, bsize - tail::NAME);
                meta.created = Some(stamp(bsize - tail::CREATED));
                meta.modified = Some(stamp(bsize - tail::DATE));
            }
        }
        Ok(meta)
    }

    fn classify(&self, volume: &dyn BlockSource, block: u64) -> Result<BlockKind> {
        Ok(self.classify_many(volume, &[block])?[0])
    }

    fn classify_many(&self, volume: &dyn BlockSource, blocks: &[u64]) -> Result<Vec<BlockKind>> {
        let layout = self.layout(volume)?;
        blocks
            .iter()
            .map(|&b| Ok(self.classify_with(&layout, b, &volume.read_block(b)?)))
            .collect()
    }

    fn validate(&self, volume: &dyn BlockSource, block: u64, strict: bool) -> Result<Validation> {
        let layout = self.layout(volume)?;
        let data = volume.read_block(block)?;
        self.validate_with(volume, &layout, block, &data, strict)
    }

    fn validate_all(&self, volume: &dyn BlockSource, strict: bool) -> Result<Vec<Validation>> {
        let layout = self.layout(volume)?;
        (0..volume.num_blocks())
            .map(|b| {
                let data = volume.read_block(b)?;
                self.validate_with(volume, &layout, b, &data, strict)
            })
            .collect()
    }

    fn read_dir(&self, volume: &dyn BlockSource) -> Result<Vec<DirEntry>> {
        let blocks = volume.num_blocks();
        let root = volume.read_block(self.root)?;
        if !is_root(&root) {
            return Err(ImageError::corrupted(format!("block {} is not a root block", self.root)));
        }

        let bsize = root.len();
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for i in 0..table_size(bsize) {
            let mut item = be32(&root, TABLE + i * 4) as u64;
            while item != 0 && item < blocks && seen.insert(item) {
                let data = volume.read_block(item)?;
                if be32(&data, 0) != T_HEADER {
                    break;
                }
                let kind = match sec_type(&data) {
                    ST_USERDIR => EntryKind::Directory,
                    ST_FILE => EntryKind::File,
                    _ => EntryKind::Link,
                };
                entries.push(DirEntry {
                    name: bcpl_string(&data, bsize - tail::NAME),
                    kind,
                    size: if kind == EntryKind::File {
                        be32(&data, bsize - tail::BYTE_SIZE) as u64
                    } else {
                        0
                    },
                    block: item,
                });
                item = be32(&data, bsize - tail::HASH_CHAIN) as u64;
            }
        }

        entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(entries)
    }

    fn allocation(&self) -> Option<&dyn AllocationMap> {
        Some(self)
    }
}

impl AllocationMap for AmigaCodec {
    fn allocated(&self, volume: &dyn BlockSource) -> Result<BlockSet> {
        let blocks = volume.num_blocks();
        let bits = bits_per_page(volume.block_size());
        let layout = self.layout(volume)?;

        // Blocks without a readable bitmap count as allocated
        let mut set = BlockSet::full(blocks);
        for (index, page) in layout.pages.iter().enumerate() {
            let Some(page) = page else {
                continue;
            };
            let data = volume.read_block(*page)?;
            let first = 2 + index as u64 * bits;
            for bit in 0..bits.min(blocks.saturating_sub(first)) {
                let word = be32(&data, 4 + (bit / 32) as usize * 4);
                if word & (1 << (bit % 32)) != 0 {
                    set.remove(first + bit);
                }
            }
        }
        Ok(set)
    }

    fn referenced(&self, volume: &dyn BlockSource) -> Result<BlockSet> {
        let blocks = volume.num_blocks();
        let entries = table_size(volume.block_size());
        let chain = volume.block_size() - tail::HASH_CHAIN;

        let mut set = BlockSet::new(blocks);
        set.insert(0);
        set.insert(1);
        set.insert(self.root);

        let layout = self.layout(volume)?;
        if !layout.root_ok {
            return Ok(set);
        }
        for page in layout.pages.iter().flatten() {
            set.insert(*page);
        }
        for ext in &layout.extensions {
            set.insert(*ext);
        }

        let mut dirs = vec![self.root];
        while let Some(dir) = dirs.pop() {
            let data = volume.read_block(dir)?;
            for i in 0..entries {
                let mut item = be32(&data, TABLE + i * 4) as u64;
                while item != 0 && item < blocks && set.insert(item) {
                    let entry = volume.read_block(item)?;
                    if be32(&entry, 0) != T_HEADER {
                        break;
                    }
                    match sec_type(&entry) {
                        ST_USERDIR => dirs.push(item),
                        ST_FILE => self.mark_file(volume, &entry, &mut set)?,
                        _ => {}
                    }
                    item = be32(&entry, chain) as u64;
                }
            }
        }
        Ok(set)
    }

    fn apply(&self, tx: &mut Transaction<'_>, changes: &[AllocationChange]) -> Result<()> {
        let layout = self.layout(&*tx)?;
        if !layout.root_ok {
            return Err(ImageError::corrupted("root block is damaged, bitmap location unknown"));
        }

        let bits = bits_per_page(tx.block_size());
        let mut by_page: BTreeMap<usize, Vec<&AllocationChange>> = BTreeMap::new();
        for change in changes.iter().filter(|c| c.block >= 2 && c.block < tx.num_blocks()) {
            by_page
                .entry(((change.block - 2) / bits) as usize)
                .or_default()
                .push(change);
        }

        for (index, group) in by_page {
            let Some(Some(page)) = layout.pages.get(index) else {
                log::warn!("amiga: no bitmap block for page {}, {} changes skipped", index, group.len());
                continue;
            };

            let mut data = tx.read_block(*page)?;
            for change in group {
                let bit = (change.block - 2) % bits;
                let offset = 4 + (bit / 32) as usize * 4;
                let mask = 1u32 << (bit % 32);
                let word = be32(&data, offset);
                put_be32(&mut data, offset, if change.allocated { word & !mask } else { word | mask });
            }
            let sum = block_checksum(&data, 0);
            put_be32(&mut data, 0, sum);
            tx.write_block(*page, &data)?;
            log::debug!("amiga: rewrote bitmap block {}", page);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksums() {
        let mut block = vec![0u8; 512];
        put_be32(&mut block, 0, T_HEADER);
        put_be32(&mut block, 508, 1);
        let sum = block_checksum(&block, CHECKSUM);
        put_be32(&mut block, CHECKSUM, sum);
        assert_eq!(sum_longs(&block), 0);

        // Recomputing with the checksum already in place gives the same value
        assert_eq!(block_checksum(&block, CHECKSUM), sum);
    }

    #[test]
    fn test_boot_checksum_carry() {
        let mut boot = vec![0u8; 1024];
        boot[0..4].copy_from_slice(b"DOS\0");
        put_be32(&mut boot, 8, 880);
        let expected = !(0x444F_5300u32.wrapping_add(880));
        assert_eq!(boot_checksum(&boot), expected);

        put_be32(&mut boot, 12, 0xFFFF_FFFF);
        // Adding 0xFFFFFFFF overflows once and the carry restores the sum
        assert_eq!(boot_checksum(&boot), expected);
    }

    #[test]
    fn test_dates() {
        assert_eq!(amiga_to_posix(0, 0, 0), 252_460_800);
        assert_eq!(amiga_to_posix(1, 1, 50), 252_460_800 + 86_400 + 61);
        assert_eq!(posix_to_amiga(252_460_800 + 86_400 + 61), (1, 1, 50));
        assert_eq!(posix_to_amiga(0), (0, 0, 0));
    }

    #[test]
    fn test_hash_name() {
        assert_eq!(hash_name(b"s", 72, false), hash_name(b"S", 72, false));
        assert!(hash_name(b"Startup-Sequence", 72, false) < 72);
        assert_eq!(hash_name(b"\xe9", 72, true), hash_name(b"\xc9", 72, true));
    }

    #[test]
    fn test_dos_type() {
        assert_eq!(DosType::from_flags(0).to_string(), "OFS");
        assert_eq!(DosType::from_flags(1).to_string(), "FFS");
        assert_eq!(DosType::from_flags(3).to_string(), "FFS-INTL");
        assert_eq!(DosType::from_flags(5).to_string(), "FFS-DC");
        assert!(DosType::FFS_INTL.is_intl());
    }

    #[test]
    fn test_root_position() {
        assert_eq!(root_block(1760), 880);
        assert_eq!(root_block(880), 440);
        assert_eq!(root_block(3520), 1760);
    }

    #[test]
    fn test_bcpl_string() {
        let mut data = vec![0u8; 64];
        data[10] = 5;
        data[11..16].copy_from_slice(b"Empty");
        assert_eq!(bcpl_string(&data, 10), "Empty");
    }
}
