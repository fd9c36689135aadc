/// File system codecs
///
/// A codec interprets the blocks of a volume: it names the volume, classifies
/// blocks, validates on-disk structures and, when the file system keeps an
/// allocation bitmap, exposes it through [`AllocationMap`].

/// Amiga OFS/FFS
pub mod amiga;
/// Fallback codec for file systems without block-level support
pub mod generic;

pub use amiga::{AmigaCodec, DosType};
pub use generic::GenericCodec;

use crate::error::{ImageError, Result};
use crate::image::{BlockSource, Transaction};
use std::fmt;

/// What a block holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockKind {
    /// Empty or not recognisable
    Unclassified = 0,
    /// Boot block
    Boot = 1,
    /// Root block
    Root = 2,
    /// Allocation bitmap
    Bitmap = 3,
    /// Allocation bitmap extension
    BitmapExt = 4,
    /// File header
    FileHeader = 5,
    /// File extension (list) block
    FileList = 6,
    /// User directory
    UserDir = 7,
    /// File data
    Data = 8,
}

impl BlockKind {
    /// Numeric code used in usage maps
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            BlockKind::Unclassified => "Unclassified",
            BlockKind::Boot => "Boot",
            BlockKind::Root => "Root",
            BlockKind::Bitmap => "Bitmap",
            BlockKind::BitmapExt => "Bitmap extension",
            BlockKind::FileHeader => "File header",
            BlockKind::FileList => "File list",
            BlockKind::UserDir => "User directory",
            BlockKind::Data => "Data",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of checking one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Nothing wrong found
    Valid,
    /// The block is damaged
    Invalid(String),
}

impl Validation {
    /// Was the block found intact?
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

/// Volume level information read from the root structures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootMetadata {
    /// Volume name
    pub name: String,
    /// Creation time (POSIX seconds)
    pub created: Option<i64>,
    /// Last modification time (POSIX seconds)
    pub modified: Option<i64>,
    /// Free blocks
    pub free_blocks: u64,
    /// Used blocks
    pub used_blocks: u64,
}

/// Directory entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Link of any kind
    Link,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name
    pub name: String,
    /// Entry type
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Header block of the entry
    pub block: u64,
}

/// Set of block numbers backed by a bit vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSet {
    bits: Vec<u64>,
    len: u64,
}

impl BlockSet {
    /// Empty set able to hold blocks `0..len`
    pub fn new(len: u64) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64) as usize],
            len,
        }
    }

    /// Set holding every block `0..len`
    pub fn full(len: u64) -> Self {
        let mut set = Self::new(len);
        for block in 0..len {
            set.insert(block);
        }
        set
    }

    /// Add a block; out-of-range blocks are ignored. Returns true if newly added
    pub fn insert(&mut self, block: u64) -> bool {
        if block >= self.len {
            return false;
        }
        let (word, bit) = ((block / 64) as usize, block % 64);
        let was = self.bits[word] & (1 << bit) != 0;
        self.bits[word] |= 1 << bit;
        !was
    }

    /// Remove a block
    pub fn remove(&mut self, block: u64) {
        if block < self.len {
            self.bits[(block / 64) as usize] &= !(1 << (block % 64));
        }
    }

    /// Is the block in the set?
    pub fn contains(&self, block: u64) -> bool {
        block < self.len && self.bits[(block / 64) as usize] & (1 << (block % 64)) != 0
    }

    /// Number of blocks in the set
    pub fn count(&self) -> u64 {
        self.bits.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Capacity of the set
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Does the set have no capacity?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Blocks in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len).filter(move |&b| self.contains(b))
    }
}

/// A requested change to the allocation bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationChange {
    /// Volume block
    pub block: u64,
    /// Mark as allocated (true) or free (false)
    pub allocated: bool,
}

/// Block allocation bookkeeping of a file system
pub trait AllocationMap: Send + Sync {
    /// Blocks the bitmap marks as allocated
    fn allocated(&self, volume: &dyn BlockSource) -> Result<BlockSet>;

    /// Blocks reachable from the root structures
    fn referenced(&self, volume: &dyn BlockSource) -> Result<BlockSet>;

    /// Is a single block marked as allocated?
    fn is_allocated(&self, volume: &dyn BlockSource, block: u64) -> Result<bool> {
        Ok(self.allocated(volume)?.contains(block))
    }

    /// Write bitmap changes
    fn apply(&self, tx: &mut Transaction<'_>, changes: &[AllocationChange]) -> Result<()>;
}

/// Interprets the blocks of a volume
pub trait FileSystemCodec: Send + Sync {
    /// Name of the file system
    fn name(&self) -> String;

    /// Volume name, dates and block counts
    fn metadata(&self, volume: &dyn BlockSource) -> Result<RootMetadata>;

    /// Classify one block
    fn classify(&self, volume: &dyn BlockSource, block: u64) -> Result<BlockKind>;

    /// Check one block for damage; `strict` adds checksum tests
    fn validate(&self, volume: &dyn BlockSource, block: u64, strict: bool) -> Result<Validation>;

    /// Classify many blocks
    fn classify_many(&self, volume: &dyn BlockSource, blocks: &[u64]) -> Result<Vec<BlockKind>> {
        blocks.iter().map(|&b| self.classify(volume, b)).collect()
    }

    /// Validate every block of the volume in ascending order
    fn validate_all(&self, volume: &dyn BlockSource, strict: bool) -> Result<Vec<Validation>> {
        (0..volume.num_blocks())
            .map(|b| self.validate(volume, b, strict))
            .collect()
    }

    /// List the root directory
    fn read_dir(&self, _volume: &dyn BlockSource) -> Result<Vec<DirEntry>> {
        Err(ImageError::unsupported(format!("{} has no directory support", self.name())))
    }

    /// Allocation bitmap support
    fn allocation(&self) -> Option<&dyn AllocationMap> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_set() {
        let mut set = BlockSet::new(130);
        assert!(set.insert(0));
        assert!(set.insert(129));
        assert!(!set.insert(129));
        assert!(!set.insert(130));
        assert!(set.contains(129));
        assert!(!set.contains(64));
        assert_eq!(set.count(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 129]);

        set.remove(0);
        assert_eq!(set.count(), 1);
        assert_eq!(BlockSet::full(70).count(), 70);
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(BlockKind::Unclassified.code(), 0);
        assert_eq!(BlockKind::Data.code(), 8);
        assert_eq!(BlockKind::BitmapExt.to_string(), "Bitmap extension");
    }
}
