/// Raw block storage backing one mounted image

use crate::error::{ImageError, Result};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

const CACHED: u8 = 0x01;
const DIRTY: u8 = 0x02;

/// In-memory copy of an image file, addressed in fixed-size blocks
///
/// Reads take a shared lock on the data, writes an exclusive one. Callers that
/// change on-disk structures hold [`BlockStore::lock_writes`] for the whole
/// change so that at most one writer touches a device at a time.
#[derive(Debug)]
pub struct BlockStore {
    path: PathBuf,
    block_size: usize,
    num_blocks: u64,
    data: RwLock<Vec<u8>>,
    /// Bytes following the last whole block (for example D64 error tables)
    trailer: RwLock<Vec<u8>>,
    flags: Mutex<Vec<u8>>,
    write_lock: Mutex<()>,
}

impl BlockStore {
    /// Load an image file into memory
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        log::debug!("store: read {} bytes from {}", bytes.len(), path.display());
        Self::from_bytes(path, block_size, bytes)
    }

    /// Wrap bytes already in memory, using every whole block
    pub fn from_bytes<P: AsRef<Path>>(path: P, block_size: usize, bytes: Vec<u8>) -> Result<Self> {
        if block_size == 0 {
            return Err(ImageError::mount_failed("block size must not be zero"));
        }
        let num_blocks = (bytes.len() / block_size) as u64;
        Self::with_blocks(path, block_size, num_blocks, bytes)
    }

    /// Wrap bytes already in memory, using the first `num_blocks` blocks
    ///
    /// Anything after the last block is kept untouched and written back on save.
    pub fn with_blocks<P: AsRef<Path>>(
        path: P,
        block_size: usize,
        num_blocks: u64,
        mut bytes: Vec<u8>,
    ) -> Result<Self> {
        if block_size == 0 || num_blocks * block_size as u64 > bytes.len() as u64 {
            return Err(ImageError::mount_failed(format!(
                "{} blocks of {} bytes do not fit in {} bytes",
                num_blocks,
                block_size,
                bytes.len()
            )));
        }

        let trailer = bytes.split_off(num_blocks as usize * block_size);
        if !trailer.is_empty() {
            log::debug!("store: keeping {} trailing bytes", trailer.len());
        }

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            block_size,
            num_blocks,
            data: RwLock::new(bytes),
            trailer: RwLock::new(trailer),
            flags: Mutex::new(vec![0; num_blocks as usize]),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of a block in bytes
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of whole blocks
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    /// Total size of the block area in bytes
    pub fn num_bytes(&self) -> u64 {
        self.num_blocks * self.block_size as u64
    }

    fn check(&self, block: u64, offset: usize, length: usize) -> Result<usize> {
        if block >= self.num_blocks {
            log::error!("store: block {} beyond end of image ({} blocks)", block, self.num_blocks);
            return Err(ImageError::BlockOutOfRange {
                block,
                max: self.num_blocks.saturating_sub(1),
            });
        }
        if offset.checked_add(length).map_or(true, |end| end > self.block_size) {
            log::error!("store: {} bytes at offset {} overrun block {}", length, offset, block);
            return Err(ImageError::OffsetOutOfRange {
                offset,
                length,
                block_size: self.block_size,
            });
        }
        Ok(block as usize * self.block_size + offset)
    }

    /// Copy bytes out of a block
    pub fn read_range(&self, block: u64, offset: usize, length: usize) -> Result<Vec<u8>> {
        let start = self.check(block, offset, length)?;
        let bytes = self.data.read()[start..start + length].to_vec();
        self.flags.lock()[block as usize] |= CACHED;
        Ok(bytes)
    }

    /// Copy a whole block
    pub fn read_block(&self, block: u64) -> Result<Vec<u8>> {
        self.read_range(block, 0, self.block_size)
    }

    /// Copy a whole block without touching the cache flags
    pub fn peek_block(&self, block: u64) -> Result<Vec<u8>> {
        let start = self.check(block, 0, self.block_size)?;
        Ok(self.data.read()[start..start + self.block_size].to_vec())
    }

    /// Overwrite bytes in a block
    ///
    /// Callers hold the guard from [`BlockStore::lock_writes`].
    pub(crate) fn write_range(&self, block: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        let start = self.check(block, offset, bytes.len())?;
        self.data.write()[start..start + bytes.len()].copy_from_slice(bytes);
        self.flags.lock()[block as usize] |= CACHED | DIRTY;
        Ok(())
    }

    /// Serialize mutations on this device
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Has the block been read or written since load?
    pub fn is_cached(&self, block: u64) -> bool {
        self.flag(block, CACHED)
    }

    /// Does the block differ from the file on disk?
    pub fn is_dirty(&self, block: u64) -> bool {
        self.flag(block, DIRTY)
    }

    fn flag(&self, block: u64, bit: u8) -> bool {
        self.flags
            .lock()
            .get(block as usize)
            .is_some_and(|flags| flags & bit != 0)
    }

    /// Flag a block as modified without writing to it
    pub fn mark_dirty(&self, block: u64) -> Result<()> {
        self.check(block, 0, 0)?;
        self.flags.lock()[block as usize] |= CACHED | DIRTY;
        Ok(())
    }

    /// Count cached blocks inside a range
    pub fn cached_count(&self, range: Range<u64>) -> u64 {
        self.count(range, CACHED)
    }

    /// Count dirty blocks inside a range
    pub fn dirty_count(&self, range: Range<u64>) -> u64 {
        self.count(range, DIRTY)
    }

    fn count(&self, range: Range<u64>, bit: u8) -> u64 {
        let flags = self.flags.lock();
        let end = range.end.min(flags.len() as u64) as usize;
        let start = (range.start as usize).min(end);
        flags[start..end].iter().filter(|&&f| f & bit != 0).count() as u64
    }

    /// Are there unsaved changes?
    pub fn is_modified(&self) -> bool {
        self.flags.lock().iter().any(|&f| f & DIRTY != 0)
    }

    /// Write the image back to its own file
    pub fn save(&self) -> Result<()> {
        self.save_as(&self.path)?;
        for flags in self.flags.lock().iter_mut() {
            *flags &= !DIRTY;
        }
        Ok(())
    }

    /// Write a copy of the image to another file
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let _guard = self.lock_writes();
        let mut bytes = self.data.read().clone();
        bytes.extend_from_slice(&self.trailer.read());
        fs::write(path, &bytes)?;
        log::info!("store: wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    /// Discard changes by reloading the backing file
    pub fn revert(&self) -> Result<()> {
        let _guard = self.lock_writes();
        let mut bytes = fs::read(&self.path)?;
        let expected = self.num_bytes() as usize;
        if bytes.len() < expected {
            return Err(ImageError::corrupted(format!(
                "{} shrank to {} bytes",
                self.path.display(),
                bytes.len()
            )));
        }
        let trailer = bytes.split_off(expected);
        *self.data.write() = bytes;
        *self.trailer.write() = trailer;
        self.flags.lock().iter_mut().for_each(|f| *f = 0);
        log::info!("store: reverted {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(blocks: usize) -> BlockStore {
        BlockStore::from_bytes("test.adf", 512, vec![0; blocks * 512]).unwrap()
    }

    #[test]
    fn test_read_write() {
        let store = store(4);
        store.write_range(2, 10, &[1, 2, 3]).unwrap();
        assert_eq!(store.read_range(2, 9, 5).unwrap(), vec![0, 1, 2, 3, 0]);
        assert!(store.is_dirty(2));
        assert!(!store.is_dirty(1));
        assert_eq!(store.dirty_count(0..4), 1);
    }

    #[test]
    fn test_bounds() {
        let store = store(4);
        assert!(matches!(
            store.read_range(4, 0, 1),
            Err(ImageError::BlockOutOfRange { block: 4, max: 3 })
        ));
        assert!(matches!(
            store.read_range(0, 510, 4),
            Err(ImageError::OffsetOutOfRange { .. })
        ));
        assert!(!store.is_cached(99));
    }

    #[test]
    fn test_cached_tracking() {
        let store = store(4);
        assert_eq!(store.cached_count(0..4), 0);
        store.read_block(3).unwrap();
        assert!(store.is_cached(3));
        assert_eq!(store.cached_count(0..4), 1);
        assert_eq!(store.cached_count(0..3), 0);
    }

    #[test]
    fn test_trailer_is_kept() {
        let store = BlockStore::from_bytes("x.d64", 256, vec![7; 256 * 2 + 3]).unwrap();
        assert_eq!(store.num_blocks(), 2);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("copy.d64");
        store.save_as(&out).unwrap();
        assert_eq!(std::fs::read(&out).unwrap().len(), 256 * 2 + 3);
    }

    #[test]
    fn test_save_and_revert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.adf");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();

        let store = BlockStore::open(&path, 512).unwrap();
        store.write_range(1, 0, &[0xAA]).unwrap();
        store.revert().unwrap();
        assert_eq!(store.read_range(1, 0, 1).unwrap(), vec![0]);
        assert!(!store.is_modified());

        store.write_range(1, 0, &[0xBB]).unwrap();
        store.save().unwrap();
        assert!(!store.is_modified());
        assert_eq!(std::fs::read(&path).unwrap()[512], 0xBB);
    }
}
