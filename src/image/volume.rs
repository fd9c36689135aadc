/// Volume view over a block range of a device

use crate::error::{ImageError, Result};
use crate::image::BlockStore;
use parking_lot::MutexGuard;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Read access to numbered blocks
///
/// Implemented by [`Volume`] and by an open [`Transaction`], so file system
/// code reads through the same interface whether or not it is mid-change.
pub trait BlockSource {
    /// Size of a block in bytes
    fn block_size(&self) -> usize;

    /// Number of blocks
    fn num_blocks(&self) -> u64;

    /// Copy a whole block
    fn read_block(&self, block: u64) -> Result<Vec<u8>>;
}

/// I/O counters of a volume
#[derive(Debug, Default)]
pub struct VolumeStats {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    blocks_read: AtomicU64,
    blocks_written: AtomicU64,
}

impl VolumeStats {
    fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Block reads so far
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read.load(Ordering::Relaxed)
    }

    /// Block writes so far
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written.load(Ordering::Relaxed)
    }
}

/// A partition of a device, addressed with volume-relative block numbers
///
/// Every committed mutation advances the generation counter by exactly one.
/// Scan results record the generation they were taken at, which is how a
/// result is recognised as stale.
#[derive(Debug)]
pub struct Volume {
    store: Arc<BlockStore>,
    partition: usize,
    name: String,
    first_block: u64,
    num_blocks: u64,
    generation: AtomicU64,
    write_protected: AtomicBool,
    detached: AtomicBool,
    stats: VolumeStats,
}

impl Volume {
    /// Create a view over `num_blocks` blocks starting at `first_block`
    pub fn new(
        store: Arc<BlockStore>,
        partition: usize,
        name: impl Into<String>,
        first_block: u64,
        num_blocks: u64,
    ) -> Result<Self> {
        if first_block + num_blocks > store.num_blocks() {
            return Err(ImageError::mount_failed(format!(
                "partition {} ends at block {} beyond device end {}",
                partition,
                first_block + num_blocks,
                store.num_blocks()
            )));
        }

        Ok(Self {
            store,
            partition,
            name: name.into(),
            first_block,
            num_blocks,
            generation: AtomicU64::new(0),
            write_protected: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            stats: VolumeStats::default(),
        })
    }

    /// Partition index on the device
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Partition name (drive name for RDB partitions)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First device block of the volume
    pub fn first_block(&self) -> u64 {
        self.first_block
    }

    /// Number of blocks in the volume
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    /// Size of a block in bytes
    pub fn block_size(&self) -> usize {
        self.store.block_size()
    }

    /// Size of the volume in bytes
    pub fn num_bytes(&self) -> u64 {
        self.num_blocks * self.store.block_size() as u64
    }

    /// Backing block store
    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    /// I/O counters
    pub fn stats(&self) -> &VolumeStats {
        &self.stats
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Is the volume write protected?
    pub fn is_write_protected(&self) -> bool {
        self.write_protected.load(Ordering::SeqCst)
    }

    /// Enable or disable write protection
    pub fn set_write_protected(&self, protected: bool) {
        self.write_protected.store(protected, Ordering::SeqCst);
    }

    /// Has the volume been unmounted?
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    /// Translate a volume block into a device block
    pub fn device_block(&self, block: u64) -> Result<u64> {
        self.check_block(block)?;
        Ok(self.first_block + block)
    }

    fn check_block(&self, block: u64) -> Result<()> {
        if block >= self.num_blocks {
            log::error!("volume {}: block {} beyond end ({} blocks)", self.partition, block, self.num_blocks);
            return Err(ImageError::BlockOutOfRange {
                block,
                max: self.num_blocks.saturating_sub(1),
            });
        }
        Ok(())
    }

    /// Copy bytes out of a block
    pub fn read_range(&self, block: u64, offset: usize, length: usize) -> Result<Vec<u8>> {
        let bytes = self.store.read_range(self.device_block(block)?, offset, length)?;
        self.stats.record_read(length);
        Ok(bytes)
    }

    /// Read a single byte
    pub fn read_byte(&self, block: u64, offset: usize) -> Result<u8> {
        Ok(self.read_range(block, offset, 1)?[0])
    }

    /// Read bytes as printable ASCII, with `.` for anything else
    pub fn read_ascii(&self, block: u64, offset: usize, length: usize) -> Result<String> {
        let bytes = self.read_range(block, offset, length)?;
        Ok(bytes
            .iter()
            .map(|&b| if (32..127).contains(&b) { b as char } else { '.' })
            .collect())
    }

    /// Overwrite bytes in a block as one committed change
    pub fn write_range(&self, block: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        self.transaction(|tx| tx.write_range(block, offset, bytes))
    }

    /// Overwrite a single byte as one committed change
    pub fn write_byte(&self, block: u64, offset: usize, value: u8) -> Result<()> {
        self.write_range(block, offset, &[value])
    }

    /// Run a group of writes as a single change
    ///
    /// Writes are serialized per device. The generation advances once when the
    /// closure succeeds, or when it fails after having written something.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        if self.is_write_protected() {
            return Err(ImageError::WriteProtected);
        }

        let guard = self.store.lock_writes();
        let mut tx = Transaction {
            volume: self,
            _guard: guard,
            writes: 0,
        };
        let result = f(&mut tx);
        let writes = tx.writes;
        drop(tx);

        if result.is_ok() || writes > 0 {
            let generation = self.bump_generation();
            log::trace!(
                "volume {}: committed {} block writes, generation {}",
                self.partition,
                writes,
                generation
            );
        }
        result
    }

    /// Record a write made outside the process (through a bridge)
    pub fn note_external_write(&self, block: u64) -> Result<()> {
        self.store.mark_dirty(self.device_block(block)?)?;
        self.bump_generation();
        Ok(())
    }

    /// Has the block been read or written since load?
    pub fn is_cached(&self, block: u64) -> bool {
        block < self.num_blocks && self.store.is_cached(self.first_block + block)
    }

    /// Does the block have unsaved changes?
    pub fn is_dirty(&self, block: u64) -> bool {
        block < self.num_blocks && self.store.is_dirty(self.first_block + block)
    }

    /// Number of cached blocks in the volume
    pub fn cached_blocks(&self) -> u64 {
        self.store.cached_count(self.block_range())
    }

    /// Number of dirty blocks in the volume
    pub fn dirty_blocks(&self) -> u64 {
        self.store.dirty_count(self.block_range())
    }

    /// Reader that leaves counters and cache flags untouched
    pub fn peek(&self) -> Peek<'_> {
        Peek(self)
    }

    fn block_range(&self) -> std::ops::Range<u64> {
        self.first_block..self.first_block + self.num_blocks
    }
}

impl BlockSource for Volume {
    fn block_size(&self) -> usize {
        self.store.block_size()
    }

    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn read_block(&self, block: u64) -> Result<Vec<u8>> {
        self.read_range(block, 0, self.store.block_size())
    }
}

/// Uncounted reads for snapshots and maps
pub struct Peek<'a>(&'a Volume);

impl BlockSource for Peek<'_> {
    fn block_size(&self) -> usize {
        self.0.block_size()
    }

    fn num_blocks(&self) -> u64 {
        self.0.num_blocks
    }

    fn read_block(&self, block: u64) -> Result<Vec<u8>> {
        self.0.store.peek_block(self.0.device_block(block)?)
    }
}

/// Exclusive write access to a volume for the duration of one change
pub struct Transaction<'a> {
    volume: &'a Volume,
    _guard: MutexGuard<'a, ()>,
    writes: u64,
}

impl Transaction<'_> {
    /// Overwrite bytes in a block
    pub fn write_range(&mut self, block: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        let device_block = self.volume.device_block(block)?;
        self.volume.store.write_range(device_block, offset, bytes)?;
        self.volume.stats.record_write(bytes.len());
        self.writes += 1;
        Ok(())
    }

    /// Overwrite a whole block
    pub fn write_block(&mut self, block: u64, bytes: &[u8]) -> Result<()> {
        let block_size = self.volume.block_size();
        if bytes.len() != block_size {
            return Err(ImageError::OffsetOutOfRange {
                offset: 0,
                length: bytes.len(),
                block_size,
            });
        }
        self.write_range(block, 0, bytes)
    }

    /// Number of writes made so far
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl BlockSource for Transaction<'_> {
    fn block_size(&self) -> usize {
        self.volume.block_size()
    }

    fn num_blocks(&self) -> u64 {
        self.volume.num_blocks
    }

    fn read_block(&self, block: u64) -> Result<Vec<u8>> {
        self.volume.read_block(block)
    }
}
