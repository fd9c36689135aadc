/// Consistency scanning and allocation repair

use crate::error::{ImageError, Result};
use crate::filesystem::{AllocationChange, FileSystemCodec, Validation};
use crate::image::{BlockSource, Volume};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Findings of one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Blocks whose structure failed validation
    pub corrupted: Vec<u64>,
    /// Why each corrupted block failed
    pub reasons: BTreeMap<u64, String>,
    /// Blocks reachable from the root but free in the bitmap
    pub used_but_unallocated: Vec<u64>,
    /// Blocks allocated in the bitmap but not reachable
    pub unused_but_allocated: Vec<u64>,
    /// Whether checksums were tested
    pub strict: bool,
    /// Volume generation the scan observed
    pub generation: u64,
}

impl ScanResult {
    /// No problems found?
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty()
            && self.used_but_unallocated.is_empty()
            && self.unused_but_allocated.is_empty()
    }

    /// Has the volume changed since this scan?
    pub fn is_stale(&self, volume: &Volume) -> bool {
        self.generation != volume.generation()
    }

    /// Number of allocation conflicts
    pub fn conflicts(&self) -> usize {
        self.used_but_unallocated.len() + self.unused_but_allocated.len()
    }

    /// Is a block in either conflict list?
    pub fn is_conflict(&self, block: u64) -> bool {
        self.used_but_unallocated.binary_search(&block).is_ok()
            || self.unused_but_allocated.binary_search(&block).is_ok()
    }

    /// Is a block in the corrupted list?
    pub fn is_corrupted(&self, block: u64) -> bool {
        self.corrupted.binary_search(&block).is_ok()
    }

    /// Validation failure recorded for a block
    pub fn reason(&self, block: u64) -> Option<&str> {
        self.reasons.get(&block).map(String::as_str)
    }
}

/// Per-volume scan bookkeeping
///
/// Holds the busy flag and the most recent result. A result is replaced only
/// by a complete newer one.
#[derive(Debug, Default)]
pub struct ScanState {
    busy: AtomicBool,
    latest: RwLock<Option<Arc<ScanResult>>>,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ScanState {
    /// Is a scan running?
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Most recent complete result
    pub fn latest(&self) -> Option<Arc<ScanResult>> {
        self.latest.read().clone()
    }

    fn begin(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| ImageError::ScanInProgress)
    }

    fn publish(&self, result: Arc<ScanResult>) {
        *self.latest.write() = Some(result);
    }
}

/// Runs scans and repairs on one volume
///
/// Cheap to clone; background jobs take their own copy so the volume and its
/// block store stay alive until the job ends.
#[derive(Clone)]
pub struct Scanner {
    volume: Arc<Volume>,
    codec: Arc<dyn FileSystemCodec>,
    state: Arc<ScanState>,
}

impl Scanner {
    /// Create a scanner
    pub fn new(volume: Arc<Volume>, codec: Arc<dyn FileSystemCodec>, state: Arc<ScanState>) -> Self {
        Self {
            volume,
            codec,
            state,
        }
    }

    /// Volume being scanned
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    /// Scan bookkeeping
    pub fn state(&self) -> &Arc<ScanState> {
        &self.state
    }

    /// Walk the volume and publish a new result
    ///
    /// Fails with `ScanInProgress` if another scan of this volume is running and
    /// with `Discarded` if the volume was unmounted while scanning; in both
    /// cases the previous result stays in place.
    pub fn scan(&self, strict: bool) -> Result<Arc<ScanResult>> {
        let _busy = self.state.begin()?;
        let result = self.collect(strict)?;
        self.finish(result)
    }

    fn finish(&self, result: ScanResult) -> Result<Arc<ScanResult>> {
        if self.volume.is_detached() {
            log::debug!("scan: volume {} unmounted, dropping result", self.volume.name());
            return Err(ImageError::Discarded);
        }
        let result = Arc::new(result);
        self.state.publish(result.clone());

        log::info!(
            "scan: {} finished ({} corrupted, {} used but unallocated, {} unused but allocated)",
            self.volume.name(),
            result.corrupted.len(),
            result.used_but_unallocated.len(),
            result.unused_but_allocated.len()
        );
        Ok(result)
    }

    fn collect(&self, strict: bool) -> Result<ScanResult> {
        let allocation = self.codec.allocation().ok_or_else(|| {
            ImageError::unsupported(format!("{} has no allocation bitmap", self.codec.name()))
        })?;

        let volume = &*self.volume;
        let generation = volume.generation();
        log::debug!(
            "scan: {} ({} blocks, strict={}, generation {})",
            volume.name(),
            volume.num_blocks(),
            strict,
            generation
        );

        let allocated = allocation.allocated(volume)?;
        let referenced = allocation.referenced(volume)?;
        let validations = self.codec.validate_all(volume, strict)?;

        let mut result = ScanResult {
            corrupted: Vec::new(),
            reasons: BTreeMap::new(),
            used_but_unallocated: Vec::new(),
            unused_but_allocated: Vec::new(),
            strict,
            generation,
        };

        for block in 0..volume.num_blocks() {
            match (referenced.contains(block), allocated.contains(block)) {
                (true, false) => result.used_but_unallocated.push(block),
                (false, true) => result.unused_but_allocated.push(block),
                _ => {}
            }
        }
        for (block, validation) in (0u64..).zip(validations) {
            if let Validation::Invalid(reason) = validation {
                log::debug!("scan: block {}: {}", block, reason);
                result.corrupted.push(block);
                result.reasons.insert(block, reason);
            }
        }
        Ok(result)
    }

    /// Validate a single block without touching the scan state
    pub fn diagnose(&self, block: u64, strict: bool) -> Result<Validation> {
        let volume = self.volume.peek();
        if block >= volume.num_blocks() {
            return Err(ImageError::BlockOutOfRange {
                block,
                max: volume.num_blocks().saturating_sub(1),
            });
        }
        self.codec.validate(&volume, block, strict)
    }

    /// Bring the allocation bitmap in line with the directory tree
    ///
    /// Counts as a scan for the busy flag. Uses the latest result when it is
    /// current and of the same strictness, otherwise scans first. All bitmap
    /// changes are committed as one mutation, then the volume is rescanned.
    pub fn rectify(&self, strict: bool) -> Result<Arc<ScanResult>> {
        let allocation = self.codec.allocation().ok_or_else(|| {
            ImageError::unsupported(format!("{} has no allocation bitmap", self.codec.name()))
        })?;

        let _busy = self.state.begin()?;
        let base = match self.state.latest() {
            Some(result) if result.strict == strict && !result.is_stale(&self.volume) => result,
            _ => Arc::new(self.collect(strict)?),
        };

        let changes: Vec<AllocationChange> = base
            .used_but_unallocated
            .iter()
            .map(|&block| AllocationChange {
                block,
                allocated: true,
            })
            .chain(base.unused_but_allocated.iter().map(|&block| AllocationChange {
                block,
                allocated: false,
            }))
            .collect();

        if !changes.is_empty() {
            log::info!("rectify: {} applying {} bitmap changes", self.volume.name(), changes.len());
            self.volume.transaction(|tx| allocation.apply(tx, &changes))?;
        }
        let result = self.collect(strict)?;
        self.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::AmigaCodec;
    use crate::format::ImageFormat;
    use crate::image::{BlockStore, ImageBuilder};

    fn result(corrupted: Vec<u64>, used: Vec<u64>, unused: Vec<u64>) -> ScanResult {
        ScanResult {
            reasons: corrupted.iter().map(|&b| (b, "bad".to_string())).collect(),
            corrupted,
            used_but_unallocated: used,
            unused_but_allocated: unused,
            strict: false,
            generation: 0,
        }
    }

    #[test]
    fn test_lookup() {
        let r = result(vec![880], vec![5, 9], vec![100]);
        assert!(r.is_corrupted(880));
        assert!(!r.is_corrupted(881));
        assert_eq!(r.reason(880), Some("bad"));
        assert_eq!(r.reason(881), None);
        assert!(r.is_conflict(9));
        assert!(r.is_conflict(100));
        assert!(!r.is_conflict(6));
        assert_eq!(r.conflicts(), 3);
        assert!(!r.is_clean());
        assert!(result(vec![], vec![], vec![]).is_clean());
    }

    #[test]
    fn test_busy_flag() {
        let state = ScanState::default();
        let guard = state.begin().unwrap();
        assert!(state.is_busy());
        assert!(matches!(state.begin(), Err(ImageError::ScanInProgress)));
        drop(guard);
        assert!(!state.is_busy());
        assert!(state.begin().is_ok());
    }

    fn adf_scanner() -> Scanner {
        let bytes = ImageBuilder::new(ImageFormat::Adf).build().unwrap();
        let store = Arc::new(BlockStore::from_bytes("Test.adf", 512, bytes).unwrap());
        let volume = Arc::new(Volume::new(store, 0, "Test", 0, 1760).unwrap());
        let codec = AmigaCodec::detect(&volume.peek()).unwrap().unwrap();
        Scanner::new(volume, Arc::new(codec), Arc::new(ScanState::default()))
    }

    #[test]
    fn test_reasons_are_kept() {
        let scanner = adf_scanner();
        // Root type longword becomes 0
        scanner.volume().write_byte(880, 3, 0).unwrap();

        let result = scanner.scan(false).unwrap();
        assert!(result.is_corrupted(880));
        assert!(result.reason(880).unwrap().contains("root block"));
        assert_eq!(result.reasons.len(), result.corrupted.len());
    }

    #[test]
    fn test_diagnose_single_block() {
        let scanner = adf_scanner();
        // Break the root checksum through the volume name
        let byte = scanner.volume().read_byte(880, 433).unwrap();
        scanner.volume().write_byte(880, 433, byte ^ 0x20).unwrap();

        assert_eq!(scanner.diagnose(880, false).unwrap(), Validation::Valid);
        match scanner.diagnose(880, true).unwrap() {
            Validation::Invalid(reason) => assert!(reason.contains("checksum")),
            Validation::Valid => panic!("strict check missed the checksum"),
        }
        assert!(matches!(
            scanner.diagnose(1760, true),
            Err(ImageError::BlockOutOfRange { .. })
        ));
        assert!(scanner.state().latest().is_none());
    }
}
