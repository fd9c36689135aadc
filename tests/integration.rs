/// Integration tests for retromount

use retromount::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn config(dir: &TempDir) -> RegistryConfig {
    RegistryConfig::default().mount_root(dir.path().join("mnt"))
}

fn image(dir: &TempDir, name: &str, builder: ImageBuilder) -> PathBuf {
    let path = dir.path().join(name);
    builder.write_to(&path).expect("Failed to write image");
    path
}

fn first_volume(registry: &DeviceRegistry, device: DeviceHandle) -> VolumeHandle {
    registry.volumes(device).expect("Failed to list volumes")[0]
}

#[test]
fn test_fresh_half_size_adf() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Half.adf", ImageBuilder::new(ImageFormat::Adf).cylinders(40));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).expect("Failed to mount");
    let vh = first_volume(&registry, device);

    let info = registry.volume_info(vh).unwrap();
    assert_eq!(info.blocks, 880);
    assert_eq!(info.block_size, 512);
    assert_eq!(info.name, "Empty");
    assert!((0.0..=1.0).contains(&info.fill));
    assert_eq!(info.used_blocks + info.free_blocks, 880);

    let geometry = registry.geometry(device).unwrap();
    assert_eq!(geometry.cylinders(), 40);
    assert_eq!(geometry.num_blocks(), 880);

    let result = registry.scan(vh, true).unwrap();
    assert!(result.is_clean(), "fresh image should scan clean: {:?}", result);

    registry.unmount(device, None);
    assert!(registry.is_empty());
}

#[test]
fn test_zeroed_root_is_corrupted() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Broken.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);

    let volume = registry.volume(vh).unwrap();
    volume.write_range(880, 0, &[0u8; 512]).unwrap();

    let result = registry.scan(vh, true).unwrap();
    assert!(result.is_corrupted(880));
    assert!(!result.is_clean());

    // Without a root the bitmap cannot be located, so it cannot be repaired
    assert!(matches!(registry.rectify(vh, true), Err(ImageError::Corrupted(_))));
    assert_eq!(registry.scan_result(vh).unwrap(), result);
}

#[test]
fn test_strict_scan_adds_checksums() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Named.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);

    // First character of the volume name; structure stays intact, checksum breaks
    let volume = registry.volume(vh).unwrap();
    let byte = volume.read_byte(880, 433).unwrap();
    volume.write_byte(880, 433, byte ^ 0x01).unwrap();

    let lax = registry.scan(vh, false).unwrap();
    assert!(lax.corrupted.is_empty());
    let strict = registry.scan(vh, true).unwrap();
    assert_eq!(strict.corrupted, vec![880]);
    assert!(strict.reason(880).unwrap().contains("checksum"));

    assert_eq!(registry.diagnose(vh, 880, false).unwrap(), Validation::Valid);
    assert!(!registry.diagnose(vh, 880, true).unwrap().is_valid());
}

/// Amiga codec whose block validation can be held at a barrier
struct GatedCodec {
    inner: AmigaCodec,
    armed: AtomicBool,
    entered: Barrier,
    release: Barrier,
}

impl FileSystemCodec for GatedCodec {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn metadata(&self, volume: &dyn BlockSource) -> Result<RootMetadata> {
        self.inner.metadata(volume)
    }

    fn classify(&self, volume: &dyn BlockSource, block: u64) -> Result<BlockKind> {
        self.inner.classify(volume, block)
    }

    fn validate(&self, volume: &dyn BlockSource, block: u64, strict: bool) -> Result<Validation> {
        self.inner.validate(volume, block, strict)
    }

    fn validate_all(&self, volume: &dyn BlockSource, strict: bool) -> Result<Vec<Validation>> {
        if self.armed.load(Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
        self.inner.validate_all(volume, strict)
    }

    fn allocation(&self) -> Option<&dyn AllocationMap> {
        Some(&self.inner)
    }
}

#[test]
fn test_unmount_during_scan_discards_result() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Gated.adf", ImageBuilder::new(ImageFormat::Adf));

    let codec = Arc::new(GatedCodec {
        inner: AmigaCodec::new(DosType::OFS, 880),
        armed: AtomicBool::new(false),
        entered: Barrier::new(2),
        release: Barrier::new(2),
    });
    let mut formats = FormatTable::empty();
    let shared = codec.clone();
    formats.register(ImageFormat::Adf, move |_, _| Ok(shared.clone() as Arc<dyn FileSystemCodec>));

    let mut registry = DeviceRegistry::new(config(&dir).formats(formats)).unwrap();
    let device = registry.mount(&path).unwrap();
    let volume = registry.volume(first_volume(&registry, device)).unwrap();

    let state = Arc::new(ScanState::default());
    let scanner = Scanner::new(volume.clone(), codec.clone(), state.clone());
    let previous = scanner.scan(false).unwrap();

    codec.armed.store(true, Ordering::SeqCst);
    let background = scanner.clone();
    let scan = thread::spawn(move || background.scan(false));

    codec.entered.wait();
    assert!(state.is_busy());
    assert!(matches!(scanner.scan(false), Err(ImageError::ScanInProgress)));
    registry.unmount(device, None);
    assert!(volume.is_detached());
    codec.release.wait();

    let outcome = scan.join().expect("scan thread panicked");
    assert!(matches!(outcome, Err(ImageError::Discarded)));
    assert!(!state.is_busy());
    assert!(Arc::ptr_eq(&state.latest().unwrap(), &previous));
}

#[test]
fn test_rectify_converges() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Repair.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);
    let volume = registry.volume(vh).unwrap();

    // Bitmap page 881: bit n covers block n + 2, stored in big-endian longs after the checksum
    let root_byte = volume.read_byte(881, 114).unwrap();
    volume.write_byte(881, 114, root_byte | 0x40).unwrap();
    let free_byte = volume.read_byte(881, 131).unwrap();
    volume.write_byte(881, 131, free_byte & !0x40).unwrap();

    let result = registry.scan(vh, false).unwrap();
    assert_eq!(result.used_but_unallocated, vec![880]);
    assert_eq!(result.unused_but_allocated, vec![1000]);
    assert!(result.corrupted.is_empty());

    let generation = volume.generation();
    let repaired = registry.rectify(vh, false).unwrap();
    assert!(repaired.is_clean());
    assert_eq!(volume.generation(), generation + 1);

    // Checksum of the rewritten bitmap holds too
    assert!(registry.scan(vh, true).unwrap().is_clean());
    assert!(registry.rectify(vh, true).unwrap().is_clean());
    assert_eq!(volume.generation(), generation + 1);
}

#[test]
fn test_scan_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let builder = ImageBuilder::new(ImageFormat::Adf)
        .directory("Docs")
        .file("Docs/ReadMe", &[b'x'; 2000]);
    let path = image(&dir, "Files.adf", builder);
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);

    let first = registry.spawn_scan(vh, true).unwrap().wait().unwrap();
    let second = registry.spawn_scan(vh, true).unwrap().wait().unwrap();
    assert_eq!(first, second);
    assert!(!first.is_stale(&registry.volume(vh).unwrap()));
    assert_eq!(registry.volume(vh).unwrap().stats().bytes_written(), 0);
}

#[test]
fn test_generation_is_monotonic() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Gen.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);
    let volume = registry.volume(vh).unwrap();

    let mut last = volume.generation();
    let mut step = |label: &str| {
        let now = volume.generation();
        assert!(now > last, "{} did not advance the generation", label);
        last = now;
    };

    volume.write_byte(1000, 0, 1).unwrap();
    step("write");
    let scanned = registry.scan(vh, false).unwrap();
    assert_eq!(scanned.generation, volume.generation());

    volume.write_range(1001, 0, &[1, 2, 3]).unwrap();
    step("range write");
    assert!(scanned.is_stale(&volume));

    registry.revert(device).unwrap();
    step("revert");

    // Reads and maps leave it alone
    let before = volume.generation();
    registry.usage_map(vh, 40).unwrap();
    registry.volume_info(vh).unwrap();
    volume.read_block(880).unwrap();
    assert_eq!(volume.generation(), before);
}

#[test]
fn test_capacity_strings() {
    assert_eq!(capacity_string(0), "0 Bytes");
    assert_eq!(capacity_string(901_120), "880 KB");
    assert_eq!(capacity_string(1_802_240), "1.72 MB");
    assert_eq!(capacity_string(3 * 1024 * 1024 * 1024), "3.00 GB");

    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Cap.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let info = registry.volume_info(first_volume(&registry, device)).unwrap();
    assert_eq!(info.capacity_string(), "1760 Blocks (880 KB)");
    assert_eq!(registry.info(device).unwrap().capacity_string(), "880 KB");
}

#[test]
fn test_partitioned_hdf() {
    let dir = TempDir::new().unwrap();
    let builder = ImageBuilder::new(ImageFormat::Hdf)
        .partition("Work", 40)
        .partition("Games", 20);
    let path = image(&dir, "Drive.hdf", builder);
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();

    let volumes = registry.volumes(device).unwrap();
    assert_eq!(volumes.len(), 2);
    let work = registry.volume_info(volumes[0]).unwrap();
    let games = registry.volume_info(volumes[1]).unwrap();
    assert_eq!(work.partition_name, "Work");
    assert_eq!(games.partition_name, "Games");
    assert_eq!(work.blocks, 2 * games.blocks);
    assert_eq!(work.mount_point, Some(dir.path().join("mnt").join("Drive").join("Work")));

    // Unmounting one partition leaves the other at its index
    registry.unmount(device, Some(0));
    assert!(matches!(registry.volume_info(volumes[0]), Err(ImageError::InvalidHandle)));
    assert_eq!(registry.volume_info(volumes[1]).unwrap().partition_name, "Games");
    assert_eq!(registry.volumes(device).unwrap(), vec![volumes[1]]);

    registry.unmount(device, Some(1));
    assert!(!registry.contains(device));
}

#[test]
fn test_stale_handle() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Stale.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();

    let old = registry.mount(&path).unwrap();
    let old_volume = first_volume(&registry, old);
    registry.unmount(old, None);

    let new = registry.mount(&path).unwrap();
    assert_eq!(new.slot(), old.slot());
    assert_ne!(new, old);
    assert!(matches!(registry.info(old), Err(ImageError::InvalidHandle)));
    assert!(matches!(registry.scan(old_volume, false), Err(ImageError::InvalidHandle)));
    assert!(registry.info(new).is_ok());
}

#[test]
fn test_write_protect() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Locked.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);
    let volume = registry.volume(vh).unwrap();

    registry.set_write_protected(vh, true).unwrap();
    assert!(matches!(volume.write_byte(1000, 0, 0xAA), Err(ImageError::WriteProtected)));
    assert_eq!(volume.generation(), 0);
    assert!(!registry.info(device).unwrap().modified);

    assert!(!registry.toggle_write_protected(vh).unwrap());
    volume.write_byte(1000, 0, 0xAA).unwrap();
    assert!(registry.info(device).unwrap().modified);
}

#[test]
fn test_read_only_config() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Ro.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir).read_only(true)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);
    assert!(registry.volume_info(vh).unwrap().write_protected);
}

#[test]
fn test_generic_volume_has_no_scan() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Atari.st", ImageBuilder::new(ImageFormat::St));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);

    assert!(matches!(registry.scan(vh, false), Err(ImageError::UnsupportedFormat(_))));
    assert!(matches!(registry.allocation_map(vh, 32), Err(ImageError::UnsupportedFormat(_))));
    assert!(matches!(registry.health_map(vh, 32), Err(ImageError::NoScanResult)));
    assert_eq!(registry.usage_map(vh, 32).unwrap().len(), 32);
}

#[test]
fn test_maps_after_scan() {
    let dir = TempDir::new().unwrap();
    let path = image(&dir, "Maps.adf", ImageBuilder::new(ImageFormat::Adf));
    let mut registry = DeviceRegistry::new(config(&dir)).unwrap();
    let device = registry.mount(&path).unwrap();
    let vh = first_volume(&registry, device);

    assert!(matches!(registry.allocation_map(vh, 80), Err(ImageError::NoScanResult)));
    registry.scan(vh, false).unwrap();

    let allocation = registry.allocation_map(vh, 80).unwrap();
    assert_eq!(allocation.len(), 80);
    assert!(!allocation.contains(&AllocationState::Conflict));
    // 1760 blocks in buckets of 22: the root at 880 starts bucket 40
    assert_eq!(allocation[40], AllocationState::Allocated);
    assert_eq!(allocation[60], AllocationState::Free);

    let health = registry.health_map(vh, 80).unwrap();
    assert!(health.iter().all(|h| *h == HealthState::Ok));

    let usage = registry.spawn_usage_map(vh, 80).unwrap().wait().unwrap();
    assert_eq!(usage[0], BlockKind::Boot);
    assert_eq!(usage[40], BlockKind::Root);
    assert_eq!(registry.next_block_of_type(vh, BlockKind::Root, 0).unwrap(), Some(880));
    assert_eq!(registry.type_of(vh, 881).unwrap(), BlockKind::Bitmap);
}
