/// Registry of mounted devices and their volumes
///
/// The registry is owned by one coordinating thread. Mount, unmount and
/// repairs go through `&mut self`; queries take `&self`. Long-running work is
/// handed to a background [`Worker`] together with its own references to the
/// volume, so an unmount never waits for a running scan and never frees the
/// storage a scan is reading.

use crate::bridge::{BridgeEvent, BridgeEventKind, DetachedBridge, EventSender, MountBridge};
use crate::catalog::{DeviceInfo, VolumeInfo};
use crate::config::{BridgePolicy, RegistryConfig};
use crate::error::{ImageError, Result};
use crate::filesystem::{BlockKind, Validation};
use crate::geometry::Geometry;
use crate::image::{Device, Volume, VolumeEntry};
use crate::map::{self, AllocationState, HealthState};
use crate::scan::ScanResult;
use crate::worker::{Pending, Worker};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Stable reference to a mounted device
///
/// A handle names an arena slot and the slot's generation at mount time. Once
/// the device is removed the slot generation moves on, so old handles are
/// rejected with `InvalidHandle` instead of reaching a later device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle {
    slot: u32,
    generation: u32,
}

impl DeviceHandle {
    /// Create a handle from its parts
    pub fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Arena slot
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Slot generation
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slot)
    }
}

/// A volume: device handle plus partition index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeHandle {
    /// Owning device
    pub device: DeviceHandle,
    /// Partition index (never shifts)
    pub partition: usize,
}

impl VolumeHandle {
    /// Create a volume handle
    pub fn new(device: DeviceHandle, partition: usize) -> Self {
        Self { device, partition }
    }
}

impl fmt::Display for VolumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.partition)
    }
}

struct Slot {
    generation: u32,
    device: Option<Device>,
}

/// Collection of mounted devices
pub struct DeviceRegistry {
    config: RegistryConfig,
    bridge: Arc<dyn MountBridge>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    events_tx: Sender<BridgeEvent>,
    events_rx: Receiver<BridgeEvent>,
    worker: Worker,
}

impl DeviceRegistry {
    /// Create a registry that keeps volumes inside the process
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Self::with_bridge(config, Arc::new(DetachedBridge::new()))
    }

    /// Create a registry exposing volumes through a bridge
    pub fn with_bridge(config: RegistryConfig, bridge: Arc<dyn MountBridge>) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::channel();
        log::debug!("registry: bridge '{}', mount root {}", bridge.name(), config.mount_root.display());
        Ok(Self {
            config,
            bridge,
            slots: Vec::new(),
            free: Vec::new(),
            events_tx,
            events_rx,
            worker: Worker::new()?,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // Handles

    fn next_handle(&self) -> DeviceHandle {
        match self.free.last() {
            Some(&slot) => DeviceHandle::new(slot, self.slots[slot as usize].generation),
            None => DeviceHandle::new(self.slots.len() as u32, 0),
        }
    }

    fn insert(&mut self, handle: DeviceHandle, device: Device) {
        if self.free.last() == Some(&handle.slot) {
            self.free.pop();
            self.slots[handle.slot as usize].device = Some(device);
        } else {
            self.slots.push(Slot {
                generation: handle.generation,
                device: Some(device),
            });
        }
    }

    // Senders handed out under a handle that never committed must not reach the next occupant
    fn retire(&mut self, handle: DeviceHandle) {
        let next = handle.generation.wrapping_add(1);
        match self.slots.get_mut(handle.slot as usize) {
            Some(slot) => slot.generation = next,
            None => {
                self.slots.push(Slot {
                    generation: next,
                    device: None,
                });
                self.free.push(handle.slot);
            }
        }
    }

    fn release(&mut self, handle: DeviceHandle) -> Option<Device> {
        let slot = self.slots.get_mut(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let device = slot.device.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.slot);
        Some(device)
    }

    fn device(&self, handle: DeviceHandle) -> Result<&Device> {
        self.slots
            .get(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.device.as_ref())
            .ok_or(ImageError::InvalidHandle)
    }

    fn device_mut(&mut self, handle: DeviceHandle) -> Result<&mut Device> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.device.as_mut())
            .ok_or(ImageError::InvalidHandle)
    }

    fn entry(&self, handle: VolumeHandle) -> Result<&VolumeEntry> {
        self.device(handle.device)?
            .volume(handle.partition)
            .ok_or(ImageError::InvalidHandle)
    }

    /// Is the handle still valid?
    pub fn contains(&self, handle: DeviceHandle) -> bool {
        self.device(handle).is_ok()
    }

    /// Current handle of the device in an arena slot
    pub fn find(&self, slot: u32) -> Option<DeviceHandle> {
        let entry = self.slots.get(slot as usize)?;
        entry.device.as_ref()?;
        Some(DeviceHandle::new(slot, entry.generation))
    }

    /// Handles of all mounted devices in slot order
    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.device.is_some())
            .map(|(i, slot)| DeviceHandle::new(i as u32, slot.generation))
            .collect()
    }

    /// Number of mounted devices
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.device.is_some()).count()
    }

    /// Is nothing mounted?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles of the mounted volumes of a device
    pub fn volumes(&self, handle: DeviceHandle) -> Result<Vec<VolumeHandle>> {
        Ok(self
            .device(handle)?
            .volumes()
            .map(|entry| VolumeHandle::new(handle, entry.volume().partition()))
            .collect())
    }

    // Lifecycle

    fn mount_point_taken(&self, path: &Path, pending: &[PathBuf]) -> bool {
        pending.iter().any(|p| p == path)
            || self
                .slots
                .iter()
                .filter_map(|slot| slot.device.as_ref())
                .flat_map(|device| device.volumes())
                .any(|entry| entry.mount_point() == Some(path))
    }

    fn unique_mount_point(&self, base: PathBuf, pending: &[PathBuf]) -> PathBuf {
        if !self.mount_point_taken(&base, pending) {
            return base;
        }
        let name = base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut n = 2;
        loop {
            let candidate = base.with_file_name(format!("{} {}", name, n));
            if !self.mount_point_taken(&candidate, pending) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Open an image and bring its volumes online
    ///
    /// Nothing is registered unless the whole mount succeeds. With
    /// [`BridgePolicy::Required`] a bridge failure undoes the volumes already
    /// bridged and returns the bridge's own [`ImageError::Bridge`] error.
    pub fn mount<P: AsRef<Path>>(&mut self, path: P) -> Result<DeviceHandle> {
        let path = path.as_ref();
        let mut device = Device::open(path, &self.config.formats, self.config.read_only)?;
        let handle = self.next_handle();
        let stem = device.stem();
        let partitioned = device.num_partitions() > 1;

        let mut bridged: Vec<PathBuf> = Vec::new();
        for partition in 0..device.num_partitions() {
            let Some(entry) = device.volume_mut(partition) else {
                continue;
            };
            let base = if partitioned {
                self.config.mount_root.join(&stem).join(entry.volume().name())
            } else {
                self.config.mount_root.join(&stem)
            };
            let mount_point = self.unique_mount_point(base, &bridged);
            let events = EventSender::new(self.events_tx.clone(), handle, partition);

            match self.bridge.mount(&mount_point, entry.volume().clone(), events) {
                Ok(()) => {
                    entry.set_mount_point(Some(mount_point.clone()));
                    bridged.push(mount_point);
                }
                Err(err) if self.config.bridge_policy == BridgePolicy::Optional => {
                    log::warn!(
                        "registry: {} not exposed at {}: {}",
                        entry.volume().name(),
                        mount_point.display(),
                        err
                    );
                }
                Err(err) => {
                    for point in &bridged {
                        if let Err(undo) = self.bridge.unmount(point) {
                            log::warn!("registry: rollback of {} failed: {}", point.display(), undo);
                        }
                    }
                    for partition in 0..device.num_partitions() {
                        device.take_volume(partition);
                    }
                    self.retire(handle);
                    log::error!(
                        "registry: {}: bridge '{}' could not mount {}: {}",
                        path.display(),
                        self.bridge.name(),
                        mount_point.display(),
                        err
                    );
                    return Err(ImageError::Bridge(err));
                }
            }
        }

        log::info!(
            "registry: mounted {} as device {} ({}, {} volumes)",
            path.display(),
            handle,
            device.image_info().description(),
            device.num_volumes()
        );
        self.insert(handle, device);
        Ok(handle)
    }

    fn remove_volume(&mut self, handle: DeviceHandle, partition: usize, notify_bridge: bool) {
        let bridge = self.bridge.clone();
        let save_on_unmount = self.config.save_on_unmount;
        let Ok(device) = self.device_mut(handle) else {
            log::debug!("registry: unmount of stale handle {:?} ignored", handle);
            return;
        };
        let Some(entry) = device.take_volume(partition) else {
            return;
        };
        if let (true, Some(point)) = (notify_bridge, entry.mount_point()) {
            if let Err(err) = bridge.unmount(point) {
                log::warn!("registry: bridge unmount of {} failed: {}", point.display(), err);
            }
        }
        if entry.scan_state().is_busy() {
            log::debug!("registry: {} unmounted during a scan", entry.volume().name());
        }
        log::info!("registry: unmounted volume {}:{}", handle, partition);

        if device.is_empty() {
            if save_on_unmount && device.is_modified() {
                if let Err(err) = device.save() {
                    log::error!("registry: saving {} failed: {}", device.path().display(), err);
                }
            }
            if let Some(device) = self.release(handle) {
                log::info!("registry: removed device {} ({})", handle, device.path().display());
            }
        }
    }

    /// Unmount one volume, or the whole device when `partition` is `None`
    ///
    /// Removing the last volume removes the device. Unknown or stale handles
    /// are ignored.
    pub fn unmount(&mut self, handle: DeviceHandle, partition: Option<usize>) {
        let partitions = match (self.device(handle), partition) {
            (Err(_), _) => {
                log::debug!("registry: unmount of stale handle {:?} ignored", handle);
                return;
            }
            (Ok(_), Some(p)) => vec![p],
            (Ok(device), None) => (0..device.num_partitions()).collect(),
        };
        for p in partitions {
            self.remove_volume(handle, p, true);
        }
    }

    /// Unmount every device
    pub fn unmount_all(&mut self) {
        for handle in self.devices() {
            self.unmount(handle, None);
        }
    }

    /// Apply pending bridge events and return them
    ///
    /// Volumes the host unmounted are removed; host writes advance the
    /// volume generation. Events for handles that are gone are skipped.
    pub fn poll_events(&mut self) -> Vec<BridgeEvent> {
        let events: Vec<BridgeEvent> = self.events_rx.try_iter().collect();
        for event in &events {
            let handle = VolumeHandle::new(event.device, event.partition);
            match &event.kind {
                BridgeEventKind::Unmounted => self.remove_volume(event.device, event.partition, false),
                BridgeEventKind::Wrote { block } => match self.entry(handle) {
                    Ok(entry) => {
                        if let Err(err) = entry.volume().note_external_write(*block) {
                            log::warn!("registry: bad write report for {}: {}", handle, err);
                        }
                    }
                    Err(_) => log::debug!("registry: write event for stale volume {}", handle),
                },
                BridgeEventKind::Error(message) => {
                    log::warn!("registry: bridge error on {}: {}", handle, message)
                }
            }
        }
        events
    }

    // Queries

    /// Snapshot of a device
    pub fn info(&self, handle: DeviceHandle) -> Result<DeviceInfo> {
        Ok(self.device(handle)?.describe())
    }

    /// Snapshot of a volume
    pub fn volume_info(&self, handle: VolumeHandle) -> Result<VolumeInfo> {
        Ok(self.entry(handle)?.info())
    }

    /// Shared reference to a volume
    pub fn volume(&self, handle: VolumeHandle) -> Result<Arc<Volume>> {
        Ok(self.entry(handle)?.volume().clone())
    }

    /// Image file of a device
    pub fn path(&self, handle: DeviceHandle) -> Result<PathBuf> {
        Ok(self.device(handle)?.path().to_path_buf())
    }

    /// Geometry of a device
    pub fn geometry(&self, handle: DeviceHandle) -> Result<Geometry> {
        Ok(self.device(handle)?.geometry().clone())
    }

    /// Kind of a block
    pub fn type_of(&self, handle: VolumeHandle, block: u64) -> Result<BlockKind> {
        let entry = self.entry(handle)?;
        map::type_of(&entry.volume().peek(), entry.codec().as_ref(), block)
    }

    /// Next block of a kind after `after`
    pub fn next_block_of_type(&self, handle: VolumeHandle, kind: BlockKind, after: u64) -> Result<Option<u64>> {
        let entry = self.entry(handle)?;
        map::next_block_of_type(&entry.volume().peek(), entry.codec().as_ref(), kind, after)
    }

    // Scanning

    /// Scan a volume on the calling thread
    pub fn scan(&self, handle: VolumeHandle, strict: bool) -> Result<Arc<ScanResult>> {
        self.entry(handle)?.scanner().scan(strict)
    }

    /// Scan a volume in the background
    pub fn spawn_scan(&self, handle: VolumeHandle, strict: bool) -> Result<Pending<Arc<ScanResult>>> {
        let scanner = self.entry(handle)?.scanner();
        Ok(self.worker.submit(move || scanner.scan(strict)))
    }

    /// Validate one block and report why it fails
    pub fn diagnose(&self, handle: VolumeHandle, block: u64, strict: bool) -> Result<Validation> {
        self.entry(handle)?.scanner().diagnose(block, strict)
    }

    /// Repair the allocation bitmap on the calling thread
    pub fn rectify(&mut self, handle: VolumeHandle, strict: bool) -> Result<Arc<ScanResult>> {
        self.entry(handle)?.scanner().rectify(strict)
    }

    /// Repair the allocation bitmap in the background
    pub fn spawn_rectify(&mut self, handle: VolumeHandle, strict: bool) -> Result<Pending<Arc<ScanResult>>> {
        let scanner = self.entry(handle)?.scanner();
        Ok(self.worker.submit(move || scanner.rectify(strict)))
    }

    /// Most recent scan result of a volume (check `is_stale` before display)
    pub fn scan_result(&self, handle: VolumeHandle) -> Result<Arc<ScanResult>> {
        self.entry(handle)?
            .scan_state()
            .latest()
            .ok_or(ImageError::NoScanResult)
    }

    /// Is a scan of the volume running?
    pub fn is_scanning(&self, handle: VolumeHandle) -> Result<bool> {
        Ok(self.entry(handle)?.scan_state().is_busy())
    }

    // Maps

    /// Block usage map
    pub fn usage_map(&self, handle: VolumeHandle, width: usize) -> Result<Vec<BlockKind>> {
        let entry = self.entry(handle)?;
        map::usage_map(&entry.volume().peek(), entry.codec().as_ref(), width)
    }

    /// Build the usage map in the background
    pub fn spawn_usage_map(&self, handle: VolumeHandle, width: usize) -> Result<Pending<Vec<BlockKind>>> {
        let entry = self.entry(handle)?;
        let volume = entry.volume().clone();
        let codec = entry.codec().clone();
        Ok(self.worker.submit(move || {
            let map = map::usage_map(&volume.peek(), codec.as_ref(), width)?;
            if volume.is_detached() {
                return Err(ImageError::Discarded);
            }
            Ok(map)
        }))
    }

    /// Allocation map driven by the latest scan result
    pub fn allocation_map(&self, handle: VolumeHandle, width: usize) -> Result<Vec<AllocationState>> {
        let entry = self.entry(handle)?;
        if entry.codec().allocation().is_none() {
            return Err(ImageError::unsupported(format!(
                "{} has no allocation bitmap",
                entry.codec().name()
            )));
        }
        let result = entry.scan_state().latest().ok_or(ImageError::NoScanResult)?;
        map::allocation_map(&entry.volume().peek(), entry.codec().as_ref(), &result, width)
    }

    /// Health map driven by the latest scan result
    pub fn health_map(&self, handle: VolumeHandle, width: usize) -> Result<Vec<HealthState>> {
        let entry = self.entry(handle)?;
        let result = entry.scan_state().latest().ok_or(ImageError::NoScanResult)?;
        Ok(map::health_map(entry.volume().num_blocks(), &result, width))
    }

    // Write protection and persistence

    /// Set the write protection of a volume
    pub fn set_write_protected(&self, handle: VolumeHandle, protected: bool) -> Result<()> {
        self.entry(handle)?.volume().set_write_protected(protected);
        Ok(())
    }

    /// Flip the write protection of a volume, returning the new state
    pub fn toggle_write_protected(&self, handle: VolumeHandle) -> Result<bool> {
        let volume = self.entry(handle)?.volume();
        let protected = !volume.is_write_protected();
        volume.set_write_protected(protected);
        Ok(protected)
    }

    /// Write a device back to its image file
    pub fn save(&self, handle: DeviceHandle) -> Result<()> {
        self.device(handle)?.save()
    }

    /// Write a device to another file
    pub fn save_as<P: AsRef<Path>>(&self, handle: DeviceHandle, path: P) -> Result<()> {
        self.device(handle)?.save_as(path)
    }

    /// Discard unsaved changes of a device
    pub fn revert(&mut self, handle: DeviceHandle) -> Result<()> {
        self.device(handle)?.revert()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.unmount_all();
    }
}
