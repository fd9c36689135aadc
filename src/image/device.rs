/// Mounted devices and their volume tables

use crate::catalog::{DeviceInfo, VolumeInfo};
use crate::error::{ImageError, Result};
use crate::filesystem::FileSystemCodec;
use crate::format::{self, FormatTable, ImageFormat, ImageInfo};
use crate::geometry::Geometry;
use crate::image::partition::{read_rigid_disk, Partition};
use crate::image::{BlockStore, Volume};
use crate::scan::{ScanState, Scanner};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A volume of a device together with its codec and scan state
pub struct VolumeEntry {
    volume: Arc<Volume>,
    codec: Arc<dyn FileSystemCodec>,
    scan: Arc<ScanState>,
    mount_point: Option<PathBuf>,
}

impl VolumeEntry {
    fn new(volume: Arc<Volume>, codec: Arc<dyn FileSystemCodec>) -> Self {
        Self {
            volume,
            codec,
            scan: Arc::new(ScanState::default()),
            mount_point: None,
        }
    }

    /// Storage view
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    /// File system codec
    pub fn codec(&self) -> &Arc<dyn FileSystemCodec> {
        &self.codec
    }

    /// Scan bookkeeping
    pub fn scan_state(&self) -> &Arc<ScanState> {
        &self.scan
    }

    /// Where the bridge exposes the volume
    pub fn mount_point(&self) -> Option<&Path> {
        self.mount_point.as_deref()
    }

    pub(crate) fn set_mount_point(&mut self, mount_point: Option<PathBuf>) {
        self.mount_point = mount_point;
    }

    /// Scanner sharing this volume's state
    pub fn scanner(&self) -> Scanner {
        Scanner::new(self.volume.clone(), self.codec.clone(), self.scan.clone())
    }

    /// Catalog snapshot
    pub fn info(&self) -> VolumeInfo {
        VolumeInfo::snapshot(&self.volume, self.codec.as_ref(), self.mount_point())
    }
}

/// One opened image file
///
/// Partition indices stay fixed for the life of the device; removing a volume
/// leaves an empty slot.
pub struct Device {
    path: PathBuf,
    info: ImageInfo,
    geometry: Geometry,
    store: Arc<BlockStore>,
    volumes: Vec<Option<VolumeEntry>>,
}

impl Device {
    /// Open an image, probe it and build its volumes
    pub fn open<P: AsRef<Path>>(path: P, formats: &FormatTable, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|err| ImageError::mount_failed(format!("{}: {}", path.display(), err)))?;
        let probe = format::probe(path, &bytes)?;
        if !formats.supports(probe.info.format) {
            return Err(ImageError::mount_failed(format!(
                "{}: {} images are not enabled",
                path.display(),
                probe.info.format
            )));
        }

        let block_size = probe.info.format.block_size();
        let store = Arc::new(BlockStore::with_blocks(
            path,
            block_size,
            probe.geometry.num_blocks(),
            bytes,
        )?);

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        let partitions = match probe.info.format {
            ImageFormat::Hdf => match read_rigid_disk(&store)? {
                Some(rdb) if !rdb.partitions.is_empty() => rdb.partitions,
                _ => vec![Partition::whole(stem, store.num_blocks(), block_size)],
            },
            _ => vec![Partition::whole(stem, store.num_blocks(), block_size)],
        };

        let mut volumes = Vec::with_capacity(partitions.len());
        for (index, part) in partitions.iter().enumerate() {
            if part.block_size != block_size {
                log::warn!(
                    "device: {} uses {} byte blocks, accessing as {}",
                    part.name,
                    part.block_size,
                    block_size
                );
            }
            let volume = Arc::new(Volume::new(
                store.clone(),
                index,
                part.name.clone(),
                part.first_block,
                part.num_blocks,
            )?);
            volume.set_write_protected(read_only);
            let codec = formats.codec_for(&volume, &probe.info)?;
            log::debug!(
                "device: volume {} '{}' blocks {}..{} ({})",
                index,
                part.name,
                part.first_block,
                part.first_block + part.num_blocks,
                codec.name()
            );
            volumes.push(Some(VolumeEntry::new(volume, codec)));
        }

        Ok(Self {
            path: path.to_path_buf(),
            info: probe.info,
            geometry: probe.geometry,
            store,
            volumes,
        })
    }

    /// Image file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Image file name without extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Format and medium
    pub fn image_info(&self) -> &ImageInfo {
        &self.info
    }

    /// Physical layout
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Backing block store
    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    /// Number of partition slots, mounted or not
    pub fn num_partitions(&self) -> usize {
        self.volumes.len()
    }

    /// Number of volumes still mounted
    pub fn num_volumes(&self) -> usize {
        self.volumes.iter().flatten().count()
    }

    /// Are all volumes gone?
    pub fn is_empty(&self) -> bool {
        self.num_volumes() == 0
    }

    /// Mounted volume by partition index
    pub fn volume(&self, partition: usize) -> Option<&VolumeEntry> {
        self.volumes.get(partition)?.as_ref()
    }

    pub(crate) fn volume_mut(&mut self, partition: usize) -> Option<&mut VolumeEntry> {
        self.volumes.get_mut(partition)?.as_mut()
    }

    /// Mounted volumes in partition order
    pub fn volumes(&self) -> impl Iterator<Item = &VolumeEntry> {
        self.volumes.iter().flatten()
    }

    /// Remove a volume from the table and mark it detached
    pub(crate) fn take_volume(&mut self, partition: usize) -> Option<VolumeEntry> {
        let entry = self.volumes.get_mut(partition)?.take()?;
        entry.volume.detach();
        Some(entry)
    }

    /// Catalog snapshot of the device
    pub fn describe(&self) -> DeviceInfo {
        DeviceInfo {
            path: self.path.clone(),
            info: self.info,
            block_size: self.store.block_size(),
            num_blocks: self.store.num_blocks(),
            cylinders: self.geometry.cylinders(),
            heads: self.geometry.heads(),
            min_sectors: self.geometry.min_sectors(),
            max_sectors: self.geometry.max_sectors(),
            sector_table: self.geometry.sector_table().to_vec(),
            num_volumes: self.num_volumes(),
            modified: self.store.is_modified(),
        }
    }

    /// Are there unsaved changes?
    pub fn is_modified(&self) -> bool {
        self.store.is_modified()
    }

    /// Write changes back to the image file
    pub fn save(&self) -> Result<()> {
        self.store.save()
    }

    /// Write the image to another file
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.store.save_as(path)
    }

    /// Drop changes and reload the image file
    ///
    /// Every mounted volume moves to a new generation.
    pub fn revert(&self) -> Result<()> {
        self.store.revert()?;
        for entry in self.volumes() {
            entry.volume.bump_generation();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::BlockKind;
    use crate::image::builder::write_rigid_disk;
    use crate::image::ImageBuilder;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, builder: ImageBuilder) -> PathBuf {
        let path = dir.path().join(name);
        builder.write_to(&path).unwrap();
        path
    }

    #[test]
    fn test_open_adf() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "Work.adf", ImageBuilder::new(ImageFormat::Adf).volume_name("Work"));
        let device = Device::open(&path, &FormatTable::default(), false).unwrap();

        assert_eq!(device.store().num_blocks(), 1760);
        assert_eq!(device.num_volumes(), 1);
        assert_eq!(device.stem(), "Work");
        let entry = device.volume(0).unwrap();
        assert_eq!(entry.codec().name(), "OFS");
        assert_eq!(entry.info().name, "Work");
        assert_eq!(entry.volume().stats().bytes_read(), 0);

        let info = device.describe();
        assert_eq!(info.cylinders, 80);
        assert_eq!(info.heads, 2);
        assert_eq!(info.min_sectors, 11);
        assert_eq!(info.capacity_string(), "880 KB");
        assert!(!info.modified);
    }

    #[test]
    fn test_open_partitioned_hdf() {
        let dir = TempDir::new().unwrap();
        let builder = ImageBuilder::new(ImageFormat::Hdf)
            .partition("DH0", 20)
            .partition("DH1", 10);
        let path = write(&dir, "disk.hdf", builder);
        let device = Device::open(&path, &FormatTable::default(), true).unwrap();

        assert_eq!(device.num_partitions(), 2);
        let dh0 = device.volume(0).unwrap().volume();
        let dh1 = device.volume(1).unwrap().volume();
        assert_eq!(dh0.name(), "DH0");
        assert_eq!(dh1.name(), "DH1");
        assert_eq!(dh1.first_block(), dh0.first_block() + dh0.num_blocks());
        assert!(dh0.is_write_protected());
    }

    #[test]
    fn test_hostile_rdb_falls_back_to_whole_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.hdf");
        let mut bytes = vec![0u8; 8 * 16 * 512];
        write_rigid_disk(&mut bytes, 8, 0xFFFF_FFFF, 0xFFFF_FFFF, &[("DH0", 2, 3)]);
        fs::write(&path, bytes).unwrap();

        let device = Device::open(&path, &FormatTable::default(), false).unwrap();
        assert_eq!(device.num_partitions(), 1);
        assert_eq!(device.volume(0).unwrap().volume().num_blocks(), 128);
    }

    #[test]
    fn test_take_volume_detaches() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.st", ImageBuilder::new(ImageFormat::St));
        let mut device = Device::open(&path, &FormatTable::default(), false).unwrap();

        let entry = device.take_volume(0).unwrap();
        assert!(entry.volume().is_detached());
        assert!(device.is_empty());
        assert!(device.take_volume(0).is_none());
        assert_eq!(device.num_partitions(), 1);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Device::open(dir.path().join("none.adf"), &FormatTable::default(), false);
        assert!(matches!(result, Err(ImageError::MountFailed(_))));
    }

    #[test]
    fn test_disabled_format() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.d64", ImageBuilder::new(ImageFormat::D64));
        let result = Device::open(&path, &FormatTable::empty(), false);
        assert!(matches!(result, Err(ImageError::MountFailed(_))));
    }

    #[test]
    fn test_revert_bumps_generation() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "b.adf", ImageBuilder::new(ImageFormat::Adf));
        let device = Device::open(&path, &FormatTable::default(), false).unwrap();
        let volume = device.volume(0).unwrap().volume().clone();

        volume.write_byte(100, 0, 0xFF).unwrap();
        assert!(device.is_modified());
        assert_eq!(volume.generation(), 1);

        device.revert().unwrap();
        assert_eq!(volume.generation(), 2);
        assert!(!device.is_modified());
        assert_eq!(volume.read_byte(100, 0).unwrap(), 0);
    }

    #[test]
    fn test_save() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.adf", ImageBuilder::new(ImageFormat::Adf));
        let device = Device::open(&path, &FormatTable::default(), false).unwrap();
        let entry = device.volume(0).unwrap();
        entry.volume().write_byte(200, 4, 0x42).unwrap();
        device.save().unwrap();
        assert!(!device.is_modified());

        let reopened = Device::open(&path, &FormatTable::default(), false).unwrap();
        let entry = reopened.volume(0).unwrap();
        let volume: &Volume = entry.volume();
        assert_eq!(volume.read_byte(200, 4).unwrap(), 0x42);
        assert_eq!(entry.codec().classify(volume, 880).unwrap(), BlockKind::Root);
    }
}
