/// Device and volume information snapshots

use crate::filesystem::{FileSystemCodec, RootMetadata};
use crate::format::ImageInfo;
use crate::image::Volume;
use std::path::{Path, PathBuf};

/// Render a byte count for display
///
/// Uses the largest unit that yields a value above one: GB and MB with two
/// decimals, KB rounded to a whole number, otherwise plain bytes.
pub fn capacity_string(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    let mb = kb / 1024.0;
    let gb = mb / 1024.0;

    if gb > 1.0 {
        format!("{:.2} GB", gb)
    } else if mb > 1.0 {
        format!("{:.2} MB", mb)
    } else if kb > 1.0 {
        format!("{} KB", kb.round() as u64)
    } else {
        format!("{} Bytes", bytes)
    }
}

/// Fraction of used blocks, 0 for an empty volume
pub fn fill(used_blocks: u64, blocks: u64) -> f64 {
    if blocks == 0 {
        0.0
    } else {
        used_blocks as f64 / blocks as f64
    }
}

fn date_string(secs: Option<i64>) -> String {
    match secs {
        Some(secs) => chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        None => String::new(),
    }
}

/// Snapshot of a mounted device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Image file
    pub path: PathBuf,
    /// Format and medium
    pub info: ImageInfo,
    /// Bytes per block
    pub block_size: usize,
    /// Total number of blocks
    pub num_blocks: u64,
    /// Number of cylinders
    pub cylinders: u32,
    /// Number of heads
    pub heads: u32,
    /// Fewest sectors on any track
    pub min_sectors: u32,
    /// Most sectors on any track
    pub max_sectors: u32,
    /// Sectors per track, in track order
    pub sector_table: Vec<u32>,
    /// Number of volumes still mounted
    pub num_volumes: usize,
    /// Unsaved changes present?
    pub modified: bool,
}

impl DeviceInfo {
    /// File name of the image
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Media description ("Amiga DD Floppy disk")
    pub fn description(&self) -> String {
        self.info.description()
    }

    /// Size in bytes
    pub fn num_bytes(&self) -> u64 {
        self.num_blocks * self.block_size as u64
    }

    /// Size for display
    pub fn capacity_string(&self) -> String {
        capacity_string(self.num_bytes())
    }
}

/// Snapshot of a mounted volume
///
/// Taking a snapshot reads the root structures without touching the I/O
/// counters or cache flags.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    /// Partition index on the device
    pub partition: usize,
    /// Partition name
    pub partition_name: String,
    /// Volume label from the root structures
    pub name: String,
    /// Where the volume is exposed, if bridged
    pub mount_point: Option<PathBuf>,
    /// File system name
    pub filesystem: String,
    /// Bytes per block
    pub block_size: usize,
    /// Number of blocks
    pub blocks: u64,
    /// Free blocks reported by the file system
    pub free_blocks: u64,
    /// Used blocks reported by the file system
    pub used_blocks: u64,
    /// Blocks read or written since load
    pub cached_blocks: u64,
    /// Blocks with unsaved changes
    pub dirty_blocks: u64,
    /// Used fraction in `[0, 1]`
    pub fill: f64,
    /// Creation time (POSIX seconds)
    pub created: Option<i64>,
    /// Modification time (POSIX seconds)
    pub modified: Option<i64>,
    /// Bytes read through the volume
    pub bytes_read: u64,
    /// Bytes written through the volume
    pub bytes_written: u64,
    /// Block reads
    pub blocks_read: u64,
    /// Block writes
    pub blocks_written: u64,
    /// Mutation generation
    pub generation: u64,
    /// Write protection flag
    pub write_protected: bool,
}

impl VolumeInfo {
    /// Collect a snapshot of a volume
    pub fn snapshot(
        volume: &Volume,
        codec: &dyn FileSystemCodec,
        mount_point: Option<&Path>,
    ) -> Self {
        let metadata = codec.metadata(&volume.peek()).unwrap_or_else(|err| {
            log::warn!("catalog: {}: unreadable root metadata: {}", volume.name(), err);
            RootMetadata {
                name: volume.name().to_string(),
                ..RootMetadata::default()
            }
        });
        let blocks = volume.num_blocks();
        let stats = volume.stats();

        Self {
            partition: volume.partition(),
            partition_name: volume.name().to_string(),
            name: metadata.name,
            mount_point: mount_point.map(Path::to_path_buf),
            filesystem: codec.name(),
            block_size: volume.block_size(),
            blocks,
            free_blocks: metadata.free_blocks,
            used_blocks: metadata.used_blocks,
            cached_blocks: volume.cached_blocks(),
            dirty_blocks: volume.dirty_blocks(),
            fill: fill(metadata.used_blocks, blocks),
            created: metadata.created,
            modified: metadata.modified,
            bytes_read: stats.bytes_read(),
            bytes_written: stats.bytes_written(),
            blocks_read: stats.blocks_read(),
            blocks_written: stats.blocks_written(),
            generation: volume.generation(),
            write_protected: volume.is_write_protected(),
        }
    }

    /// Size in bytes
    pub fn num_bytes(&self) -> u64 {
        self.blocks * self.block_size as u64
    }

    /// Free space in bytes
    pub fn free_bytes(&self) -> u64 {
        self.free_blocks * self.block_size as u64
    }

    /// Used space in bytes
    pub fn used_bytes(&self) -> u64 {
        self.used_blocks * self.block_size as u64
    }

    /// Block count and size for display ("880 Blocks (440 KB)")
    pub fn capacity_string(&self) -> String {
        let plural = if self.blocks == 1 { "Block" } else { "Blocks" };
        format!("{} {} ({})", self.blocks, plural, capacity_string(self.num_bytes()))
    }

    /// Fill as a rounded percentage ("42%")
    pub fn fill_string(&self) -> String {
        format!("{:.0}%", self.fill * 100.0)
    }

    /// Creation date for display
    pub fn created_string(&self) -> String {
        date_string(self.created)
    }

    /// Modification date for display
    pub fn modified_string(&self) -> String {
        date_string(self.modified)
    }
}
