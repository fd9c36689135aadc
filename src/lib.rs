/*!
# retromount

A Rust library for mounting retro disk images as volumes, inspecting their
block structures and checking their allocation bitmaps.

## Features

- Amiga ADF/HDF (with Rigid Disk Block partitions), PC IMG, Atari ST and
  Commodore D64 images
- Cylinder/head/sector geometry with per-track sector tables
- Per-volume read/write counters, cached/dirty block tracking and a
  generation counter that marks derived data as stale
- Block usage, allocation and health maps
- Consistency scanning of Amiga OFS/FFS volumes and bitmap repair
- A device registry with generation-checked handles and a pluggable OS
  mount bridge

## Quick Start

```rust,no_run
use retromount::{DeviceRegistry, RegistryConfig, VolumeHandle};

let mut registry = DeviceRegistry::new(RegistryConfig::from_env())?;
let device = registry.mount("Workbench.adf")?;
let volume = VolumeHandle::new(device, 0);

let info = registry.volume_info(volume)?;
println!("{}: {} ({} full)", info.name, info.capacity_string(), info.fill_string());

// Check the allocation bitmap against the directory tree
let result = registry.spawn_scan(volume, true)?.wait()?;
if result.conflicts() > 0 {
    registry.rectify(volume, true)?;
    registry.save(device)?;
}

registry.unmount(device, None);
# Ok::<(), retromount::ImageError>(())
```

## Modules

- `geometry`: CHS to block translation
- `image`: Block store, volumes, devices, partitions and the image builder
- `format`: Image formats, probing and the codec table
- `filesystem`: File system codec interface, Amiga and generic codecs
- `catalog`: Device and volume snapshots
- `map`: Usage, allocation and health maps
- `scan`: Consistency scanner
- `worker`: Background worker for scans and maps
- `bridge`: OS-level mount bridge and its event channel
- `config`: Registry configuration
- `registry`: Mounted device registry
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// OS-level mount bridge
pub mod bridge;
/// Device and volume snapshots
pub mod catalog;
/// Registry configuration
pub mod config;
/// Error types and Result alias
pub mod error;
/// File system codecs
pub mod filesystem;
/// Image formats, probing and the codec table
pub mod format;
/// CHS geometry
pub mod geometry;
/// Block stores, volumes and devices
pub mod image;
/// Usage, allocation and health maps
pub mod map;
/// Mounted device registry
pub mod registry;
/// Consistency scanning
pub mod scan;
/// Background worker
pub mod worker;

// Re-export common types
pub use bridge::{BridgeError, BridgeEvent, BridgeEventKind, DetachedBridge, EventSender, MountBridge};
pub use catalog::{capacity_string, DeviceInfo, VolumeInfo};
pub use config::{BridgePolicy, RegistryConfig};
pub use error::{ImageError, Result};
pub use filesystem::{
    AllocationChange, AllocationMap, AmigaCodec, BlockKind, BlockSet, DirEntry, DosType, EntryKind,
    FileSystemCodec, GenericCodec, RootMetadata, Validation,
};
pub use format::{FormatTable, ImageFormat, ImageInfo, MediaType};
pub use geometry::{BlockAddress, Chs, Geometry};
pub use image::{BlockSource, BlockStore, Device, ImageBuilder, Transaction, Volume, VolumeEntry};
pub use map::{AllocationState, HealthState};
pub use registry::{DeviceHandle, DeviceRegistry, VolumeHandle};
pub use scan::{ScanResult, ScanState, Scanner};
pub use worker::{Pending, Worker};
