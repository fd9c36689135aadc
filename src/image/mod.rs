/// Block-level image access

/// Image builder for creating test and blank images
pub mod builder;
/// Opened image files and their volumes
pub mod device;
/// Rigid Disk Block partition tables
pub mod partition;
/// In-memory block storage
pub mod store;
/// Volume views and write transactions
pub mod volume;

pub use builder::ImageBuilder;
pub use device::{Device, VolumeEntry};
pub use partition::{read_rigid_disk, Partition, RigidDisk};
pub use store::BlockStore;
pub use volume::{BlockSource, Peek, Transaction, Volume, VolumeStats};
