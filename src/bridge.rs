/// OS-level mount bridge boundary
///
/// A bridge exposes a mounted volume to the host file hierarchy (for example
/// through a user-space file system driver). The registry hands each bridge a
/// shared [`Volume`] for block reads and writes plus an [`EventSender`]; the
/// bridge reports back through that channel instead of calling into the
/// registry, so no registry reference ever crosses into bridge threads.

use crate::image::Volume;
use crate::registry::DeviceHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a mount bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The host OS rejected the operation
    #[error("OS error {code}: {message}")]
    Os {
        /// OS error code (errno)
        code: i32,
        /// OS error message
        message: String,
    },

    /// No bridge driver is available
    #[error("Bridge unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Os {
            code: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
        }
    }
}

/// What happened on a bridged volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEventKind {
    /// The host unmounted the volume on its own
    Unmounted,
    /// The host wrote to a block of the volume
    Wrote {
        /// Volume-relative block number
        block: u64,
    },
    /// The bridge hit an error it could not report synchronously
    Error(String),
}

/// A message from a bridge to the coordinating thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    /// Device the volume belongs to
    pub device: DeviceHandle,
    /// Partition index of the volume
    pub partition: usize,
    /// Event payload
    pub kind: BridgeEventKind,
}

/// Sending half of the bridge event channel, bound to one volume
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<BridgeEvent>,
    device: DeviceHandle,
    partition: usize,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::Sender<BridgeEvent>, device: DeviceHandle, partition: usize) -> Self {
        Self {
            tx,
            device,
            partition,
        }
    }

    /// Post an event; silently dropped if the registry is gone
    pub fn send(&self, kind: BridgeEventKind) {
        let event = BridgeEvent {
            device: self.device,
            partition: self.partition,
            kind,
        };
        if self.tx.send(event).is_err() {
            log::debug!("bridge: registry gone, dropping event for {:?}", self.device);
        }
    }
}

/// Exposes volumes to the host operating system
pub trait MountBridge: Send + Sync {
    /// Short name for log messages
    fn name(&self) -> &str;

    /// Make a volume visible at a mount point
    fn mount(&self, mount_point: &Path, volume: Arc<Volume>, events: EventSender) -> Result<(), BridgeError>;

    /// Remove a volume from the host hierarchy
    fn unmount(&self, mount_point: &Path) -> Result<(), BridgeError>;
}

/// Bridge that keeps volumes inside the process
///
/// Nothing is exposed to the host, so mounting never fails unless the mount
/// point is already taken. Used by the console and by tests.
#[derive(Default)]
pub struct DetachedBridge {
    mounted: Mutex<HashMap<PathBuf, Arc<Volume>>>,
}

impl DetachedBridge {
    /// Create an empty bridge
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount points currently held
    pub fn mount_points(&self) -> Vec<PathBuf> {
        let mut points: Vec<PathBuf> = self.mounted.lock().keys().cloned().collect();
        points.sort();
        points
    }

    /// Volume held at a mount point
    pub fn volume_at(&self, mount_point: &Path) -> Option<Arc<Volume>> {
        self.mounted.lock().get(mount_point).cloned()
    }
}

impl MountBridge for DetachedBridge {
    fn name(&self) -> &str {
        "detached"
    }

    fn mount(&self, mount_point: &Path, volume: Arc<Volume>, _events: EventSender) -> Result<(), BridgeError> {
        let mut mounted = self.mounted.lock();
        if mounted.contains_key(mount_point) {
            return Err(BridgeError::Os {
                code: 16,
                message: format!("{} is busy", mount_point.display()),
            });
        }
        mounted.insert(mount_point.to_path_buf(), volume);
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), BridgeError> {
        match self.mounted.lock().remove(mount_point) {
            Some(_) => Ok(()),
            None => Err(BridgeError::Os {
                code: 22,
                message: format!("{} is not mounted", mount_point.display()),
            }),
        }
    }
}
