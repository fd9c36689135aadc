/// Registry configuration

use crate::format::FormatTable;
use std::env;
use std::path::PathBuf;

/// Environment variable overriding the mount root
pub const ENV_MOUNT_ROOT: &str = "RETROMOUNT_MOUNT_ROOT";

/// Environment variable forcing read-only mounts when set to `1`
pub const ENV_READ_ONLY: &str = "RETROMOUNT_READ_ONLY";

/// What to do when the OS bridge refuses a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgePolicy {
    /// Fail the whole device mount
    #[default]
    Required,
    /// Keep the device mounted without OS exposure
    Optional,
}

/// Settings for a [`DeviceRegistry`](crate::DeviceRegistry)
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Parent directory of generated mount points
    pub mount_root: PathBuf,
    /// Bridge failure handling
    pub bridge_policy: BridgePolicy,
    /// Open every volume write protected
    pub read_only: bool,
    /// Write unsaved changes back when a device is removed
    pub save_on_unmount: bool,
    /// Codec per image format
    pub formats: FormatTable,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mount_root: env::temp_dir().join("retromount"),
            bridge_policy: BridgePolicy::Required,
            read_only: false,
            save_on_unmount: false,
            formats: FormatTable::default(),
        }
    }
}

impl RegistryConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = env::var_os(ENV_MOUNT_ROOT).filter(|v| !v.is_empty()) {
            config.mount_root = PathBuf::from(root);
        }
        if env::var(ENV_READ_ONLY).is_ok_and(|v| v == "1") {
            config.read_only = true;
        }
        log::debug!("config: {:?}", config);
        config
    }

    /// Set the mount root
    pub fn mount_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.mount_root = root.into();
        self
    }

    /// Set the bridge policy
    pub fn bridge_policy(mut self, policy: BridgePolicy) -> Self {
        self.bridge_policy = policy;
        self
    }

    /// Open volumes write protected
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Save modified devices on removal
    pub fn save_on_unmount(mut self, save: bool) -> Self {
        self.save_on_unmount = save;
        self
    }

    /// Replace the format table
    pub fn formats(mut self, formats: FormatTable) -> Self {
        self.formats = formats;
        self
    }
}
