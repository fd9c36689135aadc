use thiserror::Error;

use crate::bridge::BridgeError;

/// Result type alias for image and volume operations
pub type Result<T> = std::result::Result<T, ImageError>;

/// Errors that can occur when mounting, inspecting or repairing disk images
#[derive(Debug, Error)]
pub enum ImageError {
    /// I/O error occurred while reading or writing the image file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image could not be mounted
    #[error("Mount failed: {0}")]
    MountFailed(String),

    /// The file system on the volume offers no support for the requested operation
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A device or volume handle refers to something that is no longer mounted
    #[error("Invalid handle")]
    InvalidHandle,

    /// Block number beyond the end of the device or volume
    #[error("Block {block} out of range (max: {max})")]
    BlockOutOfRange {
        /// Requested block
        block: u64,
        /// Highest valid block number
        max: u64,
    },

    /// Byte range does not fit inside a block
    #[error("Offset {offset} + {length} exceeds block size {block_size}")]
    OffsetOutOfRange {
        /// Byte offset inside the block
        offset: usize,
        /// Number of bytes requested
        length: usize,
        /// Size of a block in bytes
        block_size: usize,
    },

    /// Geometry coordinate outside the device layout
    #[error("{what} {value} out of range (max: {max})")]
    OutOfRange {
        /// Which coordinate was rejected (block, cylinder, head, sector, track)
        what: &'static str,
        /// Rejected value
        value: u64,
        /// Highest valid value
        max: u64,
    },

    /// The OS-level mount bridge reported an error
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// The volume is write protected
    #[error("Volume is write protected")]
    WriteProtected,

    /// A scan is already running on this volume
    #[error("A scan is already in progress on this volume")]
    ScanInProgress,

    /// No scan has been run on this volume yet
    #[error("No scan result available")]
    NoScanResult,

    /// Background work was dropped because its volume went away
    #[error("Result discarded: volume was unmounted")]
    Discarded,

    /// On-disk structures are damaged beyond interpretation
    #[error("Corrupted: {0}")]
    Corrupted(String),
}

impl ImageError {
    /// Create a mount failure with a reason
    pub fn mount_failed<S: Into<String>>(reason: S) -> Self {
        ImageError::MountFailed(reason.into())
    }

    /// Create an unsupported format error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        ImageError::UnsupportedFormat(message.into())
    }

    /// Create a corruption error
    pub fn corrupted<S: Into<String>>(message: S) -> Self {
        ImageError::Corrupted(message.into())
    }

    /// Create a geometry range error
    pub fn out_of_range(what: &'static str, value: u64, max: u64) -> Self {
        ImageError::OutOfRange { what, value, max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImageError::BlockOutOfRange { block: 1760, max: 1759 };
        assert_eq!(err.to_string(), "Block 1760 out of range (max: 1759)");
    }

    #[test]
    fn test_offset_error() {
        let err = ImageError::OffsetOutOfRange {
            offset: 500,
            length: 20,
            block_size: 512,
        };
        assert_eq!(err.to_string(), "Offset 500 + 20 exceeds block size 512");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(
            ImageError::mount_failed("no such file").to_string(),
            "Mount failed: no such file"
        );
        assert_eq!(
            ImageError::out_of_range("cylinder", 80, 79).to_string(),
            "cylinder 80 out of range (max: 79)"
        );
    }

    #[test]
    fn test_bridge_error_wraps() {
        let err: ImageError = BridgeError::Os {
            code: 2,
            message: "No such file or directory".to_string(),
        }
        .into();
        assert!(matches!(err, ImageError::Bridge(_)));
    }
}
