/// Image formats, capability table and format probing

/// Format constants
pub mod constants;
/// Format detection from file name and contents
pub mod probe;
/// Per-format capabilities
pub mod table;

pub use constants::*;
pub use probe::{probe, Probe};
pub use table::{CodecFactory, FormatTable};

use std::fmt;
use std::path::Path;

/// Disk image container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageFormat {
    /// Amiga floppy disk file
    Adf,
    /// Amiga hard disk file
    Hdf,
    /// Raw PC sector dump
    Img,
    /// Atari ST sector dump
    St,
    /// Commodore 1541 sector dump
    D64,
}

/// Kind of physical medium an image represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Removable floppy disk
    Floppy,
    /// Fixed hard disk
    HardDisk,
}

impl ImageFormat {
    /// Every supported format
    pub const ALL: [ImageFormat; 5] = [
        ImageFormat::Adf,
        ImageFormat::Hdf,
        ImageFormat::Img,
        ImageFormat::St,
        ImageFormat::D64,
    ];

    /// Detect the format from a file extension (case insensitive)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "adf" => Some(ImageFormat::Adf),
            "hdf" => Some(ImageFormat::Hdf),
            "img" | "ima" | "dsk" => Some(ImageFormat::Img),
            "st" => Some(ImageFormat::St),
            "d64" => Some(ImageFormat::D64),
            _ => None,
        }
    }

    /// Short name of the format
    pub fn name(&self) -> &'static str {
        match self {
            ImageFormat::Adf => "ADF",
            ImageFormat::Hdf => "HDF",
            ImageFormat::Img => "IMG",
            ImageFormat::St => "ST",
            ImageFormat::D64 => "D64",
        }
    }

    /// Machine family the format belongs to
    pub fn platform(&self) -> &'static str {
        match self {
            ImageFormat::Adf | ImageFormat::Hdf => "Amiga",
            ImageFormat::Img => "PC",
            ImageFormat::St => "Atari ST",
            ImageFormat::D64 => "Commodore 64",
        }
    }

    /// Block size used by the format
    pub fn block_size(&self) -> usize {
        match self {
            ImageFormat::D64 => BLOCK_SIZE_256,
            _ => BLOCK_SIZE_512,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl MediaType {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            MediaType::Floppy => "Floppy disk",
            MediaType::HardDisk => "Hard drive",
        }
    }
}

/// Identity of an opened image: its format and medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageInfo {
    /// Container format
    pub format: ImageFormat,
    /// Medium
    pub media: MediaType,
    /// High density floppy (Amiga HD, PC 1.44M and up)
    pub high_density: bool,
}

impl ImageInfo {
    /// Human-readable description ("Amiga Floppy disk", "Amiga Hard drive", ...)
    pub fn description(&self) -> String {
        let density = match (self.media, self.high_density) {
            (MediaType::Floppy, true) => "HD ",
            (MediaType::Floppy, false) if self.format == ImageFormat::Adf => "DD ",
            _ => "",
        };
        format!("{} {}{}", self.format.platform(), density, self.media.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(ImageFormat::from_path("Workbench.ADF"), Some(ImageFormat::Adf));
        assert_eq!(ImageFormat::from_path("/tmp/sys.hdf"), Some(ImageFormat::Hdf));
        assert_eq!(ImageFormat::from_path("game.d64"), Some(ImageFormat::D64));
        assert_eq!(ImageFormat::from_path("disk.st"), Some(ImageFormat::St));
        assert_eq!(ImageFormat::from_path("readme.txt"), None);
        assert_eq!(ImageFormat::from_path("noext"), None);
    }

    #[test]
    fn test_description() {
        let info = ImageInfo {
            format: ImageFormat::Adf,
            media: MediaType::Floppy,
            high_density: false,
        };
        assert_eq!(info.description(), "Amiga DD Floppy disk");

        let info = ImageInfo {
            format: ImageFormat::Hdf,
            media: MediaType::HardDisk,
            high_density: false,
        };
        assert_eq!(info.description(), "Amiga Hard drive");
    }
}
