/// Codec for volumes whose file system has no block-level support
///
/// PC, Atari and Commodore images mount and report metadata, but there is no
/// allocation bitmap support, so scans and allocation maps are unavailable.

use crate::error::Result;
use crate::filesystem::{BlockKind, FileSystemCodec, RootMetadata, Validation};
use crate::format::constants::*;
use crate::format::ImageFormat;
use crate::image::{BlockSource, Volume};

/// Content-based codec for non-Amiga volumes
#[derive(Debug, Clone)]
pub struct GenericCodec {
    format: ImageFormat,
    label: String,
}

impl GenericCodec {
    /// Create a codec, reading the volume label where the format has one
    pub fn new(format: ImageFormat, volume: &Volume) -> Self {
        let label = read_label(format, volume).unwrap_or_else(|| volume.name().to_string());
        Self { format, label }
    }

    /// Block holding the format's root structure, if any
    fn root_block(&self) -> Option<u64> {
        match self.format {
            ImageFormat::D64 => Some(d64_bam_block()),
            _ => None,
        }
    }
}

/// BAM sector (track 18, sector 0) as a linear block
fn d64_bam_block() -> u64 {
    (1..D64_DIRECTORY_TRACK).map(|t| d64_sectors(t) as u64).sum()
}

fn read_label(format: ImageFormat, volume: &Volume) -> Option<String> {
    let (block, offset, len, pad) = match format {
        ImageFormat::D64 => (d64_bam_block(), D64_DISK_NAME, 16, 0xA0),
        ImageFormat::Img => (0, BPB_VOLUME_LABEL, 11, b' '),
        _ => return None,
    };
    if block >= volume.num_blocks() {
        return None;
    }

    let data = volume.peek().read_block(block).ok()?;
    let label: String = data
        .get(offset..offset + len)?
        .iter()
        .take_while(|&&b| b != pad && b != 0)
        .map(|&b| if (32..127).contains(&b) { b as char } else { '?' })
        .collect();
    let label = label.trim_end().to_string();
    (!label.is_empty()).then_some(label)
}

impl FileSystemCodec for GenericCodec {
    fn name(&self) -> String {
        match self.format {
            ImageFormat::Img => "FAT".to_string(),
            ImageFormat::St => "TOS".to_string(),
            ImageFormat::D64 => "CBM DOS".to_string(),
            ImageFormat::Adf | ImageFormat::Hdf => "NDOS".to_string(),
        }
    }

    fn metadata(&self, volume: &dyn BlockSource) -> Result<RootMetadata> {
        let mut used = 0;
        for block in 0..volume.num_blocks() {
            if volume.read_block(block)?.iter().any(|&b| b != 0) {
                used += 1;
            }
        }

        Ok(RootMetadata {
            name: self.label.clone(),
            created: None,
            modified: None,
            free_blocks: volume.num_blocks() - used,
            used_blocks: used,
        })
    }

    fn classify(&self, volume: &dyn BlockSource, block: u64) -> Result<BlockKind> {
        let data = volume.read_block(block)?;
        if block == 0 && self.format != ImageFormat::D64 {
            return Ok(BlockKind::Boot);
        }
        if Some(block) == self.root_block() {
            return Ok(BlockKind::Root);
        }
        Ok(if data.iter().all(|&b| b == 0) {
            BlockKind::Unclassified
        } else {
            BlockKind::Data
        })
    }

    fn validate(&self, volume: &dyn BlockSource, block: u64, strict: bool) -> Result<Validation> {
        let data = volume.read_block(block)?;
        // A PC boot sector that carries code must end in the 55 AA signature
        if strict && block == 0 && self.format == ImageFormat::Img && data.iter().any(|&b| b != 0) {
            let bsize = data.len();
            if data[bsize - 2..] != [0x55, 0xAA] {
                return Ok(Validation::Invalid("boot sector lacks 55 AA signature".into()));
            }
        }
        Ok(Validation::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::BlockStore;
    use std::sync::Arc;

    fn d64_volume(name: &[u8]) -> Volume {
        let mut bytes = vec![0u8; 683 * 256];
        let bam = 357 * 256 + D64_DISK_NAME;
        bytes[bam..bam + 16].fill(0xA0);
        bytes[bam..bam + name.len()].copy_from_slice(name);
        let store = Arc::new(BlockStore::from_bytes("game.d64", 256, bytes).unwrap());
        Volume::new(store, 0, "game", 0, 683).unwrap()
    }

    #[test]
    fn test_d64_label_and_root() {
        assert_eq!(d64_bam_block(), 357);
        let volume = d64_volume(b"ELITE");
        let codec = GenericCodec::new(ImageFormat::D64, &volume);
        let meta = codec.metadata(&volume).unwrap();
        assert_eq!(meta.name, "ELITE");
        assert_eq!(meta.used_blocks, 1);
        assert_eq!(meta.free_blocks, 682);
        assert_eq!(codec.classify(&volume, 357).unwrap(), BlockKind::Root);
        assert_eq!(codec.classify(&volume, 0).unwrap(), BlockKind::Unclassified);
        assert!(codec.allocation().is_none());
    }

    #[test]
    fn test_label_falls_back_to_volume_name() {
        let store = Arc::new(BlockStore::from_bytes("work.st", 512, vec![0; 720 * 512]).unwrap());
        let volume = Volume::new(store, 0, "work", 0, 720).unwrap();
        let codec = GenericCodec::new(ImageFormat::St, &volume);
        assert_eq!(codec.metadata(&volume).unwrap().name, "work");
        assert_eq!(codec.name(), "TOS");
    }

    #[test]
    fn test_pc_boot_signature() {
        let mut bytes = vec![0u8; 720 * 512];
        bytes[0] = 0xEB;
        let store = Arc::new(BlockStore::from_bytes("dos.img", 512, bytes).unwrap());
        let volume = Volume::new(store, 0, "dos", 0, 720).unwrap();
        let codec = GenericCodec::new(ImageFormat::Img, &volume);
        assert!(codec.validate(&volume, 0, false).unwrap().is_valid());
        assert!(!codec.validate(&volume, 0, true).unwrap().is_valid());
    }
}
