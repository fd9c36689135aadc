/// Work out format, medium and geometry of an image

use crate::error::{ImageError, Result};
use crate::format::constants::*;
use crate::format::{ImageFormat, ImageInfo, MediaType};
use crate::geometry::Geometry;
use std::path::Path;

/// Outcome of probing an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Format and medium
    pub info: ImageInfo,
    /// Physical layout
    pub geometry: Geometry,
}

/// Probe an image from its path and contents
///
/// The extension selects the format; the size (and for PC/Atari images the
/// BIOS parameter block) selects the geometry.
pub fn probe<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<Probe> {
    let path = path.as_ref();
    let format = ImageFormat::from_path(path).ok_or_else(|| {
        ImageError::mount_failed(format!("{}: unrecognized image type", path.display()))
    })?;

    let len = bytes.len() as u64;
    if len == 0 {
        return Err(ImageError::mount_failed(format!("{}: file is empty", path.display())));
    }

    let probe = match format {
        ImageFormat::Adf => probe_adf(len),
        ImageFormat::Hdf => probe_hdf(len, bytes),
        ImageFormat::Img => probe_pc(format, len, bytes, &PC_FLOPPY_SIZES),
        ImageFormat::St => probe_pc(format, len, bytes, &ST_FLOPPY_SIZES),
        ImageFormat::D64 => probe_d64(len),
    }
    .ok_or_else(|| {
        ImageError::mount_failed(format!(
            "{}: {} bytes is not a valid {} image size",
            path.display(),
            len,
            format
        ))
    })?;

    log::debug!(
        "probe: {} is {} with {} blocks",
        path.display(),
        probe.info.description(),
        probe.geometry.num_blocks()
    );
    Ok(probe)
}

fn floppy(format: ImageFormat, geometry: Geometry, high_density: bool) -> Probe {
    Probe {
        info: ImageInfo {
            format,
            media: MediaType::Floppy,
            high_density,
        },
        geometry,
    }
}

fn probe_adf(len: u64) -> Option<Probe> {
    if len % BLOCK_SIZE_512 as u64 != 0 {
        return None;
    }
    let blocks = len / BLOCK_SIZE_512 as u64;

    for (sectors, hd) in [(ADF_DD_SECTORS, false), (ADF_HD_SECTORS, true)] {
        let per_cylinder = 2 * sectors as u64;
        let cylinders = blocks / per_cylinder;
        if blocks % per_cylinder == 0 && (1..=ADF_MAX_CYLINDERS as u64).contains(&cylinders) {
            return Some(floppy(
                ImageFormat::Adf,
                Geometry::uniform(cylinders as u32, 2, sectors),
                hd,
            ));
        }
    }
    None
}

fn probe_hdf(len: u64, bytes: &[u8]) -> Option<Probe> {
    if len % BLOCK_SIZE_512 as u64 != 0 {
        return None;
    }
    let blocks = len / BLOCK_SIZE_512 as u64;

    // Prefer the drive geometry recorded in a Rigid Disk Block when it tiles the image
    let rdb = (0..RDB_SEARCH_LIMIT.min(blocks))
        .map(|b| &bytes[b as usize * BLOCK_SIZE_512..(b as usize + 1) * BLOCK_SIZE_512])
        .find(|block| &block[0..4] == RDB_ID);
    let recorded = rdb.and_then(|block| {
        let be = |o: usize| u32::from_be_bytes([block[o], block[o + 1], block[o + 2], block[o + 3]]);
        let (heads, sectors) = (be(RDB_HEADS), be(RDB_SECTORS));
        let per_cylinder = heads as u64 * sectors as u64;
        (per_cylinder > 0 && blocks % per_cylinder == 0).then_some((heads, sectors, per_cylinder))
    });

    let (heads, sectors, per_cylinder) = recorded.unwrap_or_else(|| {
        let sectors = [32u32, 16, 8, 4, 2, 1]
            .into_iter()
            .find(|&s| blocks % s as u64 == 0)
            .unwrap_or(1);
        (1, sectors, sectors as u64)
    });

    Some(Probe {
        info: ImageInfo {
            format: ImageFormat::Hdf,
            media: MediaType::HardDisk,
            high_density: false,
        },
        geometry: Geometry::uniform((blocks / per_cylinder) as u32, heads, sectors),
    })
}

fn le16(bytes: &[u8], offset: usize) -> u32 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as u32
}

fn probe_pc(format: ImageFormat, len: u64, bytes: &[u8], sizes: &[(u64, u32, u32, u32)]) -> Option<Probe> {
    if len % BLOCK_SIZE_512 as u64 != 0 {
        return None;
    }

    if bytes.len() >= BLOCK_SIZE_512 {
        let bytes_per_sector = le16(bytes, BPB_BYTES_PER_SECTOR);
        let total = le16(bytes, BPB_TOTAL_SECTORS) as u64;
        let sectors = le16(bytes, BPB_SECTORS_PER_TRACK);
        let heads = le16(bytes, BPB_HEADS);
        let per_cylinder = sectors as u64 * heads as u64;

        if bytes_per_sector == BLOCK_SIZE_512 as u32
            && (1..=63).contains(&sectors)
            && (1..=2).contains(&heads)
            && total * BLOCK_SIZE_512 as u64 == len
            && total % per_cylinder == 0
        {
            return Some(floppy(
                format,
                Geometry::uniform((total / per_cylinder) as u32, heads, sectors),
                sectors >= 15,
            ));
        }
    }

    sizes
        .iter()
        .find(|(bytes, ..)| *bytes == len)
        .map(|&(_, c, h, s)| floppy(format, Geometry::uniform(c, h, s), s >= 15))
}

fn probe_d64(len: u64) -> Option<Probe> {
    let blocks = len / BLOCK_SIZE_256 as u64;
    // Images may carry one error byte per block after the block data
    let tracks = match (blocks, len) {
        (D64_BLOCKS_35, _) if len == D64_BLOCKS_35 * 256 => 35,
        (_, l) if l == D64_BLOCKS_35 * 257 => 35,
        (D64_BLOCKS_40, _) if len == D64_BLOCKS_40 * 256 => 40,
        (_, l) if l == D64_BLOCKS_40 * 257 => 40,
        _ => return None,
    };

    let sectors = (1..=tracks).map(d64_sectors).collect();
    Geometry::new(tracks, 1, sectors)
        .ok()
        .map(|geometry| floppy(ImageFormat::D64, geometry, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adf_sizes() {
        let dd = probe("disk.adf", &vec![0; 901_120]).unwrap();
        assert_eq!(dd.geometry.num_blocks(), 1760);
        assert_eq!(dd.geometry.cylinders(), 80);
        assert_eq!(dd.info.media, MediaType::Floppy);

        let small = probe("small.adf", &vec![0; 880 * 512]).unwrap();
        assert_eq!(small.geometry.cylinders(), 40);

        let hd = probe("hd.adf", &vec![0; 1_802_240]).unwrap();
        assert!(hd.info.high_density);
        assert_eq!(hd.geometry.max_sectors(), 22);
    }

    #[test]
    fn test_bad_adf_size() {
        assert!(matches!(
            probe("odd.adf", &vec![0; 1000]),
            Err(ImageError::MountFailed(_))
        ));
    }

    #[test]
    fn test_unknown_extension() {
        assert!(matches!(
            probe("disk.xyz", &[0; 512]),
            Err(ImageError::MountFailed(_))
        ));
    }

    #[test]
    fn test_empty_file() {
        assert!(probe("disk.adf", &[]).is_err());
    }

    #[test]
    fn test_img_by_bpb() {
        let mut bytes = vec![0u8; 1_474_560];
        bytes[BPB_BYTES_PER_SECTOR..BPB_BYTES_PER_SECTOR + 2].copy_from_slice(&512u16.to_le_bytes());
        bytes[BPB_TOTAL_SECTORS..BPB_TOTAL_SECTORS + 2].copy_from_slice(&2880u16.to_le_bytes());
        bytes[BPB_SECTORS_PER_TRACK..BPB_SECTORS_PER_TRACK + 2].copy_from_slice(&18u16.to_le_bytes());
        bytes[BPB_HEADS..BPB_HEADS + 2].copy_from_slice(&2u16.to_le_bytes());

        let probe = probe("dos.img", &bytes).unwrap();
        assert_eq!(probe.geometry.cylinders(), 80);
        assert_eq!(probe.geometry.max_sectors(), 18);
    }

    #[test]
    fn test_st_by_size() {
        let probe = probe("game.st", &vec![0; 368_640]).unwrap();
        assert_eq!(probe.geometry.heads(), 1);
        assert_eq!(probe.geometry.cylinders(), 80);

        let probe = super::probe("dos.img", &vec![0; 368_640]).unwrap();
        assert_eq!(probe.geometry.heads(), 2);
        assert_eq!(probe.geometry.cylinders(), 40);
    }

    #[test]
    fn test_d64() {
        let probe = probe("game.d64", &vec![0; 174_848]).unwrap();
        assert_eq!(probe.geometry.num_blocks(), 683);
        assert_eq!(probe.geometry.min_sectors(), 17);
        assert_eq!(probe.geometry.max_sectors(), 21);

        let with_errors = super::probe("game.d64", &vec![0; 175_531]).unwrap();
        assert_eq!(with_errors.geometry.num_blocks(), 683);
    }

    #[test]
    fn test_hdf_without_rdb() {
        let probe = probe("work.hdf", &vec![0; 4096 * 512]).unwrap();
        assert_eq!(probe.info.media, MediaType::HardDisk);
        assert_eq!(probe.geometry.num_blocks(), 4096);
    }
}
