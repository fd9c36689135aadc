/// Cylinder/head/sector geometry and block address translation

use crate::error::{ImageError, Result};
use std::fmt;

/// A physical sector position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chs {
    /// Cylinder number
    pub cylinder: u32,
    /// Head (side) number
    pub head: u32,
    /// Sector number within the track, starting at 0
    pub sector: u32,
}

impl Chs {
    /// Create a new CHS triple
    pub fn new(cylinder: u32, head: u32, sector: u32) -> Self {
        Self {
            cylinder,
            head,
            sector,
        }
    }
}

impl fmt::Display for Chs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.cylinder, self.head, self.sector)
    }
}

/// A block position given either linearly or by physical coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAddress {
    /// Linear block number
    Linear(u64),
    /// Cylinder/head/sector triple
    Chs(Chs),
}

impl BlockAddress {
    /// Resolve to a linear block number using the given geometry
    pub fn resolve(&self, geometry: &Geometry) -> Result<u64> {
        match *self {
            BlockAddress::Linear(block) => {
                geometry.check_block(block)?;
                Ok(block)
            }
            BlockAddress::Chs(chs) => geometry.chs_to_block(chs.cylinder, chs.head, chs.sector),
        }
    }

    /// Resolve to a CHS triple using the given geometry
    pub fn to_chs(&self, geometry: &Geometry) -> Result<Chs> {
        let block = self.resolve(geometry)?;
        geometry.block_to_chs(block)
    }
}

impl From<u64> for BlockAddress {
    fn from(block: u64) -> Self {
        BlockAddress::Linear(block)
    }
}

impl From<Chs> for BlockAddress {
    fn from(chs: Chs) -> Self {
        BlockAddress::Chs(chs)
    }
}

/// Device layout with a per-track sector table
///
/// Tracks are numbered row-major by cylinder: `track = head + heads * cylinder`.
/// Tracks may carry different sector counts (zoned media such as the 1541), so
/// block numbers are computed from cumulative track offsets rather than a
/// constant stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    cylinders: u32,
    heads: u32,
    sectors: Vec<u32>,
    /// `offsets[t]` is the first block of track `t`; one extra entry holds the block count
    offsets: Vec<u64>,
}

impl Geometry {
    /// Create a geometry from an explicit sectors-per-track table
    pub fn new(cylinders: u32, heads: u32, sectors: Vec<u32>) -> Result<Self> {
        let tracks = cylinders as u64 * heads as u64;
        if heads == 0 || sectors.len() as u64 != tracks {
            return Err(ImageError::out_of_range(
                "track table length",
                sectors.len() as u64,
                tracks,
            ));
        }

        let mut offsets = Vec::with_capacity(sectors.len() + 1);
        let mut total = 0u64;
        offsets.push(0);
        for &count in &sectors {
            total += count as u64;
            offsets.push(total);
        }

        Ok(Self {
            cylinders,
            heads,
            sectors,
            offsets,
        })
    }

    /// Create a geometry where every track has the same number of sectors
    pub fn uniform(cylinders: u32, heads: u32, sectors_per_track: u32) -> Self {
        let heads = heads.max(1);
        let tracks = (cylinders * heads) as usize;
        let sectors = vec![sectors_per_track; tracks];
        let offsets = (0..=tracks as u64)
            .map(|t| t * sectors_per_track as u64)
            .collect();

        Self {
            cylinders,
            heads,
            sectors,
            offsets,
        }
    }

    /// Number of cylinders
    pub fn cylinders(&self) -> u32 {
        self.cylinders
    }

    /// Number of heads
    pub fn heads(&self) -> u32 {
        self.heads
    }

    /// Number of tracks (cylinders * heads)
    pub fn num_tracks(&self) -> u32 {
        self.sectors.len() as u32
    }

    /// Total number of blocks
    pub fn num_blocks(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Sectors-per-track table
    pub fn sector_table(&self) -> &[u32] {
        &self.sectors
    }

    /// Fewest sectors on any track
    pub fn min_sectors(&self) -> u32 {
        self.sectors.iter().copied().min().unwrap_or(0)
    }

    /// Most sectors on any track
    pub fn max_sectors(&self) -> u32 {
        self.sectors.iter().copied().max().unwrap_or(0)
    }

    /// Number of sectors on a track
    pub fn sectors_in_track(&self, track: u32) -> Result<u32> {
        self.sectors.get(track as usize).copied().ok_or_else(|| {
            ImageError::out_of_range(
                "track",
                track as u64,
                self.num_tracks().saturating_sub(1) as u64,
            )
        })
    }

    /// Track index for a cylinder/head pair
    pub fn track_index(&self, cylinder: u32, head: u32) -> Result<u32> {
        if cylinder >= self.cylinders {
            return Err(ImageError::out_of_range(
                "cylinder",
                cylinder as u64,
                self.cylinders.saturating_sub(1) as u64,
            ));
        }
        if head >= self.heads {
            return Err(ImageError::out_of_range(
                "head",
                head as u64,
                self.heads.saturating_sub(1) as u64,
            ));
        }
        Ok(head + self.heads * cylinder)
    }

    /// Cylinder/head pair of a track
    pub fn track_position(&self, track: u32) -> Result<(u32, u32)> {
        self.sectors_in_track(track)?;
        Ok((track / self.heads, track % self.heads))
    }

    /// First block of a track
    pub fn track_start(&self, track: u32) -> Result<u64> {
        self.sectors_in_track(track)?;
        Ok(self.offsets[track as usize])
    }

    /// Track holding a block
    pub fn block_to_track(&self, block: u64) -> Result<u32> {
        self.check_block(block)?;
        let after = self.offsets.partition_point(|&start| start <= block);
        Ok((after - 1) as u32)
    }

    /// Convert a linear block number into a CHS triple
    pub fn block_to_chs(&self, block: u64) -> Result<Chs> {
        let track = self.block_to_track(block)?;
        let sector = (block - self.offsets[track as usize]) as u32;
        Ok(Chs {
            cylinder: track / self.heads,
            head: track % self.heads,
            sector,
        })
    }

    /// Convert a CHS triple into a linear block number
    pub fn chs_to_block(&self, cylinder: u32, head: u32, sector: u32) -> Result<u64> {
        let track = self.track_index(cylinder, head)?;
        let count = self.sectors[track as usize];
        if sector >= count {
            return Err(ImageError::out_of_range(
                "sector",
                sector as u64,
                count.saturating_sub(1) as u64,
            ));
        }
        Ok(self.offsets[track as usize] + sector as u64)
    }

    pub(crate) fn check_block(&self, block: u64) -> Result<()> {
        let blocks = self.num_blocks();
        if block >= blocks {
            log::error!("geometry: block {} beyond end of device ({} blocks)", block, blocks);
            return Err(ImageError::out_of_range(
                "block",
                block,
                blocks.saturating_sub(1),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d64() -> Geometry {
        let mut sectors = Vec::new();
        for track in 1..=35u32 {
            sectors.push(match track {
                1..=17 => 21,
                18..=24 => 19,
                25..=30 => 18,
                _ => 17,
            });
        }
        Geometry::new(35, 1, sectors).unwrap()
    }

    #[test]
    fn test_uniform_adf() {
        let geo = Geometry::uniform(80, 2, 11);
        assert_eq!(geo.num_tracks(), 160);
        assert_eq!(geo.num_blocks(), 1760);
        assert_eq!(geo.block_to_chs(0).unwrap(), Chs::new(0, 0, 0));
        assert_eq!(geo.block_to_chs(11).unwrap(), Chs::new(0, 1, 0));
        assert_eq!(geo.block_to_chs(22).unwrap(), Chs::new(1, 0, 0));
        assert_eq!(geo.chs_to_block(79, 1, 10).unwrap(), 1759);
    }

    #[test]
    fn test_track_index_row_major() {
        let geo = Geometry::uniform(80, 2, 9);
        assert_eq!(geo.track_index(0, 1).unwrap(), 1);
        assert_eq!(geo.track_index(3, 0).unwrap(), 6);
        assert_eq!(geo.track_position(7).unwrap(), (3, 1));
    }

    #[test]
    fn test_zoned_d64() {
        let geo = d64();
        assert_eq!(geo.num_blocks(), 683);
        assert_eq!(geo.min_sectors(), 17);
        assert_eq!(geo.max_sectors(), 21);
        // Directory track 18 starts after 17 tracks of 21 sectors
        assert_eq!(geo.chs_to_block(17, 0, 0).unwrap(), 357);
        assert_eq!(geo.block_to_chs(357).unwrap(), Chs::new(17, 0, 0));
        assert_eq!(geo.block_to_chs(682).unwrap(), Chs::new(34, 0, 16));
    }

    #[test]
    fn test_out_of_range() {
        let geo = Geometry::uniform(40, 2, 11);
        assert!(matches!(
            geo.block_to_chs(880),
            Err(ImageError::OutOfRange { what: "block", .. })
        ));
        assert!(geo.chs_to_block(40, 0, 0).is_err());
        assert!(geo.chs_to_block(0, 2, 0).is_err());
        assert!(geo.chs_to_block(0, 0, 11).is_err());
        assert!(geo.sectors_in_track(80).is_err());
    }

    #[test]
    fn test_invalid_track_table() {
        assert!(Geometry::new(2, 2, vec![9, 9, 9]).is_err());
        assert!(Geometry::new(1, 0, vec![]).is_err());
    }

    #[test]
    fn test_empty_tracks_are_skipped() {
        let geo = Geometry::new(3, 1, vec![4, 0, 2]).unwrap();
        assert_eq!(geo.num_blocks(), 6);
        assert_eq!(geo.block_to_chs(4).unwrap(), Chs::new(2, 0, 0));
    }

    #[test]
    fn test_block_address() {
        let geo = Geometry::uniform(80, 2, 11);
        let addr = BlockAddress::from(Chs::new(40, 0, 0));
        assert_eq!(addr.resolve(&geo).unwrap(), 880);
        assert_eq!(BlockAddress::from(880).to_chs(&geo).unwrap(), Chs::new(40, 0, 0));
        assert!(BlockAddress::Linear(1760).resolve(&geo).is_err());
    }

    fn arb_geometry() -> impl Strategy<Value = Geometry> {
        (1u32..24, 1u32..3).prop_flat_map(|(cyls, heads)| {
            let tracks = (cyls * heads) as usize;
            prop::collection::vec(1u32..30, tracks)
                .prop_map(move |sectors| Geometry::new(cyls, heads, sectors).unwrap())
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(geo in arb_geometry(), seed in any::<u64>()) {
            let block = seed % geo.num_blocks();
            let chs = geo.block_to_chs(block).unwrap();
            prop_assert_eq!(geo.chs_to_block(chs.cylinder, chs.head, chs.sector).unwrap(), block);
        }

        #[test]
        fn prop_sector_monotonic(geo in arb_geometry(), seed in any::<u32>()) {
            let track = seed % geo.num_tracks();
            let (cyl, head) = geo.track_position(track).unwrap();
            let count = geo.sectors_in_track(track).unwrap();
            let mut previous = None;
            for sector in 0..count {
                let block = geo.chs_to_block(cyl, head, sector).unwrap();
                if let Some(prev) = previous {
                    prop_assert!(block > prev);
                }
                previous = Some(block);
            }
        }
    }
}
