/// Partition discovery for hard disk images (Rigid Disk Block)

use crate::error::Result;
use crate::filesystem::amiga::be32;
use crate::format::constants::*;
use crate::image::BlockStore;
use std::collections::HashSet;

/// A block range holding one file system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Drive name (DH0, DH1, ...)
    pub name: String,
    /// First device block
    pub first_block: u64,
    /// Number of blocks
    pub num_blocks: u64,
    /// File system block size in bytes
    pub block_size: usize,
    /// DOS type from the environment vector (`DOS\1` etc.)
    pub dos_type: u32,
}

impl Partition {
    /// A partition covering a whole device
    pub fn whole(name: impl Into<String>, num_blocks: u64, block_size: usize) -> Self {
        Self {
            name: name.into(),
            first_block: 0,
            num_blocks,
            block_size,
            dos_type: 0,
        }
    }
}

/// Drive layout read from a Rigid Disk Block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigidDisk {
    /// RDB block number
    pub block: u64,
    /// Cylinders
    pub cylinders: u32,
    /// Heads
    pub heads: u32,
    /// Sectors per track
    pub sectors: u32,
    /// Partitions in list order
    pub partitions: Vec<Partition>,
}

fn checksum_ok(data: &[u8]) -> bool {
    let longs = (be32(data, 4) as usize).min(data.len() / 4);
    (0..longs)
        .map(|i| be32(data, i * 4))
        .fold(0u32, |sum, v| sum.wrapping_add(v))
        == 0
}

/// Look for a Rigid Disk Block in the first blocks of a device
pub fn read_rigid_disk(store: &BlockStore) -> Result<Option<RigidDisk>> {
    let limit = store.num_blocks().min(RDB_SEARCH_LIMIT);
    for block in 0..limit {
        let data = store.read_block(block)?;
        if &data[0..4] == RDB_ID {
            return parse_rigid_disk(store, block, &data).map(Some);
        }
    }
    Ok(None)
}

fn parse_rigid_disk(store: &BlockStore, block: u64, rdb: &[u8]) -> Result<RigidDisk> {
    if !checksum_ok(rdb) {
        log::warn!("rdb: checksum mismatch in block {}", block);
    }

    let cylinders = be32(rdb, RDB_CYLINDERS);
    let sectors = be32(rdb, RDB_SECTORS);
    let heads = be32(rdb, RDB_HEADS);
    log::debug!(
        "rdb: found in block {} ({} cylinders, {} heads, {} sectors)",
        block,
        cylinders,
        heads,
        sectors
    );

    let mut partitions = Vec::new();
    let mut visited = HashSet::new();
    let mut next = be32(rdb, RDB_PART_LIST);

    while next != RDB_END && (next as u64) < store.num_blocks() && visited.insert(next) {
        let part = store.read_block(next as u64)?;
        if &part[0..4] != PART_ID {
            log::warn!("rdb: block {} in partition list is not a PART block", next);
            break;
        }
        if !checksum_ok(&part) {
            log::warn!("rdb: checksum mismatch in partition block {}", next);
        }

        match parse_partition(&part, store) {
            Some(partition) => {
                log::debug!(
                    "rdb: partition {} at {} ({} blocks)",
                    partition.name,
                    partition.first_block,
                    partition.num_blocks
                );
                partitions.push(partition);
            }
            None => log::warn!("rdb: skipping unusable partition in block {}", next),
        }
        next = be32(&part, PART_NEXT);
    }

    Ok(RigidDisk {
        block,
        cylinders,
        heads,
        sectors,
        partitions,
    })
}

fn parse_partition(part: &[u8], store: &BlockStore) -> Option<Partition> {
    let name_len = (part[PART_NAME] as usize).min(31);
    let name = String::from_utf8_lossy(&part[PART_NAME + 1..PART_NAME + 1 + name_len]).into_owned();

    let env = PART_ENVIRONMENT;
    let size_longs = be32(part, env + DE_SIZE_BLOCK * 4) as usize;
    let surfaces = be32(part, env + DE_SURFACES * 4) as u64;
    let blocks_per_track = be32(part, env + DE_BLOCKS_PER_TRACK * 4) as u64;
    let low_cyl = be32(part, env + DE_LOW_CYL * 4) as u64;
    let high_cyl = be32(part, env + DE_HIGH_CYL * 4) as u64;
    let dos_type = be32(part, env + DE_DOS_TYPE * 4);

    let block_size = size_longs * 4;
    if block_size != store.block_size() || high_cyl < low_cyl {
        return None;
    }

    // Fields are untrusted; any overflow makes the partition unusable
    let per_cylinder = surfaces.checked_mul(blocks_per_track)?;
    let first_block = low_cyl.checked_mul(per_cylinder)?;
    let num_blocks = (high_cyl - low_cyl + 1).checked_mul(per_cylinder)?;
    let end = first_block.checked_add(num_blocks)?;
    if num_blocks == 0 || end > store.num_blocks() {
        return None;
    }

    Some(Partition {
        name,
        first_block,
        num_blocks,
        block_size,
        dos_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::builder::write_rigid_disk;

    #[test]
    fn test_no_rdb() {
        let store = BlockStore::from_bytes("x.hdf", 512, vec![0; 64 * 512]).unwrap();
        assert!(read_rigid_disk(&store).unwrap().is_none());
    }

    #[test]
    fn test_two_partitions() {
        let mut bytes = vec![0u8; 8 * 16 * 512];
        write_rigid_disk(&mut bytes, 8, 1, 16, &[("DH0", 1, 3), ("DH1", 4, 7)]);
        let store = BlockStore::from_bytes("x.hdf", 512, bytes).unwrap();

        let rdb = read_rigid_disk(&store).unwrap().unwrap();
        assert_eq!(rdb.block, 0);
        assert_eq!(rdb.cylinders, 8);
        assert_eq!(rdb.partitions.len(), 2);
        assert_eq!(rdb.partitions[0].name, "DH0");
        assert_eq!(rdb.partitions[0].first_block, 16);
        assert_eq!(rdb.partitions[0].num_blocks, 48);
        assert_eq!(rdb.partitions[1].first_block, 64);
        assert_eq!(rdb.partitions[1].num_blocks, 64);
    }

    #[test]
    fn test_partition_past_end_is_skipped() {
        let mut bytes = vec![0u8; 8 * 16 * 512];
        write_rigid_disk(&mut bytes, 8, 1, 16, &[("DH0", 1, 3), ("DH1", 4, 12)]);
        let store = BlockStore::from_bytes("x.hdf", 512, bytes).unwrap();

        let rdb = read_rigid_disk(&store).unwrap().unwrap();
        assert_eq!(rdb.partitions.len(), 1);
    }

    #[test]
    fn test_oversized_geometry_is_skipped() {
        let mut bytes = vec![0u8; 8 * 16 * 512];
        write_rigid_disk(&mut bytes, 8, 0xFFFF_FFFF, 0xFFFF_FFFF, &[("DH0", 2, 3)]);
        let store = BlockStore::from_bytes("x.hdf", 512, bytes).unwrap();

        let rdb = read_rigid_disk(&store).unwrap().unwrap();
        assert!(rdb.partitions.is_empty());
    }

    #[test]
    fn test_huge_cylinder_range_is_skipped() {
        let mut bytes = vec![0u8; 8 * 16 * 512];
        write_rigid_disk(&mut bytes, 8, 1, 16, &[("DH0", 1, 0xFFFF_FFFF)]);
        let store = BlockStore::from_bytes("x.hdf", 512, bytes).unwrap();

        let rdb = read_rigid_disk(&store).unwrap().unwrap();
        assert!(rdb.partitions.is_empty());
    }
}
