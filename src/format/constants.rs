/// On-disk magic values, offsets and sizes

/// Standard block size of Amiga, PC and Atari media
pub const BLOCK_SIZE_512: usize = 512;

/// Block size of Commodore 1541 media
pub const BLOCK_SIZE_256: usize = 256;

/// Sectors per track of a double density Amiga floppy
pub const ADF_DD_SECTORS: u32 = 11;

/// Sectors per track of a high density Amiga floppy
pub const ADF_HD_SECTORS: u32 = 22;

/// Highest cylinder count accepted for an Amiga floppy
pub const ADF_MAX_CYLINDERS: u32 = 84;

/// Commodore 1541 blocks on a 35 track disk
pub const D64_BLOCKS_35: u64 = 683;

/// Commodore 1541 blocks on a 40 track disk
pub const D64_BLOCKS_40: u64 = 768;

/// Directory track of a 1541 disk (1-based)
pub const D64_DIRECTORY_TRACK: u32 = 18;

/// Offset of the disk name in the 1541 BAM sector
pub const D64_DISK_NAME: usize = 0x90;

/// Sectors per track of a 1541 disk by zone
#[inline]
pub fn d64_sectors(track: u32) -> u32 {
    match track {
        1..=17 => 21,
        18..=24 => 19,
        25..=30 => 18,
        _ => 17,
    }
}

/// Common PC and Atari floppy sizes: (bytes, cylinders, heads, sectors)
pub const PC_FLOPPY_SIZES: [(u64, u32, u32, u32); 8] = [
    (163_840, 40, 1, 8),
    (184_320, 40, 1, 9),
    (327_680, 40, 2, 8),
    (368_640, 40, 2, 9),
    (737_280, 80, 2, 9),
    (1_228_800, 80, 2, 15),
    (1_474_560, 80, 2, 18),
    (2_949_120, 80, 2, 36),
];

/// Common Atari ST floppy sizes: (bytes, cylinders, heads, sectors)
pub const ST_FLOPPY_SIZES: [(u64, u32, u32, u32); 6] = [
    (368_640, 80, 1, 9),
    (409_600, 80, 1, 10),
    (737_280, 80, 2, 9),
    (819_200, 80, 2, 10),
    (901_120, 80, 2, 11),
    (1_474_560, 80, 2, 18),
];

/// BIOS parameter block: bytes per sector (u16 LE)
pub const BPB_BYTES_PER_SECTOR: usize = 11;
/// BIOS parameter block: total sectors (u16 LE)
pub const BPB_TOTAL_SECTORS: usize = 19;
/// BIOS parameter block: sectors per track (u16 LE)
pub const BPB_SECTORS_PER_TRACK: usize = 24;
/// BIOS parameter block: number of heads (u16 LE)
pub const BPB_HEADS: usize = 26;
/// BIOS parameter block: volume label of a FAT12/16 extended BPB
pub const BPB_VOLUME_LABEL: usize = 43;

/// Blocks searched for a Rigid Disk Block
pub const RDB_SEARCH_LIMIT: u64 = 16;
/// Rigid Disk Block identifier
pub const RDB_ID: &[u8] = b"RDSK";
/// Partition block identifier
pub const PART_ID: &[u8] = b"PART";
/// End-of-list marker in RDB block chains
pub const RDB_END: u32 = 0xFFFF_FFFF;
/// RDB: first partition block
pub const RDB_PART_LIST: usize = 28;
/// RDB: cylinder count
pub const RDB_CYLINDERS: usize = 64;
/// RDB: sectors per track
pub const RDB_SECTORS: usize = 68;
/// RDB: head count
pub const RDB_HEADS: usize = 72;
/// Partition block: next partition
pub const PART_NEXT: usize = 16;
/// Partition block: drive name (BCPL string)
pub const PART_NAME: usize = 36;
/// Partition block: start of the DOS environment vector
pub const PART_ENVIRONMENT: usize = 128;

/// Environment vector longword: block size in longwords
pub const DE_SIZE_BLOCK: usize = 1;
/// Environment vector longword: surfaces
pub const DE_SURFACES: usize = 3;
/// Environment vector longword: blocks per track
pub const DE_BLOCKS_PER_TRACK: usize = 5;
/// Environment vector longword: reserved blocks at partition start
pub const DE_RESERVED: usize = 6;
/// Environment vector longword: first cylinder
pub const DE_LOW_CYL: usize = 9;
/// Environment vector longword: last cylinder
pub const DE_HIGH_CYL: usize = 10;
/// Environment vector longword: DOS type
pub const DE_DOS_TYPE: usize = 16;

/// Amiga boot block signature
pub const AMIGA_DOS_ID: &[u8] = b"DOS";

/// Amiga block types (first longword)
pub const T_HEADER: u32 = 2;
/// Amiga OFS data block type
pub const T_DATA: u32 = 8;
/// Amiga file extension block type
pub const T_LIST: u32 = 16;

/// Amiga secondary types (last longword)
pub const ST_ROOT: i32 = 1;
/// Amiga user directory secondary type
pub const ST_USERDIR: i32 = 2;
/// Amiga soft link secondary type
pub const ST_SOFTLINK: i32 = 3;
/// Amiga hard link to directory secondary type
pub const ST_LINKDIR: i32 = 4;
/// Amiga file secondary type
pub const ST_FILE: i32 = -3;
/// Amiga hard link to file secondary type
pub const ST_LINKFILE: i32 = -4;

/// Seconds between the Unix epoch and the Amiga epoch (1978-01-01)
pub const AMIGA_EPOCH_OFFSET: i64 = 252_460_800;

/// Maximum length of an Amiga file or volume name
pub const AMIGA_NAME_MAX: usize = 30;

/// Bitmap block pointers stored in the root block
pub const AMIGA_BM_PAGES: usize = 25;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_d64_zones_total() {
        let blocks: u32 = (1..=35).map(d64_sectors).sum();
        assert_eq!(blocks as u64, D64_BLOCKS_35);
        let blocks: u32 = (1..=40).map(d64_sectors).sum();
        assert_eq!(blocks as u64, D64_BLOCKS_40);
    }

    #[test]
    fn test_floppy_sizes_consistent() {
        for (bytes, c, h, s) in PC_FLOPPY_SIZES.iter().chain(ST_FLOPPY_SIZES.iter()) {
            assert_eq!(*bytes, (*c * *h * *s) as u64 * 512);
        }
    }
}
