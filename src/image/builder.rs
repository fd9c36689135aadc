/// Builder for creating blank and pre-populated disk images

use crate::error::{ImageError, Result};
use crate::filesystem::amiga::{
    self, be32, block_checksum, boot_checksum, hash_name, posix_to_amiga, put_be32, tail, DosType,
};
use crate::format::constants::*;
use crate::format::ImageFormat;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
enum Entry {
    Directory(String),
    File(String, Vec<u8>),
}

/// Builder for constructing image files in memory
///
/// ```
/// use retromount::{ImageBuilder, ImageFormat};
///
/// let bytes = ImageBuilder::new(ImageFormat::Adf)
///     .cylinders(40)
///     .volume_name("Empty")
///     .build()?;
/// assert_eq!(bytes.len(), 880 * 512);
/// # Ok::<(), retromount::ImageError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    format: ImageFormat,
    cylinders: Option<u32>,
    high_density: bool,
    dos: Option<DosType>,
    name: String,
    timestamp: i64,
    entries: Vec<Entry>,
    partitions: Vec<(String, u32)>,
}

impl ImageBuilder {
    /// Create a builder with the defaults of a format
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            cylinders: None,
            high_density: false,
            dos: Some(DosType::OFS),
            name: "Empty".to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            entries: Vec::new(),
            partitions: Vec::new(),
        }
    }

    /// Set the number of cylinders
    pub fn cylinders(mut self, cylinders: u32) -> Self {
        self.cylinders = Some(cylinders);
        self
    }

    /// Use high density tracks (Amiga HD, PC 1.44M)
    pub fn high_density(mut self, high_density: bool) -> Self {
        self.high_density = high_density;
        self
    }

    /// Set the Amiga DOS type
    pub fn dos(mut self, dos: DosType) -> Self {
        self.dos = Some(dos);
        self
    }

    /// Leave the image unformatted
    pub fn blank(mut self) -> Self {
        self.dos = None;
        self
    }

    /// Set the volume name
    pub fn volume_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the creation time stamp (POSIX seconds)
    pub fn timestamp(mut self, secs: i64) -> Self {
        self.timestamp = secs;
        self
    }

    /// Add a directory (`"s"` or `"devs/keymaps"`)
    pub fn directory(mut self, path: &str) -> Self {
        self.entries.push(Entry::Directory(path.to_string()));
        self
    }

    /// Add a file (`"readme"` or `"s/startup-sequence"`)
    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.entries.push(Entry::File(path.to_string(), data.to_vec()));
        self
    }

    /// Add a hard disk partition of the given number of cylinders
    pub fn partition(mut self, name: &str, cylinders: u32) -> Self {
        self.partitions.push((name.to_string(), cylinders));
        self
    }

    /// Build the image bytes
    pub fn build(self) -> Result<Vec<u8>> {
        match self.format {
            ImageFormat::Adf => self.build_adf(),
            ImageFormat::Hdf => self.build_hdf(),
            ImageFormat::Img | ImageFormat::St => Ok(self.build_pc()),
            ImageFormat::D64 => Ok(self.build_d64()),
        }
    }

    /// Build the image and write it to a file
    pub fn write_to<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let bytes = self.build()?;
        fs::write(path, bytes)?;
        Ok(())
    }

    fn build_adf(&self) -> Result<Vec<u8>> {
        let sectors = if self.high_density { ADF_HD_SECTORS } else { ADF_DD_SECTORS };
        let blocks = self.cylinders.unwrap_or(80) as usize * 2 * sectors as usize;
        let mut bytes = vec![0u8; blocks * BLOCK_SIZE_512];
        self.format_amiga(&mut bytes)?;
        Ok(bytes)
    }

    fn build_hdf(&self) -> Result<Vec<u8>> {
        const SECTORS: u32 = 32;
        let per_cylinder = SECTORS as usize * BLOCK_SIZE_512;

        if self.partitions.is_empty() {
            let mut bytes = vec![0u8; self.cylinders.unwrap_or(64) as usize * per_cylinder];
            self.format_amiga(&mut bytes)?;
            return Ok(bytes);
        }

        // Cylinder 0 holds the RDB and partition blocks
        let used: u32 = 1 + self.partitions.iter().map(|(_, c)| c).sum::<u32>();
        let cylinders = self.cylinders.unwrap_or(used).max(used);
        let mut bytes = vec![0u8; cylinders as usize * per_cylinder];

        let mut layout = Vec::new();
        let mut low = 1;
        for (name, count) in &self.partitions {
            layout.push((name.as_str(), low, low + count - 1));
            low += count;
        }
        write_rigid_disk(&mut bytes, cylinders, 1, SECTORS, &layout);

        for &(_, low, high) in &layout {
            let start = low as usize * per_cylinder;
            let end = (high as usize + 1) * per_cylinder;
            self.format_amiga(&mut bytes[start..end])?;
        }
        Ok(bytes)
    }

    fn format_amiga(&self, bytes: &mut [u8]) -> Result<()> {
        let Some(dos) = self.dos else {
            return Ok(());
        };

        let mut writer = AmigaWriter::format(bytes, dos, &self.name, self.timestamp)?;
        let mut dirs: HashMap<String, u64> = HashMap::new();
        for entry in &self.entries {
            let (path, data) = match entry {
                Entry::Directory(path) => (path, None),
                Entry::File(path, data) => (path, Some(data)),
            };
            let (parent_path, name) = match path.rsplit_once('/') {
                Some((parent, name)) => (Some(parent), name),
                None => (None, path.as_str()),
            };
            let parent = match parent_path {
                Some(p) => *dirs
                    .get(p)
                    .ok_or_else(|| ImageError::unsupported(format!("directory {} not added", p)))?,
                None => writer.root,
            };

            match data {
                None => {
                    let block = writer.add_directory(parent, name)?;
                    dirs.insert(path.clone(), block);
                }
                Some(data) => {
                    writer.add_file(parent, name, data)?;
                }
            }
        }
        writer.finish();
        Ok(())
    }

    fn build_pc(&self) -> Vec<u8> {
        let (heads, sectors) = if self.high_density { (2, 18) } else { (2, 9) };
        let cylinders = self.cylinders.unwrap_or(80);
        let total = cylinders * heads * sectors;
        let mut bytes = vec![0u8; total as usize * BLOCK_SIZE_512];

        let put16 = |bytes: &mut [u8], offset: usize, value: u32| {
            bytes[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
        };
        bytes[0] = 0xEB;
        bytes[1] = 0x3C;
        bytes[2] = 0x90;
        put16(&mut bytes, BPB_BYTES_PER_SECTOR, BLOCK_SIZE_512 as u32);
        bytes[13] = 2;
        put16(&mut bytes, 14, 1);
        bytes[16] = 2;
        put16(&mut bytes, 17, 112);
        put16(&mut bytes, BPB_TOTAL_SECTORS, total);
        bytes[21] = 0xF9;
        put16(&mut bytes, 22, 3);
        put16(&mut bytes, BPB_SECTORS_PER_TRACK, sectors);
        put16(&mut bytes, BPB_HEADS, heads);

        if self.format == ImageFormat::Img {
            let label = format!("{:<11}", self.name.to_ascii_uppercase());
            bytes[38] = 0x29;
            bytes[BPB_VOLUME_LABEL..BPB_VOLUME_LABEL + 11].copy_from_slice(&label.as_bytes()[..11]);
            bytes[510] = 0x55;
            bytes[511] = 0xAA;
        }
        bytes
    }

    fn build_d64(&self) -> Vec<u8> {
        let tracks = self.cylinders.unwrap_or(35).clamp(35, 40);
        let blocks: u32 = (1..=tracks).map(d64_sectors).sum();
        let mut bytes = vec![0u8; blocks as usize * BLOCK_SIZE_256];

        let bam = (1..D64_DIRECTORY_TRACK).map(d64_sectors).sum::<u32>() as usize * BLOCK_SIZE_256;
        bytes[bam] = D64_DIRECTORY_TRACK as u8;
        bytes[bam + 1] = 1;
        bytes[bam + 2] = b'A';
        let name = bam + D64_DISK_NAME;
        bytes[name..name + 27].fill(0xA0);
        for (i, c) in self.name.bytes().take(16).enumerate() {
            bytes[name + i] = c.to_ascii_uppercase();
        }
        bytes
    }
}

/// Write a Rigid Disk Block at block 0 and partition blocks after it
///
/// Partitions are `(name, low cylinder, high cylinder)`.
pub(crate) fn write_rigid_disk(
    bytes: &mut [u8],
    cylinders: u32,
    heads: u32,
    sectors: u32,
    partitions: &[(&str, u32, u32)],
) {
    let bs = BLOCK_SIZE_512;
    let seal = |block: &mut [u8]| {
        put_be32(block, 8, 0);
        let sum = block_checksum(&block[..64 * 4], 8);
        put_be32(block, 8, sum);
    };

    {
        let rdb = &mut bytes[..bs];
        rdb[0..4].copy_from_slice(RDB_ID);
        put_be32(rdb, 4, 64);
        put_be32(rdb, 12, 7);
        put_be32(rdb, 16, bs as u32);
        put_be32(rdb, 24, RDB_END);
        put_be32(rdb, RDB_PART_LIST, if partitions.is_empty() { RDB_END } else { 1 });
        put_be32(rdb, 32, RDB_END);
        put_be32(rdb, 36, RDB_END);
        put_be32(rdb, RDB_CYLINDERS, cylinders);
        put_be32(rdb, RDB_SECTORS, sectors);
        put_be32(rdb, RDB_HEADS, heads);
        seal(rdb);
    }

    for (i, (name, low, high)) in partitions.iter().enumerate() {
        let block = &mut bytes[(i + 1) * bs..(i + 2) * bs];
        block[0..4].copy_from_slice(PART_ID);
        put_be32(block, 4, 64);
        put_be32(block, 12, 7);
        let next = if i + 1 < partitions.len() { i as u32 + 2 } else { RDB_END };
        put_be32(block, PART_NEXT, next);

        let name = &name.as_bytes()[..name.len().min(31)];
        block[PART_NAME] = name.len() as u8;
        block[PART_NAME + 1..PART_NAME + 1 + name.len()].copy_from_slice(name);

        let env = |index: usize| PART_ENVIRONMENT + index * 4;
        put_be32(block, env(0), 16);
        put_be32(block, env(DE_SIZE_BLOCK), (bs / 4) as u32);
        put_be32(block, env(DE_SURFACES), heads);
        put_be32(block, env(4), 1);
        put_be32(block, env(DE_BLOCKS_PER_TRACK), sectors);
        put_be32(block, env(DE_RESERVED), 2);
        put_be32(block, env(DE_LOW_CYL), *low);
        put_be32(block, env(DE_HIGH_CYL), *high);
        put_be32(block, env(DE_DOS_TYPE), u32::from_be_bytes(*b"DOS\0"));
        seal(block);
    }
}

/// Lays out an empty OFS/FFS volume and adds entries to it
struct AmigaWriter<'a> {
    bytes: &'a mut [u8],
    blocks: u64,
    root: u64,
    dos: DosType,
    stamp: (u32, u32, u32),
    pages: Vec<u64>,
    allocated: Vec<bool>,
    /// Blocks whose header checksum must be refreshed at the end
    headers: Vec<u64>,
}

impl<'a> AmigaWriter<'a> {
    const BS: usize = BLOCK_SIZE_512;

    fn format(bytes: &'a mut [u8], dos: DosType, name: &str, timestamp: i64) -> Result<Self> {
        let blocks = (bytes.len() / Self::BS) as u64;
        if blocks < 8 {
            return Err(ImageError::unsupported("volume too small to format"));
        }

        let root = amiga::root_block(blocks);
        let bits = amiga::bits_per_page(Self::BS);
        let page_count = (blocks - 2).div_ceil(bits);
        if page_count as usize > AMIGA_BM_PAGES {
            return Err(ImageError::unsupported("volume needs bitmap extension blocks"));
        }

        let mut writer = Self {
            bytes,
            blocks,
            root,
            dos,
            stamp: posix_to_amiga(timestamp),
            pages: (0..page_count).map(|i| root + 1 + i).collect(),
            allocated: vec![false; blocks as usize],
            headers: vec![root],
        };
        writer.allocated[0] = true;
        writer.allocated[1] = true;
        writer.allocated[root as usize] = true;
        for page in writer.pages.clone() {
            writer.allocated[page as usize] = true;
        }

        let boot = writer.block_mut(0);
        boot[0..3].copy_from_slice(AMIGA_DOS_ID);
        boot[3] = dos.flags();
        put_be32(boot, 8, root as u32);

        let (stamp, pages) = (writer.stamp, writer.pages.clone());
        let block = writer.block_mut(root);
        put_be32(block, 0, T_HEADER);
        put_be32(block, amiga::HT_SIZE, amiga::table_size(Self::BS) as u32);
        put_be32(block, Self::BS - tail::BM_FLAG, 0xFFFF_FFFF);
        for (i, page) in pages.iter().enumerate() {
            put_be32(block, Self::BS - tail::BM_PAGES + i * 4, *page as u32);
        }
        for offset in [tail::DATE, tail::DISK_DATE, tail::CREATED] {
            write_stamp(block, Self::BS - offset, stamp);
        }
        write_name(block, name);
        put_be32(block, Self::BS - tail::SEC_TYPE, ST_ROOT as u32);

        Ok(writer)
    }

    fn block_mut(&mut self, block: u64) -> &mut [u8] {
        let start = block as usize * Self::BS;
        &mut self.bytes[start..start + Self::BS]
    }

    fn allocate(&mut self) -> Result<u64> {
        let upper = self.root + 1..self.blocks;
        let lower = 2..self.root;
        let block = upper
            .chain(lower)
            .find(|&b| !self.allocated[b as usize])
            .ok_or_else(|| ImageError::unsupported("volume is full"))?;
        self.allocated[block as usize] = true;
        Ok(block)
    }

    fn new_header(&mut self, parent: u64, name: &str, sec_type: i32) -> Result<u64> {
        let block = self.allocate()?;
        let stamp = self.stamp;
        let data = self.block_mut(block);
        put_be32(data, 0, T_HEADER);
        put_be32(data, amiga::HEADER_KEY, block as u32);
        write_stamp(data, Self::BS - tail::DATE, stamp);
        write_name(data, name);
        put_be32(data, Self::BS - tail::PARENT, parent as u32);
        put_be32(data, Self::BS - tail::SEC_TYPE, sec_type as u32);
        self.headers.push(block);
        self.link(parent, block, name);
        Ok(block)
    }

    fn link(&mut self, parent: u64, child: u64, name: &str) {
        let slot = hash_name(name.as_bytes(), amiga::table_size(Self::BS), self.dos.is_intl());
        let offset = amiga::TABLE + slot * 4;
        let mut current = be32(self.block_mut(parent), offset) as u64;
        if current == 0 {
            put_be32(self.block_mut(parent), offset, child as u32);
            return;
        }
        loop {
            let next = be32(self.block_mut(current), Self::BS - tail::HASH_CHAIN) as u64;
            if next == 0 {
                put_be32(self.block_mut(current), Self::BS - tail::HASH_CHAIN, child as u32);
                return;
            }
            current = next;
        }
    }

    fn add_directory(&mut self, parent: u64, name: &str) -> Result<u64> {
        self.new_header(parent, name, ST_USERDIR)
    }

    fn add_file(&mut self, parent: u64, name: &str, data: &[u8]) -> Result<u64> {
        let header = self.new_header(parent, name, ST_FILE)?;
        let payload = if self.dos.is_ffs() { Self::BS } else { Self::BS - amiga::DATA_START };
        let chunks: Vec<&[u8]> = data.chunks(payload).collect();
        let mut data_blocks = Vec::with_capacity(chunks.len());
        for _ in 0..chunks.len() {
            data_blocks.push(self.allocate()?);
        }

        let entries = amiga::table_size(Self::BS);
        let mut tables: Vec<&[u64]> = data_blocks.chunks(entries).collect();
        if tables.is_empty() {
            tables.push(&[]);
        }

        // The header holds the first table, extension blocks the rest
        let mut owners = vec![header];
        for _ in 1..tables.len() {
            let ext = self.allocate()?;
            self.headers.push(ext);
            owners.push(ext);
        }

        for (i, table) in tables.iter().enumerate() {
            let owner = owners[i];
            let next = owners.get(i + 1).copied().unwrap_or(0);
            let block = self.block_mut(owner);
            if i > 0 {
                put_be32(block, 0, T_LIST);
                put_be32(block, amiga::HEADER_KEY, owner as u32);
                put_be32(block, Self::BS - tail::PARENT, header as u32);
                put_be32(block, Self::BS - tail::SEC_TYPE, ST_FILE as u32);
            }
            put_be32(block, amiga::HIGH_SEQ, table.len() as u32);
            for (j, ptr) in table.iter().enumerate() {
                put_be32(block, amiga::TABLE + (entries - 1 - j) * 4, *ptr as u32);
            }
            put_be32(block, Self::BS - tail::EXTENSION, next as u32);
        }

        let first = data_blocks.first().copied().unwrap_or(0);
        let head = self.block_mut(header);
        put_be32(head, amiga::FIRST_DATA, first as u32);
        put_be32(head, Self::BS - tail::BYTE_SIZE, data.len() as u32);

        for (i, chunk) in chunks.iter().enumerate() {
            let block = data_blocks[i];
            let next = data_blocks.get(i + 1).copied().unwrap_or(0);
            let ffs = self.dos.is_ffs();
            let out = self.block_mut(block);
            if ffs {
                out[..chunk.len()].copy_from_slice(chunk);
            } else {
                put_be32(out, 0, T_DATA);
                put_be32(out, amiga::HEADER_KEY, header as u32);
                put_be32(out, amiga::DATA_SEQ, i as u32 + 1);
                put_be32(out, amiga::DATA_SIZE, chunk.len() as u32);
                put_be32(out, amiga::DATA_NEXT, next as u32);
                out[amiga::DATA_START..amiga::DATA_START + chunk.len()].copy_from_slice(chunk);
                self.headers.push(block);
            }
        }
        Ok(header)
    }

    fn finish(mut self) {
        let bits = amiga::bits_per_page(Self::BS);
        for (index, page) in self.pages.clone().into_iter().enumerate() {
            let first = 2 + index as u64 * bits;
            let mut data = vec![0u8; Self::BS];
            for bit in 0..bits.min(self.blocks - first) {
                if !self.allocated[(first + bit) as usize] {
                    let offset = 4 + (bit / 32) as usize * 4;
                    let word = be32(&data, offset) | 1 << (bit % 32);
                    put_be32(&mut data, offset, word);
                }
            }
            let sum = block_checksum(&data, 0);
            put_be32(&mut data, 0, sum);
            self.block_mut(page).copy_from_slice(&data);
        }

        for block in std::mem::take(&mut self.headers) {
            let data = self.block_mut(block);
            put_be32(data, amiga::CHECKSUM, 0);
            let sum = block_checksum(data, amiga::CHECKSUM);
            put_be32(data, amiga::CHECKSUM, sum);
        }

        let boot = &mut self.bytes[..2 * Self::BS];
        let sum = boot_checksum(boot);
        put_be32(boot, 4, sum);
    }
}

fn write_stamp(block: &mut [u8], offset: usize, (days, mins, ticks): (u32, u32, u32)) {
    put_be32(block, offset, days);
    put_be32(block, offset + 4, mins);
    put_be32(block, offset + 8, ticks);
}

fn write_name(block: &mut [u8], name: &str) {
    let offset = block.len() - tail::NAME;
    let bytes: Vec<u8> = name.chars().map(|c| c as u32 as u8).take(AMIGA_NAME_MAX).collect();
    block[offset] = bytes.len() as u8;
    block[offset + 1..offset + 1 + bytes.len()].copy_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::amiga::sum_longs;

    #[test]
    fn test_adf_sizes() {
        assert_eq!(ImageBuilder::new(ImageFormat::Adf).build().unwrap().len(), 901_120);
        assert_eq!(
            ImageBuilder::new(ImageFormat::Adf).high_density(true).build().unwrap().len(),
            1_802_240
        );
        assert_eq!(
            ImageBuilder::new(ImageFormat::Adf).cylinders(40).build().unwrap().len(),
            880 * 512
        );
    }

    #[test]
    fn test_formatted_adf_structures() {
        let bytes = ImageBuilder::new(ImageFormat::Adf).volume_name("Work").build().unwrap();
        assert_eq!(&bytes[0..4], b"DOS\0");
        assert_eq!(boot_checksum(&bytes[..1024]), be32(&bytes, 4));

        let root = &bytes[880 * 512..881 * 512];
        assert_eq!(be32(root, 0), T_HEADER);
        assert_eq!(be32(root, 508) as i32, ST_ROOT);
        assert_eq!(sum_longs(root), 0);
        assert_eq!(root[512 - tail::NAME], 4);
        assert_eq!(be32(root, 512 - tail::BM_PAGES), 881);

        let bitmap = &bytes[881 * 512..882 * 512];
        assert_eq!(sum_longs(bitmap), 0);
        // Block 2 is free: bit 0 of the first map longword
        assert_eq!(be32(bitmap, 4) & 1, 1);
        // Root (block 880) is allocated: bit 878
        assert_eq!(be32(bitmap, 4 + (878 / 32) * 4) & (1 << (878 % 32)), 0);
    }

    #[test]
    fn test_blank_adf() {
        let bytes = ImageBuilder::new(ImageFormat::Adf).blank().build().unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_file_spanning_extension_block() {
        let data = vec![0x5A; 100 * 488];
        let bytes = ImageBuilder::new(ImageFormat::Adf)
            .directory("s")
            .file("s/big", &data)
            .build()
            .unwrap();

        let dir = 882;
        let header = 883;
        assert_eq!(be32(&bytes[dir * 512..], 508) as i32, ST_USERDIR);
        let head = &bytes[header * 512..(header + 1) * 512];
        assert_eq!(be32(head, 508) as i32, ST_FILE);
        assert_eq!(be32(head, amiga::HIGH_SEQ), 72);
        assert_eq!(be32(head, 512 - tail::PARENT) as usize, dir);
        assert_eq!(be32(head, 512 - tail::BYTE_SIZE) as usize, data.len());
        let ext = be32(head, 512 - tail::EXTENSION) as usize;
        assert_ne!(ext, 0);
        assert_eq!(be32(&bytes[ext * 512..], 0), T_LIST);
        assert_eq!(be32(&bytes[ext * 512..], amiga::HIGH_SEQ), 28);
    }

    #[test]
    fn test_missing_parent_directory() {
        let result = ImageBuilder::new(ImageFormat::Adf).file("c/dir", b"x").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_hdf_with_partitions() {
        let bytes = ImageBuilder::new(ImageFormat::Hdf)
            .partition("DH0", 10)
            .partition("DH1", 5)
            .build()
            .unwrap();
        assert_eq!(bytes.len(), 16 * 32 * 512);
        assert_eq!(&bytes[0..4], RDB_ID);
        assert_eq!(&bytes[512..516], PART_ID);
        // DH0 starts at cylinder 1
        assert_eq!(&bytes[32 * 512..32 * 512 + 3], b"DOS");
        assert_eq!(&bytes[11 * 32 * 512..11 * 32 * 512 + 3], b"DOS");
    }

    #[test]
    fn test_pc_and_d64() {
        let img = ImageBuilder::new(ImageFormat::Img).volume_name("dosdisk").build().unwrap();
        assert_eq!(img.len(), 737_280);
        assert_eq!(&img[510..512], &[0x55, 0xAA]);
        assert_eq!(&img[BPB_VOLUME_LABEL..BPB_VOLUME_LABEL + 7], b"DOSDISK");

        let d64 = ImageBuilder::new(ImageFormat::D64).volume_name("game").build().unwrap();
        assert_eq!(d64.len(), 683 * 256);
        assert_eq!(&d64[357 * 256 + D64_DISK_NAME..357 * 256 + D64_DISK_NAME + 4], b"GAME");
    }
}
