/// Block usage, allocation and health maps

use crate::error::{ImageError, Result};
use crate::filesystem::{BlockKind, FileSystemCodec};
use crate::image::BlockSource;
use crate::scan::ScanResult;
use std::fmt::Write;
use std::ops::Range;

/// ANSI color codes for block maps
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_WHITE: &str = "\x1b[97m";
    pub const DARK_WHITE: &str = "\x1b[37m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const DARK_GREEN: &str = "\x1b[2;32m";
    pub const BRIGHT_CYAN: &str = "\x1b[96m";
    pub const DARK_CYAN: &str = "\x1b[2;36m";
    pub const BRIGHT_MAGENTA: &str = "\x1b[95m";
}

const BLOCK_NO_DATA: &str = "\u{2591}"; // ░
const BLOCK_HAS_DATA: &str = "\u{2593}"; // ▓

/// State of a bucket in the allocation map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    /// First block is free
    Free,
    /// First block is allocated and no block in the bucket conflicts
    Allocated,
    /// Some block in the bucket disagrees with the directory tree
    Conflict,
}

/// State of a bucket in the health map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// No corrupted block in the bucket
    Ok,
    /// At least one corrupted block in the bucket
    Corrupted,
}

/// Split `blocks` into `width` buckets
///
/// Buckets are `blocks / width` wide and the last one absorbs the remainder.
/// With fewer blocks than buckets every bucket holds a single block and
/// neighbouring buckets may repeat it.
pub fn buckets(blocks: u64, width: usize) -> Vec<Range<u64>> {
    if width == 0 || blocks == 0 {
        return vec![0..0; width];
    }
    let width64 = width as u64;
    let chunk = blocks / width64;

    (0..width64)
        .map(|i| {
            if chunk == 0 {
                let start = i * blocks / width64;
                start..start + 1
            } else if i == width64 - 1 {
                i * chunk..blocks
            } else {
                i * chunk..(i + 1) * chunk
            }
        })
        .collect()
}

/// Does a sorted block list hit the range?
fn any_in(sorted: &[u64], range: &Range<u64>) -> bool {
    let i = sorted.partition_point(|&b| b < range.start);
    i < sorted.len() && sorted[i] < range.end
}

/// Classify each bucket by its first block
pub fn usage_map(
    volume: &dyn BlockSource,
    codec: &dyn FileSystemCodec,
    width: usize,
) -> Result<Vec<BlockKind>> {
    let ranges = buckets(volume.num_blocks(), width);
    let firsts: Vec<u64> = ranges.iter().filter(|r| !r.is_empty()).map(|r| r.start).collect();
    let mut kinds = codec.classify_many(volume, &firsts)?.into_iter();

    Ok(ranges
        .iter()
        .map(|r| {
            if r.is_empty() {
                BlockKind::Unclassified
            } else {
                kinds.next().unwrap_or(BlockKind::Unclassified)
            }
        })
        .collect())
}

/// Allocation state per bucket, with conflicts taken from a scan result
pub fn allocation_map(
    volume: &dyn BlockSource,
    codec: &dyn FileSystemCodec,
    result: &ScanResult,
    width: usize,
) -> Result<Vec<AllocationState>> {
    let allocation = codec.allocation().ok_or_else(|| {
        ImageError::unsupported(format!("{} has no allocation bitmap", codec.name()))
    })?;
    let allocated = allocation.allocated(volume)?;

    Ok(buckets(volume.num_blocks(), width)
        .iter()
        .map(|r| {
            if any_in(&result.used_but_unallocated, r) || any_in(&result.unused_but_allocated, r) {
                AllocationState::Conflict
            } else if !r.is_empty() && allocated.contains(r.start) {
                AllocationState::Allocated
            } else {
                AllocationState::Free
            }
        })
        .collect())
}

/// Health state per bucket from a scan result
pub fn health_map(blocks: u64, result: &ScanResult, width: usize) -> Vec<HealthState> {
    buckets(blocks, width)
        .iter()
        .map(|r| {
            if any_in(&result.corrupted, r) {
                HealthState::Corrupted
            } else {
                HealthState::Ok
            }
        })
        .collect()
}

/// Kind of a single block
pub fn type_of(volume: &dyn BlockSource, codec: &dyn FileSystemCodec, block: u64) -> Result<BlockKind> {
    if block >= volume.num_blocks() {
        return Err(ImageError::BlockOutOfRange {
            block,
            max: volume.num_blocks().saturating_sub(1),
        });
    }
    codec.classify(volume, block)
}

/// Next block of a kind after `after`, wrapping around at the end
pub fn next_block_of_type(
    volume: &dyn BlockSource,
    codec: &dyn FileSystemCodec,
    kind: BlockKind,
    after: u64,
) -> Result<Option<u64>> {
    let blocks = volume.num_blocks();
    if blocks == 0 {
        return Ok(None);
    }
    let order: Vec<u64> = (1..=blocks).map(|i| (after.min(blocks - 1) + i) % blocks).collect();
    let kinds = codec.classify_many(volume, &order)?;
    Ok(order.into_iter().zip(kinds).find(|(_, k)| *k == kind).map(|(b, _)| b))
}

fn kind_style(kind: BlockKind) -> (&'static str, &'static str) {
    match kind {
        BlockKind::Unclassified => (colors::DARK_WHITE, BLOCK_NO_DATA),
        BlockKind::Boot => (colors::BRIGHT_YELLOW, BLOCK_HAS_DATA),
        BlockKind::Root => (colors::BRIGHT_RED, BLOCK_HAS_DATA),
        BlockKind::Bitmap => (colors::BRIGHT_GREEN, BLOCK_HAS_DATA),
        BlockKind::BitmapExt => (colors::DARK_GREEN, BLOCK_HAS_DATA),
        BlockKind::FileHeader => (colors::BRIGHT_CYAN, BLOCK_HAS_DATA),
        BlockKind::FileList => (colors::DARK_CYAN, BLOCK_HAS_DATA),
        BlockKind::UserDir => (colors::BRIGHT_MAGENTA, BLOCK_HAS_DATA),
        BlockKind::Data => (colors::BRIGHT_WHITE, BLOCK_HAS_DATA),
    }
}

fn strip<T: Copy>(samples: &[T], style: impl Fn(T) -> (&'static str, &'static str)) -> String {
    let mut out = String::new();
    for &sample in samples {
        let (color, block) = style(sample);
        let _ = write!(out, "{}{}{}", color, block, colors::RESET);
    }
    out
}

/// Render a usage map with its legend
pub fn render_usage(samples: &[BlockKind]) -> String {
    let mut legend = String::from("Legend:");
    for kind in [
        BlockKind::Boot,
        BlockKind::Root,
        BlockKind::Bitmap,
        BlockKind::BitmapExt,
        BlockKind::UserDir,
        BlockKind::FileHeader,
        BlockKind::FileList,
        BlockKind::Data,
    ] {
        let (color, _) = kind_style(kind);
        let _ = write!(legend, " {}{}{}", color, kind.name(), colors::RESET);
    }
    format!("{}\n{}", legend, strip(samples, kind_style))
}

/// Render an allocation map with its legend
pub fn render_allocation(samples: &[AllocationState]) -> String {
    let style = |state| match state {
        AllocationState::Free => (colors::DARK_WHITE, BLOCK_NO_DATA),
        AllocationState::Allocated => (colors::BRIGHT_GREEN, BLOCK_HAS_DATA),
        AllocationState::Conflict => (colors::BRIGHT_RED, BLOCK_HAS_DATA),
    };
    format!(
        "Legend: {}Free{} {}Allocated{} {}Conflict{}\n{}",
        colors::DARK_WHITE,
        colors::RESET,
        colors::BRIGHT_GREEN,
        colors::RESET,
        colors::BRIGHT_RED,
        colors::RESET,
        strip(samples, style)
    )
}

/// Render a health map with its legend
pub fn render_health(samples: &[HealthState]) -> String {
    let style = |state| match state {
        HealthState::Ok => (colors::BRIGHT_GREEN, BLOCK_HAS_DATA),
        HealthState::Corrupted => (colors::BRIGHT_RED, BLOCK_HAS_DATA),
    };
    format!(
        "Legend: {}Ok{} {}Corrupted{}\n{}",
        colors::BRIGHT_GREEN,
        colors::RESET,
        colors::BRIGHT_RED,
        colors::RESET,
        strip(samples, style)
    )
}
