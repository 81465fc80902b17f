//! On-store layout parameters and block address arithmetic.
//!
//! After a reserved prefix, the store repeats one fixed pattern: a bitmap
//! region of `bitmap_blocks` blocks followed by a run region with one block
//! per bitmap bit. Every offset the allocator touches derives from the three
//! constants below, so the layout needs no magic numbers, checksums, or
//! pointers inside the store itself.

use serde::{Deserialize, Serialize};

/// Layout constants and durability switches for one store.
///
/// Two stores with the same constants always agree on where every bitmap
/// region lives, which is what makes reopening after a crash possible
/// without a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatConfig {
    /// log2 of the block size in bytes.
    pub block_size_log: u8,

    /// Size of each chunk's bitmap region, in blocks.
    pub bitmap_blocks: u8,

    /// Reserved blocks at the head of the store, not managed here.
    pub prefix_blocks: u8,

    /// Never memory-map bitmap regions, even when a mapper is available.
    pub no_mmap: bool,

    /// Skip msync when flushing memory-mapped bitmaps.
    pub no_msync: bool,

    /// Skip fsync when flushing read/write bitmaps.
    pub no_fsync: bool,
}

impl FormatConfig {
    /// Create a config with a block size of `1 << block_size_log` bytes,
    /// a one-block bitmap region and a one-block prefix.
    pub fn new(block_size_log: u8) -> Self {
        FormatConfig {
            block_size_log,
            bitmap_blocks: 1,
            prefix_blocks: 1,
            no_mmap: false,
            no_msync: false,
            no_fsync: false,
        }
    }

    /// Set the bitmap region size in blocks.
    #[must_use]
    pub fn with_bitmap_blocks(mut self, blocks: u8) -> Self {
        self.bitmap_blocks = blocks;
        self
    }

    /// Set the reserved prefix size in blocks.
    #[must_use]
    pub fn with_prefix_blocks(mut self, blocks: u8) -> Self {
        self.prefix_blocks = blocks;
        self
    }

    /// Disable memory-mapping of bitmap regions.
    #[must_use]
    pub fn without_mmap(mut self) -> Self {
        self.no_mmap = true;
        self
    }

    /// Skip msync on mapped-bitmap flush paths.
    #[must_use]
    pub fn without_msync(mut self) -> Self {
        self.no_msync = true;
        self
    }

    /// Skip fsync on read/write flush paths.
    #[must_use]
    pub fn without_fsync(mut self) -> Self {
        self.no_fsync = true;
        self
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        1usize << self.block_size_log
    }

    /// Bytes occupied by one chunk's bitmap region.
    pub fn bitmap_bytes(&self) -> usize {
        (self.bitmap_blocks as usize) << self.block_size_log
    }

    /// Blocks in one chunk's run region: one per bitmap bit.
    pub fn run_blocks(&self) -> i64 {
        (self.bitmap_blocks as i64) << (self.block_size_log as u32 + 3)
    }

    /// Total blocks in one chunk: bitmap region plus run region.
    pub fn chunk_blocks(&self) -> i64 {
        self.run_blocks() + self.bitmap_blocks as i64
    }

    /// Split a block address into its chunk index and run-region slot.
    ///
    /// Returns `None` for addresses in the prefix or inside a bitmap
    /// region; those are never valid allocation targets.
    pub fn split(&self, blk: i64) -> Option<(i64, i64)> {
        let x = blk - self.prefix_blocks as i64;
        if x < 0 {
            return None;
        }
        let chunk_size = self.chunk_blocks();
        let chunk = x / chunk_size;
        let pos = (x % chunk_size) - self.bitmap_blocks as i64;
        if pos < 0 {
            return None;
        }
        Some((chunk, pos))
    }

    /// Inverse of [`split`](Self::split). A negative `pos` names blocks of
    /// the chunk's bitmap region: `pos = -bitmap_blocks` is its first block,
    /// which is how growth places a freshly appended bitmap.
    pub fn join(&self, chunk: i64, pos: i64) -> i64 {
        self.prefix_blocks as i64 + chunk * self.chunk_blocks() + self.bitmap_blocks as i64 + pos
    }

    /// Absolute byte offset of a block address.
    pub(crate) fn block_offset(&self, blk: i64) -> u64 {
        (blk as u64) << self.block_size_log
    }
}
