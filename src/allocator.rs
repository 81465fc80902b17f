//! Chunked block allocator over a byte store.
//!
//! The store is divided, after a reserved prefix, into repeating chunks of
//! one bitmap region followed by one run region; each bitmap bit tracks one
//! run-region block. Every bitmap region lives at an offset derived purely
//! from [`FormatConfig`], so reopening a truncated or interrupted store
//! needs no journal: whatever bitmap regions can still be read define the
//! allocation view.
//!
//! An allocation mutates one chunk's cached bitmap and flushes that chunk
//! before the address is disclosed. A crash in between can therefore leak
//! blocks (bits set with no owner) but never hand the same block to two
//! owners.

use crate::bitmap;
use crate::config::FormatConfig;
use crate::error::{BlockMapError, Result};
use crate::mmap::{self, MemMapper};
use crate::store::Storage;
use memmap2::MmapMut;

/// Cached view of one chunk's bitmap region.
struct BitmapBuffer {
    backing: Backing,
    /// Absolute byte offset of the region in the store.
    raw_off: u64,
}

enum Backing {
    /// Window owned by the mmap adapter; writes land in the store.
    Mapped(MmapMut),
    /// Private copy, written back to the store on flush.
    Owned(Vec<u8>),
}

impl BitmapBuffer {
    fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mm) => mm,
            Backing::Owned(bytes) => bytes,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Mapped(mm) => mm,
            Backing::Owned(bytes) => bytes,
        }
    }
}

/// Occupancy counters reported by [`BlockMap::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMapStats {
    pub chunks: usize,
    pub total_blocks: i64,
    pub free_blocks: i64,
}

/// Persistent allocator of contiguous block runs inside one store.
///
/// Not safe for concurrent use; callers needing concurrency serialize
/// externally. Dropping the map unmaps all bitmap windows and closes the
/// store.
pub struct BlockMap<S: Storage> {
    // Declared before `store` and `mapper`: windows must unmap before the
    // handles they alias go away.
    chunks: Vec<BitmapBuffer>,
    mapper: Option<Box<dyn MemMapper>>,
    store: S,
    config: FormatConfig,
    bitmap_bytes: usize,
}

impl<S: Storage> BlockMap<S> {
    /// Open the allocator over `store`.
    ///
    /// Probes the store for existing chunks at the configured stride; a
    /// store with none gets a zero-filled chunk 0 written immediately, so
    /// a fresh file becomes a valid (empty) allocation map.
    pub fn new(store: S, config: FormatConfig) -> Result<Self> {
        assert!(config.bitmap_blocks > 0, "bitmap region must span at least one block");
        assert!(config.block_size_log <= 60, "block size out of range");

        let mapper = if config.no_mmap {
            None
        } else {
            mmap::mapper_for(&store)
        };
        let mut map = BlockMap {
            chunks: Vec::new(),
            mapper,
            store,
            config,
            bitmap_bytes: config.bitmap_bytes(),
        };

        // A chunk exists if any prefix of its bitmap region can be read;
        // bytes lost to truncation read back as free slots.
        let mut probe = vec![0u8; map.bitmap_bytes];
        let mut count = 0usize;
        loop {
            let off = map.bitmap_offset(count as i64);
            if map.store.read_at(&mut probe, off)? == 0 {
                break;
            }
            count += 1;
        }

        if count == 0 {
            probe.fill(0);
            map.store.write_at(&probe, map.bitmap_offset(0))?;
            count = 1;
        }

        for i in 0..count {
            let off = map.bitmap_offset(i as i64);
            let buffer = map.load_buffer(off)?;
            map.chunks.push(buffer);
        }
        tracing::debug!(chunks = count, "block map opened");
        Ok(map)
    }

    /// Allocate a run of `lng` contiguous blocks and return the address of
    /// its first block.
    ///
    /// Chunks are scanned in index order and the lowest fitting position
    /// wins. With `grow` set, a fully occupied store gains chunks until the
    /// request fits; otherwise [`BlockMapError::Exhausted`] is returned.
    /// The affected bitmap is flushed before the address is returned, so an
    /// error after the mark can leak the run but never double-assign it.
    pub fn allocate_blocks(&mut self, lng: i64, grow: bool) -> Result<i64> {
        assert!(lng >= 0, "negative run length");
        if lng > self.config.run_blocks() {
            return Err(BlockMapError::ExceedsChunk {
                requested: lng,
                max: self.config.run_blocks(),
            });
        }
        loop {
            match self.scan(lng)? {
                Some(blk) => return Ok(blk),
                None if grow => self.append_chunk()?,
                None => return Err(BlockMapError::Exhausted(lng)),
            }
        }
    }

    /// Free a run of `lng` blocks starting at `blk`.
    ///
    /// Addresses outside managed space (the prefix, bitmap regions, chunks
    /// this map has never seen) are ignored: freeing a stale address from
    /// before a crash must not fail. The run is clipped to its chunk; runs
    /// spanning chunks are freed per chunk by the caller.
    pub fn free_blocks(&mut self, blk: i64, lng: i64) -> Result<()> {
        assert!(lng >= 0, "negative run length");
        let (chunk, pos) = match self.config.split(blk) {
            Some(split) => split,
            None => return Ok(()),
        };
        let i = chunk as usize;
        if i >= self.chunks.len() {
            return Ok(());
        }
        bitmap::free(self.chunks[i].bytes_mut(), pos as usize, lng as usize);
        self.flush_chunk(i)
    }

    /// Flush the chunk's bitmap window if it is memory-mapped. Returns
    /// whether it was mapped.
    ///
    /// Explicit requests flush even under `no_msync`; the flag only thins
    /// out the implicit flushes on the allocate/free paths.
    pub fn mem_sync_if_mapped(&mut self, chunk: usize) -> Result<bool> {
        let buffer = self
            .chunks
            .get_mut(chunk)
            .ok_or(BlockMapError::OutOfBounds(chunk))?;
        match &mut buffer.backing {
            Backing::Mapped(mm) => {
                mm.flush()?;
                Ok(true)
            }
            Backing::Owned(_) => Ok(false),
        }
    }

    /// Number of chunks known to this map.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the bit for a managed block address is set. Addresses in
    /// the prefix, inside a bitmap region, or beyond the known chunks read
    /// as unallocated.
    pub fn is_allocated(&self, blk: i64) -> bool {
        let (chunk, pos) = match self.config.split(blk) {
            Some(split) => split,
            None => return false,
        };
        let buffer = match self.chunks.get(chunk as usize) {
            Some(buffer) => buffer,
            None => return false,
        };
        let pos = pos as usize;
        buffer.bytes()[pos / 8] & (0x80u8 >> (pos % 8)) != 0
    }

    /// Occupancy summary across all cached chunks.
    pub fn stats(&self) -> BlockMapStats {
        let total = self.chunks.len() as i64 * self.config.run_blocks();
        let used: i64 = self
            .chunks
            .iter()
            .flat_map(|buffer| buffer.bytes())
            .map(|byte| byte.count_ones() as i64)
            .sum();
        BlockMapStats {
            chunks: self.chunks.len(),
            total_blocks: total,
            free_blocks: total - used,
        }
    }

    /// Release the bitmap windows, then the store.
    ///
    /// Dropping the map does the same; this exists so callers can sequence
    /// the release explicitly.
    pub fn close(mut self) -> Result<()> {
        self.chunks.clear();
        Ok(())
    }

    /// Byte offset of a chunk's bitmap region.
    fn bitmap_offset(&self, chunk: i64) -> u64 {
        let blk = self.config.join(chunk, -(self.config.bitmap_blocks as i64));
        self.config.block_offset(blk)
    }

    /// One pass over the cached chunks: mark the first run that fits,
    /// flush that chunk, and return the run's block address.
    fn scan(&mut self, lng: i64) -> Result<Option<i64>> {
        for i in 0..self.chunks.len() {
            let pos = match bitmap::allocate(self.chunks[i].bytes_mut(), lng as usize) {
                Some(pos) => pos,
                None => continue,
            };
            self.flush_chunk(i)?;
            return Ok(Some(self.config.join(i as i64, pos as i64)));
        }
        Ok(None)
    }

    /// Build the cached buffer for the bitmap region at `raw_off`: a
    /// mapped window when a mapper is present and willing, a private
    /// read/write buffer otherwise.
    fn load_buffer(&self, raw_off: u64) -> Result<BitmapBuffer> {
        if let Some(mapper) = &self.mapper {
            match mapper.map_at(self.bitmap_bytes, raw_off) {
                Ok(mm) => {
                    return Ok(BitmapBuffer {
                        backing: Backing::Mapped(mm),
                        raw_off,
                    })
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        offset = raw_off,
                        "mmap failed, using read/write buffer"
                    );
                }
            }
        }
        let mut bytes = vec![0u8; self.bitmap_bytes];
        self.store.read_at(&mut bytes, raw_off)?;
        Ok(BitmapBuffer {
            backing: Backing::Owned(bytes),
            raw_off,
        })
    }

    /// Append one chunk: persist a zero-filled bitmap region at the next
    /// stride, then cache it like any other chunk.
    fn append_chunk(&mut self) -> Result<()> {
        let raw_off = self.bitmap_offset(self.chunks.len() as i64);
        let zeros = vec![0u8; self.bitmap_bytes];
        self.store.write_at(&zeros, raw_off)?;

        let mut buffer = BitmapBuffer {
            backing: Backing::Owned(zeros),
            raw_off,
        };
        if let Some(mapper) = &self.mapper {
            match mapper.map_at(self.bitmap_bytes, raw_off) {
                Ok(mm) => buffer.backing = Backing::Mapped(mm),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        offset = raw_off,
                        "mmap failed, keeping read/write buffer"
                    );
                }
            }
        }
        self.chunks.push(buffer);
        tracing::debug!(chunk = self.chunks.len() - 1, "appended chunk");
        Ok(())
    }

    /// Persist one chunk's bitmap according to its backing and the
    /// configured durability switches.
    fn flush_chunk(&mut self, i: usize) -> Result<()> {
        let buffer = &mut self.chunks[i];
        match &mut buffer.backing {
            Backing::Mapped(mm) => {
                if !self.config.no_msync {
                    mm.flush()?;
                }
            }
            Backing::Owned(bytes) => {
                self.store.write_at(bytes, buffer.raw_off)?;
                if !self.config.no_fsync {
                    self.store.sync()?;
                }
            }
        }
        Ok(())
    }
}
