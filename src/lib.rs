//! Crash-resilient bitmap block allocator for a single growable byte store.
//!
//! `blockmap` manages free space inside one append-extensible file (or any
//! [`Storage`] implementation) as fixed-size blocks, tracked by bitmaps
//! that live *inside the store itself* at deterministic offsets:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Prefix (prefix_blocks · 2^block_size_log B)  │  reserved for callers
//! ├──────────────────────────────────────────────┤
//! │ Chunk 0: bitmap region │ run region          │  1 bit per run block
//! ├──────────────────────────────────────────────┤
//! │ Chunk 1: bitmap region │ run region          │
//! ├──────────────────────────────────────────────┤
//! │ ...                       (grows on demand)  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! There is no journal and no header: every bitmap region's offset follows
//! from [`FormatConfig`] alone, so a store that was truncated or lost power
//! mid-write reopens into a usable allocation map. The durability rule is
//! one-sided by design: a bitmap is flushed *before* an allocated address
//! is returned, so a crash can leak blocks (set bits without an owner) but
//! can never hand one block to two owners.
//!
//! Bitmap regions are memory-mapped when the store is a plain file (or a
//! registered [`MemMapper`] provider claims it); otherwise they are cached
//! in private buffers and written back on each mutation.
//!
//! ```rust,no_run
//! use blockmap::{BlockMap, FormatConfig};
//! use std::fs::OpenOptions;
//!
//! let file = OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .create(true)
//!     .open("space.map")?;
//!
//! // 4 KiB blocks, defaults otherwise.
//! let mut map = BlockMap::new(file, FormatConfig::new(12))?;
//! let blk = map.allocate_blocks(4, true)?;
//! map.free_blocks(blk, 4)?;
//! map.close()?;
//! # Ok::<(), blockmap::BlockMapError>(())
//! ```

pub mod bitmap;
pub mod config;
pub mod error;
pub mod mmap;
pub mod store;

mod allocator;

pub use allocator::{BlockMap, BlockMapStats};
pub use config::FormatConfig;
pub use error::{BlockMapError, Result};
pub use mmap::{file_mapper, register_mapper_provider, MapperProvider, MemMapper};
pub use store::Storage;
