//! Optional memory-map capability and its provider registry.
//!
//! Mapping is strictly an optimization: when no provider recognizes a
//! store, or mapping a region fails, the allocator falls back to private
//! buffers synchronized with explicit reads and writes. Flushing a window
//! is [`MmapMut::flush`]; unmapping is dropping it.

use crate::store::Storage;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use std::fs::File;
use std::io;

/// Maps mutable windows of a store into memory.
pub trait MemMapper {
    /// Return a mutable window of exactly `len` bytes at offset `off`.
    /// Writes through the window reach the store, durably so after a flush.
    fn map_at(&self, len: usize, off: u64) -> io::Result<MmapMut>;
}

/// Inspects a store and produces a mapper for it, or `None` when the store
/// kind is not mappable.
pub type MapperProvider = fn(&dyn Storage) -> Option<Box<dyn MemMapper>>;

static PROVIDERS: RwLock<Vec<MapperProvider>> = RwLock::new(Vec::new());

/// Register a process-wide mapper provider.
///
/// Providers are consulted in registration order, before the built-in
/// native-file factory. Intended to be called once at startup, per store
/// kind.
pub fn register_mapper_provider(provider: MapperProvider) {
    PROVIDERS.write().push(provider);
}

/// Find a mapper for the given store: registered providers first, then the
/// native file fallback.
pub(crate) fn mapper_for(store: &dyn Storage) -> Option<Box<dyn MemMapper>> {
    for provider in PROVIDERS.read().iter() {
        if let Some(mapper) = provider(store) {
            return Some(mapper);
        }
    }
    file_mapper(store)
}

/// Built-in provider for stores backed by an OS file.
pub fn file_mapper(store: &dyn Storage) -> Option<Box<dyn MemMapper>> {
    let file = store.as_file()?.try_clone().ok()?;
    Some(Box::new(FileMapper { file }))
}

struct FileMapper {
    file: File,
}

impl MemMapper for FileMapper {
    fn map_at(&self, len: usize, off: u64) -> io::Result<MmapMut> {
        // A window past the end of the file would fault on first touch;
        // refuse instead so callers fall back to read/write buffers.
        let end = self.file.metadata()?.len();
        if off.saturating_add(len as u64) > end {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "map window extends past end of file",
            ));
        }
        // Safety: the window aliases file contents; the allocator owns the
        // store handle exclusively for its lifetime and never maps the same
        // region twice.
        unsafe { MmapOptions::new().offset(off).len(len).map_mut(&self.file) }
    }
}
