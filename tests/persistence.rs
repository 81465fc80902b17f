//! Reopen and growth behavior over a real file store.
//!
//! The allocation map must survive close/reopen cycles byte for byte, with
//! and without memory-mapped bitmaps, because the bitmaps are the only
//! persistent record of which blocks are live.

use blockmap::{BlockMap, FormatConfig};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tempfile::NamedTempFile;

fn reopen(path: &Path) -> File {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .unwrap()
}

// 8-byte blocks: 64-block runs, chunk stride 65, first data block at 2.
fn tiny() -> FormatConfig {
    FormatConfig::new(3)
}

#[test]
fn test_reopen_preserves_allocation_view() {
    let tmp = NamedTempFile::new().unwrap();

    let mut addrs = Vec::new();
    {
        let mut map = BlockMap::new(reopen(tmp.path()), tiny()).unwrap();
        for lng in [3i64, 7, 16, 64] {
            addrs.push((map.allocate_blocks(lng, true).unwrap(), lng));
        }
        assert_eq!(map.chunk_count(), 2);
        map.close().unwrap();
    }

    let mut map = BlockMap::new(reopen(tmp.path()), tiny()).unwrap();
    assert_eq!(map.chunk_count(), 2);
    for &(blk, lng) in &addrs {
        for b in blk..blk + lng {
            assert!(map.is_allocated(b), "block {} lost across reopen", b);
        }
    }

    // Fresh allocations must not overlap anything persisted.
    let fresh = map.allocate_blocks(8, true).unwrap();
    for &(blk, lng) in &addrs {
        assert!(fresh + 8 <= blk || blk + lng <= fresh);
    }
}

#[test]
fn test_growth_addresses_are_deterministic() {
    let tmp = NamedTempFile::new().unwrap();
    let mut map = BlockMap::new(reopen(tmp.path()), tiny()).unwrap();

    // One full chunk each: chunk 0 starts at 2, chunk 1 at 67.
    assert_eq!(map.allocate_blocks(64, true).unwrap(), 2);
    assert_eq!(map.allocate_blocks(64, true).unwrap(), 67);
    assert_eq!(map.chunk_count(), 2);
}

#[test]
fn test_free_persists_across_reopen() {
    let tmp = NamedTempFile::new().unwrap();

    let blk;
    {
        let mut map = BlockMap::new(reopen(tmp.path()), tiny()).unwrap();
        blk = map.allocate_blocks(10, false).unwrap();
        map.allocate_blocks(5, false).unwrap();
        map.free_blocks(blk, 10).unwrap();
        map.close().unwrap();
    }

    let mut map = BlockMap::new(reopen(tmp.path()), tiny()).unwrap();
    assert!(!map.is_allocated(blk));
    // The freed run is the lowest free space again.
    assert_eq!(map.allocate_blocks(10, false).unwrap(), blk);
}

#[test]
fn test_mmap_and_read_write_paths_agree() {
    let lengths = [5i64, 12, 64, 1, 30, 64, 9];

    let with_mmap = NamedTempFile::new().unwrap();
    let without = NamedTempFile::new().unwrap();
    let mut mapped = BlockMap::new(reopen(with_mmap.path()), tiny()).unwrap();
    let mut buffered = BlockMap::new(reopen(without.path()), tiny().without_mmap()).unwrap();

    for &lng in &lengths {
        let a = mapped.allocate_blocks(lng, true).unwrap();
        let b = buffered.allocate_blocks(lng, true).unwrap();
        assert_eq!(a, b, "backings disagree for run of {}", lng);
    }
    assert_eq!(mapped.chunk_count(), buffered.chunk_count());
    assert_eq!(mapped.stats(), buffered.stats());
}

#[test]
fn test_reopen_switching_mmap_modes() {
    let tmp = NamedTempFile::new().unwrap();

    let blk;
    {
        let mut map = BlockMap::new(reopen(tmp.path()), tiny().without_mmap()).unwrap();
        blk = map.allocate_blocks(20, false).unwrap();
        map.close().unwrap();
    }

    // A map written through the read/write path reads back mapped.
    let mut map = BlockMap::new(reopen(tmp.path()), tiny()).unwrap();
    assert!(map.mem_sync_if_mapped(0).unwrap());
    for b in blk..blk + 20 {
        assert!(map.is_allocated(b));
    }
}

#[test]
fn test_relaxed_durability_still_persists_writes() {
    // no_msync/no_fsync skip the sync barriers, not the writes: a clean
    // close must still leave the bitmaps readable.
    let tmp = NamedTempFile::new().unwrap();
    let cfg = tiny().without_msync().without_fsync();

    let blk;
    {
        let mut map = BlockMap::new(reopen(tmp.path()), cfg).unwrap();
        blk = map.allocate_blocks(33, false).unwrap();
        map.close().unwrap();
    }

    let map = BlockMap::new(reopen(tmp.path()), cfg).unwrap();
    for b in blk..blk + 33 {
        assert!(map.is_allocated(b));
    }
    assert_eq!(map.stats().free_blocks, 64 - 33);
}

#[test]
fn test_larger_geometry_roundtrip() {
    // 512-byte blocks, two-block bitmaps: 8192-slot runs per chunk.
    let tmp = NamedTempFile::new().unwrap();
    let cfg = FormatConfig::new(9).with_bitmap_blocks(2).with_prefix_blocks(4);

    let addrs;
    {
        let mut map = BlockMap::new(reopen(tmp.path()), cfg).unwrap();
        addrs = [
            map.allocate_blocks(1000, true).unwrap(),
            map.allocate_blocks(8192, true).unwrap(),
            map.allocate_blocks(1, true).unwrap(),
        ];
        map.close().unwrap();
    }

    let map = BlockMap::new(reopen(tmp.path()), cfg).unwrap();
    assert_eq!(map.chunk_count(), 2);
    assert!(map.is_allocated(addrs[0]));
    assert!(map.is_allocated(addrs[1]));
    assert!(map.is_allocated(addrs[2]));
    assert_eq!(map.stats().free_blocks, 2 * 8192 - 1000 - 8192 - 1);
}

#[test]
fn test_truncated_tail_reopens_as_free_space() {
    // Cut the store mid-way through chunk 1's bitmap region. The surviving
    // prefix of that bitmap must still load; the lost bytes read as free.
    let tmp = NamedTempFile::new().unwrap();

    {
        let mut map = BlockMap::new(reopen(tmp.path()), tiny()).unwrap();
        map.allocate_blocks(64, true).unwrap();
        map.allocate_blocks(64, true).unwrap();
        map.close().unwrap();
    }

    // Chunk 1's bitmap region spans bytes [528, 536); keep 4 of its bytes.
    let file = reopen(tmp.path());
    file.set_len(532).unwrap();
    drop(file);

    let mut map = BlockMap::new(reopen(tmp.path()), tiny()).unwrap();
    assert_eq!(map.chunk_count(), 2);
    // Slots 0..32 of chunk 1 survived as occupied, 32..64 were lost.
    assert!(map.is_allocated(67));
    assert_eq!(map.allocate_blocks(32, false).unwrap(), 67 + 32);
}
