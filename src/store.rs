//! Byte-level storage contract consumed by the allocator.

use std::fs::File;
use std::io;

/// Random-access byte store. [`std::fs::File`] implements it.
///
/// All methods take `&self`: the allocator reads and writes bitmap regions
/// while an mmap adapter may hold a second handle onto the same store.
pub trait Storage {
    /// Read into `buf` from absolute offset `off`, stopping at the end of
    /// the store. Returns the number of bytes read; zero means `off` is at
    /// or past the end.
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize>;

    /// Write all of `buf` at absolute offset `off`, extending the store
    /// when the range lies past its current end.
    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()>;

    /// Durably persist all prior writes.
    fn sync(&self) -> io::Result<()>;

    /// The underlying OS file, when there is one. Lets mmap providers
    /// upgrade plain file stores to memory-mapped bitmap access.
    fn as_file(&self) -> Option<&File> {
        None
    }
}

impl Storage for File {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        read_until_eof(self, buf, off)
    }

    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()> {
        write_all_at(self, buf, off)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }

    fn as_file(&self) -> Option<&File> {
        Some(self)
    }
}

#[cfg(unix)]
fn read_until_eof(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;

    let mut read = 0;
    while read < buf.len() {
        match FileExt::read_at(file, &mut buf[read..], off + read as u64) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], off: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;

    file.write_all_at(buf, off)
}

#[cfg(windows)]
fn read_until_eof(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;

    let mut read = 0;
    while read < buf.len() {
        match file.seek_read(&mut buf[read..], off + read as u64) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

#[cfg(windows)]
fn write_all_at(file: &File, buf: &[u8], off: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    let mut written = 0;
    while written < buf.len() {
        match file.seek_write(&buf[written..], off + written as u64) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
