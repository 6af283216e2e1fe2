//! Positional I/O on `File` handles. Nothing here moves a shared cursor, so a
//! handle can serve reads and writes at arbitrary offsets in any order.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;

use crate::config::ReserveMode;

#[cfg(unix)]
fn pread(f: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(f, buf, off)
}

#[cfg(unix)]
fn pwrite(f: &File, buf: &[u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(f, buf, off)
}

#[cfg(windows)]
fn pread(f: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(f, buf, off)
}

#[cfg(windows)]
fn pwrite(f: &File, buf: &[u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(f, buf, off)
}

/// Read until `buf` is full or EOF. Returns bytes read.
pub(crate) fn read_full_at(f: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    let mut done = 0usize;
    while done < buf.len() {
        match pread(f, &mut buf[done..], off + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

pub(crate) fn write_all_at(f: &File, buf: &[u8], off: u64) -> io::Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        match pwrite(f, &buf[done..], off + done as u64) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "positional write made no progress")),
            Ok(n) => done += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Open read/write, creating with rw-r--r-- if absent. Never truncates.
pub(crate) fn open_rw(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o644);
    }
    opts.open(path)
}

/// Set the file length to exactly `len`. Growth goes through `mode`.
pub(crate) fn set_reserved(f: &File, len: u64, mode: ReserveMode) -> io::Result<()> {
    let cur = f.metadata()?.len();
    if len > cur && mode == ReserveMode::Allocate {
        return fs2::FileExt::allocate(f, len);
    }
    f.set_len(len)
}

/// Grow the file to at least `len`; never shrinks.
pub(crate) fn grow_to(f: &File, len: u64, mode: ReserveMode) -> io::Result<()> {
    if f.metadata()?.len() >= len {
        return Ok(());
    }
    set_reserved(f, len, mode)
}
