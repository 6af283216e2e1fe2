use std::fs::{DirBuilder, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::config::ReserveMode;
use crate::error::{Result, StorageError};
use crate::posio;

/// One real file backing the inclusive content range `[start, end]`.
///
/// A slice whose file could not be opened keeps `handle == None`; its I/O
/// fails with `NotFound` but the rest of the store keeps working.
#[derive(Debug)]
pub struct FileSlice {
    manifest_path: String,
    host_path: PathBuf,
    start: u64,
    size: u64,
    handle: Option<File>,
}

impl FileSlice {
    /// Unopened slice; call [`FileSlice::open`] to create the file.
    pub fn new(manifest_path: impl Into<String>, host_path: PathBuf, start: u64, size: u64) -> Self {
        Self { manifest_path: manifest_path.into(), host_path, start, size, handle: None }
    }

    /// Create missing parent directories, then open or create the file for
    /// read/write. The file is not pre-sized.
    pub fn open(&mut self) -> Result<()> {
        create_parents(&self.host_path)
            .map_err(|e| StorageError::io("mkdir", &self.host_path, e))?;
        let f = posio::open_rw(&self.host_path)
            .map_err(|e| StorageError::io("open", &self.host_path, e))?;
        self.handle = Some(f);
        Ok(())
    }

    pub fn manifest_path(&self) -> &str {
        &self.manifest_path
    }

    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last content offset owned by this slice. For an empty slice this is
    /// `start - 1`, so `next.start == end + 1` holds regardless.
    pub fn end(&self) -> u64 {
        (self.start + self.size).saturating_sub(1)
    }

    /// One past the last owned offset.
    pub fn end_exclusive(&self) -> u64 {
        self.start + self.size
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end_exclusive()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn handle(&self) -> Result<&File> {
        self.handle.as_ref().ok_or_else(|| StorageError::NotFound(self.host_path.clone()))
    }

    /// Write at `rel` bytes into the file. No clamping against `size`.
    pub fn write_at(&self, buf: &[u8], rel: u64) -> Result<()> {
        posio::write_all_at(self.handle()?, buf, rel)
            .map_err(|e| StorageError::io("write", &self.host_path, e))
    }

    /// Read at `rel` bytes into the file; short only at EOF.
    pub fn read_at(&self, buf: &mut [u8], rel: u64) -> Result<usize> {
        posio::read_full_at(self.handle()?, buf, rel)
            .map_err(|e| StorageError::io("read", &self.host_path, e))
    }

    /// Grow the file to the slice's full size so any in-range offset is
    /// addressable. An already longer file is left alone.
    pub fn resize_reserved(&self, mode: ReserveMode) -> Result<()> {
        posio::grow_to(self.handle()?, self.size, mode)
            .map_err(|e| StorageError::io("resize", &self.host_path, e))
    }

    /// Current length of the real file.
    pub fn disk_len(&self) -> Result<u64> {
        let meta = match &self.handle {
            Some(f) => f.metadata(),
            None => std::fs::metadata(&self.host_path),
        };
        meta.map(|m| m.len()).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(self.host_path.clone()),
            _ => StorageError::io("stat", &self.host_path, e),
        })
    }
}

// Walk the ancestors from the top down. An existing directory is fine, any
// other existing entry is an error.
fn create_parents(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let mut dirs: Vec<&Path> =
        parent.ancestors().take_while(|a| !a.as_os_str().is_empty()).collect();
    dirs.reverse();

    let mut builder = DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    for dir in dirs {
        match std::fs::metadata(dir) {
            Ok(m) if m.is_dir() => continue,
            Ok(_) => {
                return Err(io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{} exists and is not a directory", dir.display()),
                ))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => match builder.create(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {}
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
