use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::diagnostics::{Diagnostics, StoreEvent, TracingDiagnostics};
use crate::error::{Result, StorageError};
use crate::manifest::{self, Manifest, SENTINEL};
use crate::oracle::{ContentSize, UnknownSize};
use crate::path_safety::{self, PathPolicy};
use crate::posio;
use crate::slice::FileSlice;

/// Where the store is in discovering how content maps onto files.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutState {
    /// Nothing written yet.
    Unknown,
    /// Content is one flat file at the root path. Terminal.
    SingleFile,
    /// Manifest header seen; the blob is still arriving.
    ManifestSizeKnown,
    /// Manifest parsed, slices fixed. Terminal.
    ManifestComplete,
    /// Manifest rejected. Terminal; every operation fails.
    Invalid,
}

impl fmt::Display for LayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LayoutState::Unknown => "unknown",
            LayoutState::SingleFile => "single-file",
            LayoutState::ManifestSizeKnown => "manifest-size-known",
            LayoutState::ManifestComplete => "manifest-complete",
            LayoutState::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct SliceReport {
    pub path: String,
    pub host_path: PathBuf,
    pub start: u64,
    pub end: u64,
    pub size: u64,
    pub open: bool,
}

#[derive(Serialize, Clone, Debug)]
pub struct LayoutReport {
    pub root: PathBuf,
    pub state: LayoutState,
    pub manifest_size: Option<u64>,
    pub content_len: Option<u64>,
    pub reserved_size: Option<u64>,
    pub slices: Vec<SliceReport>,
}

/// Presents a swarm's content as one linear byte range and persists it as
/// either a single file or the set of files a manifest describes.
///
/// Mutating calls take `&mut self`, so a store has exactly one writer at a
/// time. Share it across threads behind a `Mutex`.
pub struct ContentStore {
    root: PathBuf,
    base_dir: PathBuf,
    cfg: StoreConfig,
    state: LayoutState,
    manifest_size: Option<u64>,
    single: Option<File>,
    pending_reserve: Option<u64>,
    // Sorted and contiguous once the manifest is parsed; slices[0] is the manifest.
    slices: Vec<FileSlice>,
    oracle: Box<dyn ContentSize>,
    diag: Arc<dyn Diagnostics>,
}

impl ContentStore {
    /// Open with no size oracle, logging through `tracing`.
    pub fn open(root: impl AsRef<Path>, cfg: StoreConfig) -> Result<Self> {
        let root = root.as_ref();
        let diag = TracingDiagnostics::shared(root.display().to_string());
        Self::open_with(root, cfg, Box::new(UnknownSize), diag)
    }

    /// Open `root`. If it exists, its first bytes decide the layout right
    /// away: a manifest means we are seeding a multi-file swarm and the whole
    /// file is parsed as the manifest, anything else is the single file. If it does not exist, the layout is decided
    /// by the first write.
    pub fn open_with(
        root: impl AsRef<Path>,
        cfg: StoreConfig,
        oracle: Box<dyn ContentSize>,
        diag: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let base_dir = cfg
            .base_dir
            .clone()
            .unwrap_or_else(|| root.parent().map(Path::to_path_buf).unwrap_or_default());
        let mut store = Self {
            root,
            base_dir,
            cfg,
            state: LayoutState::Unknown,
            manifest_size: None,
            single: None,
            pending_reserve: None,
            slices: Vec::new(),
            oracle,
            diag,
        };

        let disk_len = match std::fs::metadata(&store.root) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(store),
            Err(e) => return Err(StorageError::io("stat", &store.root, e)),
        };
        let mut head = vec![0u8; SENTINEL.len() + 1 + 20];
        let f = File::open(&store.root).map_err(|e| StorageError::io("open", &store.root, e))?;
        let n = posio::read_full_at(&f, &mut head, 0)
            .map_err(|e| StorageError::io("read", &store.root, e))?;
        head.truncate(n);
        drop(f);

        match manifest::parse_header(&head)? {
            None => store.open_single()?,
            Some(_) => {
                // On-disk length wins over the header line, in either direction.
                store.check_manifest_size(disk_len)?;
                store.start_manifest(disk_len)?;
                store.complete_manifest()?;
            }
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn state(&self) -> LayoutState {
        self.state
    }

    pub fn manifest_size(&self) -> Option<u64> {
        self.manifest_size
    }

    pub fn slices(&self) -> &[FileSlice] {
        &self.slices
    }

    /// Total logical length as declared by the manifest. `None` until the
    /// manifest is parsed, and for single-file swarms.
    pub fn content_len(&self) -> Option<u64> {
        match self.state {
            LayoutState::ManifestComplete => Some(self.layout_end()),
            _ => None,
        }
    }

    /// The slice that owns `offset`.
    ///
    /// Binary search; valid because slices are only ever appended in offset
    /// order and membership is frozen once the manifest is complete. While
    /// the manifest is still arriving only the manifest slice exists.
    pub fn find_slice(&self, offset: u64) -> Option<&FileSlice> {
        let idx = self.slices.partition_point(|s| s.end_exclusive() <= offset);
        self.slices.get(idx).filter(|s| s.contains(offset))
    }

    /// Write `buf` at logical `offset`; returns bytes written.
    ///
    /// While the layout is unknown the first write must be at offset 0; its
    /// bytes decide between single-file and multi-file.
    ///
    /// A write that completes the manifest and carries data past it is not
    /// atomic: if routing the data fails, the manifest bytes are already on
    /// disk and the layout is already `ManifestComplete`. Check
    /// [`ContentStore::state`] and resend only the bytes past the manifest.
    pub fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        match self.state {
            LayoutState::SingleFile => self.write_single(buf, offset),
            LayoutState::Unknown => self.write_first(buf, offset),
            LayoutState::ManifestSizeKnown => self.write_manifest_part(buf, offset),
            LayoutState::ManifestComplete => self.write_routed(buf, offset),
            LayoutState::Invalid => Err(self.unusable()),
        }
    }

    /// Read into `buf` from logical `offset`; returns bytes read, which is
    /// short at the end of content or where data has not been written yet.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        match self.state {
            LayoutState::SingleFile => {
                let f = self.single_handle()?;
                posio::read_full_at(f, buf, offset)
                    .map_err(|e| StorageError::io("read", &self.root, e))
            }
            LayoutState::ManifestSizeKnown | LayoutState::ManifestComplete => {
                self.read_routed(buf, offset)
            }
            LayoutState::Unknown => Err(StorageError::invalid("read before the layout is known")),
            LayoutState::Invalid => Err(self.unusable()),
        }
    }

    /// Reserve `size` bytes of content on disk.
    ///
    /// Single file: set its length. Unknown layout: remember the request and
    /// apply it if the swarm turns out single-file. Multi-file: grow every
    /// file to its full size if `size` exceeds what is on disk; never shrinks.
    pub fn resize_reserved(&mut self, size: u64) -> Result<()> {
        match self.state {
            LayoutState::SingleFile => {
                let f = self.single_handle()?;
                posio::set_reserved(f, size, self.cfg.reserve_mode)
                    .map_err(|e| StorageError::io("resize", &self.root, e))?;
                self.emit(StoreEvent::Resized { size });
                Ok(())
            }
            LayoutState::Unknown => {
                self.pending_reserve = Some(size);
                self.emit(StoreEvent::ResizePostponed { size });
                Ok(())
            }
            LayoutState::ManifestSizeKnown => {
                Err(StorageError::invalid("cannot resize while the manifest is incomplete"))
            }
            LayoutState::ManifestComplete => {
                let current = self.reserved_size()?;
                if size <= current {
                    self.emit(StoreEvent::ResizeIgnored { requested: size, current });
                    return Ok(());
                }
                for s in &self.slices {
                    s.resize_reserved(self.cfg.reserve_mode)?;
                }
                self.emit(StoreEvent::Resized { size });
                Ok(())
            }
            LayoutState::Invalid => Err(self.unusable()),
        }
    }

    /// Bytes currently on disk: the single file's length, or the sum of
    /// every slice file's length. Lags the declared size until
    /// [`ContentStore::resize_reserved`] has been called.
    pub fn reserved_size(&self) -> Result<u64> {
        match self.state {
            LayoutState::SingleFile => {
                let f = self.single_handle()?;
                f.metadata().map(|m| m.len()).map_err(|e| StorageError::io("stat", &self.root, e))
            }
            LayoutState::ManifestComplete => {
                let mut total = 0u64;
                for s in &self.slices {
                    total += s.disk_len()?;
                }
                Ok(total)
            }
            LayoutState::Invalid => Err(self.unusable()),
            _ => Err(StorageError::invalid(format!("no reserved size in state {}", self.state))),
        }
    }

    pub fn report(&self) -> LayoutReport {
        LayoutReport {
            root: self.root.clone(),
            state: self.state,
            manifest_size: self.manifest_size,
            content_len: self.content_len(),
            reserved_size: self.reserved_size().ok(),
            slices: self
                .slices
                .iter()
                .map(|s| SliceReport {
                    path: s.manifest_path().to_string(),
                    host_path: s.host_path().to_path_buf(),
                    start: s.start(),
                    end: s.end(),
                    size: s.size(),
                    open: s.is_open(),
                })
                .collect(),
        }
    }

    fn write_first(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        if offset != 0 {
            let err = StorageError::invalid(format!(
                "layout unknown: first write must be at offset 0, got {offset}"
            ));
            return Err(self.fail("write", err));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        match manifest::parse_header(buf).map_err(|e| self.fail("write", e))? {
            Some(declared) => {
                self.check_manifest_size(declared)?;
                self.start_manifest(declared)?;
                self.write_manifest_part(buf, offset)
            }
            None => {
                self.open_single()?;
                self.write_single(buf, offset)
            }
        }
    }

    fn write_single(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let f = self.single_handle()?;
        posio::write_all_at(f, buf, offset).map_err(|e| StorageError::io("write", &self.root, e))?;
        Ok(buf.len())
    }

    // Bytes for the manifest go into slices[0]. The write that fills its last
    // byte triggers parsing, then anything past the manifest is routed.
    fn write_manifest_part(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let end = self.slices[0].end_exclusive();
        if offset >= end {
            let err = StorageError::invalid(format!(
                "offset {offset} is past the {end}-byte manifest and the layout is not known yet"
            ));
            return Err(self.fail("write", err));
        }
        let head = (end - offset).min(buf.len() as u64) as usize;
        self.slices[0].write_at(&buf[..head], offset)?;
        if offset + (head as u64) < end {
            return Ok(head);
        }

        self.complete_manifest()?;
        if head == buf.len() {
            return Ok(head);
        }
        let tail = self.write_routed(&buf[head..], offset + head as u64)?;
        Ok(head + tail)
    }

    fn write_routed(&self, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let limit = self.layout_end();
        let end = offset.saturating_add(buf.len() as u64);
        if end > limit {
            let err = StorageError::invalid(format!(
                "write [{offset}, {end}) runs past the end of content at {limit}"
            ));
            return Err(self.fail("write", err));
        }

        let mut done = 0usize;
        while done < buf.len() {
            let pos = offset + done as u64;
            let slice = self.find_slice(pos).ok_or_else(|| self.no_slice("write", pos))?;
            let n = (slice.end_exclusive() - pos).min((buf.len() - done) as u64) as usize;
            slice.write_at(&buf[done..done + n], pos - slice.start())?;
            done += n;
        }
        Ok(done)
    }

    fn read_routed(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let total = self.oracle.content_size().unwrap_or_else(|| self.layout_end());

        let mut done = 0usize;
        while done < buf.len() {
            let pos = offset + done as u64;
            let slice = self.find_slice(pos).ok_or_else(|| self.no_slice("read", pos))?;
            let want = (slice.end_exclusive() - pos).min((buf.len() - done) as u64) as usize;
            let got = slice.read_at(&mut buf[done..done + want], pos - slice.start())?;
            done += got;
            if got < want {
                // file not filled that far yet
                break;
            }
            if offset + done as u64 == total {
                break;
            }
        }
        Ok(done)
    }

    fn open_single(&mut self) -> Result<()> {
        let f = posio::open_rw(&self.root).map_err(|e| StorageError::io("open", &self.root, e))?;
        self.single = Some(f);
        self.set_state(LayoutState::SingleFile);
        if let Some(size) = self.pending_reserve.take() {
            self.resize_reserved(size)?;
        }
        Ok(())
    }

    fn start_manifest(&mut self, declared: u64) -> Result<()> {
        self.emit(StoreEvent::ManifestHeader { declared_size: declared });
        let mut slice = FileSlice::new(SENTINEL, self.root.clone(), 0, declared);
        slice.open()?;
        self.emit(StoreEvent::SliceCreated { path: SENTINEL.to_string(), start: 0, size: declared });
        if let Some(size) = self.pending_reserve.take() {
            // per-file sizes come from the manifest
            self.emit(StoreEvent::ResizeDiscarded { size });
        }
        self.manifest_size = Some(declared);
        self.slices.push(slice);
        self.set_state(LayoutState::ManifestSizeKnown);
        Ok(())
    }

    fn complete_manifest(&mut self) -> Result<()> {
        match self.load_manifest() {
            Ok(slices) => {
                self.slices.extend(slices);
                self.set_state(LayoutState::ManifestComplete);
                Ok(())
            }
            Err(e) => {
                self.state = LayoutState::Invalid;
                Err(self.fail("parse manifest", e))
            }
        }
    }

    // Parse and validate every line before touching the filesystem, so a bad
    // line never leaves half a layout behind.
    fn load_manifest(&self) -> Result<Vec<FileSlice>> {
        let mslice = &self.slices[0];
        let blob_size = mslice.size();
        let mut blob = vec![0u8; blob_size as usize];
        let n = mslice.read_at(&mut blob, 0)?;
        if n < blob.len() {
            return Err(StorageError::manifest(format!(
                "manifest file holds {n} of {blob_size} bytes"
            )));
        }
        let parsed: Manifest = manifest::parse(&blob, blob_size, self.cfg.max_line_len)?;

        let policy = PathPolicy { follow_symlinks: self.cfg.follow_symlinks };
        let mut planned = Vec::with_capacity(parsed.entries.len());
        for entry in parsed.entries {
            let host = path_safety::resolve_entry(&self.base_dir, &entry.path, policy)?;
            if host == self.root {
                return Err(StorageError::manifest(format!(
                    "{:?} would overwrite the manifest",
                    entry.path
                )));
            }
            planned.push((entry, host));
        }

        let mut out = Vec::with_capacity(planned.len());
        for (entry, host) in planned {
            let mut slice = FileSlice::new(entry.path, host, entry.start, entry.size);
            match slice.open() {
                Ok(()) => self.emit(StoreEvent::SliceCreated {
                    path: slice.manifest_path().to_string(),
                    start: slice.start(),
                    size: slice.size(),
                }),
                Err(e) => self.emit(StoreEvent::SliceUnavailable {
                    path: slice.manifest_path().to_string(),
                    reason: e.to_string(),
                }),
            }
            out.push(slice);
        }
        Ok(out)
    }

    fn check_manifest_size(&self, declared: u64) -> Result<()> {
        if declared > self.cfg.max_manifest_size {
            let err = StorageError::invalid(format!(
                "manifest of {declared} bytes exceeds limit of {}",
                self.cfg.max_manifest_size
            ));
            return Err(self.fail("manifest header", err));
        }
        Ok(())
    }

    fn layout_end(&self) -> u64 {
        self.slices.last().map(FileSlice::end_exclusive).unwrap_or(0)
    }

    fn single_handle(&self) -> Result<&File> {
        self.single.as_ref().ok_or_else(|| StorageError::NotFound(self.root.clone()))
    }

    fn set_state(&mut self, state: LayoutState) {
        self.state = state;
        self.emit(StoreEvent::LayoutDetected { layout: state });
    }

    fn no_slice(&self, op: &str, offset: u64) -> StorageError {
        self.fail(op, StorageError::invalid(format!("no file covers offset {offset}")))
    }

    fn unusable(&self) -> StorageError {
        StorageError::manifest("layout resolution failed; store is unusable")
    }

    fn fail(&self, op: &str, err: StorageError) -> StorageError {
        self.emit(StoreEvent::Failed { op: op.to_string(), reason: err.to_string() });
        err
    }

    fn emit(&self, ev: StoreEvent) {
        self.diag.event(&ev);
    }
}
