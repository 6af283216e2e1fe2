use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How slice files and the single file are grown by `resize_reserved`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReserveMode {
    /// Extend the length only; the OS may leave the new range sparse.
    #[default]
    Sparse,
    /// Ask the filesystem to back the whole range with blocks.
    Allocate,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoreConfig {
    /// Directory manifest entries are resolved against. `None` means the
    /// parent directory of the root path.
    pub base_dir: Option<PathBuf>,
    pub reserve_mode: ReserveMode,
    /// Longest manifest line accepted, newline excluded.
    pub max_line_len: usize,
    /// Largest manifest blob a header may declare; the blob is parsed in memory.
    pub max_manifest_size: u64,
    /// Allow entry paths through symlinks, as long as they resolve under `base_dir`.
    pub follow_symlinks: bool,
}

pub const DEFAULT_MAX_LINE_LEN: usize = 2048;
pub const DEFAULT_MAX_MANIFEST_SIZE: u64 = 64 * 1024 * 1024;

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            reserve_mode: ReserveMode::Sparse,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_manifest_size: DEFAULT_MAX_MANIFEST_SIZE,
            follow_symlinks: false,
        }
    }
}
