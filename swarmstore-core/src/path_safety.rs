use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StorageError};

/// Separator used inside manifests, whatever the host uses.
pub const MANIFEST_SEP: char = '/';

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// Reject manifest paths that could land outside the base directory:
/// empty, leading `/`, any `..`, NUL, or anything the host treats as rooted
/// (drive prefixes on Windows).
pub fn check_manifest_path(p: &str) -> Result<()> {
    if p.is_empty() {
        return Err(StorageError::manifest("empty path"));
    }
    if p.starts_with(MANIFEST_SEP) {
        return Err(StorageError::manifest(format!("absolute paths are not allowed: {p:?}")));
    }
    if p.contains("..") {
        return Err(StorageError::manifest(format!("parent traversal not allowed: {p:?}")));
    }
    if p.contains('\0') {
        return Err(StorageError::manifest(format!("NUL in path: {p:?}")));
    }
    let host = to_host_relative(p);
    if host.as_os_str().is_empty() {
        return Err(StorageError::manifest(format!("path names no file: {p:?}")));
    }
    if host.is_absolute()
        || host.components().any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(StorageError::manifest(format!("path is rooted on this host: {p:?}")));
    }
    Ok(())
}

/// `a/b/c` -> host-relative `a{sep}b{sep}c`. Empty and `.` segments are dropped.
pub fn to_host_relative(p: &str) -> PathBuf {
    p.split(MANIFEST_SEP).filter(|s| !s.is_empty() && *s != ".").collect()
}

/// Inverse of [`to_host_relative`]. `None` for paths that have no manifest
/// form (rooted, `..`, non-UTF-8).
pub fn to_manifest_path(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => parts.push(s.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Map a checked manifest path under `base`. Without `follow_symlinks` any
/// existing symlink along the way is refused; with it, whatever exists of the
/// path must canonicalize to somewhere under `base`.
pub fn resolve_entry(base: &Path, manifest_path: &str, policy: PathPolicy) -> Result<PathBuf> {
    check_manifest_path(manifest_path)?;
    let rel = to_host_relative(manifest_path);
    let candidate = base.join(&rel);
    if !policy.follow_symlinks {
        let mut cur = base.to_path_buf();
        for comp in rel.components() {
            cur.push(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(StorageError::manifest(format!(
                        "symlink in path (not following): {:?}",
                        cur
                    )));
                }
            }
        }
        return Ok(candidate);
    }
    let Ok(base_can) = std::fs::canonicalize(base) else {
        // Nothing exists below a missing base, so nothing can be a link yet.
        return Ok(candidate);
    };
    let existing = candidate.ancestors().find(|a| a.exists()).unwrap_or(base);
    let existing_can = std::fs::canonicalize(existing)
        .map_err(|e| StorageError::io("canonicalize", existing, e))?;
    if !existing_can.starts_with(&base_can) {
        return Err(StorageError::manifest(format!("path escapes root: {manifest_path:?}")));
    }
    Ok(candidate)
}
