use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::error::{Result, StorageError};
use crate::path_safety::check_manifest_path;

/// Relative path of the manifest inside its own swarm. A swarm whose first
/// bytes are this token is multi-file.
pub const SENTINEL: &str = "META-INF-multifilespec.txt";

/// One real file of a multi-file swarm and where it sits in the content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub start: u64,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Manifest {
    /// Length of the manifest blob, which occupies `[0, blob_size)`.
    pub blob_size: u64,
    /// Path written on the first line (normally [`SENTINEL`]).
    pub self_path: String,
    /// Every file after the manifest itself, in content order.
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn content_len(&self) -> u64 {
        self.entries.last().map(|e| e.start + e.size).unwrap_or(self.blob_size)
    }
}

/// Inspect the first bytes of a swarm. `Ok(None)` if they are not a manifest;
/// `Ok(Some(n))` with the declared blob length if they are.
pub fn parse_header(buf: &[u8]) -> Result<Option<u64>> {
    let Some(rest) = buf.strip_prefix(SENTINEL.as_bytes()) else {
        return Ok(None);
    };
    let Some(rest) = rest.strip_prefix(b" ") else {
        return Err(StorageError::invalid("manifest sentinel not followed by a size"));
    };
    let ndigits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if ndigits == 0 {
        return Err(StorageError::invalid("manifest header has no size"));
    }
    // all ASCII digits, so valid UTF-8
    let digits = std::str::from_utf8(&rest[..ndigits]).unwrap_or_default();
    let declared: u64 = digits
        .parse()
        .map_err(|_| StorageError::invalid(format!("manifest size out of range: {digits}")))?;
    let header_len = (SENTINEL.len() + 1 + ndigits) as u64;
    if declared <= header_len {
        return Err(StorageError::invalid(format!(
            "declared manifest size {declared} does not cover its own header"
        )));
    }
    Ok(Some(declared))
}

/// Parse a complete manifest blob.
///
/// The first line describes the manifest itself; its size field must be a
/// number but is otherwise ignored, because `blob_size` (the length actually
/// known for the blob) decides where the next file starts. Every later line
/// becomes an entry placed right after the previous one.
pub fn parse(blob: &[u8], blob_size: u64, max_line_len: usize) -> Result<Manifest> {
    let body = blob.strip_suffix(b"\n").unwrap_or(blob);
    if body.is_empty() {
        return Err(StorageError::manifest("empty manifest"));
    }

    let mut offset = 0u64;
    let mut self_path = String::new();
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    for (i, raw) in body.split(|b| *b == b'\n').enumerate() {
        let lineno = i + 1;
        let at_line = |e: StorageError| match e {
            StorageError::ManifestInvalid(m) => StorageError::manifest(format!("line {lineno}: {m}")),
            other => other,
        };
        if raw.len() > max_line_len {
            return Err(StorageError::manifest(format!(
                "line {lineno}: longer than {max_line_len} bytes"
            )));
        }
        let line = std::str::from_utf8(raw)
            .map_err(|_| StorageError::manifest(format!("line {lineno}: not UTF-8")))?;
        let (path, size) = line
            .rsplit_once(' ')
            .ok_or_else(|| StorageError::manifest(format!("line {lineno}: missing size field")))?;
        let size: u64 = size.trim().parse().map_err(|_| {
            StorageError::manifest(format!("line {lineno}: bad size {:?}", size.trim()))
        })?;
        check_manifest_path(path).map_err(at_line)?;
        if !seen.insert(path) {
            return Err(StorageError::manifest(format!("line {lineno}: duplicate path {path:?}")));
        }

        if i == 0 {
            self_path = path.to_string();
            offset = blob_size;
        } else {
            entries.push(ManifestEntry { path: path.to_string(), start: offset, size });
            offset = offset
                .checked_add(size)
                .ok_or_else(|| StorageError::manifest(format!("line {lineno}: sizes overflow")))?;
        }
    }
    Ok(Manifest { blob_size, self_path, entries })
}

/// Render a manifest for `files` (manifest-style path, size). The header
/// line names [`SENTINEL`] and declares the blob's own total length.
pub fn encode(files: &[(String, u64)]) -> Result<Vec<u8>> {
    let mut body = String::new();
    let mut seen: HashSet<&str> = HashSet::from([SENTINEL]);
    for (path, size) in files {
        check_manifest_path(path)?;
        if path.contains('\n') {
            return Err(StorageError::manifest(format!("newline in path: {path:?}")));
        }
        if !seen.insert(path.as_str()) {
            return Err(StorageError::manifest(format!("duplicate path {path:?}")));
        }
        // writing to a String cannot fail
        let _ = writeln!(body, "{path} {size}");
    }
    let blob_size = self_sized(body.len());
    let mut out = format!("{SENTINEL} {blob_size}\n");
    out.push_str(&body);
    debug_assert_eq!(out.len() as u64, blob_size);
    Ok(out.into_bytes())
}

// Header length depends on the digit count of the total it declares.
fn self_sized(body_len: usize) -> u64 {
    let fixed = (SENTINEL.len() + 2 + body_len) as u64;
    let mut n = fixed + 1;
    loop {
        let next = fixed + n.to_string().len() as u64;
        if next == n {
            return n;
        }
        n = next;
    }
}
