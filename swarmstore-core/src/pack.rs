use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};
use crate::manifest::{self, SENTINEL};
use crate::path_safety::to_manifest_path;

#[derive(Clone, Debug, Default)]
pub struct PackConfig {
    /// Globs over manifest-style relative paths; empty means everything.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct PackSummary {
    pub manifest_path: PathBuf,
    pub manifest_size: u64,
    pub content_len: u64,
    pub files: Vec<(String, u64)>,
}

pub struct Packer;

impl Packer {
    /// Describe every regular file under `root` in a manifest written to
    /// `root/<SENTINEL>`. Opening a store on that manifest seeds the swarm.
    pub fn pack(root: &Path, cfg: &PackConfig) -> Result<PackSummary> {
        let (inc, exc) = build_globset(&cfg.include, &cfg.exclude)?;
        let manifest_path = root.join(SENTINEL);

        let mut files: Vec<(String, u64)> = Vec::new();
        for ent in walkdir::WalkDir::new(root).min_depth(1) {
            let ent = ent.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                StorageError::io("walk", path, e.into())
            })?;
            if !ent.file_type().is_file() {
                continue;
            }
            let p = ent.path();
            if p == manifest_path {
                continue;
            }
            let rel = pathdiff::diff_paths(p, root).unwrap_or_else(|| p.to_path_buf());
            let Some(rel) = to_manifest_path(&rel) else {
                return Err(StorageError::invalid(format!("no manifest form for {:?}", p)));
            };
            if !inc.is_match(&rel) || exc.is_match(&rel) {
                continue;
            }
            let size = ent.metadata().map_err(|e| StorageError::io("stat", p, e.into()))?.len();
            files.push((rel, size));
        }
        files.sort();

        let blob = manifest::encode(&files)?;
        let mut mf =
            File::create(&manifest_path).map_err(|e| StorageError::io("create", &manifest_path, e))?;
        mf.write_all(&blob).map_err(|e| StorageError::io("write", &manifest_path, e))?;

        let manifest_size = blob.len() as u64;
        let content_len = manifest_size + files.iter().map(|(_, s)| s).sum::<u64>();
        Ok(PackSummary { manifest_path, manifest_size, content_len, files })
    }
}

fn build_globset(includes: &[String], excludes: &[String]) -> Result<(GlobSet, GlobSet)> {
    let bad = |e: globset::Error| StorageError::invalid(format!("bad glob: {e}"));
    let mut incb = GlobSetBuilder::new();
    let mut excb = GlobSetBuilder::new();
    if includes.is_empty() {
        incb.add(Glob::new("**").map_err(bad)?);
    }
    for g in includes {
        incb.add(Glob::new(g).map_err(bad)?);
    }
    for g in excludes {
        excb.add(Glob::new(g).map_err(bad)?);
    }
    Ok((incb.build().map_err(bad)?, excb.build().map_err(bad)?))
}
