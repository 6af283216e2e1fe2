use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use swarmstore_core::diagnostics::{Diagnostics, RecordingDiagnostics, TracingDiagnostics};
use swarmstore_core::oracle::UnknownSize;
use swarmstore_core::pack::{PackConfig, Packer};
use swarmstore_core::{ContentStore, LayoutState, ReserveMode, StoreConfig};

const IO_CHUNK: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "swarmstore", version, about = "Swarm content storage mapper")]
struct Cli {
    /// Print recorded store events to stderr when done
    #[arg(long, global = true, default_value_t = false)]
    trace: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Write a multi-file manifest describing a directory
    Pack {
        dir: PathBuf,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Show how a store maps content onto files
    Inspect { root: PathBuf },
    /// Stream logical content to stdout
    Cat {
        root: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        len: Option<u64>,
    },
    /// Replay a flat content stream into a new store, in order
    Ingest {
        root: PathBuf,
        stream: PathBuf,
        #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u64).range(64..))]
        chunk_size: u64,
        #[arg(long, default_value_t = false)]
        preallocate: bool,
        /// Back preallocated ranges with real blocks instead of sparse holes
        #[arg(long, default_value_t = false)]
        allocate: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let recorder = cli.trace.then(RecordingDiagnostics::shared);

    let res = match cli.cmd {
        Cmd::Pack { dir, include, exclude } => pack(&dir, include, exclude),
        Cmd::Inspect { root } => inspect(&root, &recorder),
        Cmd::Cat { root, offset, len } => cat(&root, offset, len, &recorder),
        Cmd::Ingest { root, stream, chunk_size, preallocate, allocate } => {
            let mut cfg = StoreConfig::default();
            if allocate {
                cfg.reserve_mode = ReserveMode::Allocate;
            }
            ingest(&root, &stream, chunk_size as usize, preallocate, cfg, &recorder)
        }
    };

    if let Some(rec) = &recorder {
        for (at, ev) in rec.timestamped() {
            eprintln!("{} {}", at.to_rfc3339(), serde_json::to_string(&ev)?);
        }
    }
    res
}

fn open_store(
    root: &Path,
    cfg: StoreConfig,
    recorder: &Option<Arc<RecordingDiagnostics>>,
) -> Result<ContentStore> {
    let diag: Arc<dyn Diagnostics> = match recorder {
        Some(rec) => rec.clone() as Arc<dyn Diagnostics>,
        None => TracingDiagnostics::shared(root.display().to_string()),
    };
    ContentStore::open_with(root, cfg, Box::new(UnknownSize), diag)
        .with_context(|| format!("open store {}", root.display()))
}

fn pack(dir: &Path, include: Vec<String>, exclude: Vec<String>) -> Result<()> {
    let cfg = PackConfig { include, exclude };
    let summary = Packer::pack(dir, &cfg).with_context(|| format!("pack {}", dir.display()))?;
    tracing::info!(
        files = summary.files.len(),
        manifest_size = summary.manifest_size,
        content_len = summary.content_len,
        "packed {}",
        summary.manifest_path.display()
    );
    Ok(())
}

fn inspect(root: &Path, recorder: &Option<Arc<RecordingDiagnostics>>) -> Result<()> {
    let store = open_store(root, StoreConfig::default(), recorder)?;
    println!("{}", serde_json::to_string_pretty(&store.report())?);
    Ok(())
}

fn cat(
    root: &Path,
    offset: u64,
    len: Option<u64>,
    recorder: &Option<Arc<RecordingDiagnostics>>,
) -> Result<()> {
    if !root.exists() {
        bail!("no store at {}", root.display());
    }
    let store = open_store(root, StoreConfig::default(), recorder)?;
    let total = match store.state() {
        LayoutState::SingleFile => store.reserved_size()?,
        LayoutState::ManifestComplete => store.content_len().unwrap_or(0),
        other => bail!("cannot read content: layout is {other}"),
    };
    let end = match len {
        Some(n) => offset.saturating_add(n).min(total),
        None => total,
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut buf = vec![0u8; IO_CHUNK];
    let mut pos = offset;
    while pos < end {
        let want = ((end - pos) as usize).min(IO_CHUNK);
        let n = store.read(&mut buf[..want], pos).with_context(|| format!("read at {pos}"))?;
        if n == 0 {
            tracing::warn!(offset = pos, "content ends early; stopping");
            break;
        }
        out.write_all(&buf[..n])?;
        pos += n as u64;
    }
    out.flush()?;
    Ok(())
}

fn ingest(
    root: &Path,
    stream: &Path,
    chunk_size: usize,
    preallocate: bool,
    cfg: StoreConfig,
    recorder: &Option<Arc<RecordingDiagnostics>>,
) -> Result<()> {
    if root.exists() {
        bail!("{} already exists; ingest needs a fresh store", root.display());
    }
    let mut src = File::open(stream).with_context(|| format!("open {}", stream.display()))?;
    let stream_len = src.metadata()?.len();
    let mut store = open_store(root, cfg, recorder)?;
    if preallocate {
        // applied only if the swarm turns out single-file
        store.resize_reserved(stream_len)?;
    }

    let mut buf = vec![0u8; chunk_size];
    let mut offset = 0u64;
    let mut reserved = false;
    loop {
        let n = read_chunk(&mut src, &mut buf)?;
        if n == 0 {
            break;
        }
        let written =
            store.write(&buf[..n], offset).with_context(|| format!("write at {offset}"))?;
        offset += written as u64;
        if preallocate && !reserved && store.state() == LayoutState::ManifestComplete {
            store.resize_reserved(stream_len)?;
            reserved = true;
        }
    }
    tracing::info!(bytes = offset, layout = %store.state(), "ingested {}", stream.display());
    Ok(())
}

fn read_chunk(src: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        let n = src.read(&mut buf[done..])?;
        if n == 0 {
            break;
        }
        done += n;
    }
    Ok(done)
}
