//! Raw-chunk preloading: the interface the core exposes to an interactive
//! viewer.
//!
//! The preloader copies every non-skipped entry's *stored* bytes (no
//! decoding) into a temp directory, reporting `(index, total, name)`
//! progress as it goes. It checks the cancel flag between entries, never
//! inside a codec, and stops before the next entry once cancelled. The
//! returned map (`entry index → temp path`) is written only here; viewers
//! read it and hand single paths to [`load_chunk`], which does the decode
//! on demand. Temp-file lifetime is the caller's concern.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::extract::{read_chunk, Chunk, Environment};
use crate::index::Index;
use crate::rdp::RdpResolver;

/// One progress event, emitted once per entry before it is read.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub index: usize,
    pub total: usize,
    pub name: &'a str,
}

/// Pre-extract the stored bytes of every readable entry in `parsed`.
pub fn preload(
    parsed: &Index,
    archive_path: &Path,
    data: &[u8],
    env: &Environment,
    temp_dir: &Path,
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(Progress<'_>),
) -> Result<HashMap<usize, PathBuf>> {
    fs::create_dir_all(temp_dir)
        .with_context(|| format!("creating temp directory {}", temp_dir.display()))?;
    let archive_dir = archive_path.parent().unwrap_or(Path::new("")).to_path_buf();
    let mut rdp = RdpResolver::new(env.program_dir.clone());
    let total = parsed.entries.len();
    let mut map = HashMap::new();

    for entry in &parsed.entries {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let name = entry.names.file_name(entry.index);
        on_progress(Progress {
            index: entry.index,
            total,
            name: &name,
        });
        if entry.skip.is_some() || entry.csize == 0 {
            continue;
        }
        let stored = match read_chunk(entry, data, &archive_dir, &mut rdp) {
            Chunk::Bytes(bytes) => bytes,
            Chunk::MissingRdp(kind) => {
                tracing::warn!(entry = entry.index, %kind, "preload skipped: store missing");
                continue;
            }
            Chunk::Unreadable(detail) => {
                tracing::warn!(entry = entry.index, detail = %detail, "preload skipped");
                continue;
            }
        };
        let temp_path = temp_dir.join(format!("{}_{name}", entry.index));
        fs::write(&temp_path, &stored)
            .with_context(|| format!("writing chunk to {}", temp_path.display()))?;
        map.insert(entry.index, temp_path);
    }
    Ok(map)
}

/// Read one pre-extracted chunk and decode it. Loads are serialized by
/// construction: callers issue at most one at a time.
pub fn load_chunk(path: &Path) -> Result<pres_codecs::Decoded> {
    let stored =
        fs::read(path).with_context(|| format!("reading preloaded chunk {}", path.display()))?;
    pres_codecs::decompress(&stored)
}
