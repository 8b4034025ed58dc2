//! The recursive extraction driver.
//!
//! Walks a parsed index in file order; for each entry: resolve the source,
//! read the stored bytes, decode `blz2`/`blz4` if tagged, write the payload,
//! and re-enter nested `.res`/`.rtbl` members depth-first before the next
//! sibling. Any step may short-circuit to a diagnostic; only header and
//! structure errors abort an archive.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::address::{Address, RdpKind};
use crate::diag::{DiagKind, Diagnostic};
use crate::index::{self, Entry, HeaderVariant, Index, Language, SkipReason};
use crate::names::NameRecord;
use crate::rdp::RdpResolver;

/// Ambient values threaded through the whole extraction instead of globals:
/// where the driver lives (fallback RDP search), which languages to
/// materialize, and which header variant the root archive carries.
#[derive(Debug, Clone)]
pub struct Environment {
    pub program_dir: Option<PathBuf>,
    pub language_filter: Option<BTreeSet<Language>>,
    pub variant: HeaderVariant,
}

impl Environment {
    pub fn new(variant: HeaderVariant) -> Self {
        Self {
            program_dir: None,
            language_filter: None,
            variant,
        }
    }
}

/// What one extraction run did: files on disk, best-effort faults, and
/// nested archives whose parse failed outright (the outer walk continues).
#[derive(Debug, Default)]
pub struct Report {
    pub files_written: u64,
    pub diagnostics: Vec<Diagnostic>,
    pub nested_failures: Vec<(PathBuf, String)>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty() && self.nested_failures.is_empty()
    }
}

/// Extract `archive` into `out_root`, recursing into nested archives.
///
/// Fails only when the root archive itself cannot be parsed or read;
/// everything else lands in the [`Report`].
pub fn extract(env: &Environment, archive: &Path, out_root: &Path) -> Result<Report> {
    let data =
        fs::read(archive).with_context(|| format!("reading archive {}", archive.display()))?;
    let mut session = Session::new(env);
    session.mark_visited(archive, &data);
    let rtbl = is_rtbl_path(archive);
    session.extract_archive(archive, &data, out_root, rtbl)?;
    Ok(session.report)
}

fn is_rtbl_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("rtbl"))
}

struct Session<'a> {
    env: &'a Environment,
    rdp: RdpResolver,
    /// Canonical paths and content digests of every archive entered this
    /// session. Either one matching refuses re-entry: the digest half is
    /// what stops a self-referential archive whose copies land on ever
    /// fresh paths.
    visited_paths: HashSet<PathBuf>,
    visited_digests: HashSet<[u8; 16]>,
    report: Report,
}

impl<'a> Session<'a> {
    fn new(env: &'a Environment) -> Self {
        Self {
            env,
            rdp: RdpResolver::new(env.program_dir.clone()),
            visited_paths: HashSet::new(),
            visited_digests: HashSet::new(),
            report: Report::default(),
        }
    }

    fn mark_visited(&mut self, path: &Path, data: &[u8]) {
        let canon = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.visited_paths.insert(canon);
        self.visited_digests.insert(md5::compute(data).0);
    }

    fn extract_archive(
        &mut self,
        path: &Path,
        data: &[u8],
        out_dir: &Path,
        rtbl: bool,
    ) -> Result<()> {
        if rtbl {
            let table = index::parse_rtbl(data)?;
            return self.extract_index(&table, path, data, out_dir);
        }
        match self.env.variant {
            HeaderVariant::Original => {
                let parsed = index::parse_res(data)?;
                self.extract_index(&parsed, path, data, out_dir)
            }
            HeaderVariant::Localized => {
                let localized = index::parse_localized(data, self.env.language_filter.as_ref())?;
                if let Some(direct) = &localized.direct {
                    self.extract_index(direct, path, data, out_dir)?;
                }
                for dataset in &localized.datasets {
                    match &dataset.state {
                        index::DatasetState::Parsed(sub) => {
                            let lang_out = out_dir.join(dataset.language.label());
                            self.extract_index(sub, path, data, &lang_out)?;
                        }
                        index::DatasetState::Filtered => self.diag(
                            DiagKind::SkippedLanguage(dataset.language),
                            path,
                            None,
                            None,
                            "excluded by the language filter".into(),
                        ),
                        index::DatasetState::Empty => {}
                    }
                }
                Ok(())
            }
        }
    }

    fn extract_index(
        &mut self,
        parsed: &Index,
        archive_path: &Path,
        data: &[u8],
        out_dir: &Path,
    ) -> Result<()> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating output directory {}", out_dir.display()))?;
        let archive_dir = archive_path.parent().unwrap_or(Path::new("")).to_path_buf();
        let mut used = HashSet::new();
        for entry in &parsed.entries {
            self.extract_entry(entry, archive_path, &archive_dir, data, out_dir, &mut used)?;
        }
        Ok(())
    }

    fn extract_entry(
        &mut self,
        entry: &Entry,
        archive_path: &Path,
        archive_dir: &Path,
        data: &[u8],
        out_dir: &Path,
        used: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        if let Some(skip) = entry.skip {
            let (kind, detail) = match skip {
                SkipReason::UnknownAddressMode(mode) => (
                    DiagKind::UnknownAddressMode(mode),
                    format!("{} has no resolvable source", entry.names.file_name(entry.index)),
                ),
                SkipReason::ExternalDataSet => (
                    DiagKind::ExternalDataSet,
                    "payload lives in an external dataset store".into(),
                ),
                SkipReason::Dummy => (
                    DiagKind::DummyEntry,
                    format!("zeroed pointers with dsize={}", entry.dsize),
                ),
            };
            self.diag(kind, archive_path, Some(entry.index), None, detail);
            return Ok(());
        }

        // Read. Zero-size entries become empty files without touching any
        // source, RDP-backed ones included.
        let stored = if entry.csize == 0 {
            Vec::new()
        } else {
            match read_chunk(entry, data, archive_dir, &mut self.rdp) {
                Chunk::Bytes(bytes) => bytes,
                Chunk::MissingRdp(kind) => {
                    self.diag(
                        DiagKind::MissingRdp(kind),
                        archive_path,
                        Some(entry.index),
                        entry_offset(entry),
                        format!("{kind} not found next to the archive or the driver"),
                    );
                    return Ok(());
                }
                Chunk::Unreadable(detail) => {
                    self.diag(
                        DiagKind::Io,
                        archive_path,
                        Some(entry.index),
                        entry_offset(entry),
                        detail,
                    );
                    return Ok(());
                }
            }
        };

        // Decode. Frame errors fall back to the raw bytes; integrity faults
        // keep the decoded bytes. Both leave a diagnostic behind.
        let mut payload = stored;
        if pres_codecs::detect(&payload).is_some() {
            match pres_codecs::decompress(&payload) {
                Ok(decoded) => {
                    for fault in &decoded.integrity {
                        self.diag(
                            DiagKind::CodecIntegrity,
                            archive_path,
                            Some(entry.index),
                            entry_offset(entry),
                            fault.to_string(),
                        );
                    }
                    payload = decoded.bytes;
                }
                Err(err) => {
                    self.diag(
                        DiagKind::CodecFrame,
                        archive_path,
                        Some(entry.index),
                        entry_offset(entry),
                        format!("{err:#}; raw payload written instead"),
                    );
                }
            }
        }

        // Write.
        let (dirs, leaf) = layout(&entry.names, entry.name_count, entry.index);
        let mut dir = out_dir.to_path_buf();
        dir.extend(&dirs);
        if let Err(err) = fs::create_dir_all(&dir) {
            self.diag(
                DiagKind::Io,
                archive_path,
                Some(entry.index),
                None,
                format!("creating {}: {err}", dir.display()),
            );
            return Ok(());
        }
        let target = unique_target(&dir, &leaf, used);
        if let Err(err) = fs::write(&target, &payload) {
            self.diag(
                DiagKind::Io,
                archive_path,
                Some(entry.index),
                None,
                format!("writing {}: {err}", target.display()),
            );
            return Ok(());
        }
        self.report.files_written += 1;
        tracing::debug!(path = %target.display(), bytes = payload.len(), "extracted");

        // Recurse into nested archives before the next sibling.
        if entry.names.is_archive() && !payload.is_empty() {
            self.recurse(entry, &target, &payload, archive_path)?;
        }
        Ok(())
    }

    fn recurse(
        &mut self,
        entry: &Entry,
        target: &Path,
        payload: &[u8],
        parent: &Path,
    ) -> Result<()> {
        let canon = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
        let digest = md5::compute(payload).0;
        if self.visited_paths.contains(&canon) || self.visited_digests.contains(&digest) {
            self.diag(
                DiagKind::VisitedCycle,
                parent,
                Some(entry.index),
                None,
                format!("{} is already on the extraction stack", target.display()),
            );
            return Ok(());
        }
        self.visited_paths.insert(canon);
        self.visited_digests.insert(digest);

        let nested_out = match (target.parent(), target.file_stem()) {
            (Some(dir), Some(stem)) => dir.join(stem),
            _ => return Ok(()),
        };
        let rtbl = entry
            .names
            .ext
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("rtbl"));
        if let Err(err) = self.extract_archive(target, payload, &nested_out, rtbl) {
            let reason = format!("{err:#}");
            tracing::error!(
                archive = %target.display(),
                error = %reason,
                "nested archive failed to parse"
            );
            self.report
                .nested_failures
                .push((target.to_path_buf(), reason));
        }
        Ok(())
    }

    fn diag(
        &mut self,
        kind: DiagKind,
        archive: &Path,
        entry_index: Option<usize>,
        offset: Option<u64>,
        detail: String,
    ) {
        let diagnostic = Diagnostic {
            kind,
            archive: archive.to_path_buf(),
            entry_index,
            offset,
            detail,
        };
        tracing::warn!("{diagnostic}");
        self.report.diagnostics.push(diagnostic);
    }
}

fn entry_offset(entry: &Entry) -> Option<u64> {
    match entry.address {
        Address::Current { offset, .. } => Some(offset as u64),
        Address::Rdp { offset, .. } => Some(offset),
        _ => None,
    }
}

// ── source resolution ──────────────────────────────────────────────────────

pub(crate) enum Chunk {
    Bytes(Vec<u8>),
    MissingRdp(RdpKind),
    Unreadable(String),
}

/// Read an entry's stored bytes from its resolved source. Callers handle
/// skip-reason entries before getting here.
pub(crate) fn read_chunk(
    entry: &Entry,
    data: &[u8],
    archive_dir: &Path,
    rdp: &mut RdpResolver,
) -> Chunk {
    let len = entry.csize as usize;
    match entry.address {
        Address::Current { offset, .. } => {
            let start = offset as usize;
            match start.checked_add(len) {
                Some(end) if end <= data.len() => Chunk::Bytes(data[start..end].to_vec()),
                _ => Chunk::Unreadable(format!(
                    "payload range {start:#x}+{len} runs past end of archive ({} bytes)",
                    data.len()
                )),
            }
        }
        Address::Rdp { kind, offset } => match rdp.read(kind, archive_dir, offset, len) {
            Ok(Some(bytes)) => Chunk::Bytes(bytes),
            Ok(None) => Chunk::MissingRdp(kind),
            Err(err) => Chunk::Unreadable(format!("{err:#}")),
        },
        _ => Chunk::Unreadable("entry has no readable source".into()),
    }
}

// ── output path rules ──────────────────────────────────────────────────────

/// Directory components and leaf name for one entry, before collision
/// handling.
///
/// `subpath` wins over `path` only for four-slot records. If the active
/// path's terminal component already names the file (`name.ext` checked
/// before bare `name`) it becomes the leaf instead of being duplicated,
/// and `extrapath` is not appended. Components that would escape the output
/// root are dropped.
fn layout(names: &NameRecord, name_count: u32, fallback_index: usize) -> (Vec<String>, String) {
    let file_name = names.file_name(fallback_index);
    let mut dirs: Vec<String> = Vec::new();
    let mut leaf = file_name.clone();
    let mut terminal_is_name = false;

    let active = if name_count == 4 && names.subpath.is_some() {
        names.subpath.as_deref()
    } else {
        names.path.as_deref()
    };
    if let Some(active) = active {
        let parts: Vec<&str> = active
            .split('/')
            .filter(|p| !p.is_empty() && *p != "." && *p != "..")
            .collect();
        if let Some((last, front)) = parts.split_last() {
            if *last == file_name || Some(*last) == names.name.as_deref() {
                terminal_is_name = true;
                dirs.extend(front.iter().map(|p| p.to_string()));
                leaf = (*last).to_string();
            } else {
                dirs.extend(parts.iter().map(|p| p.to_string()));
            }
        }
    }
    if let Some(extra) = names.extrapath.as_deref() {
        if !terminal_is_name {
            dirs.extend(
                extra
                    .split('/')
                    .filter(|p| !p.is_empty() && *p != "." && *p != "..")
                    .map(|p| p.to_string()),
            );
        }
    }
    (dirs, leaf)
}

/// First free path for `leaf` in `dir`: the plain name, then `_0000`,
/// `_0001`, … spliced in before the extension, in enumeration order.
fn unique_target(dir: &Path, leaf: &str, used: &mut HashSet<PathBuf>) -> PathBuf {
    let candidate = dir.join(leaf);
    if !used.contains(&candidate) && !candidate.exists() {
        used.insert(candidate.clone());
        return candidate;
    }
    let (stem, ext) = match leaf.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), Some(ext.to_string())),
        None => (leaf.to_string(), None),
    };
    let mut counter = 0u32;
    loop {
        let numbered = match &ext {
            Some(ext) => format!("{stem}_{counter:04}.{ext}"),
            None => format!("{stem}_{counter:04}"),
        };
        let candidate = dir.join(numbered);
        if !used.contains(&candidate) && !candidate.exists() {
            used.insert(candidate.clone());
            return candidate;
        }
        counter += 1;
    }
}
