//! Lazy, session-cached access to the three sibling bulk stores.
//!
//! An RDP-backed entry names `package.rdp`, `data.rdp` or `patch.rdp`;
//! the store is searched next to the archive being parsed first, then next
//! to the driver binary. Handles (and misses) are cached by resolved path
//! for the whole extraction session.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::address::RdpKind;

pub struct RdpResolver {
    /// Fallback searched after the archive's own directory.
    program_dir: Option<PathBuf>,
    open: HashMap<PathBuf, File>,
    missing: HashSet<PathBuf>,
}

impl RdpResolver {
    pub fn new(program_dir: Option<PathBuf>) -> Self {
        Self {
            program_dir,
            open: HashMap::new(),
            missing: HashSet::new(),
        }
    }

    /// Resolve `kind` relative to `archive_dir` and read `len` bytes at
    /// `offset`. `Ok(None)` means the store does not exist anywhere on the
    /// search path; short reads and open failures are errors.
    pub fn read(
        &mut self,
        kind: RdpKind,
        archive_dir: &Path,
        offset: u64,
        len: usize,
    ) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.resolve(kind, archive_dir) else {
            return Ok(None);
        };
        if !self.open.contains_key(&path) {
            let file =
                File::open(&path).with_context(|| format!("opening {}", path.display()))?;
            self.open.insert(path.clone(), file);
        }
        let file = self
            .open
            .get_mut(&path)
            .context("rdp handle vanished from the cache")?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).with_context(|| {
            format!(
                "reading {len} bytes at {offset:#x} from {}",
                path.display()
            )
        })?;
        Ok(Some(buf))
    }

    /// First existing candidate on the search path, remembering misses so a
    /// store absent from disk is probed once per directory, not per entry.
    fn resolve(&mut self, kind: RdpKind, archive_dir: &Path) -> Option<PathBuf> {
        let mut candidates = vec![archive_dir.join(kind.file_name())];
        if let Some(dir) = &self.program_dir {
            candidates.push(dir.join(kind.file_name()));
        }
        for candidate in candidates {
            if self.open.contains_key(&candidate) {
                return Some(candidate);
            }
            if self.missing.contains(&candidate) {
                continue;
            }
            if candidate.is_file() {
                return Some(candidate);
            }
            self.missing.insert(candidate);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_store_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut rdp = RdpResolver::new(None);
        assert!(rdp
            .read(RdpKind::Data, dir.path(), 0, 4)
            .unwrap()
            .is_none());
    }

    #[test]
    fn archive_dir_wins_over_program_dir() {
        let archive_dir = tempfile::tempdir().unwrap();
        let program_dir = tempfile::tempdir().unwrap();
        std::fs::write(archive_dir.path().join("data.rdp"), b"near").unwrap();
        std::fs::write(program_dir.path().join("data.rdp"), b"far_").unwrap();
        let mut rdp = RdpResolver::new(Some(program_dir.path().to_path_buf()));
        let bytes = rdp
            .read(RdpKind::Data, archive_dir.path(), 0, 4)
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"near");
    }

    #[test]
    fn falls_back_to_program_dir() {
        let archive_dir = tempfile::tempdir().unwrap();
        let program_dir = tempfile::tempdir().unwrap();
        std::fs::write(program_dir.path().join("patch.rdp"), b"abcdef").unwrap();
        let mut rdp = RdpResolver::new(Some(program_dir.path().to_path_buf()));
        let bytes = rdp
            .read(RdpKind::Patch, archive_dir.path(), 2, 3)
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"cde");
    }

    #[test]
    fn short_read_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.rdp"), b"tiny").unwrap();
        let mut rdp = RdpResolver::new(None);
        assert!(rdp.read(RdpKind::Package, dir.path(), 0, 64).is_err());
    }
}
