//! Structured diagnostics for best-effort conditions.
//!
//! Only `InvalidHeader`-class and truncated-structure conditions abort an
//! archive, and those travel as ordinary `anyhow` errors. Everything else is
//! per-entry: the extractor records a [`Diagnostic`] and moves on, so that
//! every index entry yields exactly one output file or exactly one
//! diagnostic, never both and never neither.

use std::fmt;
use std::path::PathBuf;

use crate::address::RdpKind;
use crate::index::Language;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagKind {
    /// Mode 0x00 or an undocumented address-mode byte.
    UnknownAddressMode(u8),
    /// Mode 0x30: the payload lives in an external dataset store.
    ExternalDataSet,
    /// Indexed entry with zeroed pointers and a non-zero decompressed size.
    DummyEntry,
    /// The entry is RDP-backed but the store was not found.
    MissingRdp(RdpKind),
    /// Bad blz2/blz4 framing; the raw payload was written instead.
    CodecFrame,
    /// blz4 MD5 / unpack-size mismatch; the decoded payload was written.
    CodecIntegrity,
    /// Filesystem or read failure for this entry.
    Io,
    /// The nested archive is already on the recursion stack.
    VisitedCycle,
    /// A localized sub-archive excluded by the language filter.
    SkippedLanguage(Language),
}

impl DiagKind {
    pub fn name(&self) -> &'static str {
        match self {
            DiagKind::UnknownAddressMode(_) => "UnknownAddressMode",
            DiagKind::ExternalDataSet => "ExternalDataSet",
            DiagKind::DummyEntry => "DummyEntry",
            DiagKind::MissingRdp(_) => "MissingRdp",
            DiagKind::CodecFrame => "CodecFrameError",
            DiagKind::CodecIntegrity => "CodecIntegrityError",
            DiagKind::Io => "IoError",
            DiagKind::VisitedCycle => "VisitedCycle",
            DiagKind::SkippedLanguage(_) => "SkippedLanguage",
        }
    }
}

impl fmt::Display for DiagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagKind::UnknownAddressMode(mode) => write!(f, "UnknownAddressMode({mode:#04x})"),
            DiagKind::MissingRdp(kind) => write!(f, "MissingRdp({kind})"),
            DiagKind::SkippedLanguage(language) => write!(f, "Skipped({language})"),
            other => f.write_str(other.name()),
        }
    }
}

/// One best-effort fault, with enough context to find it again: which
/// archive, which entry, which byte offset.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub archive: PathBuf,
    pub entry_index: Option<usize>,
    pub offset: Option<u64>,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.archive.display())?;
        if let Some(index) = self.entry_index {
            write!(f, " entry #{index}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " @{offset:#x}")?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}
