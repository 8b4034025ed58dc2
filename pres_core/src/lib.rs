//! Reader for the Pres archive container family (`.res` / `.rtbl`).
//!
//! An archive is a tree of payloads indexed by a three-level structure
//! (group table → TOC entries → name records). Payload bytes live inside
//! the archive itself or in one of three sibling bulk stores
//! (`package.rdp` / `data.rdp` / `patch.rdp`), raw or wrapped in the
//! `blz2`/`blz4` framings from [`pres_codecs`]. Extracted payloads are often
//! archives themselves, so extraction is depth-first and recursive.

pub mod address;
pub mod diag;
pub mod extract;
pub mod format;
pub mod index;
pub mod names;
pub mod preload;
pub mod rdp;

pub use address::{Address, RdpKind};
pub use diag::{DiagKind, Diagnostic};
pub use extract::{extract, Environment, Report};
pub use index::{Entry, HeaderVariant, Index, Language, LocalizedIndex};
pub use names::NameRecord;
