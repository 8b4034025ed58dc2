//! Container parsers: header-bearing archives, localized envelopes, and
//! headerless `.rtbl` tables, all flattened into the same [`Index`] model.
//!
//! Parsing works on an in-memory byte slice with independent cursors; no
//! shared file position is involved. An archive is parsed once and the
//! resulting index is immutable for the duration of extraction.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Result};

use crate::address::Address;
use crate::format::{
    GroupRecord, LocalizedHeader, ResHeader, TocEntry, GROUP_RECORD_SIZE, HEADER_SIZE,
    LOCALIZED_GROUP_COUNT, RTBL_NAME_TABLE_OFFSET, TOC_ENTRY_SIZE,
};
use crate::names::{self, NameRecord};

/// Which header form the root archive (and nested `.res` members) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVariant {
    Original,
    Localized,
}

/// Why an indexed entry will never produce payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Address mode 0x00 or an undocumented mode byte.
    UnknownAddressMode(u8),
    /// Address mode 0x30: payload lives in an external dataset store.
    ExternalDataSet,
    /// Zeroed pointers but a non-zero decompressed size.
    Dummy,
}

/// One fully decoded TOC entry.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Position in enumeration order within the containing index.
    pub index: usize,
    pub raw_offset: u32,
    pub address: Address,
    pub csize: u32,
    pub dsize: u32,
    pub name_count: u32,
    pub names: NameRecord,
    pub skip: Option<SkipReason>,
}

/// Flat, ordered index of one archive or one localized sub-archive.
/// Enumeration order is group order, then intra-group file order; it is the
/// order the extractor walks and therefore fixes collision suffixes.
#[derive(Debug, Clone, Default)]
pub struct Index {
    pub entries: Vec<Entry>,
}

// ── original container (C4) ────────────────────────────────────────────────

/// Parse a header-bearing, non-localized archive.
pub fn parse_res(data: &[u8]) -> Result<Index> {
    let header = ResHeader::from_bytes(data)?;
    let groups = read_group_table(data, header.group_offset, header.group_count as usize)?;
    let mut entries = Vec::new();
    for group in &groups {
        let base = group.entry_offset as usize;
        let len = group.entry_count as usize * TOC_ENTRY_SIZE;
        ensure!(
            base.checked_add(len).is_some_and(|end| end <= data.len()),
            "TOC of {} entries at {:#x} runs past end of file",
            group.entry_count,
            group.entry_offset
        );
        for i in 0..group.entry_count as usize {
            push_entry(data, &data[base + i * TOC_ENTRY_SIZE..][..TOC_ENTRY_SIZE], &mut entries)?;
        }
    }
    Ok(Index { entries })
}

fn read_group_table(data: &[u8], offset: u32, count: usize) -> Result<Vec<GroupRecord>> {
    let base = offset as usize;
    let len = count * GROUP_RECORD_SIZE;
    ensure!(
        base.checked_add(len).is_some_and(|end| end <= data.len()),
        "group table of {count} records at {offset:#x} runs past end of file"
    );
    let mut groups = Vec::with_capacity(count);
    for i in 0..count {
        let record = GroupRecord::from_bytes(&data[base + i * GROUP_RECORD_SIZE..][..GROUP_RECORD_SIZE])?;
        if !record.is_hole() {
            groups.push(record);
        }
    }
    Ok(groups)
}

/// Decode one 32-byte TOC record and append it, dropping tombstones.
///
/// Dummies look like tombstones in their first 16 bytes, so the dummy test
/// (`dsize != 0`) runs first: dummies stay in the index with a skip reason,
/// tombstones vanish.
fn push_entry(data: &[u8], buf: &[u8], entries: &mut Vec<Entry>) -> Result<()> {
    let toc = TocEntry::from_bytes(buf)?;
    if !toc.is_dummy() && TocEntry::is_tombstone(buf) {
        return Ok(());
    }
    let address = Address::decode(toc.raw_offset);
    let skip = if toc.is_dummy() {
        Some(SkipReason::Dummy)
    } else {
        match address {
            Address::Unknown { .. } => Some(SkipReason::UnknownAddressMode(0x00)),
            Address::External { .. } => Some(SkipReason::ExternalDataSet),
            Address::Unsupported { mode, .. } => Some(SkipReason::UnknownAddressMode(mode)),
            Address::Current { .. } | Address::Rdp { .. } => None,
        }
    };
    let names = names::read_name_record(data, toc.name_ptr, toc.name_count)?;
    entries.push(Entry {
        index: entries.len(),
        raw_offset: toc.raw_offset,
        address,
        csize: toc.csize,
        dsize: toc.dsize,
        name_count: toc.name_count,
        names,
        skip,
    });
    Ok(())
}

// ── localized container (C5) ───────────────────────────────────────────────

/// The six languages a country-6 envelope can carry, in on-disk order.
/// Country-3 envelopes carry the first three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Language {
    English,
    French,
    Italian,
    Deutsch,
    Espanol,
    Russian,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::English,
        Language::French,
        Language::Italian,
        Language::Deutsch,
        Language::Espanol,
        Language::Russian,
    ];

    /// Display label, also used as the per-language output directory.
    pub fn label(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::French => "French",
            Language::Italian => "Italian",
            Language::Deutsch => "Deutsch",
            Language::Espanol => "Español",
            Language::Russian => "Russian",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // ASCII spelling accepted alongside the accented label.
        match s.to_ascii_lowercase().as_str() {
            "english" => Ok(Language::English),
            "french" => Ok(Language::French),
            "italian" => Ok(Language::Italian),
            "deutsch" => Ok(Language::Deutsch),
            "español" | "espanol" => Ok(Language::Espanol),
            "russian" => Ok(Language::Russian),
            other => bail!(
                "unknown language {other:?} (expected one of English, French, Italian, \
                 Deutsch, Español, Russian)"
            ),
        }
    }
}

/// One per-language slot of a localized envelope.
#[derive(Debug, Clone)]
pub struct LanguageDataset {
    pub language: Language,
    pub state: DatasetState,
}

#[derive(Debug, Clone)]
pub enum DatasetState {
    Parsed(Index),
    /// Zero `(offset, size)` pair: the slot carries nothing.
    Empty,
    /// Excluded by the caller's language filter; never materialized.
    Filtered,
}

/// Parse result of a localized envelope: either a single direct fileset
/// (country 1) or up to six per-language sub-indexes (countries 3 and 6).
#[derive(Debug, Clone)]
pub struct LocalizedIndex {
    pub country: u32,
    pub direct: Option<Index>,
    pub datasets: Vec<LanguageDataset>,
}

/// Parse a localized envelope. `filter` limits which languages are
/// materialized; filtered slots come back as [`DatasetState::Filtered`].
pub fn parse_localized(data: &[u8], filter: Option<&BTreeSet<Language>>) -> Result<LocalizedIndex> {
    let header = LocalizedHeader::from_bytes(data)?;
    if !header.magic_matches() {
        tracing::warn!(
            magic = header.magic_words[0],
            "localized header magic is non-standard; continuing"
        );
    }
    match header.country {
        1 => {
            let direct = parse_fileset_block(data, header.conf_length)?;
            Ok(LocalizedIndex {
                country: 1,
                direct: Some(direct),
                datasets: Vec::new(),
            })
        }
        country @ (3 | 6) => {
            let languages = &Language::ALL[..country as usize];
            let mut datasets = Vec::with_capacity(languages.len());
            let mut at = HEADER_SIZE;
            for &language in languages {
                ensure!(
                    at + GROUP_RECORD_SIZE <= data.len(),
                    "dataset record for {language} at byte {at} runs past end of file"
                );
                let record = GroupRecord::from_bytes(&data[at..at + GROUP_RECORD_SIZE])?;
                at += GROUP_RECORD_SIZE;
                let state = if record.is_hole() {
                    DatasetState::Empty
                } else if filter.is_some_and(|keep| !keep.contains(&language)) {
                    DatasetState::Filtered
                } else {
                    DatasetState::Parsed(parse_fileset_block(data, record.entry_offset)?)
                };
                datasets.push(LanguageDataset { language, state });
            }
            Ok(LocalizedIndex {
                country,
                direct: None,
                datasets,
            })
        }
        other => bail!("unsupported country code {other} in localized header (expected 1, 3 or 6)"),
    }
}

/// Parse one localized fileset: an 8-record group table at `group_offset`
/// whose counts sum to the number of TOC entries laid out sequentially at
/// `group_offset + 64`.
fn parse_fileset_block(data: &[u8], group_offset: u32) -> Result<Index> {
    let groups = read_group_table(data, group_offset, LOCALIZED_GROUP_COUNT)?;
    let total: usize = groups.iter().map(|g| g.entry_count as usize).sum();
    let base = group_offset as usize + LOCALIZED_GROUP_COUNT * GROUP_RECORD_SIZE;
    ensure!(
        base + total * TOC_ENTRY_SIZE <= data.len(),
        "fileset body of {total} entries at {base:#x} runs past end of file"
    );
    let mut entries = Vec::new();
    for i in 0..total {
        push_entry(data, &data[base + i * TOC_ENTRY_SIZE..][..TOC_ENTRY_SIZE], &mut entries)?;
    }
    Ok(Index { entries })
}

// ── rtbl tables ────────────────────────────────────────────────────────────

/// Scan a headerless `.rtbl` table.
///
/// The stream is probed in 16-byte steps: a 16-byte zero run is padding, and
/// a 32-byte window counts as an entry only when its `name_ptr` field is
/// exactly 0x20, the inline name table that follows each live entry. The
/// cursor advances 32 past an entry, 16 otherwise, so the scan also walks
/// harmlessly across the inline name bytes.
pub fn parse_rtbl(data: &[u8]) -> Result<Index> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + TOC_ENTRY_SIZE <= data.len() {
        let window = &data[pos..pos + TOC_ENTRY_SIZE];
        if TocEntry::is_tombstone(window) {
            pos += 16;
            continue;
        }
        let toc = TocEntry::from_bytes(window)?;
        if toc.name_ptr != RTBL_NAME_TABLE_OFFSET {
            pos += 16;
            continue;
        }
        let names_start = pos + RTBL_NAME_TABLE_OFFSET as usize + toc.name_count as usize * 4;
        let names = names::read_inline_names(data, names_start, toc.name_count);
        let address = Address::decode(toc.raw_offset);
        let skip = match address {
            Address::Unknown { .. } => Some(SkipReason::UnknownAddressMode(0x00)),
            Address::External { .. } => Some(SkipReason::ExternalDataSet),
            Address::Unsupported { mode, .. } => Some(SkipReason::UnknownAddressMode(mode)),
            Address::Current { .. } | Address::Rdp { .. } => None,
        };
        entries.push(Entry {
            index: entries.len(),
            raw_offset: toc.raw_offset,
            address,
            csize: toc.csize,
            dsize: toc.dsize,
            name_count: toc.name_count,
            names,
            skip,
        });
        pos += TOC_ENTRY_SIZE;
    }
    Ok(Index { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MAGIC;

    /// Hand-rolled single-group archive: header, one group record, `toc`
    /// bytes verbatim, then `tail` (name tables, payloads).
    fn archive(toc: &[u8], tail: &[u8]) -> Vec<u8> {
        assert_eq!(toc.len() % TOC_ENTRY_SIZE, 0);
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        data[4..8].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        data[8] = 1;
        // group record at 0x20: TOC at 0x28
        data.extend_from_slice(&((HEADER_SIZE + GROUP_RECORD_SIZE) as u32).to_le_bytes());
        data.extend_from_slice(&((toc.len() / TOC_ENTRY_SIZE) as u32).to_le_bytes());
        data.extend_from_slice(toc);
        data.extend_from_slice(tail);
        data
    }

    fn toc_entry(raw_offset: u32, csize: u32, name_ptr: u32, name_count: u32, dsize: u32) -> Vec<u8> {
        let mut buf = vec![0u8; TOC_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&raw_offset.to_le_bytes());
        buf[4..8].copy_from_slice(&csize.to_le_bytes());
        buf[8..12].copy_from_slice(&name_ptr.to_le_bytes());
        buf[12..16].copy_from_slice(&name_count.to_le_bytes());
        buf[28..32].copy_from_slice(&dsize.to_le_bytes());
        buf
    }

    #[test]
    fn parses_a_minimal_archive() {
        let mut toc = toc_entry(0xC000_0050, 5, 0, 0, 5);
        toc.extend(toc_entry(0x4000_0002, 16, 0, 0, 16));
        let data = archive(&toc, b"hello");
        let index = parse_res(&data).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(
            index.entries[0].address,
            Address::Current {
                offset: 0x50,
                alias: false
            }
        );
        assert!(matches!(index.entries[1].address, Address::Rdp { .. }));
        assert_eq!(index.entries[1].index, 1);
    }

    #[test]
    fn drops_tombstones_keeps_dummies() {
        let mut toc = toc_entry(0, 0, 0, 0, 0); // tombstone
        toc.extend(toc_entry(0, 0, 0, 0, 77)); // dummy
        toc.extend(toc_entry(0xC000_0000, 0, 0, 0, 0));
        let data = archive(&toc, &[]);
        let index = parse_res(&data).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0].skip, Some(SkipReason::Dummy));
        assert_eq!(index.entries[1].skip, None);
    }

    #[test]
    fn marks_skip_modes() {
        let mut toc = toc_entry(0x0000_0001, 4, 0, 0, 4);
        toc.extend(toc_entry(0x3000_0001, 4, 0, 0, 4));
        toc.extend(toc_entry(0x9000_0001, 4, 0, 0, 4));
        let data = archive(&toc, &[]);
        let index = parse_res(&data).unwrap();
        assert_eq!(index.entries[0].skip, Some(SkipReason::UnknownAddressMode(0)));
        assert_eq!(index.entries[1].skip, Some(SkipReason::ExternalDataSet));
        assert_eq!(index.entries[2].skip, Some(SkipReason::UnknownAddressMode(0x90)));
    }

    #[test]
    fn truncated_toc_is_fatal() {
        let toc = toc_entry(0xC000_0000, 4, 0, 0, 4);
        let mut data = archive(&toc, &[]);
        data.truncate(data.len() - 8);
        assert!(parse_res(&data).is_err());
    }

    #[test]
    fn truncated_group_table_is_fatal() {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        data[4..8].copy_from_slice(&0x1000u32.to_le_bytes()); // far past EOF
        data[8] = 2;
        assert!(parse_res(&data).is_err());
    }

    #[test]
    fn hole_groups_contribute_nothing() {
        // Two group records: a hole, then one real group.
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        data[4..8].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        data[8] = 2;
        data.extend_from_slice(&[0u8; GROUP_RECORD_SIZE]); // hole
        let toc_at = HEADER_SIZE + 2 * GROUP_RECORD_SIZE;
        data.extend_from_slice(&(toc_at as u32).to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&toc_entry(0xC000_0000, 0, 0, 0, 0));
        let index = parse_res(&data).unwrap();
        assert_eq!(index.entries.len(), 1);
    }

    #[test]
    fn rtbl_scan_finds_aligned_entries() {
        // [16 bytes padding][entry + inline names padded to 16][entry...]
        let mut data = vec![0u8; 16];
        let mut entry = toc_entry(0xC000_0080, 4, RTBL_NAME_TABLE_OFFSET, 2, 4);
        entry.extend_from_slice(&[0u8; 8]); // two ignored pointer slots
        entry.extend_from_slice(b"boot\0bin\0");
        entry.resize(64, 0); // pad so the scan lands on the next entry
        data.extend_from_slice(&entry);
        data.extend_from_slice(&toc_entry(0xC000_0100, 2, RTBL_NAME_TABLE_OFFSET, 0, 2));
        let index = parse_rtbl(&data).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0].names.name.as_deref(), Some("boot"));
        assert_eq!(index.entries[0].names.ext.as_deref(), Some("bin"));
        assert_eq!(index.entries[1].names, NameRecord::default());
    }

    #[test]
    fn rtbl_scan_skips_non_entries() {
        // A window with a name_ptr that is not 0x20 is stepped over.
        let mut data = toc_entry(0xC000_0000, 4, 0x99, 1, 4);
        data.extend_from_slice(&[0u8; 32]);
        let index = parse_rtbl(&data).unwrap();
        assert!(index.entries.is_empty());
    }

    #[test]
    fn language_labels_and_parsing() {
        assert_eq!("espanol".parse::<Language>().unwrap(), Language::Espanol);
        assert_eq!("Español".parse::<Language>().unwrap(), Language::Espanol);
        assert_eq!(Language::Espanol.label(), "Español");
        assert!("klingon".parse::<Language>().is_err());
        assert_eq!(&Language::ALL[..3], &[Language::English, Language::French, Language::Italian]);
    }
}
