//! On-disk layout of the Pres container family.
//!
//! All integers are little-endian. Two header forms share the same 32-byte
//! footprint: the original archive header and the localized envelope.
//! `.rtbl` tables carry no header at all: they are a bare run of TOC
//! entries and are recognized structurally (see `index::parse_rtbl`).

use anyhow::{bail, ensure, Result};

/// `"Pres"` read as a little-endian u32.
pub const MAGIC: u32 = 0x7365_7250;

/// Fixed size of both header forms in bytes.
///   magic:u32 + group_offset:u32 + group_count:u8 + reserved:u32
///   + _pad[3] + configs_offset:u32 + _pad[12] = 32
pub const HEADER_SIZE: usize = 32;

/// Size of one group-table record: offset:u32 + count:u32.
pub const GROUP_RECORD_SIZE: usize = 8;

/// Size of one table-of-contents entry in bytes.
///   raw_offset:u32 + csize:u32 + name_ptr:u32 + name_count:u32
///   + reserved[12] + dsize:u32 = 32
pub const TOC_ENTRY_SIZE: usize = 32;

/// Positional name slots per entry: name, type, path, subpath, extrapath.
pub const NAME_SLOTS: usize = 5;

/// RDP-backed offsets count in 2 KiB sectors.
pub const SECTOR_SIZE: u64 = 0x800;

/// Localized sub-archives always carry an 8-record group table.
pub const LOCALIZED_GROUP_COUNT: usize = 8;

/// In `.rtbl` tables a live entry's name table sits inline at this offset
/// from the entry itself; anything else means "not an entry here".
pub const RTBL_NAME_TABLE_OFFSET: u32 = 0x20;

pub(crate) fn u32_at(buf: &[u8], at: usize) -> Result<u32> {
    ensure!(
        at + 4 <= buf.len(),
        "u32 read at byte {at} runs past end of buffer ({} bytes)",
        buf.len()
    );
    Ok(u32::from_le_bytes([
        buf[at],
        buf[at + 1],
        buf[at + 2],
        buf[at + 3],
    ]))
}

// ── original header ────────────────────────────────────────────────────────

/// Decoded 32-byte header of a non-localized archive.
#[derive(Debug, Clone)]
pub struct ResHeader {
    pub group_offset: u32,
    pub group_count: u8,
    pub reserved: u32,
    pub configs_offset: u32,
}

impl ResHeader {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        ensure!(
            buf.len() >= HEADER_SIZE,
            "file of {} bytes is too short for a {HEADER_SIZE}-byte archive header",
            buf.len()
        );
        let magic = u32_at(buf, 0)?;
        if magic != MAGIC {
            bail!("bad archive magic: expected {MAGIC:#010x} (\"Pres\"), got {magic:#010x}");
        }
        Ok(Self {
            group_offset: u32_at(buf, 4)?,
            group_count: buf[8],
            reserved: u32_at(buf, 9)?,
            configs_offset: u32_at(buf, 16)?,
        })
    }
}

// ── localized header ───────────────────────────────────────────────────────

/// Decoded 32-byte header of a localized envelope: four magic words, the
/// config-section length, and a country code (1, 3 or 6).
#[derive(Debug, Clone)]
pub struct LocalizedHeader {
    pub magic_words: [u32; 4],
    pub conf_length: u32,
    pub country: u32,
}

impl LocalizedHeader {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        ensure!(
            buf.len() >= HEADER_SIZE,
            "file of {} bytes is too short for a {HEADER_SIZE}-byte localized header",
            buf.len()
        );
        Ok(Self {
            magic_words: [
                u32_at(buf, 0)?,
                u32_at(buf, 4)?,
                u32_at(buf, 8)?,
                u32_at(buf, 12)?,
            ],
            conf_length: u32_at(buf, 16)?,
            country: u32_at(buf, 28)?,
        })
    }

    /// The corpus always opens with `"Pres"`; a mismatch is only a warning.
    pub fn magic_matches(&self) -> bool {
        self.magic_words[0] == MAGIC
    }
}

// ── group table ────────────────────────────────────────────────────────────

/// One record of the group table: where a group's TOC slice starts and how
/// many 32-byte entries it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRecord {
    pub entry_offset: u32,
    pub entry_count: u32,
}

impl GroupRecord {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            entry_offset: u32_at(buf, 0)?,
            entry_count: u32_at(buf, 4)?,
        })
    }

    /// All-zero records are holes and contribute no entries.
    pub fn is_hole(&self) -> bool {
        self.entry_offset == 0 && self.entry_count == 0
    }
}

// ── TOC entry ──────────────────────────────────────────────────────────────

/// Raw fields of one 32-byte TOC entry, before address decoding.
#[derive(Debug, Clone, Copy)]
pub struct TocEntry {
    /// Top byte = address mode, low 24 bits = encoded offset body.
    pub raw_offset: u32,
    /// Stored (possibly compressed) payload size.
    pub csize: u32,
    /// Absolute file offset of the name-pointer array.
    pub name_ptr: u32,
    /// Number of name-pointer slots, 0..=5.
    pub name_count: u32,
    /// Decompressed size; equals `csize` for uncompressed payloads.
    pub dsize: u32,
}

impl TocEntry {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        ensure!(
            buf.len() >= TOC_ENTRY_SIZE,
            "short TOC entry: {} of {TOC_ENTRY_SIZE} bytes",
            buf.len()
        );
        Ok(Self {
            raw_offset: u32_at(buf, 0)?,
            csize: u32_at(buf, 4)?,
            name_ptr: u32_at(buf, 8)?,
            name_count: u32_at(buf, 12)?,
            dsize: u32_at(buf, 28)?,
        })
    }

    /// An entry whose first 16 bytes are zero is a tombstone and is dropped
    /// at parse time.
    pub fn is_tombstone(buf: &[u8]) -> bool {
        buf.len() >= 16 && buf[..16].iter().all(|&b| b == 0)
    }

    /// Zeroed pointers with a non-zero decompressed size: indexed, but
    /// carries no payload.
    pub fn is_dummy(&self) -> bool {
        self.raw_offset == 0
            && self.csize == 0
            && self.name_ptr == 0
            && self.name_count == 0
            && self.dsize != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res_header_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&0x20u32.to_le_bytes());
        buf[8] = 3;
        buf[16..20].copy_from_slice(&0x1000u32.to_le_bytes());
        buf
    }

    #[test]
    fn header_round_trip_fields() {
        let header = ResHeader::from_bytes(&res_header_bytes()).unwrap();
        assert_eq!(header.group_offset, 0x20);
        assert_eq!(header.group_count, 3);
        assert_eq!(header.configs_offset, 0x1000);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut buf = res_header_bytes();
        buf[0] = b'X';
        assert!(ResHeader::from_bytes(&buf).is_err());
    }

    #[test]
    fn header_rejects_short_input() {
        assert!(ResHeader::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn localized_header_reads_country() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[16..20].copy_from_slice(&0x40u32.to_le_bytes());
        buf[28..32].copy_from_slice(&3u32.to_le_bytes());
        let header = LocalizedHeader::from_bytes(&buf).unwrap();
        assert!(header.magic_matches());
        assert_eq!(header.conf_length, 0x40);
        assert_eq!(header.country, 3);
    }

    #[test]
    fn toc_entry_fields_and_flags() {
        let mut buf = vec![0u8; TOC_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&0xC000_0060u32.to_le_bytes());
        buf[4..8].copy_from_slice(&5u32.to_le_bytes());
        buf[8..12].copy_from_slice(&0x80u32.to_le_bytes());
        buf[12..16].copy_from_slice(&2u32.to_le_bytes());
        buf[28..32].copy_from_slice(&5u32.to_le_bytes());
        let toc = TocEntry::from_bytes(&buf).unwrap();
        assert_eq!(toc.raw_offset, 0xC000_0060);
        assert_eq!(toc.csize, 5);
        assert_eq!(toc.name_ptr, 0x80);
        assert_eq!(toc.name_count, 2);
        assert_eq!(toc.dsize, 5);
        assert!(!TocEntry::is_tombstone(&buf));
        assert!(!toc.is_dummy());

        let mut dummy = vec![0u8; TOC_ENTRY_SIZE];
        dummy[28..32].copy_from_slice(&9u32.to_le_bytes());
        assert!(TocEntry::is_tombstone(&dummy));
        assert!(TocEntry::from_bytes(&dummy).unwrap().is_dummy());
    }
}
