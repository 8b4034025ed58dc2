//! Framed-deflate codecs for the Pres archive family.
//!
//! Payloads in `.res`/`.rtbl` archives are stored either raw or wrapped in
//! one of two framings, distinguished by their first four bytes:
//!
//! * [`blz2`]: `"blz2"` tag, then `u16_le length + length bytes of raw
//!   deflate` blocks until the stream ends.
//! * [`blz4`]: `"blz4"` tag, an unpacked-size word, 8 reserved bytes and an
//!   MD5 digest of the decompressed result, then the same block framing.
//!
//! Both framings share one non-obvious rule: when a stream holds two or more
//! blocks, the block stored *first* is the logical *tail* of the output.
//! That reordering lives in [`join_reordered`] and nowhere else.

pub mod blz2;
pub mod blz4;

use std::fmt;
use std::io::{Read, Write};

use anyhow::{ensure, Context, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::DeflateEncoder;

/// Which framing a payload carries, decided by its first four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Blz2,
    Blz4,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::Blz2 => "blz2",
            Compression::Blz4 => "blz4",
        }
    }
}

/// Inspect the leading bytes of a payload for a known codec tag.
pub fn detect(data: &[u8]) -> Option<Compression> {
    if data.starts_with(blz2::TAG) {
        Some(Compression::Blz2)
    } else if data.starts_with(blz4::TAG) {
        Some(Compression::Blz4)
    } else {
        None
    }
}

/// A soft integrity fault found while decoding a `blz4` stream.
///
/// The decoded bytes are still usable; callers decide whether to surface the
/// fault as a diagnostic. Frame errors, by contrast, are hard `Err`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFault {
    UnpackSize { expected: u32, actual: u64 },
    Digest { expected: [u8; 16], actual: [u8; 16] },
}

impl fmt::Display for IntegrityFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityFault::UnpackSize { expected, actual } => write!(
                f,
                "unpack size mismatch: header says {expected} bytes, decoded {actual}"
            ),
            IntegrityFault::Digest { expected, actual } => write!(
                f,
                "md5 mismatch: stored {}, computed {}",
                hex(expected),
                hex(actual)
            ),
        }
    }
}

fn hex(digest: &[u8; 16]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Result of decoding one payload: the bytes plus any soft integrity faults.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub bytes: Vec<u8>,
    pub integrity: Vec<IntegrityFault>,
}

impl Decoded {
    fn clean(bytes: Vec<u8>) -> Self {
        Decoded {
            bytes,
            integrity: Vec::new(),
        }
    }
}

/// Decode a payload, dispatching on its tag.
///
/// Untagged payloads pass through unchanged. Frame errors (bad lengths,
/// truncated blocks, undecodable deflate) are hard errors; `blz4` integrity
/// mismatches are reported in [`Decoded::integrity`] instead.
pub fn decompress(data: &[u8]) -> Result<Decoded> {
    match detect(data) {
        Some(Compression::Blz2) => blz2::decompress(data).map(Decoded::clean),
        Some(Compression::Blz4) => blz4::decompress(data),
        None => Ok(Decoded::clean(data.to_vec())),
    }
}

// ── shared deflate plumbing ────────────────────────────────────────────────

/// Inflate one raw-deflate block (no zlib header, -15 window bits).
pub(crate) fn inflate_raw(block: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(block)
        .read_to_end(&mut out)
        .context("raw deflate block failed to decode")?;
    Ok(out)
}

/// Inflate one zlib-wrapped block. `blz4` streams from older pipelines wrap
/// their blocks this way; [`inflate_auto`] falls back to it.
pub(crate) fn inflate_zlib(block: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(block)
        .read_to_end(&mut out)
        .context("zlib block failed to decode")?;
    Ok(out)
}

/// Raw deflate first, zlib-wrapped on failure.
pub(crate) fn inflate_auto(block: &[u8]) -> Result<Vec<u8>> {
    inflate_raw(block).or_else(|_| {
        inflate_zlib(block).context("block decodes under neither raw nor zlib deflate framing")
    })
}

pub(crate) fn deflate_raw(raw: &[u8]) -> Result<Vec<u8>> {
    let mut enc = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(raw)?;
    Ok(enc.finish()?)
}

/// Join decoded blocks in output order.
///
/// With two or more blocks the stored stream puts the logical tail first:
/// the output is `blocks[1..]` followed by `blocks[0]`. A single block is
/// the whole output.
pub(crate) fn join_reordered(blocks: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::with_capacity(blocks.iter().map(Vec::len).sum());
    let mut blocks = blocks.into_iter();
    let tail = blocks.next().unwrap_or_default();
    for block in blocks {
        out.extend_from_slice(&block);
    }
    out.extend_from_slice(&tail);
    out
}

/// Split `raw` into the stored block order for encoding.
///
/// Inverse of [`join_reordered`]: output-order parts `[s0 .. sk]` are stored
/// as `[sk, s0, .., s(k-1)]` so that a decoder reassembles `raw` bit-exactly.
pub(crate) fn stored_parts<'a>(raw: &'a [u8], block_size: usize) -> Result<Vec<&'a [u8]>> {
    ensure!(block_size > 0, "block size must be non-zero");
    let parts: Vec<&[u8]> = if raw.is_empty() {
        vec![raw]
    } else {
        raw.chunks(block_size).collect()
    };
    let mut stored = Vec::with_capacity(parts.len());
    if let Some((&last, front)) = parts.split_last() {
        stored.push(last);
        stored.extend_from_slice(front);
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_recognizes_both_tags() {
        assert_eq!(detect(b"blz2\x00\x00"), Some(Compression::Blz2));
        assert_eq!(detect(b"blz4rest"), Some(Compression::Blz4));
        assert_eq!(detect(b"PNG\x0d"), None);
        assert_eq!(detect(b"bl"), None);
    }

    #[test]
    fn untagged_payload_passes_through() {
        let decoded = decompress(b"plain bytes").unwrap();
        assert_eq!(decoded.bytes, b"plain bytes");
        assert!(decoded.integrity.is_empty());
    }

    #[test]
    fn reorder_moves_first_block_to_the_tail() {
        let joined = join_reordered(vec![b"X".to_vec(), b"Y".to_vec(), b"Z".to_vec()]);
        assert_eq!(joined, b"YZX");
    }

    #[test]
    fn reorder_single_block_is_identity() {
        assert_eq!(join_reordered(vec![b"only".to_vec()]), b"only");
    }

    #[test]
    fn stored_parts_invert_the_reorder() {
        let raw = b"aabbccd";
        let stored = stored_parts(raw, 2).unwrap();
        assert_eq!(stored, vec![&b"d"[..], &b"aa"[..], &b"bb"[..], &b"cc"[..]]);
        let joined = join_reordered(stored.into_iter().map(|s| s.to_vec()).collect());
        assert_eq!(joined, raw);
    }
}
