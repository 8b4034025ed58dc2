//! The `blz4` framing: a 4-byte tag, `u32_le` unpacked size, 8 reserved
//! bytes, the MD5 of the decompressed result, then the same block framing as
//! `blz2` with one extra terminator form: a zero length field turns every
//! remaining byte into a single trailer block.
//!
//! Blocks from older pipelines are zlib-wrapped instead of raw deflate;
//! inflation tries raw first and falls back to wrapped.

use anyhow::{bail, ensure, Result};

use crate::{deflate_raw, inflate_auto, join_reordered, stored_parts, Decoded, IntegrityFault};

pub const TAG: &[u8; 4] = b"blz4";

/// Tag + unpack size + 8 reserved + 16-byte MD5 digest.
const HEADER_LEN: usize = 32;

/// Decode a complete `blz4` stream.
///
/// Frame errors are hard `Err`s. Integrity mismatches (unpack size, MD5)
/// are soft: the decoded bytes come back with the faults listed alongside.
pub fn decompress(data: &[u8]) -> Result<Decoded> {
    if !data.starts_with(TAG) {
        bail!("payload does not start with the blz4 tag");
    }
    ensure!(
        data.len() >= HEADER_LEN,
        "blz4 stream of {} bytes is shorter than its {HEADER_LEN}-byte header",
        data.len()
    );
    let unpack_size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&data[16..32]);

    let mut stored: Vec<&[u8]> = Vec::new();
    let mut pos = HEADER_LEN;
    while pos < data.len() {
        ensure!(
            data.len() - pos >= 2,
            "dangling length byte at stream offset {pos}"
        );
        let len = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;
        if len == 0 {
            // Explicit terminator: the rest of the stream is one trailer block.
            if pos < data.len() {
                stored.push(&data[pos..]);
            }
            break;
        }
        ensure!(
            pos + len <= data.len(),
            "block of {len} bytes at stream offset {pos} runs past end of stream"
        );
        stored.push(&data[pos..pos + len]);
        pos += len;
    }
    if stored.is_empty() {
        bail!("blz4 stream holds no blocks");
    }

    let mut blocks = Vec::with_capacity(stored.len());
    for block in stored {
        blocks.push(inflate_auto(block)?);
    }
    let bytes = join_reordered(blocks);

    let mut integrity = Vec::new();
    if bytes.len() as u64 != unpack_size as u64 {
        integrity.push(IntegrityFault::UnpackSize {
            expected: unpack_size,
            actual: bytes.len() as u64,
        });
    }
    let computed = md5::compute(&bytes).0;
    if computed != digest {
        integrity.push(IntegrityFault::Digest {
            expected: digest,
            actual: computed,
        });
    }
    Ok(Decoded { bytes, integrity })
}

/// Encode `raw` as a `blz4` stream with a correct size word and digest,
/// splitting it into `block_size`-byte output blocks. The stream ends at
/// end-of-data (no zero terminator); [`decompress`] accepts both forms.
pub fn compress(raw: &[u8], block_size: usize) -> Result<Vec<u8>> {
    ensure!(
        raw.len() <= u32::MAX as usize,
        "input of {} bytes does not fit the blz4 size field",
        raw.len()
    );
    let mut out = TAG.to_vec();
    out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&md5::compute(raw).0);
    for part in stored_parts(raw, block_size)? {
        let packed = deflate_raw(part)?;
        ensure!(
            packed.len() <= u16::MAX as usize,
            "deflated block of {} bytes does not fit a u16 length field",
            packed.len()
        );
        out.extend_from_slice(&(packed.len() as u16).to_le_bytes());
        out.extend_from_slice(&packed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflate_zlib;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn header(unpack_size: u32, digest: [u8; 16]) -> Vec<u8> {
        let mut out = TAG.to_vec();
        out.extend_from_slice(&unpack_size.to_le_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&digest);
        out
    }

    fn push_block(out: &mut Vec<u8>, raw: &[u8]) {
        let packed = deflate_raw(raw).unwrap();
        out.extend_from_slice(&(packed.len() as u16).to_le_bytes());
        out.extend_from_slice(&packed);
    }

    #[test]
    fn two_blocks_decode_tail_first() {
        let mut data = header(11, md5::compute(b"HELLO WORLD").0);
        push_block(&mut data, b"WORLD");
        push_block(&mut data, b"HELLO ");
        let decoded = decompress(&data).unwrap();
        assert_eq!(decoded.bytes, b"HELLO WORLD");
        assert!(decoded.integrity.is_empty());
    }

    #[test]
    fn digest_mismatch_is_soft() {
        let mut digest = md5::compute(b"HELLO WORLD").0;
        digest[0] ^= 1;
        let mut data = header(11, digest);
        push_block(&mut data, b"WORLD");
        push_block(&mut data, b"HELLO ");
        let decoded = decompress(&data).unwrap();
        assert_eq!(decoded.bytes, b"HELLO WORLD");
        assert_eq!(decoded.integrity.len(), 1);
        assert!(matches!(decoded.integrity[0], IntegrityFault::Digest { .. }));
    }

    #[test]
    fn unpack_size_mismatch_is_soft() {
        let mut data = header(99, md5::compute(b"four").0);
        push_block(&mut data, b"four");
        let decoded = decompress(&data).unwrap();
        assert_eq!(decoded.bytes, b"four");
        assert_eq!(
            decoded.integrity,
            vec![IntegrityFault::UnpackSize {
                expected: 99,
                actual: 4
            }]
        );
    }

    #[test]
    fn zero_length_field_makes_a_trailer_block() {
        let mut data = header(11, md5::compute(b"HELLO WORLD").0);
        push_block(&mut data, b"WORLD");
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&deflate_raw(b"HELLO ").unwrap());
        let decoded = decompress(&data).unwrap();
        assert_eq!(decoded.bytes, b"HELLO WORLD");
        assert!(decoded.integrity.is_empty());
    }

    #[test]
    fn zlib_wrapped_blocks_are_accepted() {
        let wrap = |raw: &[u8]| {
            let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(raw).unwrap();
            enc.finish().unwrap()
        };
        // Sanity: these really are zlib frames, not raw deflate.
        assert!(inflate_zlib(&wrap(b"x")).is_ok());

        let mut data = header(11, md5::compute(b"HELLO WORLD").0);
        for raw in [&b"WORLD"[..], &b"HELLO "[..]] {
            let packed = wrap(raw);
            data.extend_from_slice(&(packed.len() as u16).to_le_bytes());
            data.extend_from_slice(&packed);
        }
        let decoded = decompress(&data).unwrap();
        assert_eq!(decoded.bytes, b"HELLO WORLD");
        assert!(decoded.integrity.is_empty());
    }

    #[test]
    fn truncated_header_is_an_error() {
        assert!(decompress(b"blz4\x0b\x00\x00\x00").is_err());
    }

    #[test]
    fn empty_block_list_is_an_error() {
        let data = header(0, md5::compute(b"").0);
        assert!(decompress(&data).is_err());
    }

    #[test]
    fn round_trips_with_digest() {
        let raw: Vec<u8> = (0u32..20_000).map(|i| (i * 7 % 253) as u8).collect();
        for block_size in [64usize, 4096, raw.len()] {
            let packed = compress(&raw, block_size).unwrap();
            let decoded = decompress(&packed).unwrap();
            assert_eq!(decoded.bytes, raw, "block_size={block_size}");
            assert!(decoded.integrity.is_empty(), "block_size={block_size}");
        }
    }
}
