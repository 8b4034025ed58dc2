//! The `blz2` framing: a 4-byte tag, then a run of `u16_le length` + raw
//! deflate blocks until the stream is consumed. Zero-length fields are
//! skipped. See the crate docs for the block reordering rule.

use anyhow::{bail, ensure, Context, Result};

use crate::{deflate_raw, inflate_raw, join_reordered, stored_parts};

pub const TAG: &[u8; 4] = b"blz2";

/// Decode a complete `blz2` stream.
///
/// Hard errors: missing tag, a dangling length byte, a block running past
/// the end of the stream, a deflate failure, or a stream that yields no
/// blocks at all.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let Some(body) = data.strip_prefix(TAG.as_slice()) else {
        bail!("payload does not start with the blz2 tag");
    };

    let mut blocks = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        ensure!(
            body.len() - pos >= 2,
            "dangling length byte at stream offset {}",
            TAG.len() + pos
        );
        let len = u16::from_le_bytes([body[pos], body[pos + 1]]) as usize;
        pos += 2;
        if len == 0 {
            continue;
        }
        ensure!(
            pos + len <= body.len(),
            "block of {len} bytes at stream offset {} runs past end of stream",
            TAG.len() + pos
        );
        let block = inflate_raw(&body[pos..pos + len])
            .with_context(|| format!("block {} failed to inflate", blocks.len()))?;
        blocks.push(block);
        pos += len;
    }

    if blocks.is_empty() {
        bail!("blz2 stream holds no blocks");
    }
    Ok(join_reordered(blocks))
}

/// Encode `raw` as a `blz2` stream, splitting it into `block_size`-byte
/// output blocks. Inverts [`decompress`] bit-exactly, including the
/// tail-first stored order.
pub fn compress(raw: &[u8], block_size: usize) -> Result<Vec<u8>> {
    let mut out = TAG.to_vec();
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
