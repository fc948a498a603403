//! Content-defined chunking of item content.
//!
//! Boundaries are content-defined (FastCDC), so editing the middle of a
//! large payload leaves the chunks before and after the edit byte-identical.
//! Combined with deterministic chunk encryption this lets the sync layer
//! skip re-uploading unchanged chunks across revisions.

use fastcdc::v2020::FastCDC;

/// Minimum chunk size
pub const MIN_CHUNK_SIZE: u32 = 16 * 1024;
/// Target (average) chunk size
pub const AVG_CHUNK_SIZE: u32 = 32 * 1024;
/// Maximum chunk size
pub const MAX_CHUNK_SIZE: u32 = 128 * 1024;

/// Split `content` into content-defined chunks.
///
/// Deterministic: the same input always produces the same boundaries. A
/// payload smaller than the minimum chunk size yields exactly one chunk, and
/// empty content yields a single empty chunk so every revision has at least
/// one chunk to anchor its MAC.
pub fn split(content: &[u8]) -> Vec<&[u8]> {
    if content.is_empty() {
        return vec![content];
    }

    FastCDC::new(content, MIN_CHUNK_SIZE, AVG_CHUNK_SIZE, MAX_CHUNK_SIZE)
        .map(|c| &content[c.offset..c.offset + c.length])
        .collect()
}
