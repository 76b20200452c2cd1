//! LZ4 compression for engine state snapshots.
//!
//! Snapshots are JSON under the hood; LZ4 keeps exported blobs small without
//! the CPU cost of a high-ratio codec on what is already cold data.

use crate::error::{ZoneError, ZoneResult};

/// Compress raw snapshot bytes. The uncompressed size is prepended so
/// decompression can allocate exactly once.
pub fn compress_snapshot(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress a snapshot blob produced by [`compress_snapshot`].
pub fn decompress_snapshot(data: &[u8]) -> ZoneResult<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| ZoneError::Snapshot(format!("LZ4 decompress: {}", e)))
}
