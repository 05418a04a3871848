//! JSONL + zstd frame codec.
//!
//! Batches on disk and frames on the wire share one encoding: normalized
//! blocks serialized as newline-delimited JSON (every line, including the
//! last, is newline-terminated) and compressed with zstd. Historical frames
//! carry exactly [`BATCH_SIZE`] blocks; live frames carry one.

use crate::block::NormalizedBlock;
use crate::error::CoreError;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of blocks in an aligned batch. Fixed by the storage format.
pub const BATCH_SIZE: u64 = 100;

/// zstd level used everywhere: the fastest one. Throughput beats ratio for a
/// pipeline that compresses on the hot path.
pub const COMPRESSION_LEVEL: i32 = 1;

// ═══════════════════════════════════════════════════════════════════════════════
// ALIGNMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Start of the aligned batch window containing `block`.
#[must_use]
pub const fn batch_start_for(block: u64) -> u64 {
    block - block % BATCH_SIZE
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODEC
// ═══════════════════════════════════════════════════════════════════════════════

/// Compress raw bytes with the pipeline's zstd level.
///
/// # Errors
///
/// Returns an error if zstd fails.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    zstd::encode_all(data, COMPRESSION_LEVEL)
}

/// Decompress a zstd payload.
///
/// # Errors
///
/// Returns an error on truncated or corrupt input.
pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    zstd::decode_all(data)
}

/// Join pre-serialized block payloads into a JSONL document.
#[must_use]
pub fn jsonl_join<I, B>(lines: I) -> Vec<u8>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for line in lines {
        out.extend_from_slice(line.as_ref());
        out.push(b'\n');
    }
    out
}

/// Encode blocks into a compressed frame.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn encode_frame(blocks: &[NormalizedBlock]) -> Result<Vec<u8>, CoreError> {
    let mut jsonl = Vec::new();
    for block in blocks {
        serde_json::to_writer(&mut jsonl, block)?;
        jsonl.push(b'\n');
    }
    Ok(compress(&jsonl)?)
}

/// Decode a compressed frame back into blocks.
///
/// Empty lines (the trailing newline) are skipped.
///
/// # Errors
///
/// Returns an error on corrupt compression or malformed JSON lines.
pub fn decode_frame(data: &[u8]) -> Result<Vec<NormalizedBlock>, CoreError> {
    let jsonl = decompress(data)?;
    jsonl
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| Ok(serde_json::from_slice(line)?))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(number: u64) -> NormalizedBlock {
        NormalizedBlock {
            block: json!({"number": format!("0x{number:x}"), "transactions": []}),
            receipts: vec![],
            traces: vec![],
        }
    }

    #[test]
    fn batch_size_is_aligned_power_of_ten() {
        assert_eq!(BATCH_SIZE, 100);
        assert_eq!(batch_start_for(0), 0);
        assert_eq!(batch_start_for(99), 0);
        assert_eq!(batch_start_for(100), 100);
        assert_eq!(batch_start_for(150), 100);
        assert_eq!(batch_start_for(199), 100);
        assert_eq!(batch_start_for(200), 200);
    }

    #[test]
    fn frame_round_trip() {
        let blocks: Vec<_> = (100..103).map(block).collect();
        let frame = encode_frame(&blocks).expect("encode");
        let decoded = decode_frame(&frame).expect("decode");
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn frame_round_trip_single_block() {
        let blocks = vec![block(42)];
        let decoded = decode_frame(&encode_frame(&blocks).expect("encode")).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].number().expect("number"), 42);
    }

    #[test]
    fn jsonl_is_newline_terminated() {
        let jsonl = jsonl_join([b"{\"a\":1}".as_slice(), b"{\"b\":2}".as_slice()]);
        assert_eq!(jsonl, b"{\"a\":1}\n{\"b\":2}\n");
    }

    #[test]
    fn encode_matches_jsonl_of_serialized_blocks() {
        // The frame payload must equal the newline-joined serializations of
        // the original blocks, so compacting stored individual blocks and
        // encoding in-memory blocks produce identical bytes.
        let blocks: Vec<_> = (0..3).map(block).collect();
        let raw: Vec<Vec<u8>> = blocks
            .iter()
            .map(|b| serde_json::to_vec(b).expect("serialize"))
            .collect();

        let frame = encode_frame(&blocks).expect("encode");
        assert_eq!(decompress(&frame).expect("decompress"), jsonl_join(&raw));
    }

    #[test]
    fn decode_rejects_corrupt_payload() {
        assert!(decode_frame(b"not zstd at all").is_err());
    }

    #[test]
    fn decode_rejects_malformed_line() {
        let payload = compress(b"{\"block\":{},\"receipts\":[]\n").expect("compress");
        assert!(decode_frame(&payload).is_err());
    }
}
