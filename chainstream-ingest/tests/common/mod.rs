//! Shared fixtures for integration tests.

use chainstream_core::frame;

/// Serialized normalized block with the given number and no transactions.
pub fn block_payload(number: u64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "block": {"number": format!("0x{number:x}"), "transactions": []},
        "receipts": [],
        "traces": [],
    }))
    .expect("serialize block payload")
}

/// Compressed batch payload covering `range`, byte-identical to what the
/// compactor writes for the same blocks.
#[allow(dead_code)]
pub fn compressed_batch(range: std::ops::RangeInclusive<u64>) -> Vec<u8> {
    let payloads: Vec<Vec<u8>> = range.map(block_payload).collect();
    frame::compress(&frame::jsonl_join(&payloads)).expect("compress batch")
}
