//! The normalized block record.
//!
//! A [`NormalizedBlock`] is the canonical unit exchanged across all
//! Chainstream boundaries: the full chain block (header plus complete
//! transaction objects), one receipt per transaction, and one call-trace
//! entry per transaction.
//!
//! The `block` and `receipts` payloads are carried as raw JSON values so
//! that what was returned by the chain is what gets persisted and served.
//! Traces are typed because downstream consumers walk the call tree.

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ═══════════════════════════════════════════════════════════════════════════════
// NORMALIZED BLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// A chain block combined with its receipts and call traces.
///
/// # Invariants
///
/// - `receipts.len() == traces.len() == block.transactions.len()`
/// - `traces[i].tx_hash == block.transactions[i].hash`
///
/// Both are checked by [`Self::validate`]; the fetcher validates every block
/// before it is emitted downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBlock {
    /// The full block object as returned by `eth_getBlockByNumber(N, true)`.
    pub block: Value,

    /// One receipt per transaction, in transaction order.
    pub receipts: Vec<Value>,

    /// One call-trace entry per transaction, in transaction order.
    pub traces: Vec<TraceEntry>,
}

impl NormalizedBlock {
    /// Parse the block number from the raw block's hex `number` field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedBlock`] if the field is missing or not
    /// a hex quantity.
    pub fn number(&self) -> Result<u64, CoreError> {
        let raw = self
            .block
            .get("number")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MalformedBlock("missing number field".into()))?;
        parse_hex_u64(raw)
    }

    /// Transaction hashes in block order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedBlock`] if the transaction list is
    /// missing, or any entry lacks a parseable `hash`.
    pub fn transaction_hashes(&self) -> Result<Vec<B256>, CoreError> {
        self.transactions()?
            .iter()
            .enumerate()
            .map(|(i, tx)| {
                tx.get("hash")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        CoreError::MalformedBlock(format!("transaction {i} missing hash"))
                    })?
                    .parse::<B256>()
                    .map_err(|e| {
                        CoreError::MalformedBlock(format!("transaction {i} hash: {e}"))
                    })
            })
            .collect()
    }

    /// Number of transactions in the block.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedBlock`] if the transaction list is
    /// missing or not an array.
    pub fn transaction_count(&self) -> Result<usize, CoreError> {
        Ok(self.transactions()?.len())
    }

    /// Check the cross-field invariants of the record.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant: count mismatches between
    /// receipts/traces and transactions, or a trace entry whose hash does
    /// not match the transaction at its position.
    pub fn validate(&self) -> Result<(), CoreError> {
        let hashes = self.transaction_hashes()?;

        if self.receipts.len() != hashes.len() {
            return Err(CoreError::ReceiptCountMismatch {
                receipts: self.receipts.len(),
                transactions: hashes.len(),
            });
        }
        if self.traces.len() != hashes.len() {
            return Err(CoreError::TraceCountMismatch {
                traces: self.traces.len(),
                transactions: hashes.len(),
            });
        }
        for (i, (trace, hash)) in self.traces.iter().zip(&hashes).enumerate() {
            if trace.tx_hash != *hash {
                return Err(CoreError::TraceHashMismatch {
                    index: i,
                    trace_hash: trace.tx_hash.to_string(),
                    tx_hash: hash.to_string(),
                });
            }
        }
        Ok(())
    }

    fn transactions(&self) -> Result<&Vec<Value>, CoreError> {
        self.block
            .get("transactions")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::MalformedBlock("missing transactions array".into()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALL TRACES
// ═══════════════════════════════════════════════════════════════════════════════

/// One `debug_traceBlockByNumber` entry: the traced transaction hash and its
/// call tree.
///
/// `result` is `None` for transactions the tracer could not process (for
/// example precompile internals); the position in the list still identifies
/// the transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    /// Hash of the traced transaction.
    pub tx_hash: B256,

    /// Root frame of the call tree, or `None` if tracing failed.
    #[serde(default)]
    pub result: Option<CallFrame>,
}

/// A single frame of a call trace, as produced by the `callTracer`.
///
/// All quantity and data fields are kept as hex strings exactly as the
/// tracer emitted them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Caller address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Callee address (absent for contract creation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Transferred value (hex quantity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Gas provided to the frame (hex quantity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,

    /// Gas consumed by the frame (hex quantity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,

    /// Call input data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// Call return data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Error message if the frame reverted or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Frame type (`CALL`, `DELEGATECALL`, `CREATE`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,

    /// Nested sub-calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallFrame>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEX QUANTITY PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a hex quantity string (`0x`-prefixed) into a `u64`.
///
/// # Errors
///
/// Returns [`CoreError::MalformedBlock`] for empty or non-hex input.
pub fn parse_hex_u64(value: &str) -> Result<u64, CoreError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    if stripped.is_empty() {
        return Err(CoreError::MalformedBlock(format!(
            "empty hex quantity: {value:?}"
        )));
    }
    u64::from_str_radix(stripped, 16)
        .map_err(|e| CoreError::MalformedBlock(format!("invalid hex quantity {value:?}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HASH_A: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const HASH_B: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    fn trace(hash: &str) -> TraceEntry {
        TraceEntry {
            tx_hash: hash.parse().expect("valid hash"),
            result: Some(CallFrame {
                call_type: Some("CALL".into()),
                ..CallFrame::default()
            }),
        }
    }

    fn sample_block() -> NormalizedBlock {
        NormalizedBlock {
            block: json!({
                "number": "0x64",
                "hash": HASH_A,
                "transactions": [
                    {"hash": HASH_A, "nonce": "0x0"},
                    {"hash": HASH_B, "nonce": "0x1"},
                ],
            }),
            receipts: vec![json!({"status": "0x1"}), json!({"status": "0x0"})],
            traces: vec![trace(HASH_A), trace(HASH_B)],
        }
    }

    #[test]
    fn parse_hex_quantities() {
        assert_eq!(parse_hex_u64("0x0").expect("parse"), 0);
        assert_eq!(parse_hex_u64("0x64").expect("parse"), 100);
        assert_eq!(parse_hex_u64("ff").expect("parse"), 255);
        assert!(parse_hex_u64("0x").is_err());
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn block_number_from_hex_field() {
        assert_eq!(sample_block().number().expect("number"), 100);
    }

    #[test]
    fn block_number_missing_field() {
        let mut block = sample_block();
        block.block = json!({"transactions": []});
        assert!(block.number().is_err());
    }

    #[test]
    fn validate_well_formed_block() {
        sample_block().validate().expect("valid block");
    }

    #[test]
    fn validate_rejects_receipt_count_mismatch() {
        let mut block = sample_block();
        block.receipts.pop();
        assert!(matches!(
            block.validate(),
            Err(CoreError::ReceiptCountMismatch {
                receipts: 1,
                transactions: 2
            })
        ));
    }

    #[test]
    fn validate_rejects_trace_count_mismatch() {
        let mut block = sample_block();
        block.traces.pop();
        assert!(matches!(
            block.validate(),
            Err(CoreError::TraceCountMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_reordered_traces() {
        let mut block = sample_block();
        block.traces.swap(0, 1);
        assert!(matches!(
            block.validate(),
            Err(CoreError::TraceHashMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn validate_accepts_null_trace_result() {
        let mut block = sample_block();
        block.traces[1].result = None;
        block.validate().expect("null result is allowed");
    }

    #[test]
    fn call_frame_serde_round_trip() {
        let json_frame = json!({
            "from": "0x1234567890123456789012345678901234567890",
            "to": "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd",
            "gas": "0x5208",
            "gasUsed": "0x5208",
            "input": "0x",
            "type": "CALL",
            "calls": [
                {"type": "STATICCALL", "gas": "0x100", "gasUsed": "0x80"}
            ]
        });

        let frame: CallFrame = serde_json::from_value(json_frame.clone()).expect("parse");
        assert_eq!(frame.call_type.as_deref(), Some("CALL"));
        assert_eq!(frame.calls.len(), 1);
        assert_eq!(frame.calls[0].call_type.as_deref(), Some("STATICCALL"));

        let back = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(back, json_frame);
    }

    #[test]
    fn trace_entry_serializes_null_result() {
        let entry = TraceEntry {
            tx_hash: HASH_A.parse().expect("valid hash"),
            result: None,
        };
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["result"], Value::Null);
        assert_eq!(value["txHash"], json!(HASH_A));
    }
}
