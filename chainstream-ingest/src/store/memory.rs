//! In-memory adapter for the block store port.
//!
//! A mutex-guarded `BTreeMap` over the same encoded keyspace as the RocksDB
//! adapter, so range semantics are identical. Used by tests and available
//! for ephemeral runs; nothing survives the process.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    BATCH_PREFIX, BATCH_SCAN_UPPER, BLOCK_PREFIX, BLOCK_SCAN_UPPER, BatchRange, BlockStore,
    META_KEY, batch_key, block_key, parse_batch_key, parse_block_key,
};
use crate::error::Result;

/// Volatile block store over an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn first_key_in(&self, prefix: &str, upper: &str) -> Option<String> {
        self.data
            .lock()
            .range::<str, _>((Bound::Included(prefix), Bound::Excluded(upper)))
            .next()
            .map(|(key, _)| key.clone())
    }

    fn last_key_in(&self, prefix: &str, upper: &str) -> Option<String> {
        self.data
            .lock()
            .range::<str, _>((Bound::Included(prefix), Bound::Excluded(upper)))
            .next_back()
            .map(|(key, _)| key.clone())
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn save_block(&self, number: u64, data: &[u8]) -> Result<()> {
        self.data.lock().insert(block_key(number), data.to_vec());
        Ok(())
    }

    async fn get_block(&self, number: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().get(&block_key(number)).cloned())
    }

    async fn first_block(&self) -> Result<Option<u64>> {
        self.first_key_in(BLOCK_PREFIX, BLOCK_SCAN_UPPER)
            .map(|key| parse_block_key(key.as_bytes()))
            .transpose()
    }

    async fn latest_block(&self) -> Result<Option<u64>> {
        self.last_key_in(BLOCK_PREFIX, BLOCK_SCAN_UPPER)
            .map(|key| parse_block_key(key.as_bytes()))
            .transpose()
    }

    async fn delete_block_range(&self, from: u64, to: u64) -> Result<()> {
        let mut data = self.data.lock();
        for number in from..=to {
            data.remove(&block_key(number));
        }
        Ok(())
    }

    async fn save_batch(&self, start: u64, end: u64, data: &[u8]) -> Result<()> {
        self.data.lock().insert(batch_key(start, end), data.to_vec());
        Ok(())
    }

    async fn get_batch_compressed(&self, start: u64) -> Result<Option<Vec<u8>>> {
        let end = start + chainstream_core::BATCH_SIZE - 1;
        Ok(self.data.lock().get(&batch_key(start, end)).cloned())
    }

    async fn first_batch(&self) -> Result<Option<BatchRange>> {
        self.first_key_in(BATCH_PREFIX, BATCH_SCAN_UPPER)
            .map(|key| parse_batch_key(key.as_bytes()))
            .transpose()
    }

    async fn latest_batch(&self) -> Result<Option<BatchRange>> {
        self.last_key_in(BATCH_PREFIX, BATCH_SCAN_UPPER)
            .map(|key| parse_batch_key(key.as_bytes()))
            .transpose()
    }

    async fn get_meta(&self) -> Result<u64> {
        Ok(self
            .data
            .lock()
            .get(META_KEY)
            .and_then(|raw| raw.as_slice().try_into().ok())
            .map_or(0, u64::from_be_bytes))
    }

    async fn save_meta(&self, number: u64) -> Result<()> {
        self.data
            .lock()
            .insert(META_KEY.into(), number.to_be_bytes().to_vec());
        Ok(())
    }

    async fn block_count(&self) -> Result<u64> {
        match (self.first_block().await?, self.latest_block().await?) {
            (Some(first), Some(latest)) => Ok(latest - first + 1),
            _ => Ok(0),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
