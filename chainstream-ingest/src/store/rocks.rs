//! RocksDB adapter for the block store port.
//!
//! One database, one (default) column family, three key families separated
//! by prefix. Every write goes out with `sync = true` so an acknowledged
//! write survives process death; the resume policy depends on that.

use std::path::Path;

use async_trait::async_trait;
use rocksdb::{DB, Direction, IteratorMode, Options, WriteBatch, WriteOptions};
use tracing::info;

use super::{
    BATCH_PREFIX, BATCH_SCAN_UPPER, BLOCK_PREFIX, BLOCK_SCAN_UPPER, BatchRange, BlockStore,
    META_KEY, batch_key, block_key, parse_batch_key, parse_block_key,
};
use crate::error::{InfraError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// ROCKSDB STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable block store backed by RocksDB.
pub struct RocksStore {
    /// RocksDB database instance.
    db: DB,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path.as_ref()).map_err(InfraError::Store)?;
        info!(path = %path.as_ref().display(), "Opened block store");

        Ok(Self { db })
    }

    /// Write options with the durability barrier enabled.
    fn sync_writes() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    /// First key of a family in iteration order.
    fn first_key(&self, prefix: &str) -> Result<Option<Box<[u8]>>> {
        let mut iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        match iter.next() {
            Some(entry) => {
                let (key, _) = entry.map_err(InfraError::Store)?;
                Ok(key.starts_with(prefix.as_bytes()).then_some(key))
            }
            None => Ok(None),
        }
    }

    /// Last key of a family, found by seeking backwards from the family's
    /// exclusive upper bound.
    fn last_key(&self, prefix: &str, scan_upper: &str) -> Result<Option<Box<[u8]>>> {
        let mut iter = self
            .db
            .iterator(IteratorMode::From(scan_upper.as_bytes(), Direction::Reverse));
        match iter.next() {
            Some(entry) => {
                let (key, _) = entry.map_err(InfraError::Store)?;
                Ok(key.starts_with(prefix.as_bytes()).then_some(key))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BlockStore for RocksStore {
    async fn save_block(&self, number: u64, data: &[u8]) -> Result<()> {
        self.db
            .put_opt(block_key(number), data, &Self::sync_writes())
            .map_err(InfraError::Store)?;
        Ok(())
    }

    async fn get_block(&self, number: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(block_key(number)).map_err(InfraError::Store)?)
    }

    async fn first_block(&self) -> Result<Option<u64>> {
        self.first_key(BLOCK_PREFIX)?
            .map(|key| parse_block_key(&key))
            .transpose()
    }

    async fn latest_block(&self) -> Result<Option<u64>> {
        self.last_key(BLOCK_PREFIX, BLOCK_SCAN_UPPER)?
            .map(|key| parse_block_key(&key))
            .transpose()
    }

    async fn delete_block_range(&self, from: u64, to: u64) -> Result<()> {
        let mut batch = WriteBatch::default();
        for number in from..=to {
            batch.delete(block_key(number));
        }
        self.db
            .write_opt(batch, &Self::sync_writes())
            .map_err(InfraError::Store)?;
        Ok(())
    }

    async fn save_batch(&self, start: u64, end: u64, data: &[u8]) -> Result<()> {
        self.db
            .put_opt(batch_key(start, end), data, &Self::sync_writes())
            .map_err(InfraError::Store)?;
        Ok(())
    }

    async fn get_batch_compressed(&self, start: u64) -> Result<Option<Vec<u8>>> {
        let end = start + chainstream_core::BATCH_SIZE - 1;
        Ok(self
            .db
            .get(batch_key(start, end))
            .map_err(InfraError::Store)?)
    }

    async fn first_batch(&self) -> Result<Option<BatchRange>> {
        self.first_key(BATCH_PREFIX)?
            .map(|key| parse_batch_key(&key))
            .transpose()
    }

    async fn latest_batch(&self) -> Result<Option<BatchRange>> {
        self.last_key(BATCH_PREFIX, BATCH_SCAN_UPPER)?
            .map(|key| parse_batch_key(&key))
            .transpose()
    }

    async fn get_meta(&self) -> Result<u64> {
        match self.db.get(META_KEY).map_err(InfraError::Store)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                    InfraError::CorruptKey(format!("meta value has {} bytes", raw.len()))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    async fn save_meta(&self, number: u64) -> Result<()> {
        self.db
            .put_opt(META_KEY, number.to_be_bytes(), &Self::sync_writes())
            .map_err(InfraError::Store)?;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, RocksStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RocksStore::open(dir.path()).expect("open");
        (dir, store)
    }

    #[tokio::test]
    async fn block_round_trip() {
        let (_dir, store) = temp_store();

        assert!(store.get_block(5).await.expect("get").is_none());
        store.save_block(5, b"five").await.expect("save");
        assert_eq!(store.get_block(5).await.expect("get").as_deref(), Some(&b"five"[..]));
    }

    #[tokio::test]
    async fn first_and_latest_block_bounds() {
        let (_dir, store) = temp_store();

        assert_eq!(store.first_block().await.expect("first"), None);
        assert_eq!(store.latest_block().await.expect("latest"), None);

        for number in [7u64, 3, 1000, 12] {
            store
                .save_block(number, number.to_string().as_bytes())
                .await
                .expect("save");
        }

        assert_eq!(store.first_block().await.expect("first"), Some(3));
        assert_eq!(store.latest_block().await.expect("latest"), Some(1000));
        assert_eq!(store.block_count().await.expect("count"), 998);
    }

    #[tokio::test]
    async fn block_scan_ignores_other_families() {
        let (_dir, store) = temp_store();

        store.save_batch(0, 99, b"batch").await.expect("save batch");
        store.save_meta(99).await.expect("save meta");

        // Neither the batch key nor the meta key leaks into block scans.
        assert_eq!(store.first_block().await.expect("first"), None);
        assert_eq!(store.latest_block().await.expect("latest"), None);
    }

    #[tokio::test]
    async fn delete_range_is_inclusive() {
        let (_dir, store) = temp_store();

        for number in 10..=20u64 {
            store.save_block(number, b"x").await.expect("save");
        }
        store.delete_block_range(12, 18).await.expect("delete");

        assert!(store.get_block(12).await.expect("get").is_none());
        assert!(store.get_block(18).await.expect("get").is_none());
        assert!(store.get_block(11).await.expect("get").is_some());
        assert!(store.get_block(19).await.expect("get").is_some());
        assert_eq!(store.first_block().await.expect("first"), Some(10));
        assert_eq!(store.latest_block().await.expect("latest"), Some(20));
    }

    #[tokio::test]
    async fn batch_round_trip() {
        let (_dir, store) = temp_store();

        assert!(store.get_batch_compressed(100).await.expect("get").is_none());
        store.save_batch(100, 199, b"payload").await.expect("save");

        assert_eq!(
            store.get_batch_compressed(100).await.expect("get").as_deref(),
            Some(&b"payload"[..])
        );
        assert_eq!(
            store.first_batch().await.expect("first"),
            Some(BatchRange { start: 100, end: 199 })
        );

        store.save_batch(200, 299, b"payload2").await.expect("save");
        assert_eq!(
            store.latest_batch().await.expect("latest"),
            Some(BatchRange { start: 200, end: 299 })
        );
    }

    #[tokio::test]
    async fn meta_defaults_to_zero_and_round_trips() {
        let (_dir, store) = temp_store();

        assert_eq!(store.get_meta().await.expect("meta"), 0);
        store.save_meta(199).await.expect("save");
        assert_eq!(store.get_meta().await.expect("meta"), 199);
    }

    #[tokio::test]
    async fn reopen_preserves_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = RocksStore::open(dir.path()).expect("open");
            store.save_block(42, b"answer").await.expect("save");
            store.save_meta(41).await.expect("save meta");
        }

        let store = RocksStore::open(dir.path()).expect("reopen");
        assert_eq!(store.get_block(42).await.expect("get").as_deref(), Some(&b"answer"[..]));
        assert_eq!(store.get_meta().await.expect("meta"), 41);
    }
}
