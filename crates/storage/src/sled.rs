use anyhow::{Context, Result};
use async_trait::async_trait;
use drip_common::traits::DBInterface;
use sled::{Batch, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct SledDB {
    db: sled::Db,
    tree: Arc<Tree>,
}

impl SledDB {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path).context("Failed to open Sled database")?;
        Self::from_db(db)
    }

    /// Create a new SledDB instance from an existing sled::Db
    pub fn from_db(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree("ledger").context("Failed to open ledger tree")?;
        Ok(Self {
            db,
            tree: Arc::new(tree),
        })
    }

    /// In-memory database, removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("Failed to open temporary Sled database")?;
        Self::from_db(db)
    }

    /// Flush dirty pages to disk.
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map(|_| ())
            .context("Failed to flush SledDB")
    }
}

#[async_trait]
impl DBInterface for SledDB {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tree = self.tree.clone();
        let key = key.to_vec();

        tokio::task::spawn_blocking(move || {
            tree.get(&key)
                .map(|value| value.map(|ivec| ivec.to_vec()))
                .map_err(|e| anyhow::anyhow!("Failed to get from SledDB: {}", e))
        })
        .await?
    }

    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let tree = self.tree.clone();
        let key = key.to_vec();
        let value = value.to_vec();

        tokio::task::spawn_blocking(move || {
            tree.insert(key.as_slice(), value.as_slice())
                .map(|_| ())
                .map_err(|e| anyhow::anyhow!("Failed to insert into SledDB: {}", e))
        })
        .await??;

        self.flush().await
    }

    async fn batch_insert(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            anyhow::bail!("Batch insert failed: Key/Value length mismatch");
        }

        let mut batch = Batch::default();
        for (key, value) in keys.iter().zip(values.iter()) {
            batch.insert(key.as_slice(), value.as_slice());
        }

        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || {
            tree.apply_batch(batch)
                .map_err(|e| anyhow::anyhow!("Failed to apply batch to SledDB: {}", e))
        })
        .await??;

        debug!(entries = keys.len(), "applied ledger batch");
        // applied and visible; only durability is pending if this fails
        self.flush().await.context("ledger batch applied but flush failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let db = SledDB::new(temp_dir.path()).unwrap();

        db.insert(b"key1", b"value1").await.unwrap();
        let value = db.get(b"key1").await.unwrap();
        assert_eq!(value, Some(b"value1".to_vec()));

        // Test get non-existent key
        let value = db.get(b"non_existent").await.unwrap();
        assert_eq!(value, None);

        // Overwrite
        db.insert(b"key1", b"value2").await.unwrap();
        assert_eq!(db.get(b"key1").await.unwrap(), Some(b"value2".to_vec()));
    }

    #[tokio::test]
    async fn test_batch_insert() {
        let db = SledDB::temporary().unwrap();

        let keys = vec![b"key1".to_vec(), b"key2".to_vec()];
        let values = vec![b"value1".to_vec(), b"value2".to_vec()];
        db.batch_insert(&keys, &values).await.unwrap();

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(db.get(key).await.unwrap(), Some(values[i].clone()));
        }
    }

    #[tokio::test]
    async fn test_batch_length_mismatch_writes_nothing() {
        let db = SledDB::temporary().unwrap();

        let keys = vec![b"key1".to_vec(), b"key2".to_vec()];
        let values = vec![b"value1".to_vec()];
        assert!(db.batch_insert(&keys, &values).await.is_err());
        assert_eq!(db.get(b"key1").await.unwrap(), None);
    }
}
