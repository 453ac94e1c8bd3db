use anyhow::Result;
use async_trait::async_trait;

/// Minimal key/value contract the ledger is built on.
///
/// `get` on an absent key returns `Ok(None)`; callers decide what absence
/// means. `batch_insert` must apply all pairs atomically: either every key is
/// written or none is.
#[async_trait]
pub trait DBInterface: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;
    async fn batch_insert(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()>;
}
