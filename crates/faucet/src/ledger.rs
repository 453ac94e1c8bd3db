//! Durable disbursement counters.
//!
//! Two record kinds live in the store: one counter per funded address under
//! `<address>:value`, and a single global counter under `total_info_key`.
//! Records are bincode-encoded `Counter`s.

use chrono::{DateTime, Utc};
use drip_common::traits::DBInterface;
use drip_common::types::Address;
use drip_common::utils::db_keys::{address_counter_key, GLOBAL_COUNTER_KEY};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to get {key}: {message}")]
    Read { key: String, message: String },

    #[error("failed to put {key} into db: {message}")]
    Write { key: String, message: String },

    #[error("failed to decode {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode counter: {0}")]
    Encode(#[source] bincode::Error),
}

/// Amount disbursed within the window that began at `window_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counter {
    /// whole tokens
    pub amount: u64,
    /// Unix epoch when no window has started yet
    pub window_start: DateTime<Utc>,
}

impl Counter {
    pub fn is_unset(&self) -> bool {
        self.window_start == DateTime::<Utc>::default()
    }

    pub fn encode(&self) -> Result<Vec<u8>, LedgerError> {
        bincode::serialize(self).map_err(LedgerError::Encode)
    }

    fn decode(key: &[u8], bytes: &[u8]) -> Result<Self, LedgerError> {
        bincode::deserialize(bytes).map_err(|source| LedgerError::Decode {
            key: String::from_utf8_lossy(key).into_owned(),
            source,
        })
    }
}

/// A counter as found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterRecord {
    /// Never written: the address was never funded.
    Absent,
    Present(Counter),
}

impl CounterRecord {
    /// Absence means a zero-value counter.
    pub fn resolve(self) -> Counter {
        match self {
            CounterRecord::Absent => Counter::default(),
            CounterRecord::Present(counter) => counter,
        }
    }
}

/// Typed view over the key/value store holding the counters.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn DBInterface>,
}

impl Ledger {
    pub fn new(store: Arc<dyn DBInterface>) -> Self {
        Self { store }
    }

    pub async fn address_counter(&self, address: &Address) -> Result<CounterRecord, LedgerError> {
        self.load(&address_counter_key(address)).await
    }

    pub async fn global_counter(&self) -> Result<CounterRecord, LedgerError> {
        self.load(GLOBAL_COUNTER_KEY).await
    }

    pub async fn put_address_counter(&self, address: &Address, counter: &Counter) -> Result<(), LedgerError> {
        self.put(&address_counter_key(address), counter).await
    }

    pub async fn put_global_counter(&self, counter: &Counter) -> Result<(), LedgerError> {
        self.put(GLOBAL_COUNTER_KEY, counter).await
    }

    /// Writes both counters in one atomic batch.
    pub async fn commit(
        &self,
        address: &Address,
        address_counter: &Counter,
        global_counter: &Counter,
    ) -> Result<(), LedgerError> {
        let keys = vec![address_counter_key(address), GLOBAL_COUNTER_KEY.to_vec()];
        let values = vec![address_counter.encode()?, global_counter.encode()?];

        self.store
            .batch_insert(&keys, &values)
            .await
            .map_err(|e| LedgerError::Write {
                key: format!("{}+{}", address, String::from_utf8_lossy(GLOBAL_COUNTER_KEY)),
                message: format!("{:#}", e),
            })?;

        debug!(%address, address_amount = address_counter.amount, total_amount = global_counter.amount, "counters committed");
        Ok(())
    }

    async fn load(&self, key: &[u8]) -> Result<CounterRecord, LedgerError> {
        let bytes = self.store.get(key).await.map_err(|e| LedgerError::Read {
            key: String::from_utf8_lossy(key).into_owned(),
            message: format!("{:#}", e),
        })?;

        match bytes {
            Some(bytes) => Ok(CounterRecord::Present(Counter::decode(key, &bytes)?)),
            None => Ok(CounterRecord::Absent),
        }
    }

    async fn put(&self, key: &[u8], counter: &Counter) -> Result<(), LedgerError> {
        self.store
            .insert(key, &counter.encode()?)
            .await
            .map_err(|e| LedgerError::Write {
                key: String::from_utf8_lossy(key).into_owned(),
                message: format!("{:#}", e),
            })
    }
}
