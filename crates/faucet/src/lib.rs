//! Rate-limited faucet service.
//!
//! Each request is checked against a rolling 24h per-address cap and a
//! rolling 24h global cap before a signed transfer is submitted, and the
//! counters are recorded only after the network accepted it.

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod policy;
pub mod rpc;
pub mod service;
pub mod transfer;

pub use config::FaucetConfig;
pub use error::{FaucetError, FaucetResult};
pub use ledger::{Counter, CounterRecord, Ledger, LedgerError};
pub use policy::{CapExceeded, CapPolicy};
pub use rpc::{ChainClient, JsonRpcClient};
pub use service::{Disbursement, FaucetService};
pub use transfer::{FeePolicy, TransferBuilder, TransferError};
