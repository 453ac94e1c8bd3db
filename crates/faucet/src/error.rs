//! Error types for the faucet service

use crate::ledger::LedgerError;
use crate::policy::CapExceeded;
use crate::rpc::RpcError;
use crate::transfer::TransferError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use drip_common::error::AddressError;
use drip_common::types::{Address, Hash};
use serde_json::json;
use thiserror::Error;

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    /// A daily cap would be exceeded; an expected rejection, not a fault.
    #[error(transparent)]
    CapExceeded(#[from] CapExceeded),

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("eth client not ready: {0}")]
    Chain(#[from] RpcError),

    #[error("fail to send tx: {0}")]
    Transfer(#[from] TransferError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The transfer was accepted by the network but the counters could not
    /// be recorded. Funds have moved; the ledger needs reconciling.
    #[error("transfer {tx_hash} to {address} succeeded but counters may not have been recorded: {source}")]
    PartialCommit {
        address: Address,
        tx_hash: Hash,
        #[source]
        source: LedgerError,
    },

    /// Submission did not finish in time. The node may hold the transaction,
    /// so the counters were charged as for a sent transfer.
    #[error("transfer {tx_hash} to {address} was submitted but not confirmed in time")]
    SubmissionUnconfirmed { address: Address, tx_hash: Hash },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            FaucetError::CapExceeded(CapExceeded::Total) => "TOTAL_CAP_EXCEEDED",
            FaucetError::CapExceeded(CapExceeded::Address) => "ADDRESS_CAP_EXCEEDED",
            FaucetError::InvalidAddress(_) => "INVALID_ADDRESS",
            FaucetError::InvalidRequest(_) => "INVALID_REQUEST",
            FaucetError::Chain(_) => "CHAIN_UNAVAILABLE",
            FaucetError::Transfer(TransferError::Signing { .. }) => "SIGNING_FAILED",
            FaucetError::Transfer(_) => "TRANSFER_FAILED",
            FaucetError::Ledger(_) => "LEDGER_ERROR",
            FaucetError::PartialCommit { .. } => "PARTIAL_COMMIT",
            FaucetError::SubmissionUnconfirmed { .. } => "SUBMISSION_UNCONFIRMED",
            FaucetError::Config(_) => "CONFIG_ERROR",
            FaucetError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            FaucetError::InvalidAddress(_) | FaucetError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (self.status(), body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
