//! Faucet service core logic

use crate::config::FaucetConfig;
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{Counter, Ledger};
use crate::policy::{apply_window, CapPolicy};
use crate::transfer::{TransferBuilder, TransferError};
use chrono::Utc;
use drip_common::types::{Address, Hash};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Base units per whole token.
pub const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Converts whole tokens into wei.
pub fn to_wei(amount: u64) -> u128 {
    u128::from(amount) * WEI_PER_TOKEN
}

/// Outcome of a successful disbursement.
#[derive(Debug, Clone, Serialize)]
pub struct Disbursement {
    pub address: Address,
    pub tx_hash: Hash,
    pub amount: u64,
    /// Counter values after the update
    pub address_total: u64,
    pub global_total: u64,
}

/// Disbursement orchestrator.
pub struct FaucetService {
    ledger: Ledger,
    transfers: TransferBuilder,
    policy: CapPolicy,
    transfer_timeout: Duration,
    /// Held across load, check, transfer and update. Every request touches
    /// the global counter, so one lock covers both counters and the nonce.
    disbursement_lock: Mutex<()>,
}

impl FaucetService {
    pub fn new(ledger: Ledger, transfers: TransferBuilder, policy: CapPolicy, transfer_timeout: Duration) -> Self {
        Self {
            ledger,
            transfers,
            policy,
            transfer_timeout,
            disbursement_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &FaucetConfig, ledger: Ledger, transfers: TransferBuilder) -> Self {
        let policy = CapPolicy {
            total_cap: config.faucet.total_transfer_limit,
            address_cap: config.faucet.address_transfer_limit,
            disbursement: config.faucet.transfer_amount,
        };
        Self::new(ledger, transfers, policy, config.transfer_timeout())
    }

    pub fn policy(&self) -> &CapPolicy {
        &self.policy
    }

    /// Funds `target` with the configured amount if both daily caps allow it.
    ///
    /// Nothing is persisted unless the transfer was handed to the network.
    pub async fn fund_address(&self, target: Address) -> FaucetResult<Disbursement> {
        let _guard = self.disbursement_lock.lock().await;

        let address_counter = self.ledger.address_counter(&target).await?.resolve();
        info!(address = %target, amount = address_counter.amount, window_start = %address_counter.window_start, "funding address info");

        let global_counter = self.ledger.global_counter().await?.resolve();
        info!(amount = global_counter.amount, window_start = %global_counter.window_start, "total info");

        let now = Utc::now();
        let address_counter = apply_window(address_counter, now);
        let global_counter = apply_window(global_counter, now);

        if let Err(rejection) = self.policy.check(&global_counter, &address_counter) {
            info!(address = %target, reason = %rejection, "funding rejected");
            return Err(rejection.into());
        }
        info!(address = %target, "funding {} is allowed", target);

        let (tx_hash, confirmed) = self.send(target).await?;

        let amount = self.policy.disbursement;
        let address_counter = Counter {
            amount: address_counter.amount + amount,
            ..address_counter
        };
        let global_counter = Counter {
            amount: global_counter.amount + amount,
            ..global_counter
        };

        if let Err(source) = self.ledger.commit(&target, &address_counter, &global_counter).await {
            error!(
                address = %target,
                %tx_hash,
                address_amount = address_counter.amount,
                address_window_start = %address_counter.window_start,
                total_amount = global_counter.amount,
                total_window_start = %global_counter.window_start,
                error = %source,
                "transfer sent but counters may not be durable; ledger needs reconciling"
            );
            return Err(FaucetError::PartialCommit {
                address: target,
                tx_hash,
                source,
            });
        }

        if !confirmed {
            return Err(FaucetError::SubmissionUnconfirmed {
                address: target,
                tx_hash,
            });
        }

        info!(address = %target, %tx_hash, "address funded successfully");
        Ok(Disbursement {
            address: target,
            tx_hash,
            amount,
            address_total: address_counter.amount,
            global_total: global_counter.amount,
        })
    }

    /// Prepares and submits the transfer, each step bounded by
    /// `transfer_timeout`.
    ///
    /// Running out of time before submission is a clean failure. Running out
    /// during submission is not: the node may already hold the transaction,
    /// so the transfer is reported unconfirmed and charged like a sent one.
    async fn send(&self, target: Address) -> Result<(Hash, bool), TransferError> {
        let value = to_wei(self.policy.disbursement);
        let prepared = match timeout(self.transfer_timeout, self.transfers.prepare(target, value)).await {
            Ok(prepared) => prepared?,
            Err(_) => {
                warn!(address = %target, timeout = ?self.transfer_timeout, "transfer timed out before submission");
                return Err(TransferError::Timeout(self.transfer_timeout));
            }
        };

        match timeout(self.transfer_timeout, self.transfers.submit(&prepared)).await {
            Ok(receipt) => Ok((receipt?.tx_hash, true)),
            Err(_) => {
                error!(
                    address = %target,
                    tx_hash = %prepared.tx_hash(),
                    nonce = prepared.nonce,
                    timeout = ?self.transfer_timeout,
                    "submission timed out; tx may be pending, charging counters"
                );
                Ok((prepared.tx_hash(), false))
            }
        }
    }
}
