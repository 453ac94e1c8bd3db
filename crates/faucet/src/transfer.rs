//! Builds, signs and submits a single value transfer.

use crate::rpc::{CallRequest, ChainClient, RpcError};
use drip_common::types::{Address, Hash};
use drip_crypto::{FeeSchedule, SignedTransaction, SigningAccount, TransferTransaction, TxError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Failure of one transfer stage. Nothing is retried.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to get pending nonce: {0}")]
    Nonce(#[source] RpcError),

    #[error("failed to suggest fees: {0}")]
    FeeSuggestion(#[source] RpcError),

    #[error("failed to estimate gas (to {to}, max fee {max_fee_per_gas}, tip {max_priority_fee_per_gas}, base fee {base_fee:?}): {source}")]
    GasEstimation {
        to: Address,
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        base_fee: Option<u128>,
        #[source]
        source: RpcError,
    },

    #[error("failed to sign tx to {to}: {source}")]
    Signing {
        to: Address,
        #[source]
        source: TxError,
    },

    #[error("failed to submit tx {tx_hash} (gas {gas_limit}, {fees}): {source}")]
    Submission {
        tx_hash: Hash,
        gas_limit: u64,
        fees: FeeSchedule,
        #[source]
        source: RpcError,
    },

    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),
}

/// How fees and gas are derived from what the network reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    /// Added to twice the base fee to form the max fee per gas
    pub fee_cap_premium: u128,
    /// Padding on top of the gas estimate, in percent
    pub gas_margin_percent: u64,
    /// Used when the network has no base fee
    pub legacy_gas_limit: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee_cap_premium: 1_500_000_000,
            gas_margin_percent: 20,
            legacy_gas_limit: 21_000,
        }
    }
}

impl FeePolicy {
    /// `2 * base_fee + premium`, never below what the tip needs.
    pub fn max_fee_per_gas(&self, base_fee: u128, tip: u128) -> u128 {
        let doubled = base_fee.saturating_mul(2);
        let cap = doubled.saturating_add(self.fee_cap_premium);
        if tip > cap {
            doubled.saturating_add(tip)
        } else {
            cap
        }
    }

    pub fn padded_gas(&self, estimate: u64) -> u64 {
        let margin = u128::from(estimate) * u128::from(self.gas_margin_percent) / 100;
        estimate.saturating_add(u64::try_from(margin).unwrap_or(u64::MAX))
    }
}

/// A transfer the network accepted into its pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_hash: Hash,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fees: FeeSchedule,
}

/// A signed transfer that has not been submitted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransfer {
    pub to: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fees: FeeSchedule,
    pub signed: SignedTransaction,
}

impl PreparedTransfer {
    pub fn tx_hash(&self) -> Hash {
        self.signed.hash
    }
}

pub struct TransferBuilder {
    client: Arc<dyn ChainClient>,
    account: Arc<SigningAccount>,
    chain_id: u64,
    policy: FeePolicy,
}

impl TransferBuilder {
    pub fn new(
        client: Arc<dyn ChainClient>,
        account: Arc<SigningAccount>,
        chain_id: u64,
        policy: FeePolicy,
    ) -> Self {
        Self {
            client,
            account,
            chain_id,
            policy,
        }
    }

    /// Sends `value` wei to `to`. Callers must serialize calls: the pending
    /// nonce is read here and consumed by the submission.
    pub async fn transfer(&self, to: Address, value: u128) -> Result<TransferReceipt, TransferError> {
        let prepared = self.prepare(to, value).await?;
        self.submit(&prepared).await
    }

    /// Everything up to and including signing. Nothing leaves the process
    /// except read-only RPC calls, so abandoning the result is harmless.
    pub async fn prepare(&self, to: Address, value: u128) -> Result<PreparedTransfer, TransferError> {
        let from = self.account.address();
        let nonce = self
            .client
            .pending_nonce(&from)
            .await
            .map_err(TransferError::Nonce)?;

        let (fees, gas_limit) = self.price(from, to, value).await?;

        let tx = TransferTransaction {
            chain_id: self.chain_id,
            nonce,
            fees,
            gas_limit,
            to,
            value,
        };
        let signed = tx.sign(&self.account).map_err(|source| {
            error!(%to, %fees, gas_limit, error = %source, "failed to sign tx");
            TransferError::Signing { to, source }
        })?;

        Ok(PreparedTransfer {
            to,
            nonce,
            gas_limit,
            fees,
            signed,
        })
    }

    /// Hands the signed transaction to the network. Once called, the node may
    /// hold the transaction even if this future never completes.
    pub async fn submit(&self, prepared: &PreparedTransfer) -> Result<TransferReceipt, TransferError> {
        let (to, nonce, gas_limit, fees) = (prepared.to, prepared.nonce, prepared.gas_limit, prepared.fees);
        let signed = &prepared.signed;

        if let Err(source) = self.client.send_raw_transaction(&signed.raw).await {
            error!(%to, tx_hash = %signed.hash, %fees, gas_limit, error = %source, "fail to send tx");
            return Err(TransferError::Submission {
                tx_hash: signed.hash,
                gas_limit,
                fees,
                source,
            });
        }

        info!(%to, tx_hash = %signed.hash, nonce, "tx sent");
        Ok(TransferReceipt {
            tx_hash: signed.hash,
            nonce,
            gas_limit,
            fees,
        })
    }

    async fn price(&self, from: Address, to: Address, value: u128) -> Result<(FeeSchedule, u64), TransferError> {
        let block = self
            .client
            .latest_block()
            .await
            .map_err(TransferError::FeeSuggestion)?;

        let base_fee = match block.base_fee_per_gas {
            Some(base_fee) => base_fee,
            None => {
                let gas_price = self
                    .client
                    .suggest_gas_price()
                    .await
                    .map_err(TransferError::FeeSuggestion)?;
                return Ok((FeeSchedule::Legacy { gas_price }, self.policy.legacy_gas_limit));
            }
        };

        let tip = self
            .client
            .suggest_gas_tip_cap()
            .await
            .map_err(TransferError::FeeSuggestion)?;
        let max_fee = self.policy.max_fee_per_gas(base_fee, tip);

        let call = CallRequest {
            from,
            to,
            value,
            max_fee_per_gas: Some(max_fee),
            max_priority_fee_per_gas: Some(tip),
        };
        let estimate = self.client.estimate_gas(&call).await.map_err(|source| {
            error!(%to, max_fee_per_gas = %max_fee, tip = %tip, base_fee = %base_fee, error = %source, "failed to estimate gas");
            TransferError::GasEstimation {
                to,
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: tip,
                base_fee: Some(base_fee),
                source,
            }
        })?;

        Ok((
            FeeSchedule::DynamicFee {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: tip,
            },
            self.policy.padded_gas(estimate),
        ))
    }
}
