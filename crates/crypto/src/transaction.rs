//! Value-transfer transaction encoding and signing.
//!
//! Supports EIP-1559 dynamic-fee transactions (EIP-2718 type `0x02`) and
//! EIP-155 replay-protected legacy transactions for networks without a
//! fee market.

use crate::ecdsa::{CryptoError, SigningAccount};
use drip_common::types::{Address, Hash};
use rlp::RlpStream;
use std::fmt;
use thiserror::Error;

/// EIP-2718 type byte for dynamic-fee transactions
pub const TX_TYPE_EIP1559: u8 = 0x02;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Invalid transaction: {0}")]
    InvalidFormat(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Per-gas pricing of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSchedule {
    DynamicFee {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    Legacy {
        gas_price: u128,
    },
}

impl FeeSchedule {
    /// Upper bound on what one unit of gas may cost.
    pub fn max_price_per_gas(&self) -> u128 {
        match self {
            FeeSchedule::DynamicFee { max_fee_per_gas, .. } => *max_fee_per_gas,
            FeeSchedule::Legacy { gas_price } => *gas_price,
        }
    }
}

impl fmt::Display for FeeSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeSchedule::DynamicFee {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => write!(
                f,
                "max_fee_per_gas={} max_priority_fee_per_gas={}",
                max_fee_per_gas, max_priority_fee_per_gas
            ),
            FeeSchedule::Legacy { gas_price } => write!(f, "gas_price={}", gas_price),
        }
    }
}

/// A fully populated, unsigned value transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub fees: FeeSchedule,
    pub gas_limit: u64,
    pub to: Address,
    /// in wei
    pub value: u128,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: Hash,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

impl TransferTransaction {
    /// Digest the signature commits to.
    pub fn signing_hash(&self) -> Hash {
        match self.fees {
            FeeSchedule::DynamicFee { .. } => {
                let mut stream = RlpStream::new_list(9);
                self.append_dynamic_fee_fields(&mut stream);
                Hash::keccak(&typed_envelope(&stream.out()))
            }
            FeeSchedule::Legacy { .. } => {
                let mut stream = RlpStream::new_list(9);
                self.append_legacy_fields(&mut stream);
                // EIP-155: chain_id, 0, 0
                stream.append(&self.chain_id);
                stream.append(&0u8);
                stream.append(&0u8);
                Hash::keccak(&stream.out())
            }
        }
    }

    pub fn sign(&self, account: &SigningAccount) -> Result<SignedTransaction, TxError> {
        if self.gas_limit == 0 {
            return Err(TxError::InvalidFormat("gas limit must be positive".to_string()));
        }

        let signature = account.sign_hash(&self.signing_hash())?;
        let r = trim_leading_zeros(&signature.r);
        let s = trim_leading_zeros(&signature.s);

        let raw = match self.fees {
            FeeSchedule::DynamicFee { .. } => {
                let mut stream = RlpStream::new_list(12);
                self.append_dynamic_fee_fields(&mut stream);
                stream.append(&signature.recovery_id);
                stream.append(&r);
                stream.append(&s);
                typed_envelope(&stream.out())
            }
            FeeSchedule::Legacy { .. } => {
                let v = self
                    .chain_id
                    .checked_mul(2)
                    .and_then(|v| v.checked_add(35 + signature.recovery_id as u64))
                    .ok_or_else(|| TxError::InvalidFormat("chain id too large".to_string()))?;

                let mut stream = RlpStream::new_list(9);
                self.append_legacy_fields(&mut stream);
                stream.append(&v);
                stream.append(&r);
                stream.append(&s);
                stream.out().to_vec()
            }
        };

        let hash = Hash::keccak(&raw);
        Ok(SignedTransaction { raw, hash })
    }

    fn append_dynamic_fee_fields(&self, stream: &mut RlpStream) {
        let (max_fee, tip) = match self.fees {
            FeeSchedule::DynamicFee {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => (max_fee_per_gas, max_priority_fee_per_gas),
            FeeSchedule::Legacy { gas_price } => (gas_price, gas_price),
        };

        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(&quantity(tip));
        stream.append(&quantity(max_fee));
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&quantity(self.value));
        stream.append(&Vec::<u8>::new()); // data
        stream.begin_list(0); // access list
    }

    fn append_legacy_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&quantity(self.fees.max_price_per_gas()));
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&quantity(self.value));
        stream.append(&Vec::<u8>::new()); // data
    }
}

fn typed_envelope(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(TX_TYPE_EIP1559);
    out.extend_from_slice(payload);
    out
}

/// Big-endian bytes without leading zeros, as RLP expects for integers.
fn quantity(value: u128) -> Vec<u8> {
    trim_leading_zeros(&value.to_be_bytes())
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
