pub mod ecdsa;
pub mod transaction;

pub use ecdsa::{CryptoError, RecoverableSignature, SigningAccount};
pub use transaction::{FeeSchedule, SignedTransaction, TransferTransaction, TxError};
