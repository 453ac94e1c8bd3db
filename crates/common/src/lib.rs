//! Shared types and utilities for the drip faucet workspace.

pub mod error;
pub mod traits;
pub mod types;
pub mod utils;

pub use error::{AddressError, AddressResult};
pub use traits::DBInterface;
pub use types::{Address, Hash, ADDRESS_LENGTH, HASH_LENGTH};
