use drip_common::types::{Address, Hash};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid Hex String")]
    HexError(#[from] hex::FromHexError),
    #[error("Invalid Key: {0}")]
    KeyError(String),
    #[error("Signing Failed: {0}")]
    SigningFailed(String),
    #[error("Signature Recovery Failed")]
    RecoveryFailed,
}

/// A secp256k1 signature with its recovery id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// 0 or 1
    pub recovery_id: u8,
}

/// The service's signing key material.
///
/// Loaded once at startup and shared read-only for the process lifetime.
pub struct SigningAccount {
    signing_key: SigningKey,
    public_key: VerifyingKey,
    address: Address,
}

impl SigningAccount {
    pub fn random() -> Self {
        Self::new(SigningKey::random(&mut OsRng))
    }

    /// Accepts the key with or without a `0x` prefix.
    pub fn from_private_key_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let hex_str = hex_str.trim();
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;
        let signing_key =
            SigningKey::from_slice(&bytes).map_err(|e| CryptoError::KeyError(e.to_string()))?;
        Ok(Self::new(signing_key))
    }

    fn new(signing_key: SigningKey) -> Self {
        let public_key = *signing_key.verifying_key();
        let address = public_key_to_address(&public_key);
        Self {
            signing_key,
            public_key,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.public_key
    }

    /// Signs a 32-byte digest (RFC 6979, low-s normalized).
    pub fn sign_hash(&self, hash: &Hash) -> Result<RecoverableSignature, CryptoError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&hash.0)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

impl fmt::Debug for SigningAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// `keccak256(uncompressed_pubkey[1..])[12..]`
pub fn public_key_to_address(public_key: &VerifyingKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    let hash = keccak_hash::keccak(&encoded.as_bytes()[1..]);
    let mut address_bytes = [0u8; 20];
    address_bytes.copy_from_slice(&hash.0[12..]);
    Address(address_bytes)
}

/// Recovers the signer's address from a digest and signature.
pub fn recover_address(hash: &Hash, signature: &RecoverableSignature) -> Result<Address, CryptoError> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&bytes).map_err(|_| CryptoError::RecoveryFailed)?;
    let recovery_id = RecoveryId::from_byte(signature.recovery_id).ok_or(CryptoError::RecoveryFailed)?;

    let key = VerifyingKey::recover_from_prehash(&hash.0, &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(public_key_to_address(&key))
}
