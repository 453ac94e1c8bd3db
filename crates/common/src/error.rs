use thiserror::Error;

/// Errors raised while parsing a recipient address, in either the native
/// hex form or one of the Filecoin encodings that map onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty address string")]
    Empty,

    #[error("invalid hex address: {0}")]
    InvalidHex(String),

    #[error("invalid address length: expected 20 bytes, got {0}")]
    InvalidLength(usize),

    #[error("unknown network prefix: {0:?}")]
    UnknownNetwork(char),

    #[error("unsupported address protocol: {0:?}")]
    UnsupportedProtocol(char),

    #[error("invalid actor id: {0}")]
    InvalidId(String),

    #[error("unsupported delegated namespace: {0}")]
    UnsupportedNamespace(u64),

    #[error("invalid base32 payload: {0}")]
    InvalidEncoding(String),

    #[error("address checksum mismatch")]
    ChecksumMismatch,

    #[error("f410f addresses cannot embed masked-ID payloads: {0}")]
    MaskedIdPayload(String),
}

/// Result type alias for address parsing
pub type AddressResult<T> = std::result::Result<T, AddressError>;
