//! Recipient address parsing.
//!
//! Recipients may be given as native `0x` hex addresses or as Filecoin
//! addresses that map onto one: `f0<id>` ID addresses become masked-ID
//! addresses, and `f410f...` delegated addresses in the EVM namespace carry
//! the 20-byte address directly.

use crate::error::{AddressError, AddressResult};
use crate::types::{Address, ADDRESS_LENGTH};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

/// Actor id of the Ethereum Address Manager (the f410 namespace).
pub const EAM_NAMESPACE: u64 = 10;

const PROTOCOL_ID: u8 = 0;
const PROTOCOL_DELEGATED: u8 = 4;
const CHECKSUM_LENGTH: usize = 4;
const MASKED_ID_PREFIX_LENGTH: usize = ADDRESS_LENGTH - 8;
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Filecoin network prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    fn prefix(self) -> char {
        match self {
            Network::Mainnet => 'f',
            Network::Testnet => 't',
        }
    }
}

/// Parses a recipient in any accepted form into a native address.
pub fn parse_recipient(input: &str) -> AddressResult<Address> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AddressError::Empty);
    }
    if input.starts_with("0x") || input.starts_with("0X") {
        return Address::from_hex(input);
    }
    eth_from_filecoin(input)
}

/// Maps a Filecoin `f0`/`f410f` address string onto its native address.
pub fn eth_from_filecoin(input: &str) -> AddressResult<Address> {
    let mut chars = input.chars();
    match chars.next() {
        Some('f') | Some('t') => {}
        Some(other) => return Err(AddressError::UnknownNetwork(other)),
        None => return Err(AddressError::Empty),
    }
    let protocol = chars.next().ok_or(AddressError::Empty)?;
    let rest = chars.as_str();

    match protocol {
        '0' => {
            if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
                return Err(AddressError::InvalidId(rest.to_string()));
            }
            let id: u64 = rest
                .parse()
                .map_err(|_| AddressError::InvalidId(rest.to_string()))?;
            Ok(masked_id_address(id))
        }
        '4' => {
            let (namespace, encoded) = rest
                .split_once('f')
                .ok_or_else(|| AddressError::InvalidEncoding(input.to_string()))?;
            let namespace: u64 = namespace
                .parse()
                .map_err(|_| AddressError::InvalidEncoding(input.to_string()))?;
            if namespace != EAM_NAMESPACE {
                return Err(AddressError::UnsupportedNamespace(namespace));
            }

            let raw = base32_decode(encoded)?;
            if raw.len() != ADDRESS_LENGTH + CHECKSUM_LENGTH {
                return Err(AddressError::InvalidLength(
                    raw.len().saturating_sub(CHECKSUM_LENGTH),
                ));
            }
            let (payload, checksum) = raw.split_at(ADDRESS_LENGTH);
            if delegated_checksum(namespace, payload)?.as_slice() != checksum {
                return Err(AddressError::ChecksumMismatch);
            }

            let address = Address::from_bytes(payload)?;
            if is_masked_id(&address) {
                return Err(AddressError::MaskedIdPayload(input.to_string()));
            }
            Ok(address)
        }
        other => Err(AddressError::UnsupportedProtocol(other)),
    }
}

/// Maps a native address onto the Filecoin address controlling it.
pub fn filecoin_from_eth(address: &Address, network: Network) -> AddressResult<String> {
    if is_masked_id(address) {
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&address.0[MASKED_ID_PREFIX_LENGTH..]);
        return Ok(format!(
            "{}0{}",
            network.prefix(),
            u64::from_be_bytes(id_bytes)
        ));
    }

    let mut raw = address.0.to_vec();
    raw.extend_from_slice(&delegated_checksum(EAM_NAMESPACE, &address.0)?);
    Ok(format!(
        "{}4{}f{}",
        network.prefix(),
        EAM_NAMESPACE,
        base32_encode(&raw)
    ))
}

/// `0xff` followed by zeroes and the big-endian actor id.
pub fn masked_id_address(id: u64) -> Address {
    let mut bytes = [0u8; ADDRESS_LENGTH];
    bytes[0] = 0xff;
    bytes[MASKED_ID_PREFIX_LENGTH..].copy_from_slice(&id.to_be_bytes());
    Address(bytes)
}

pub fn is_masked_id(address: &Address) -> bool {
    address.0[0] == 0xff && address.0[1..MASKED_ID_PREFIX_LENGTH].iter().all(|b| *b == 0)
}

fn delegated_checksum(namespace: u64, payload: &[u8]) -> AddressResult<[u8; CHECKSUM_LENGTH]> {
    let mut hasher = Blake2bVar::new(CHECKSUM_LENGTH)
        .map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
    hasher.update(&[PROTOCOL_DELEGATED]);
    hasher.update(&uvarint(namespace));
    hasher.update(payload);

    let mut out = [0u8; CHECKSUM_LENGTH];
    hasher
        .finalize_variable(&mut out)
        .map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
    Ok(out)
}

fn uvarint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2);
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for &byte in data {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn base32_decode(encoded: &str) -> AddressResult<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for c in encoded.bytes() {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| AddressError::InvalidEncoding(encoded.to_string()))?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    // Trailing bits must be zero padding.
    if bits >= 5 || buffer & ((1 << bits) - 1) != 0 {
        return Err(AddressError::InvalidEncoding(encoded.to_string()));
    }
    Ok(out)
}
