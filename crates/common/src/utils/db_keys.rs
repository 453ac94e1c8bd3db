use crate::types::Address;

/// Key of the single service-wide counter.
pub const GLOBAL_COUNTER_KEY: &[u8] = b"total_info_key";

const ADDRESS_COUNTER_SUFFIX: &str = ":value";

/// `<checksummed address>:value`
pub fn address_counter_key(address: &Address) -> Vec<u8> {
    let mut key = address.to_checksum();
    key.push_str(ADDRESS_COUNTER_SUFFIX);
    key.into_bytes()
}
