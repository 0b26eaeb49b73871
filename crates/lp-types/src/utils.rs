//! Display and topic helpers.

use alloy::primitives::{Address, B256};

/// Truncates an identifier for log output: the first 10 characters followed
/// by "..", enough to keep the `0x` prefix and 8 hex digits.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 10 {
		id.to_string()
	} else {
		format!("{}..", &id[..10])
	}
}

/// Left-pads an address to a 32-byte topic word.
pub fn left_pad_address(address: &Address) -> B256 {
	address.into_word()
}
