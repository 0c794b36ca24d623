//! String formatting utilities.
//!
//! Hex prefix handling for keys and init code read from configuration, and
//! truncation of hashes and addresses for log lines.

/// Shortens a hash or address for display.
///
/// Keeps the first 10 characters (`0x` plus 8 hex digits) followed by "..".
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 10 {
		id.to_string()
	} else {
		format!("{}..", &id[..10])
	}
}

/// Removes "0x" or "0X" prefix from a hex string if present.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}
