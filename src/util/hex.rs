//! Hex formatting helpers for error and debug output.

/// Format a u32 value as hex with 0x prefix.
pub fn format_hex32(value: u32) -> String {
    format!("0x{:08x}", value)
}

/// Format bytes as a compact hex string (e.g., "4a2f00ff").
pub fn format_bytes(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}
