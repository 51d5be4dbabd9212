//! Identifier helpers shared by scanning and connecting.

use btleplug::platform::PeripheralId;

/// Address reported on platforms that hide the real MAC address.
const UNSET_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// Bluetooth address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_peripheral_id_wrapper(&format!("{:?}", id)).to_string()
}

/// Create an identifier string from an address and peripheral ID.
///
/// Uses the peripheral ID when the platform hides the address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_unset_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn is_unset_address(address: &str) -> bool {
    address == UNSET_ADDRESS
}

fn strip_peripheral_id_wrapper(debug: &str) -> &str {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
}
