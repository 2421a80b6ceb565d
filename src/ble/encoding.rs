//! Heart Rate Measurement characteristic encoding (Bluetooth SIG GATT
//! Specification Supplement, org.bluetooth.characteristic.heart_rate_measurement).

/// Flags byte under this bridge's fixed layout: UINT8 value format (bit 0),
/// sensor contact not supported (bits 1-2), no Energy Expended (bit 3),
/// no RR-Interval (bit 4).
pub const MEASUREMENT_FLAGS: u8 = 0x00;

/// Builds the notification payload: flags byte followed by the heart rate
/// as an 8-bit unsigned integer. Exactly two bytes, always.
pub fn encode_measurement(bpm: u8) -> [u8; 2] {
    [MEASUREMENT_FLAGS, bpm]
}
