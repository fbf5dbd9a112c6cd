//! IPMI network functions, commands and the OEM IANA identifier.

/// OEM IANA enterprise number, little-endian, prefixed to every OEM request.
pub const IANA_ID: [u8; 3] = [0x9C, 0x9C, 0x00];

/// Chassis network function.
pub const NETFN_CHASSIS: u8 = 0x00;
/// Application network function.
pub const NETFN_APP: u8 = 0x06;
/// Bridge IC OEM network function.
pub const NETFN_OEM_1S: u8 = 0x38;

/// Chassis control.
pub const CMD_CHASSIS_CONTROL: u8 = 0x02;
/// Chassis control data byte: power cycle.
pub const CHASSIS_POWER_CYCLE: u8 = 0x02;

/// Master write-read over a bridge-owned I2C bus.
pub const CMD_APP_MASTER_WRITE_READ: u8 = 0x52;

/// Relay a request to the next bridge.
pub const CMD_OEM_1S_MSG_OUT: u8 = 0x02;
/// Write a firmware chunk.
pub const CMD_OEM_1S_UPDATE_FW: u8 = 0x09;
/// Additive checksum of a firmware region.
pub const CMD_OEM_1S_GET_FW_CKSUM: u8 = 0x0A;
/// SHA-256 of a firmware region.
pub const CMD_OEM_1S_GET_FW_CKSUM_SHA256: u8 = 0x2E;
/// Enable or disable sensor monitoring on the bridge.
pub const CMD_OEM_1S_ENABLE_SENSOR_MONITOR: u8 = 0x2F;
/// Read or drive a bridge GPIO.
pub const CMD_OEM_1S_GET_SET_GPIO: u8 = 0x41;
/// PCIe switch download status.
pub const CMD_OEM_1S_GET_PCIE_SWITCH_STATUS: u8 = 0x43;
/// PCIe switch phase/status query and toggle.
pub const CMD_OEM_1S_PCIE_SWITCH_CTRL: u8 = 0x38;
/// List addresses answering on a bridge bus.
pub const CMD_OEM_1S_GET_DEVICE_LIST: u8 = 0x60;

/// Bridge interface selectors.
pub mod intf {
    /// Expansion board bridge.
    pub const EXP_BIC: u8 = 0x05;
    /// Baseboard bridge.
    pub const BB_BIC: u8 = 0x10;
    /// Rear expansion bridge.
    pub const REXP_BIC: u8 = 0x15;
}

/// Response byte offsets of a relayed `MSG_OUT` response, after the outer
/// completion code.
pub(crate) const RELAY_CC_OFFSET: usize = 6;
