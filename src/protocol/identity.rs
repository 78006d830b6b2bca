// Identity handshake: the controller we talk to must be the one we expect
//
// Serial number frame: [0x62, B0, B1, B2, B3] (big-endian u32)
// Firmware frame:      [0x1B, B0, B1]         (big-endian u16)

use serde::{Deserialize, Serialize};

use crate::messages::Signal;

/// Serial number of the controller fitted to the vehicle
pub const EXPECTED_SERIAL_NUMBER: u32 = 0x627E_7A01;
/// Firmware revision the vehicle software was validated against
pub const EXPECTED_FIRMWARE_VERSION: u16 = 0xDC01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    SerialNumber,
    FirmwareVersion,
}

/// Expected identity, fixed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub serial_number: u32,
    pub firmware_version: u16,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            serial_number: EXPECTED_SERIAL_NUMBER,
            firmware_version: EXPECTED_FIRMWARE_VERSION,
        }
    }
}

/// Compares identity replies against the expected identity
#[derive(Debug, Clone, Copy)]
pub struct IdentityValidator {
    expected: Identity,
}

impl IdentityValidator {
    pub fn new(expected: Identity) -> Self {
        Self { expected }
    }

    pub fn expected(&self) -> Identity {
        self.expected
    }

    pub fn check_serial(&self, payload: [u8; 4]) -> Signal {
        let actual = u32::from_be_bytes(payload);
        Self::compare(
            IdentityField::SerialNumber,
            self.expected.serial_number,
            actual,
        )
    }

    pub fn check_firmware(&self, payload: [u8; 2]) -> Signal {
        let actual = u16::from_be_bytes(payload);
        Self::compare(
            IdentityField::FirmwareVersion,
            u32::from(self.expected.firmware_version),
            u32::from(actual),
        )
    }

    fn compare(field: IdentityField, expected: u32, actual: u32) -> Signal {
        if actual == expected {
            Signal::IdentityOk {
                field,
                value: actual,
            }
        } else {
            Signal::IdentityMismatch {
                field,
                expected,
                actual,
            }
        }
    }
}

impl Default for IdentityValidator {
    fn default() -> Self {
        Self::new(Identity::default())
    }
}
