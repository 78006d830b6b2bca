// Register map of the motor controller
//
// Every frame on the bus starts with a register id byte. Inbound frames carry
// one of the registers below; any other byte is a protocol violation.

use std::fmt;

/// Opcode that asks the controller to send back the value of a register
pub const READ_REQUEST: u8 = 0x3D;

/// Writable setpoint registers (write path only, never dispatched inbound)
pub const SPEED_SETPOINT: u8 = 0x31;
pub const TORQUE_SETPOINT: u8 = 0x90;

/// Registers the controller reports back to us
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId {
    ActualSpeed = 0x30,     // 2 bytes, not decoded here
    FirmwareVersion = 0x1B, // 2 bytes, big-endian
    SerialNumber = 0x62,    // 4 bytes, big-endian
    Status = 0x8F,          // 2 bytes errors + 2 bytes warnings
}

impl RegisterId {
    pub const ALL: [RegisterId; 4] = [
        RegisterId::Status,
        RegisterId::ActualSpeed,
        RegisterId::SerialNumber,
        RegisterId::FirmwareVersion,
    ];

    /// Payload bytes this register needs, not counting the register id
    pub fn payload_len(self) -> usize {
        match self {
            RegisterId::Status => 4,
            RegisterId::ActualSpeed => 0,
            RegisterId::SerialNumber => 4,
            RegisterId::FirmwareVersion => 2,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<RegisterId> for u8 {
    fn from(id: RegisterId) -> u8 {
        id as u8
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterId::Status => "status",
            RegisterId::ActualSpeed => "actual-speed",
            RegisterId::SerialNumber => "serial-number",
            RegisterId::FirmwareVersion => "firmware-version",
        };
        write!(f, "{} (0x{:02X})", name, self.code())
    }
}

/// Result of looking up a raw register byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Known(RegisterId),
    Unrecognized(u8),
}

impl From<u8> for Register {
    fn from(byte: u8) -> Self {
        RegisterId::ALL
            .into_iter()
            .find(|id| id.code() == byte)
            .map_or(Register::Unrecognized(byte), Register::Known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip() {
        for id in RegisterId::ALL {
            assert_eq!(Register::from(id.code()), Register::Known(id));
        }
    }

    #[test]
    fn test_everything_else_is_unrecognized() {
        let known: Vec<u8> = RegisterId::ALL.iter().map(|id| id.code()).collect();
        for byte in 0..=u8::MAX {
            if !known.contains(&byte) {
                assert_eq!(Register::from(byte), Register::Unrecognized(byte));
            }
        }
    }

    #[test]
    fn test_read_request_opcode_is_not_a_register() {
        assert_eq!(Register::from(READ_REQUEST), Register::Unrecognized(0x3D));
    }
}
