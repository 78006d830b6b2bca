// Frame layout and outbound frame construction
//
// Frame format: [Register, Payload...]
// Read request: [0x3D, Register]
// Write request: [Register, value little-endian (2 or 4 bytes)]

use std::fmt;

use super::register::READ_REQUEST;
use super::{ProtocolError, Result};

/// Largest frame the bus carries (classic CAN data field)
pub const MAX_FRAME_LEN: usize = 8;

/// A single bus frame. Owned and `Copy`; handed to the transmitter by value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    data: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Frame {
    /// Build a frame from raw bytes (register id first)
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameLength(bytes.len()));
        }
        let mut data = [0u8; MAX_FRAME_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            data,
            len: bytes.len(),
        })
    }

    /// The leading register id byte
    pub fn register(&self) -> u8 {
        self.data[0]
    }

    /// Everything after the register id
    pub fn payload(&self) -> &[u8] {
        &self.data[1..self.len]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Declared length (DLC) as put on the wire
    pub fn dlc(&self) -> usize {
        self.len
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:02X?})", self.as_bytes())
    }
}

/// Ask the controller for the current value of `register`
pub fn build_read_request(register: impl Into<u8>) -> Frame {
    let mut data = [0u8; MAX_FRAME_LEN];
    data[0] = READ_REQUEST;
    data[1] = register.into();
    Frame { data, len: 2 }
}

/// Build a write to `register`.
///
/// `value` is given most significant byte first and must be exactly `width`
/// bytes long. The controller expects it least significant byte first, so
/// the bytes are reversed on the way out.
pub fn build_write_request(register: impl Into<u8>, value: &[u8], width: usize) -> Result<Frame> {
    if width != 2 && width != 4 {
        return Err(ProtocolError::UnsupportedWidth(width));
    }
    if value.len() != width {
        return Err(ProtocolError::ValueLength {
            width,
            len: value.len(),
        });
    }

    let mut data = [0u8; MAX_FRAME_LEN];
    data[0] = register.into();
    for (slot, byte) in data[1..=width].iter_mut().zip(value.iter().rev()) {
        *slot = *byte;
    }
    Ok(Frame {
        data,
        len: width + 1,
    })
}

/// Write `value` as `width` bytes. Values that need more bytes than
/// `width` are rejected, never truncated.
pub fn write_value(register: impl Into<u8>, value: u32, width: usize) -> Result<Frame> {
    if width != 2 && width != 4 {
        return Err(ProtocolError::UnsupportedWidth(width));
    }
    let bytes = value.to_be_bytes();
    let (high, low) = bytes.split_at(bytes.len() - width);
    if high.iter().any(|&b| b != 0) {
        return Err(ProtocolError::ValueRange { value, width });
    }
    build_write_request(register, low, width)
}

/// Write a 16-bit value
pub fn write_u16(register: impl Into<u8>, value: u16) -> Frame {
    let mut data = [0u8; MAX_FRAME_LEN];
    data[0] = register.into();
    data[1..3].copy_from_slice(&value.to_le_bytes());
    Frame { data, len: 3 }
}

/// Write a 32-bit value
pub fn write_u32(register: impl Into<u8>, value: u32) -> Frame {
    let mut data = [0u8; MAX_FRAME_LEN];
    data[0] = register.into();
    data[1..5].copy_from_slice(&value.to_le_bytes());
    Frame { data, len: 5 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::register::{RegisterId, SPEED_SETPOINT, TORQUE_SETPOINT};

    #[test]
    fn test_read_request_layout() {
        for id in RegisterId::ALL {
            let frame = build_read_request(id);
            assert_eq!(frame.as_bytes(), &[0x3D, id.code()]);
            assert_eq!(frame.dlc(), 2);
        }
        assert_eq!(build_read_request(0x42u8).as_bytes(), &[0x3D, 0x42]);
    }

    #[test]
    fn test_write_request_reverses_bytes() {
        let frame = build_write_request(SPEED_SETPOINT, &[0x12, 0x34], 2).unwrap();
        assert_eq!(frame.as_bytes(), &[0x31, 0x34, 0x12]);

        let frame = build_write_request(TORQUE_SETPOINT, &[0x12, 0x34, 0x56, 0x78], 4).unwrap();
        assert_eq!(frame.as_bytes(), &[0x90, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_write_request_round_trip() {
        for value in [0u16, 1, 0x00FF, 0x1234, 0xFF00, u16::MAX] {
            let frame = build_write_request(SPEED_SETPOINT, &value.to_be_bytes(), 2).unwrap();
            let payload: [u8; 2] = frame.payload().try_into().unwrap();
            assert_eq!(u16::from_le_bytes(payload), value);
        }

        for value in [0u32, 1, 0x627E_7A01, 0xDEAD_BEEF, u32::MAX] {
            let frame = build_write_request(SPEED_SETPOINT, &value.to_be_bytes(), 4).unwrap();
            let payload: [u8; 4] = frame.payload().try_into().unwrap();
            assert_eq!(u32::from_le_bytes(payload), value);
        }
    }

    #[test]
    fn test_integer_helpers_match_byte_builder() {
        assert_eq!(
            write_u16(SPEED_SETPOINT, 0xABCD),
            build_write_request(SPEED_SETPOINT, &[0xAB, 0xCD], 2).unwrap()
        );
        assert_eq!(
            write_u32(TORQUE_SETPOINT, 0x0102_0304),
            build_write_request(TORQUE_SETPOINT, &[1, 2, 3, 4], 4).unwrap()
        );
    }

    #[test]
    fn test_unsupported_width() {
        for width in [0, 1, 3, 5, 8] {
            let value = vec![0u8; width];
            assert!(matches!(
                build_write_request(SPEED_SETPOINT, &value, width),
                Err(ProtocolError::UnsupportedWidth(w)) if w == width
            ));
        }
    }

    #[test]
    fn test_value_must_match_width() {
        // No reading past the end of a short buffer
        assert!(matches!(
            build_write_request(SPEED_SETPOINT, &[0x12], 2),
            Err(ProtocolError::ValueLength { width: 2, len: 1 })
        ));
        assert!(matches!(
            build_write_request(SPEED_SETPOINT, &[1, 2, 3, 4, 5], 4),
            Err(ProtocolError::ValueLength { width: 4, len: 5 })
        ));
    }

    #[test]
    fn test_write_value_checks_range() {
        let frame = write_value(SPEED_SETPOINT, 0x1234, 2).unwrap();
        assert_eq!(frame, write_u16(SPEED_SETPOINT, 0x1234));
        let frame = write_value(TORQUE_SETPOINT, 0x0001_2345, 4).unwrap();
        assert_eq!(frame, write_u32(TORQUE_SETPOINT, 0x0001_2345));

        assert!(matches!(
            write_value(SPEED_SETPOINT, 0x0001_2345, 2),
            Err(ProtocolError::ValueRange {
                value: 0x0001_2345,
                width: 2
            })
        ));
        assert!(matches!(
            write_value(SPEED_SETPOINT, 0x12, 3),
            Err(ProtocolError::UnsupportedWidth(3))
        ));
    }

    #[test]
    fn test_frame_new_bounds() {
        assert!(matches!(Frame::new(&[]), Err(ProtocolError::FrameLength(0))));
        assert!(matches!(
            Frame::new(&[0; 9]),
            Err(ProtocolError::FrameLength(9))
        ));

        let frame = Frame::new(&[0x1B, 0xDC, 0x01]).unwrap();
        assert_eq!(frame.register(), 0x1B);
        assert_eq!(frame.payload(), &[0xDC, 0x01]);
        assert_eq!(frame.dlc(), 3);
    }
}
