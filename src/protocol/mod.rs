// Motor controller register protocol
//
// Provides:
// - Register map and frame layout
// - Read/write request construction
// - Error/warning status decoding
// - Identity handshake and inbound dispatch

pub mod bus;
pub mod dispatch;
pub mod frame;
pub mod identity;
pub mod register;
pub mod startup;
pub mod status;

pub use bus::{Mailbox, Transmit, TransmitError};
pub use dispatch::{Dispatcher, SignalSink};
pub use frame::{build_read_request, build_write_request, write_value, Frame};
pub use identity::{Identity, IdentityField, IdentityValidator};
pub use register::{Register, RegisterId};
pub use startup::StartupSequencer;
pub use status::{ErrorCondition, StatusReport, WarningCondition};

/// Protocol violations. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unrecognized register id 0x{0:02X}")]
    UnrecognizedRegister(u8),

    #[error("Unsupported write width {0} (expected 2 or 4)")]
    UnsupportedWidth(usize),

    #[error("Write value has {len} bytes, width is {width}")]
    ValueLength { width: usize, len: usize },

    #[error("Value 0x{value:X} does not fit in {width} bytes")]
    ValueRange { value: u32, width: usize },

    #[error("Register {register} needs {expected} payload bytes, got {actual}")]
    ShortPayload {
        register: RegisterId,
        expected: usize,
        actual: usize,
    },

    #[error("Frame length {0} out of range 1..=8")]
    FrameLength(usize),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
