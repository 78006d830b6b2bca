// Bus transports
//
// Only SLCAN (serial CAN adapter) for now.

pub mod slcan;

pub use slcan::SlcanPort;

/// Error types for adapter communication
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed adapter line {line:?}: {reason}")]
    Malformed { line: String, reason: String },

    #[error("Adapter refused the last command")]
    Refused,

    #[error("No answer from adapter to {0:?}")]
    NoReply(String),

    #[error("Unsupported CAN bitrate {0} bit/s")]
    Bitrate(u32),
}

pub type Result<T> = std::result::Result<T, TransportError>;
