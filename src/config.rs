// Serial port, CAN ids, identity and topics
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::protocol::identity::{EXPECTED_FIRMWARE_VERSION, EXPECTED_SERIAL_NUMBER, Identity};
use crate::transport::slcan::DEFAULT_BAUDRATE;

// Serial port of the SLCAN adapter
pub const ADAPTER_PORT: &str = "/dev/ttyACM0";

// CAN bitrate the motor controller is configured for
pub const CAN_BITRATE: u32 = 500_000;

// CAN ids: host -> controller and controller -> host
pub const CAN_ID_TX: u16 = 0x201;
pub const CAN_ID_RX: u16 = 0x181;

// Health publish rate, also how often the identity deadline is checked
pub const LOOP_HZ: u64 = 10;

// Zenoh topics
pub const TOPIC_SHUTDOWN: &str = "mc/safety/shutdown"; // error bitmap nonzero
pub const TOPIC_SUSPEND: &str = "mc/safety/suspend"; // warning bitmap nonzero
pub const TOPIC_IDENTITY: &str = "mc/identity"; // handshake outcome
pub const TOPIC_FAULT: &str = "mc/fault"; // fatal protocol/transmit failure
pub const TOPIC_HEALTH: &str = "mc/state/health";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Runtime configuration. Every field has a default, so a config file only
/// needs the values it changes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub port: String,
    pub baudrate: u32,
    pub bitrate: u32,
    pub tx_id: u16,
    pub rx_id: u16,
    pub expected_serial_number: u32,
    pub expected_firmware_version: u16,
    /// Give up on identity replies after this long. Absent: wait forever.
    pub identity_timeout_ms: Option<u64>,
    /// Publish signals on zenoh; off means log only
    pub publish: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: ADAPTER_PORT.to_string(),
            baudrate: DEFAULT_BAUDRATE,
            bitrate: CAN_BITRATE,
            tx_id: CAN_ID_TX,
            rx_id: CAN_ID_RX,
            expected_serial_number: EXPECTED_SERIAL_NUMBER,
            expected_firmware_version: EXPECTED_FIRMWARE_VERSION,
            identity_timeout_ms: None,
            publish: true,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            serial_number: self.expected_serial_number,
            firmware_version: self.expected_firmware_version,
        }
    }

    pub fn identity_timeout(&self) -> Option<Duration> {
        self.identity_timeout_ms.map(Duration::from_millis)
    }
}
