// Signals handed to the vehicle safety layer

use serde::Serialize;

use crate::protocol::identity::IdentityField;
use crate::protocol::status::{ErrorCondition, WarningCondition};

/// What the protocol layer tells the safety layer. The safety layer decides
/// how the vehicle reacts; this crate only reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// Controller reported at least one fatal error
    Shutdown { errors: Vec<ErrorCondition> },
    /// Controller reported at least one warning
    Suspend { warnings: Vec<WarningCondition> },
    IdentityOk { field: IdentityField, value: u32 },
    IdentityMismatch {
        field: IdentityField,
        expected: u32,
        actual: u32,
    },
    /// Identity replies still missing when the startup deadline passed
    IdentityTimeout { missing: Vec<IdentityField> },
}

/// Unrecoverable protocol or transmit failure, published before exiting
#[derive(Debug, Clone, Serialize)]
pub struct FaultReport {
    pub reason: String,
}

/// Link health published by the runtime
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealth {
    /// Waiting for identity replies
    IdentityPending,
    Ok,
    /// A warning is active
    Degraded,
    /// An error, identity mismatch or identity timeout was seen
    Shutdown,
}

impl LinkHealth {
    /// Health after observing `signal`. Shutdown is sticky.
    pub fn after(self, signal: &Signal) -> Self {
        match (self, signal) {
            (LinkHealth::Shutdown, _) => LinkHealth::Shutdown,
            (_, Signal::Shutdown { .. })
            | (_, Signal::IdentityMismatch { .. })
            | (_, Signal::IdentityTimeout { .. }) => LinkHealth::Shutdown,
            (_, Signal::Suspend { .. }) => LinkHealth::Degraded,
            (health, Signal::IdentityOk { .. }) => health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_json_shape() {
        let signal = Signal::Shutdown {
            errors: vec![ErrorCondition::EpromRead, ErrorCondition::WatchdogReset],
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["signal"], "shutdown");
        assert_eq!(json["errors"][0], "eprom-read-error");
        assert_eq!(json["errors"][1], "watchdog-reset");

        let signal = Signal::IdentityMismatch {
            field: IdentityField::FirmwareVersion,
            expected: 0xDC01,
            actual: 0xDC02,
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["signal"], "identity_mismatch");
        assert_eq!(json["field"], "firmware_version");
        assert_eq!(json["actual"], 0xDC02);
    }

    #[test]
    fn test_health_transitions() {
        let suspend = Signal::Suspend { warnings: vec![] };
        let shutdown = Signal::Shutdown { errors: vec![] };
        let ok = Signal::IdentityOk {
            field: IdentityField::SerialNumber,
            value: 1,
        };

        assert_eq!(LinkHealth::Ok.after(&suspend), LinkHealth::Degraded);
        assert_eq!(LinkHealth::Degraded.after(&shutdown), LinkHealth::Shutdown);
        assert_eq!(LinkHealth::Shutdown.after(&suspend), LinkHealth::Shutdown);
        assert_eq!(
            LinkHealth::IdentityPending.after(&ok),
            LinkHealth::IdentityPending
        );
    }
}
