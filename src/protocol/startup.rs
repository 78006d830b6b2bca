// Startup identity handshake
//
// At boot we ask for the serial number and firmware version and carry on.
// Replies come back through normal dispatch. The controller never resends,
// so an optional deadline decides whether silence is a fault; without one
// we wait forever.

use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::bus::{Transmit, TransmitError};
use super::frame::build_read_request;
use super::identity::IdentityField;
use super::register::RegisterId;
use crate::messages::Signal;

/// Requests identity registers at boot and tracks the replies
#[derive(Debug)]
pub struct StartupSequencer {
    deadline: Option<Duration>,
    started_at: Option<Instant>,
    pending: Vec<IdentityField>,
    timed_out: bool,
}

impl StartupSequencer {
    /// `deadline`: how long to wait for both replies, `None` to wait forever
    pub fn new(deadline: Option<Duration>) -> Self {
        Self {
            deadline,
            started_at: None,
            pending: Vec::new(),
            timed_out: false,
        }
    }

    /// Send both identity read requests, serial number first. Does not wait.
    pub fn start<T: Transmit + ?Sized>(&mut self, tx: &mut T, now: Instant) -> Result<(), TransmitError> {
        info!("Requesting controller identity");
        tx.transmit(build_read_request(RegisterId::SerialNumber))?;
        tx.transmit(build_read_request(RegisterId::FirmwareVersion))?;

        self.started_at = Some(now);
        self.pending = vec![IdentityField::SerialNumber, IdentityField::FirmwareVersion];
        self.timed_out = false;
        Ok(())
    }

    /// Mark a reply as received (match or mismatch both count)
    pub fn acknowledge(&mut self, field: IdentityField) {
        self.pending.retain(|f| *f != field);
    }

    /// Feed a dispatched signal; identity outcomes acknowledge their field
    pub fn observe(&mut self, signal: &Signal) {
        match signal {
            Signal::IdentityOk { field, .. } | Signal::IdentityMismatch { field, .. } => {
                self.acknowledge(*field)
            }
            _ => {}
        }
    }

    pub fn is_complete(&self) -> bool {
        self.started_at.is_some() && self.pending.is_empty()
    }

    pub fn pending(&self) -> &[IdentityField] {
        &self.pending
    }

    /// Check the deadline. Yields `IdentityTimeout` at most once per start.
    pub fn poll(&mut self, now: Instant) -> Option<Signal> {
        let (deadline, started_at) = (self.deadline?, self.started_at?);
        if self.timed_out || self.pending.is_empty() {
            return None;
        }
        if now.saturating_duration_since(started_at) < deadline {
            return None;
        }

        self.timed_out = true;
        warn!(
            "No identity reply for {:?} after {}ms",
            self.pending,
            deadline.as_millis()
        );
        Some(Signal::IdentityTimeout {
            missing: self.pending.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::Frame;

    #[derive(Default)]
    struct Capture(Vec<Frame>);

    impl Transmit for Capture {
        fn transmit(&mut self, frame: Frame) -> Result<(), TransmitError> {
            self.0.push(frame);
            Ok(())
        }
    }

    struct Broken;

    impl Transmit for Broken {
        fn transmit(&mut self, _frame: Frame) -> Result<(), TransmitError> {
            Err(TransmitError::MailboxPoisoned)
        }
    }

    #[test]
    fn test_start_sends_serial_then_firmware() {
        let mut tx = Capture::default();
        let mut seq = StartupSequencer::new(None);
        seq.start(&mut tx, Instant::now()).unwrap();

        let sent: Vec<&[u8]> = tx.0.iter().map(|f| f.as_bytes()).collect();
        assert_eq!(sent, vec![&[0x3D, 0x62][..], &[0x3D, 0x1B][..]]);
        assert!(!seq.is_complete());
    }

    #[test]
    fn test_transmit_failure_propagates() {
        let mut seq = StartupSequencer::new(None);
        assert!(seq.start(&mut Broken, Instant::now()).is_err());
    }

    #[test]
    fn test_replies_complete_the_handshake() {
        let mut seq = StartupSequencer::new(Some(Duration::from_millis(100)));
        let t0 = Instant::now();
        seq.start(&mut Capture::default(), t0).unwrap();

        seq.observe(&Signal::IdentityOk {
            field: IdentityField::SerialNumber,
            value: 0,
        });
        assert_eq!(seq.pending(), &[IdentityField::FirmwareVersion]);

        seq.observe(&Signal::IdentityMismatch {
            field: IdentityField::FirmwareVersion,
            expected: 1,
            actual: 2,
        });
        assert!(seq.is_complete());
        assert_eq!(seq.poll(t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_no_deadline_waits_forever() {
        let mut seq = StartupSequencer::new(None);
        let t0 = Instant::now();
        seq.start(&mut Capture::default(), t0).unwrap();
        assert_eq!(seq.poll(t0 + Duration::from_secs(3600)), None);
    }

    #[test]
    fn test_deadline_reports_missing_once() {
        let mut seq = StartupSequencer::new(Some(Duration::from_millis(500)));
        let t0 = Instant::now();
        seq.start(&mut Capture::default(), t0).unwrap();
        seq.acknowledge(IdentityField::SerialNumber);

        assert_eq!(seq.poll(t0 + Duration::from_millis(499)), None);
        assert_eq!(
            seq.poll(t0 + Duration::from_millis(500)),
            Some(Signal::IdentityTimeout {
                missing: vec![IdentityField::FirmwareVersion]
            })
        );
        assert_eq!(seq.poll(t0 + Duration::from_millis(600)), None);
    }

    #[test]
    fn test_poll_before_start_is_quiet() {
        let mut seq = StartupSequencer::new(Some(Duration::ZERO));
        assert_eq!(seq.poll(Instant::now()), None);
    }
}
