// Inbound frame dispatch
//
// Runs synchronously for every received frame, so handlers must not block.

use tracing::{debug, error};

use super::frame::Frame;
use super::identity::IdentityValidator;
use super::register::{Register, RegisterId};
use super::status::StatusReport;
use super::{ProtocolError, Result};
use crate::messages::Signal;

/// Receiver of everything the dispatcher decodes
pub trait SignalSink {
    /// Fatal controller errors are active
    fn shutdown(&mut self, signal: Signal);
    /// Controller warnings are active
    fn suspend(&mut self, signal: Signal);
    /// Outcome of an identity check (match or mismatch)
    fn identity(&mut self, signal: Signal);
    /// Speed feedback. Not decoded yet.
    fn actual_speed(&mut self, _payload: &[u8]) {}
    /// Unrecoverable protocol violation
    fn report_fatal(&mut self, error: &ProtocolError);
}

/// Collects signals in arrival order; fatal reports are dropped (they are
/// also returned from `dispatch`).
impl SignalSink for Vec<Signal> {
    fn shutdown(&mut self, signal: Signal) {
        self.push(signal);
    }

    fn suspend(&mut self, signal: Signal) {
        self.push(signal);
    }

    fn identity(&mut self, signal: Signal) {
        self.push(signal);
    }

    fn report_fatal(&mut self, _error: &ProtocolError) {}
}

/// Routes inbound frames by register id
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    validator: IdentityValidator,
}

impl Dispatcher {
    pub fn new(validator: IdentityValidator) -> Self {
        Self { validator }
    }

    /// Decode `frame` and hand the result to `sink`.
    ///
    /// Returns the register the frame was routed to. Unknown registers and
    /// short payloads are reported to `sink.report_fatal` and returned as
    /// errors without touching any handler.
    pub fn dispatch<S: SignalSink + ?Sized>(&self, frame: &Frame, sink: &mut S) -> Result<RegisterId> {
        match self.route(frame) {
            Ok(id) => {
                self.deliver(id, frame.payload(), sink);
                Ok(id)
            }
            Err(e) => {
                error!("Rejected inbound {:?}: {}", frame, e);
                sink.report_fatal(&e);
                Err(e)
            }
        }
    }

    fn route(&self, frame: &Frame) -> Result<RegisterId> {
        let id = match Register::from(frame.register()) {
            Register::Known(id) => id,
            Register::Unrecognized(byte) => return Err(ProtocolError::UnrecognizedRegister(byte)),
        };

        let actual = frame.payload().len();
        if actual < id.payload_len() {
            return Err(ProtocolError::ShortPayload {
                register: id,
                expected: id.payload_len(),
                actual,
            });
        }
        Ok(id)
    }

    // Payload length was checked in `route`
    fn deliver<S: SignalSink + ?Sized>(&self, id: RegisterId, payload: &[u8], sink: &mut S) {
        match id {
            RegisterId::Status => {
                let report =
                    StatusReport::decode([payload[0], payload[1], payload[2], payload[3]]);
                debug!("Status: errors=0x{:04X} warnings=0x{:04X}", report.errors.0, report.warnings.0);
                if let Some(signal) = report.shutdown() {
                    sink.shutdown(signal);
                }
                if let Some(signal) = report.suspend() {
                    sink.suspend(signal);
                }
            }
            RegisterId::ActualSpeed => sink.actual_speed(payload),
            RegisterId::SerialNumber => {
                let signal = self
                    .validator
                    .check_serial([payload[0], payload[1], payload[2], payload[3]]);
                sink.identity(signal);
            }
            RegisterId::FirmwareVersion => {
                let signal = self.validator.check_firmware([payload[0], payload[1]]);
                sink.identity(signal);
            }
        }
    }
}
