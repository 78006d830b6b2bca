// Outbound side of the bus
//
// Frames are built by the caller and moved into a transmitter. The adapter
// has a single transmit mailbox, so producers on different threads share it
// through `Mailbox`, which holds the lock for exactly one frame.

use std::sync::{Arc, Mutex};
use tracing::trace;

use super::frame::Frame;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Transmit mailbox poisoned by a panicked producer")]
    MailboxPoisoned,
}

/// Something that puts frames on the bus. Failure is fatal for the caller.
///
/// A transmitter is used from one context at a time. Handing the same one to
/// two threads without a lock is rejected by the compiler:
///
/// ```compile_fail
/// use mc_link::protocol::bus::Transmit;
/// use mc_link::protocol::frame::write_u16;
///
/// fn race<T: Transmit + Send>(mut tx: T) {
///     std::thread::scope(|s| {
///         s.spawn(|| tx.transmit(write_u16(0x31, 1)));
///         s.spawn(|| tx.transmit(write_u16(0x90, 2)));
///     });
/// }
/// ```
///
/// Wrap it in a [`Mailbox`] instead.
pub trait Transmit {
    fn transmit(&mut self, frame: Frame) -> Result<(), TransmitError>;
}

impl<T: Transmit + ?Sized> Transmit for Box<T> {
    fn transmit(&mut self, frame: Frame) -> Result<(), TransmitError> {
        (**self).transmit(frame)
    }
}

/// Shared, lock-guarded transmitter. Clones refer to the same mailbox.
#[derive(Debug)]
pub struct Mailbox<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transmit> Mailbox<T> {
    pub fn new(transmitter: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transmitter)),
        }
    }

    /// Run `f` with exclusive access to the transmitter
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, TransmitError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| TransmitError::MailboxPoisoned)?;
        Ok(f(&mut guard))
    }
}

impl<T: Transmit> Transmit for Mailbox<T> {
    fn transmit(&mut self, frame: Frame) -> Result<(), TransmitError> {
        trace!("Mailbox transmit {:?}", frame);
        self.with(|tx| tx.transmit(frame))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::write_u16;
    use std::thread;

    /// Copies frames byte by byte into one buffer, yielding in between so
    /// unsynchronized producers would interleave
    #[derive(Default)]
    struct ByteWire(Vec<u8>);

    impl Transmit for ByteWire {
        fn transmit(&mut self, frame: Frame) -> Result<(), TransmitError> {
            for &b in frame.as_bytes() {
                self.0.push(b);
                thread::yield_now();
            }
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_producers_do_not_interleave() {
        const PER_PRODUCER: usize = 500;
        let mailbox = Mailbox::new(ByteWire::default());

        let producers: Vec<_> = [(0x31u8, 0xAAAAu16), (0x90, 0xBBBB)]
            .into_iter()
            .map(|(register, value)| {
                let mut tx = mailbox.clone();
                thread::spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        tx.transmit(write_u16(register, value)).unwrap();
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        let wire = mailbox.with(|w| w.0.clone()).unwrap();
        assert_eq!(wire.len(), 2 * PER_PRODUCER * 3);
        for chunk in wire.chunks(3) {
            assert!(
                chunk == [0x31, 0xAA, 0xAA] || chunk == [0x90, 0xBB, 0xBB],
                "interleaved frame on the wire: {:02X?}",
                chunk
            );
        }
    }

    #[test]
    fn test_poisoned_mailbox_reports_error() {
        let mailbox = Mailbox::new(ByteWire::default());
        let poisoner = mailbox.clone();
        let _ = thread::spawn(move || {
            let _: Result<(), _> = poisoner.with(|_| panic!("producer died holding the mailbox"));
        })
        .join();

        let mut tx = mailbox;
        assert!(matches!(
            tx.transmit(write_u16(0x31, 1)),
            Err(TransmitError::MailboxPoisoned)
        ));
    }
}
