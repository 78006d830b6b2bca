// Link runtime: adapter in, signals out
//
// Frames are read on a blocking thread and handed over one at a time, so
// dispatch always runs to completion before the next frame is looked at.
// A periodic tick publishes link health and checks the identity deadline.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use zenoh::pubsub::Publisher;

use crate::config::{
    Config, LOOP_HZ, TOPIC_FAULT, TOPIC_HEALTH, TOPIC_IDENTITY, TOPIC_SHUTDOWN, TOPIC_SUSPEND,
};
use crate::messages::{FaultReport, LinkHealth, Signal};
use crate::protocol::{
    Dispatcher, Frame, IdentityValidator, Mailbox, ProtocolError, RegisterId, SignalSink,
    StartupSequencer, Transmit, TransmitError, build_read_request,
};
use crate::transport::{SlcanPort, TransportError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Topic a signal is published on
pub fn topic(signal: &Signal) -> &'static str {
    match signal {
        Signal::Shutdown { .. } => TOPIC_SHUTDOWN,
        Signal::Suspend { .. } => TOPIC_SUSPEND,
        Signal::IdentityOk { .. }
        | Signal::IdentityMismatch { .. }
        | Signal::IdentityTimeout { .. } => TOPIC_IDENTITY,
    }
}

/// Collects what one dispatch produced
#[derive(Default)]
struct Collected {
    signals: Vec<Signal>,
    speed_frames: usize,
}

impl SignalSink for Collected {
    fn shutdown(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    fn suspend(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    fn identity(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    fn actual_speed(&mut self, _payload: &[u8]) {
        self.speed_frames += 1;
    }

    // Logged by the dispatcher and returned from `on_frame`
    fn report_fatal(&mut self, _error: &ProtocolError) {}
}

pub struct Runtime {
    dispatcher: Dispatcher,
    startup: StartupSequencer,
    health: LinkHealth,
}

impl Runtime {
    pub fn new(config: &Config) -> Self {
        Self {
            dispatcher: Dispatcher::new(IdentityValidator::new(config.identity())),
            startup: StartupSequencer::new(config.identity_timeout()),
            health: LinkHealth::IdentityPending,
        }
    }

    pub fn health(&self) -> LinkHealth {
        self.health
    }

    /// Kick off the identity handshake
    pub fn start<T: Transmit + ?Sized>(&mut self, tx: &mut T, now: Instant) -> Result<(), TransmitError> {
        self.startup.start(tx, now)
    }

    /// Dispatch one inbound frame; returns the signals to publish
    pub fn on_frame(&mut self, frame: &Frame) -> Result<Vec<Signal>, ProtocolError> {
        let mut collected = Collected::default();
        let register = self.dispatcher.dispatch(frame, &mut collected)?;
        if collected.speed_frames > 0 {
            debug!("Speed feedback {:02X?}", frame.payload());
        } else if collected.signals.is_empty() {
            debug!("{} clear", register);
        }

        for signal in &collected.signals {
            self.observe(signal);
        }
        Ok(collected.signals)
    }

    /// Periodic check; yields the identity timeout once if it fires
    pub fn on_tick(&mut self, now: Instant) -> Option<Signal> {
        let signal = self.startup.poll(now)?;
        self.observe(&signal);
        Some(signal)
    }

    fn observe(&mut self, signal: &Signal) {
        match signal {
            Signal::Shutdown { errors } => error!("Controller errors, shutdown: {:?}", errors),
            Signal::Suspend { warnings } => warn!("Controller warnings, suspend: {:?}", warnings),
            Signal::IdentityOk { field, value } => info!("{:?} ok: 0x{:X}", field, value),
            Signal::IdentityMismatch {
                field,
                expected,
                actual,
            } => error!(
                "{:?} mismatch: expected 0x{:X}, got 0x{:X}",
                field, expected, actual
            ),
            Signal::IdentityTimeout { missing } => {
                error!("Identity handshake timed out, missing {:?}", missing)
            }
        }

        self.startup.observe(signal);
        let previous = self.health;
        self.health = self.health.after(signal);
        if self.health == LinkHealth::IdentityPending && self.startup.is_complete() {
            self.health = LinkHealth::Ok;
        }
        if self.health != previous {
            info!("Link health {:?} -> {:?}", previous, self.health);
        }
    }
}

/// Where signals, health and faults go
trait Publish {
    async fn signal(&self, signal: &Signal) -> Result<(), BoxError>;
    async fn health(&self, health: LinkHealth) -> Result<(), BoxError>;
    async fn fault(&self, reason: String) -> Result<(), BoxError>;
}

/// Zenoh publishers for the safety layer
// Publishers are dropped before the session they were declared on
struct SignalPublisher {
    shutdown: Publisher<'static>,
    suspend: Publisher<'static>,
    identity: Publisher<'static>,
    fault: Publisher<'static>,
    health: Publisher<'static>,
    _session: zenoh::Session,
}

impl SignalPublisher {
    async fn open() -> Result<Self, BoxError> {
        info!("Opening Zenoh session...");
        let session = zenoh::open(zenoh::Config::default()).await?;
        Ok(Self {
            shutdown: session.declare_publisher(TOPIC_SHUTDOWN).await?,
            suspend: session.declare_publisher(TOPIC_SUSPEND).await?,
            identity: session.declare_publisher(TOPIC_IDENTITY).await?,
            fault: session.declare_publisher(TOPIC_FAULT).await?,
            health: session.declare_publisher(TOPIC_HEALTH).await?,
            _session: session,
        })
    }
}

impl Publish for SignalPublisher {
    async fn signal(&self, signal: &Signal) -> Result<(), BoxError> {
        let publisher = match topic(signal) {
            TOPIC_SHUTDOWN => &self.shutdown,
            TOPIC_SUSPEND => &self.suspend,
            _ => &self.identity,
        };
        publisher.put(serde_json::to_string(signal)?).await?;
        Ok(())
    }

    async fn health(&self, health: LinkHealth) -> Result<(), BoxError> {
        self.health.put(serde_json::to_string(&health)?).await?;
        Ok(())
    }

    async fn fault(&self, reason: String) -> Result<(), BoxError> {
        let report = FaultReport { reason };
        self.fault.put(serde_json::to_string(&report)?).await?;
        Ok(())
    }
}

async fn publish_fault<P: Publish>(publisher: Option<&P>, reason: String) {
    if let Some(p) = publisher {
        if let Err(e) = p.fault(reason).await {
            warn!("Failed to publish fault: {}", e);
        }
    }
}

/// Publish signals, then health if given. A failed put is fatal and is
/// reported on the fault topic like any other.
async fn publish<P: Publish>(
    publisher: Option<&P>,
    signals: &[Signal],
    health: Option<LinkHealth>,
) -> Result<(), BoxError> {
    let Some(p) = publisher else {
        return Ok(());
    };
    let result = async {
        for signal in signals {
            p.signal(signal).await?;
        }
        if let Some(health) = health {
            p.health(health).await?;
        }
        Ok::<(), BoxError>(())
    }
    .await;

    if let Err(e) = &result {
        error!("Publishing failed: {}", e);
        publish_fault(Some(p), e.to_string()).await;
    }
    result
}

/// Receive frames on a blocking thread. Stops after the first transport
/// error (which is forwarded) or when the runtime goes away.
fn spawn_reader(mut reader: SlcanPort) -> mpsc::Receiver<Result<Frame, TransportError>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::task::spawn_blocking(move || {
        loop {
            let item = match reader.recv() {
                Ok(Some(frame)) => Ok(frame),
                Ok(None) if tx.is_closed() => break,
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn run(config: Config) -> Result<(), BoxError> {
    info!("Opening adapter on {}", config.port);
    let adapter = SlcanPort::open(
        &config.port,
        config.baudrate,
        config.bitrate,
        config.tx_id,
        config.rx_id,
    )?;
    let mut frames = spawn_reader(adapter.try_clone()?);
    let mut mailbox = Mailbox::new(adapter);

    let publisher = if config.publish {
        Some(SignalPublisher::open().await?)
    } else {
        info!("Publishing disabled, signals are logged only");
        None
    };

    let mut runtime = Runtime::new(&config);
    if let Err(e) = runtime.start(&mut mailbox, Instant::now()) {
        publish_fault(publisher.as_ref(), e.to_string()).await;
        return Err(e.into());
    }

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    match config.identity_timeout() {
        Some(deadline) => info!(
            "Runtime started: {}Hz health, {}ms identity deadline",
            LOOP_HZ,
            deadline.as_millis()
        ),
        None => info!("Runtime started: {}Hz health, no identity deadline", LOOP_HZ),
    }

    loop {
        tokio::select! {
            received = frames.recv() => {
                let frame = match received {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        error!("Adapter receive failed: {}", e);
                        publish_fault(publisher.as_ref(), e.to_string()).await;
                        return Err(e.into());
                    }
                    None => return Err("adapter reader stopped".into()),
                };

                let signals = match runtime.on_frame(&frame) {
                    Ok(signals) => signals,
                    Err(e) => {
                        publish_fault(publisher.as_ref(), e.to_string()).await;
                        return Err(e.into());
                    }
                };
                publish(publisher.as_ref(), &signals, None).await?;
            }
            _ = tick.tick() => {
                let timeout = runtime.on_tick(Instant::now());
                publish(publisher.as_ref(), timeout.as_slice(), Some(runtime.health())).await?;
            }
        }
    }
}

/// Request one register and wait for its reply. Used by the CLI.
pub fn read_register(
    config: &Config,
    register: RegisterId,
    timeout: Duration,
) -> Result<(Frame, Vec<Signal>), BoxError> {
    let mut adapter = SlcanPort::open(
        &config.port,
        config.baudrate,
        config.bitrate,
        config.tx_id,
        config.rx_id,
    )?;
    adapter.transmit(build_read_request(register))?;

    let dispatcher = Dispatcher::new(IdentityValidator::new(config.identity()));
    let started = Instant::now();
    while started.elapsed() < timeout {
        let Some(frame) = adapter.recv()? else {
            continue;
        };
        if frame.register() != register.code() {
            debug!("Ignoring {:?} while waiting for {}", frame, register);
            continue;
        }
        let mut signals = Vec::new();
        dispatcher.dispatch(&frame, &mut signals)?;
        return Ok((frame, signals));
    }
    Err(format!("no reply for {} within {}ms", register, timeout.as_millis()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::identity::IdentityField;

    #[derive(Default)]
    struct Capture(Vec<Frame>);

    impl Transmit for Capture {
        fn transmit(&mut self, frame: Frame) -> Result<(), TransmitError> {
            self.0.push(frame);
            Ok(())
        }
    }

    fn frame(bytes: &[u8]) -> Frame {
        Frame::new(bytes).unwrap()
    }

    #[test]
    fn test_handshake_brings_link_up() {
        let mut runtime = Runtime::new(&Config::default());
        let mut tx = Capture::default();
        runtime.start(&mut tx, Instant::now()).unwrap();
        assert_eq!(tx.0.len(), 2);
        assert_eq!(runtime.health(), LinkHealth::IdentityPending);

        runtime.on_frame(&frame(&[0x62, 0x62, 0x7E, 0x7A, 0x01])).unwrap();
        assert_eq!(runtime.health(), LinkHealth::IdentityPending);
        runtime.on_frame(&frame(&[0x1B, 0xDC, 0x01])).unwrap();
        assert_eq!(runtime.health(), LinkHealth::Ok);
    }

    #[test]
    fn test_warning_then_error() {
        let mut runtime = Runtime::new(&Config::default());
        runtime.start(&mut Capture::default(), Instant::now()).unwrap();
        runtime.on_frame(&frame(&[0x62, 0x62, 0x7E, 0x7A, 0x01])).unwrap();
        runtime.on_frame(&frame(&[0x1B, 0xDC, 0x01])).unwrap();

        let signals = runtime.on_frame(&frame(&[0x8F, 0, 0, 0x40, 0])).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(topic(&signals[0]), TOPIC_SUSPEND);
        assert_eq!(runtime.health(), LinkHealth::Degraded);

        let signals = runtime.on_frame(&frame(&[0x8F, 0x08, 0, 0, 0])).unwrap();
        assert_eq!(topic(&signals[0]), TOPIC_SHUTDOWN);
        assert_eq!(runtime.health(), LinkHealth::Shutdown);

        // A clear status does not undo shutdown
        assert!(runtime.on_frame(&frame(&[0x8F, 0, 0, 0, 0])).unwrap().is_empty());
        assert_eq!(runtime.health(), LinkHealth::Shutdown);
    }

    #[test]
    fn test_identity_mismatch_shuts_down() {
        let mut runtime = Runtime::new(&Config::default());
        runtime.start(&mut Capture::default(), Instant::now()).unwrap();
        let signals = runtime.on_frame(&frame(&[0x62, 0, 0, 0, 1])).unwrap();
        assert_eq!(topic(&signals[0]), TOPIC_IDENTITY);
        assert_eq!(runtime.health(), LinkHealth::Shutdown);
    }

    #[test]
    fn test_identity_deadline() {
        let config = Config {
            identity_timeout_ms: Some(200),
            ..Config::default()
        };
        let mut runtime = Runtime::new(&config);
        let t0 = Instant::now();
        runtime.start(&mut Capture::default(), t0).unwrap();
        runtime.on_frame(&frame(&[0x62, 0x62, 0x7E, 0x7A, 0x01])).unwrap();

        assert_eq!(runtime.on_tick(t0 + Duration::from_millis(100)), None);
        assert_eq!(
            runtime.on_tick(t0 + Duration::from_millis(200)),
            Some(Signal::IdentityTimeout {
                missing: vec![IdentityField::FirmwareVersion]
            })
        );
        assert_eq!(runtime.health(), LinkHealth::Shutdown);
    }

    #[test]
    fn test_unknown_register_is_an_error() {
        let mut runtime = Runtime::new(&Config::default());
        assert!(matches!(
            runtime.on_frame(&frame(&[0x55, 0, 0])),
            Err(ProtocolError::UnrecognizedRegister(0x55))
        ));
    }

    /// Records what was published; health puts fail when `broken`
    #[derive(Default)]
    struct FakePublisher {
        broken: bool,
        sent: std::sync::Mutex<Vec<String>>,
    }

    impl FakePublisher {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Publish for FakePublisher {
        async fn signal(&self, signal: &Signal) -> Result<(), BoxError> {
            self.sent.lock().unwrap().push(topic(signal).to_string());
            Ok(())
        }

        async fn health(&self, _health: LinkHealth) -> Result<(), BoxError> {
            if self.broken {
                return Err("session closed".into());
            }
            self.sent.lock().unwrap().push(TOPIC_HEALTH.to_string());
            Ok(())
        }

        async fn fault(&self, reason: String) -> Result<(), BoxError> {
            self.sent.lock().unwrap().push(format!("{}: {}", TOPIC_FAULT, reason));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_signals_then_health() {
        let publisher = FakePublisher::default();
        let timeout = Signal::IdentityTimeout {
            missing: vec![IdentityField::SerialNumber],
        };
        publish(Some(&publisher), &[timeout], Some(LinkHealth::Shutdown))
            .await
            .unwrap();
        assert_eq!(publisher.sent(), vec![TOPIC_IDENTITY, TOPIC_HEALTH]);
    }

    #[tokio::test]
    async fn test_failed_put_is_reported_as_fault() {
        let publisher = FakePublisher {
            broken: true,
            ..FakePublisher::default()
        };
        let result = publish(Some(&publisher), &[], Some(LinkHealth::Ok)).await;
        assert!(result.is_err());
        assert_eq!(publisher.sent(), vec!["mc/fault: session closed"]);
    }

    #[tokio::test]
    async fn test_publish_disabled() {
        publish::<FakePublisher>(None, &[], Some(LinkHealth::Ok))
            .await
            .unwrap();
    }

    #[test]
    fn test_speed_feedback_produces_no_signal() {
        let mut runtime = Runtime::new(&Config::default());
        assert!(runtime.on_frame(&frame(&[0x30, 0xE8, 0x03])).unwrap().is_empty());
    }
}
