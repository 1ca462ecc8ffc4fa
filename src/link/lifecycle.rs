//! Async driver for the link lifecycle.
//!
//! [`ConnectionLifecycle::run`] owns the transport and is the only place
//! that changes the link state. One task multiplexes four inputs:
//!
//! - control requests (stop, reconnect) from [`LinkHandle`]s,
//! - transport events (open, frame, close, error),
//! - queued outbound frames, drained only while authenticated,
//! - a single deadline: settle delay, retry delay or auth timeout.
//!
//! Inbound frames are decoded and dispatched inline, so actuators are driven
//! in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::dispatch::{Outcome, dispatch};
use crate::error::{LinkError, TransportError};
use crate::protocol::{DataSend, Message, OutboundMessage, decode, encode};
use crate::registry::DeviceRegistry;

use super::handle::{Control, Shared};
use super::state::{Lifecycle, RetryDecision};
use super::{LinkConfig, LinkHandle, LinkState, Transport, TransportEvent};

const EVENT_QUEUE: usize = 64;

static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);

/// Held by the one live lifecycle in the process.
struct InstanceGuard;

impl InstanceGuard {
    fn acquire() -> Result<Self, LinkError> {
        INSTANCE_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InstanceGuard)
            .map_err(|_| LinkError::AlreadyInitialized)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        INSTANCE_LIVE.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Settle,
    Retry,
    AuthDeadline,
}

pub struct ConnectionLifecycle<T> {
    config: LinkConfig,
    auth_token: Option<String>,
    transport: T,
    machine: Lifecycle,
    shared: Arc<Shared>,
    handle: LinkHandle,
    events: mpsc::Receiver<TransportEvent>,
    outbound: mpsc::Receiver<OutboundMessage>,
    control: mpsc::UnboundedReceiver<Control>,
    network: watch::Receiver<bool>,
    /// The reachability sender is gone; connects no longer wait on it.
    network_closed: bool,
    timer: Option<(Instant, Timer)>,
    awaiting_network: bool,
    _instance: InstanceGuard,
}

impl<T: Transport> ConnectionLifecycle<T> {
    /// Create the lifecycle and the handle used to talk to it.
    ///
    /// Only one lifecycle may be live per process; a second call before the
    /// first is dropped fails with [`LinkError::AlreadyInitialized`].
    /// `network` is the reachability signal; connects wait while it is
    /// `false`.
    pub fn new(
        config: LinkConfig,
        transport: T,
        network: watch::Receiver<bool>,
    ) -> Result<(Self, LinkHandle), LinkError> {
        let instance = InstanceGuard::acquire()?;

        let machine = Lifecycle::new(&config);
        let (status, _) = watch::channel(machine.status());
        let (outbound_tx, outbound) = mpsc::channel(config.queue_capacity.max(1));
        let (control_tx, control) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            status,
            outbound: outbound_tx,
            control: control_tx,
            registry: Mutex::new(DeviceRegistry::new()),
            stopping: AtomicBool::new(false),
        });
        let handle = LinkHandle::new(shared.clone());

        let lifecycle = Self {
            auth_token: Some(config.auth_token.clone()),
            config,
            transport,
            machine,
            shared,
            handle: handle.clone(),
            events: closed_events(),
            outbound,
            control,
            network,
            network_closed: false,
            timer: None,
            awaiting_network: false,
            _instance: instance,
        };
        Ok((lifecycle, handle))
    }

    /// Drive the link until [`LinkHandle::stop`] is called.
    pub async fn run(mut self) {
        if !self.shared.stopping.load(Ordering::Acquire) {
            self.try_connect().await;
        }

        loop {
            let deadline = self.timer.map(|(at, _)| at);
            let authenticated = self.machine.state() == LinkState::Authenticated;
            let awaiting_network = self.awaiting_network;

            tokio::select! {
                biased;

                Some(control) = self.control.recv() => match control {
                    Control::Stop => break,
                    Control::Reconnect => self.reconnect().await,
                },
                Some(event) = self.events.recv() => self.on_event(event).await,
                Some(message) = self.outbound.recv(), if authenticated => {
                    self.flush(message).await;
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timer().await;
                }
                changed = self.network.changed(), if awaiting_network => match changed {
                    Ok(()) => {
                        if *self.network.borrow_and_update() {
                            info!("Network reachable");
                            self.try_connect().await;
                        }
                    }
                    Err(_) => {
                        warn!("Network signal closed, assuming the network is reachable");
                        self.network_closed = true;
                        self.try_connect().await;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    /// Start a connect attempt, or wait for the network if it is down.
    async fn try_connect(&mut self) {
        if !self.network_closed && !*self.network.borrow_and_update() {
            if !self.awaiting_network {
                info!("Network unreachable, waiting before connecting");
            }
            self.awaiting_network = true;
            return;
        }
        self.awaiting_network = false;

        if let Err(e) = self.machine.begin_connect() {
            warn!("Not connecting: {}", e);
            return;
        }
        self.publish();

        info!(
            "Connecting to controller (attempt {}/{})",
            self.machine.attempts() + 1,
            self.config.max_retry
        );

        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        self.events = events;

        let limit = self.config.connect_timeout;
        let result = match timeout(limit, self.transport.connect(events_tx)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        };
        if let Err(e) = result {
            self.fail(e).await;
        }
    }

    async fn reconnect(&mut self) {
        match self.machine.request_reconnect() {
            Ok(()) => {
                info!("Reconnect requested");
                self.timer = None;
                self.publish();
                self.try_connect().await;
            }
            Err(e) => debug!("Reconnect ignored: {}", e),
        }
    }

    async fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => match self.machine.transport_opened() {
                Ok(()) => {
                    info!(
                        "Transport open, sending auth token in {:?}",
                        self.config.settle_delay
                    );
                    self.publish();
                    self.arm(Timer::Settle, self.config.settle_delay);
                }
                Err(e) => warn!("Ignoring transport open: {}", e),
            },
            TransportEvent::Data(frame) => self.on_frame(&frame),
            TransportEvent::Disconnected => match self.machine.transport_closed() {
                Ok(()) => {
                    info!("Connection closed by controller");
                    self.end_session().await;
                }
                Err(e) => debug!("Ignoring close: {}", e),
            },
            TransportEvent::Error(cause) => self.fail(cause).await,
        }
    }

    fn on_frame(&mut self, frame: &[u8]) {
        debug!("Received frame: {}", String::from_utf8_lossy(frame));
        match decode(frame) {
            Ok(Message::Handshake) => match self.machine.handshake_received() {
                Ok(()) => {
                    info!("Authenticated with controller");
                    self.timer = None;
                    self.publish();
                }
                Err(e) => warn!("Unexpected handshake confirmation: {}", e),
            },
            Ok(Message::DataSend(cmd)) => self.on_command(&cmd),
            Err(e) => warn!(
                "Dropping frame {:?}: {}",
                String::from_utf8_lossy(frame),
                e
            ),
        }
    }

    fn on_command(&mut self, cmd: &DataSend) {
        if cmd.id_defaulted {
            warn!("Command device id is not numeric, using 0");
        }
        if self.machine.state() != LinkState::Authenticated {
            warn!(
                "Ignoring command for device {} while {:?}",
                cmd.device_id,
                self.machine.state()
            );
            return;
        }

        let outcome = {
            let registry = self.shared.registry();
            dispatch(cmd, &registry)
        };
        match outcome {
            Outcome::Actuated { reply } => {
                if let Err(e) = self.handle.send(reply) {
                    warn!("Could not queue reply for device {}: {}", cmd.device_id, e);
                }
            }
            Outcome::Ignored(warning) => warn!("{}", warning),
        }
    }

    async fn flush(&mut self, message: OutboundMessage) {
        let frame = encode(&message);
        match self.transport.send(&frame, self.config.send_timeout).await {
            Ok(()) => {
                debug!("Sent {}", String::from_utf8_lossy(&frame));
                if let OutboundMessage::Bind { device_id, value } = &message {
                    self.shared.registry().record_sent(*device_id, value);
                }
            }
            Err(e) => {
                warn!("Failed to send {} frame", message.kind());
                self.fail(e).await;
            }
        }
    }

    async fn on_timer(&mut self) {
        let Some((_, timer)) = self.timer.take() else {
            return;
        };
        match timer {
            Timer::Settle => self.send_token().await,
            Timer::Retry => self.try_connect().await,
            Timer::AuthDeadline => {
                if self.machine.state() == LinkState::Authenticating {
                    let limit = self.config.auth_timeout.unwrap_or_default();
                    self.fail(TransportError::AuthTimeout(limit)).await;
                }
            }
        }
    }

    async fn send_token(&mut self) {
        if self.machine.state() != LinkState::Connected {
            return;
        }
        let Some(token) = self.auth_token.clone() else {
            warn!("No auth token held, cannot authenticate");
            return;
        };

        let frame = encode(&OutboundMessage::AuthToken { token });
        if let Err(e) = self.transport.send(&frame, self.config.send_timeout).await {
            error!("Failed to send auth token: {}", e);
            self.fail(e).await;
            return;
        }

        if let Err(e) = self.machine.token_sent() {
            warn!("{}", e);
            return;
        }
        info!("Auth token sent, awaiting confirmation");
        self.publish();
        if let Some(limit) = self.config.auth_timeout {
            self.arm(Timer::AuthDeadline, limit);
        }
    }

    async fn fail(&mut self, cause: TransportError) {
        if let Err(e) = self.machine.transport_failed() {
            debug!("Ignoring transport error ({}): {}", cause, e);
            return;
        }
        error!("Connection failed: {}", cause);
        self.end_session().await;
    }

    /// Common teardown after a failed or closed session.
    async fn end_session(&mut self) {
        // Publish first so producers stop queueing before the queue is cleared.
        self.publish();
        self.timer = None;
        self.events = closed_events();
        self.transport.close().await;
        self.discard_queued();

        match self.machine.next_step() {
            RetryDecision::RetryAfter(delay) => {
                info!(
                    "Reconnecting in {:?} ({}/{} attempts used)",
                    delay,
                    self.machine.attempts(),
                    self.config.max_retry
                );
                self.arm(Timer::Retry, delay);
            }
            RetryDecision::Idle => {
                info!("Auto-reconnect disabled, waiting for a reconnect request");
            }
            RetryDecision::GiveUp => {
                error!(
                    "{}",
                    LinkError::ExceededRetryBudget {
                        attempts: self.machine.attempts()
                    }
                );
            }
        }
        self.publish();
    }

    async fn shutdown(&mut self) {
        self.machine.stop();
        self.timer = None;
        self.events = closed_events();
        self.transport.close().await;
        self.auth_token = None;
        self.discard_queued();
        self.shared.status.send_replace(self.machine.status());
        info!("Link stopped");
    }

    fn discard_queued(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        self.shared.registry().discard_pending();
        if dropped > 0 {
            debug!("Discarded {} queued frames", dropped);
        }
    }

    fn arm(&mut self, timer: Timer, after: std::time::Duration) {
        self.timer = Some((Instant::now() + after, timer));
    }

    fn publish(&self) {
        self.shared.publish(self.machine.status());
    }
}

/// A receiver whose sender is already gone; its branch stays idle.
fn closed_events() -> mpsc::Receiver<TransportEvent> {
    let (_, rx) = mpsc::channel(1);
    rx
}
