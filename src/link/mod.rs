//! Connection to the controller: transport abstraction, lifecycle state
//! machine and the handle producers use to queue outbound frames.

mod handle;
pub mod lifecycle;
pub mod state;
pub mod ws;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use handle::LinkHandle;
pub use lifecycle::ConnectionLifecycle;
pub use state::{Lifecycle, RetryDecision};
pub use ws::WsTransport;

pub const DEFAULT_MAX_RETRY: u32 = 5;
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// Transport open, auth token not yet sent.
    Connected,
    /// Auth token sent, waiting for the controller's confirmation.
    Authenticating,
    /// Application frames may flow.
    Authenticated,
    Failed,
}

/// Snapshot published to observers on every lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    /// Consecutive attempts that ended before authenticating.
    pub attempts: u32,
    /// Automatic reconnects have stopped; only an explicit reconnect resumes.
    pub retry_budget_exhausted: bool,
}

/// Event pushed by a transport into the lifecycle's queue.
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Data(Vec<u8>),
    Error(TransportError),
}

/// A duplex, message-oriented connection to the controller.
///
/// Each [`connect`](Transport::connect) call gets a fresh event sender. After
/// a successful connect the transport pushes [`TransportEvent::Connected`],
/// then one `Data` event per received frame, and finally `Disconnected` or
/// `Error` when the connection ends.
#[async_trait]
pub trait Transport: Send {
    async fn connect(
        &mut self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError>;

    async fn send(&mut self, payload: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// Close the connection, if any. Must be safe to call repeatedly.
    async fn close(&mut self);
}

/// Lifecycle settings.
#[derive(Clone)]
pub struct LinkConfig {
    pub auth_token: String,
    pub max_retry: u32,
    pub auto_reconnect: bool,
    /// Fixed wait between reconnect attempts.
    pub reconnect_timeout: Duration,
    /// Wait between transport open and the auth token send.
    pub settle_delay: Duration,
    pub send_timeout: Duration,
    pub connect_timeout: Duration,
    /// `None` waits for the handshake indefinitely.
    pub auth_timeout: Option<Duration>,
    pub queue_capacity: usize,
}

impl LinkConfig {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            max_retry: DEFAULT_MAX_RETRY,
            auto_reconnect: true,
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

impl fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkConfig")
            .field("auth_token", &"<redacted>")
            .field("max_retry", &self.max_retry)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("reconnect_timeout", &self.reconnect_timeout)
            .field("settle_delay", &self.settle_delay)
            .field("send_timeout", &self.send_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("auth_timeout", &self.auth_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}
