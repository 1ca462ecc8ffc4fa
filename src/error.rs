//! Error types shared across the link, dispatcher and device layers.

use std::time::Duration;

use thiserror::Error;

use crate::link::LinkState;
use crate::protocol::ControlType;

/// Failure reported by a [`Transport`](crate::link::Transport).
///
/// The variant records which layer failed. The lifecycle treats every variant
/// the same way (the session moves to `Failed`); the cause is only logged.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connect or WebSocket upgrade failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// TLS negotiation or record layer failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// Socket-level I/O error.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// A connect or send did not complete within its bound.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The transport has no open connection.
    #[error("transport closed")]
    Closed,

    /// The controller never confirmed the auth token.
    #[error("no authentication confirmation within {0:?}")]
    AuthTimeout(Duration),
}

/// Errors returned by the link handle and lifecycle.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Application frames are only accepted while authenticated.
    #[error("link not ready (state: {state:?})")]
    NotReady {
        /// State at the time of the attempt.
        state: LinkState,
    },

    /// The outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,

    /// The lifecycle has shut down.
    #[error("link closed")]
    Closed,

    /// Another lifecycle instance is still live in this process.
    #[error("connection lifecycle already initialized")]
    AlreadyInitialized,

    /// The requested transition is not valid from the current state.
    #[error("invalid transition {event} from {from:?}")]
    InvalidTransition {
        /// State the machine was in.
        from: LinkState,
        /// Event that was rejected.
        event: &'static str,
    },

    /// Automatic reconnects gave up; only an explicit reconnect resumes.
    #[error("retry budget exceeded after {attempts} attempts")]
    ExceededRetryBudget {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

/// A recognised command that could not be applied to a device.
///
/// None of these are protocol errors: the frame is dropped and nothing is
/// reported back to the controller.
#[derive(Debug, Error)]
pub enum ActuationWarning {
    #[error("no actuator bound to device {device_id}")]
    UnknownDevice { device_id: i32 },

    #[error("control type {control_type:?} not supported (device {device_id})")]
    UnsupportedControl {
        device_id: i32,
        control_type: ControlType,
    },

    #[error("switch value {value:?} not understood (device {device_id})")]
    InvalidSwitchValue { device_id: i32, value: String },

    #[error("actuator for device {device_id} failed: {source}")]
    ActuatorFailed {
        device_id: i32,
        #[source]
        source: DeviceError,
    },
}

/// Failure talking to local hardware.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: unreadable value {raw:?}")]
    Parse { path: String, raw: String },
}
