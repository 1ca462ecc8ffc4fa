//! Device-side link between a smart-home node and its controller.
//!
//! The node keeps one authenticated WebSocket session to the controller,
//! turns `datasend` commands into actuator changes and reports device state
//! back with `bind`, `status` and `sensor_data` frames.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod hardware;
pub mod link;
pub mod protocol;
pub mod registry;
pub mod sensor;

pub use error::{ActuationWarning, DeviceError, LinkError, TransportError};
pub use link::{ConnectionLifecycle, LinkConfig, LinkHandle, LinkState, LinkStatus};
