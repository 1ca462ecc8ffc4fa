use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DeviceError;
use crate::protocol::OutboundMessage;

/// Something that can be switched on or off, typically a relay.
pub trait Actuator: Send + Sync {
    /// `true` energises the output.
    fn set_state(&self, on: bool) -> Result<(), DeviceError>;
}

/// Device ids mapped to their actuators, plus the values reported for each
/// id so unchanged readings are not sent twice.
///
/// A reported value is first held as pending while its frame waits in the
/// outbound queue. It becomes the last sent value once the frame is written
/// to the transport; dropping the queue drops the pending values with it.
#[derive(Default)]
pub struct DeviceRegistry {
    actuators: HashMap<i32, Arc<dyn Actuator>>,
    last_sent: HashMap<i32, String>,
    pending: HashMap<i32, String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) the actuator for `device_id`.
    pub fn bind_actuator(&mut self, device_id: i32, actuator: Arc<dyn Actuator>) {
        self.actuators.insert(device_id, actuator);
    }

    pub fn actuator(&self, device_id: i32) -> Option<Arc<dyn Actuator>> {
        self.actuators.get(&device_id).cloned()
    }

    pub fn bound_devices(&self) -> usize {
        self.actuators.len()
    }

    /// Last value written to the transport for `device_id`.
    pub fn last_sent(&self, device_id: i32) -> Option<&str> {
        self.last_sent.get(&device_id).map(String::as_str)
    }

    /// Whether `value` differs from what is queued or was last sent for
    /// `device_id`. Comparison is exact.
    pub fn is_changed(&self, device_id: i32, value: &str) -> bool {
        self.pending
            .get(&device_id)
            .or_else(|| self.last_sent.get(&device_id))
            .map(String::as_str)
            != Some(value)
    }

    /// Note a value whose frame is queued but not yet written.
    pub fn record_queued(&mut self, device_id: i32, value: &str) {
        self.pending.insert(device_id, value.to_string());
    }

    /// Note a value whose frame reached the transport.
    pub fn record_sent(&mut self, device_id: i32, value: &str) {
        if self.pending.get(&device_id).is_some_and(|v| v == value) {
            self.pending.remove(&device_id);
        }
        match self.last_sent.get_mut(&device_id) {
            Some(last) => {
                last.clear();
                last.push_str(value);
            }
            None => {
                self.last_sent.insert(device_id, value.to_string());
            }
        }
    }

    /// Forget every queued value. Called when the outbound queue is dropped.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Hand a `Bind` for `value` to `send` unless it matches the value queued
    /// or last sent for `device_id`. The value is only held when `send`
    /// accepts the frame, so a rejected report is attempted again next time.
    ///
    /// Returns `Ok(true)` when a frame was accepted.
    pub fn report_if_changed<E>(
        &mut self,
        device_id: i32,
        value: &str,
        send: impl FnOnce(OutboundMessage) -> Result<(), E>,
    ) -> Result<bool, E> {
        if !self.is_changed(device_id, value) {
            return Ok(false);
        }
        send(OutboundMessage::bind(device_id, value))?;
        self.record_queued(device_id, value);
        Ok(true)
    }
}
