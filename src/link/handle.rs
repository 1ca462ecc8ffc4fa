use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::error::LinkError;
use crate::protocol::OutboundMessage;
use crate::registry::{Actuator, DeviceRegistry};

use super::{LinkState, LinkStatus};

pub(crate) enum Control {
    Stop,
    Reconnect,
}

/// State shared between the lifecycle task and every [`LinkHandle`].
pub(crate) struct Shared {
    pub(crate) status: watch::Sender<LinkStatus>,
    pub(crate) outbound: mpsc::Sender<OutboundMessage>,
    pub(crate) control: mpsc::UnboundedSender<Control>,
    pub(crate) registry: Mutex<DeviceRegistry>,
    pub(crate) stopping: AtomicBool,
}

impl Shared {
    pub(crate) fn registry(&self) -> MutexGuard<'_, DeviceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a new status unless a stop has already been announced.
    pub(crate) fn publish(&self, next: LinkStatus) {
        self.status.send_if_modified(|current| {
            if self.stopping.load(Ordering::Acquire) || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Cloneable entry point for everything outside the lifecycle task.
///
/// All outbound frames go through [`send`](LinkHandle::send): the state check
/// and the enqueue happen under the status lock, so a frame is either queued
/// while the link is authenticated or rejected with `NotReady`. Enqueueing
/// never waits for the network.
#[derive(Clone)]
pub struct LinkHandle {
    shared: Arc<Shared>,
}

impl LinkHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn status(&self) -> LinkStatus {
        *self.shared.status.borrow()
    }

    pub fn state(&self) -> LinkState {
        self.status().state
    }

    /// Watch every published status change.
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.shared.status.subscribe()
    }

    pub fn bind_actuator(&self, device_id: i32, actuator: Arc<dyn Actuator>) {
        self.shared.registry().bind_actuator(device_id, actuator);
    }

    /// Last value written to the controller for `device_id`.
    pub fn last_sent(&self, device_id: i32) -> Option<String> {
        self.shared
            .registry()
            .last_sent(device_id)
            .map(str::to_string)
    }

    /// Queue a frame if the link is authenticated. An accepted `Bind` is held
    /// as the device's pending value until the lifecycle writes it.
    pub fn send(&self, message: OutboundMessage) -> Result<(), LinkError> {
        let bound = match &message {
            OutboundMessage::Bind { device_id, value } => Some((*device_id, value.clone())),
            _ => None,
        };
        self.enqueue(message)?;
        if let Some((device_id, value)) = bound {
            self.shared.registry().record_queued(device_id, &value);
        }
        Ok(())
    }

    pub fn send_status(&self, device_id: i32, value: &str) -> Result<(), LinkError> {
        self.send(OutboundMessage::status(device_id, value))
    }

    pub fn bind_device(&self, device_id: i32, value: &str) -> Result<(), LinkError> {
        self.send(OutboundMessage::bind(device_id, value))
    }

    pub fn send_sensor_data(&self, temperature: i32, humidity: i32) -> Result<(), LinkError> {
        self.send(OutboundMessage::SensorData {
            temperature,
            humidity,
        })
    }

    /// Queue a `Bind` for `value` unless it equals the value already queued
    /// or last written for `device_id`. Returns `Ok(false)` when suppressed.
    pub fn report_if_changed(&self, device_id: i32, value: &str) -> Result<bool, LinkError> {
        self.shared
            .registry()
            .report_if_changed(device_id, value, |message| self.enqueue(message))
    }

    /// Stop the lifecycle. The published state becomes `Disconnected` before
    /// this returns; the transport is released by the lifecycle task.
    pub fn stop(&self) {
        self.shared.status.send_modify(|status| {
            self.shared.stopping.store(true, Ordering::Release);
            status.state = LinkState::Disconnected;
        });
        // The receiver is gone only if the lifecycle already finished.
        let _ = self.shared.control.send(Control::Stop);
    }

    /// Ask the lifecycle to connect again, resetting the attempt counter.
    /// Ignored while a connection is already being made or is up.
    pub fn reconnect(&self) -> Result<(), LinkError> {
        self.shared
            .control
            .send(Control::Reconnect)
            .map_err(|_| LinkError::Closed)
    }

    fn enqueue(&self, message: OutboundMessage) -> Result<(), LinkError> {
        // Holding the borrow keeps the state fixed until the frame is queued.
        let status = self.shared.status.borrow();
        if status.state != LinkState::Authenticated {
            return Err(LinkError::NotReady {
                state: status.state,
            });
        }
        self.shared
            .outbound
            .try_send(message)
            .map_err(|err| match err {
                TrySendError::Full(_) => LinkError::QueueFull,
                TrySendError::Closed(_) => LinkError::Closed,
            })
    }
}
