//! Periodic sensor polling.
//!
//! Readings go through the link's change filter as `bind` reports for the
//! configured device ids, followed by a `sensor_data` telemetry frame.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{DeviceError, LinkError};
use crate::link::LinkHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    /// Whole degrees Celsius.
    pub temperature: i32,
    /// Whole percent relative humidity.
    pub humidity: i32,
}

pub trait SensorSource: Send {
    fn poll(&mut self) -> Result<SensorReading, DeviceError>;
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub poll_interval: Duration,
    /// Device id that receives temperature `bind` reports.
    pub temperature_device: Option<i32>,
    /// Device id that receives humidity `bind` reports.
    pub humidity_device: Option<i32>,
    /// Emit a `sensor_data` frame on each successful poll.
    pub telemetry: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            temperature_device: None,
            humidity_device: None,
            telemetry: true,
        }
    }
}

pub struct SensorPoller<S> {
    link: LinkHandle,
    source: S,
    config: SensorConfig,
}

impl<S: SensorSource> SensorPoller<S> {
    pub fn new(link: LinkHandle, source: S, config: SensorConfig) -> Self {
        Self {
            link,
            source,
            config,
        }
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Sensor poller started (interval={:?})",
            self.config.poll_interval
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Sensor poller stopped");
    }

    /// One poll cycle. Returns the number of frames queued.
    pub fn poll_once(&mut self) -> usize {
        let reading = match self.source.poll() {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Sensor read failed: {}", e);
                return 0;
            }
        };
        debug!(
            "Sensor reading: {}C {}%",
            reading.temperature, reading.humidity
        );

        let mut queued = 0;
        let reports = [
            (self.config.temperature_device, reading.temperature),
            (self.config.humidity_device, reading.humidity),
        ];
        for (device, value) in reports {
            let Some(device_id) = device else { continue };
            match self.link.report_if_changed(device_id, &value.to_string()) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) => {
                    log_skipped(&e);
                    return queued;
                }
            }
        }

        if self.config.telemetry {
            match self
                .link
                .send_sensor_data(reading.temperature, reading.humidity)
            {
                Ok(()) => queued += 1,
                Err(e) => log_skipped(&e),
            }
        }
        queued
    }
}

fn log_skipped(err: &LinkError) {
    match err {
        LinkError::NotReady { state } => {
            debug!("Link not ready ({:?}), skipping sensor report", state)
        }
        other => warn!("Sensor report not queued: {}", other),
    }
}
