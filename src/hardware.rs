//! Linux sysfs adapters for relays and the climate sensor.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DeviceError;
use crate::registry::Actuator;
use crate::sensor::{SensorReading, SensorSource};

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Relay on a sysfs GPIO line. The line must already be exported and set
/// as an output.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    path: PathBuf,
    active_low: bool,
}

impl SysfsGpio {
    pub fn new(pin: u32, active_low: bool) -> Self {
        Self::at(
            Path::new(GPIO_ROOT).join(format!("gpio{pin}")).join("value"),
            active_low,
        )
    }

    /// Drive an arbitrary value file.
    pub fn at(path: impl Into<PathBuf>, active_low: bool) -> Self {
        Self {
            path: path.into(),
            active_low,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Actuator for SysfsGpio {
    fn set_state(&self, on: bool) -> Result<(), DeviceError> {
        let level = if on != self.active_low { "1" } else { "0" };
        fs::write(&self.path, level).map_err(|source| DeviceError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Industrial I/O temperature/humidity sensor, e.g.
/// `/sys/bus/iio/devices/iio:device0`.
#[derive(Debug, Clone)]
pub struct IioSensor {
    dir: PathBuf,
}

impl IioSensor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_milli(&self, name: &str) -> Result<i32, DeviceError> {
        let path = self.dir.join(name);
        let display = path.display().to_string();
        let raw = fs::read_to_string(&path).map_err(|source| DeviceError::Io {
            path: display.clone(),
            source,
        })?;
        let milli: i64 = raw.trim().parse().map_err(|_| DeviceError::Parse {
            path: display.clone(),
            raw: raw.trim().to_string(),
        })?;
        milli
            .checked_add(500)
            .and_then(|m| i32::try_from(m.div_euclid(1000)).ok())
            .ok_or_else(|| DeviceError::Parse {
                path: display,
                raw: raw.trim().to_string(),
            })
    }
}

impl SensorSource for IioSensor {
    fn poll(&mut self) -> Result<SensorReading, DeviceError> {
        Ok(SensorReading {
            temperature: self.read_milli("in_temp_input")?,
            humidity: self.read_milli("in_humidityrelative_input")?,
        })
    }
}
