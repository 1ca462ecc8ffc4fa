use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::link::{DEFAULT_MAX_RETRY, LinkConfig};
use crate::sensor::SensorConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Url,
    pub link: LinkConfig,
    pub devices: Vec<DeviceConfig>,
    pub sensor: Option<SensorSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device id used on the wire.
    pub id: i32,
    pub name: String,
    pub gpio: u32,
    pub active_low: bool,
}

#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub iio_dir: PathBuf,
    pub poller: SensorConfig,
}

// Serde struct for the devices file
#[derive(Deserialize)]
struct RawDevice {
    id: i32,
    #[serde(default)]
    name: Option<String>,
    gpio: u32,
    #[serde(default)]
    active_low: bool,
}

fn env_required(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{key} environment variable is required"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or_default(key, default_ms))
}

fn env_device_id(key: &str) -> Result<Option<i32>, String> {
    env_optional(key)
        .map(|v| {
            v.parse()
                .map_err(|_| format!("{key} must be a device id, got {v:?}"))
        })
        .transpose()
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let endpoint = parse_endpoint(&env_required("LINK_URL")?)?;

        let link = LinkConfig::new(env_required("LINK_AUTH_TOKEN")?)
            .with_max_retry(coerce_max_retry(env_or_default(
                "LINK_MAX_RETRY",
                DEFAULT_MAX_RETRY,
            )))
            .with_auto_reconnect(env_or_default("LINK_AUTO_RECONNECT", true))
            .with_reconnect_timeout(env_millis("LINK_RECONNECT_TIMEOUT_MS", 10_000))
            .with_settle_delay(env_millis("LINK_SETTLE_DELAY_MS", 1_000))
            .with_send_timeout(env_millis("LINK_SEND_TIMEOUT_MS", 10_000))
            .with_connect_timeout(env_millis("LINK_CONNECT_TIMEOUT_MS", 10_000))
            .with_auth_timeout(
                env_optional("LINK_AUTH_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs),
            );

        let devices_file = env_or_default("DEVICES_FILE", "devices.json".to_string());
        let devices = load_devices(&devices_file)?;

        let sensor = match env_optional("SENSOR_IIO_DIR") {
            Some(dir) => Some(SensorSettings {
                iio_dir: PathBuf::from(dir),
                poller: SensorConfig {
                    poll_interval: Duration::from_secs(env_or_default(
                        "SENSOR_POLL_INTERVAL_SECS",
                        30,
                    )),
                    temperature_device: env_device_id("SENSOR_TEMPERATURE_DEVICE")?,
                    humidity_device: env_device_id("SENSOR_HUMIDITY_DEVICE")?,
                    telemetry: env_or_default("SENSOR_TELEMETRY", true),
                },
            }),
            None => None,
        };

        let config = Self {
            endpoint,
            link,
            devices,
            sensor,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.link.auth_token.is_empty() {
            return Err("LINK_AUTH_TOKEN must not be empty".into());
        }
        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id) {
                return Err(format!("Duplicate device id {} in devices file", device.id));
            }
        }
        if let Some(sensor) = &self.sensor {
            if sensor.poller.poll_interval.is_zero() {
                return Err("SENSOR_POLL_INTERVAL_SECS must be > 0".into());
            }
        }
        if self.link.auth_timeout.is_some_and(|t| t.is_zero()) {
            return Err("LINK_AUTH_TIMEOUT_SECS must be > 0".into());
        }
        Ok(())
    }
}

/// A retry budget of zero would never connect; fall back to the default.
fn coerce_max_retry(value: u32) -> u32 {
    if value == 0 { DEFAULT_MAX_RETRY } else { value }
}

fn parse_endpoint(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("LINK_URL {raw:?} is not a URL: {e}"))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(format!("LINK_URL scheme must be ws or wss, got {other}")),
    }
    if url.host_str().is_none() {
        return Err(format!("LINK_URL {raw:?} has no host"));
    }
    Ok(url)
}

fn load_devices(path: &str) -> Result<Vec<DeviceConfig>, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read {path}: {e}"))?;
    parse_devices(&content).map_err(|e| format!("Failed to parse {path}: {e}"))
}

fn parse_devices(content: &str) -> Result<Vec<DeviceConfig>, serde_json::Error> {
    let raw_devices: Vec<RawDevice> = serde_json::from_str(content)?;
    Ok(raw_devices
        .into_iter()
        .map(|raw| DeviceConfig {
            name: raw.name.unwrap_or_else(|| format!("device-{}", raw.id)),
            id: raw.id,
            gpio: raw.gpio,
            active_low: raw.active_low,
        })
        .collect())
}
