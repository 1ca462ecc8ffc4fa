use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info, warn};

use smart_home_link::config::Config;
use smart_home_link::hardware::{IioSensor, SysfsGpio};
use smart_home_link::link::{ConnectionLifecycle, WsTransport};
use smart_home_link::sensor::SensorPoller;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting smart-home-link (controller={}, devices={}, sensor={})",
        config.endpoint,
        config.devices.len(),
        config.sensor.is_some(),
    );

    // The host network stack is managed outside this process; treat it as up.
    let (_network_tx, network_rx) = watch::channel(true);

    let transport = WsTransport::new(config.endpoint.clone());
    let (lifecycle, link) = match ConnectionLifecycle::new(config.link.clone(), transport, network_rx)
    {
        Ok(pair) => pair,
        Err(e) => {
            error!("Failed to create link: {}", e);
            std::process::exit(1);
        }
    };

    for device in &config.devices {
        info!(
            "  Device: {} (id {}) on gpio{}{}",
            device.name,
            device.id,
            device.gpio,
            if device.active_low { ", active low" } else { "" },
        );
        link.bind_actuator(
            device.id,
            Arc::new(SysfsGpio::new(device.gpio, device.active_low)),
        );
    }

    let mut link_task = tokio::spawn(lifecycle.run());

    let (poller_stop_tx, poller_stop_rx) = watch::channel(false);
    let poller_task = config.sensor.as_ref().map(|sensor| {
        let poller = SensorPoller::new(
            link.clone(),
            IioSensor::new(&sensor.iio_dir),
            sensor.poller.clone(),
        );
        tokio::spawn(poller.run(poller_stop_rx))
    });

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            None
        }
    };
    let mut status = link.subscribe();
    let mut exit_code = 0;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                if current.retry_budget_exhausted {
                    error!(
                        "Giving up after {} failed connection attempts",
                        current.attempts
                    );
                    exit_code = 1;
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            Some(()) = async {
                match sigterm.as_mut() {
                    Some(s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Cleanup
    let _ = poller_stop_tx.send(true);
    link.stop();
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut link_task)
        .await
        .is_err()
    {
        warn!("Link did not stop within {:?}", SHUTDOWN_GRACE);
        link_task.abort();
    }
    if let Some(task) = poller_task {
        task.abort();
    }
    info!("smart-home-link stopped");
    std::process::exit(exit_code);
}
