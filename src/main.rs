use std::env;
use std::time::Duration;

use tokio::signal;
use tokio::sync::mpsc::{self, Receiver};
use tokio::sync::watch;
use tracing::{error, info, warn};

use sunthalpy_bridge::energy_integrator::EnergyIntegrator;
use sunthalpy_bridge::entity::{EntityUpdate, SensorValue};
use sunthalpy_bridge::sensor_catalog::{ENERGY_SENSORS, SENSORS};
use sunthalpy_bridge::sensor_registry::SensorRegistry;
use sunthalpy_bridge::state_store::FileStateStore;
use sunthalpy_bridge::sunthalpy_client::SunthalpyClient;
use sunthalpy_bridge::update_coordinator::{UpdateCoordinator, DEFAULT_POLL_INTERVAL};

const DEFAULT_STATE_FILE: &str = "sunthalpy_state.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("starting Sunthalpy bridge");
    let client = SunthalpyClient::from_env()?;
    let poll_interval = poll_interval_from_env();
    let state_file =
        env::var("SUNTHALPY_STATE_FILE").unwrap_or_else(|_| DEFAULT_STATE_FILE.to_string());

    let (updates_tx, updates_rx) = mpsc::channel(64);

    let mut registry = SensorRegistry::new(updates_tx.clone());
    for descriptor in SENSORS {
        registry.register(*descriptor)?;
    }

    let mut integrator =
        EnergyIntegrator::new(updates_tx).with_store(Box::new(FileStateStore::new(state_file)));
    for spec in ENERGY_SENSORS {
        integrator.register(*spec)?;
    }
    integrator.restore()?;

    let mut coordinator = UpdateCoordinator::new(client, poll_interval);
    coordinator.register_consumer(Box::new(registry));
    coordinator.register_consumer(Box::new(integrator));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {err}");
            return;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    tokio::spawn(entity_sink(updates_rx));

    coordinator.run(shutdown_rx).await;
    Ok(())
}

fn poll_interval_from_env() -> Duration {
    match env::var("SUNTHALPY_POLL_SECONDS") {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
            _ => {
                warn!("ignoring invalid SUNTHALPY_POLL_SECONDS `{raw}`");
                DEFAULT_POLL_INTERVAL
            }
        },
        Err(_) => DEFAULT_POLL_INTERVAL,
    }
}

/// Stand-in for the host's entity layer: logs every published state change.
async fn entity_sink(mut updates: Receiver<EntityUpdate>) {
    while let Some(update) = updates.recv().await {
        match &update.value {
            SensorValue::Numeric(value) => {
                info!(key = update.key, unit = update.unit, "{} = {value}", update.name);
            }
            SensorValue::Text(text) => info!(key = update.key, "{} = {text}", update.name),
            SensorValue::Bool(flag) => info!(key = update.key, "{} = {flag}", update.name),
            SensorValue::Unavailable => info!(key = update.key, "{} unavailable", update.name),
        }
    }
}
