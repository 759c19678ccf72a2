//! Derives cumulative energy counters from instantaneous power readings.
//!
//! The service only exposes power (kW); the host's energy dashboard needs
//! monotonically increasing energy (kWh). Successive snapshots are bridged
//! with one trapezoid each: mean of the endpoint powers times the elapsed
//! hours. Totals never decrease and survive restarts via the state store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use crate::entity::{DeviceClass, EntityUpdate, SensorValue, StateClass};
use crate::sensor_registry::ConfigError;
use crate::snapshot::{FieldRef, Snapshot};
use crate::state_store::StateStore;
use crate::update_coordinator::SnapshotConsumer;

const KILOWATT_HOURS: &str = "kWh";

/// Static definition of one derived energy counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergySensorSpec {
    pub key: &'static str,
    pub name: &'static str,
    /// Power field (kW) the counter integrates.
    pub source: FieldRef,
}

/// Accumulator for one counter. Mutated only inside the derivation step,
/// persisted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivationState {
    pub last_power_kw: f64,
    pub last_update: DateTime<Utc>,
    pub total_kwh: f64,
}

/// One integration step. `dt <= 0` (clock skew, duplicate snapshot) skips
/// the observation entirely; a negative trapezoid is floored to zero so sign
/// flips never walk the total backwards.
fn integrate(state: &DerivationState, power_kw: f64, at: DateTime<Utc>) -> DerivationState {
    let dt_hours = at.signed_duration_since(state.last_update).num_milliseconds() as f64
        / 3_600_000.0;
    if dt_hours <= 0.0 {
        return *state;
    }
    let increment = ((state.last_power_kw + power_kw) / 2.0 * dt_hours).max(0.0);
    DerivationState {
        last_power_kw: power_kw,
        last_update: at,
        total_kwh: state.total_kwh + increment,
    }
}

struct DerivedSensor {
    spec: EnergySensorSpec,
    state: Option<DerivationState>,
}

/// Owns every derived counter and its accumulator state.
pub struct EnergyIntegrator {
    sensors: Vec<DerivedSensor>,
    updates: Sender<EntityUpdate>,
    store: Option<Box<dyn StateStore>>,
}

impl EnergyIntegrator {
    pub fn new(updates: Sender<EntityUpdate>) -> Self {
        Self {
            sensors: Vec::new(),
            updates,
            store: None,
        }
    }

    /// Attaches a restore-state store; totals are written through after
    /// every applied snapshot.
    pub fn with_store(mut self, store: Box<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn register(&mut self, spec: EnergySensorSpec) -> Result<(), ConfigError> {
        if self.sensors.iter().any(|sensor| sensor.spec.key == spec.key) {
            return Err(ConfigError::DuplicateKey(spec.key));
        }
        self.sensors.push(DerivedSensor { spec, state: None });
        Ok(())
    }

    /// Reloads persisted accumulators so counters stay monotonic across
    /// restarts. Call once after registration, before the first poll.
    pub fn restore(&mut self) -> anyhow::Result<()> {
        let Some(store) = &mut self.store else {
            return Ok(());
        };
        let Some(payload) = store.load()? else {
            return Ok(());
        };
        let persisted: HashMap<String, DerivationState> = serde_json::from_str(&payload)?;
        for sensor in &mut self.sensors {
            if let Some(state) = persisted.get(sensor.spec.key) {
                debug!(
                    key = sensor.spec.key,
                    total_kwh = state.total_kwh,
                    "restored energy counter"
                );
                sensor.state = Some(*state);
            }
        }
        Ok(())
    }

    /// Current total of a counter, if it has observed anything yet.
    pub fn total(&self, key: &str) -> Option<f64> {
        self.sensors
            .iter()
            .find(|sensor| sensor.spec.key == key)?
            .state
            .map(|state| state.total_kwh)
    }

    /// Explicit host-issued meter reset. Nothing in the remote service
    /// triggers this; it exists for the host's benefit only.
    pub fn reset(&mut self, key: &str) -> bool {
        let Some(sensor) = self
            .sensors
            .iter_mut()
            .find(|sensor| sensor.spec.key == key)
        else {
            return false;
        };
        sensor.state = None;
        self.persist();
        true
    }

    /// Advances every counter with one snapshot and returns the totals in
    /// registration order. `None` means the counter has never observed a
    /// reading and is still unavailable.
    pub fn apply(&mut self, snapshot: &Snapshot) -> Vec<(EnergySensorSpec, Option<f64>)> {
        let mut totals = Vec::with_capacity(self.sensors.len());
        for sensor in &mut self.sensors {
            let power = snapshot
                .numeric(sensor.spec.source)
                .filter(|power| power.is_finite());
            let total = match (&mut sensor.state, power) {
                (Some(state), Some(power)) => {
                    *state = integrate(state, power, snapshot.taken_at());
                    Some(state.total_kwh)
                }
                // first observation: nothing to integrate against yet
                (state @ None, Some(power)) => {
                    *state = Some(DerivationState {
                        last_power_kw: power,
                        last_update: snapshot.taken_at(),
                        total_kwh: 0.0,
                    });
                    Some(0.0)
                }
                // reading missing this cycle: keep the last total visible;
                // the next reading integrates one coarse trapezoid over the gap
                (Some(state), None) => Some(state.total_kwh),
                (None, None) => None,
            };
            totals.push((sensor.spec, total));
        }
        self.persist();
        totals
    }

    fn persist(&mut self) {
        let Some(store) = &mut self.store else {
            return;
        };
        let persisted: HashMap<&str, DerivationState> = self
            .sensors
            .iter()
            .filter_map(|sensor| sensor.state.map(|state| (sensor.spec.key, state)))
            .collect();
        match serde_json::to_string(&persisted) {
            Ok(payload) => {
                if let Err(err) = store.save(&payload) {
                    warn!("failed to persist energy counters: {err:#}");
                }
            }
            Err(err) => warn!("failed to serialize energy counters: {err}"),
        }
    }
}

impl SnapshotConsumer for EnergyIntegrator {
    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        let totals = self.apply(snapshot);
        for (spec, total) in totals {
            let update = EntityUpdate {
                key: spec.key,
                name: spec.name,
                value: total.map_or(SensorValue::Unavailable, SensorValue::Numeric),
                unit: Some(KILOWATT_HOURS),
                device_class: Some(DeviceClass::Energy),
                state_class: Some(StateClass::TotalIncreasing),
            };
            if let Err(err) = self.updates.try_send(update) {
                warn!(key = spec.key, "dropping entity update: {err}");
            }
        }
    }
}
