use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tracing::warn;

use crate::entity::{DeviceClass, EntityUpdate, SensorValue, StateClass};
use crate::snapshot::{FieldRef, Snapshot};
use crate::update_coordinator::SnapshotConsumer;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate sensor key `{0}`")]
    DuplicateKey(&'static str),
}

/// How a raw reading becomes a published value. One tagged variant per
/// sensor kind; the mapping table is validated at registration, not looked
/// up dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Numeric passthrough.
    Numeric,
    /// Numeric rounded to the given number of decimals.
    Rounded(u32),
    /// Truthy numeric/bool reading published as on/off.
    Boolean,
    /// String passthrough (e.g. the aerothermal mode).
    Text,
}

/// Static mapping from one raw field to one host entity. Defined at startup,
/// immutable afterwards.
#[derive(Debug, Clone, Copy)]
pub struct SensorDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub field: FieldRef,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub unit: Option<&'static str>,
    pub transform: Transform,
    pub enabled_by_default: bool,
}

/// Maps raw snapshot fields to typed sensor values and publishes them to the
/// host entity channel, one update per registered sensor per cycle.
pub struct SensorRegistry {
    descriptors: Vec<SensorDescriptor>,
    keys: HashSet<&'static str>,
    updates: Sender<EntityUpdate>,
}

impl SensorRegistry {
    pub fn new(updates: Sender<EntityUpdate>) -> Self {
        Self {
            descriptors: Vec::new(),
            keys: HashSet::new(),
            updates,
        }
    }

    pub fn register(&mut self, descriptor: SensorDescriptor) -> Result<(), ConfigError> {
        if !self.keys.insert(descriptor.key) {
            return Err(ConfigError::DuplicateKey(descriptor.key));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Evaluates every registered descriptor against a snapshot, in
    /// registration order. A missing field or failed transform yields
    /// `Unavailable` for that sensor only; siblings are unaffected.
    pub fn apply<'a>(&'a self, snapshot: &Snapshot) -> Vec<(&'a SensorDescriptor, SensorValue)> {
        self.descriptors
            .iter()
            .map(|descriptor| {
                (
                    descriptor,
                    transform_value(descriptor.transform, snapshot, descriptor.field),
                )
            })
            .collect()
    }
}

impl SnapshotConsumer for SensorRegistry {
    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        let values = self.apply(snapshot);
        for (descriptor, value) in values {
            let update = EntityUpdate {
                key: descriptor.key,
                name: descriptor.name,
                value,
                unit: descriptor.unit,
                device_class: descriptor.device_class,
                state_class: descriptor.state_class,
            };
            if let Err(err) = self.updates.try_send(update) {
                warn!(key = descriptor.key, "dropping entity update: {err}");
            }
        }
    }
}

fn transform_value(transform: Transform, snapshot: &Snapshot, field: FieldRef) -> SensorValue {
    match transform {
        Transform::Numeric => numeric_or_unavailable(snapshot, field, |value| value),
        Transform::Rounded(decimals) => {
            numeric_or_unavailable(snapshot, field, |value| round_to(value, decimals))
        }
        Transform::Boolean => match snapshot.numeric(field) {
            Some(value) if value.is_finite() => SensorValue::Bool(value != 0.0),
            _ => SensorValue::Unavailable,
        },
        Transform::Text => match snapshot.raw(field) {
            Some(Value::String(text)) => SensorValue::Text(text.clone()),
            Some(Value::Number(number)) => SensorValue::Text(number.to_string()),
            _ => SensorValue::Unavailable,
        },
    }
}

fn numeric_or_unavailable(
    snapshot: &Snapshot,
    field: FieldRef,
    map: impl Fn(f64) -> f64,
) -> SensorValue {
    match snapshot.numeric(field) {
        Some(value) if value.is_finite() => SensorValue::Numeric(map(value)),
        _ => SensorValue::Unavailable,
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
