use serde_derive::{Deserialize, Serialize};

/// A single published sensor state. `Unavailable` is the availability flag:
/// the host shows the entity as unavailable instead of a misleading default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorValue {
    Numeric(f64),
    Text(String),
    Bool(bool),
    Unavailable,
}

impl SensorValue {
    pub fn is_available(&self) -> bool {
        !matches!(self, SensorValue::Unavailable)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Numeric(value) => Some(*value),
            _ => None,
        }
    }
}

/// Home-automation device classes used by the Sunthalpy points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Temperature,
    Humidity,
    Pressure,
    Power,
    PowerFactor,
    Energy,
    Problem,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Temperature => "temperature",
            DeviceClass::Humidity => "humidity",
            DeviceClass::Pressure => "pressure",
            DeviceClass::Power => "power",
            DeviceClass::PowerFactor => "power_factor",
            DeviceClass::Energy => "energy",
            DeviceClass::Problem => "problem",
        }
    }
}

/// State classes as the host's statistics subsystem understands them.
/// Cumulative energy counters must be `TotalIncreasing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

impl StateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateClass::Measurement => "measurement",
            StateClass::Total => "total",
            StateClass::TotalIncreasing => "total_increasing",
        }
    }
}

/// One entity state change, sent to the host sink once per sensor per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    pub key: &'static str,
    pub name: &'static str,
    pub value: SensorValue,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
}
