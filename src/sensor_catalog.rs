//! The Sunthalpy point table: every raw field the bridge mirrors, the
//! writable setpoints, and the derived energy counters.

use crate::energy_integrator::EnergySensorSpec;
use crate::entity::{DeviceClass, StateClass};
use crate::sensor_registry::{SensorDescriptor, Transform};
use crate::snapshot::{DeviceGroup, FieldRef};

/// Raw field addresses, named. Shared by the catalog and the derivation code.
pub mod fields {
    use super::{DeviceGroup, FieldRef};

    pub const TEMP_MIN_SETPOINT: FieldRef = FieldRef::new(DeviceGroup::UserSets, "1100");
    pub const TEMP_MAX_SETPOINT: FieldRef = FieldRef::new(DeviceGroup::UserSets, "1101");
    pub const WINTER_MODE_SWITCH: FieldRef = FieldRef::new(DeviceGroup::UserSets, "0100");
    pub const AT_HOME_SWITCH: FieldRef = FieldRef::new(DeviceGroup::UserSets, "0000");
    pub const NGROK_ACTIVE: FieldRef = FieldRef::new(DeviceGroup::UserSets, "1800");

    pub const INDOOR_TEMPERATURE: FieldRef = FieldRef::new(DeviceGroup::MainData, "103");
    pub const INDOOR_HUMIDITY: FieldRef = FieldRef::new(DeviceGroup::MainData, "102");

    pub const INDOOR_FLOW_TEMPERATURE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "1");
    pub const INDOOR_RETURN_TEMPERATURE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "2");
    pub const OUTDOOR_FLOW_TEMPERATURE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "4");
    pub const OUTDOOR_RETURN_TEMPERATURE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "5");
    pub const CIRCUIT_PRESSURE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "6");
    pub const DHW_TEMPERATURE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "11");
    pub const OUTDOOR_TEMPERATURE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "20");
    pub const ALARM: FieldRef = FieldRef::new(DeviceGroup::OtherData, "32");
    pub const HEATING_POWER: FieldRef = FieldRef::new(DeviceGroup::OtherData, "133");
    pub const COOLING_POWER: FieldRef = FieldRef::new(DeviceGroup::OtherData, "134");
    pub const ELECTRIC_POWER: FieldRef = FieldRef::new(DeviceGroup::OtherData, "135");
    pub const COP: FieldRef = FieldRef::new(DeviceGroup::OtherData, "136");
    pub const EER: FieldRef = FieldRef::new(DeviceGroup::OtherData, "137");
    pub const DHW_SETPOINT: FieldRef = FieldRef::new(DeviceGroup::OtherData, "168");
    pub const HEATING_SETPOINT: FieldRef = FieldRef::new(DeviceGroup::OtherData, "170");
    pub const COOLING_SETPOINT: FieldRef = FieldRef::new(DeviceGroup::OtherData, "175");
    pub const SUMMER_MODE_ONLINE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "201");
    pub const WINTER_MODE_ONLINE: FieldRef = FieldRef::new(DeviceGroup::OtherData, "202");
    pub const COMPRESSOR_RPM: FieldRef = FieldRef::new(DeviceGroup::OtherData, "5002");
    pub const BUS_DHW_DEMAND: FieldRef = FieldRef::new(DeviceGroup::OtherData, "5181");
    pub const BUS_DG1_DEMAND: FieldRef = FieldRef::new(DeviceGroup::OtherData, "5183");
    pub const BUS_PROGRAM: FieldRef = FieldRef::new(DeviceGroup::OtherData, "5188");
    pub const BUS_HEAT_PUMP_START: FieldRef = FieldRef::new(DeviceGroup::OtherData, "5257");

    pub const DEW_POINT: FieldRef = FieldRef::new(DeviceGroup::Calculated, "0000");
    pub const AERO_MODE: FieldRef = FieldRef::new(DeviceGroup::Calculated, "0001");
    pub const AERO_ACTIVE: FieldRef = FieldRef::new(DeviceGroup::Calculated, "0002");
}

const CELSIUS: &str = "°C";
const PERCENT: &str = "%";
const BAR: &str = "bar";
const KILOWATT: &str = "kW";
const RPM: &str = "RPM";

const fn temperature(
    key: &'static str,
    name: &'static str,
    field: FieldRef,
    enabled_by_default: bool,
) -> SensorDescriptor {
    SensorDescriptor {
        key,
        name,
        field,
        device_class: Some(DeviceClass::Temperature),
        state_class: Some(StateClass::Measurement),
        unit: Some(CELSIUS),
        transform: Transform::Rounded(1),
        enabled_by_default,
    }
}

const fn power(key: &'static str, name: &'static str, field: FieldRef) -> SensorDescriptor {
    SensorDescriptor {
        key,
        name,
        field,
        device_class: Some(DeviceClass::Power),
        state_class: Some(StateClass::Measurement),
        unit: Some(KILOWATT),
        transform: Transform::Numeric,
        enabled_by_default: true,
    }
}

const fn binary(
    key: &'static str,
    name: &'static str,
    field: FieldRef,
    device_class: Option<DeviceClass>,
    enabled_by_default: bool,
) -> SensorDescriptor {
    SensorDescriptor {
        key,
        name,
        field,
        device_class,
        state_class: None,
        unit: None,
        transform: Transform::Boolean,
        enabled_by_default,
    }
}

/// All read-only entities published per cycle, in publication order.
pub const SENSORS: &[SensorDescriptor] = &[
    temperature(
        "user_sets--1100",
        "Minimum temperature setpoint",
        fields::TEMP_MIN_SETPOINT,
        false,
    ),
    temperature(
        "user_sets--1101",
        "Maximum temperature setpoint",
        fields::TEMP_MAX_SETPOINT,
        false,
    ),
    temperature(
        "main_data--103",
        "Indoor temperature",
        fields::INDOOR_TEMPERATURE,
        true,
    ),
    SensorDescriptor {
        key: "main_data--102",
        name: "Indoor humidity",
        field: fields::INDOOR_HUMIDITY,
        device_class: Some(DeviceClass::Humidity),
        state_class: Some(StateClass::Measurement),
        unit: Some(PERCENT),
        transform: Transform::Rounded(0),
        enabled_by_default: true,
    },
    temperature(
        "other_data--1",
        "Indoor flow temperature",
        fields::INDOOR_FLOW_TEMPERATURE,
        true,
    ),
    temperature(
        "other_data--2",
        "Indoor return temperature",
        fields::INDOOR_RETURN_TEMPERATURE,
        true,
    ),
    temperature(
        "other_data--4",
        "Outdoor flow temperature",
        fields::OUTDOOR_FLOW_TEMPERATURE,
        true,
    ),
    temperature(
        "other_data--5",
        "Outdoor return temperature",
        fields::OUTDOOR_RETURN_TEMPERATURE,
        true,
    ),
    SensorDescriptor {
        key: "other_data--6",
        name: "Circuit pressure",
        field: fields::CIRCUIT_PRESSURE,
        device_class: Some(DeviceClass::Pressure),
        state_class: Some(StateClass::Measurement),
        unit: Some(BAR),
        transform: Transform::Rounded(2),
        enabled_by_default: true,
    },
    temperature(
        "other_data--11",
        "Domestic hot water temperature",
        fields::DHW_TEMPERATURE,
        true,
    ),
    temperature(
        "other_data--20",
        "Outdoor temperature",
        fields::OUTDOOR_TEMPERATURE,
        true,
    ),
    power("other_data--133", "Heating power", fields::HEATING_POWER),
    power("other_data--134", "Cooling power", fields::COOLING_POWER),
    power("other_data--135", "Electric power", fields::ELECTRIC_POWER),
    SensorDescriptor {
        key: "other_data--136",
        name: "COP",
        field: fields::COP,
        device_class: Some(DeviceClass::PowerFactor),
        state_class: Some(StateClass::Measurement),
        unit: None,
        transform: Transform::Rounded(2),
        enabled_by_default: true,
    },
    SensorDescriptor {
        key: "other_data--137",
        name: "EER",
        field: fields::EER,
        device_class: Some(DeviceClass::PowerFactor),
        state_class: Some(StateClass::Measurement),
        unit: None,
        transform: Transform::Rounded(2),
        enabled_by_default: true,
    },
    temperature(
        "other_data--168",
        "Domestic hot water setpoint",
        fields::DHW_SETPOINT,
        true,
    ),
    temperature(
        "other_data--170",
        "Heating setpoint",
        fields::HEATING_SETPOINT,
        true,
    ),
    temperature(
        "other_data--175",
        "Cooling setpoint",
        fields::COOLING_SETPOINT,
        true,
    ),
    SensorDescriptor {
        key: "other_data--5002",
        name: "Compressor speed",
        field: fields::COMPRESSOR_RPM,
        device_class: None,
        state_class: Some(StateClass::Measurement),
        unit: Some(RPM),
        transform: Transform::Rounded(0),
        enabled_by_default: false,
    },
    SensorDescriptor {
        key: "other_data--5181",
        name: "Bus DHW demand",
        field: fields::BUS_DHW_DEMAND,
        device_class: None,
        state_class: None,
        unit: None,
        transform: Transform::Numeric,
        enabled_by_default: false,
    },
    SensorDescriptor {
        key: "other_data--5183",
        name: "Bus DG1 demand",
        field: fields::BUS_DG1_DEMAND,
        device_class: None,
        state_class: None,
        unit: None,
        transform: Transform::Numeric,
        enabled_by_default: false,
    },
    SensorDescriptor {
        key: "other_data--5188",
        name: "Bus program",
        field: fields::BUS_PROGRAM,
        device_class: None,
        state_class: None,
        unit: None,
        transform: Transform::Numeric,
        enabled_by_default: false,
    },
    SensorDescriptor {
        key: "other_data--5257",
        name: "Bus heat pump start",
        field: fields::BUS_HEAT_PUMP_START,
        device_class: None,
        state_class: None,
        unit: None,
        transform: Transform::Numeric,
        enabled_by_default: false,
    },
    binary(
        "user_sets--1800",
        "Remote tunnel active",
        fields::NGROK_ACTIVE,
        None,
        false,
    ),
    binary(
        "other_data--201",
        "Summer mode active",
        fields::SUMMER_MODE_ONLINE,
        None,
        false,
    ),
    binary(
        "other_data--202",
        "Winter mode active",
        fields::WINTER_MODE_ONLINE,
        None,
        false,
    ),
    binary(
        "other_data--32",
        "Alarm",
        fields::ALARM,
        Some(DeviceClass::Problem),
        false,
    ),
    temperature("calc_data--0000", "Dew point", fields::DEW_POINT, true),
    SensorDescriptor {
        key: "calc_data--0001",
        name: "Aerothermal mode",
        field: fields::AERO_MODE,
        device_class: None,
        state_class: None,
        unit: None,
        transform: Transform::Text,
        enabled_by_default: true,
    },
    binary(
        "calc_data--0002",
        "Aerothermal active",
        fields::AERO_ACTIVE,
        None,
        true,
    ),
];

/// Derived cumulative energy counters integrated from the power readings.
pub const ENERGY_SENSORS: &[EnergySensorSpec] = &[
    EnergySensorSpec {
        key: "heating_energy",
        name: "Heating energy",
        source: fields::HEATING_POWER,
    },
    EnergySensorSpec {
        key: "cooling_energy",
        name: "Cooling energy",
        source: fields::COOLING_POWER,
    },
    EnergySensorSpec {
        key: "electric_energy",
        name: "Electric energy",
        source: fields::ELECTRIC_POWER,
    },
];

/// Points the host may write back through the client.
#[derive(Debug, Clone, Copy)]
pub enum WritableKind {
    Switch,
    Number { min: f64, max: f64, step: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct WritablePoint {
    pub name: &'static str,
    pub field: FieldRef,
    pub kind: WritableKind,
}

pub const WRITABLE_POINTS: &[WritablePoint] = &[
    WritablePoint {
        name: "Winter mode",
        field: fields::WINTER_MODE_SWITCH,
        kind: WritableKind::Switch,
    },
    WritablePoint {
        name: "At home",
        field: fields::AT_HOME_SWITCH,
        kind: WritableKind::Switch,
    },
    WritablePoint {
        name: "Minimum temperature",
        field: fields::TEMP_MIN_SETPOINT,
        kind: WritableKind::Number {
            min: 17.9,
            max: 27.9,
            step: 0.1,
        },
    },
    WritablePoint {
        name: "Maximum temperature",
        field: fields::TEMP_MAX_SETPOINT,
        kind: WritableKind::Number {
            min: 18.0,
            max: 28.0,
            step: 0.1,
        },
    },
];
