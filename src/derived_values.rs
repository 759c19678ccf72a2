//! Locally computed readings added to every snapshot before fan-out: the dew
//! point and the aerothermal unit's operating mode.

use serde_json::json;

use crate::sensor_catalog::fields;
use crate::snapshot::Snapshot;

// Magnus formula constants.
const MAGNUS_B: f64 = 17.625;
const MAGNUS_C: f64 = 243.04;

/// How far the return temperature may exceed the heating setpoint before the
/// heat output is attributed to domestic hot water instead of heating.
const DHW_RETURN_MARGIN: f64 = 5.0;

/// Operating mode of the aerothermal unit, inferred from the power readings
/// and setpoints. DHW has priority over space conditioning, so a pending
/// heating or cooling demand is tracked while DHW runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeroMode {
    Idle,
    Cooling,
    Heating,
    Dhw,
    DhwHeatingQueued,
    DhwCoolingQueued,
    Unknown,
}

impl AeroMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AeroMode::Idle => "idle",
            AeroMode::Cooling => "cooling",
            AeroMode::Heating => "heating",
            AeroMode::Dhw => "dhw",
            AeroMode::DhwHeatingQueued => "dhw (heating queued)",
            AeroMode::DhwCoolingQueued => "dhw (cooling queued)",
            AeroMode::Unknown => "unknown",
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, AeroMode::Idle)
    }
}

/// Dew point in °C from temperature (°C) and relative humidity (%), one
/// decimal. `None` when the inputs cannot support the computation.
pub fn dew_point(temperature: f64, humidity: f64) -> Option<f64> {
    if !temperature.is_finite() || !humidity.is_finite() || humidity <= 0.0 {
        return None;
    }
    let gamma = (humidity / 100.0).ln() + (MAGNUS_B * temperature) / (MAGNUS_C + temperature);
    let point = MAGNUS_C * gamma / (MAGNUS_B - gamma);
    point.is_finite().then(|| (point * 10.0).round() / 10.0)
}

/// Classifies the aerothermal unit's state. The first snapshot after startup
/// has no predecessor and reports `Idle`, as do snapshots missing any of the
/// readings the classification needs.
pub fn classify_aero_mode(snapshot: &Snapshot, previous: Option<&Snapshot>) -> AeroMode {
    if previous.is_none() {
        return AeroMode::Idle;
    }

    let (Some(cooling), Some(heating), Some(_dhw_temp), Some(target), Some(return_temp)) = (
        snapshot.numeric(fields::COOLING_POWER),
        snapshot.numeric(fields::HEATING_POWER),
        snapshot.numeric(fields::DHW_TEMPERATURE),
        snapshot.numeric(fields::HEATING_SETPOINT),
        snapshot.numeric(fields::INDOOR_RETURN_TEMPERATURE),
    ) else {
        return AeroMode::Idle;
    };

    if cooling == 0.0 && heating == 0.0 {
        return AeroMode::Idle;
    }
    if cooling > 0.0 {
        return AeroMode::Cooling;
    }
    if heating > 0.0 {
        // a return temperature well above the heating setpoint means the
        // heat is going into the DHW tank, not the house
        if return_temp > target + DHW_RETURN_MARGIN {
            let dg1_demand = snapshot
                .numeric(fields::BUS_DG1_DEMAND)
                .is_some_and(|value| value == 1.0);
            if dg1_demand {
                let winter = snapshot
                    .numeric(fields::WINTER_MODE_ONLINE)
                    .is_some_and(|value| value != 0.0);
                return if winter {
                    AeroMode::DhwHeatingQueued
                } else {
                    AeroMode::DhwCoolingQueued
                };
            }
            return AeroMode::Dhw;
        }
        return AeroMode::Heating;
    }

    AeroMode::Unknown
}

/// Adds the calculated group to a freshly built snapshot. Runs once per
/// cycle, between the poll and consumer fan-out.
pub fn enrich(snapshot: &mut Snapshot, previous: Option<&Snapshot>) {
    let temperature = snapshot.numeric(fields::INDOOR_TEMPERATURE);
    let humidity = snapshot.numeric(fields::INDOOR_HUMIDITY);
    if let (Some(temperature), Some(humidity)) = (temperature, humidity) {
        if let Some(point) = dew_point(temperature, humidity) {
            snapshot.insert_calculated(fields::DEW_POINT.address, json!(point));
        }
    }

    let mode = classify_aero_mode(snapshot, previous);
    snapshot.insert_calculated(fields::AERO_MODE.address, json!(mode.as_str()));
    snapshot.insert_calculated(
        fields::AERO_ACTIVE.address,
        json!(if mode.is_active() { 1 } else { 0 }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DeviceGroup, RawPayload};
    use chrono::Utc;
    use serde_json::Value;

    fn snapshot(other_data: &[(&str, f64)], main_data: &[(&str, f64)]) -> Snapshot {
        let mut groups = RawPayload::new();
        let other = groups.entry(DeviceGroup::OtherData).or_default();
        for (address, value) in other_data {
            other.insert((*address).to_string(), json!(value));
        }
        let main = groups.entry(DeviceGroup::MainData).or_default();
        for (address, value) in main_data {
            main.insert((*address).to_string(), json!(value));
        }
        Snapshot::new(Utc::now(), groups)
    }

    fn heating_snapshot(return_temp: f64, dg1: f64, winter: f64) -> Snapshot {
        snapshot(
            &[
                ("134", 0.0),
                ("133", 3.2),
                ("11", 48.0),
                ("170", 35.0),
                ("2", return_temp),
                ("5183", dg1),
                ("202", winter),
            ],
            &[],
        )
    }

    #[test]
    fn test_dew_point_reference_values() {
        // 20 °C at 50 % RH dews at roughly 9.3 °C
        let point = dew_point(20.0, 50.0).unwrap();
        assert!((point - 9.3).abs() <= 0.1, "got {point}");

        // saturated air dews at the air temperature
        let point = dew_point(15.0, 100.0).unwrap();
        assert!((point - 15.0).abs() <= 0.05, "got {point}");
    }

    #[test]
    fn test_dew_point_rejects_bad_inputs() {
        assert_eq!(dew_point(20.0, 0.0), None);
        assert_eq!(dew_point(20.0, -5.0), None);
        assert_eq!(dew_point(f64::NAN, 50.0), None);
    }

    #[test]
    fn test_first_snapshot_is_idle() {
        let current = heating_snapshot(36.0, 0.0, 1.0);
        assert_eq!(classify_aero_mode(&current, None), AeroMode::Idle);
    }

    #[test]
    fn test_no_power_is_idle() {
        let previous = heating_snapshot(36.0, 0.0, 1.0);
        let current = snapshot(
            &[("134", 0.0), ("133", 0.0), ("11", 45.0), ("170", 35.0), ("2", 33.0)],
            &[],
        );
        assert_eq!(
            classify_aero_mode(&current, Some(&previous)),
            AeroMode::Idle
        );
    }

    #[test]
    fn test_cooling_power_wins() {
        let previous = heating_snapshot(36.0, 0.0, 1.0);
        let current = snapshot(
            &[("134", 2.1), ("133", 0.0), ("11", 45.0), ("170", 35.0), ("2", 33.0)],
            &[],
        );
        assert_eq!(
            classify_aero_mode(&current, Some(&previous)),
            AeroMode::Cooling
        );
    }

    #[test]
    fn test_heating_below_dhw_margin() {
        let previous = heating_snapshot(36.0, 0.0, 1.0);
        let current = heating_snapshot(38.0, 0.0, 1.0);
        assert_eq!(
            classify_aero_mode(&current, Some(&previous)),
            AeroMode::Heating
        );
    }

    #[test]
    fn test_dhw_and_queued_modes() {
        let previous = heating_snapshot(36.0, 0.0, 1.0);

        // return temperature well above the setpoint: the tank is heating
        let current = heating_snapshot(41.0, 0.0, 1.0);
        assert_eq!(classify_aero_mode(&current, Some(&previous)), AeroMode::Dhw);

        // with DG1 demand active the pending season mode is reported
        let current = heating_snapshot(41.0, 1.0, 1.0);
        assert_eq!(
            classify_aero_mode(&current, Some(&previous)),
            AeroMode::DhwHeatingQueued
        );
        let current = heating_snapshot(41.0, 1.0, 0.0);
        assert_eq!(
            classify_aero_mode(&current, Some(&previous)),
            AeroMode::DhwCoolingQueued
        );
    }

    #[test]
    fn test_missing_readings_default_to_idle() {
        let previous = heating_snapshot(36.0, 0.0, 1.0);
        let current = snapshot(&[("134", 0.0), ("133", 3.2)], &[]);
        assert_eq!(
            classify_aero_mode(&current, Some(&previous)),
            AeroMode::Idle
        );
    }

    #[test]
    fn test_enrich_adds_calculated_group() {
        let mut current = snapshot(
            &[("134", 0.0), ("133", 0.0), ("11", 45.0), ("170", 35.0), ("2", 33.0)],
            &[("103", 21.0), ("102", 55.0)],
        );
        let previous = heating_snapshot(36.0, 0.0, 1.0);
        enrich(&mut current, Some(&previous));

        assert!(current.numeric(fields::DEW_POINT).is_some());
        assert_eq!(
            current.raw(fields::AERO_MODE),
            Some(&Value::String("idle".to_string()))
        );
        assert_eq!(current.numeric(fields::AERO_ACTIVE), Some(0.0));
    }

    #[test]
    fn test_enrich_without_humidity_omits_dew_point() {
        let mut current = snapshot(&[("133", 0.0), ("134", 0.0)], &[("103", 21.0)]);
        enrich(&mut current, None);

        assert_eq!(current.raw(fields::DEW_POINT), None);
        assert_eq!(
            current.raw(fields::AERO_MODE),
            Some(&Value::String("idle".to_string()))
        );
    }
}
