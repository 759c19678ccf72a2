use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// The device groups exposed by the Sunthalpy account API. Each remote group
/// is one `device-data/last` request; `Calculated` holds values synthesized
/// locally after a poll and never goes over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceGroup {
    UserSets,
    MainData,
    OtherData,
    Calculated,
}

impl DeviceGroup {
    /// Groups fetched from the remote service, in poll order.
    pub const REMOTE: [DeviceGroup; 3] = [
        DeviceGroup::UserSets,
        DeviceGroup::MainData,
        DeviceGroup::OtherData,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DeviceGroup::UserSets => "user_sets",
            DeviceGroup::MainData => "main_data",
            DeviceGroup::OtherData => "other_data",
            DeviceGroup::Calculated => "calc_data",
        }
    }

    /// Device UUID used on the wire. `None` for the local-only group.
    pub fn uuid(self) -> Option<&'static str> {
        match self {
            DeviceGroup::UserSets => Some("0e115d1a-9786-403b-831d-10ec07b7d906"),
            DeviceGroup::MainData => Some("be539f06-ed9c-4a84-96c2-0cf2b002ac31"),
            DeviceGroup::OtherData => Some("5f1b91c4-2311-49eb-804c-7d73e6e7fbcc"),
            DeviceGroup::Calculated => None,
        }
    }
}

/// Address of one raw reading inside a device group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub group: DeviceGroup,
    pub address: &'static str,
}

impl FieldRef {
    pub const fn new(group: DeviceGroup, address: &'static str) -> Self {
        Self { group, address }
    }
}

/// All raw readings returned by one poll cycle, keyed by group and address.
pub type RawPayload = HashMap<DeviceGroup, HashMap<String, Value>>;

/// One complete, immutable set of readings from one successful poll.
/// Consumers share a snapshot by reference; it is superseded, never mutated,
/// by the next cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    taken_at: DateTime<Utc>,
    groups: RawPayload,
}

impl Snapshot {
    pub fn new(taken_at: DateTime<Utc>, groups: RawPayload) -> Self {
        Self { taken_at, groups }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn raw(&self, field: FieldRef) -> Option<&Value> {
        self.groups.get(&field.group)?.get(field.address)
    }

    /// Numeric view of a reading. The service mixes JSON numbers, numeric
    /// strings and booleans in `lastMeasure`, so all three are accepted.
    pub fn numeric(&self, field: FieldRef) -> Option<f64> {
        match self.raw(field)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Inserts a locally computed reading into the `Calculated` group.
    /// Only the enrichment step between poll and fan-out may call this.
    pub(crate) fn insert_calculated(&mut self, address: &str, value: Value) {
        self.groups
            .entry(DeviceGroup::Calculated)
            .or_default()
            .insert(address.to_string(), value);
    }
}
