//! Device: a thermostat identified by its serial, and its status read model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::availability::AvailabilityState;
use crate::error::ValidationError;
use crate::object::{ObjectKey, ObjectKind, VersionedObject};
use crate::time::Timestamp;

/// Shortest serial the firmware ever reports.
pub const MIN_SERIAL_LEN: usize = 10;

/// Stable device identifier: upper-case ASCII alphanumerics only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Serial(String);

impl Serial {
    /// Sanitize and validate a raw serial.
    ///
    /// Non-alphanumeric characters are dropped and letters upper-cased.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidSerial`] when fewer than
    /// [`MIN_SERIAL_LEN`] characters remain.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let cleaned: String = raw
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if cleaned.len() < MIN_SERIAL_LEN {
            return Err(ValidationError::InvalidSerial(raw.to_string()));
        }
        Ok(Self(cleaned))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Serial {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Operator-facing summary of one device, assembled from its objects.
///
/// Relationships (device → structure) are resolved by key lookup at read
/// time, so the summary never holds references into the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub serial: Serial,
    pub name: Option<String>,
    pub availability: AvailabilityState,
    pub last_seen: Option<Timestamp>,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub target_temperature_low: Option<f64>,
    pub target_temperature_high: Option<f64>,
    pub mode: Option<String>,
    pub away: bool,
    pub fan_timer_timeout: Option<i64>,
    pub structure_id: Option<String>,
    pub revisions: BTreeMap<ObjectKey, u64>,
}

impl DeviceStatus {
    /// Build the summary from every object stored for `serial`.
    #[must_use]
    pub fn assemble(
        serial: &Serial,
        objects: &BTreeMap<ObjectKey, VersionedObject>,
        availability: AvailabilityState,
        last_seen: Option<Timestamp>,
    ) -> Self {
        let device = objects.get(&ObjectKey::for_device(&ObjectKind::Device, serial));
        let shared = objects.get(&ObjectKey::for_device(&ObjectKind::Shared, serial));
        let structure_id = device.and_then(|d| structure_id_of(&d.value));
        let structure = structure_id
            .as_deref()
            .and_then(|id| objects.get(&ObjectKey::new(&ObjectKind::Structure, id)));

        let text = |object: Option<&VersionedObject>, field: &str| {
            object
                .and_then(|o| o.value.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let number = |object: Option<&VersionedObject>, field: &str| {
            object.and_then(|o| o.number(field))
        };

        Self {
            serial: serial.clone(),
            name: text(shared, "name").or_else(|| text(device, "name")),
            availability,
            last_seen,
            current_temperature: number(shared, "current_temperature"),
            target_temperature: number(shared, "target_temperature"),
            target_temperature_low: number(shared, "target_temperature_low"),
            target_temperature_high: number(shared, "target_temperature_high"),
            mode: text(shared, "target_temperature_type"),
            away: structure
                .and_then(|s| s.value.get("manual_eco_all"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            fan_timer_timeout: device
                .and_then(|d| d.value.get("fan_timer_timeout"))
                .and_then(Value::as_i64),
            structure_id,
            revisions: objects
                .iter()
                .map(|(key, object)| (key.clone(), object.revision))
                .collect(),
        }
    }
}

/// Structure a device belongs to, from its `structure_id` field.
#[must_use]
pub fn structure_id_of(device: &crate::object::Payload) -> Option<String> {
    device
        .get("structure_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
