//! Versioned objects: the unit of state exchanged with the thermostat.
//!
//! Every piece of device state lives under an [`ObjectKey`] of the form
//! `<kind>.<identifier>` (for example `shared.02AA01AB501203EQ`). Each key
//! carries its own revision counter, bumped by exactly one per write.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::Serial;
use crate::error::ValidationError;
use crate::time::{self, Timestamp};

/// Field map of an object's value.
pub type Payload = serde_json::Map<String, Value>;

/// Bucket an object belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Structure,
    Device,
    Shared,
    Schedule,
    Availability,
    /// Any other bucket the firmware reports, stored opaquely.
    Other(String),
}

impl ObjectKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Structure => "structure",
            Self::Device => "device",
            Self::Shared => "shared",
            Self::Schedule => "schedule",
            Self::Availability => "availability",
            Self::Other(name) => name,
        }
    }

    fn from_bucket(bucket: &str) -> Self {
        match bucket {
            "structure" => Self::Structure,
            "device" => Self::Device,
            "shared" => Self::Shared,
            "schedule" => Self::Schedule,
            "availability" => Self::Availability,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<kind>.<identifier>` key addressing one versioned object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Build a key from its two parts.
    #[must_use]
    pub fn new(kind: &ObjectKind, id: &str) -> Self {
        Self(format!("{kind}.{id}"))
    }

    /// Key of a per-device bucket, e.g. `device.<serial>`.
    #[must_use]
    pub fn for_device(kind: &ObjectKind, serial: &Serial) -> Self {
        Self::new(kind, serial.as_str())
    }

    /// Parse a raw key.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidObjectKey`] when either side of the
    /// first `.` is empty.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.split_once('.') {
            Some((bucket, id)) if !bucket.is_empty() && !id.is_empty() => {
                Ok(Self(raw.to_string()))
            }
            _ => Err(ValidationError::InvalidObjectKey(raw.to_string())),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        ObjectKind::from_bucket(self.bucket())
    }

    /// Bucket name as written on the wire.
    #[must_use]
    pub fn bucket(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(b, _)| b)
    }

    /// Identifier part (serial, structure id, …).
    #[must_use]
    pub fn id(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, id)| id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.0
    }
}

/// Current state of one object key.
///
/// Serializes in the field order the device protocol expects:
/// `object_revision`, `object_timestamp`, `object_key`, `value`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionedObject {
    #[serde(rename = "object_revision")]
    pub revision: u64,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "object_timestamp")]
    pub timestamp: i64,
    #[serde(rename = "object_key")]
    pub key: ObjectKey,
    pub value: Payload,
    #[serde(skip)]
    pub updated_at: Timestamp,
}

impl VersionedObject {
    /// First revision of a brand-new key.
    #[must_use]
    pub fn first(key: ObjectKey, value: Payload, at: Timestamp) -> Self {
        Self {
            revision: 1,
            timestamp: time::to_millis(at),
            key,
            value,
            updated_at: at,
        }
    }

    /// Stand-in for a key the server has never stored (revision 0).
    #[must_use]
    pub fn empty(key: ObjectKey) -> Self {
        Self {
            revision: 0,
            timestamp: 0,
            key,
            value: Payload::new(),
            updated_at: Timestamp::default(),
        }
    }

    /// Successor holding `value`, one revision later.
    #[must_use]
    pub fn next(&self, value: Payload, at: Timestamp) -> Self {
        Self {
            revision: self.revision + 1,
            timestamp: time::to_millis(at),
            key: self.key.clone(),
            value,
            updated_at: at,
        }
    }

    /// Whether this object advanced past the caller's known revision.
    #[must_use]
    pub fn is_newer_than(&self, baseline: u64) -> bool {
        self.revision > baseline
    }

    /// Numeric field lookup, accepting integers and floats alike.
    #[must_use]
    pub fn number(&self, field: &str) -> Option<f64> {
        self.value.get(field).and_then(Value::as_f64)
    }
}

/// Shallow merge: fields of `patch` overwrite fields of `base`.
#[must_use]
pub fn merge(base: &Payload, patch: &Payload) -> Payload {
    let mut merged = base.clone();
    for (field, value) in patch {
        merged.insert(field.clone(), value.clone());
    }
    merged
}
