//! Request parsing and response rendering for the device transport.
//!
//! Firmware versions disagree on body layout: both subscribe and put accept
//! either an `objects` array or one field per bucket.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use hearth_app::services::command_pipeline::{IngestObject, Ingested};
use hearth_app::services::transport_service::ClientObject;
use hearth_domain::error::ValidationError;
use hearth_domain::object::{ObjectKey, Payload, VersionedObject};

/// Bucket names a subscribe body may use as top-level fields.
pub const KNOWN_BUCKETS: &[&str] = &[
    "device",
    "shared",
    "structure",
    "schedule",
    "custom_schedule",
    "user",
    "topaz",
    "demand_response",
    "demand_response_event",
    "where",
    "kryptonite",
    "diagnostics",
    "device_alert_dialog",
    "servicegroup",
    "link",
    "message",
    "tuneups",
    "utility",
    "diamond_sensor_config",
    "diamond_sensor_event",
    "rate_plan",
    "tou",
    "demand_charge",
    "demand_charge_event",
    "hvac_partner",
    "rcs_settings",
    "cloud_algo",
];

const PUT_METADATA: &[&str] = &["object_key", "base_object_revision", "if_object_revision"];

/// A decoded subscribe body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscribeBody {
    pub session: Option<String>,
    pub chunked: bool,
    /// Optional wait bound in seconds.
    pub timeout: Option<Duration>,
    pub objects: Vec<ClientObject>,
}

/// Decode a subscribe body.
///
/// Entries without a parseable `object_key` are dropped.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedPayload`] when the body is not a JSON
/// object.
pub fn parse_subscribe(body: &[u8]) -> Result<SubscribeBody, ValidationError> {
    let root = parse_object(body)?;

    let entries: Vec<&Value> = match root.get("objects").and_then(Value::as_array) {
        Some(objects) => objects.iter().collect(),
        None => root
            .iter()
            .filter(|(field, _)| KNOWN_BUCKETS.contains(&field.as_str()))
            .map(|(_, value)| value)
            .collect(),
    };

    Ok(SubscribeBody {
        session: root
            .get("session")
            .and_then(Value::as_str)
            .map(str::to_owned),
        chunked: root.get("chunked").and_then(Value::as_bool).unwrap_or(false),
        timeout: root
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs),
        objects: entries.into_iter().filter_map(client_object).collect(),
    })
}

/// Decode a put body into ingestion requests.
///
/// Objects that carry no value are skipped with a warning.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedPayload`] when the body is not a JSON
/// object.
pub fn parse_put(body: &[u8]) -> Result<Vec<IngestObject>, ValidationError> {
    let root = parse_object(body)?;

    let candidates: Vec<(Option<&str>, Option<Payload>, Option<u64>)> =
        match root.get("objects").and_then(Value::as_array) {
            Some(objects) => objects
                .iter()
                .filter_map(Value::as_object)
                .map(|entry| {
                    (
                        entry.get("object_key").and_then(Value::as_str),
                        entry.get("value").and_then(Value::as_object).cloned(),
                        entry.get("if_object_revision").and_then(Value::as_u64),
                    )
                })
                .collect(),
            None => root
                .iter()
                .filter(|(field, _)| field.as_str() != "session")
                .filter_map(|(_, value)| value.as_object())
                .filter(|entry| entry.contains_key("object_key"))
                .map(|entry| {
                    let inline: Payload = entry
                        .iter()
                        .filter(|(field, _)| !PUT_METADATA.contains(&field.as_str()))
                        .map(|(field, value)| (field.clone(), value.clone()))
                        .collect();
                    (
                        entry.get("object_key").and_then(Value::as_str),
                        Some(inline),
                        entry.get("if_object_revision").and_then(Value::as_u64),
                    )
                })
                .collect(),
        };

    Ok(candidates
        .into_iter()
        .filter_map(|(key, value, if_object_revision)| {
            let key = key.and_then(|k| ObjectKey::parse(k).ok())?;
            match value.filter(|v| !v.is_empty()) {
                Some(value) => Some(IngestObject {
                    key,
                    value,
                    if_object_revision,
                }),
                None => {
                    tracing::warn!(object_key = %key, "put object without a value, skipping");
                    None
                }
            }
        })
        .collect())
}

fn parse_object(body: &[u8]) -> Result<Payload, ValidationError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(root)) => Ok(root),
        Ok(_) => Err(ValidationError::MalformedPayload(
            "expected a JSON object".into(),
        )),
        Err(err) => Err(ValidationError::MalformedPayload(err.to_string())),
    }
}

fn client_object(entry: &Value) -> Option<ClientObject> {
    let entry = entry.as_object()?;
    let key = entry.get("object_key").and_then(Value::as_str)?;
    let Ok(key) = ObjectKey::parse(key) else {
        tracing::debug!(object_key = key, "ignoring unparseable object key");
        return None;
    };
    Some(ClientObject {
        key,
        revision: entry
            .get("object_revision")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        timestamp: entry
            .get("object_timestamp")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        value: entry.get("value").and_then(Value::as_object).cloned(),
    })
}

/// One object as the firmware expects it; metadata before the value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireObject {
    pub object_revision: u64,
    pub object_timestamp: i64,
    pub object_key: ObjectKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Payload>,
}

impl WireObject {
    /// Revision, timestamp and key only.
    #[must_use]
    pub fn metadata(object: &VersionedObject) -> Self {
        Self {
            object_revision: object.revision,
            object_timestamp: object.timestamp,
            object_key: object.key.clone(),
            value: None,
        }
    }

    /// Put acknowledgement: the value is echoed only when it changed.
    #[must_use]
    pub fn ingested(ingested: Ingested) -> Self {
        if ingested.changed {
            ingested.object.into()
        } else {
            Self::metadata(&ingested.object)
        }
    }
}

impl From<VersionedObject> for WireObject {
    fn from(object: VersionedObject) -> Self {
        Self {
            object_revision: object.revision,
            object_timestamp: object.timestamp,
            object_key: object.key,
            value: Some(object.value),
        }
    }
}

/// `{"objects": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ObjectsBody {
    pub objects: Vec<WireObject>,
}

impl ObjectsBody {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl FromIterator<WireObject> for ObjectsBody {
    fn from_iter<I: IntoIterator<Item = WireObject>>(iter: I) -> Self {
        Self {
            objects: iter.into_iter().collect(),
        }
    }
}
