//! Mapping of bridge events to retained MQTT messages.
//!
//! Layout under the configured prefix:
//!
//! | Topic | Payload |
//! |-------|---------|
//! | `<prefix>/<serial>/<bucket>` | JSON value of the object |
//! | `<prefix>/<serial>/<bucket>/<field>` | one field, strings unquoted |
//! | `<prefix>/<serial>/availability` | `online` or `offline` |
//! | `<prefix>/bridge` | bridge connection state |

use serde_json::Value;

use hearth_domain::device::Serial;
use hearth_domain::event::{Event, EventKind};
use hearth_domain::object::{ObjectKind, Payload};

use crate::error::MqttError;

const AVAILABILITY: &str = "availability";
pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// One message to publish, always retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    fn new(topic: String, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicMap {
    prefix: String,
    publish_fields: bool,
}

impl TopicMap {
    #[must_use]
    pub fn new(prefix: &str, publish_fields: bool) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            publish_fields,
        }
    }

    /// Topic carrying the bridge's own connection state.
    #[must_use]
    pub fn bridge_topic(&self) -> String {
        format!("{}/bridge", self.prefix)
    }

    #[must_use]
    pub fn availability_topic(&self, serial: &Serial) -> String {
        format!("{}/{serial}/{AVAILABILITY}", self.prefix)
    }

    /// Messages describing `event`, in publication order.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::Encode`] if a value cannot be serialized.
    pub fn messages(&self, event: &Event) -> Result<Vec<Message>, MqttError> {
        match &event.kind {
            // availability is mirrored from the tracker's own events
            EventKind::ObjectChanged { key, .. } if key.kind() == ObjectKind::Availability => {
                Ok(Vec::new())
            }
            EventKind::ObjectChanged { key, value, .. } => {
                self.object_messages(&event.serial, key.bucket(), value)
            }
            EventKind::AvailabilityChanged { state } => {
                let payload = if state.is_available() { ONLINE } else { OFFLINE };
                Ok(vec![Message::new(
                    self.availability_topic(&event.serial),
                    payload,
                )])
            }
            EventKind::DeviceRemoved => Ok(vec![Message::new(
                self.availability_topic(&event.serial),
                OFFLINE,
            )]),
        }
    }

    fn object_messages(
        &self,
        serial: &Serial,
        bucket: &str,
        value: &Payload,
    ) -> Result<Vec<Message>, MqttError> {
        let base = format!("{}/{serial}/{bucket}", self.prefix);
        let mut messages = vec![Message::new(base.clone(), serde_json::to_vec(value)?)];
        if self.publish_fields {
            for (field, field_value) in value {
                messages.push(Message::new(
                    format!("{base}/{field}"),
                    field_payload(field_value)?,
                ));
            }
        }
        Ok(messages)
    }
}

fn field_payload(value: &Value) -> Result<Vec<u8>, MqttError> {
    match value {
        Value::String(text) => Ok(text.clone().into_bytes()),
        other => Ok(serde_json::to_vec(other)?),
    }
}
