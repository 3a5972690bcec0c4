//! MQTT adapter error types.

use hearth_domain::error::HubError;

/// Errors specific to the MQTT bridge.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The rumqttc client refused the request (its queue is closed).
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// An object value could not be encoded as JSON.
    #[error("failed to encode MQTT payload")]
    Encode(#[source] serde_json::Error),
}

impl From<rumqttc::ClientError> for MqttError {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Client(err)
    }
}

impl From<serde_json::Error> for MqttError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err)
    }
}

impl From<MqttError> for HubError {
    fn from(err: MqttError) -> Self {
        HubError::Storage(Box::new(err))
    }
}
