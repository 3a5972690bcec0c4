//! MQTT bridge configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the MQTT bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Whether the bridge is started at all.
    pub enabled: bool,
    /// MQTT broker hostname or IP address.
    pub broker_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// MQTT client identifier.
    pub client_id: String,
    /// Prefix of every published topic.
    pub topic_prefix: String,
    /// Also publish one retained topic per field of each object.
    pub publish_fields: bool,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    /// Pause before polling again after a connection error, in seconds.
    pub reconnect_delay_secs: u16,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            username: None,
            password: None,
            client_id: "hearth".to_string(),
            topic_prefix: "nest".to_string(),
            publish_fields: true,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

impl MqttConfig {
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.reconnect_delay_secs))
    }
}
