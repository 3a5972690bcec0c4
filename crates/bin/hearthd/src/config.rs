//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `hearth.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::cmp::Ordering;
use std::time::Duration;

use serde::Deserialize;

use hearth_adapter_mqtt::MqttConfig;
use hearth_app::hub::HubSettings;
use hearth_app::services::availability_tracker::AvailabilitySettings;
use hearth_app::services::command_pipeline::CommandSettings;
use hearth_app::services::transport_service::TransportSettings;
use hearth_domain::safety::{ClampPolicy, DEFAULT_MAX_CELSIUS, DEFAULT_MIN_CELSIUS, SafetyBounds};

const SUSPEND_TIME_MAX_RANGE: std::ops::RangeInclusive<u64> = 30..=300;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device transport listener.
    pub server: ServerConfig,
    /// Control API listener.
    pub control: ControlConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub transport: TransportConfig,
    pub commands: CommandsConfig,
    pub availability: AvailabilityConfig,
    pub pairing: PairingConfig,
    pub mqtt: MqttConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub host: String,
    pub port: u16,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Device long-poll settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Public origin advertised to devices by `/nest/entry`.
    pub api_origin: String,
    pub max_subscriptions_per_device: usize,
    /// Longest sleep a device may declare, in seconds (30 to 300).
    pub suspend_time_max_secs: u64,
    /// Extra hold on top of `suspend_time_max_secs`, in seconds.
    pub hold_buffer_secs: u64,
    /// Bridge events buffered before new ones are dropped.
    pub event_capacity: usize,
}

/// Operator command settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Debounce before a command reaches the device, in seconds.
    pub defer_device_window_secs: u64,
    pub min_celsius: f64,
    pub max_celsius: f64,
    pub clamp_policy: ClampPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Silence after which a device is OFFLINE, in seconds.
    pub liveness_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Reject transport requests from devices without an owner or a valid
    /// entry key.
    pub required: bool,
}

impl Config {
    /// Load configuration from `hearth.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("hearth.toml")?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("HEARTH_HOST") {
            self.server.host = val;
        }
        if let Some(port) = var("HEARTH_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = var("HEARTH_BIND")
            && let Some((host, port)) = val.rsplit_once(':')
        {
            self.server.host = host.to_string();
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Some(val) = var("HEARTH_CONTROL_BIND")
            && let Some((host, port)) = val.rsplit_once(':')
        {
            self.control.host = host.to_string();
            if let Ok(port) = port.parse() {
                self.control.port = port;
            }
        }
        if let Some(val) = var("HEARTH_DATABASE_URL") {
            self.database.url = val;
        }
        if let Some(val) = var("HEARTH_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("HEARTH_API_ORIGIN") {
            self.transport.api_origin = val;
        }
        if let Some(secs) = var("HEARTH_SUSPEND_TIME_MAX").and_then(|val| val.parse().ok()) {
            self.transport.suspend_time_max_secs = secs;
        }
        if let Some(max) = var("HEARTH_MAX_SUBSCRIPTIONS_PER_DEVICE").and_then(|val| val.parse().ok()) {
            self.transport.max_subscriptions_per_device = max;
        }
        if let Some(secs) = var("HEARTH_DEFER_DEVICE_WINDOW").and_then(|val| val.parse().ok()) {
            self.commands.defer_device_window_secs = secs;
        }
        if let Some(flag) = var("HEARTH_PAIRING_REQUIRED").and_then(|val| parse_flag(&val)) {
            self.pairing.required = flag;
        }
        if let Some(flag) = var("HEARTH_MQTT_ENABLED").and_then(|val| parse_flag(&val)) {
            self.mqtt.enabled = flag;
        }
        if let Some(val) = var("HEARTH_MQTT_HOST") {
            self.mqtt.broker_host = val;
        }
        if let Some(port) = var("HEARTH_MQTT_PORT").and_then(|val| val.parse().ok()) {
            self.mqtt.broker_port = port;
        }
        if let Some(val) = var("HEARTH_MQTT_USER") {
            self.mqtt.username = Some(val);
        }
        if let Some(val) = var("HEARTH_MQTT_PASSWORD") {
            self.mqtt.password = Some(val);
        }
        if let Some(val) = var("HEARTH_MQTT_TOPIC_PREFIX") {
            self.mqtt.topic_prefix = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 || self.control.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.bind_addr() == self.control_bind_addr() {
            return Err(ConfigError::Validation(
                "device and control listeners must differ".to_string(),
            ));
        }
        if !SUSPEND_TIME_MAX_RANGE.contains(&self.transport.suspend_time_max_secs) {
            return Err(ConfigError::Validation(format!(
                "transport.suspend_time_max_secs must be within {}..={}",
                SUSPEND_TIME_MAX_RANGE.start(),
                SUSPEND_TIME_MAX_RANGE.end()
            )));
        }
        if self.transport.max_subscriptions_per_device == 0 {
            return Err(ConfigError::Validation(
                "transport.max_subscriptions_per_device must be non-zero".to_string(),
            ));
        }
        if self.transport.event_capacity == 0 {
            return Err(ConfigError::Validation(
                "transport.event_capacity must be non-zero".to_string(),
            ));
        }
        if self.commands.min_celsius.partial_cmp(&self.commands.max_celsius) != Some(Ordering::Less) {
            return Err(ConfigError::Validation(
                "commands.min_celsius must be below commands.max_celsius".to_string(),
            ));
        }
        if self.availability.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "availability.sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Return the device transport `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Return the control API `host:port` bind address.
    #[must_use]
    pub fn control_bind_addr(&self) -> String {
        format!("{}:{}", self.control.host, self.control.port)
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    /// Settings of the core components.
    #[must_use]
    pub fn hub_settings(&self) -> HubSettings {
        let suspend_time_max = Duration::from_secs(self.transport.suspend_time_max_secs);
        HubSettings {
            max_subscriptions_per_device: self.transport.max_subscriptions_per_device,
            defer_device_window: Duration::from_secs(self.commands.defer_device_window_secs),
            event_capacity: self.transport.event_capacity,
            transport: TransportSettings {
                api_origin: self.transport.api_origin.clone(),
                suspend_time_max,
                hold_buffer: Duration::from_secs(self.transport.hold_buffer_secs),
            },
            commands: CommandSettings {
                bounds: SafetyBounds {
                    min: self.commands.min_celsius,
                    max: self.commands.max_celsius,
                },
                policy: self.commands.clamp_policy,
            },
            availability: AvailabilitySettings {
                liveness_timeout: Duration::from_secs(self.availability.liveness_timeout_secs),
                suspend_time_max,
                sweep_interval: Duration::from_secs(self.availability.sweep_interval_secs),
            },
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:hearth.db".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hearthd=info,hearth=info,tower_http=info".to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        let defaults = HubSettings::default();
        Self {
            api_origin: defaults.transport.api_origin,
            max_subscriptions_per_device: defaults.max_subscriptions_per_device,
            suspend_time_max_secs: defaults.transport.suspend_time_max.as_secs(),
            hold_buffer_secs: defaults.transport.hold_buffer.as_secs(),
            event_capacity: defaults.event_capacity,
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            defer_device_window_secs: HubSettings::default().defer_device_window.as_secs(),
            min_celsius: DEFAULT_MIN_CELSIUS,
            max_celsius: DEFAULT_MAX_CELSIUS,
            clamp_policy: ClampPolicy::default(),
        }
    }
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        let defaults = AvailabilitySettings::default();
        Self {
            liveness_timeout_secs: defaults.liveness_timeout.as_secs(),
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
