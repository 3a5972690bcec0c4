//! # hearth-adapter-mqtt
//!
//! MQTT bridge, mirrors committed thermostat state to a broker.
//!
//! ## Responsibilities
//! - Connect to the broker and keep reconnecting
//! - Translate bridge events into retained topics (see [`topic`])
//! - Log publication failures, never fail the write that caused them
//!
//! ## Dependency rule
//! Same as other adapters: depends on `hearth-app` and `hearth-domain`.

pub mod bridge;
pub mod config;
pub mod error;
pub mod topic;

pub use bridge::{MqttBridge, spawn_event_loop};
pub use config::MqttConfig;
