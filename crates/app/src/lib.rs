//! # hearth-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `ObjectRepository`: durable load / upsert / delete of versioned objects
//!   - `EventPublisher`: best-effort fan-out of bridge events
//!   - `PairingGate`: which devices may use the transport
//! - Own the in-memory core:
//!   - `ObjectStore`: versioned objects with one write section per device
//!   - `SubscriptionBroker`: long-poll waiters, wake-ups and timeouts
//!   - `PropagationScheduler`: debounced command delivery to devices
//!   - `UpdateNotifier`: wakes waiters and queues bridge events on commit
//! - Define **driving/inbound ports** as use-case structs:
//!   - `TransportService`: device subscribe / put
//!   - `ControlService`: commands, status, force-notify, observer long-poll
//!   - `CommandPipeline`, `AvailabilityTracker`
//!
//! ## Dependency rule
//! Depends on `hearth-domain` only (plus `tokio` for sync and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod broker;
pub mod event_bus;
pub mod hub;
pub mod notifier;
pub mod ports;
pub mod propagation;
pub mod services;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
