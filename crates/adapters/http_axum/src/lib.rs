//! # hearth-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve the **device transport** the thermostat firmware talks to
//!   (`/nest/transport`, `/nest/transport/put`, `/nest/entry`, `/nest/ping`)
//! - Serve the **control API** for operators and integrations
//!   (`/command`, `/status`, `/notify-device`, `/api/devices`, `/api/stats`,
//!   `/api/subscribe`, `/api/events/stream`)
//! - Map HTTP requests into application service calls (driving adapter)
//! - Map application results and [`HubError`](hearth_domain::error::HubError)s
//!   into HTTP responses
//!
//! The two surfaces are separate routers so they can be bound to different
//! listeners.
//!
//! ## Dependency rule
//! Depends on `hearth-app` (for port traits and services) and `hearth-domain`
//! (for domain types used in request/response mapping). Never leaks axum types
//! into the domain.

pub mod api;
pub mod error;
pub mod nest;
pub mod router;
pub mod serial;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;
