//! # hearth-domain
//!
//! Pure domain model for the hearth thermostat server.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Objects** (versioned `<kind>.<id>` state buckets)
//! - Define **Devices** (serials and the status read model)
//! - Define **Availability** (ONLINE / ASLEEP / OFFLINE transitions)
//! - Define **Commands** (validation, safety clamping, target routing)
//! - Define **Subscriptions** and bridge **Events**
//! - Contain all invariant enforcement and domain logic
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod availability;
pub mod command;
pub mod device;
pub mod event;
pub mod fan_timer;
pub mod object;
pub mod safety;
pub mod schedule;
pub mod subscription;
