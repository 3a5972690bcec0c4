//! Application services: use-case implementations.
//!
//! Each service struct accepts port trait implementations via generic parameters
//! (constructor injection), keeping this layer decoupled from concrete adapters.

pub mod availability_tracker;
pub mod command_pipeline;
pub mod control_service;
pub mod transport_service;
