//! Shared application state for axum handlers.

use std::sync::Arc;

use hearth_app::event_bus::InProcessEventBus;
use hearth_app::hub::Hub;
use hearth_app::services::control_service::ControlService;
use hearth_app::services::transport_service::TransportService;

/// Application state shared across all axum handlers.
///
/// Generic over the object repository and the pairing gate to avoid dynamic
/// dispatch. `Clone` is implemented manually so the underlying types
/// themselves do not need to be `Clone`; only the `Arc` wrappers are cloned.
pub struct AppState<R, G> {
    /// Device-facing subscribe / put.
    pub transport: Arc<TransportService<R, G>>,
    /// Operator-facing commands and status.
    pub control: Arc<ControlService<R>>,
    /// Source of the SSE event stream.
    pub event_bus: Arc<InProcessEventBus>,
    /// Reject transport requests from devices the gate does not know.
    pub pairing_required: bool,
}

impl<R, G> Clone for AppState<R, G> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            control: Arc::clone(&self.control),
            event_bus: Arc::clone(&self.event_bus),
            pairing_required: self.pairing_required,
        }
    }
}

impl<R, G> AppState<R, G> {
    /// Create the state from pre-wrapped `Arc` services.
    #[must_use]
    pub fn new(
        transport: Arc<TransportService<R, G>>,
        control: Arc<ControlService<R>>,
        event_bus: Arc<InProcessEventBus>,
        pairing_required: bool,
    ) -> Self {
        Self {
            transport,
            control,
            event_bus,
            pairing_required,
        }
    }

    /// Take the services out of a wired [`Hub`].
    #[must_use]
    pub fn from_hub(
        hub: &Hub<R, G>,
        event_bus: Arc<InProcessEventBus>,
        pairing_required: bool,
    ) -> Self {
        Self::new(
            Arc::clone(&hub.transport),
            Arc::clone(&hub.control),
            event_bus,
            pairing_required,
        )
    }
}
