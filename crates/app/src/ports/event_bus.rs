//! Event bus port: best-effort fan-out of committed changes to bridges.

use std::future::Future;

use hearth_domain::error::HubError;
use hearth_domain::event::Event;

/// Publishes change events to interested bridges.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), HubError>> + Send;
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), HubError>> + Send {
        (**self).publish(event)
    }
}
