//! In-process event bus backed by a tokio broadcast channel.
//!
//! Bridges (SSE stream, MQTT) each hold their own receiver; a slow bridge
//! lags and loses events instead of slowing down writers.

use std::future::Future;

use tokio::sync::broadcast;

use hearth_domain::error::HubError;
use hearth_domain::event::Event;

use crate::ports::EventPublisher;

/// In-process event bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the event is simply dropped).
pub struct InProcessEventBus {
    sender: broadcast::Sender<Event>,
}

impl InProcessEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events published *after* this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), HubError>> + Send {
        // zero receivers is not a failure
        let _ = self.sender.send(event);
        async { Ok(()) }
    }
}
