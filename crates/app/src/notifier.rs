//! Update notifier: fans every committed write out to long-poll waiters
//! (synchronously) and to bridges (asynchronously, best effort).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use hearth_domain::device::Serial;
use hearth_domain::event::{Event, EventKind, EventOrigin};
use hearth_domain::object::VersionedObject;
use hearth_domain::subscription::Audience;

use crate::broker::SubscriptionBroker;
use crate::ports::EventPublisher;
use crate::propagation::PropagationScheduler;

/// Bridge events buffered before new ones are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Called by the object store after each write commits.
pub struct UpdateNotifier {
    broker: Arc<SubscriptionBroker>,
    propagation: Arc<PropagationScheduler>,
    events: mpsc::Sender<Event>,
}

impl UpdateNotifier {
    /// Create a notifier and the receiving end of its bridge channel.
    ///
    /// Hand the receiver to [`forward_events`].
    #[must_use]
    pub fn new(
        broker: Arc<SubscriptionBroker>,
        propagation: Arc<PropagationScheduler>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (events, rx) = mpsc::channel(capacity);
        (
            Self {
                broker,
                propagation,
                events,
            },
            rx,
        )
    }

    /// Wake waiters for a committed write, then queue its bridge event.
    ///
    /// Operator commands only wake observers right away; the device is
    /// reached through the propagation scheduler once the defer window
    /// closes. Every other origin wakes both audiences.
    pub fn object_changed(&self, serial: &Serial, object: &VersionedObject, origin: EventOrigin) {
        let keys = std::slice::from_ref(&object.key);
        let woken = if origin == EventOrigin::Command {
            let woken = self.broker.wake(serial, keys, &[Audience::Observer]);
            self.propagation.schedule(serial, object.key.clone());
            woken
        } else {
            self.broker
                .wake(serial, keys, &[Audience::Device, Audience::Observer])
        };
        tracing::debug!(
            %serial,
            key = %object.key,
            revision = object.revision,
            ?origin,
            woken,
            "object committed"
        );

        self.emit(Event::new(
            serial.clone(),
            origin,
            EventKind::ObjectChanged {
                key: object.key.clone(),
                revision: object.revision,
                value: object.value.clone(),
            },
        ));
    }

    /// Queue a bridge event without waiting; drops it when the queue is full.
    pub fn emit(&self, event: Event) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(serial = %event.serial, id = %event.id, "bridge queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("bridge queue closed, dropping event");
            }
        }
    }
}

/// Drain the notifier's queue into `publisher` until every sender is gone.
///
/// Publication failures are logged and the event is dropped; nothing is
/// retried and the write path never observes the failure.
pub async fn forward_events<P: EventPublisher>(mut events: mpsc::Receiver<Event>, publisher: P) {
    while let Some(event) = events.recv().await {
        let id = event.id;
        if let Err(err) = publisher.publish(event).await {
            tracing::warn!(%err, %id, "bridge publication failed");
        }
    }
    tracing::debug!("bridge forwarder stopped");
}
