//! Wiring of the core components around one repository and pairing gate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use hearth_domain::error::HubError;
use hearth_domain::event::Event;

use crate::broker::{DEFAULT_MAX_SUBSCRIPTIONS_PER_DEVICE, SubscriptionBroker};
use crate::notifier::{DEFAULT_EVENT_CAPACITY, UpdateNotifier};
use crate::ports::{ObjectRepository, PairingGate};
use crate::propagation::{DEFAULT_DEFER_DEVICE_WINDOW, PropagationScheduler};
use crate::services::availability_tracker::{AvailabilitySettings, AvailabilityTracker};
use crate::services::command_pipeline::{CommandPipeline, CommandSettings};
use crate::services::control_service::ControlService;
use crate::services::transport_service::{TransportService, TransportSettings};
use crate::store::ObjectStore;

#[derive(Debug, Clone, PartialEq)]
pub struct HubSettings {
    pub max_subscriptions_per_device: usize,
    pub defer_device_window: Duration,
    pub event_capacity: usize,
    pub transport: TransportSettings,
    pub commands: CommandSettings,
    /// Its `suspend_time_max` is taken from `transport`.
    pub availability: AvailabilitySettings,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            max_subscriptions_per_device: DEFAULT_MAX_SUBSCRIPTIONS_PER_DEVICE,
            defer_device_window: DEFAULT_DEFER_DEVICE_WINDOW,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            transport: TransportSettings::default(),
            commands: CommandSettings::default(),
            availability: AvailabilitySettings::default(),
        }
    }
}

/// Every core component, shared by the transport and control surfaces.
pub struct Hub<R, G> {
    pub store: Arc<ObjectStore<R>>,
    pub broker: Arc<SubscriptionBroker>,
    pub propagation: Arc<PropagationScheduler>,
    pub notifier: Arc<UpdateNotifier>,
    pub tracker: Arc<AvailabilityTracker<R>>,
    pub pipeline: Arc<CommandPipeline<R>>,
    pub transport: Arc<TransportService<R, G>>,
    pub control: Arc<ControlService<R>>,
}

impl<R, G> Hub<R, G>
where
    R: ObjectRepository + Send + Sync,
    G: PairingGate + Send + Sync,
{
    /// Build the hub. The returned receiver carries bridge events; hand it
    /// to [`forward_events`](crate::notifier::forward_events).
    #[must_use]
    pub fn new(repo: R, gate: G, settings: HubSettings) -> (Self, mpsc::Receiver<Event>) {
        let broker = Arc::new(SubscriptionBroker::new(settings.max_subscriptions_per_device));
        let propagation = Arc::new(PropagationScheduler::new(
            settings.defer_device_window,
            Arc::clone(&broker),
        ));
        let (notifier, events) = UpdateNotifier::new(
            Arc::clone(&broker),
            Arc::clone(&propagation),
            settings.event_capacity,
        );
        let notifier = Arc::new(notifier);
        let store = Arc::new(ObjectStore::new(repo, Arc::clone(&notifier)));
        let tracker = Arc::new(AvailabilityTracker::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::clone(&broker),
            AvailabilitySettings {
                suspend_time_max: settings.transport.suspend_time_max,
                ..settings.availability
            },
        ));
        let pipeline = Arc::new(CommandPipeline::new(
            Arc::clone(&store),
            Arc::clone(&propagation),
            settings.commands,
        ));
        let hold_timeout = settings.transport.hold_timeout();
        let transport = Arc::new(TransportService::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            Arc::clone(&propagation),
            Arc::clone(&tracker),
            Arc::clone(&pipeline),
            gate,
            settings.transport,
        ));
        let control = Arc::new(ControlService::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            Arc::clone(&propagation),
            Arc::clone(&notifier),
            Arc::clone(&tracker),
            Arc::clone(&pipeline),
            hold_timeout,
        ));

        (
            Self {
                store,
                broker,
                propagation,
                notifier,
                tracker,
                pipeline,
                transport,
                control,
            },
            events,
        )
    }

    /// Load persisted state and start tracking every known device.
    ///
    /// Returns how many objects were loaded.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn start(&self) -> Result<usize, HubError> {
        let loaded = self.store.hydrate().await?;
        self.tracker.seed(self.store.serials());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::OpenPairingGate;
    use crate::test_support::InMemoryObjectRepository;
    use hearth_domain::availability::AvailabilityState;
    use hearth_domain::device::Serial;
    use hearth_domain::event::EventOrigin;
    use hearth_domain::object::{ObjectKey, ObjectKind};
    use serde_json::json;

    #[tokio::test]
    async fn should_seed_hydrated_devices_as_online() {
        let repo = Arc::new(InMemoryObjectRepository::default());
        let serial = Serial::parse("02AA01AB501203EQ").unwrap();
        {
            let (hub, _events) =
                Hub::new(Arc::clone(&repo), OpenPairingGate, HubSettings::default());
            hub.store
                .writer(&serial)
                .await
                .merge(
                    &ObjectKey::for_device(&ObjectKind::Shared, &serial),
                    &json!({"target_temperature": 21.0}).as_object().cloned().unwrap(),
                    EventOrigin::Device,
                )
                .await
                .unwrap();
        }

        let (hub, _events) = Hub::new(repo, OpenPairingGate, HubSettings::default());
        let loaded = hub.start().await.unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(hub.tracker.state(&serial), AvailabilityState::Online);
    }
}
