//! Control service: operator-facing use-cases.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use hearth_domain::availability::AvailabilityState;
use hearth_domain::device::{DeviceStatus, Serial};
use hearth_domain::error::{HubError, NotFoundError};
use hearth_domain::event::{Event, EventKind, EventOrigin};
use hearth_domain::id::SubscriptionId;
use hearth_domain::object::{ObjectKey, VersionedObject};
use hearth_domain::subscription::{Audience, Subscription};
use hearth_domain::time;

use crate::broker::SubscriptionBroker;
use crate::notifier::UpdateNotifier;
use crate::ports::ObjectRepository;
use crate::propagation::PropagationScheduler;
use crate::services::availability_tracker::AvailabilityTracker;
use crate::services::command_pipeline::{CommandOutcome, CommandPipeline};
use crate::store::ObjectStore;

/// Status summary plus every raw object of one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    #[serde(flatten)]
    pub status: DeviceStatus,
    pub objects: Vec<VersionedObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub devices: usize,
    pub subscriptions: usize,
    pub max_subscriptions_per_device: usize,
    pub pending_propagations: usize,
    pub propagations_fired: u64,
    pub online: usize,
    pub asleep: usize,
    pub offline: usize,
}

pub struct ControlService<R> {
    store: Arc<ObjectStore<R>>,
    broker: Arc<SubscriptionBroker>,
    propagation: Arc<PropagationScheduler>,
    notifier: Arc<UpdateNotifier>,
    tracker: Arc<AvailabilityTracker<R>>,
    pipeline: Arc<CommandPipeline<R>>,
    hold_timeout: Duration,
}

impl<R> ControlService<R>
where
    R: ObjectRepository + Send + Sync,
{
    #[must_use]
    pub fn new(
        store: Arc<ObjectStore<R>>,
        broker: Arc<SubscriptionBroker>,
        propagation: Arc<PropagationScheduler>,
        notifier: Arc<UpdateNotifier>,
        tracker: Arc<AvailabilityTracker<R>>,
        pipeline: Arc<CommandPipeline<R>>,
        hold_timeout: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            propagation,
            notifier,
            tracker,
            pipeline,
            hold_timeout,
        }
    }

    /// # Errors
    ///
    /// See [`CommandPipeline::apply_command`].
    pub async fn apply_command(
        &self,
        serial: &Serial,
        command: &str,
        value: &Value,
    ) -> Result<CommandOutcome, HubError> {
        self.pipeline.apply_command(serial, command, value).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for unknown devices.
    pub fn status(&self, serial: &Serial) -> Result<DeviceReport, HubError> {
        let objects = self
            .store
            .objects_for(serial)
            .ok_or_else(|| not_found(serial))?;
        Ok(DeviceReport {
            status: self.assemble(serial, &objects),
            objects: objects.into_values().collect(),
        })
    }

    #[must_use]
    pub fn list_devices(&self) -> Vec<DeviceStatus> {
        self.store
            .serials()
            .into_iter()
            .filter_map(|serial| {
                let objects = self.store.objects_for(&serial)?;
                Some(self.assemble(&serial, &objects))
            })
            .collect()
    }

    /// Push pending commands to the device now and make every waiter of
    /// the device answer with its current state. Returns how many waiters
    /// were notified.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for unknown devices.
    #[tracing::instrument(skip(self), fields(serial = %serial))]
    pub fn notify_device(&self, serial: &Serial) -> Result<usize, HubError> {
        if !self.store.contains(serial) {
            return Err(not_found(serial));
        }
        let flushed = self.pipeline.flush(serial);
        let notified = self.broker.force(serial);
        tracing::info!(flushed = flushed.len(), notified, "device force-notified");
        Ok(notified)
    }

    /// Remove a device with all of its objects.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for unknown devices, or a storage
    /// error.
    #[tracing::instrument(skip(self), fields(serial = %serial))]
    pub async fn delete_device(&self, serial: &Serial) -> Result<(), HubError> {
        if !self.store.delete_device(serial).await? {
            return Err(not_found(serial));
        }
        self.propagation.cancel(serial);
        self.tracker.forget(serial);
        self.notifier.emit(Event::new(
            serial.clone(),
            EventOrigin::Admin,
            EventKind::DeviceRemoved,
        ));
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        let serials = self.store.serials();
        let mut stats = HubStats {
            devices: serials.len(),
            subscriptions: self.broker.total(),
            max_subscriptions_per_device: self.broker.max_per_device(),
            pending_propagations: self.propagation.pending(),
            propagations_fired: self.propagation.fired(),
            online: 0,
            asleep: 0,
            offline: 0,
        };
        for serial in &serials {
            match self.tracker.state(serial) {
                AvailabilityState::Online => stats.online += 1,
                AvailabilityState::Asleep => stats.asleep += 1,
                AvailabilityState::Offline => stats.offline += 1,
            }
        }
        stats
    }

    /// Observer long-poll over `baselines`, or over every current key of
    /// the device at revision 0 when `baselines` is empty.
    ///
    /// Command writes wake observers at once, without the device's defer
    /// window.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for unknown devices or
    /// [`HubError::Capacity`] when the device has too many live waiters.
    #[tracing::instrument(skip(self, baselines), fields(serial = %serial, keys = baselines.len()))]
    pub async fn observe(
        &self,
        serial: &Serial,
        baselines: BTreeMap<ObjectKey, u64>,
        timeout: Option<Duration>,
    ) -> Result<Vec<VersionedObject>, HubError> {
        let current = self
            .store
            .objects_for(serial)
            .ok_or_else(|| not_found(serial))?;
        let baselines = if baselines.is_empty() {
            current.into_keys().map(|key| (key, 0)).collect()
        } else {
            baselines
        };
        let subscription = Subscription {
            id: SubscriptionId::new(),
            serial: serial.clone(),
            baselines,
            audience: Audience::Observer,
            timeout: timeout.map_or(self.hold_timeout, |t| t.min(self.hold_timeout)),
            created_at: time::now(),
        };

        let resolution = self
            .broker
            .subscribe(subscription, |subscription, forced| {
                if forced {
                    subscription
                        .baselines
                        .keys()
                        .filter_map(|key| self.store.get(&subscription.serial, key))
                        .collect()
                } else {
                    self.store
                        .get_since(&subscription.serial, &subscription.baselines)
                }
            })
            .await?;
        Ok(resolution.into_objects())
    }

    fn assemble(
        &self,
        serial: &Serial,
        objects: &BTreeMap<ObjectKey, VersionedObject>,
    ) -> DeviceStatus {
        let liveness = self.tracker.liveness(serial);
        DeviceStatus::assemble(
            serial,
            objects,
            liveness
                .as_ref()
                .map_or(AvailabilityState::Offline, |l| l.state),
            liveness.map(|l| l.last_seen),
        )
    }
}

fn not_found(serial: &Serial) -> HubError {
    NotFoundError {
        entity: "Device",
        id: serial.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubSettings};
    use crate::ports::OpenPairingGate;
    use crate::services::transport_service::{ClientObject, SubscribeRequest};
    use crate::test_support::InMemoryObjectRepository;
    use hearth_domain::object::{ObjectKind, Payload};
    use serde_json::json;

    type TestHub = Hub<Arc<InMemoryObjectRepository>, OpenPairingGate>;

    fn serial() -> Serial {
        Serial::parse("02AA01AB501203EQ").unwrap()
    }

    fn shared_key() -> ObjectKey {
        ObjectKey::for_device(&ObjectKind::Shared, &serial())
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    async fn registered_hub() -> (TestHub, tokio::sync::mpsc::Receiver<Event>) {
        let (hub, events) = Hub::new(Arc::default(), OpenPairingGate, HubSettings::default());
        hub.transport
            .prepare_subscribe(SubscribeRequest {
                serial: serial(),
                objects: vec![ClientObject {
                    key: shared_key(),
                    revision: 0,
                    timestamp: 0,
                    value: Some(payload(json!({
                        "target_temperature": 20.0,
                        "current_temperature": 19.5,
                        "target_temperature_type": "heat",
                    }))),
                }],
                chunked: false,
                timeout: None,
                weave_device_id: None,
            })
            .await
            .unwrap();
        (hub, events)
    }

    #[tokio::test]
    async fn should_report_status_of_known_device() {
        let (hub, _events) = registered_hub().await;

        let report = hub.control.status(&serial()).unwrap();

        assert_eq!(report.status.target_temperature, Some(20.0));
        assert_eq!(report.status.mode.as_deref(), Some("heat"));
        assert_eq!(report.status.availability, AvailabilityState::Online);
        assert_eq!(report.objects.len(), 2);
    }

    #[tokio::test]
    async fn should_return_not_found_for_unknown_status() {
        let (hub, _events) = Hub::<Arc<InMemoryObjectRepository>, _>::new(
            Arc::default(),
            OpenPairingGate,
            HubSettings::default(),
        );

        assert!(matches!(
            hub.control.status(&serial()),
            Err(HubError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_wake_observer_immediately_on_command() {
        let (hub, _events) = registered_hub().await;
        let hub = Arc::new(hub);
        let current = hub.store.get(&serial(), &shared_key()).unwrap();
        let observer = {
            let hub = Arc::clone(&hub);
            let baselines = BTreeMap::from([(shared_key(), current.revision)]);
            tokio::spawn(async move { hub.control.observe(&serial(), baselines, None).await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        hub.control
            .apply_command(&serial(), "set_temperature", &json!(22.5))
            .await
            .unwrap();

        let objects = observer.await.unwrap().unwrap();
        assert_eq!(objects[0].revision, current.revision + 1);
        assert_eq!(objects[0].value["target_temperature"], 22.5);
        assert_eq!(hub.propagation.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_flush_and_force_on_notify() {
        let (hub, _events) = registered_hub().await;
        hub.control
            .apply_command(&serial(), "set_away", &json!(true))
            .await
            .unwrap();

        let notified = hub.control.notify_device(&serial()).unwrap();

        assert_eq!(notified, 0);
        assert_eq!(hub.propagation.pending(), 0);
        assert_eq!(hub.control.stats().propagations_fired, 1);
    }

    #[tokio::test]
    async fn should_remove_device_and_publish_event() {
        let (hub, mut events) = registered_hub().await;
        while events.try_recv().is_ok() {}

        hub.control.delete_device(&serial()).await.unwrap();

        assert!(hub.control.list_devices().is_empty());
        assert!(hub.tracker.liveness(&serial()).is_none());
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::DeviceRemoved);
        assert!(matches!(
            hub.control.delete_device(&serial()).await,
            Err(HubError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn should_count_devices_by_availability() {
        let (hub, _events) = registered_hub().await;

        let stats = hub.control.stats();

        assert_eq!(stats.devices, 1);
        assert_eq!(stats.online, 1);
        assert_eq!(stats.subscriptions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn should_watch_every_key_when_observer_sends_none() {
        let (hub, _events) = registered_hub().await;

        let objects = hub
            .control
            .observe(&serial(), BTreeMap::new(), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        // shared and availability, both above revision 0
        assert_eq!(objects.len(), 2);
    }
}
