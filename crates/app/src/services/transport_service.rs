//! Device transport: the thermostat's subscribe and put use-cases.
//!
//! A subscribe first ingests whatever the device uploaded with it and records
//! the contact, all inside the device's write section. The section is then
//! released and the long-poll waits in the broker, where deferred command
//! keys stay hidden from the device until their propagation fires.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Serialize;
use serde_json::Value;

use hearth_domain::device::Serial;
use hearth_domain::error::{HubError, NotFoundError};
use hearth_domain::id::SubscriptionId;
use hearth_domain::object::{ObjectKey, ObjectKind, Payload, VersionedObject};
use hearth_domain::subscription::{Audience, Subscription};
use hearth_domain::time;

use crate::broker::{Registration, SubscriptionBroker};
use crate::ports::{ObjectRepository, PairingGate};
use crate::propagation::PropagationScheduler;
use crate::services::availability_tracker::{AvailabilityTracker, Contact};
use crate::services::command_pipeline::{CommandPipeline, IngestObject, IngestOutcome, Ingested};
use crate::store::ObjectStore;

/// Longest sleep a device is told it may take, unless configured.
pub const DEFAULT_SUSPEND_TIME_MAX: Duration = Duration::from_secs(60);
/// Extra time a chunked long-poll is held past the device's wake-up.
pub const CONNECTION_HOLD_BUFFER: Duration = Duration::from_secs(60);
pub const DEFAULT_API_ORIGIN: &str = "http://localhost:8080";

/// Fields whose presence in an immediate answer asks the device to apply
/// it without its own defer window.
const TEMPERATURE_FIELDS: [&str; 5] = [
    "target_temperature",
    "target_temperature_high",
    "target_temperature_low",
    "target_temperature_type",
    "hvac_mode",
];

/// Keys the device never accepts back.
const USER_BUCKET: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Public origin the device is pointed at by `/nest/entry`.
    pub api_origin: String,
    pub suspend_time_max: Duration,
    pub hold_buffer: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            api_origin: DEFAULT_API_ORIGIN.to_string(),
            suspend_time_max: DEFAULT_SUSPEND_TIME_MAX,
            hold_buffer: CONNECTION_HOLD_BUFFER,
        }
    }
}

impl TransportSettings {
    /// Server-side bound of a device long-poll.
    #[must_use]
    pub fn hold_timeout(&self) -> Duration {
        self.suspend_time_max + self.hold_buffer
    }

    #[must_use]
    pub fn service_urls(&self) -> ServiceUrls {
        let origin = self.api_origin.trim_end_matches('/');
        let transport = format!("{origin}/nest/transport");
        ServiceUrls {
            czfe_url: transport.clone(),
            direct_transport_url: transport.clone(),
            ping_url: transport.clone(),
            transport_url: transport,
            passphrase_url: format!("{origin}/nest/passphrase"),
            pro_info_url: format!("{origin}/nest/pro_info"),
            weather_url: format!("{origin}/nest/weather/v1?query="),
            upload_url: format!("{origin}/nest/upload"),
            software_update_url: String::new(),
            server_version: env!("CARGO_PKG_VERSION"),
            tier_name: "local",
        }
    }
}

/// Service discovery answer of `/nest/entry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceUrls {
    pub czfe_url: String,
    pub transport_url: String,
    pub direct_transport_url: String,
    pub passphrase_url: String,
    pub ping_url: String,
    pub pro_info_url: String,
    pub weather_url: String,
    pub upload_url: String,
    pub software_update_url: String,
    pub server_version: &'static str,
    pub tier_name: &'static str,
}

/// One object as the device reports it in a subscribe.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientObject {
    pub key: ObjectKey,
    pub revision: u64,
    /// Milliseconds; 0 means the device has no data.
    pub timestamp: i64,
    pub value: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    pub serial: Serial,
    pub objects: Vec<ClientObject>,
    pub chunked: bool,
    /// Caller's own wait bound, capped at [`TransportSettings::hold_timeout`].
    pub timeout: Option<Duration>,
    pub weave_device_id: Option<String>,
}

/// A subscribe after ingestion, ready to answer or to wait.
#[derive(Debug, Clone)]
pub struct PreparedSubscribe {
    pub subscription: Subscription,
    /// Objects the device is already behind on.
    pub immediate: Vec<VersionedObject>,
    pub chunked: bool,
}

impl PreparedSubscribe {
    /// Whether the immediate answer carries temperature changes.
    #[must_use]
    pub fn disables_defer_window(&self) -> bool {
        contains_temperature_fields(&self.immediate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PutReply {
    Applied {
        objects: Vec<Ingested>,
        /// `shared.<serial>` when the upload did not include it.
        shared: Option<VersionedObject>,
    },
    Conflict(VersionedObject),
}

pub struct TransportService<R, G> {
    store: Arc<ObjectStore<R>>,
    broker: Arc<SubscriptionBroker>,
    propagation: Arc<PropagationScheduler>,
    tracker: Arc<AvailabilityTracker<R>>,
    pipeline: Arc<CommandPipeline<R>>,
    gate: G,
    settings: TransportSettings,
}

impl<R, G> TransportService<R, G>
where
    R: ObjectRepository + Send + Sync,
    G: PairingGate + Send + Sync,
{
    #[must_use]
    pub fn new(
        store: Arc<ObjectStore<R>>,
        broker: Arc<SubscriptionBroker>,
        propagation: Arc<PropagationScheduler>,
        tracker: Arc<AvailabilityTracker<R>>,
        pipeline: Arc<CommandPipeline<R>>,
        gate: G,
        settings: TransportSettings,
    ) -> Self {
        Self {
            store,
            broker,
            propagation,
            tracker,
            pipeline,
            gate,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    #[must_use]
    pub fn defer_device_window(&self) -> Duration {
        self.propagation.window()
    }

    /// Whether `serial` may use the transport.
    ///
    /// # Errors
    ///
    /// Propagates pairing store failures.
    pub async fn authorize(&self, serial: &Serial) -> Result<bool, HubError> {
        let authorized = self.gate.is_authorized(serial).await?;
        if !authorized {
            tracing::warn!(%serial, "transport request from unpaired device");
        }
        Ok(authorized)
    }

    /// Ingest a subscribe's uploads, record the contact, and compute what the
    /// device is already missing.
    ///
    /// A chunked subscribe counts as a declared sleep of
    /// `suspend_time_max`; a plain one as a check-in. Unknown devices are
    /// only registered once they upload at least one object.
    ///
    /// # Errors
    ///
    /// Propagates storage errors from ingestion or the availability write.
    #[tracing::instrument(
        skip(self, request),
        fields(serial = %request.serial, chunked = request.chunked, objects = request.objects.len())
    )]
    pub async fn prepare_subscribe(
        &self,
        request: SubscribeRequest,
    ) -> Result<PreparedSubscribe, HubError> {
        let SubscribeRequest {
            serial,
            objects,
            chunked,
            timeout,
            weave_device_id,
        } = request;
        let now = time::now();

        // only a subscribe carrying state registers an unknown device
        let writer = if objects.iter().any(|client| client.value.is_some()) {
            Some(self.store.writer(&serial).await)
        } else {
            self.store.existing_writer(&serial).await
        };
        if let Some(mut writer) = writer {
            let contact = if chunked {
                let sleep = TimeDelta::from_std(self.settings.suspend_time_max)
                    .unwrap_or(TimeDelta::MAX);
                Contact::Sleep { until: now + sleep }
            } else {
                Contact::CheckIn
            };
            self.tracker.observe(&mut writer, contact, now).await?;

            let uploads: Vec<IngestObject> = objects
                .iter()
                .filter_map(|client| {
                    let value = client.value.as_ref()?;
                    should_ingest(client, value, writer.get(&client.key).as_ref()).then(|| {
                        IngestObject {
                            key: client.key.clone(),
                            value: value.clone(),
                            if_object_revision: None,
                        }
                    })
                })
                .collect();
            if !uploads.is_empty() {
                tracing::debug!(uploads = uploads.len(), "ingesting subscribe uploads");
                self.pipeline
                    .ingest(&mut writer, uploads, weave_device_id.as_deref())
                    .await?;
            }
        } else {
            tracing::debug!("subscribe from unregistered device");
        }

        let baselines = self.baselines(&serial, &objects);
        let subscription = Subscription {
            id: SubscriptionId::new(),
            serial,
            baselines,
            audience: Audience::Device,
            timeout: timeout.map_or(self.settings.hold_timeout(), |t| {
                t.min(self.settings.hold_timeout())
            }),
            created_at: now,
        };
        let immediate = self.device_delta(&subscription, false);

        Ok(PreparedSubscribe {
            subscription,
            immediate,
            chunked,
        })
    }

    /// Long-poll until the device has something new or the hold expires.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Capacity`] when the device has too many live
    /// subscriptions.
    pub async fn wait(&self, subscription: Subscription) -> Result<Vec<VersionedObject>, HubError> {
        let registration = self.reserve(subscription)?;
        Ok(self.hold(registration).await)
    }

    /// Take a broker slot for a device long-poll before answering.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Capacity`] when the device has too many live
    /// subscriptions.
    pub fn reserve(&self, subscription: Subscription) -> Result<Registration, HubError> {
        self.broker.register(subscription)
    }

    /// Wait on a reserved slot. Empty when the hold expired.
    pub async fn hold(&self, registration: Registration) -> Vec<VersionedObject> {
        registration
            .wait(|subscription, forced| self.device_delta(subscription, forced))
            .await
            .into_objects()
    }

    /// Apply a device PUT. An empty PUT does not register an unknown device.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    #[tracing::instrument(skip(self, objects, weave_device_id), fields(serial = %serial, objects = objects.len()))]
    pub async fn put(
        &self,
        serial: &Serial,
        objects: Vec<IngestObject>,
        weave_device_id: Option<&str>,
    ) -> Result<PutReply, HubError> {
        let writer = if objects.is_empty() {
            self.store.existing_writer(serial).await
        } else {
            Some(self.store.writer(serial).await)
        };
        let Some(mut writer) = writer else {
            tracing::debug!("empty put from unregistered device");
            return Ok(PutReply::Applied {
                objects: Vec::new(),
                shared: None,
            });
        };
        self.tracker
            .observe(&mut writer, Contact::CheckIn, time::now())
            .await?;

        let reply = match self
            .pipeline
            .ingest(&mut writer, objects, weave_device_id)
            .await?
        {
            IngestOutcome::Conflict(server) => PutReply::Conflict(server),
            IngestOutcome::Applied(objects) => {
                let shared_key = ObjectKey::for_device(&ObjectKind::Shared, serial);
                let shared = if objects.iter().any(|i| i.object.key == shared_key) {
                    None
                } else {
                    writer.get(&shared_key)
                };
                PutReply::Applied { objects, shared }
            }
        };
        Ok(reply)
    }

    /// Every object stored for a known device.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for unknown devices.
    pub fn device_objects(&self, serial: &Serial) -> Result<Vec<VersionedObject>, HubError> {
        self.store
            .objects_for(serial)
            .map(|objects| objects.into_values().collect())
            .ok_or_else(|| {
                NotFoundError {
                    entity: "Device",
                    id: serial.to_string(),
                }
                .into()
            })
    }

    fn baselines(&self, serial: &Serial, objects: &[ClientObject]) -> BTreeMap<ObjectKey, u64> {
        if objects.is_empty() {
            return self
                .store
                .objects_for(serial)
                .unwrap_or_default()
                .into_keys()
                .filter(|key| key.bucket() != USER_BUCKET)
                .map(|key| (key, 0))
                .collect();
        }

        objects
            .iter()
            .filter(|client| client.key.bucket() != USER_BUCKET)
            .map(|client| {
                let baseline = match self.store.get(serial, &client.key) {
                    Some(server) if is_server_newer(server.timestamp, client.timestamp) => {
                        server.revision.saturating_sub(1)
                    }
                    Some(server) => client.revision.min(server.revision),
                    None => 0,
                };
                (client.key.clone(), baseline)
            })
            .collect()
    }

    /// What the device should receive now. Keys with a pending propagation
    /// are held back unless the waiter was forced.
    fn device_delta(&self, subscription: &Subscription, forced: bool) -> Vec<VersionedObject> {
        let serial = &subscription.serial;
        if forced {
            return subscription
                .baselines
                .keys()
                .filter_map(|key| self.store.get(serial, key))
                .collect();
        }
        let deferred = self.propagation.deferred_keys(serial);
        let mut delta = self.store.get_since(serial, &subscription.baselines);
        delta.retain(|object| !deferred.contains(&object.key));
        delta
    }
}

/// Timestamps decide: a client at 0 has nothing, a server at 0 has nothing,
/// otherwise the larger one is newer.
fn is_server_newer(server: i64, client: i64) -> bool {
    if client == 0 {
        return true;
    }
    server != 0 && server > client
}

fn should_ingest(client: &ClientObject, value: &Payload, server: Option<&VersionedObject>) -> bool {
    if client.revision == 0 && client.timestamp == 0 {
        return true;
    }
    let Some(server) = server else {
        return true;
    };
    if client.timestamp > server.timestamp {
        return true;
    }
    // the device acknowledging a command is never stale
    client.key.kind() == ObjectKind::Shared
        && value.get("target_change_pending") == Some(&Value::Bool(false))
        && server.value.get("target_change_pending") == Some(&Value::Bool(true))
}

fn contains_temperature_fields(objects: &[VersionedObject]) -> bool {
    objects.iter().any(|object| {
        TEMPERATURE_FIELDS
            .iter()
            .any(|field| object.value.contains_key(*field))
    })
}
