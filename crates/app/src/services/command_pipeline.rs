//! Command pipeline: operator commands in, device uploads in.
//!
//! Operator commands are validated, clamped into the safety bounds and
//! written with [`EventOrigin::Command`], which makes them visible to
//! observers at once and hands device delivery to the propagation scheduler.
//! Device uploads bypass clamping and wake every audience.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hearth_domain::command::{Command, CommandContext, CommandKind, WriteMode};
use hearth_domain::device::Serial;
use hearth_domain::error::{HubError, NotFoundError};
use hearth_domain::event::EventOrigin;
use hearth_domain::fan_timer;
use hearth_domain::object::{ObjectKey, ObjectKind, Payload, VersionedObject};
use hearth_domain::safety::{ClampPolicy, SafetyBounds};
use hearth_domain::time;

use crate::ports::ObjectRepository;
use crate::propagation::PropagationScheduler;
use crate::store::{DeviceWriter, ObjectStore};

/// Safety configuration applied to operator commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSettings {
    pub bounds: SafetyBounds,
    pub policy: ClampPolicy,
}

/// Result of an applied command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub command: CommandKind,
    /// The object after the write.
    pub object: VersionedObject,
    /// Fields the command wrote, after clamping.
    pub values: Payload,
    pub clamped: bool,
}

/// One object uploaded by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestObject {
    pub key: ObjectKey,
    pub value: Payload,
    /// Apply only if the stored revision still equals this one.
    pub if_object_revision: Option<u64>,
}

/// One ingested object and whether the upload changed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub object: VersionedObject,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied(Vec<Ingested>),
    /// An `if_object_revision` precondition failed; carries the server's
    /// object (revision 0 when it has none). Later objects were skipped.
    Conflict(VersionedObject),
}

pub struct CommandPipeline<R> {
    store: Arc<ObjectStore<R>>,
    propagation: Arc<PropagationScheduler>,
    settings: CommandSettings,
}

impl<R> CommandPipeline<R>
where
    R: ObjectRepository + Send + Sync,
{
    #[must_use]
    pub fn new(
        store: Arc<ObjectStore<R>>,
        propagation: Arc<PropagationScheduler>,
        settings: CommandSettings,
    ) -> Self {
        Self {
            store,
            propagation,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> CommandSettings {
        self.settings
    }

    /// Validate and apply one operator command to a known device.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] for unknown commands, malformed or
    /// rejected values, [`HubError::NotFound`] for unknown devices, or a
    /// storage error.
    #[tracing::instrument(skip(self, value), fields(serial = %serial))]
    pub async fn apply_command(
        &self,
        serial: &Serial,
        command: &str,
        value: &Value,
    ) -> Result<CommandOutcome, HubError> {
        let command = Command::parse(command, value)?;
        let Some(mut writer) = self.store.existing_writer(serial).await else {
            return Err(NotFoundError {
                entity: "Device",
                id: serial.to_string(),
            }
            .into());
        };

        let device = writer.get(&ObjectKey::for_device(&ObjectKind::Device, serial));
        let shared = writer.get(&ObjectKey::for_device(&ObjectKind::Shared, serial));
        let plan = command.plan(&CommandContext {
            serial,
            device: device.as_ref().map(|o| &o.value),
            shared: shared.as_ref().map(|o| &o.value),
            bounds: self.settings.bounds,
            policy: self.settings.policy,
            now: time::now(),
        })?;
        if plan.ignored_bounds {
            tracing::warn!(%serial, "device reported unusable safety bounds, using defaults");
        }
        if plan.clamped {
            tracing::warn!(command = %command.kind(), "temperature clamped to safety bounds");
        }

        let object = match plan.mode {
            WriteMode::Merge => {
                writer
                    .merge(&plan.key, &plan.values, EventOrigin::Command)
                    .await?
            }
            WriteMode::Replace => {
                writer
                    .replace(&plan.key, plan.values.clone(), EventOrigin::Command)
                    .await?
            }
        };
        tracing::info!(
            command = %command.kind(),
            key = %object.key,
            revision = object.revision,
            "command applied"
        );

        Ok(CommandOutcome {
            command: command.kind(),
            object,
            values: plan.values,
            clamped: plan.clamped,
        })
    }

    /// Merge device-uploaded objects, in order, into the device's state.
    ///
    /// An active fan timer survives uploads of `device.<serial>` that omit
    /// it, and `weave_device_id` is recorded on that object when given.
    ///
    /// # Errors
    ///
    /// Propagates storage errors; objects merged before the failure stay.
    pub async fn ingest(
        &self,
        writer: &mut DeviceWriter<'_, R>,
        objects: Vec<IngestObject>,
        weave_device_id: Option<&str>,
    ) -> Result<IngestOutcome, HubError> {
        let now_secs = time::now().timestamp();
        let mut applied = Vec::with_capacity(objects.len());

        for IngestObject {
            key,
            mut value,
            if_object_revision,
        } in objects
        {
            let current = writer.get(&key);
            if let Some(expected) = if_object_revision {
                let stored = current.as_ref().map_or(0, |o| o.revision);
                if expected != stored {
                    tracing::info!(%key, expected, stored, "revision precondition failed");
                    return Ok(IngestOutcome::Conflict(
                        current.unwrap_or_else(|| VersionedObject::empty(key)),
                    ));
                }
            }

            if key.kind() == ObjectKind::Device {
                if let Some(existing) = &current {
                    if fan_timer::preserve(&existing.value, &mut value, now_secs) {
                        tracing::debug!(%key, "kept active fan timer");
                    }
                }
                if let Some(weave) = weave_device_id {
                    value.insert("weave_device_id".to_string(), weave.into());
                }
            }

            match writer
                .merge_if_changed(&key, &value, EventOrigin::Device)
                .await?
            {
                Some(object) => applied.push(Ingested {
                    object,
                    changed: true,
                }),
                None => applied.push(Ingested {
                    object: current.unwrap_or_else(|| VersionedObject::empty(key)),
                    changed: false,
                }),
            }
        }

        Ok(IngestOutcome::Applied(applied))
    }

    /// Deliver the device's pending propagation now. Returns the keys it held.
    pub fn flush(&self, serial: &Serial) -> BTreeSet<ObjectKey> {
        self.propagation.flush(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SubscriptionBroker;
    use crate::notifier::UpdateNotifier;
    use crate::test_support::InMemoryObjectRepository;
    use hearth_domain::error::ValidationError;
    use serde_json::json;
    use std::time::Duration;

    type Repo = Arc<InMemoryObjectRepository>;

    struct Fixture {
        pipeline: CommandPipeline<Repo>,
        store: Arc<ObjectStore<Repo>>,
        propagation: Arc<PropagationScheduler>,
    }

    fn serial() -> Serial {
        Serial::parse("02AA01AB501203EQ").unwrap()
    }

    fn key(kind: &ObjectKind) -> ObjectKey {
        ObjectKey::for_device(kind, &serial())
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn fixture(settings: CommandSettings) -> Fixture {
        let broker = Arc::new(SubscriptionBroker::new(8));
        let propagation = Arc::new(PropagationScheduler::new(
            Duration::from_secs(15),
            Arc::clone(&broker),
        ));
        let (notifier, _rx) = UpdateNotifier::new(broker, Arc::clone(&propagation), 64);
        let store = Arc::new(ObjectStore::new(
            Repo::default(),
            Arc::new(notifier),
        ));
        Fixture {
            pipeline: CommandPipeline::new(Arc::clone(&store), Arc::clone(&propagation), settings),
            store,
            propagation,
        }
    }

    fn bounded(policy: ClampPolicy) -> CommandSettings {
        CommandSettings {
            bounds: SafetyBounds {
                min: 10.0,
                max: 32.0,
            },
            policy,
        }
    }

    async fn register(fixture: &Fixture) {
        let mut writer = fixture.store.writer(&serial()).await;
        writer
            .merge(
                &key(&ObjectKind::Shared),
                &payload(json!({"target_temperature": 20.0})),
                EventOrigin::Device,
            )
            .await
            .unwrap();
        writer
            .merge(
                &key(&ObjectKind::Device),
                &payload(json!({"can_heat": true, "can_cool": true})),
                EventOrigin::Device,
            )
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_clamp_target_temperature_to_max() {
        let fixture = fixture(bounded(ClampPolicy::Clamp));
        register(&fixture).await;

        let outcome = fixture
            .pipeline
            .apply_command(&serial(), "set_temperature", &json!(40))
            .await
            .unwrap();

        assert!(outcome.clamped);
        assert_eq!(outcome.object.revision, 2);
        assert_eq!(outcome.object.value["target_temperature"], 32.0);
        assert_eq!(outcome.object.value["target_change_pending"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_out_of_range_temperature_under_reject_policy() {
        let fixture = fixture(bounded(ClampPolicy::Reject));
        register(&fixture).await;

        let result = fixture
            .pipeline
            .apply_command(&serial(), "set_temperature", &json!(40))
            .await;

        assert!(matches!(
            result,
            Err(HubError::Validation(ValidationError::OutOfRange { .. }))
        ));
        let shared = fixture.store.get(&serial(), &key(&ObjectKind::Shared)).unwrap();
        assert_eq!(shared.revision, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_apply_command_when_device_reports_inverted_safety_bounds() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;
        fixture
            .store
            .writer(&serial())
            .await
            .merge(
                &key(&ObjectKind::Device),
                &payload(json!({"safety_temp_min": 40.0})),
                EventOrigin::Device,
            )
            .await
            .unwrap();

        let outcome = fixture
            .pipeline
            .apply_command(&serial(), "set_temperature", &json!(20))
            .await
            .unwrap();

        assert!(!outcome.clamped);
        assert_eq!(outcome.object.value["target_temperature"], 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_unknown_command() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;

        let result = fixture
            .pipeline
            .apply_command(&serial(), "reboot", &json!(true))
            .await;

        assert!(matches!(
            result,
            Err(HubError::Validation(ValidationError::UnknownCommand(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_return_not_found_for_unknown_device() {
        let fixture = fixture(CommandSettings::default());

        let result = fixture
            .pipeline
            .apply_command(&serial(), "set_away", &json!(true))
            .await;

        assert!(matches!(result, Err(HubError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn should_coalesce_commands_into_one_device_propagation() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;

        fixture
            .pipeline
            .apply_command(&serial(), "set_mode", &json!("heat"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        fixture
            .pipeline
            .apply_command(&serial(), "set_away", &json!(true))
            .await
            .unwrap();

        assert_eq!(fixture.propagation.deferred_keys(&serial()).len(), 2);
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(fixture.propagation.fired(), 1);
        let structure = ObjectKey::new(&ObjectKind::Structure, "default");
        let away = fixture.store.get(&serial(), &structure).unwrap();
        assert_eq!(away.value["manual_eco_all"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn should_route_set_away_to_the_device_structure() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;
        fixture
            .store
            .writer(&serial())
            .await
            .merge(
                &key(&ObjectKind::Device),
                &payload(json!({"structure_id": "home"})),
                EventOrigin::Device,
            )
            .await
            .unwrap();

        let outcome = fixture
            .pipeline
            .apply_command(&serial(), "set_away", &json!(false))
            .await
            .unwrap();

        assert_eq!(outcome.object.key.as_str(), "structure.home");
    }

    #[tokio::test(start_paused = true)]
    async fn should_deliver_pending_commands_when_flushed() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;
        fixture
            .pipeline
            .apply_command(&serial(), "set_temperature", &json!(21.5))
            .await
            .unwrap();

        let keys = fixture.pipeline.flush(&serial());

        assert!(keys.contains(&key(&ObjectKind::Shared)));
        assert_eq!(fixture.propagation.pending(), 0);
    }

    #[tokio::test]
    async fn should_preserve_active_fan_timer_on_device_upload() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;
        let timeout = time::now().timestamp() + 600;
        let mut writer = fixture.store.writer(&serial()).await;
        writer
            .merge(
                &key(&ObjectKind::Device),
                &payload(json!({"fan_timer_timeout": timeout, "fan_control_state": true})),
                EventOrigin::Command,
            )
            .await
            .unwrap();

        let outcome = fixture
            .pipeline
            .ingest(
                &mut writer,
                vec![IngestObject {
                    key: key(&ObjectKind::Device),
                    value: payload(json!({"current_humidity": 40})),
                    if_object_revision: None,
                }],
                None,
            )
            .await
            .unwrap();

        let IngestOutcome::Applied(applied) = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(applied[0].object.value["current_humidity"], 40);
        assert_eq!(applied[0].object.value["fan_control_state"], true);
    }

    #[tokio::test]
    async fn should_not_bump_revision_for_identical_upload() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;
        let mut writer = fixture.store.writer(&serial()).await;

        let outcome = fixture
            .pipeline
            .ingest(
                &mut writer,
                vec![IngestObject {
                    key: key(&ObjectKind::Shared),
                    value: payload(json!({"target_temperature": 20.0})),
                    if_object_revision: None,
                }],
                None,
            )
            .await
            .unwrap();

        let IngestOutcome::Applied(applied) = outcome else {
            panic!("expected applied outcome");
        };
        assert!(!applied[0].changed);
        assert_eq!(applied[0].object.revision, 1);
    }

    #[tokio::test]
    async fn should_return_server_object_when_revision_precondition_fails() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;
        let mut writer = fixture.store.writer(&serial()).await;

        let outcome = fixture
            .pipeline
            .ingest(
                &mut writer,
                vec![
                    IngestObject {
                        key: key(&ObjectKind::Shared),
                        value: payload(json!({"target_temperature": 25.0})),
                        if_object_revision: Some(7),
                    },
                    IngestObject {
                        key: key(&ObjectKind::Device),
                        value: payload(json!({"name": "Hall"})),
                        if_object_revision: None,
                    },
                ],
                None,
            )
            .await
            .unwrap();

        let IngestOutcome::Conflict(server) = outcome else {
            panic!("expected conflict");
        };
        assert_eq!(server.revision, 1);
        assert_eq!(server.value["target_temperature"], 20.0);
        assert!(writer.get(&key(&ObjectKind::Device)).unwrap().value.get("name").is_none());
    }

    #[tokio::test]
    async fn should_record_weave_device_id_on_device_object() {
        let fixture = fixture(CommandSettings::default());
        register(&fixture).await;
        let mut writer = fixture.store.writer(&serial()).await;

        fixture
            .pipeline
            .ingest(
                &mut writer,
                vec![IngestObject {
                    key: key(&ObjectKind::Device),
                    value: payload(json!({"current_humidity": 38})),
                    if_object_revision: None,
                }],
                Some("18B43000418E5A2D"),
            )
            .await
            .unwrap();

        let device = writer.get(&key(&ObjectKind::Device)).unwrap();
        assert_eq!(device.value["weave_device_id"], "18B43000418E5A2D");
    }
}
