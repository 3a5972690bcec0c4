//! Availability tracker: ONLINE / ASLEEP / OFFLINE per device.
//!
//! Liveness records live in memory; only state *transitions* are written to
//! `availability.<serial>`, inside the device's write section, so they are
//! serialized with ingestion and commands for the same device. A device
//! holding a long-poll open is connected, so timeouts wait until it lets go.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use parking_lot::Mutex;

use hearth_domain::availability::{AvailabilityState, Liveness};
use hearth_domain::device::Serial;
use hearth_domain::error::HubError;
use hearth_domain::event::{Event, EventKind, EventOrigin};
use hearth_domain::object::{ObjectKey, ObjectKind};
use hearth_domain::subscription::Audience;
use hearth_domain::time::{self, Timestamp};

use crate::broker::SubscriptionBroker;
use crate::notifier::UpdateNotifier;
use crate::ports::ObjectRepository;
use crate::store::{DeviceWriter, ObjectStore};

/// Timing knobs of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilitySettings {
    /// Silence after which any device is OFFLINE.
    pub liveness_timeout: Duration,
    /// Longest sleep a device may declare.
    pub suspend_time_max: Duration,
    pub sweep_interval: Duration,
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(300),
            suspend_time_max: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// How a device made contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    /// PUT or plain subscribe.
    CheckIn,
    /// Long-poll the device will sleep through until `until`.
    Sleep { until: Timestamp },
}

pub struct AvailabilityTracker<R> {
    store: Arc<ObjectStore<R>>,
    notifier: Arc<UpdateNotifier>,
    broker: Arc<SubscriptionBroker>,
    settings: AvailabilitySettings,
    records: Mutex<HashMap<Serial, Liveness>>,
}

impl<R> AvailabilityTracker<R>
where
    R: ObjectRepository + Send + Sync,
{
    #[must_use]
    pub fn new(
        store: Arc<ObjectStore<R>>,
        notifier: Arc<UpdateNotifier>,
        broker: Arc<SubscriptionBroker>,
        settings: AvailabilitySettings,
    ) -> Self {
        Self {
            store,
            notifier,
            broker,
            settings,
            records: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> AvailabilitySettings {
        self.settings
    }

    /// Start tracking `serials` as freshly seen, without writing anything.
    ///
    /// Used at startup so hydrated devices get one liveness period of grace.
    pub fn seed(&self, serials: impl IntoIterator<Item = Serial>) {
        let now = time::now();
        let mut records = self.records.lock();
        for serial in serials {
            records.entry(serial).or_insert_with(|| Liveness::seen(now));
        }
        tracing::debug!(devices = records.len(), "availability seeded");
    }

    #[must_use]
    pub fn liveness(&self, serial: &Serial) -> Option<Liveness> {
        self.records.lock().get(serial).cloned()
    }

    /// Current state, OFFLINE for devices never heard from.
    #[must_use]
    pub fn state(&self, serial: &Serial) -> AvailabilityState {
        self.liveness(serial)
            .map_or(AvailabilityState::Offline, |liveness| liveness.state)
    }

    pub fn forget(&self, serial: &Serial) {
        self.records.lock().remove(serial);
    }

    /// Record a contact for a device whose write section is already held.
    ///
    /// Returns the new state when the contact caused a transition. The
    /// in-memory record only changes once the transition is persisted.
    ///
    /// # Errors
    ///
    /// Propagates a failed `availability.<serial>` write.
    pub async fn observe(
        &self,
        writer: &mut DeviceWriter<'_, R>,
        contact: Contact,
        now: Timestamp,
    ) -> Result<Option<AvailabilityState>, HubError> {
        let serial = writer.serial().clone();
        // unknown devices start OFFLINE so their first contact is recorded
        let mut record = self.liveness(&serial).unwrap_or(Liveness {
            state: AvailabilityState::Offline,
            last_seen: now,
            suspend_until: None,
        });
        let transition = match contact {
            Contact::CheckIn => record.check_in(now),
            Contact::Sleep { until } => {
                record.declare_sleep(now, until, to_delta(self.settings.suspend_time_max))
            }
        };
        if let Some(state) = transition {
            self.persist(writer, &record, state).await?;
        }
        self.records.lock().insert(serial, record);
        Ok(transition)
    }

    /// Enter the write section of `serial` and record a contact.
    ///
    /// # Errors
    ///
    /// Same as [`observe`](Self::observe).
    #[tracing::instrument(skip(self), fields(serial = %serial))]
    pub async fn check_in(
        &self,
        serial: &Serial,
        contact: Contact,
    ) -> Result<Option<AvailabilityState>, HubError> {
        let mut writer = self.store.writer(serial).await;
        self.observe(&mut writer, contact, time::now()).await
    }

    /// Apply timeouts to every tracked device as of `now`.
    ///
    /// Visits one device's write section at a time and skips devices with
    /// a live device long-poll. Returns how many devices transitioned;
    /// failed writes are logged and retried on the next sweep.
    pub async fn sweep(&self, now: Timestamp) -> usize {
        let serials: Vec<Serial> = self.records.lock().keys().cloned().collect();
        let threshold = to_delta(self.settings.liveness_timeout);
        let mut transitions = 0;

        for serial in serials {
            let Some(mut writer) = self.store.existing_writer(&serial).await else {
                self.forget(&serial);
                continue;
            };
            if self.broker.count_for(&serial, Audience::Device) > 0 {
                tracing::trace!(%serial, "device connection held, skipping timeouts");
                continue;
            }
            let Some(mut record) = self.liveness(&serial) else {
                continue;
            };
            let Some(state) = record.evaluate(now, threshold) else {
                continue;
            };
            match self.persist(&mut writer, &record, state).await {
                Ok(()) => {
                    self.records.lock().insert(serial, record);
                    transitions += 1;
                }
                Err(err) => {
                    tracing::warn!(%serial, %err, "failed to record availability timeout");
                }
            }
        }
        transitions
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until aborted.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        R: 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let transitions = self.sweep(time::now()).await;
                if transitions > 0 {
                    tracing::info!(transitions, "availability sweep");
                }
            }
        })
    }

    async fn persist(
        &self,
        writer: &mut DeviceWriter<'_, R>,
        record: &Liveness,
        state: AvailabilityState,
    ) -> Result<(), HubError> {
        let serial = writer.serial().clone();
        let key = ObjectKey::for_device(&ObjectKind::Availability, &serial);
        writer
            .replace(&key, record.to_payload(), EventOrigin::Availability)
            .await?;
        tracing::info!(%serial, %state, "availability changed");
        self.notifier.emit(Event::new(
            serial,
            EventOrigin::Availability,
            EventKind::AvailabilityChanged { state },
        ));
        Ok(())
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
