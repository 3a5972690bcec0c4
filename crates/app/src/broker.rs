//! Subscription broker: long-poll waiters and their wake-ups.
//!
//! A waiter is registered before its first delta check, so a write landing
//! between the check and the wait still leaves a stored wake permit behind.
//! Writers only ever *signal* a waiter; the waiting task itself decides
//! whether it resolves with data, times out, or is dropped. Removal from the
//! registry happens exactly once, in the registration guard's `Drop`, which
//! also covers client disconnects that cancel the future mid-wait.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use hearth_domain::device::Serial;
use hearth_domain::error::{CapacityError, HubError};
use hearth_domain::id::SubscriptionId;
use hearth_domain::object::{ObjectKey, VersionedObject};
use hearth_domain::subscription::{Audience, Subscription};

/// Live waiters allowed per device unless configured otherwise.
pub const DEFAULT_MAX_SUBSCRIPTIONS_PER_DEVICE: usize = 100;

/// How a subscription ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Objects newer than the caller's baselines.
    Delta(Vec<VersionedObject>),
    /// Nothing changed before the timeout; an empty heartbeat.
    Timeout,
}

impl Resolution {
    #[must_use]
    pub fn into_objects(self) -> Vec<VersionedObject> {
        match self {
            Self::Delta(objects) => objects,
            Self::Timeout => Vec::new(),
        }
    }
}

struct Waiter {
    audience: Audience,
    keys: BTreeSet<ObjectKey>,
    notify: Notify,
    forced: AtomicBool,
}

/// Registry of outstanding long-polls, keyed by device.
pub struct SubscriptionBroker {
    max_per_device: usize,
    waiters: Mutex<HashMap<Serial, HashMap<SubscriptionId, Arc<Waiter>>>>,
}

impl SubscriptionBroker {
    #[must_use]
    pub fn new(max_per_device: usize) -> Self {
        Self {
            max_per_device,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn max_per_device(&self) -> usize {
        self.max_per_device
    }

    /// Wait until `delta` reports objects for `subscription` or its timeout
    /// elapses.
    ///
    /// `delta` receives `true` when the waiter was force-notified and must
    /// then return the full current state of the watched keys.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Capacity`] without waiting when the device already
    /// holds the maximum number of live subscriptions.
    pub async fn subscribe<F>(
        self: &Arc<Self>,
        subscription: Subscription,
        delta: F,
    ) -> Result<Resolution, HubError>
    where
        F: Fn(&Subscription, bool) -> Vec<VersionedObject>,
    {
        let registration = self.register(subscription)?;
        Ok(registration.wait(delta).await)
    }

    /// Reserve a slot for `subscription` without waiting yet.
    ///
    /// The slot is held until the returned [`Registration`] resolves or is
    /// dropped, so callers can surface a capacity error before answering.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Capacity`] when the device already holds the
    /// maximum number of live subscriptions.
    pub fn register(self: &Arc<Self>, subscription: Subscription) -> Result<Registration, HubError> {
        let waiter = Arc::new(Waiter {
            audience: subscription.audience,
            keys: subscription.baselines.keys().cloned().collect(),
            notify: Notify::new(),
            forced: AtomicBool::new(false),
        });

        {
            let mut waiters = self.waiters.lock();
            let device = waiters.entry(subscription.serial.clone()).or_default();
            if device.len() >= self.max_per_device {
                let serial = subscription.serial.to_string();
                if device.is_empty() {
                    waiters.remove(&subscription.serial);
                }
                tracing::warn!(
                    %serial,
                    limit = self.max_per_device,
                    "subscription rejected, device at capacity"
                );
                return Err(CapacityError {
                    serial,
                    limit: self.max_per_device,
                }
                .into());
            }
            device.insert(subscription.id, Arc::clone(&waiter));
        }

        tracing::debug!(
            serial = %subscription.serial,
            id = %subscription.id,
            audience = ?subscription.audience,
            keys = subscription.baselines.len(),
            "subscription registered"
        );
        Ok(Registration {
            broker: Arc::clone(self),
            subscription,
            waiter,
        })
    }

    /// Signal every waiter of `serial` in one of `audiences` that watches
    /// any of `keys`. Returns how many were signalled.
    pub fn wake(&self, serial: &Serial, keys: &[ObjectKey], audiences: &[Audience]) -> usize {
        let waiters = self.waiters.lock();
        let Some(device) = waiters.get(serial) else {
            return 0;
        };
        let mut woken = 0;
        for waiter in device.values() {
            if audiences.contains(&waiter.audience) && keys.iter().any(|k| waiter.keys.contains(k))
            {
                waiter.notify.notify_one();
                woken += 1;
            }
        }
        woken
    }

    /// Make every waiter of `serial` resolve with the current state of its
    /// keys, whatever its baselines. Returns how many were signalled.
    pub fn force(&self, serial: &Serial) -> usize {
        let waiters = self.waiters.lock();
        let Some(device) = waiters.get(serial) else {
            return 0;
        };
        for waiter in device.values() {
            waiter.forced.store(true, Ordering::Release);
            waiter.notify.notify_one();
        }
        device.len()
    }

    /// Live subscriptions of one device.
    #[must_use]
    pub fn count(&self, serial: &Serial) -> usize {
        self.waiters.lock().get(serial).map_or(0, HashMap::len)
    }

    /// Live subscriptions of one device from one audience.
    #[must_use]
    pub fn count_for(&self, serial: &Serial, audience: Audience) -> usize {
        self.waiters.lock().get(serial).map_or(0, |device| {
            device
                .values()
                .filter(|waiter| waiter.audience == audience)
                .count()
        })
    }

    /// Live subscriptions across all devices.
    #[must_use]
    pub fn total(&self) -> usize {
        self.waiters.lock().values().map(HashMap::len).sum()
    }

    fn remove(&self, serial: &Serial, id: SubscriptionId) {
        let mut waiters = self.waiters.lock();
        if let Some(device) = waiters.get_mut(serial) {
            device.remove(&id);
            if device.is_empty() {
                waiters.remove(serial);
            }
        }
    }
}

/// A reserved broker slot. Dropping it frees the slot.
pub struct Registration {
    broker: Arc<SubscriptionBroker>,
    subscription: Subscription,
    waiter: Arc<Waiter>,
}

impl Registration {
    #[must_use]
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Wait until `delta` reports objects or the subscription's timeout
    /// elapses, then free the slot.
    pub async fn wait<F>(self, delta: F) -> Resolution
    where
        F: Fn(&Subscription, bool) -> Vec<VersionedObject>,
    {
        let deadline = Instant::now() + self.subscription.timeout;
        loop {
            let forced = self.waiter.forced.swap(false, Ordering::AcqRel);
            let objects = delta(&self.subscription, forced);
            if !objects.is_empty() {
                return Resolution::Delta(objects);
            }
            let woken =
                tokio::time::timeout_at(deadline, self.waiter.notify.notified()).await;
            if woken.is_err() {
                break;
            }
        }

        // a write committed right at the deadline still counts
        let forced = self.waiter.forced.swap(false, Ordering::AcqRel);
        let objects = delta(&self.subscription, forced);
        if !objects.is_empty() {
            return Resolution::Delta(objects);
        }
        tracing::debug!(
            serial = %self.subscription.serial,
            id = %self.subscription.id,
            "subscription timed out"
        );
        Resolution::Timeout
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.broker
            .remove(&self.subscription.serial, self.subscription.id);
    }
}
