//! Deferred device propagation: the debounce between operator commands
//! and the physical thermostat.
//!
//! Each device owns at most one pending slot. A command adds its key to the
//! slot and pushes the slot's deadline to `now + window`; a single timer task
//! per slot sleeps until the (possibly moved) deadline, then wakes the
//! device's waiters once for every key coalesced in the meantime.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use hearth_domain::device::Serial;
use hearth_domain::object::ObjectKey;
use hearth_domain::subscription::Audience;

use crate::broker::SubscriptionBroker;

/// Defer window used when none is configured.
pub const DEFAULT_DEFER_DEVICE_WINDOW: Duration = Duration::from_secs(15);

struct Slot {
    generation: u64,
    apply_at: Instant,
    keys: BTreeSet<ObjectKey>,
}

/// Per-device single-slot timers.
pub struct PropagationScheduler {
    window: Duration,
    broker: Arc<SubscriptionBroker>,
    slots: Mutex<HashMap<Serial, Slot>>,
    next_generation: AtomicU64,
    fired: AtomicU64,
}

impl PropagationScheduler {
    #[must_use]
    pub fn new(window: Duration, broker: Arc<SubscriptionBroker>) -> Self {
        Self {
            window,
            broker,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            fired: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule `key` for delivery to the device, or extend the pending slot.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(self: &Arc<Self>, serial: &Serial, key: ObjectKey) {
        let apply_at = Instant::now() + self.window;
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(serial) {
            slot.apply_at = apply_at;
            slot.keys.insert(key);
            tracing::debug!(%serial, keys = slot.keys.len(), "extended pending propagation");
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            serial.clone(),
            Slot {
                generation,
                apply_at,
                keys: BTreeSet::from([key]),
            },
        );
        drop(slots);
        tracing::debug!(%serial, window = ?self.window, "scheduled propagation");

        let scheduler = Arc::clone(self);
        let serial = serial.clone();
        tokio::spawn(async move { scheduler.run_slot(serial, generation).await });
    }

    /// Keys currently held back from the device.
    #[must_use]
    pub fn deferred_keys(&self, serial: &Serial) -> BTreeSet<ObjectKey> {
        self.slots
            .lock()
            .get(serial)
            .map(|slot| slot.keys.clone())
            .unwrap_or_default()
    }

    /// Fire the pending slot of `serial` now. Returns the keys it held.
    pub fn flush(&self, serial: &Serial) -> BTreeSet<ObjectKey> {
        let Some(slot) = self.slots.lock().remove(serial) else {
            return BTreeSet::new();
        };
        self.deliver(serial, &slot.keys);
        slot.keys
    }

    /// Drop the pending slot of `serial` without delivering it.
    pub fn cancel(&self, serial: &Serial) {
        self.slots.lock().remove(serial);
    }

    /// Devices with a pending slot.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots.lock().len()
    }

    /// Device-directed propagations delivered so far.
    #[must_use]
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    async fn run_slot(&self, serial: Serial, generation: u64) {
        loop {
            let deadline = {
                let slots = self.slots.lock();
                match slots.get(&serial) {
                    Some(slot) if slot.generation == generation => slot.apply_at,
                    // flushed or cancelled, possibly replaced by a newer slot
                    _ => return,
                }
            };
            tokio::time::sleep_until(deadline).await;

            let due = {
                let mut slots = self.slots.lock();
                let ready = slots.get(&serial).is_some_and(|slot| {
                    slot.generation == generation && slot.apply_at <= Instant::now()
                });
                if ready {
                    slots.remove(&serial)
                } else {
                    None
                }
            };
            if let Some(slot) = due {
                self.deliver(&serial, &slot.keys);
                return;
            }
        }
    }

    fn deliver(&self, serial: &Serial, keys: &BTreeSet<ObjectKey>) {
        let keys: Vec<ObjectKey> = keys.iter().cloned().collect();
        let woken = self.broker.wake(serial, &keys, &[Audience::Device]);
        self.fired.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%serial, keys = keys.len(), woken, "propagated commands to device");
    }
}
