//! Availability: liveness classification of a device.
//!
//! Transitions are pure functions of the current [`Liveness`] and the time
//! of the observation; the caller persists whatever transition they report.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::object::Payload;
use crate::time::{self, Timestamp};

/// ONLINE / ASLEEP / OFFLINE classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityState {
    Online,
    Asleep,
    Offline,
}

impl AvailabilityState {
    /// Whether the device counts as reachable for bridges.
    #[must_use]
    pub fn is_available(self) -> bool {
        !matches!(self, Self::Offline)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Asleep => "asleep",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness record of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    pub state: AvailabilityState,
    pub last_seen: Timestamp,
    pub suspend_until: Option<Timestamp>,
}

impl Liveness {
    /// A device that was just heard from.
    #[must_use]
    pub fn seen(now: Timestamp) -> Self {
        Self {
            state: AvailabilityState::Online,
            last_seen: now,
            suspend_until: None,
        }
    }

    /// Any PUT or subscribe from the device.
    ///
    /// Returns the new state when the device was not already online.
    pub fn check_in(&mut self, now: Timestamp) -> Option<AvailabilityState> {
        self.last_seen = now;
        self.suspend_until = None;
        self.transition(AvailabilityState::Online)
    }

    /// Device announces it will sleep until `until`.
    ///
    /// The window is capped at `now + max`. Declaring sleep counts as
    /// contact, so `last_seen` moves to `now` as well.
    pub fn declare_sleep(
        &mut self,
        now: Timestamp,
        until: Timestamp,
        max: TimeDelta,
    ) -> Option<AvailabilityState> {
        self.last_seen = now;
        self.suspend_until = Some(until.min(now + max));
        self.transition(AvailabilityState::Asleep)
    }

    /// Apply timeouts as of `now`.
    ///
    /// A sleeping device goes OFFLINE once its declared window passes; any
    /// device goes OFFLINE once `now - last_seen` exceeds `threshold`.
    pub fn evaluate(&mut self, now: Timestamp, threshold: TimeDelta) -> Option<AvailabilityState> {
        let overslept = self.state == AvailabilityState::Asleep
            && self.suspend_until.is_some_and(|until| now > until);
        let stale = now - self.last_seen > threshold;
        if overslept || stale {
            self.suspend_until = None;
            return self.transition(AvailabilityState::Offline);
        }
        None
    }

    /// Value written to `availability.<serial>`.
    #[must_use]
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("state".to_string(), self.state.as_str().into());
        payload.insert(
            "last_seen".to_string(),
            time::to_millis(self.last_seen).into(),
        );
        if let Some(until) = self.suspend_until {
            payload.insert("suspend_until".to_string(), time::to_millis(until).into());
        }
        payload
    }

    fn transition(&mut self, next: AvailabilityState) -> Option<AvailabilityState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}
