//! Event: an immutable record of a committed change, fanned out to bridges.

use serde::{Deserialize, Serialize};

use crate::availability::AvailabilityState;
use crate::device::Serial;
use crate::id::EventId;
use crate::object::{ObjectKey, Payload};
use crate::time::{self, Timestamp};

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// An object was written.
    ObjectChanged {
        key: ObjectKey,
        revision: u64,
        /// Full value after the write.
        value: Payload,
    },
    /// The availability tracker recorded a transition.
    AvailabilityChanged { state: AvailabilityState },
    /// A device and all of its objects were removed.
    DeviceRemoved,
}

/// Who caused the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    Device,
    Command,
    Availability,
    Admin,
}

/// A change record, published after the write that produced it commits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: EventId,
    pub serial: Serial,
    pub origin: EventOrigin,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: Timestamp,
}

impl Event {
    /// Create a new event stamped with the current time.
    #[must_use]
    pub fn new(serial: Serial, origin: EventOrigin, kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            serial,
            origin,
            kind,
            timestamp: time::now(),
        }
    }
}
