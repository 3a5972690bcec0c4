//! Subscription: an outstanding long-poll waiting for newer revisions.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::Serial;
use crate::id::SubscriptionId;
use crate::object::ObjectKey;
use crate::time::Timestamp;

/// Who holds a subscription.
///
/// Operator commands become visible to observers immediately but reach the
/// physical device only once the command's defer window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// The thermostat itself.
    Device,
    /// Dashboards and automation bridges.
    Observer,
}

/// A live long-poll registration.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub serial: Serial,
    /// Keys watched, each with the revision the caller already has.
    pub baselines: BTreeMap<ObjectKey, u64>,
    pub audience: Audience,
    pub timeout: Duration,
    pub created_at: Timestamp,
}

impl Subscription {
    #[must_use]
    pub fn watches(&self, key: &ObjectKey) -> bool {
        self.baselines.contains_key(key)
    }
}
