//! Random identifiers for long-polls and bridge events.
//!
//! Neither is ever parsed back: subscription ids only key the broker's
//! registry, event ids only label SSE frames and log lines.

use std::fmt;

use serde::Serialize;

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }
    };
}

define_id!(
    /// Key of one long-poll in the broker, see [`Subscription`](crate::subscription::Subscription).
    SubscriptionId
);

define_id!(
    /// Label of one bridge [`Event`](crate::event::Event).
    EventId
);
