//! Fan timer preservation for device-originated updates.
//!
//! The firmware often re-uploads its device bucket without the fan fields
//! while a timer is running; merging that upload must not cancel the timer.

use serde_json::Value;

use crate::object::Payload;

/// Fields that travel together with an active fan timer.
pub const FAN_FIELDS: [&str; 5] = [
    "fan_timer_timeout",
    "fan_control_state",
    "fan_timer_duration",
    "fan_current_speed",
    "fan_mode",
];

/// Whether `values` has a fan timer expiring after `now_secs`.
#[must_use]
pub fn is_active(values: &Payload, now_secs: i64) -> bool {
    values
        .get("fan_timer_timeout")
        .and_then(Value::as_i64)
        .is_some_and(|timeout| timeout > now_secs)
}

/// Whether an update explicitly stops the fan.
#[must_use]
pub fn turns_fan_off(values: &Payload) -> bool {
    values.get("fan_timer_timeout").and_then(Value::as_i64) == Some(0)
        || values.get("fan_control_state") == Some(&Value::Bool(false))
}

/// Carry an active timer's fields over into `incoming`.
///
/// Fields already present in `incoming` are left untouched, and nothing is
/// carried over when `incoming` turns the fan off. Returns whether any field
/// was restored.
pub fn preserve(existing: &Payload, incoming: &mut Payload, now_secs: i64) -> bool {
    if turns_fan_off(incoming) || !is_active(existing, now_secs) {
        return false;
    }
    let mut restored = false;
    for field in FAN_FIELDS {
        if incoming.contains_key(field) {
            continue;
        }
        if let Some(value) = existing.get(field) {
            incoming.insert(field.to_string(), value.clone());
            restored = true;
        }
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn should_restore_fan_fields_when_timer_is_active() {
        let existing = payload(json!({"fan_timer_timeout": 2000, "fan_control_state": true}));
        let mut incoming = payload(json!({"current_temperature": 21.0}));

        assert!(preserve(&existing, &mut incoming, 1000));

        assert_eq!(incoming["fan_timer_timeout"], 2000);
        assert_eq!(incoming["fan_control_state"], true);
    }

    #[test]
    fn should_not_restore_when_timer_expired() {
        let existing = payload(json!({"fan_timer_timeout": 500}));
        let mut incoming = payload(json!({"current_temperature": 21.0}));

        assert!(!preserve(&existing, &mut incoming, 1000));
        assert!(!incoming.contains_key("fan_timer_timeout"));
    }

    #[test]
    fn should_not_restore_when_update_turns_fan_off() {
        let existing = payload(json!({"fan_timer_timeout": 2000, "fan_mode": "on"}));
        let mut incoming = payload(json!({"fan_control_state": false}));

        assert!(!preserve(&existing, &mut incoming, 1000));
        assert!(!incoming.contains_key("fan_mode"));
    }

    #[test]
    fn should_keep_incoming_value_when_field_is_present() {
        let existing = payload(json!({"fan_timer_timeout": 2000, "fan_mode": "on"}));
        let mut incoming = payload(json!({"fan_mode": "duty-cycle"}));

        preserve(&existing, &mut incoming, 1000);

        assert_eq!(incoming["fan_mode"], "duty-cycle");
        assert_eq!(incoming["fan_timer_timeout"], 2000);
    }
}
