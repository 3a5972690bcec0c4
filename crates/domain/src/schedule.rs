//! Weekly heating/cooling schedule validation.

use serde_json::Value;

use crate::error::ValidationError;
use crate::object::Payload;

/// Only schedule format the firmware accepts.
pub const SCHEDULE_VERSION: u64 = 2;
/// Lowest setpoint a schedule entry may carry, in °C.
pub const SETPOINT_MIN_CELSIUS: f64 = 4.5;
/// Highest setpoint a schedule entry may carry, in °C.
pub const SETPOINT_MAX_CELSIUS: f64 = 32.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
const COMMAND: &str = "set_schedule";

/// Mode a schedule (or a single entry) applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    Heat,
    Cool,
    Range,
}

impl ScheduleMode {
    /// Case-insensitive parse of `HEAT`, `COOL` or `RANGE`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "HEAT" => Some(Self::Heat),
            "COOL" => Some(Self::Cool),
            "RANGE" => Some(Self::Range),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heat => "HEAT",
            Self::Cool => "COOL",
            Self::Range => "RANGE",
        }
    }
}

/// Validate a full schedule and return its canonical form.
///
/// Days are keyed `"0"` (Monday) to `"6"` (Sunday); each day is a list of
/// setpoints, or the device-native map of index to setpoint.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidValue`] describing the first problem.
pub fn validate(value: &Value) -> Result<Payload, ValidationError> {
    let Some(schedule) = value.as_object() else {
        return Err(invalid("schedule must be a JSON object"));
    };
    if schedule.get("ver").and_then(Value::as_u64) != Some(SCHEDULE_VERSION) {
        return Err(invalid("schedule ver must be 2"));
    }
    let mode = schedule
        .get("schedule_mode")
        .or_else(|| schedule.get("mode"))
        .and_then(Value::as_str)
        .and_then(ScheduleMode::parse)
        .ok_or_else(|| invalid("schedule_mode must be one of HEAT, COOL, RANGE"))?;
    let Some(days) = schedule.get("days").and_then(Value::as_object) else {
        return Err(invalid("schedule must contain a 'days' object"));
    };

    for (day, entries) in days {
        if !matches!(day.as_str(), "0" | "1" | "2" | "3" | "4" | "5" | "6") {
            return Err(invalid(format!("invalid day key '{day}'")));
        }
        for (index, entry) in day_entries(day, entries)?.into_iter().enumerate() {
            validate_entry(day, index, entry)?;
        }
    }

    let mut canonical = Payload::new();
    canonical.insert("ver".to_string(), SCHEDULE_VERSION.into());
    canonical.insert(
        "name".to_string(),
        schedule.get("name").cloned().unwrap_or_else(|| "".into()),
    );
    canonical.insert("schedule_mode".to_string(), mode.as_str().into());
    canonical.insert("days".to_string(), Value::Object(days.clone()));
    Ok(canonical)
}

fn day_entries<'a>(day: &str, entries: &'a Value) -> Result<Vec<&'a Value>, ValidationError> {
    match entries {
        Value::Array(list) => Ok(list.iter().collect()),
        Value::Object(map) => {
            let mut indexed = map
                .iter()
                .map(|(index, entry)| {
                    index
                        .parse::<u32>()
                        .map(|i| (i, entry))
                        .map_err(|_| invalid(format!("day '{day}' has non-numeric index '{index}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            indexed.sort_by_key(|(i, _)| *i);
            Ok(indexed.into_iter().map(|(_, entry)| entry).collect())
        }
        _ => Err(invalid(format!(
            "day '{day}' must be a list or map of setpoints"
        ))),
    }
}

fn validate_entry(day: &str, index: usize, entry: &Value) -> Result<(), ValidationError> {
    let at = |reason: &str| invalid(format!("day '{day}' entry {index}: {reason}"));
    let Some(entry) = entry.as_object() else {
        return Err(at("must be an object"));
    };
    let time = entry
        .get("time")
        .and_then(Value::as_f64)
        .ok_or_else(|| at("missing 'time'"))?;
    if !(0.0..SECONDS_PER_DAY).contains(&time) {
        return Err(at("time must be 0-86399"));
    }
    let mode = entry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| at("missing 'type'"))?;
    let mode = ScheduleMode::parse(mode).ok_or_else(|| at("invalid type"))?;

    let required: &[&str] = if mode == ScheduleMode::Range {
        &["temp-min", "temp-max"]
    } else {
        &[]
    };
    for field in required {
        if !entry.contains_key(*field) {
            return Err(at(&format!("RANGE requires '{field}'")));
        }
    }
    for field in ["temp", "temp-min", "temp-max"] {
        let Some(raw) = entry.get(field) else {
            continue;
        };
        let temp = raw
            .as_f64()
            .ok_or_else(|| at(&format!("{field} must be a number")))?;
        if !(SETPOINT_MIN_CELSIUS..=SETPOINT_MAX_CELSIUS).contains(&temp) {
            return Err(at(&format!(
                "{field}={temp} outside {SETPOINT_MIN_CELSIUS}-{SETPOINT_MAX_CELSIUS}C"
            )));
        }
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::invalid(COMMAND, reason)
}
