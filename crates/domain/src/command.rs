//! Operator commands: parsing, validation and the write they translate to.
//!
//! A [`Command`] is parsed from the `{command, value}` pair of a control
//! request, then [`planned`](Command::plan) against the device's current
//! objects into a [`CommandPlan`]: the key to write, the fields to write and
//! whether the write merges or replaces.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::device::{Serial, structure_id_of};
use crate::error::ValidationError;
use crate::object::{ObjectKey, ObjectKind, Payload};
use crate::safety::{ClampPolicy, SafetyBounds};
use crate::schedule::{self, ScheduleMode};
use crate::time::Timestamp;

/// Structure id used when the device names none.
pub const DEFAULT_STRUCTURE_ID: &str = "default";
/// Fan run time for `set_fan "on"` when the device stores no preference.
pub const DEFAULT_FAN_DURATION_MINUTES: i64 = 60;

/// Device bucket fields an operator may write through `set_device_setting`.
pub const DEVICE_SETTING_WHITELIST: &[&str] = &[
    "lower_safety_temp_enabled",
    "upper_safety_temp_enabled",
    "lower_safety_temp",
    "upper_safety_temp",
    "temp_lock_on",
    "temp_lock_pin_hash",
    "temp_lock_high_temp",
    "temp_lock_low_temp",
    "learning_mode",
    "preconditioning_enabled",
    "preconditioning_active",
    "target_humidity_enabled",
    "target_humidity",
    "temperature_scale",
    "time_to_target",
    "time_to_target_training_status",
    "sunlight_correction_enabled",
    "fan_timer_duration_minutes",
    "fan_duty_cycle",
    "fan_duty_start_time",
    "fan_duty_end_time",
    "fan_schedule_speed",
    "heat_pump_aux_threshold_enabled",
    "heat_pump_aux_threshold",
    "heat_pump_comp_threshold_enabled",
    "heat_pump_comp_threshold",
    "equipment_type",
    "heat_source",
    "hot_water_boost_time_to_end",
    "hot_water_active",
    "filter_reminder_enabled",
    "filter_reminder_level",
    "postal_code",
    "country_code",
];

/// Allowed command names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetTemperature,
    SetMode,
    SetAway,
    SetFan,
    SetEcoTemperatures,
    SetSchedule,
    SetScheduleMode,
    SetDeviceSetting,
}

impl CommandKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetTemperature => "set_temperature",
            Self::SetMode => "set_mode",
            Self::SetAway => "set_away",
            Self::SetFan => "set_fan",
            Self::SetEcoTemperatures => "set_eco_temperatures",
            Self::SetSchedule => "set_schedule",
            Self::SetScheduleMode => "set_schedule_mode",
            Self::SetDeviceSetting => "set_device_setting",
        }
    }

    /// Bucket the command writes to.
    #[must_use]
    pub fn target(self) -> ObjectKind {
        match self {
            Self::SetTemperature | Self::SetMode | Self::SetScheduleMode => ObjectKind::Shared,
            Self::SetAway => ObjectKind::Structure,
            Self::SetFan | Self::SetEcoTemperatures | Self::SetDeviceSetting => ObjectKind::Device,
            Self::SetSchedule => ObjectKind::Schedule,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "set_temperature" => Self::SetTemperature,
            "set_mode" => Self::SetMode,
            "set_away" => Self::SetAway,
            "set_fan" => Self::SetFan,
            "set_eco_temperatures" => Self::SetEcoTemperatures,
            "set_schedule" => Self::SetSchedule,
            "set_schedule_mode" => Self::SetScheduleMode,
            "set_device_setting" => Self::SetDeviceSetting,
            other => return Err(ValidationError::UnknownCommand(other.to_string())),
        })
    }
}

/// HVAC mode as stored in `target_temperature_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatMode {
    Off,
    Heat,
    Cool,
    Range,
    Emergency,
}

impl ThermostatMode {
    /// Parse an operator-facing mode name.
    ///
    /// `heat-cool`, `range` and `auto` all mean [`Range`](Self::Range).
    ///
    /// # Errors
    ///
    /// `eco` is refused (eco is driven by `set_away`), as is anything unknown.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            "heat-cool" | "range" | "auto" => Ok(Self::Range),
            "emergency" => Ok(Self::Emergency),
            "eco" => Err(ValidationError::invalid(
                "set_mode",
                "use set_away to control eco mode",
            )),
            other => Err(ValidationError::invalid(
                "set_mode",
                format!(
                    "unknown mode '{other}', expected off, heat, cool, heat-cool, range, auto or emergency"
                ),
            )),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Range => "range",
            Self::Emergency => "emergency",
        }
    }

    /// Refuse modes the device's capability flags rule out.
    ///
    /// `can_heat`/`can_cool` default to true, `has_emer_heat` to false.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Unsupported`] naming the missing capability.
    pub fn check_capabilities(self, device: &Payload) -> Result<(), ValidationError> {
        let flag = |field: &str, default: bool| {
            device.get(field).and_then(Value::as_bool).unwrap_or(default)
        };
        let can_heat = flag("can_heat", true);
        let can_cool = flag("can_cool", true);
        match self {
            Self::Heat if !can_heat => Err(ValidationError::Unsupported("heating")),
            Self::Cool if !can_cool => Err(ValidationError::Unsupported("cooling")),
            Self::Range if !(can_heat && can_cool) => {
                Err(ValidationError::Unsupported("heat-cool range"))
            }
            Self::Emergency if !flag("has_emer_heat", false) => {
                Err(ValidationError::Unsupported("emergency heat"))
            }
            _ => Ok(()),
        }
    }
}

/// Requested target temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemperatureTarget {
    Single(f64),
    Range { low: Option<f64>, high: Option<f64> },
}

/// Requested fan behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanRequest {
    /// Run for the device's stored duration.
    On,
    /// Cancel any running timer.
    Auto,
    /// Run for this many seconds.
    Seconds(u32),
}

/// A validated operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetTemperature(TemperatureTarget),
    SetMode(ThermostatMode),
    SetAway(bool),
    SetFan(FanRequest),
    SetEcoTemperatures { low: Option<f64>, high: Option<f64> },
    SetSchedule(Payload),
    SetScheduleMode(ScheduleMode),
    SetDeviceSetting(Payload),
}

/// How a planned write combines with the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Merge,
    Replace,
}

/// Device state a command is planned against.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub serial: &'a Serial,
    pub device: Option<&'a Payload>,
    pub shared: Option<&'a Payload>,
    /// Configured bounds, before per-device overrides.
    pub bounds: SafetyBounds,
    pub policy: ClampPolicy,
    pub now: Timestamp,
}

/// The write a command translates to.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPlan {
    pub key: ObjectKey,
    pub values: Payload,
    pub mode: WriteMode,
    /// At least one temperature was moved onto a safety bound.
    pub clamped: bool,
    /// The device reported safety bounds that could not be used.
    pub ignored_bounds: bool,
}

impl Command {
    /// Validate `value` against the shape `kind` expects.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownCommand`] for an unknown `kind` and
    /// [`ValidationError::InvalidValue`] for a malformed `value`.
    pub fn parse(kind: &str, value: &Value) -> Result<Self, ValidationError> {
        let kind: CommandKind = kind.parse()?;
        let name = kind.as_str();
        let command = match kind {
            CommandKind::SetTemperature => Self::SetTemperature(match value {
                Value::Object(_) => {
                    let (low, high) = low_high(name, value)?;
                    TemperatureTarget::Range { low, high }
                }
                _ => TemperatureTarget::Single(
                    value
                        .as_f64()
                        .ok_or_else(|| ValidationError::invalid(name, "expected a number"))?,
                ),
            }),
            CommandKind::SetMode => Self::SetMode(ThermostatMode::parse(
                value
                    .as_str()
                    .ok_or_else(|| ValidationError::invalid(name, "expected a mode name"))?,
            )?),
            CommandKind::SetAway => Self::SetAway(
                value
                    .as_bool()
                    .ok_or_else(|| ValidationError::invalid(name, "expected a boolean"))?,
            ),
            CommandKind::SetFan => Self::SetFan(parse_fan(value)?),
            CommandKind::SetEcoTemperatures => {
                let (low, high) = low_high(name, value)?;
                Self::SetEcoTemperatures { low, high }
            }
            CommandKind::SetSchedule => Self::SetSchedule(schedule::validate(value)?),
            CommandKind::SetScheduleMode => Self::SetScheduleMode(
                value
                    .as_str()
                    .and_then(ScheduleMode::parse)
                    .ok_or_else(|| {
                        ValidationError::invalid(name, "expected one of HEAT, COOL, RANGE")
                    })?,
            ),
            CommandKind::SetDeviceSetting => Self::SetDeviceSetting(parse_settings(value)?),
        };
        Ok(command)
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::SetTemperature(_) => CommandKind::SetTemperature,
            Self::SetMode(_) => CommandKind::SetMode,
            Self::SetAway(_) => CommandKind::SetAway,
            Self::SetFan(_) => CommandKind::SetFan,
            Self::SetEcoTemperatures { .. } => CommandKind::SetEcoTemperatures,
            Self::SetSchedule(_) => CommandKind::SetSchedule,
            Self::SetScheduleMode(_) => CommandKind::SetScheduleMode,
            Self::SetDeviceSetting(_) => CommandKind::SetDeviceSetting,
        }
    }

    /// Translate the command into the write it performs.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Unsupported`] when the device lacks the
    /// capability a mode needs, or [`ValidationError::OutOfRange`] when a
    /// temperature is out of bounds under [`ClampPolicy::Reject`].
    pub fn plan(&self, ctx: &CommandContext<'_>) -> Result<CommandPlan, ValidationError> {
        let mut values = Payload::new();
        let mut mode = WriteMode::Merge;

        match self {
            Self::SetTemperature(TemperatureTarget::Single(target)) => {
                values.insert("target_temperature".to_string(), (*target).into());
                values.insert("target_change_pending".to_string(), true.into());
            }
            Self::SetTemperature(TemperatureTarget::Range { low, high }) => {
                insert_some(&mut values, "target_temperature_low", *low);
                insert_some(&mut values, "target_temperature_high", *high);
                values.insert("target_change_pending".to_string(), true.into());
            }
            Self::SetMode(thermostat_mode) => {
                if let Some(device) = ctx.device {
                    thermostat_mode.check_capabilities(device)?;
                }
                values.insert(
                    "target_temperature_type".to_string(),
                    thermostat_mode.as_str().into(),
                );
            }
            Self::SetAway(away) => {
                values.insert("manual_eco_all".to_string(), (*away).into());
                values.insert(
                    "manual_eco_timestamp".to_string(),
                    ctx.now.timestamp().into(),
                );
            }
            Self::SetFan(request) => {
                let timeout = match request {
                    FanRequest::Auto => 0,
                    FanRequest::On => {
                        let minutes = ctx
                            .device
                            .and_then(|d| d.get("fan_timer_duration_minutes"))
                            .and_then(Value::as_i64)
                            .unwrap_or(DEFAULT_FAN_DURATION_MINUTES);
                        ctx.now.timestamp() + minutes * 60
                    }
                    FanRequest::Seconds(secs) => ctx.now.timestamp() + i64::from(*secs),
                };
                values.insert("fan_timer_timeout".to_string(), timeout.into());
            }
            Self::SetEcoTemperatures { low, high } => {
                insert_some(&mut values, "away_temperature_low", *low);
                insert_some(&mut values, "away_temperature_high", *high);
            }
            Self::SetSchedule(schedule) => {
                values.clone_from(schedule);
                mode = WriteMode::Replace;
            }
            Self::SetScheduleMode(schedule_mode) => {
                values.insert("schedule_mode".to_string(), schedule_mode.as_str().into());
            }
            Self::SetDeviceSetting(settings) => values.clone_from(settings),
        }

        let resolved = ctx.bounds.resolve(ctx.device, ctx.shared);
        let clamped = resolved.bounds.apply_fields(&mut values, ctx.policy)?;

        Ok(CommandPlan {
            key: self.target_key(ctx),
            values,
            mode,
            clamped,
            ignored_bounds: resolved.ignored_override,
        })
    }

    fn target_key(&self, ctx: &CommandContext<'_>) -> ObjectKey {
        match self.kind().target() {
            ObjectKind::Structure => {
                let id = ctx
                    .device
                    .and_then(structure_id_of)
                    .unwrap_or_else(|| DEFAULT_STRUCTURE_ID.to_string());
                ObjectKey::new(&ObjectKind::Structure, &id)
            }
            kind => ObjectKey::for_device(&kind, ctx.serial),
        }
    }
}

fn insert_some(values: &mut Payload, field: &str, value: Option<f64>) {
    if let Some(value) = value {
        values.insert(field.to_string(), value.into());
    }
}

fn low_high(
    command: &'static str,
    value: &Value,
) -> Result<(Option<f64>, Option<f64>), ValidationError> {
    let Some(object) = value.as_object() else {
        return Err(ValidationError::invalid(command, "expected {low, high}"));
    };
    let read = |field: &str| match object.get(field) {
        None => Ok(None),
        Some(raw) => raw.as_f64().map(Some).ok_or_else(|| {
            ValidationError::invalid(command, format!("'{field}' must be a number"))
        }),
    };
    let (low, high) = (read("low")?, read("high")?);
    if low.is_none() && high.is_none() {
        return Err(ValidationError::invalid(command, "expected low and/or high"));
    }
    Ok((low, high))
}

fn parse_fan(value: &Value) -> Result<FanRequest, ValidationError> {
    const NAME: &str = "set_fan";
    match value {
        Value::String(s) if s.eq_ignore_ascii_case("on") => Ok(FanRequest::On),
        Value::String(s) if s.eq_ignore_ascii_case("auto") => Ok(FanRequest::Auto),
        Value::Number(n) => n
            .as_u64()
            .and_then(|secs| u32::try_from(secs).ok())
            .map(FanRequest::Seconds)
            .ok_or_else(|| ValidationError::invalid(NAME, "duration must be whole seconds")),
        _ => Err(ValidationError::invalid(
            NAME,
            "expected \"on\", \"auto\" or a duration in seconds",
        )),
    }
}

fn parse_settings(value: &Value) -> Result<Payload, ValidationError> {
    const NAME: &str = "set_device_setting";
    let Some(settings) = value.as_object() else {
        return Err(ValidationError::invalid(
            NAME,
            "expected an object of {field: value} pairs",
        ));
    };
    if settings.is_empty() {
        return Err(ValidationError::invalid(NAME, "no fields to update"));
    }
    let mut rejected: Vec<&str> = settings
        .keys()
        .map(String::as_str)
        .filter(|field| !DEVICE_SETTING_WHITELIST.contains(field))
        .collect();
    if !rejected.is_empty() {
        rejected.sort_unstable();
        return Err(ValidationError::invalid(
            NAME,
            format!("fields not cloud-writable: {}", rejected.join(", ")),
        ));
    }
    Ok(settings.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time;
    use serde_json::json;

    fn serial() -> Serial {
        Serial::parse("02AA01AB501203EQ").unwrap()
    }

    fn plan(command: &Command, device: Option<&Payload>) -> Result<CommandPlan, ValidationError> {
        let serial = serial();
        command.plan(&CommandContext {
            serial: &serial,
            device,
            shared: None,
            bounds: SafetyBounds {
                min: 10.0,
                max: 32.0,
            },
            policy: ClampPolicy::Clamp,
            now: time::from_millis(1_000_000),
        })
    }

    #[test]
    fn should_reject_unknown_command_kind() {
        let result = Command::parse("reboot", &json!(true));
        assert_eq!(
            result,
            Err(ValidationError::UnknownCommand("reboot".to_string()))
        );
    }

    #[test]
    fn should_reject_non_numeric_temperature() {
        let result = Command::parse("set_temperature", &json!("warm"));
        assert!(matches!(result, Err(ValidationError::InvalidValue { .. })));
    }

    #[test]
    fn should_clamp_temperature_into_shared_bucket() {
        let command = Command::parse("set_temperature", &json!(40)).unwrap();
        let plan = plan(&command, None).unwrap();

        assert_eq!(plan.key.as_str(), "shared.02AA01AB501203EQ");
        assert_eq!(plan.values["target_temperature"], 32.0);
        assert_eq!(plan.values["target_change_pending"], true);
        assert!(plan.clamped);
    }

    #[test]
    fn should_write_range_targets_when_value_has_low_and_high() {
        let command =
            Command::parse("set_temperature", &json!({"low": 18.0, "high": 24.0})).unwrap();
        let plan = plan(&command, None).unwrap();

        assert_eq!(plan.values["target_temperature_low"], 18.0);
        assert_eq!(plan.values["target_temperature_high"], 24.0);
        assert!(!plan.clamped);
    }

    #[test]
    fn should_map_heat_cool_to_range() {
        let command = Command::parse("set_mode", &json!("heat-cool")).unwrap();
        assert_eq!(command, Command::SetMode(ThermostatMode::Range));
    }

    #[test]
    fn should_refuse_eco_mode() {
        assert!(Command::parse("set_mode", &json!("eco")).is_err());
    }

    #[test]
    fn should_refuse_emergency_without_capability() {
        let device = json!({"has_emer_heat": false}).as_object().cloned().unwrap();
        let command = Command::parse("set_mode", &json!("emergency")).unwrap();
        assert_eq!(
            plan(&command, Some(&device)),
            Err(ValidationError::Unsupported("emergency heat"))
        );
    }

    #[test]
    fn should_route_away_to_device_structure() {
        let device = json!({"structure_id": "home"}).as_object().cloned().unwrap();
        let command = Command::parse("set_away", &json!(true)).unwrap();
        let plan = plan(&command, Some(&device)).unwrap();

        assert_eq!(plan.key.as_str(), "structure.home");
        assert_eq!(plan.values["manual_eco_all"], true);
        assert_eq!(plan.values["manual_eco_timestamp"], 1000);
    }

    #[test]
    fn should_route_away_to_default_structure_when_device_has_none() {
        let command = Command::parse("set_away", &json!(false)).unwrap();
        let plan = plan(&command, None).unwrap();
        assert_eq!(plan.key.as_str(), "structure.default");
    }

    #[test]
    fn should_use_stored_fan_duration_when_turning_fan_on() {
        let device = json!({"fan_timer_duration_minutes": 15})
            .as_object()
            .cloned()
            .unwrap();
        let command = Command::parse("set_fan", &json!("on")).unwrap();
        let plan = plan(&command, Some(&device)).unwrap();
        assert_eq!(plan.values["fan_timer_timeout"], 1000 + 15 * 60);
    }

    #[test]
    fn should_cancel_fan_timer_when_auto() {
        let command = Command::parse("set_fan", &json!("auto")).unwrap();
        let plan = plan(&command, None).unwrap();
        assert_eq!(plan.key.as_str(), "device.02AA01AB501203EQ");
        assert_eq!(plan.values["fan_timer_timeout"], 0);
    }

    #[test]
    fn should_replace_schedule() {
        let value = json!({"ver": 2, "schedule_mode": "COOL", "days": {}});
        let command = Command::parse("set_schedule", &value).unwrap();
        let plan = plan(&command, None).unwrap();
        assert_eq!(plan.key.as_str(), "schedule.02AA01AB501203EQ");
        assert_eq!(plan.mode, WriteMode::Replace);
    }

    #[test]
    fn should_reject_device_setting_outside_whitelist() {
        let result = Command::parse(
            "set_device_setting",
            &json!({"temperature_scale": "C", "serial_number": "X"}),
        );
        assert!(matches!(result, Err(ValidationError::InvalidValue { .. })));
    }

    #[test]
    fn should_clamp_eco_temperatures() {
        let command =
            Command::parse("set_eco_temperatures", &json!({"low": 2.0})).unwrap();
        let plan = plan(&command, None).unwrap();
        assert_eq!(plan.values["away_temperature_low"], 10.0);
        assert!(!plan.values.contains_key("away_temperature_high"));
    }
}
