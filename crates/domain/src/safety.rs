//! Temperature safety bounds and the clamp-or-reject policy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::object::Payload;

/// 45 °F.
pub const DEFAULT_MIN_CELSIUS: f64 = 7.222;
/// 95 °F.
pub const DEFAULT_MAX_CELSIUS: f64 = 35.0;

/// Fields subject to safety bounds.
pub const TEMPERATURE_FIELDS: [&str; 5] = [
    "target_temperature",
    "target_temperature_high",
    "target_temperature_low",
    "away_temperature_high",
    "away_temperature_low",
];

/// What to do with an out-of-range temperature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClampPolicy {
    /// Store the nearest bound.
    #[default]
    Clamp,
    /// Fail with [`ValidationError::OutOfRange`].
    Reject,
}

/// Inclusive `[min, max]` range in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for SafetyBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_CELSIUS,
            max: DEFAULT_MAX_CELSIUS,
        }
    }
}

/// Outcome of applying bounds to one value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped {
    pub value: f64,
    pub clamped: bool,
}

/// Bounds in effect for one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedBounds {
    pub bounds: SafetyBounds,
    /// A device-reported override was dropped for being inverted or not finite.
    pub ignored_override: bool,
}

impl SafetyBounds {
    /// Bounds for one device.
    ///
    /// Starts from `self`, then `safety_temp_min`/`safety_temp_max` on the
    /// device object, then the same fields on the shared object, which win.
    /// An object whose overrides would leave `min >= max` is skipped.
    #[must_use]
    pub fn resolve(self, device: Option<&Payload>, shared: Option<&Payload>) -> ResolvedBounds {
        let mut resolved = ResolvedBounds {
            bounds: self,
            ignored_override: false,
        };
        for source in [device, shared].into_iter().flatten() {
            let min = source.get("safety_temp_min").and_then(Value::as_f64);
            let max = source.get("safety_temp_max").and_then(Value::as_f64);
            if min.is_none() && max.is_none() {
                continue;
            }
            let candidate = Self {
                min: min.unwrap_or(resolved.bounds.min),
                max: max.unwrap_or(resolved.bounds.max),
            };
            if candidate.is_usable() {
                resolved.bounds = candidate;
            } else {
                resolved.ignored_override = true;
            }
        }
        resolved
    }

    /// Finite with `min < max`.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min < self.max
    }

    /// Apply the bounds to one temperature.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::OutOfRange`] when `value` is outside the
    /// bounds and `policy` is [`ClampPolicy::Reject`].
    pub fn apply(&self, value: f64, policy: ClampPolicy) -> Result<Clamped, ValidationError> {
        let bounded = if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        };
        #[allow(clippy::float_cmp)]
        let clamped = bounded != value;
        if clamped && policy == ClampPolicy::Reject {
            return Err(ValidationError::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(Clamped {
            value: bounded,
            clamped,
        })
    }

    /// Apply the bounds to every temperature field present in `values`.
    ///
    /// Returns whether any field was clamped.
    ///
    /// # Errors
    ///
    /// Same as [`apply`](Self::apply).
    pub fn apply_fields(
        &self,
        values: &mut Payload,
        policy: ClampPolicy,
    ) -> Result<bool, ValidationError> {
        let mut any = false;
        for field in TEMPERATURE_FIELDS {
            let Some(raw) = values.get(field).and_then(Value::as_f64) else {
                continue;
            };
            let outcome = self.apply(raw, policy)?;
            any |= outcome.clamped;
            values.insert(field.to_string(), outcome.value.into());
        }
        Ok(any)
    }
}
