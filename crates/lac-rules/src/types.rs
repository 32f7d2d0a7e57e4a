//! # Output Type Enforcement
//!
//! Every action result passes through the [`TypeSpec`] declared for its
//! output before it becomes visible to later actions or to the caller.
//!
//! ## Rules
//!
//! 1. `type: string` stringifies any non-null value.
//! 2. `null` becomes `0` for `int` and `0.0` for `float`; other types keep
//!    `null`.
//! 3. Numeric values are clamped to `min`/`max`, then rounded to
//!    `precision` decimal places, half away from zero.
//! 4. A minor-currency `unit` (`eurocent`) yields an integer by truncation.
//!    The value is taken to be in minor units already; no scaling happens.
//! 5. Values that are not numeric (booleans, records, non-numeric strings)
//!    pass through unchanged.

use lac_core::Value;
use serde::{Deserialize, Serialize};

/// Units whose amounts are whole integers of the smallest currency unit.
pub const MINOR_CURRENCY_UNITS: &[&str] = &["eurocent"];

/// Numeric constraints declared on a property (`type_spec:` in rule text).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeConstraints {
    /// Unit of measure, e.g. `eurocent`, `years`.
    #[serde(default)]
    pub unit: Option<String>,
    /// Decimal places to round to.
    #[serde(default)]
    pub precision: Option<u32>,
    /// Lower clamp.
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper clamp.
    #[serde(default)]
    pub max: Option<f64>,
}

/// The declared type of an output together with its numeric constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeSpec {
    /// Semantic type name (`int`, `float`, `amount`, `string`, `boolean`, ...).
    pub value_type: Option<String>,
    /// Numeric constraints.
    pub constraints: TypeConstraints,
}

impl TypeSpec {
    /// Build a type spec from a declared type and optional constraints.
    pub fn new(value_type: Option<String>, constraints: Option<TypeConstraints>) -> Self {
        Self {
            value_type,
            constraints: constraints.unwrap_or_default(),
        }
    }

    fn type_is(&self, name: &str) -> bool {
        self.value_type.as_deref() == Some(name)
    }

    fn is_minor_currency(&self) -> bool {
        self.constraints
            .unit
            .as_deref()
            .is_some_and(|u| MINOR_CURRENCY_UNITS.contains(&u))
    }

    fn constrains_numbers(&self) -> bool {
        let c = &self.constraints;
        c.precision.is_some()
            || c.min.is_some()
            || c.max.is_some()
            || self.is_minor_currency()
            || self.type_is("int")
            || self.type_is("float")
            || self.type_is("amount")
            || self.type_is("number")
    }

    /// Normalize a raw value to this spec.
    pub fn enforce(&self, value: Value) -> Value {
        if self.type_is("string") {
            return match value {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            };
        }

        if value.is_null() {
            return if self.type_is("int") {
                Value::Int(0)
            } else if self.type_is("float") {
                Value::Float(0.0)
            } else {
                Value::Null
            };
        }

        if !self.constrains_numbers() {
            return value;
        }

        let number = match &value {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) => n,
                Err(_) => return value,
            },
            _ => return value,
        };

        let mut number = number;
        if let Some(min) = self.constraints.min {
            number = number.max(min);
        }
        if let Some(max) = self.constraints.max {
            number = number.min(max);
        }
        if let Some(precision) = self.constraints.precision {
            number = round_half_away(number, precision);
        }

        if self.is_minor_currency() || self.type_is("int") {
            Value::Int(number.trunc() as i64)
        } else if matches!(value, Value::Int(_)) && self.constraints.precision.is_none() {
            Value::Int(number as i64)
        } else {
            Value::Float(number)
        }
    }
}

/// Round to `precision` decimal places, ties away from zero.
pub fn round_half_away(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
