//! # Rule Values
//!
//! [`Value`] is the closed tagged union every rule datum is expressed in:
//! parameters, claims, definitions, tabular cells, intermediate results,
//! and outputs.
//!
//! ## Design
//!
//! - Integers and floats are distinct variants so that outputs declared as
//!   integers (minor-currency amounts, counts) stay integral. Operations
//!   compare them numerically through [`Value::loose_eq`] and
//!   [`Value::compare`]; derived `PartialEq` stays strictly structural.
//! - Records are `BTreeMap`s, so iteration order and rendered forms are
//!   deterministic.
//! - Serialization is untagged: a `Value` reads and writes as plain JSON or
//!   YAML, so rule documents and payloads need no wrapping.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValueError;

/// A key-ordered record of named values.
pub type Record = BTreeMap<String, Value>;

/// A rule datum.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// IEEE 754 double.
    Float(f64),
    /// UTF-8 string. Dates are carried as `YYYY-MM-DD` strings.
    String(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Key-ordered record.
    Record(Record),
}

impl Value {
    /// Short type name used in diagnostics and traces.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for integers and floats.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// The boolean payload, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric payload as `f64`. Only integers and floats qualify.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The list payload, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// The record payload, if this is a record.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Coerce to a number for arithmetic.
    ///
    /// Booleans count as 0/1 and numeric strings are parsed. Everything else
    /// (including null) is rejected.
    pub fn to_number(&self) -> Result<f64, ValueError> {
        match self {
            Self::Int(i) => Ok(*i as f64),
            Self::Float(f) => Ok(*f),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::String(s) => s.trim().parse::<f64>().map_err(|_| ValueError::NotNumeric {
                type_name: "string",
                value: s.clone(),
            }),
            other => Err(ValueError::NotNumeric {
                type_name: other.type_name(),
                value: other.to_string(),
            }),
        }
    }

    /// Truthiness used by logical operations and requirement tests.
    ///
    /// Null, `false`, zero, the empty string, and empty collections are
    /// falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Record(r) => !r.is_empty(),
        }
    }

    /// Field lookup on a record. Any other variant yields `None`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record().and_then(|r| r.get(key))
    }

    /// Walk nested record fields. Returns `None` as soon as a segment is
    /// absent or a non-record is reached.
    pub fn get_path<'a, I, S>(&self, segments: I) -> Option<&Value>
    where
        I: IntoIterator<Item = &'a S>,
        S: AsRef<str> + 'a + ?Sized,
    {
        let mut current = self;
        for segment in segments {
            current = current.get(segment.as_ref())?;
        }
        Some(current)
    }

    /// Equality that treats integers and floats as numbers.
    ///
    /// Lists and records compare element-wise with the same rule. All other
    /// pairs fall back to structural equality.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64() == b.as_f64(),
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Self::Record(a), Self::Record(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Ordering for comparison operations.
    ///
    /// Numbers compare numerically (IEEE semantics, so NaN is unordered),
    /// strings lexicographically (which orders ISO dates correctly), and
    /// booleans `false < true`. Any other pairing is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Convert into a `serde_json::Value`. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Self::Record(r) => serde_json::Value::Object(
                r.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Serialize any `Serialize` type into a [`Value`].
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, ValueError> {
        serde_json::to_value(value)
            .map(Value::from)
            .map_err(|e| ValueError::Json(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Self::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Record(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        v.to_json()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Record(r) => {
                f.write_str("{")?;
                for (i, (k, v)) in r.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Serde (untagged)
// ---------------------------------------------------------------------------

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Record(r) => {
                let mut map = serializer.serialize_map(Some(r.len()))?;
                for (k, v) in r {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a rule value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> Result<Value, E> {
        Ok(i64::try_from(u).map(Value::Int).unwrap_or(Value::Float(u as f64)))
    }

    fn visit_f64<E: de::Error>(self, x: f64) -> Result<Value, E> {
        Ok(Value::Float(x))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
        Ok(Value::String(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut record = Record::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            record.insert(k, v);
        }
        Ok(Value::Record(record))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Build a [`Record`] from `key => value` pairs.
///
/// ```
/// use lac_core::{record, Value};
/// let r = record! { "amount" => 1200, "eligible" => true };
/// assert_eq!(r.get("amount"), Some(&Value::Int(1200)));
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::Record::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut r = $crate::Record::new();
        $( r.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        r
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn numeric_loose_equality() {
        assert!(Value::Int(3).loose_eq(&Value::Float(3.0)));
        assert!(!Value::Int(3).loose_eq(&Value::Float(3.5)));
        assert_ne!(Value::Int(3), Value::Float(3.0));
    }

    #[test]
    fn nested_loose_equality() {
        let a = Value::List(vec![Value::Int(1), Value::from("x")]);
        let b = Value::List(vec![Value::Float(1.0), Value::from("x")]);
        assert!(a.loose_eq(&b));
    }

    #[test]
    fn compare_orders_dates_as_strings() {
        let a = Value::from("2024-01-31");
        let b = Value::from("2024-02-01");
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
        assert_eq!(Value::Float(f64::NAN).compare(&Value::Int(1)), None);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Float(0.1).is_truthy());
        assert!(Value::from("no").is_truthy());
    }

    #[test]
    fn to_number_parses_numeric_strings() {
        assert_eq!(Value::from(" 12.5 ").to_number().unwrap(), 12.5);
        assert_eq!(Value::Bool(true).to_number().unwrap(), 1.0);
        assert!(Value::from("twelve").to_number().is_err());
        assert!(Value::Null.to_number().is_err());
    }

    #[test]
    fn get_path_walks_records() {
        let v = Value::Record(record! {
            "objection_status" => Value::Record(record! { "possible" => true }),
        });
        assert_eq!(v.get_path(["objection_status", "possible"]), Some(&Value::Bool(true)));
        assert_eq!(v.get_path(["objection_status", "missing"]), None);
        assert_eq!(v.get_path(["objection_status", "possible", "deeper"]), None);
    }

    #[test]
    fn json_conversion_keeps_integers() {
        let json = serde_json::json!({"a": 1, "b": 1.5, "c": [true, null], "d": "x"});
        let v = Value::from(json.clone());
        assert_eq!(v.get("a"), Some(&Value::Int(1)));
        assert_eq!(v.get("b"), Some(&Value::Float(1.5)));
        assert_eq!(v.to_json(), json);
    }

    #[test]
    fn deserializes_from_yaml() {
        let v: Value = serde_yaml::from_str("amount: 35\nrate: 0.5\ntags: [a, b]\nnone: ~\n").unwrap();
        assert_eq!(v.get("amount"), Some(&Value::Int(35)));
        assert_eq!(v.get("rate"), Some(&Value::Float(0.5)));
        assert_eq!(v.get("none"), Some(&Value::Null));
        assert_eq!(v.get("tags").and_then(Value::as_list).map(<[Value]>::len), Some(2));
    }

    #[test]
    fn display_is_compact() {
        let v = Value::List(vec![Value::Int(1), Value::from("a"), Value::Null]);
        assert_eq!(v.to_string(), "[1, a, null]");
    }

    #[test]
    fn record_macro_builds_ordered_record() {
        let r = record! { "b" => 2, "a" => "x" };
        let keys: Vec<_> = r.keys().cloned().collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    proptest! {
        #[test]
        fn loose_eq_is_reflexive_for_finite_numbers(x in -1.0e9f64..1.0e9f64) {
            prop_assert!(Value::Float(x).loose_eq(&Value::Float(x)));
        }

        #[test]
        fn int_float_loose_eq_is_symmetric(i in -1_000_000i64..1_000_000i64) {
            let a = Value::Int(i);
            let b = Value::Float(i as f64);
            prop_assert_eq!(a.loose_eq(&b), b.loose_eq(&a));
        }
    }
}
