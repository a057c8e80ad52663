//! Field values, records and their boundary text encoding
//!
//! Large integers and decimals cross the API boundary as decimal strings and
//! timestamps as RFC 3339 strings. Everything inside the engine works on the
//! exact values (`i64`, `rust_decimal::Decimal`, `chrono::DateTime<Utc>`).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

/// A single field value.
///
/// Variant order defines the total order used for sorting and grouping:
/// `Null` sorts before every non-null value. Values of one field always share
/// a variant once validated, so mixed-variant comparisons never decide a
/// result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(i64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
    Enum(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Human readable name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::BigInt(_) => "large integer",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Enum(_) => "enum member",
        }
    }

    /// Text content of text and enum values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Exact decimal view of any numeric value.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(i) | Value::BigInt(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Build a large-integer value.
    pub fn big_int(value: i64) -> Self {
        Value::BigInt(value)
    }

    /// Build an enum member value.
    pub fn member(name: impl Into<String>) -> Self {
        Value::Enum(name.into())
    }

    // ========================================================================
    // Wire encoding
    // ========================================================================

    /// Encode for the API boundary.
    ///
    /// Large integers and decimals become strings so no JSON consumer has to
    /// round them through a binary float.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::BigInt(i) => serde_json::Value::String(i.to_string()),
            Value::Decimal(d) => serde_json::Value::String(format_decimal(d)),
            Value::Text(s) | Value::Enum(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(format_timestamp(ts)),
        }
    }

    /// Decode a scalar from the API boundary without any schema knowledge.
    ///
    /// Strings stay text here; the field kind decides later whether the text
    /// is a decimal, a large integer, a timestamp or an enum member.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, String> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Value::Int).ok_or_else(|| {
                format!("number {n} is not an integer; send decimals as strings")
            }),
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            serde_json::Value::Array(_) => Err("expected a scalar, got a list".to_string()),
            serde_json::Value::Object(_) => Err("expected a scalar, got an object".to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) | Value::BigInt(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{}", format_decimal(d)),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Enum(s) => write!(f, "{s}"),
            Value::Timestamp(ts) => write!(f, "{}", format_timestamp(ts)),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

// ============================================================================
// Text codec
// ============================================================================

/// Format a decimal for the wire, keeping its scale (`1.50` stays `1.50`).
pub fn format_decimal(value: &Decimal) -> String {
    value.to_string()
}

/// Parse wire decimal text exactly.
///
/// Text with more significant digits than a 96-bit decimal can hold is
/// rejected rather than rounded.
pub fn parse_decimal(text: &str) -> Result<Decimal, String> {
    if text.is_empty() {
        return Err("empty decimal".to_string());
    }
    Decimal::from_str_exact(text).map_err(|e| format!("`{text}` is not an exact decimal: {e}"))
}

/// Parse wire large-integer text.
pub fn parse_big_int(text: &str) -> Result<i64, String> {
    text.parse::<i64>()
        .map_err(|e| format!("`{text}` is not a 64-bit integer: {e}"))
}

/// Format a timestamp as RFC 3339 in UTC with only as many fraction digits as needed.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an RFC 3339 timestamp and normalize it to UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("`{text}` is not an RFC 3339 timestamp: {e}"))
}

// ============================================================================
// Records
// ============================================================================

static NULL: Value = Value::Null;

/// One row of an entity, keyed by field name.
///
/// Missing fields read as null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// Read a field; absent fields are null.
    pub fn get(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Values of the given fields, in order.
    pub fn project(&self, fields: &[String]) -> Vec<Value> {
        fields.iter().map(|f| self.get(f).clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

    #[test]
    fn test_big_int_wire_round_trip() {
        for n in [0, MAX_SAFE_INTEGER, MAX_SAFE_INTEGER + 1, i64::MAX, i64::MIN] {
            let wire = Value::big_int(n).to_json();
            assert!(wire.is_string(), "large integers travel as text");
            let text = wire.as_str().unwrap();
            assert_eq!(parse_big_int(text).unwrap(), n);
        }
    }

    #[test]
    fn test_decimal_wire_round_trip() {
        for text in [
            "0",
            "9007199254740991",
            "9007199254740992",
            "1.50",
            "-0.000001",
            // 28 significant digits, the widest exact decimal
            "1234567890123456.789012345678",
        ] {
            let value = Value::Decimal(parse_decimal(text).unwrap());
            let wire = value.to_json();
            assert_eq!(wire.as_str(), Some(text));
            assert_eq!(Value::Decimal(parse_decimal(text).unwrap()), value);
        }
    }

    #[test]
    fn test_decimal_rejects_imprecise_text() {
        assert!(parse_decimal("").is_err());
        assert!(parse_decimal("abc").is_err());
        assert!(parse_decimal("1.2345678901234567890123456789012345").is_err());
    }

    #[test]
    fn test_decimal_equality_ignores_scale() {
        let a = Value::Decimal(parse_decimal("1.5").unwrap());
        let b = Value::Decimal(parse_decimal("1.500").unwrap());
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let ts = parse_timestamp("2024-03-01T10:15:30.250+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T08:15:30.250Z");
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
    }

    #[test]
    fn test_from_json_rejects_floats() {
        assert_eq!(Value::from_json(&serde_json::json!(3)).unwrap(), Value::Int(3));
        assert!(Value::from_json(&serde_json::json!(1.5)).is_err());
        assert!(Value::from_json(&serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_null_sorts_first() {
        assert!(Value::Null < Value::Int(i64::MIN));
        assert!(Value::Null < Value::Text(String::new()));
    }

    #[test]
    fn test_record_missing_field_reads_null() {
        let record = Record::new().with("Label", "Home");
        assert_eq!(record.get("Label"), &Value::Text("Home".into()));
        assert!(record.get("Missing").is_null());
    }
}
