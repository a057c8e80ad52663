//! Unique selectors
//!
//! A [`UniqueSelector`] addresses at most one row through a key declared on
//! the schema: a single field value, or a compound value that bundles every
//! field of a compound key (`MonitorId_Preset: {MonitorId, Preset}`).

use std::collections::BTreeMap;
use std::fmt;

use super::filter::Filter;
use crate::error::{ValidationError, ValidationKind};
use crate::schema::{EntitySchema, UniqueKey};
use crate::value::{Record, Value};

/// Caller-supplied key value, not yet checked against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueSelector {
    /// Key name; for a single-field key this may also be the field name.
    pub key: String,
    pub values: BTreeMap<String, Value>,
}

impl UniqueSelector {
    /// Select by one field, e.g. `Id = 5`.
    pub fn field(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        Self {
            values: BTreeMap::from([(name.clone(), value.into())]),
            key: name,
        }
    }

    /// Select by a named compound key.
    pub fn compound<I, S, V>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        Self {
            key: key.into(),
            values: values
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        }
    }

    /// Check the selector against the schema's declared keys.
    ///
    /// The key must be declared, the value must carry exactly the key's
    /// fields, and every value is validated against its field kind.
    pub fn resolve(&self, schema: &EntitySchema) -> Result<ResolvedKey, ValidationError> {
        self.resolve_inner(schema)
            .map_err(|e| e.with_entity(schema.name()))
    }

    fn resolve_inner(&self, schema: &EntitySchema) -> Result<ResolvedKey, ValidationError> {
        let key = find_key(schema, &self.key)?;

        let missing: Vec<&str> = key
            .fields
            .iter()
            .filter(|f| !self.values.contains_key(*f))
            .map(String::as_str)
            .collect();
        let extra: Vec<&str> = self
            .values
            .keys()
            .filter(|f| !key.fields.contains(*f))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            let mut message = format!("key `{}` needs exactly {:?}", key.name, key.fields);
            if !missing.is_empty() {
                message.push_str(&format!(", missing {missing:?}"));
            }
            if !extra.is_empty() {
                message.push_str(&format!(", unexpected {extra:?}"));
            }
            return Err(
                ValidationError::new(ValidationKind::PartialKey, message).with_field(&key.name)
            );
        }

        let mut values = Vec::with_capacity(key.fields.len());
        for name in &key.fields {
            let field = schema.require_field(name)?;
            let value = self.values.get(name).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                return Err(ValidationError::type_mismatch(
                    name,
                    field.kind.name(),
                    "null",
                ));
            }
            values.push((name.clone(), field.accept(value)?));
        }
        Ok(ResolvedKey {
            key: key.name.clone(),
            values,
        })
    }
}

/// Look a key up by name, falling back to a single-field key over a field of
/// that name.
fn find_key<'a>(schema: &'a EntitySchema, name: &str) -> Result<&'a UniqueKey, ValidationError> {
    schema
        .key(name)
        .or_else(|| {
            schema
                .keys()
                .iter()
                .find(|k| k.fields.len() == 1 && k.fields[0] == name)
        })
        .ok_or_else(|| ValidationError::unknown_key(name))
}

/// A validated key value, its fields in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKey {
    pub key: String,
    pub values: Vec<(String, Value)>,
}

impl ResolvedKey {
    /// Key value of `record` for `key`.
    pub fn of(key: &UniqueKey, record: &Record) -> Self {
        Self {
            key: key.name.clone(),
            values: key
                .fields
                .iter()
                .map(|f| (f.clone(), record.get(f).clone()))
                .collect(),
        }
    }

    /// `AND` of `equals` leaves over exactly the key fields.
    pub fn to_filter(&self) -> Filter {
        Filter::and(
            self.values
                .iter()
                .map(|(field, value)| Filter::equals(field.clone(), value.clone())),
        )
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.values
            .iter()
            .all(|(field, value)| record.get(field) == value)
    }
}

impl fmt::Display for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.key)?;
        for (i, (field, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {field}: {value}")?;
        }
        write!(f, " }}")
    }
}
