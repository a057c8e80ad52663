//! Entity schema table
//!
//! One [`EntitySchema`] describes a record type: its ordered fields, each
//! field's primitive kind and nullability, declared defaults, and the unique
//! keys that can address a single row. The whole engine is parameterized by
//! these descriptors instead of per-entity generated types.

mod registry;

pub use registry::SchemaRegistry;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ValidationError;
use crate::value::{Value, format_timestamp, parse_big_int, parse_decimal, parse_timestamp};

/// Widest decimal precision the engine can hold exactly.
pub const MAX_DECIMAL_PRECISION: u32 = 28;

/// Errors raised while building or loading a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("entity `{entity}`: {message}")]
    Invalid { entity: String, message: String },

    #[error("entity `{0}` is declared twice")]
    DuplicateEntity(String),

    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl SchemaError {
    fn invalid(entity: &str, message: impl Into<String>) -> Self {
        SchemaError::Invalid {
            entity: entity.to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Field kinds
// ============================================================================

/// Named, closed set of enum members.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumDef {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, member: &str) -> bool {
        self.values.iter().any(|v| v == member)
    }
}

/// Primitive kind of a field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// 32-bit signed integer, exchanged as a JSON number.
    Int,
    /// 64-bit signed integer, exchanged as decimal text.
    BigInt,
    /// Exact fixed-point number, exchanged as decimal text.
    Decimal { precision: u32, scale: u32 },
    Text,
    Boolean,
    /// UTC instant, exchanged as RFC 3339 text.
    Timestamp,
    Enum(EnumDef),
}

impl FieldKind {
    /// Name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Int => "integer",
            FieldKind::BigInt => "large integer",
            FieldKind::Decimal { .. } => "decimal",
            FieldKind::Text => "text",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Enum(_) => "enum",
        }
    }

    /// Kinds `avg` and `sum` may aggregate.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldKind::Int | FieldKind::BigInt | FieldKind::Decimal { .. }
        )
    }

    /// Kinds supporting `lt`/`lte`/`gt`/`gte`.
    pub fn is_ordered(&self) -> bool {
        self.is_numeric() || matches!(self, FieldKind::Timestamp)
    }
}

/// Default applied by the store when a create payload omits the field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDefault {
    /// Next value of a per-table integer sequence.
    Autoincrement,
    /// Current time at insert.
    Now,
    /// Random v4 UUID rendered as text.
    Uuid,
    Literal(Value),
}

// ============================================================================
// Fields
// ============================================================================

/// One field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    /// Column name in the store; defaults to the field name.
    pub column: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub default: Option<FieldDefault>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Whether a create payload must supply this field.
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }

    /// Validate a non-null value against this field's kind.
    ///
    /// Text is accepted for the kinds whose boundary encoding is text
    /// (large integer, decimal, timestamp, enum) and parsed exactly. Integers
    /// widen losslessly into large-integer and decimal fields. Anything else
    /// that does not match the kind is a type mismatch.
    pub fn accept(&self, value: Value) -> Result<Value, ValidationError> {
        let field = self.name.as_str();
        match (&self.kind, value) {
            (FieldKind::Int, Value::Int(i)) => {
                if i32::try_from(i).is_ok() {
                    Ok(Value::Int(i))
                } else {
                    Err(ValidationError::invalid_value(
                        field,
                        format!("{i} is outside the 32-bit integer range"),
                    ))
                }
            }
            (FieldKind::BigInt, Value::BigInt(i) | Value::Int(i)) => Ok(Value::BigInt(i)),
            (FieldKind::BigInt, Value::Text(text)) => parse_big_int(&text)
                .map(Value::BigInt)
                .map_err(|e| ValidationError::invalid_value(field, e)),
            (FieldKind::Decimal { .. }, Value::Decimal(d)) => self.check_decimal(d),
            (FieldKind::Decimal { .. }, Value::Int(i) | Value::BigInt(i)) => {
                self.check_decimal(rust_decimal::Decimal::from(i))
            }
            (FieldKind::Decimal { .. }, Value::Text(text)) => parse_decimal(&text)
                .map_err(|e| ValidationError::invalid_value(field, e))
                .and_then(|d| self.check_decimal(d)),
            (FieldKind::Text, Value::Text(text)) => Ok(Value::Text(text)),
            (FieldKind::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (FieldKind::Timestamp, Value::Timestamp(ts)) => self.check_timestamp(ts),
            (FieldKind::Timestamp, Value::Text(text)) => parse_timestamp(&text)
                .map_err(|e| ValidationError::invalid_value(field, e))
                .and_then(|ts| self.check_timestamp(ts)),
            (FieldKind::Enum(def), Value::Enum(member) | Value::Text(member)) => {
                if def.contains(&member) {
                    Ok(Value::Enum(member))
                } else {
                    Err(ValidationError::invalid_value(
                        field,
                        format!("`{member}` is not a member of enum {}", def.name),
                    ))
                }
            }
            (kind, other) => Err(ValidationError::type_mismatch(
                field,
                kind.name(),
                other.type_name(),
            )),
        }
    }

    /// Validate a value that may be null, as stored or written.
    pub fn accept_nullable(&self, value: Value) -> Result<Value, ValidationError> {
        if value.is_null() {
            if self.nullable {
                Ok(Value::Null)
            } else {
                Err(ValidationError::invalid_value(
                    &self.name,
                    "null is not allowed on a non-nullable field",
                ))
            }
        } else {
            self.accept(value)
        }
    }

    fn check_decimal(&self, value: rust_decimal::Decimal) -> Result<Value, ValidationError> {
        let FieldKind::Decimal { precision, scale } = self.kind else {
            return Ok(Value::Decimal(value));
        };
        if value.scale() > scale {
            return Err(ValidationError::invalid_value(
                &self.name,
                format!(
                    "{value} has {} fractional digits, the field allows {scale}",
                    value.scale()
                ),
            ));
        }
        let integer_digits = integer_digits(&value);
        let allowed = precision.saturating_sub(scale);
        if integer_digits > allowed {
            return Err(ValidationError::invalid_value(
                &self.name,
                format!("{value} needs {integer_digits} integer digits, the field allows {allowed}"),
            ));
        }
        // One representation per value: `1.5` and `1.50` store identically.
        let mut value = value;
        value.rescale(scale);
        Ok(Value::Decimal(value))
    }

    /// Timestamps are kept to the microsecond.
    fn check_timestamp(&self, value: DateTime<Utc>) -> Result<Value, ValidationError> {
        if value.timestamp_subsec_nanos() % 1_000 != 0 {
            return Err(ValidationError::invalid_value(
                &self.name,
                format!(
                    "{} has sub-microsecond digits, the field keeps microseconds",
                    format_timestamp(&value)
                ),
            ));
        }
        Ok(Value::Timestamp(value))
    }
}

fn integer_digits(value: &rust_decimal::Decimal) -> u32 {
    let text = value.abs().trunc().to_string();
    let whole = text.split('.').next().unwrap_or_default();
    whole.trim_start_matches('0').len() as u32
}

// ============================================================================
// Keys
// ============================================================================

/// A declared unique key over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    pub name: String,
    pub fields: Vec<String>,
}

impl UniqueKey {
    pub fn is_compound(&self) -> bool {
        self.fields.len() > 1
    }
}

/// Compound key name convention: field names joined with `_`.
pub fn key_name<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("_")
}

// ============================================================================
// Entity schema
// ============================================================================

/// Static description of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    name: String,
    table: String,
    fields: Vec<FieldDef>,
    keys: Vec<UniqueKey>,
}

impl EntitySchema {
    pub fn builder(name: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name in the store.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field or fail with an `UnknownField` validation error.
    pub fn require_field(&self, name: &str) -> Result<&FieldDef, ValidationError> {
        self.field(name)
            .ok_or_else(|| ValidationError::unknown_field(name).with_entity(&self.name))
    }

    /// All declared unique keys; the first is the primary key.
    pub fn keys(&self) -> &[UniqueKey] {
        &self.keys
    }

    pub fn key(&self, name: &str) -> Option<&UniqueKey> {
        self.keys.iter().find(|k| k.name == name)
    }

    pub fn primary_key(&self) -> &UniqueKey {
        &self.keys[0]
    }
}

/// Builder validating an [`EntitySchema`] on [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct EntitySchemaBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldDef>,
    primary_key: Option<UniqueKey>,
    unique: Vec<UniqueKey>,
}

impl EntitySchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            primary_key: None,
            unique: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.primary_key = Some(UniqueKey {
            name: key_name(&fields),
            fields,
        });
        self
    }

    /// Declare a unique key named by the `_`-joined field names.
    pub fn unique<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let name = key_name(&fields);
        self.unique_named(name, fields)
    }

    pub fn unique_named<I, S>(mut self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(UniqueKey {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn build(self) -> Result<EntitySchema, SchemaError> {
        let entity = self.name.as_str();
        if entity.is_empty() {
            return Err(SchemaError::invalid(entity, "entity name is empty"));
        }
        if self.fields.is_empty() {
            return Err(SchemaError::invalid(entity, "entity declares no fields"));
        }

        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::invalid(
                    entity,
                    format!("field `{}` is declared twice", field.name),
                ));
            }
            validate_field(entity, field)?;
        }

        let mut fields = self.fields;
        for field in &mut fields {
            let canonical = match &field.default {
                Some(FieldDefault::Literal(value)) => field.accept_nullable(value.clone()).ok(),
                _ => None,
            };
            if let Some(value) = canonical {
                field.default = Some(FieldDefault::Literal(value));
            }
        }

        let primary_key = self
            .primary_key
            .ok_or_else(|| SchemaError::invalid(entity, "no primary key declared"))?;
        let mut keys = vec![primary_key];
        keys.extend(self.unique);

        for (i, key) in keys.iter().enumerate() {
            if key.fields.is_empty() {
                return Err(SchemaError::invalid(
                    entity,
                    format!("key `{}` has no fields", key.name),
                ));
            }
            if keys[..i].iter().any(|k| k.name == key.name) {
                return Err(SchemaError::invalid(
                    entity,
                    format!("key `{}` is declared twice", key.name),
                ));
            }
            for (j, name) in key.fields.iter().enumerate() {
                let Some(field) = fields.iter().find(|f| &f.name == name) else {
                    return Err(SchemaError::invalid(
                        entity,
                        format!("key `{}` references unknown field `{name}`", key.name),
                    ));
                };
                if field.nullable {
                    return Err(SchemaError::invalid(
                        entity,
                        format!("key `{}` uses nullable field `{name}`", key.name),
                    ));
                }
                if key.fields[..j].contains(name) {
                    return Err(SchemaError::invalid(
                        entity,
                        format!("key `{}` lists `{name}` twice", key.name),
                    ));
                }
            }
        }

        Ok(EntitySchema {
            table: self.table.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            fields,
            keys,
        })
    }
}

fn validate_field(entity: &str, field: &FieldDef) -> Result<(), SchemaError> {
    match &field.kind {
        FieldKind::Decimal { precision, scale } => {
            if *precision == 0 || *precision > MAX_DECIMAL_PRECISION || scale > precision {
                return Err(SchemaError::invalid(
                    entity,
                    format!(
                        "decimal field `{}` needs 1 <= precision <= {MAX_DECIMAL_PRECISION} and scale <= precision",
                        field.name
                    ),
                ));
            }
        }
        FieldKind::Enum(def) => {
            if def.values.is_empty() {
                return Err(SchemaError::invalid(
                    entity,
                    format!("enum {} of field `{}` has no members", def.name, field.name),
                ));
            }
        }
        _ => {}
    }

    let Some(default) = &field.default else {
        return Ok(());
    };
    let compatible = match default {
        FieldDefault::Autoincrement => matches!(field.kind, FieldKind::Int | FieldKind::BigInt),
        FieldDefault::Now => matches!(field.kind, FieldKind::Timestamp),
        FieldDefault::Uuid => matches!(field.kind, FieldKind::Text),
        FieldDefault::Literal(value) => field.accept_nullable(value.clone()).is_ok(),
    };
    if compatible {
        Ok(())
    } else {
        Err(SchemaError::invalid(
            entity,
            format!(
                "default {default:?} does not fit {} field `{}`",
                field.kind.name(),
                field.name
            ),
        ))
    }
}
