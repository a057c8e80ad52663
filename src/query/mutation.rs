//! Mutation payloads
//!
//! Create and update payloads are validated field by field with the same
//! kind rules as filter operands before any store access. Update payloads
//! are partial: only the fields present are touched. Numeric fields also
//! accept `increment`, `decrement`, `multiply` and `divide`, applied with
//! exact arithmetic by [`UpdateInput::apply`].

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{ValidationError, ValidationKind};
use crate::schema::{EntitySchema, FieldDef, FieldKind};
use crate::value::{Record, Value, parse_big_int, parse_decimal};

/// Fields of a record to create. Omitted fields get their default or null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateInput {
    values: BTreeMap<String, Value>,
}

impl CreateInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Validate against `schema` and return the supplied values, normalized.
    ///
    /// Every non-nullable field without a default must be present. Defaults
    /// are left to the store.
    pub fn validate(&self, schema: &EntitySchema) -> Result<Record, ValidationError> {
        self.validate_inner(schema)
            .map_err(|e| e.with_entity(schema.name()))
    }

    fn validate_inner(&self, schema: &EntitySchema) -> Result<Record, ValidationError> {
        let mut record = Record::new();
        for (name, value) in &self.values {
            let field = schema.require_field(name)?;
            record.set(name.clone(), field.accept_nullable(value.clone())?);
        }
        if let Some(missing) = schema
            .fields()
            .iter()
            .find(|f| f.is_required() && !record.contains(&f.name))
        {
            return Err(ValidationError::missing_field(&missing.name));
        }
        Ok(record)
    }
}

impl FromIterator<(String, Value)> for CreateInput {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Change applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Replace the value; null clears a nullable field.
    Set(Value),
    Increment(Value),
    Decrement(Value),
    Multiply(Value),
    Divide(Value),
}

impl FieldUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            FieldUpdate::Set(_) => "set",
            FieldUpdate::Increment(_) => "increment",
            FieldUpdate::Decrement(_) => "decrement",
            FieldUpdate::Multiply(_) => "multiply",
            FieldUpdate::Divide(_) => "divide",
        }
    }

    fn operand(&self) -> &Value {
        match self {
            FieldUpdate::Set(v)
            | FieldUpdate::Increment(v)
            | FieldUpdate::Decrement(v)
            | FieldUpdate::Multiply(v)
            | FieldUpdate::Divide(v) => v,
        }
    }

    fn with_operand(&self, value: Value) -> Self {
        match self {
            FieldUpdate::Set(_) => FieldUpdate::Set(value),
            FieldUpdate::Increment(_) => FieldUpdate::Increment(value),
            FieldUpdate::Decrement(_) => FieldUpdate::Decrement(value),
            FieldUpdate::Multiply(_) => FieldUpdate::Multiply(value),
            FieldUpdate::Divide(_) => FieldUpdate::Divide(value),
        }
    }
}

/// Partial update payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateInput {
    ops: BTreeMap<String, FieldUpdate>,
}

impl UpdateInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, field: impl Into<String>, update: FieldUpdate) -> Self {
        self.insert(field, update);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, update: FieldUpdate) {
        self.ops.insert(field.into(), update);
    }

    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, FieldUpdate::Set(value.into()))
    }

    pub fn increment(self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.push(field, FieldUpdate::Increment(by.into()))
    }

    pub fn decrement(self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.push(field, FieldUpdate::Decrement(by.into()))
    }

    pub fn multiply(self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.push(field, FieldUpdate::Multiply(by.into()))
    }

    pub fn divide(self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.push(field, FieldUpdate::Divide(by.into()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldUpdate)> {
        self.ops.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Validate against `schema` and return the payload with normalized operands.
    pub fn validate(&self, schema: &EntitySchema) -> Result<UpdateInput, ValidationError> {
        let mut ops = BTreeMap::new();
        for (name, update) in &self.ops {
            let field = schema
                .require_field(name)
                .map_err(|e| e.with_entity(schema.name()))?;
            let operand = match update {
                FieldUpdate::Set(value) => field.accept_nullable(value.clone()),
                other => arithmetic_operand(field, other),
            }
            .map_err(|e| e.with_entity(schema.name()))?;
            ops.insert(name.clone(), update.with_operand(operand));
        }
        Ok(UpdateInput { ops })
    }

    /// Apply a validated payload to a stored record.
    ///
    /// Arithmetic on a null value leaves it null. Results that leave the
    /// field's range fail with `Overflow`.
    pub fn apply(&self, schema: &EntitySchema, record: &Record) -> Result<Record, ValidationError> {
        let mut out = record.clone();
        for (name, update) in &self.ops {
            let field = schema
                .require_field(name)
                .map_err(|e| e.with_entity(schema.name()))?;
            let next = match update {
                FieldUpdate::Set(value) => value.clone(),
                other => arithmetic(field, record.get(name), other)
                    .map_err(|e| e.with_entity(schema.name()))?,
            };
            out.set(name.clone(), next);
        }
        Ok(out)
    }
}

fn arithmetic_operand(field: &FieldDef, update: &FieldUpdate) -> Result<Value, ValidationError> {
    let op = update.name();
    let name = field.name.as_str();
    let value = update.operand().clone();
    let operand = match (&field.kind, value) {
        (_, Value::Null) => {
            return Err(
                ValidationError::type_mismatch(name, field.kind.name(), "null").with_operator(op),
            );
        }
        (FieldKind::Int, Value::Int(i)) => Value::Int(i),
        (FieldKind::BigInt, Value::Int(i) | Value::BigInt(i)) => Value::BigInt(i),
        (FieldKind::BigInt, Value::Text(text)) => parse_big_int(&text)
            .map(Value::BigInt)
            .map_err(|e| ValidationError::invalid_value(name, e).with_operator(op))?,
        (FieldKind::Decimal { .. }, Value::Int(i) | Value::BigInt(i)) => {
            Value::Decimal(Decimal::from(i))
        }
        (FieldKind::Decimal { .. }, Value::Decimal(d)) => Value::Decimal(d),
        (FieldKind::Decimal { .. }, Value::Text(text)) => parse_decimal(&text)
            .map(Value::Decimal)
            .map_err(|e| ValidationError::invalid_value(name, e).with_operator(op))?,
        (kind, _) if !kind.is_numeric() => {
            return Err(ValidationError::operator_not_allowed(name, op, kind.name()));
        }
        (kind, other) => {
            return Err(ValidationError::type_mismatch(name, kind.name(), other.type_name())
                .with_operator(op));
        }
    };
    let is_zero = match &operand {
        Value::Int(i) | Value::BigInt(i) => *i == 0,
        Value::Decimal(d) => d.is_zero(),
        _ => false,
    };
    if is_zero && matches!(update, FieldUpdate::Divide(_)) {
        return Err(ValidationError::new(
            ValidationKind::InvalidValue,
            format!("cannot divide `{name}` by zero"),
        )
        .with_field(name)
        .with_operator(op));
    }
    Ok(operand)
}

fn arithmetic(
    field: &FieldDef,
    current: &Value,
    update: &FieldUpdate,
) -> Result<Value, ValidationError> {
    let name = field.name.as_str();
    let op = update.name();
    let overflow = || ValidationError::overflow(name, op);

    match (current, update.operand()) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Int(a) | Value::BigInt(a), Value::Int(b) | Value::BigInt(b)) => {
            let result = match update {
                FieldUpdate::Increment(_) => a.checked_add(*b),
                FieldUpdate::Decrement(_) => a.checked_sub(*b),
                FieldUpdate::Multiply(_) => a.checked_mul(*b),
                FieldUpdate::Divide(_) => a.checked_div(*b),
                FieldUpdate::Set(_) => Some(*b),
            }
            .ok_or_else(overflow)?;
            match field.kind {
                FieldKind::Int => {
                    i32::try_from(result).map_err(|_| overflow())?;
                    Ok(Value::Int(result))
                }
                _ => Ok(Value::BigInt(result)),
            }
        }
        (Value::Decimal(a), Value::Decimal(b)) => {
            let result = match update {
                FieldUpdate::Increment(_) => a.checked_add(*b),
                FieldUpdate::Decrement(_) => a.checked_sub(*b),
                FieldUpdate::Multiply(_) => a.checked_mul(*b),
                FieldUpdate::Divide(_) => a.checked_div(*b),
                FieldUpdate::Set(_) => Some(*b),
            }
            .ok_or_else(overflow)?;
            let FieldKind::Decimal { scale, .. } = field.kind else {
                return Ok(Value::Decimal(result));
            };
            let rounded =
                result.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
            field
                .accept(Value::Decimal(rounded))
                .map_err(|_| overflow())
        }
        (value, operand) => Err(ValidationError::type_mismatch(
            name,
            value.type_name(),
            operand.type_name(),
        )
        .with_operator(op)),
    }
}

/// Number of rows a bulk mutation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub count: u64,
}
