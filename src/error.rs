//! Error taxonomy for the query engine
//!
//! Validation and NotFound are decided entirely inside the engine. Conflict,
//! StoreUnavailable and Store are classified from the store client's error and
//! re-surfaced with the entity attached. Nothing here is retried.

use crate::store::StoreError;

/// Result alias used across the engine.
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

/// What kind of input problem a [`ValidationError`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    UnknownEntity,
    UnknownField,
    UnknownKey,
    OperatorNotAllowed,
    TypeMismatch,
    InvalidValue,
    EmptyList,
    MissingField,
    PartialKey,
    InvalidAggregate,
    InvalidHaving,
    InvalidOrder,
    Overflow,
}

impl ValidationKind {
    /// Stable name used in wire error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::UnknownEntity => "unknownEntity",
            ValidationKind::UnknownField => "unknownField",
            ValidationKind::UnknownKey => "unknownKey",
            ValidationKind::OperatorNotAllowed => "operatorNotAllowed",
            ValidationKind::TypeMismatch => "typeMismatch",
            ValidationKind::InvalidValue => "invalidValue",
            ValidationKind::EmptyList => "emptyList",
            ValidationKind::MissingField => "missingField",
            ValidationKind::PartialKey => "partialKey",
            ValidationKind::InvalidAggregate => "invalidAggregate",
            ValidationKind::InvalidHaving => "invalidHaving",
            ValidationKind::InvalidOrder => "invalidOrder",
            ValidationKind::Overflow => "overflow",
        }
    }
}

/// Malformed filter, sort, page, aggregate or mutation input.
///
/// Carries the offending entity, field and operator when known so the API
/// boundary can build a precise message without parsing `message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub entity: Option<String>,
    pub field: Option<String>,
    pub operator: Option<&'static str>,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity: None,
            field: None,
            operator: None,
            message: message.into(),
        }
    }

    /// Attach the offending field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Attach the offending operator.
    pub fn with_operator(mut self, operator: &'static str) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Attach the entity name unless an inner layer already did.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        if self.entity.is_none() {
            self.entity = Some(entity.into());
        }
        self
    }

    // ========================================================================
    // Constructors for the common failures
    // ========================================================================

    pub fn unknown_entity(entity: &str) -> Self {
        Self::new(
            ValidationKind::UnknownEntity,
            format!("unknown entity `{entity}`"),
        )
        .with_entity(entity)
    }

    pub fn unknown_field(field: &str) -> Self {
        Self::new(ValidationKind::UnknownField, format!("unknown field `{field}`"))
            .with_field(field)
    }

    pub fn unknown_key(key: &str) -> Self {
        Self::new(
            ValidationKind::UnknownKey,
            format!("`{key}` is not a declared unique key"),
        )
        .with_field(key)
    }

    pub fn operator_not_allowed(field: &str, operator: &'static str, kind: &str) -> Self {
        Self::new(
            ValidationKind::OperatorNotAllowed,
            format!("operator `{operator}` is not allowed on {kind} field `{field}`"),
        )
        .with_field(field)
        .with_operator(operator)
    }

    pub fn type_mismatch(field: &str, expected: &str, got: &str) -> Self {
        Self::new(
            ValidationKind::TypeMismatch,
            format!("field `{field}` expects {expected}, got {got}"),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            ValidationKind::InvalidValue,
            format!("invalid value for `{field}`: {reason}"),
        )
        .with_field(field)
    }

    pub fn empty_list(field: &str, operator: &'static str) -> Self {
        Self::new(
            ValidationKind::EmptyList,
            format!("operator `{operator}` on `{field}` needs at least one value"),
        )
        .with_field(field)
        .with_operator(operator)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ValidationKind::MissingField,
            format!("required field `{field}` is missing"),
        )
        .with_field(field)
    }

    pub fn overflow(field: &str, operation: &str) -> Self {
        Self::new(
            ValidationKind::Overflow,
            format!("{operation} on `{field}` overflows the field type"),
        )
        .with_field(field)
    }
}

/// Error returned by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("no {entity} record found for {key}")]
    NotFound { entity: String, key: String },

    #[error("{entity}: unique constraint failed on {target}: {message}")]
    Conflict {
        entity: String,
        target: String,
        message: String,
    },

    #[error("{entity}: store unavailable: {message}")]
    StoreUnavailable { entity: String, message: String },

    #[error("{entity}: store error: {message}")]
    Store { entity: String, message: String },
}

impl QueryError {
    /// Stable category name used in wire error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Validation(_) => "Validation",
            QueryError::NotFound { .. } => "NotFound",
            QueryError::Conflict { .. } => "Conflict",
            QueryError::StoreUnavailable { .. } => "StoreUnavailable",
            QueryError::Store { .. } => "Store",
        }
    }

    /// Classify a store client error for the given entity.
    pub fn from_store(entity: &str, err: StoreError) -> Self {
        match err {
            StoreError::Conflict { target, message } => QueryError::Conflict {
                entity: entity.to_string(),
                target,
                message,
            },
            StoreError::Unavailable { message } => QueryError::StoreUnavailable {
                entity: entity.to_string(),
                message,
            },
            StoreError::Invalid(err) => QueryError::Validation(err.with_entity(entity)),
            StoreError::Other { message } => QueryError::Store {
                entity: entity.to_string(),
                message,
            },
        }
    }

    /// The entity the error is about, when known.
    pub fn entity(&self) -> Option<&str> {
        match self {
            QueryError::Validation(err) => err.entity.as_deref(),
            QueryError::NotFound { entity, .. }
            | QueryError::Conflict { entity, .. }
            | QueryError::StoreUnavailable { entity, .. }
            | QueryError::Store { entity, .. } => Some(entity),
        }
    }
}
