//! Relational store clients
//!
//! The engine validates every request before it reaches a [`StoreClient`];
//! stores receive prepared filters, resolved keys and normalized payloads.
//! "No row" is `None` or a zero count, never an error. Store failures are
//! reported as [`StoreError`] and classified by the engine.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

use crate::error::ValidationError;
use crate::query::{Filter, ResolvedKey, UpdateInput};
use crate::schema::{EntitySchema, FieldDefault, UniqueKey};
use crate::value::{Record, Value};

/// Failure reported by a store client.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique key (named by `target`) would be violated.
    #[error("unique constraint failed on {target}: {message}")]
    Conflict { target: String, message: String },

    /// I/O, pool or lock contention failure.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// A payload turned out to be invalid while being applied.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("{message}")]
    Other { message: String },
}

impl StoreError {
    pub(crate) fn conflict(key: &UniqueKey, record: &Record) -> Self {
        StoreError::Conflict {
            target: key.name.clone(),
            message: format!("{} already exists", ResolvedKey::of(key, record)),
        }
    }
}

/// Executes validated requests against durable storage.
///
/// Implementations own isolation: every method is one atomic operation.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Make sure the entity's table exists with every declared column.
    async fn sync_schema(&self, schema: &EntitySchema) -> Result<(), StoreError>;

    /// Rows matching `filter`. A superset is allowed; callers re-apply the filter.
    async fn fetch(&self, schema: &EntitySchema, filter: &Filter)
    -> Result<Vec<Record>, StoreError>;

    /// Insert one record, applying declared defaults to omitted fields.
    async fn create(&self, schema: &EntitySchema, data: Record) -> Result<Record, StoreError>;

    /// Insert every record or none. With `skip_duplicates`, records that
    /// would violate a unique key are skipped instead.
    async fn create_many(
        &self,
        schema: &EntitySchema,
        data: Vec<Record>,
        skip_duplicates: bool,
    ) -> Result<u64, StoreError>;

    async fn update(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
        update: &UpdateInput,
    ) -> Result<Option<Record>, StoreError>;

    async fn update_many(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
        update: &UpdateInput,
    ) -> Result<u64, StoreError>;

    /// Update the row at `key`, or create `create` when there is none.
    async fn upsert(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
        create: Record,
        update: &UpdateInput,
    ) -> Result<Record, StoreError>;

    async fn delete(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
    ) -> Result<Option<Record>, StoreError>;

    async fn delete_many(&self, schema: &EntitySchema, filter: &Filter)
    -> Result<u64, StoreError>;
}

/// Current time at the precision every store keeps (microseconds).
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Value of a generated default, or `None` for autoincrement, which needs
/// the store's sequence.
pub(crate) fn generated_default(default: &FieldDefault) -> Option<Value> {
    match default {
        FieldDefault::Autoincrement => None,
        FieldDefault::Now => Some(Value::Timestamp(now())),
        FieldDefault::Uuid => Some(Value::Text(uuid::Uuid::new_v4().to_string())),
        FieldDefault::Literal(value) => Some(value.clone()),
    }
}

/// First unique key `candidate` shares with any of `rows`.
pub(crate) fn find_conflict<'a, 'r>(
    schema: &'a EntitySchema,
    rows: impl Iterator<Item = &'r Record> + Clone,
    candidate: &Record,
) -> Option<&'a UniqueKey> {
    schema.keys().iter().find(|key| {
        let values: Vec<&Value> = key.fields.iter().map(|f| candidate.get(f)).collect();
        if values.iter().any(|v| v.is_null()) {
            return false;
        }
        rows.clone().any(|row| {
            key.fields
                .iter()
                .zip(&values)
                .all(|(field, value)| row.get(field) == *value)
        })
    })
}
