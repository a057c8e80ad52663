//! SQLite store
//!
//! Column encoding:
//! - integer, large integer: INTEGER
//! - boolean: INTEGER 0/1
//! - timestamp: INTEGER microseconds since the Unix epoch
//! - decimal: TEXT, the exact decimal at the field's declared scale
//! - text, enum: TEXT
//!
//! Filters are pushed down as parameterized `WHERE` clauses when SQLite
//! evaluates them exactly. Leaves it cannot (decimal comparisons, case
//! insensitive matching) are evaluated in-process on the rows SQLite returns.
//! Every mutation runs in one transaction.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::{StoreClient, StoreError, generated_default};
use crate::query::filter::{Condition, Operator, QueryMode, matches};
use crate::query::{FieldUpdate, Filter, ResolvedKey, UpdateInput};
use crate::schema::{EntitySchema, FieldDef, FieldDefault, FieldKind, UniqueKey};
use crate::value::{Record, Value, format_decimal, parse_decimal};

// ============================================================================
// Values
// ============================================================================

/// A value bound to a parameterized statement.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Text(String),
    Int(i64),
    Null,
}

impl SqlValue {
    fn encode(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Int(i64::from(*b)),
            Value::Int(i) | Value::BigInt(i) => SqlValue::Int(*i),
            Value::Decimal(d) => SqlValue::Text(format_decimal(d)),
            Value::Text(s) | Value::Enum(s) => SqlValue::Text(s.clone()),
            Value::Timestamp(ts) => SqlValue::Int(ts.timestamp_micros()),
        }
    }

    /// Encode a value written to `field`. Decimals are stored at the field's
    /// declared scale so equal values share one stored text.
    fn encode_field(field: &FieldDef, value: &Value) -> Self {
        match (&field.kind, value) {
            (FieldKind::Decimal { scale, .. }, Value::Decimal(d)) if d.scale() <= *scale => {
                let mut d = *d;
                d.rescale(*scale);
                SqlValue::Text(format_decimal(&d))
            }
            _ => SqlValue::encode(value),
        }
    }

    fn bind_to_query<'q>(
        &'q self,
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Null => query.bind(None::<String>),
        }
    }

    /// Literal form for `DEFAULT` clauses.
    fn literal(&self) -> String {
        match self {
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Null => "NULL".to_string(),
        }
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_type(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Int | FieldKind::BigInt | FieldKind::Boolean | FieldKind::Timestamp => "INTEGER",
        FieldKind::Decimal { .. } | FieldKind::Text | FieldKind::Enum(_) => "TEXT",
    }
}

fn select_list(schema: &EntitySchema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| quote(&f.column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_columns(schema: &EntitySchema, key: &UniqueKey) -> String {
    key.fields
        .iter()
        .map(|name| quote(schema.field(name).map_or(name.as_str(), |f| f.column.as_str())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single integer primary key column doubles as SQLite's rowid and is
/// assigned by SQLite when omitted.
fn is_rowid_alias(schema: &EntitySchema, field: &FieldDef) -> bool {
    let pk = schema.primary_key();
    pk.fields.len() == 1
        && pk.fields[0] == field.name
        && matches!(field.kind, FieldKind::Int | FieldKind::BigInt)
}

fn decode_row(schema: &EntitySchema, row: &SqliteRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for field in schema.fields() {
        let column = field.column.as_str();
        let corrupt = |message: String| StoreError::Other {
            message: format!("{}.{column}: {message}", schema.table()),
        };
        let value = match &field.kind {
            FieldKind::Int | FieldKind::BigInt | FieldKind::Boolean | FieldKind::Timestamp => {
                let stored: Option<i64> = row.try_get(column).map_err(|e| corrupt(e.to_string()))?;
                match (stored, &field.kind) {
                    (None, _) => Value::Null,
                    (Some(i), FieldKind::Int) => Value::Int(i),
                    (Some(i), FieldKind::BigInt) => Value::BigInt(i),
                    (Some(i), FieldKind::Boolean) => Value::Bool(i != 0),
                    (Some(micros), _) => DateTime::from_timestamp_micros(micros)
                        .map(Value::Timestamp)
                        .ok_or_else(|| corrupt(format!("{micros} is not a valid timestamp")))?,
                }
            }
            FieldKind::Decimal { .. } | FieldKind::Text | FieldKind::Enum(_) => {
                let stored: Option<String> =
                    row.try_get(column).map_err(|e| corrupt(e.to_string()))?;
                match (stored, &field.kind) {
                    (None, _) => Value::Null,
                    (Some(text), FieldKind::Decimal { .. }) => {
                        parse_decimal(&text).map(Value::Decimal).map_err(corrupt)?
                    }
                    (Some(text), FieldKind::Enum(_)) => Value::Enum(text),
                    (Some(text), _) => Value::Text(text),
                }
            }
        };
        record.set(field.name.clone(), value);
    }
    Ok(record)
}

/// Classify a driver error for `schema`'s table.
fn classify(schema: &EntitySchema, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            target: conflict_target(schema, db.message()),
            message: db.message().to_string(),
        },
        // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
        sqlx::Error::Database(db)
            if matches!(
                db.code().as_deref(),
                Some("5" | "6" | "261" | "262" | "517")
            ) =>
        {
            StoreError::Unavailable {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable {
            message: err.to_string(),
        },
        _ => StoreError::Other {
            message: err.to_string(),
        },
    }
}

/// Map "UNIQUE constraint failed: T.a, T.b" back to the declared key.
fn conflict_target(schema: &EntitySchema, message: &str) -> String {
    let Some((_, columns)) = message.split_once(": ") else {
        return message.to_string();
    };
    let mut columns: Vec<&str> = columns
        .split(", ")
        .map(|c| c.rsplit_once('.').map_or(c, |(_, column)| column))
        .collect();
    columns.sort_unstable();
    schema
        .keys()
        .iter()
        .find(|key| {
            let mut key_columns: Vec<&str> = key
                .fields
                .iter()
                .filter_map(|name| schema.field(name).map(|f| f.column.as_str()))
                .collect();
            key_columns.sort_unstable();
            key_columns == columns
        })
        .map_or_else(|| columns.join("_"), |key| key.name.clone())
}

// ============================================================================
// Filter translation
// ============================================================================

type Fragment = (String, Vec<SqlValue>);

/// `WHERE` clause for a filter, possibly covering only part of it.
#[derive(Debug, Default)]
struct Pushdown {
    clause: Option<String>,
    binds: Vec<SqlValue>,
    /// Whether the clause alone decides the filter.
    exact: bool,
}

/// Translate what SQLite can evaluate exactly. Untranslatable children of a
/// top-level `AND` are dropped, which only widens the result.
fn pushdown(schema: &EntitySchema, filter: &Filter) -> Pushdown {
    let parts: Vec<Option<Fragment>> = match filter {
        Filter::And(children) => children.iter().map(|c| translate(schema, c)).collect(),
        other => vec![translate(schema, other)],
    };
    let exact = parts.iter().all(Option::is_some);
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    for (sql, values) in parts.into_iter().flatten() {
        clauses.push(format!("({sql})"));
        binds.extend(values);
    }
    Pushdown {
        clause: (!clauses.is_empty()).then(|| clauses.join(" AND ")),
        binds,
        exact,
    }
}

fn translate(schema: &EntitySchema, filter: &Filter) -> Option<Fragment> {
    match filter {
        Filter::And(children) => join(schema, children, " AND ", "1 = 1", false),
        Filter::Or(children) => join(schema, children, " OR ", "1 = 0", false),
        Filter::Not(children) => join(schema, children, " AND ", "1 = 1", true),
        Filter::Condition(condition) => translate_condition(schema, condition),
    }
}

fn join(
    schema: &EntitySchema,
    children: &[Filter],
    separator: &str,
    empty: &str,
    negate: bool,
) -> Option<Fragment> {
    if children.is_empty() {
        return Some((empty.to_string(), Vec::new()));
    }
    let mut parts = Vec::with_capacity(children.len());
    let mut binds = Vec::new();
    for child in children {
        let (sql, values) = translate(schema, child)?;
        parts.push(if negate {
            format!("NOT ({sql})")
        } else {
            format!("({sql})")
        });
        binds.extend(values);
    }
    Some((parts.join(separator), binds))
}

fn translate_condition(schema: &EntitySchema, condition: &Condition) -> Option<Fragment> {
    let field = schema.field(&condition.field)?;
    if condition.mode == QueryMode::Insensitive || matches!(field.kind, FieldKind::Decimal { .. }) {
        return None;
    }
    let col = quote(&field.column);
    let one = |value: &Value| vec![SqlValue::encode(value)];
    let list = |values: &[Value]| -> Fragment {
        let marks = vec!["?"; values.len()].join(", ");
        (marks, values.iter().map(SqlValue::encode).collect())
    };
    let text = |s: &str, times: usize| vec![SqlValue::Text(s.to_string()); times];

    Some(match &condition.op {
        Operator::Equals(v) => (format!("{col} = ?"), one(v)),
        Operator::Not(v) => (format!("{col} <> ?"), one(v)),
        Operator::In(vs) => {
            let (marks, binds) = list(vs);
            (format!("{col} IN ({marks})"), binds)
        }
        Operator::NotIn(vs) => {
            let (marks, binds) = list(vs);
            (format!("{col} NOT IN ({marks})"), binds)
        }
        Operator::Lt(v) => (format!("{col} < ?"), one(v)),
        Operator::Lte(v) => (format!("{col} <= ?"), one(v)),
        Operator::Gt(v) => (format!("{col} > ?"), one(v)),
        Operator::Gte(v) => (format!("{col} >= ?"), one(v)),
        Operator::Contains(s) | Operator::StartsWith(s) | Operator::EndsWith(s)
            if s.is_empty() =>
        {
            (format!("{col} IS NOT NULL"), Vec::new())
        }
        Operator::Contains(s) => (format!("instr({col}, ?) > 0"), text(s, 1)),
        Operator::StartsWith(s) => (format!("substr({col}, 1, length(?)) = ?"), text(s, 2)),
        Operator::EndsWith(s) => (format!("substr({col}, -length(?)) = ?"), text(s, 2)),
        Operator::IsNull => (format!("{col} IS NULL"), Vec::new()),
        Operator::IsNotNull => (format!("{col} IS NOT NULL"), Vec::new()),
    })
}

// ============================================================================
// Schema sync
// ============================================================================

fn column_sql(schema: &EntitySchema, field: &FieldDef) -> String {
    let mut sql = format!("{} {}", quote(&field.column), column_type(&field.kind));
    if is_rowid_alias(schema, field) {
        sql.push_str(" PRIMARY KEY");
        return sql;
    }
    if !field.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(FieldDefault::Literal(value)) = &field.default {
        sql.push_str(&format!(" DEFAULT {}", SqlValue::encode_field(field, value).literal()));
    }
    sql
}

fn create_table_sql(schema: &EntitySchema) -> String {
    let mut parts: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| column_sql(schema, f))
        .collect();
    let pk = schema.primary_key();
    let rowid_pk = schema
        .fields()
        .iter()
        .any(|f| is_rowid_alias(schema, f));
    if !rowid_pk {
        parts.push(format!("PRIMARY KEY ({})", key_columns(schema, pk)));
    }
    for key in schema.keys().iter().skip(1) {
        parts.push(format!("UNIQUE ({})", key_columns(schema, key)));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quote(schema.table()),
        parts.join(",\n  ")
    )
}

/// `ALTER TABLE ADD COLUMN`. SQLite cannot add a NOT NULL column without a
/// default, so one is supplied for required columns.
fn add_column_sql(schema: &EntitySchema, field: &FieldDef) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(schema.table()),
        quote(&field.column),
        column_type(&field.kind)
    );
    if let Some(FieldDefault::Literal(value)) = &field.default {
        sql.push_str(&format!(" DEFAULT {}", SqlValue::encode_field(field, value).literal()));
    } else if !field.nullable {
        let fallback = match column_type(&field.kind) {
            "INTEGER" => "0",
            _ => "''",
        };
        sql.push_str(&format!(" NOT NULL DEFAULT {fallback}"));
    }
    sql
}

/// Bound parameters per `rowid IN (..)` statement.
const ROWID_CHUNK: usize = 500;

/// The fields and values of an update made only of `set`s, or `None` when
/// any field needs the stored value (arithmetic) or nothing is set.
fn plain_sets<'a>(
    schema: &'a EntitySchema,
    update: &'a UpdateInput,
) -> Option<Vec<(&'a FieldDef, &'a Value)>> {
    let sets = update
        .iter()
        .map(|(name, change)| match change {
            FieldUpdate::Set(value) => schema.field(name).map(|field| (field, value)),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    (!sets.is_empty()).then_some(sets)
}

// ============================================================================
// Store
// ============================================================================

/// Store backed by a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool. In-memory databases keep their single connection alive
    /// for the life of the pool.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Other {
                message: format!("invalid database URL: {e}"),
            })?
            .create_if_missing(true);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections })
            .acquire_timeout(acquire_timeout);
        if in_memory {
            pool = pool.min_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: e.to_string(),
            })?;
        debug!(url, in_memory, "Connected to SQLite");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// One `UPDATE .. SET .. WHERE ..` for a set-only update over an exactly
    /// translated filter.
    async fn update_where(
        &self,
        schema: &EntitySchema,
        filter: &Pushdown,
        sets: &[(&FieldDef, &Value)],
    ) -> Result<u64, StoreError> {
        let assignments: Vec<String> = sets
            .iter()
            .map(|(field, _)| format!("{} = ?", quote(&field.column)))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            quote(schema.table()),
            assignments.join(", ")
        );
        if let Some(clause) = &filter.clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        debug!(sql = %sql, "Updating rows");

        let mut binds: Vec<SqlValue> = sets
            .iter()
            .map(|(field, value)| SqlValue::encode_field(field, value))
            .collect();
        binds.extend(filter.binds.iter().cloned());
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = value.bind_to_query(query);
        }
        let done = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(schema, e))?;
        Ok(done.rows_affected())
    }

    async fn table_exists(&self, schema: &EntitySchema) -> Result<bool, StoreError> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(schema.table())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify(schema, e))?;
        Ok(found.is_some())
    }

    async fn table_columns(&self, schema: &EntitySchema) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(i32, String, String, i32, Option<String>, i32)> =
            sqlx::query_as(&format!("PRAGMA table_info({})", quote(schema.table())))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify(schema, e))?;
        Ok(rows.into_iter().map(|(_, name, _, _, _, _)| name).collect())
    }
}

/// Rows matching `filter` with their rowids.
async fn select(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
    filter: &Filter,
) -> Result<Vec<(i64, Record)>, StoreError> {
    let pushdown = pushdown(schema, filter);
    let mut sql = format!(
        "SELECT rowid AS \"__rowid\", {} FROM {}",
        select_list(schema),
        quote(schema.table())
    );
    if let Some(clause) = &pushdown.clause {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    debug!(sql = %sql, exact = pushdown.exact, "Selecting rows");

    let mut query = sqlx::query(&sql);
    for value in &pushdown.binds {
        query = value.bind_to_query(query);
    }
    let rows = query
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| classify(schema, e))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let rowid: i64 = row.try_get(0).map_err(|e| classify(schema, e))?;
        let record = decode_row(schema, row)?;
        if pushdown.exact || matches(filter, &record) {
            out.push((rowid, record));
        }
    }
    Ok(out)
}

async fn select_key(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
    key: &ResolvedKey,
) -> Result<Option<(i64, Record)>, StoreError> {
    Ok(select(conn, schema, &key.to_filter()).await?.into_iter().next())
}

async fn next_sequence(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
    field: &FieldDef,
) -> Result<Value, StoreError> {
    let sql = format!(
        "SELECT COALESCE(MAX({}), 0) + 1 FROM {}",
        quote(&field.column),
        quote(schema.table())
    );
    let (next,): (i64,) = sqlx::query_as(&sql)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| classify(schema, e))?;
    Ok(field.accept(Value::Int(next))?)
}

/// Insert one record. With `or_ignore`, a unique violation yields `None`.
async fn insert(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
    data: &Record,
    or_ignore: bool,
) -> Result<Option<Record>, StoreError> {
    let mut columns = Vec::new();
    let mut binds = Vec::new();
    for field in schema.fields() {
        let value = if data.contains(&field.name) {
            data.get(&field.name).clone()
        } else {
            match &field.default {
                Some(FieldDefault::Autoincrement) if is_rowid_alias(schema, field) => continue,
                Some(FieldDefault::Autoincrement) => next_sequence(conn, schema, field).await?,
                // column DEFAULT clause
                Some(FieldDefault::Literal(_)) | None => continue,
                Some(default) => generated_default(default).unwrap_or(Value::Null),
            }
        };
        columns.push(quote(&field.column));
        binds.push(SqlValue::encode_field(field, &value));
    }

    let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
    let table = quote(schema.table());
    let returning = select_list(schema);
    let sql = if columns.is_empty() {
        format!("{verb} INTO {table} DEFAULT VALUES RETURNING {returning}")
    } else {
        format!(
            "{verb} INTO {table} ({}) VALUES ({}) RETURNING {returning}",
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    };
    debug!(sql = %sql, "Inserting row");

    let mut query = sqlx::query(&sql);
    for value in &binds {
        query = value.bind_to_query(query);
    }
    let row = query
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| classify(schema, e))?;
    row.map(|r| decode_row(schema, &r)).transpose()
}

/// Write the fields an update touches back to the row at `rowid`.
async fn write_row(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
    rowid: i64,
    update: &UpdateInput,
    next: &Record,
) -> Result<(), StoreError> {
    let mut assignments = Vec::new();
    let mut binds = Vec::new();
    for (name, _) in update.iter() {
        let field = schema.require_field(name)?;
        assignments.push(format!("{} = ?", quote(&field.column)));
        binds.push(SqlValue::encode_field(field, next.get(name)));
    }
    if assignments.is_empty() {
        return Ok(());
    }
    binds.push(SqlValue::Int(rowid));

    let sql = format!(
        "UPDATE {} SET {} WHERE rowid = ?",
        quote(schema.table()),
        assignments.join(", ")
    );
    debug!(sql = %sql, "Updating row");
    let mut query = sqlx::query(&sql);
    for value in &binds {
        query = value.bind_to_query(query);
    }
    query
        .execute(&mut *conn)
        .await
        .map_err(|e| classify(schema, e))?;
    Ok(())
}

async fn delete_rowid(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
    rowid: i64,
) -> Result<(), StoreError> {
    let sql = format!("DELETE FROM {} WHERE rowid = ?", quote(schema.table()));
    sqlx::query(&sql)
        .bind(rowid)
        .execute(&mut *conn)
        .await
        .map_err(|e| classify(schema, e))?;
    Ok(())
}

#[async_trait]
impl StoreClient for SqliteStore {
    async fn sync_schema(&self, schema: &EntitySchema) -> Result<(), StoreError> {
        let table = schema.table();
        if !self.table_exists(schema).await? {
            let sql = create_table_sql(schema);
            debug!(table, sql = %sql, "Creating table");
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| classify(schema, e))?;
            info!(table, "Created table");
            return Ok(());
        }

        let existing = self.table_columns(schema).await?;
        for field in schema.fields() {
            if existing.iter().any(|c| c == &field.column) {
                continue;
            }
            let sql = add_column_sql(schema, field);
            debug!(table, sql = %sql, "Adding column");
            match sqlx::query(&sql).execute(&self.pool).await {
                Ok(_) => info!(table, column = %field.column, "Added column"),
                Err(e) => warn!(table, column = %field.column, error = %e, "Failed to add column"),
            }
        }
        Ok(())
    }

    async fn fetch(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| classify(schema, e))?;
        let rows = select(&mut conn, schema, filter).await?;
        Ok(rows.into_iter().map(|(_, record)| record).collect())
    }

    async fn create(&self, schema: &EntitySchema, data: Record) -> Result<Record, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| classify(schema, e))?;
        let created = insert(&mut tx, schema, &data, false)
            .await?
            .ok_or_else(|| StoreError::Other {
                message: "insert returned no row".to_string(),
            })?;
        tx.commit().await.map_err(|e| classify(schema, e))?;
        Ok(created)
    }

    async fn create_many(
        &self,
        schema: &EntitySchema,
        data: Vec<Record>,
        skip_duplicates: bool,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| classify(schema, e))?;
        let mut created = 0;
        for record in &data {
            if insert(&mut tx, schema, record, skip_duplicates).await?.is_some() {
                created += 1;
            }
        }
        tx.commit().await.map_err(|e| classify(schema, e))?;
        Ok(created)
    }

    async fn update(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
        update: &UpdateInput,
    ) -> Result<Option<Record>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| classify(schema, e))?;
        let Some((rowid, current)) = select_key(&mut tx, schema, key).await? else {
            return Ok(None);
        };
        let next = update.apply(schema, &current)?;
        write_row(&mut tx, schema, rowid, update, &next).await?;
        tx.commit().await.map_err(|e| classify(schema, e))?;
        Ok(Some(next))
    }

    async fn update_many(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
        update: &UpdateInput,
    ) -> Result<u64, StoreError> {
        let translated = pushdown(schema, filter);
        if translated.exact {
            if let Some(sets) = plain_sets(schema, update) {
                return self.update_where(schema, &translated, &sets).await;
            }
        }

        let mut tx = self.pool.begin().await.map_err(|e| classify(schema, e))?;
        let rows = select(&mut tx, schema, filter).await?;
        for (rowid, current) in &rows {
            let next = update.apply(schema, current)?;
            write_row(&mut tx, schema, *rowid, update, &next).await?;
        }
        tx.commit().await.map_err(|e| classify(schema, e))?;
        Ok(rows.len() as u64)
    }

    async fn upsert(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
        create: Record,
        update: &UpdateInput,
    ) -> Result<Record, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| classify(schema, e))?;
        let record = match select_key(&mut tx, schema, key).await? {
            Some((rowid, current)) => {
                let next = update.apply(schema, &current)?;
                write_row(&mut tx, schema, rowid, update, &next).await?;
                next
            }
            None => insert(&mut tx, schema, &create, false)
                .await?
                .ok_or_else(|| StoreError::Other {
                    message: "insert returned no row".to_string(),
                })?,
        };
        tx.commit().await.map_err(|e| classify(schema, e))?;
        Ok(record)
    }

    async fn delete(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
    ) -> Result<Option<Record>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| classify(schema, e))?;
        let Some((rowid, record)) = select_key(&mut tx, schema, key).await? else {
            return Ok(None);
        };
        delete_rowid(&mut tx, schema, rowid).await?;
        tx.commit().await.map_err(|e| classify(schema, e))?;
        Ok(Some(record))
    }

    async fn delete_many(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let translated = pushdown(schema, filter);
        if translated.exact {
            let mut sql = format!("DELETE FROM {}", quote(schema.table()));
            if let Some(clause) = &translated.clause {
                sql.push_str(" WHERE ");
                sql.push_str(clause);
            }
            debug!(sql = %sql, "Deleting rows");
            let mut query = sqlx::query(&sql);
            for value in &translated.binds {
                query = value.bind_to_query(query);
            }
            let done = query
                .execute(&self.pool)
                .await
                .map_err(|e| classify(schema, e))?;
            return Ok(done.rows_affected());
        }

        let mut tx = self.pool.begin().await.map_err(|e| classify(schema, e))?;
        let rowids: Vec<i64> = select(&mut tx, schema, filter)
            .await?
            .into_iter()
            .map(|(rowid, _)| rowid)
            .collect();
        for chunk in rowids.chunks(ROWID_CHUNK) {
            let marks = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE rowid IN ({marks})",
                quote(schema.table())
            );
            debug!(sql = %sql, rows = chunk.len(), "Deleting rows");
            let mut query = sqlx::query(&sql);
            for rowid in chunk {
                query = query.bind(*rowid);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(schema, e))?;
        }
        tx.commit().await.map_err(|e| classify(schema, e))?;
        Ok(rowids.len() as u64)
    }
}
