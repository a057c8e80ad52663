//! SQLite store integration tests
//!
//! Runs the engine against in-memory and file-backed SQLite databases:
//! - Filter results match the in-memory store, including filters that
//!   cannot be pushed into SQL
//! - Unique violations surface as conflicts on the declared key
//! - Bulk writes are atomic
//! - Schema sync creates tables and adds missing columns

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;

use entity_query::query::{
    CreateInput, Filter, FindManyArgs, Operator, SortField, SortSpec, UniqueSelector, UpdateInput,
};
use entity_query::schema::{EntitySchema, FieldDef, FieldDefault, FieldKind, SchemaRegistry};
use entity_query::store::{MemoryStore, SqliteStore, StoreClient};
use entity_query::value::{Record, Value};
use entity_query::{Engine, EntityService, QueryError, ValidationKind};

// ============================================================================
// Fixtures
// ============================================================================

fn monitor_schema() -> EntitySchema {
    EntitySchema::builder("Monitor")
        .table("Monitors")
        .field(FieldDef::new("Id", FieldKind::Int).with_default(FieldDefault::Autoincrement))
        .field(FieldDef::new("Name", FieldKind::Text))
        .field(FieldDef::new("Enabled", FieldKind::Boolean).with_default(FieldDefault::Literal(Value::Bool(true))))
        .field(
            FieldDef::new(
                "MaxFPS",
                FieldKind::Decimal {
                    precision: 5,
                    scale: 2,
                },
            )
            .nullable(),
        )
        .field(FieldDef::new("Notes", FieldKind::Text).nullable())
        .field(FieldDef::new("LastSeen", FieldKind::Timestamp).nullable())
        .primary_key(["Id"])
        .unique(["Name"])
        .build()
        .unwrap()
}

fn zone_schema() -> EntitySchema {
    EntitySchema::builder("Zone")
        .table("Zones")
        .field(FieldDef::new("Id", FieldKind::Int).with_default(FieldDefault::Autoincrement))
        .field(FieldDef::new("MonitorId", FieldKind::Int))
        .field(FieldDef::new("Name", FieldKind::Text))
        .primary_key(["Id"])
        .unique(["MonitorId", "Name"])
        .build()
        .unwrap()
}

fn rate_schema() -> EntitySchema {
    EntitySchema::builder("Rate")
        .table("Rates")
        .field(FieldDef::new("Id", FieldKind::Int).with_default(FieldDefault::Autoincrement))
        .field(FieldDef::new(
            "Price",
            FieldKind::Decimal {
                precision: 6,
                scale: 2,
            },
        ))
        .primary_key(["Id"])
        .unique(["Price"])
        .build()
        .unwrap()
}

fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(monitor_schema())
        .unwrap()
        .with(zone_schema())
        .unwrap()
        .with(rate_schema())
        .unwrap()
}

async fn sqlite_engine() -> Engine {
    let store = SqliteStore::connect("sqlite::memory:", 1, Duration::from_secs(5))
        .await
        .unwrap();
    let engine = Engine::new(registry(), Arc::new(store));
    engine.sync().await.unwrap();
    engine
}

async fn memory_engine() -> Engine {
    let engine = Engine::new(registry(), Arc::new(MemoryStore::new()));
    engine.sync().await.unwrap();
    engine
}

async fn seed_monitors(engine: &Engine) -> EntityService {
    let monitors = engine.entity("Monitor").unwrap();
    let rows = [
        ("Front Door", Some(Decimal::new(1500, 2)), Some("porch")),
        ("back door", Some(Decimal::new(250, 2)), None),
        ("Garage", None, Some("")),
        ("Driveway", Some(Decimal::new(30, 0)), Some("DOOR side")),
    ];
    for (name, fps, notes) in rows {
        monitors
            .create(
                &CreateInput::new()
                    .set("Name", name)
                    .set("MaxFPS", fps)
                    .set("Notes", notes),
            )
            .await
            .unwrap();
    }
    monitors
}

async fn names(service: &EntityService, filter: Filter) -> Vec<String> {
    let args = FindManyArgs::new()
        .filter(filter)
        .order_by(SortSpec::new().then(SortField::asc("Name")));
    service
        .find_many(&args)
        .await
        .unwrap()
        .map(|r: Record| r.get("Name").as_text().unwrap_or_default().to_string())
        .collect()
}

// ============================================================================
// Filter parity
// ============================================================================

#[tokio::test]
async fn test_filters_match_memory_store() {
    let sqlite = seed_monitors(&sqlite_engine().await).await;
    let memory = seed_monitors(&memory_engine().await).await;

    let filters = vec![
        Filter::equals("Name", "Garage"),
        Filter::condition("Name", Operator::Contains("door".into())),
        Filter::condition("Name", Operator::Contains("door".into())).insensitive(),
        Filter::condition("Name", Operator::StartsWith("D".into())),
        Filter::condition("Name", Operator::EndsWith("door".into())),
        Filter::condition("Notes", Operator::Contains(String::new())),
        Filter::condition("Notes", Operator::Not(Value::from("porch"))),
        Filter::condition("MaxFPS", Operator::Gt(Value::Decimal(Decimal::new(5, 0)))),
        Filter::condition("MaxFPS", Operator::IsNull),
        Filter::not([Filter::condition("MaxFPS", Operator::Lt(Value::Decimal(Decimal::TEN)))]),
        Filter::or([
            Filter::condition("Notes", Operator::Contains("door".into())).insensitive(),
            Filter::equals("Name", "Garage"),
        ]),
        Filter::and([
            Filter::condition("Name", Operator::Contains("o".into())),
            Filter::condition("MaxFPS", Operator::Gte(Value::Decimal(Decimal::new(250, 2)))),
        ]),
        Filter::condition(
            "Name",
            Operator::In(vec![Value::from("Garage"), Value::from("Driveway")]),
        ),
        Filter::condition("Id", Operator::NotIn(vec![Value::from(1), Value::from(2)])),
    ];

    for filter in filters {
        assert_eq!(
            names(&sqlite, filter.clone()).await,
            names(&memory, filter.clone()).await,
            "filter {filter:?}"
        );
    }
}

#[tokio::test]
async fn test_insensitive_contains_falls_back_to_evaluator() {
    let monitors = seed_monitors(&sqlite_engine().await).await;
    let found = names(
        &monitors,
        Filter::condition("Name", Operator::Contains("DOOR".into())).insensitive(),
    )
    .await;
    assert_eq!(found, vec!["Front Door", "back door"]);
}

// ============================================================================
// Values and defaults
// ============================================================================

#[tokio::test]
async fn test_values_round_trip() {
    let engine = sqlite_engine().await;
    let monitors = engine.entity("Monitor").unwrap();
    let seen = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();

    let created = monitors
        .create(
            &CreateInput::new()
                .set("Name", "Lobby")
                .set("MaxFPS", Decimal::new(99999, 2))
                .set("LastSeen", seen),
        )
        .await
        .unwrap();
    assert_eq!(created.get("Id"), &Value::Int(1));
    assert_eq!(created.get("Enabled"), &Value::Bool(true));
    assert_eq!(created.get("Notes"), &Value::Null);

    let found = monitors
        .find_unique_or_throw(&UniqueSelector::field("Name", "Lobby"))
        .await
        .unwrap();
    assert_eq!(found.get("MaxFPS"), &Value::Decimal(Decimal::new(99999, 2)));
    assert_eq!(found.get("LastSeen"), &Value::Timestamp(seen));
}

#[tokio::test]
async fn test_decimal_scale_does_not_split_unique_keys() {
    for engine in [sqlite_engine().await, memory_engine().await] {
        let rates = engine.entity("Rate").unwrap();
        let created = rates
            .create(&CreateInput::new().set("Price", "1.5"))
            .await
            .unwrap();
        assert_eq!(created.get("Price").to_json(), serde_json::json!("1.50"));

        let err = rates
            .create(&CreateInput::new().set("Price", "1.50"))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            QueryError::Conflict { ref entity, ref target, .. }
                if entity == "Rate" && target == "Price"
        );
        assert_eq!(rates.count(&FindManyArgs::new()).await.unwrap(), 1);

        let found = rates
            .find_unique(&UniqueSelector::field("Price", "1.5"))
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.get("Id").clone()), Some(Value::Int(1)));
    }
}

#[tokio::test]
async fn test_timestamps_keep_microseconds() {
    let at_micros = DateTime::from_timestamp(1_714_566_615, 123_456_000).unwrap();
    let at_nanos = DateTime::from_timestamp(1_714_566_615, 123_456_789).unwrap();

    for engine in [sqlite_engine().await, memory_engine().await] {
        let monitors = engine.entity("Monitor").unwrap();
        let err = monitors
            .create(&CreateInput::new().set("Name", "Lobby").set("LastSeen", at_nanos))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            QueryError::Validation(ref e)
                if e.kind == ValidationKind::InvalidValue && e.field.as_deref() == Some("LastSeen")
        );

        monitors
            .create(&CreateInput::new().set("Name", "Lobby").set("LastSeen", at_micros))
            .await
            .unwrap();
        let found = monitors
            .find_unique_or_throw(&UniqueSelector::field("Name", "Lobby"))
            .await
            .unwrap();
        assert_eq!(found.get("LastSeen"), &Value::Timestamp(at_micros));
    }
}

#[tokio::test]
async fn test_autoincrement_keeps_counting() {
    let engine = sqlite_engine().await;
    let zones = engine.entity("Zone").unwrap();
    for name in ["a", "b", "c"] {
        zones
            .create(&CreateInput::new().set("MonitorId", 1).set("Name", name))
            .await
            .unwrap();
    }
    let ids: Vec<Value> = zones
        .find_many(&FindManyArgs::new())
        .await
        .unwrap()
        .map(|r| r.get("Id").clone())
        .collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

// ============================================================================
// Conflicts and atomicity
// ============================================================================

#[tokio::test]
async fn test_unique_violation_names_the_key() {
    let engine = sqlite_engine().await;
    let zones = engine.entity("Zone").unwrap();
    let zone = CreateInput::new().set("MonitorId", 1).set("Name", "All");
    zones.create(&zone).await.unwrap();

    let err = zones.create(&zone).await.unwrap_err();
    assert_matches!(
        err,
        QueryError::Conflict { ref entity, ref target, .. }
            if entity == "Zone" && target == "MonitorId_Name"
    );
}

#[tokio::test]
async fn test_create_many_skips_duplicates() {
    let engine = sqlite_engine().await;
    let zones = engine.entity("Zone").unwrap();
    let batch = vec![
        CreateInput::new().set("MonitorId", 1).set("Name", "All"),
        CreateInput::new().set("MonitorId", 1).set("Name", "All"),
        CreateInput::new().set("MonitorId", 2).set("Name", "All"),
    ];

    let result = zones.create_many(&batch, true).await.unwrap();
    assert_eq!(result.count, 2);

    let err = zones.create_many(&batch, false).await.unwrap_err();
    assert_matches!(err, QueryError::Conflict { .. });
    assert_eq!(zones.count(&FindManyArgs::new()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_update_many_rolls_back_on_conflict() {
    let engine = sqlite_engine().await;
    let monitors = seed_monitors(&engine).await;

    // Every row renamed to the same name: the second write conflicts.
    let err = monitors
        .update_many(&Filter::all(), &UpdateInput::new().set("Name", "Same"))
        .await
        .unwrap_err();
    assert_matches!(err, QueryError::Conflict { ref target, .. } if target == "Name");

    assert_eq!(
        names(&monitors, Filter::all()).await,
        vec!["Driveway", "Front Door", "Garage", "back door"]
    );
}

#[tokio::test]
async fn test_update_many_matches_memory_store() {
    let sqlite = seed_monitors(&sqlite_engine().await).await;
    let memory = seed_monitors(&memory_engine().await).await;

    let updates = [
        // plain sets under an exact filter
        (
            Filter::condition("Name", Operator::Contains("oo".into())),
            UpdateInput::new().set("Enabled", false).set("MaxFPS", "7.5"),
            2,
        ),
        // plain sets under a filter evaluated in-process
        (
            Filter::condition("MaxFPS", Operator::Gt(Value::Decimal(Decimal::new(10, 0)))),
            UpdateInput::new().set("Notes", Value::Null),
            1,
        ),
        // arithmetic
        (
            Filter::condition("Name", Operator::StartsWith("D".into())),
            UpdateInput::new().increment("MaxFPS", Decimal::new(25, 1)),
            1,
        ),
        (
            Filter::condition("Name", Operator::Equals("Nobody".into())),
            UpdateInput::new().set("Notes", "unused"),
            0,
        ),
    ];
    for (filter, update, expected) in updates {
        let on_sqlite = sqlite.update_many(&filter, &update).await.unwrap();
        let on_memory = memory.update_many(&filter, &update).await.unwrap();
        assert_eq!(on_sqlite.count, expected, "filter {filter:?}");
        assert_eq!(on_memory.count, expected, "filter {filter:?}");
    }

    let all = FindManyArgs::new().order_by(SortSpec::new().then(SortField::asc("Id")));
    let from_sqlite: Vec<Record> = sqlite.find_many(&all).await.unwrap().collect();
    let from_memory: Vec<Record> = memory.find_many(&all).await.unwrap().collect();
    assert_eq!(from_sqlite, from_memory);

    let front = sqlite
        .find_unique_or_throw(&UniqueSelector::field("Name", "Front Door"))
        .await
        .unwrap();
    assert_eq!(front.get("Enabled"), &Value::Bool(false));
    assert_eq!(front.get("MaxFPS"), &Value::Decimal(Decimal::new(750, 2)));
    let driveway = sqlite
        .find_unique_or_throw(&UniqueSelector::field("Name", "Driveway"))
        .await
        .unwrap();
    assert_eq!(driveway.get("MaxFPS"), &Value::Decimal(Decimal::new(3250, 2)));
    assert_eq!(driveway.get("Notes"), &Value::Null);
}

#[tokio::test]
async fn test_delete_many_with_and_without_pushdown() {
    let engine = sqlite_engine().await;
    let monitors = seed_monitors(&engine).await;

    let exact = monitors
        .delete_many(&Filter::equals("Name", "Garage"))
        .await
        .unwrap();
    assert_eq!(exact.count, 1);

    let fallback = monitors
        .delete_many(&Filter::condition("Name", Operator::EndsWith("DOOR".into())).insensitive())
        .await
        .unwrap();
    assert_eq!(fallback.count, 2);

    assert_eq!(names(&monitors, Filter::all()).await, vec!["Driveway"]);
}

// ============================================================================
// Schema sync
// ============================================================================

#[tokio::test]
async fn test_sync_adds_missing_columns() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("events.db").display());

    let v1 = EntitySchema::builder("Event")
        .table("Events")
        .field(FieldDef::new("Id", FieldKind::Int).with_default(FieldDefault::Autoincrement))
        .field(FieldDef::new("Name", FieldKind::Text))
        .primary_key(["Id"])
        .build()
        .unwrap();
    let v2 = EntitySchema::builder("Event")
        .table("Events")
        .field(FieldDef::new("Id", FieldKind::Int).with_default(FieldDefault::Autoincrement))
        .field(FieldDef::new("Name", FieldKind::Text))
        .field(FieldDef::new("Archived", FieldKind::Boolean).with_default(FieldDefault::Literal(Value::Bool(false))))
        .field(FieldDef::new("Frames", FieldKind::Int))
        .field(FieldDef::new("Cause", FieldKind::Text).nullable())
        .primary_key(["Id"])
        .build()
        .unwrap();

    {
        let store = SqliteStore::connect(&url, 2, Duration::from_secs(5)).await.unwrap();
        store.sync_schema(&v1).await.unwrap();
        store
            .create(&v1, Record::new().with("Name", "first"))
            .await
            .unwrap();
        store.pool().close().await;
    }

    let store = SqliteStore::connect(&url, 2, Duration::from_secs(5)).await.unwrap();
    store.sync_schema(&v2).await.unwrap();
    // a second sync is a no-op
    store.sync_schema(&v2).await.unwrap();

    let rows = store.fetch(&v2, &Filter::all()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("Name"), &Value::from("first"));
    assert_eq!(rows[0].get("Archived"), &Value::Bool(false));
    assert_eq!(rows[0].get("Frames"), &Value::Int(0));
    assert_eq!(rows[0].get("Cause"), &Value::Null);
}
