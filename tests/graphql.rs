//! GraphQL adapter tests
//!
//! Operations go through `graphql::build_schema` against the in-memory
//! store: reads on the query root, writes on the mutation root, engine
//! errors as extensions.

use std::sync::Arc;

use async_graphql::{Request, Variables};
use pretty_assertions::assert_eq;
use serde_json::{Value as Json, json};

use entity_query::Engine;
use entity_query::graphql::{QuerySchema, build_schema};
use entity_query::schema::SchemaRegistry;
use entity_query::store::MemoryStore;

const SCHEMA: &str = r#"
entities:
  - name: Zone
    table: Zones
    fields:
      - { name: Id, kind: { type: int }, default: { kind: autoincrement } }
      - { name: MonitorId, kind: { type: int } }
      - { name: Name, kind: { type: text } }
    primary_key: [Id]
    unique:
      - { fields: [MonitorId, Name] }

  - name: Monitor
    table: Monitors
    fields:
      - { name: Id, kind: { type: int }, default: { kind: autoincrement } }
      - { name: Name, kind: { type: text } }
    primary_key: [Id]
"#;

const QUERY: &str = r#"
query Run($entity: String!, $operation: String!, $args: JSON) {
  execute(entity: $entity, operation: $operation, args: $args)
}
"#;

const MUTATION: &str = r#"
mutation Run($entity: String!, $operation: String!, $args: JSON) {
  execute(entity: $entity, operation: $operation, args: $args)
}
"#;

async fn schema() -> QuerySchema {
    let engine = Engine::new(
        SchemaRegistry::from_yaml_str(SCHEMA).unwrap(),
        Arc::new(MemoryStore::new()),
    );
    engine.sync().await.unwrap();
    build_schema(engine)
}

/// Run `document` and return the serialized response.
async fn run(schema: &QuerySchema, document: &str, operation: &str, args: Json) -> Json {
    let request = Request::new(document).variables(Variables::from_json(json!({
        "entity": "Zone",
        "operation": operation,
        "args": args,
    })));
    serde_json::to_value(schema.execute(request).await).unwrap()
}

fn data(response: Json) -> Json {
    assert!(response.get("errors").is_none(), "unexpected errors: {response}");
    response["data"]["execute"].clone()
}

#[tokio::test]
async fn test_writes_then_reads() {
    let schema = schema().await;
    let created = data(
        run(
            &schema,
            MUTATION,
            "createMany",
            json!({"data": [
                {"MonitorId": 1, "Name": "All"},
                {"MonitorId": 1, "Name": "Door"},
                {"MonitorId": 2, "Name": "All"}
            ]}),
        )
        .await,
    );
    assert_eq!(created, json!({"count": 3}));

    let rows = data(
        run(
            &schema,
            QUERY,
            "findMany",
            json!({"where": {"Name": "All"}, "orderBy": [{"MonitorId": "desc"}]}),
        )
        .await,
    );
    assert_eq!(
        rows,
        json!([
            {"Id": 3, "MonitorId": 2, "Name": "All"},
            {"Id": 1, "MonitorId": 1, "Name": "All"}
        ])
    );

    let count = data(run(&schema, QUERY, "count", Json::Null).await);
    assert_eq!(count, json!(3));

    let response = schema.execute("{ entities }").await;
    assert_eq!(
        response.data.into_json().unwrap(),
        json!({"entities": ["Monitor", "Zone"]})
    );
}

#[tokio::test]
async fn test_operations_stay_on_their_root() {
    let schema = schema().await;

    let write_on_query = run(&schema, QUERY, "deleteMany", json!({})).await;
    let extensions = &write_on_query["errors"][0]["extensions"];
    assert_eq!(extensions["kind"], "Validation");
    assert_eq!(extensions["reason"], "invalidValue");
    assert_eq!(extensions["field"], "operation");
    assert_eq!(extensions["entity"], "Zone");

    let read_on_mutation = run(&schema, MUTATION, "findMany", json!({})).await;
    assert_eq!(read_on_mutation["errors"][0]["extensions"]["field"], "operation");
}

#[tokio::test]
async fn test_engine_errors_become_extensions() {
    let schema = schema().await;
    data(
        run(
            &schema,
            MUTATION,
            "create",
            json!({"data": {"MonitorId": 1, "Name": "All"}}),
        )
        .await,
    );

    let conflict = run(
        &schema,
        MUTATION,
        "create",
        json!({"data": {"MonitorId": 1, "Name": "All"}}),
    )
    .await;
    let extensions = &conflict["errors"][0]["extensions"];
    assert_eq!(extensions["kind"], "Conflict");
    assert_eq!(extensions["key"], "MonitorId_Name");
    assert!(extensions.get("operator").is_none());

    let missing = run(
        &schema,
        QUERY,
        "findUniqueOrThrow",
        json!({"where": {"Id": 42}}),
    )
    .await;
    assert_eq!(missing["errors"][0]["extensions"]["kind"], "NotFound");
    assert_eq!(missing["data"], Json::Null);

    let bad_args = run(&schema, QUERY, "findMany", json!([1, 2])).await;
    assert_eq!(bad_args["errors"][0]["extensions"]["field"], "args");
}
