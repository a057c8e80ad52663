//! GraphQL adapter
//!
//! Exposes the engine as one `execute` field on each root. Queries accept
//! the read operations and mutations the write operations; `args` takes the
//! same JSON argument object as a request envelope and the result is the
//! envelope's `data`. Failures carry the structured error payload as
//! extensions (`kind`, `reason`, `entity`, `field`, `operator`, `key`).

use async_graphql::{Context, EmptySubscription, ErrorExtensions, Json, Object, Result, Schema};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::error::{QueryError, ValidationError};
use crate::service::Engine;
use crate::wire;

/// The GraphQL schema type
pub type QuerySchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Build the GraphQL schema over `engine`
pub fn build_schema(engine: Engine) -> QuerySchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(engine)
        .finish()
}

/// Convert an engine error into a GraphQL error with the payload fields as
/// extensions. Null details are left out.
pub fn to_graphql_error(err: &QueryError) -> async_graphql::Error {
    let payload = wire::encode::error(err);
    let message = payload
        .get("message")
        .and_then(JsonValue::as_str)
        .map_or_else(|| err.to_string(), str::to_string);
    async_graphql::Error::new(message).extend_with(|_, e| {
        let JsonValue::Object(fields) = payload else {
            return;
        };
        for (name, value) in fields {
            if name == "message" || value.is_null() {
                continue;
            }
            if let Ok(value) = async_graphql::Value::from_json(value) {
                e.set(name, value);
            }
        }
    })
}

/// Extension trait to get the engine from GraphQL context
trait EngineExt {
    fn engine(&self) -> Result<&Engine>;
}

impl<'a> EngineExt for Context<'a> {
    fn engine(&self) -> Result<&Engine> {
        self.data_opt::<Engine>().ok_or_else(|| {
            async_graphql::Error::new("Engine is not attached to the schema")
                .extend_with(|_, e| e.set("kind", "Store"))
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Root {
    Query,
    Mutation,
}

impl Root {
    fn name(self) -> &'static str {
        match self {
            Root::Query => "query",
            Root::Mutation => "mutation",
        }
    }

    fn allows(self, operation: &str) -> bool {
        let reads = wire::READ_OPERATIONS.contains(&operation);
        match self {
            Root::Query => reads,
            Root::Mutation => !reads,
        }
    }
}

async fn resolve(
    ctx: &Context<'_>,
    root: Root,
    entity: &str,
    operation: &str,
    args: Option<Json<JsonValue>>,
) -> Result<Json<JsonValue>> {
    let engine = ctx.engine()?;
    if !root.allows(operation) {
        let err = ValidationError::invalid_value(
            "operation",
            format!("`{operation}` is not a {} operation", root.name()),
        )
        .with_entity(entity);
        return Err(to_graphql_error(&QueryError::from(err)));
    }

    let args = match args.map(|Json(args)| args) {
        None | Some(JsonValue::Null) => Map::new(),
        Some(JsonValue::Object(args)) => args,
        Some(_) => {
            let err = ValidationError::invalid_value("args", "expected an object")
                .with_entity(entity);
            return Err(to_graphql_error(&QueryError::from(err)));
        }
    };

    debug!(entity, operation, root = root.name(), "GraphQL request");
    wire::execute(engine, entity, operation, &args)
        .await
        .map(Json)
        .map_err(|e| to_graphql_error(&e))
}

// ============================================================================
// Query Root
// ============================================================================

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Run a read operation (`findUnique`, `findMany`, `count`, `aggregate`,
    /// `groupBy`, ..) on an entity
    async fn execute(
        &self,
        ctx: &Context<'_>,
        entity: String,
        operation: String,
        args: Option<Json<JsonValue>>,
    ) -> Result<Json<JsonValue>> {
        resolve(ctx, Root::Query, &entity, &operation, args).await
    }

    /// Names of the registered entities
    async fn entities(&self, ctx: &Context<'_>) -> Result<Vec<String>> {
        Ok(ctx.engine()?.entity_names())
    }
}

// ============================================================================
// Mutation Root
// ============================================================================

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Run a write operation (`create`, `updateMany`, `upsert`, `delete`, ..)
    /// on an entity
    async fn execute(
        &self,
        ctx: &Context<'_>,
        entity: String,
        operation: String,
        args: Option<Json<JsonValue>>,
    ) -> Result<Json<JsonValue>> {
        resolve(ctx, Root::Mutation, &entity, &operation, args).await
    }
}
