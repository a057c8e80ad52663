//! API boundary
//!
//! Request envelopes are JSON objects:
//!
//! ```json
//! {"entity": "ControlPreset", "operation": "findUnique",
//!  "args": {"where": {"MonitorId_Preset": {"MonitorId": 1, "Preset": 2}}}}
//! ```
//!
//! and every response is either `{"data": ..}` or `{"error": {..}}`.

pub mod decode;
pub mod encode;

use serde_json::{Map, Value as Json, json};
use tracing::debug;

use crate::error::{QueryError, ValidationError, ValidationKind};
use crate::query::{AggregateArgs, Filter};
use crate::service::{Engine, EntityService};
use crate::value::Record;

/// Run one request envelope and encode the outcome.
pub async fn dispatch(engine: &Engine, request: &Json) -> Json {
    match handle(engine, request).await {
        Ok(data) => json!({ "data": data }),
        Err(err) => {
            debug!(kind = err.kind(), error = %err, "Request failed");
            json!({ "error": encode::error(&err) })
        }
    }
}

/// [`dispatch`] for one line of JSON text.
pub async fn dispatch_line(engine: &Engine, line: &str) -> String {
    let response = match serde_json::from_str::<Json>(line) {
        Ok(request) => dispatch(engine, &request).await,
        Err(e) => {
            let err = QueryError::Validation(ValidationError::invalid_value("request", e));
            json!({ "error": encode::error(&err) })
        }
    };
    response.to_string()
}

/// Run one request envelope.
pub async fn handle(engine: &Engine, request: &Json) -> Result<Json, QueryError> {
    let envelope = decode::object(request, "request")?;
    let entity = envelope
        .get("entity")
        .and_then(Json::as_str)
        .ok_or_else(|| ValidationError::missing_field("entity"))?;
    let operation = envelope
        .get("operation")
        .and_then(Json::as_str)
        .ok_or_else(|| ValidationError::missing_field("operation"))?;
    let empty = Map::new();
    let args = match envelope.get("args") {
        None | Some(Json::Null) => &empty,
        Some(args) => decode::object(args, "args")?,
    };

    execute(engine, entity, operation, args).await
}

/// Operations that never write.
pub const READ_OPERATIONS: &[&str] = &[
    "findUnique",
    "findUniqueOrThrow",
    "findFirst",
    "findMany",
    "count",
    "aggregate",
    "groupBy",
];

/// Run `operation` on `entity` with already unwrapped arguments.
pub async fn execute(
    engine: &Engine,
    entity: &str,
    operation: &str,
    args: &Map<String, Json>,
) -> Result<Json, QueryError> {
    let service = engine.entity(entity)?;
    run(&service, operation, args).await.map_err(|err| match err {
        QueryError::Validation(e) => QueryError::Validation(e.with_entity(entity)),
        other => other,
    })
}

fn required<'a>(args: &'a Map<String, Json>, name: &str) -> Result<&'a Json, ValidationError> {
    args.get(name)
        .ok_or_else(|| ValidationError::missing_field(name))
}

fn filter_arg(args: &Map<String, Json>) -> Result<Filter, ValidationError> {
    Ok(args
        .get("where")
        .map(decode::filter)
        .transpose()?
        .unwrap_or_default())
}

async fn run(
    service: &EntityService,
    operation: &str,
    args: &Map<String, Json>,
) -> Result<Json, QueryError> {
    let optional = |record: Option<Record>| {
        record.as_ref().map_or(Json::Null, encode::record)
    };

    Ok(match operation {
        "create" => {
            let data = decode::create(required(args, "data")?)?;
            encode::record(&service.create(&data).await?)
        }
        "createMany" => {
            let data = required(args, "data")?
                .as_array()
                .ok_or_else(|| ValidationError::invalid_value("data", "expected a list"))?
                .iter()
                .map(decode::create)
                .collect::<Result<Vec<_>, _>>()?;
            let skip_duplicates = args
                .get("skipDuplicates")
                .and_then(Json::as_bool)
                .unwrap_or(false);
            let result = service.create_many(&data, skip_duplicates).await?;
            json!({ "count": result.count })
        }
        "findUnique" => {
            let selector = decode::unique(required(args, "where")?)?;
            optional(service.find_unique(&selector).await?)
        }
        "findUniqueOrThrow" => {
            let selector = decode::unique(required(args, "where")?)?;
            encode::record(&service.find_unique_or_throw(&selector).await?)
        }
        "findFirst" => optional(service.find_first(&decode::find_many(args)?).await?),
        "findMany" => {
            let rows = service.find_many(&decode::find_many(args)?).await?;
            Json::Array(rows.map(|r| encode::record(&r)).collect())
        }
        "count" => Json::from(service.count(&decode::find_many(args)?).await?),
        "aggregate" => {
            let args = AggregateArgs {
                window: decode::find_many(args)?,
                request: decode::aggregates(args)?,
            };
            Json::Object(encode::aggregates(&service.aggregate(&args).await?))
        }
        "groupBy" => {
            let spec = decode::group_by(args)?;
            let groups = service.group_by(&spec).await?;
            Json::Array(groups.iter().map(encode::group_row).collect())
        }
        "update" => {
            let selector = decode::unique(required(args, "where")?)?;
            let data = decode::update(required(args, "data")?)?;
            encode::record(&service.update(&selector, &data).await?)
        }
        "updateMany" => {
            let data = decode::update(required(args, "data")?)?;
            let result = service.update_many(&filter_arg(args)?, &data).await?;
            json!({ "count": result.count })
        }
        "upsert" => {
            let selector = decode::unique(required(args, "where")?)?;
            let create = decode::create(required(args, "create")?)?;
            let update = decode::update(required(args, "update")?)?;
            encode::record(&service.upsert(&selector, &create, &update).await?)
        }
        "delete" => {
            let selector = decode::unique(required(args, "where")?)?;
            encode::record(&service.delete(&selector).await?)
        }
        "deleteMany" => {
            let result = service.delete_many(&filter_arg(args)?).await?;
            json!({ "count": result.count })
        }
        other => {
            return Err(ValidationError::new(
                ValidationKind::InvalidValue,
                format!("unknown operation `{other}`"),
            )
            .with_field("operation")
            .into());
        }
    })
}
