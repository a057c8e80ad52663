//! JSON result encoding

use serde_json::{Map, Value as Json, json};

use crate::error::QueryError;
use crate::query::{Aggregates, GroupRow};
use crate::value::Record;

pub fn record(record: &Record) -> Json {
    Json::Object(
        record
            .iter()
            .map(|(field, value)| (field.to_string(), value.to_json()))
            .collect(),
    )
}

/// Only the requested aggregates appear, grouped by function:
/// `{"_count": {"_all": 3}, "_avg": {"Score": "2.5"}}`.
pub fn aggregates(aggregates: &Aggregates) -> Map<String, Json> {
    let mut out = Map::new();

    let mut count = Map::new();
    if let Some(all) = aggregates.count_all {
        count.insert("_all".to_string(), Json::from(all));
    }
    for (field, n) in &aggregates.count {
        count.insert(field.clone(), Json::from(*n));
    }
    if !count.is_empty() {
        out.insert("_count".to_string(), Json::Object(count));
    }

    for (name, values) in [
        ("_avg", &aggregates.avg),
        ("_sum", &aggregates.sum),
        ("_min", &aggregates.min),
        ("_max", &aggregates.max),
    ] {
        if !values.is_empty() {
            let values = values
                .iter()
                .map(|(field, value)| (field.clone(), value.to_json()))
                .collect();
            out.insert(name.to_string(), Json::Object(values));
        }
    }
    out
}

/// Group-by values flattened next to the aggregate objects.
pub fn group_row(row: &GroupRow) -> Json {
    let mut out = aggregates(&row.aggregates);
    for (field, value) in row.keys.iter() {
        out.insert(field.to_string(), value.to_json());
    }
    Json::Object(out)
}

/// Structured error payload. Absent details are null.
pub fn error(err: &QueryError) -> Json {
    let (reason, field, operator, key) = match err {
        QueryError::Validation(e) => (Some(e.kind.as_str()), e.field.as_deref(), e.operator, None),
        QueryError::NotFound { key, .. } => (None, None, None, Some(key.as_str())),
        QueryError::Conflict { target, .. } => (None, None, None, Some(target.as_str())),
        QueryError::StoreUnavailable { .. } | QueryError::Store { .. } => (None, None, None, None),
    };
    let message = match err {
        QueryError::Validation(e) => e.message.clone(),
        other => other.to_string(),
    };
    json!({
        "kind": err.kind(),
        "reason": reason,
        "entity": err.entity(),
        "field": field,
        "operator": operator,
        "key": key,
        "message": message,
    })
}
