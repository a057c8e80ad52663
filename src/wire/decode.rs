//! JSON argument decoding
//!
//! Turns Prisma-shaped JSON arguments into query values. Decoding only checks
//! shape; field names, operators and value types are validated later against
//! the entity schema.

use serde_json::{Map, Value as Json};

use crate::error::{ValidationError, ValidationKind};
use crate::query::{
    AggregateFn, AggregateRequest, AggregateTarget, Condition, CreateInput, FieldUpdate, Filter,
    FindManyArgs, GroupOrder, GroupSpec, GroupTarget, Having, HavingCondition, NullsOrder,
    Operator, PageRequest, QueryMode, SortField, SortOrder, SortSpec, UniqueSelector, UpdateInput,
};
use crate::value::Value;

type Result<T> = std::result::Result<T, ValidationError>;

fn shape(at: &str, message: impl std::fmt::Display) -> ValidationError {
    ValidationError::invalid_value(at, message)
}

pub(crate) fn object<'a>(json: &'a Json, at: &str) -> Result<&'a Map<String, Json>> {
    json.as_object()
        .ok_or_else(|| shape(at, format!("expected an object, got {json}")))
}

fn list<'a>(json: &'a Json, at: &str) -> Result<&'a Vec<Json>> {
    json.as_array()
        .ok_or_else(|| shape(at, format!("expected a list, got {json}")))
}

fn scalar(json: &Json, at: &str) -> Result<Value> {
    Value::from_json(json).map_err(|e| shape(at, e))
}

fn text(json: &Json, at: &str) -> Result<String> {
    json.as_str()
        .map(str::to_string)
        .ok_or_else(|| shape(at, format!("expected a string, got {json}")))
}

/// A list, or a single item standing for a list of one.
fn one_or_many(json: &Json) -> Vec<&Json> {
    match json {
        Json::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn field_names(json: &Json, at: &str) -> Result<Vec<String>> {
    one_or_many(json).into_iter().map(|f| text(f, at)).collect()
}

// ============================================================================
// Filters
// ============================================================================

/// Decode a `where` object. Sibling keys are ANDed.
pub fn filter(json: &Json) -> Result<Filter> {
    let map = object(json, "where")?;
    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "AND" => parts.push(Filter::And(children(value, filter)?)),
            "OR" => parts.push(Filter::Or(
                list(value, "OR")?.iter().map(filter).collect::<Result<_>>()?,
            )),
            "NOT" => parts.push(Filter::Not(children(value, filter)?)),
            field => parts.extend(field_filter(field, value)?),
        }
    }
    Ok(Filter::And(parts))
}

fn children<T>(json: &Json, decode: impl Fn(&Json) -> Result<T>) -> Result<Vec<T>> {
    one_or_many(json).into_iter().map(decode).collect()
}

fn field_filter(field: &str, json: &Json) -> Result<Vec<Filter>> {
    let (ops, mode) = match json {
        Json::Object(map) => operators(field, map)?,
        Json::Null => (vec![Operator::IsNull], QueryMode::Default),
        other => (vec![Operator::Equals(scalar(other, field)?)], QueryMode::Default),
    };
    Ok(ops
        .into_iter()
        .map(|op| {
            Filter::Condition(Condition {
                field: field.to_string(),
                op,
                mode,
            })
        })
        .collect())
}

/// Decode an operator object such as `{"gt": 1, "lte": 5}`.
fn operators(target: &str, map: &Map<String, Json>) -> Result<(Vec<Operator>, QueryMode)> {
    let mut mode = QueryMode::Default;
    let mut ops = Vec::with_capacity(map.len());
    for (name, value) in map {
        let op = match name.as_str() {
            "mode" => {
                mode = match value.as_str() {
                    Some("default") => QueryMode::Default,
                    Some("insensitive") => QueryMode::Insensitive,
                    _ => return Err(shape(target, format!("unknown mode {value}"))),
                };
                continue;
            }
            "equals" if value.is_null() => Operator::IsNull,
            "not" if value.is_null() => Operator::IsNotNull,
            "equals" => Operator::Equals(scalar(value, target)?),
            "not" => Operator::Not(scalar(value, target)?),
            "in" => Operator::In(scalars(value, target)?),
            "notIn" => Operator::NotIn(scalars(value, target)?),
            "lt" => Operator::Lt(scalar(value, target)?),
            "lte" => Operator::Lte(scalar(value, target)?),
            "gt" => Operator::Gt(scalar(value, target)?),
            "gte" => Operator::Gte(scalar(value, target)?),
            "contains" => Operator::Contains(text(value, target)?),
            "startsWith" => Operator::StartsWith(text(value, target)?),
            "endsWith" => Operator::EndsWith(text(value, target)?),
            "isNull" => match value.as_bool() {
                Some(true) => Operator::IsNull,
                Some(false) => Operator::IsNotNull,
                None => return Err(shape(target, "isNull takes a boolean")),
            },
            other => {
                return Err(shape(target, format!("unknown operator `{other}`")));
            }
        };
        ops.push(op);
    }
    Ok((ops, mode))
}

fn scalars(json: &Json, at: &str) -> Result<Vec<Value>> {
    list(json, at)?.iter().map(|v| scalar(v, at)).collect()
}

// ============================================================================
// Selectors, ordering, paging
// ============================================================================

/// `{"Id": 5}` or `{"MonitorId_Preset": {"MonitorId": 1, "Preset": 2}}`.
pub fn unique(json: &Json) -> Result<UniqueSelector> {
    let map = object(json, "where")?;
    let mut entries = map.iter();
    let (Some((key, value)), None) = (entries.next(), entries.next()) else {
        return Err(ValidationError::new(
            ValidationKind::PartialKey,
            "a unique selector names exactly one key",
        ));
    };
    match value {
        Json::Object(values) => {
            let values = values
                .iter()
                .map(|(field, v)| Ok((field.clone(), scalar(v, field)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(UniqueSelector::compound(key.clone(), values))
        }
        other => Ok(UniqueSelector::field(key.clone(), scalar(other, key)?)),
    }
}

fn sort_order(json: &Json, at: &str) -> Result<SortOrder> {
    match json.as_str() {
        Some("asc") => Ok(SortOrder::Asc),
        Some("desc") => Ok(SortOrder::Desc),
        _ => Err(ValidationError::new(
            ValidationKind::InvalidOrder,
            format!("sort direction must be \"asc\" or \"desc\", got {json}"),
        )
        .with_field(at)),
    }
}

/// `"asc"`, `"desc"` or `{"sort": .., "nulls": "first" | "last"}`.
fn direction(json: &Json, at: &str) -> Result<(SortOrder, Option<NullsOrder>)> {
    let Json::Object(map) = json else {
        return Ok((sort_order(json, at)?, None));
    };
    let order = sort_order(map.get("sort").unwrap_or(&Json::Null), at)?;
    let nulls = match map.get("nulls").and_then(Json::as_str) {
        None => None,
        Some("first") => Some(NullsOrder::First),
        Some("last") => Some(NullsOrder::Last),
        Some(other) => return Err(shape(at, format!("unknown nulls placement `{other}`"))),
    };
    Ok((order, nulls))
}

/// Each orderBy object holds one entry; several keys go in a list so their
/// precedence is explicit.
fn single_entry<'a>(json: &'a Json) -> Result<(&'a String, &'a Json)> {
    let map = object(json, "orderBy")?;
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        _ => Err(ValidationError::new(
            ValidationKind::InvalidOrder,
            "each orderBy object takes exactly one entry; use a list for several",
        )),
    }
}

pub fn sort(json: &Json) -> Result<SortSpec> {
    one_or_many(json)
        .into_iter()
        .map(|entry| {
            let (field, value) = single_entry(entry)?;
            let (order, nulls) = direction(value, field)?;
            Ok(SortField {
                field: field.clone(),
                order,
                nulls,
            })
        })
        .collect()
}

fn take(json: &Json) -> Result<i64> {
    json.as_i64()
        .ok_or_else(|| shape("take", format!("expected an integer, got {json}")))
}

fn skip(json: &Json) -> Result<u64> {
    json.as_u64()
        .ok_or_else(|| shape("skip", format!("expected a non-negative integer, got {json}")))
}

pub fn page(args: &Map<String, Json>) -> Result<PageRequest> {
    Ok(PageRequest {
        cursor: args.get("cursor").map(unique).transpose()?,
        take: args.get("take").map(take).transpose()?,
        skip: args.get("skip").map(skip).transpose()?,
        distinct: args
            .get("distinct")
            .map(|d| field_names(d, "distinct"))
            .transpose()?
            .unwrap_or_default(),
    })
}

/// `where`, `orderBy`, `cursor`, `take`, `skip` and `distinct`.
pub fn find_many(args: &Map<String, Json>) -> Result<FindManyArgs> {
    Ok(FindManyArgs {
        filter: args.get("where").map(filter).transpose()?.unwrap_or_default(),
        order_by: args.get("orderBy").map(sort).transpose()?.unwrap_or_default(),
        page: page(args)?,
    })
}

// ============================================================================
// Mutation payloads
// ============================================================================

pub fn create(json: &Json) -> Result<CreateInput> {
    object(json, "data")?
        .iter()
        .map(|(field, value)| Ok((field.clone(), scalar(value, field)?)))
        .collect()
}

pub fn update(json: &Json) -> Result<UpdateInput> {
    let mut input = UpdateInput::new();
    for (field, value) in object(json, "data")? {
        let update = match value {
            Json::Object(ops) => {
                let mut entries = ops.iter();
                let (Some((op, operand)), None) = (entries.next(), entries.next()) else {
                    return Err(shape(field, "an update object takes exactly one operation"));
                };
                let operand = scalar(operand, field)?;
                match op.as_str() {
                    "set" => FieldUpdate::Set(operand),
                    "increment" => FieldUpdate::Increment(operand),
                    "decrement" => FieldUpdate::Decrement(operand),
                    "multiply" => FieldUpdate::Multiply(operand),
                    "divide" => FieldUpdate::Divide(operand),
                    other => {
                        return Err(shape(field, format!("unknown update operation `{other}`")));
                    }
                }
            }
            other => FieldUpdate::Set(scalar(other, field)?),
        };
        input.insert(field.clone(), update);
    }
    Ok(input)
}

// ============================================================================
// Aggregates and grouping
// ============================================================================

fn selected<'a>(json: &'a Json, at: &str) -> Result<Vec<&'a String>> {
    let map = object(json, at)?;
    let mut out = Vec::new();
    for (field, flag) in map {
        match flag.as_bool() {
            Some(true) => out.push(field),
            Some(false) => {}
            None => return Err(shape(at, format!("`{field}` must be true or false"))),
        }
    }
    Ok(out)
}

/// `_count`, `_avg`, `_sum`, `_min` and `_max` selections.
pub fn aggregates(args: &Map<String, Json>) -> Result<AggregateRequest> {
    let mut request = AggregateRequest::new();
    if let Some(count) = args.get("_count") {
        match count {
            Json::Bool(all) => request.count_all = *all,
            other => {
                for field in selected(other, "_count")? {
                    if field == "_all" {
                        request.count_all = true;
                    } else {
                        request.count.push(field.clone());
                    }
                }
            }
        }
    }
    for (name, fields) in [
        ("_avg", &mut request.avg),
        ("_sum", &mut request.sum),
        ("_min", &mut request.min),
        ("_max", &mut request.max),
    ] {
        if let Some(json) = args.get(name) {
            fields.extend(selected(json, name)?.into_iter().cloned());
        }
    }
    Ok(request)
}

fn aggregate_target(function: AggregateFn, field: &str) -> AggregateTarget {
    if function == AggregateFn::Count && field == "_all" {
        AggregateTarget::count_all()
    } else {
        AggregateTarget::new(function, field)
    }
}

/// Like a filter, but leaves may address aggregates:
/// `{"Score": {"_avg": {"gt": 2}}}` or `{"_count": {"_all": {"gt": 1}}}`.
pub fn having(json: &Json) -> Result<Having> {
    let map = object(json, "having")?;
    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "AND" => parts.push(Having::And(children(value, having)?)),
            "OR" => parts.push(Having::Or(
                list(value, "OR")?.iter().map(having).collect::<Result<_>>()?,
            )),
            "NOT" => parts.push(Having::Not(children(value, having)?)),
            name => match AggregateFn::parse(name) {
                Some(function) => {
                    for (field, ops) in object(value, name)? {
                        let target = GroupTarget::Aggregate(aggregate_target(function, field));
                        parts.extend(having_leaves(target, ops)?);
                    }
                }
                None => parts.extend(having_field(name, value)?),
            },
        }
    }
    Ok(Having::And(parts))
}

fn having_field(field: &str, json: &Json) -> Result<Vec<Having>> {
    let Json::Object(map) = json else {
        return having_leaves(GroupTarget::Field(field.to_string()), json);
    };
    let mut plain = Map::new();
    let mut parts = Vec::new();
    for (key, value) in map {
        match AggregateFn::parse(key) {
            Some(function) => {
                let target = GroupTarget::Aggregate(AggregateTarget::new(function, field));
                parts.extend(having_leaves(target, value)?);
            }
            None => {
                plain.insert(key.clone(), value.clone());
            }
        }
    }
    if !plain.is_empty() {
        parts.extend(having_leaves(
            GroupTarget::Field(field.to_string()),
            &Json::Object(plain),
        )?);
    }
    Ok(parts)
}

fn having_leaves(target: GroupTarget, json: &Json) -> Result<Vec<Having>> {
    let at = target.to_string();
    let (ops, mode) = match json {
        Json::Object(map) => operators(&at, map)?,
        Json::Null => (vec![Operator::IsNull], QueryMode::Default),
        other => (vec![Operator::Equals(scalar(other, &at)?)], QueryMode::Default),
    };
    Ok(ops
        .into_iter()
        .map(|op| {
            Having::Condition(HavingCondition {
                target: target.clone(),
                op,
                mode,
            })
        })
        .collect())
}

/// `{"Field": "asc"}` or `{"_count": {"Field" | "_all": "desc"}}`.
fn group_order(json: &Json) -> Result<GroupOrder> {
    let (key, value) = single_entry(json)?;
    match AggregateFn::parse(key) {
        Some(function) => {
            let (field, value) = single_entry(value)?;
            let (order, nulls) = direction(value, field)?;
            Ok(GroupOrder {
                target: GroupTarget::Aggregate(aggregate_target(function, field)),
                order,
                nulls,
            })
        }
        None => {
            let (order, nulls) = direction(value, key)?;
            Ok(GroupOrder {
                target: GroupTarget::Field(key.clone()),
                order,
                nulls,
            })
        }
    }
}

pub fn group_by(args: &Map<String, Json>) -> Result<GroupSpec> {
    let by = args
        .get("by")
        .map(|by| field_names(by, "by"))
        .transpose()?
        .unwrap_or_default();
    Ok(GroupSpec {
        by,
        filter: args.get("where").map(filter).transpose()?.unwrap_or_default(),
        having: args.get("having").map(having).transpose()?,
        aggregates: aggregates(args)?,
        order_by: args
            .get("orderBy")
            .map(|o| children(o, group_order))
            .transpose()?
            .unwrap_or_default(),
        skip: args.get("skip").map(skip).transpose()?,
        take: args.get("take").map(take).transpose()?,
    })
}
