//! Aggregation and grouping
//!
//! Aggregates are computed in-process over the rows a store hands back, in
//! exact arithmetic: `sum` keeps the field kind and reports overflow, `avg`
//! is always an exact decimal. Grouping partitions rows by the group-by
//! values (null is its own bucket), aggregates each partition, filters the
//! partitions with `having` and orders them.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;

use super::filter::{
    Filter, FilterEvaluator, Operator, OperatorKind, QueryMode, all_of, any_of, check_operator,
    eval_operator, operators_for,
};
use super::page::{Anchor, window};
use super::planner::{FindManyArgs, RetrievalPlan, RetrievalPlanner};
use super::sort::{NullsOrder, SortOrder, compare_values};
use crate::error::{ValidationError, ValidationKind};
use crate::schema::{EntitySchema, FieldDef, FieldKind};
use crate::value::{Record, Value, parse_big_int, parse_decimal};

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateFn {
    Count,
    Avg,
    Sum,
    Min,
    Max,
}

impl AggregateFn {
    /// Wire name (`_count`, `_avg`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Count => "_count",
            AggregateFn::Avg => "_avg",
            AggregateFn::Sum => "_sum",
            AggregateFn::Min => "_min",
            AggregateFn::Max => "_max",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "_count" => Some(AggregateFn::Count),
            "_avg" => Some(AggregateFn::Avg),
            "_sum" => Some(AggregateFn::Sum),
            "_min" => Some(AggregateFn::Min),
            "_max" => Some(AggregateFn::Max),
            _ => None,
        }
    }
}

/// One aggregate result: a function over a field, or `count` over all rows
/// when `field` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateTarget {
    pub function: AggregateFn,
    pub field: Option<String>,
}

impl AggregateTarget {
    pub fn count_all() -> Self {
        Self {
            function: AggregateFn::Count,
            field: None,
        }
    }

    pub fn new(function: AggregateFn, field: impl Into<String>) -> Self {
        Self {
            function,
            field: Some(field.into()),
        }
    }
}

impl fmt::Display for AggregateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}({field})", self.function.as_str()),
            None => write!(f, "{}(_all)", self.function.as_str()),
        }
    }
}

// ============================================================================
// Aggregate requests
// ============================================================================

/// Requested aggregate functions and the fields each one covers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateRequest {
    pub count_all: bool,
    pub count: Vec<String>,
    pub avg: Vec<String>,
    pub sum: Vec<String>,
    pub min: Vec<String>,
    pub max: Vec<String>,
}

impl AggregateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_all(mut self) -> Self {
        self.count_all = true;
        self
    }

    pub fn count(mut self, field: impl Into<String>) -> Self {
        self.count.push(field.into());
        self
    }

    pub fn avg(mut self, field: impl Into<String>) -> Self {
        self.avg.push(field.into());
        self
    }

    pub fn sum(mut self, field: impl Into<String>) -> Self {
        self.sum.push(field.into());
        self
    }

    pub fn min(mut self, field: impl Into<String>) -> Self {
        self.min.push(field.into());
        self
    }

    pub fn max(mut self, field: impl Into<String>) -> Self {
        self.max.push(field.into());
        self
    }

    /// Every requested target, `count(_all)` first.
    pub fn targets(&self) -> Vec<AggregateTarget> {
        let mut targets = Vec::new();
        if self.count_all {
            targets.push(AggregateTarget::count_all());
        }
        let lists = [
            (AggregateFn::Count, &self.count),
            (AggregateFn::Avg, &self.avg),
            (AggregateFn::Sum, &self.sum),
            (AggregateFn::Min, &self.min),
            (AggregateFn::Max, &self.max),
        ];
        for (function, fields) in lists {
            targets.extend(fields.iter().map(|f| AggregateTarget::new(function, f.clone())));
        }
        targets
    }

    pub fn is_requested(&self, target: &AggregateTarget) -> bool {
        match (&target.function, &target.field) {
            (AggregateFn::Count, None) => self.count_all,
            (AggregateFn::Count, Some(f)) => self.count.contains(f),
            (AggregateFn::Avg, Some(f)) => self.avg.contains(f),
            (AggregateFn::Sum, Some(f)) => self.sum.contains(f),
            (AggregateFn::Min, Some(f)) => self.min.contains(f),
            (AggregateFn::Max, Some(f)) => self.max.contains(f),
            (_, None) => false,
        }
    }

    /// Fields must exist; `avg` and `sum` need numeric fields.
    pub fn validate(&self, schema: &EntitySchema) -> Result<(), ValidationError> {
        for target in self.targets() {
            if let Some(name) = &target.field {
                let field = schema.require_field(name)?;
                let numeric_only = matches!(target.function, AggregateFn::Avg | AggregateFn::Sum);
                if numeric_only && !field.kind.is_numeric() {
                    return Err(ValidationError::new(
                        ValidationKind::InvalidAggregate,
                        format!(
                            "{} needs a numeric field, `{name}` is {}",
                            target.function.as_str(),
                            field.kind.name()
                        ),
                    )
                    .with_field(name)
                    .with_entity(schema.name()));
                }
            }
        }
        Ok(())
    }

    /// Compute every requested aggregate over `rows`.
    pub fn compute(
        &self,
        schema: &EntitySchema,
        rows: &[Record],
    ) -> Result<Aggregates, ValidationError> {
        let mut out = Aggregates::default();
        if self.count_all {
            out.count_all = Some(rows.len() as i64);
        }
        for name in &self.count {
            let n = rows.iter().filter(|r| !r.get(name).is_null()).count();
            out.count.insert(name.clone(), n as i64);
        }
        for name in &self.avg {
            out.avg.insert(name.clone(), average(name, rows)?);
        }
        for name in &self.sum {
            let field = schema.require_field(name)?;
            out.sum.insert(name.clone(), sum(field, rows)?);
        }
        for name in &self.min {
            let value = non_null(name, rows).min().cloned().unwrap_or(Value::Null);
            out.min.insert(name.clone(), value);
        }
        for name in &self.max {
            let value = non_null(name, rows).max().cloned().unwrap_or(Value::Null);
            out.max.insert(name.clone(), value);
        }
        Ok(out)
    }
}

fn non_null<'a>(field: &'a str, rows: &'a [Record]) -> impl Iterator<Item = &'a Value> + 'a {
    rows.iter().map(move |r| r.get(field)).filter(|v| !v.is_null())
}

fn average(field: &str, rows: &[Record]) -> Result<Value, ValidationError> {
    let mut total = Decimal::ZERO;
    let mut n: i64 = 0;
    for value in non_null(field, rows) {
        let Some(d) = value.to_decimal() else {
            continue;
        };
        total = total
            .checked_add(d)
            .ok_or_else(|| ValidationError::overflow(field, "_avg"))?;
        n += 1;
    }
    if n == 0 {
        return Ok(Value::Null);
    }
    total
        .checked_div(Decimal::from(n))
        .map(|avg| Value::Decimal(avg.normalize()))
        .ok_or_else(|| ValidationError::overflow(field, "_avg"))
}

fn sum(field: &FieldDef, rows: &[Record]) -> Result<Value, ValidationError> {
    let name = field.name.as_str();
    let overflow = || ValidationError::overflow(name, "_sum");
    let mut values = non_null(name, rows).peekable();
    if values.peek().is_none() {
        return Ok(Value::Null);
    }
    match field.kind {
        FieldKind::Int | FieldKind::BigInt => {
            let mut total: i64 = 0;
            for value in values {
                if let Value::Int(i) | Value::BigInt(i) = value {
                    total = total.checked_add(*i).ok_or_else(overflow)?;
                }
            }
            if field.kind == FieldKind::Int {
                i32::try_from(total).map_err(|_| overflow())?;
                Ok(Value::Int(total))
            } else {
                Ok(Value::BigInt(total))
            }
        }
        FieldKind::Decimal { .. } => {
            let mut total = Decimal::ZERO;
            for value in values {
                if let Some(d) = value.to_decimal() {
                    total = total.checked_add(d).ok_or_else(overflow)?;
                }
            }
            Ok(Value::Decimal(total))
        }
        _ => Err(ValidationError::new(
            ValidationKind::InvalidAggregate,
            format!("_sum needs a numeric field, `{name}` is {}", field.kind.name()),
        )
        .with_field(name)),
    }
}

/// Results of an [`AggregateRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    pub count_all: Option<i64>,
    pub count: BTreeMap<String, i64>,
    pub avg: BTreeMap<String, Value>,
    pub sum: BTreeMap<String, Value>,
    pub min: BTreeMap<String, Value>,
    pub max: BTreeMap<String, Value>,
}

impl Aggregates {
    /// Result for one target; null when it was not requested.
    pub fn get(&self, target: &AggregateTarget) -> Value {
        let Some(field) = &target.field else {
            return match target.function {
                AggregateFn::Count => self.count_all.map_or(Value::Null, Value::Int),
                _ => Value::Null,
            };
        };
        match target.function {
            AggregateFn::Count => self.count.get(field).map_or(Value::Null, |n| Value::Int(*n)),
            AggregateFn::Avg => self.avg.get(field).cloned().unwrap_or(Value::Null),
            AggregateFn::Sum => self.sum.get(field).cloned().unwrap_or(Value::Null),
            AggregateFn::Min => self.min.get(field).cloned().unwrap_or(Value::Null),
            AggregateFn::Max => self.max.get(field).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Non-grouped aggregate: a find-many window plus the functions to compute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateArgs {
    pub window: FindManyArgs,
    pub request: AggregateRequest,
}

impl AggregateArgs {
    pub fn new(request: AggregateRequest) -> Self {
        Self {
            window: FindManyArgs::default(),
            request,
        }
    }

    pub fn window(mut self, window: FindManyArgs) -> Self {
        self.window = window;
        self
    }
}

/// Validated non-grouped aggregate.
#[derive(Debug, Clone)]
pub struct AggregatePlan {
    rows: RetrievalPlan,
    request: AggregateRequest,
}

impl AggregatePlan {
    pub fn new(schema: &EntitySchema, args: &AggregateArgs) -> Result<Self, ValidationError> {
        let rows = RetrievalPlanner::new(schema).plan(&args.window)?;
        args.request.validate(schema)?;
        Ok(Self {
            rows,
            request: args.request.clone(),
        })
    }

    pub fn filter(&self) -> &Filter {
        self.rows.filter()
    }

    pub fn execute(
        &self,
        schema: &EntitySchema,
        candidates: Vec<Record>,
    ) -> Result<Aggregates, ValidationError> {
        let rows: Vec<Record> = self.rows.execute(candidates).collect();
        self.request
            .compute(schema, &rows)
            .map_err(|e| e.with_entity(schema.name()))
    }
}

// ============================================================================
// Grouping
// ============================================================================

/// What a having leaf or a group ordering addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupTarget {
    /// A group-by field.
    Field(String),
    /// A requested aggregate.
    Aggregate(AggregateTarget),
}

impl fmt::Display for GroupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupTarget::Field(field) => write!(f, "{field}"),
            GroupTarget::Aggregate(target) => write!(f, "{target}"),
        }
    }
}

/// Leaf of a having predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct HavingCondition {
    pub target: GroupTarget,
    pub op: Operator,
    pub mode: QueryMode,
}

/// Post-aggregation predicate over group results. Same logic as [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Having {
    And(Vec<Having>),
    Or(Vec<Having>),
    Not(Vec<Having>),
    Condition(HavingCondition),
}

impl Having {
    pub fn condition(target: GroupTarget, op: Operator) -> Self {
        Having::Condition(HavingCondition {
            target,
            op,
            mode: QueryMode::Default,
        })
    }

    pub fn aggregate(target: AggregateTarget, op: Operator) -> Self {
        Self::condition(GroupTarget::Aggregate(target), op)
    }

    pub fn field(field: impl Into<String>, op: Operator) -> Self {
        Self::condition(GroupTarget::Field(field.into()), op)
    }
}

/// Ordering of grouped results.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOrder {
    pub target: GroupTarget,
    pub order: SortOrder,
    pub nulls: Option<NullsOrder>,
}

impl GroupOrder {
    pub fn new(target: GroupTarget, order: SortOrder) -> Self {
        Self {
            target,
            order,
            nulls: None,
        }
    }
}

/// A grouped aggregate request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSpec {
    pub by: Vec<String>,
    /// Pre-aggregation filter.
    pub filter: Filter,
    pub having: Option<Having>,
    pub aggregates: AggregateRequest,
    pub order_by: Vec<GroupOrder>,
    pub skip: Option<u64>,
    pub take: Option<i64>,
}

impl GroupSpec {
    pub fn new<I, S>(by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            by: by.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn having(mut self, having: Having) -> Self {
        self.having = Some(having);
        self
    }

    pub fn aggregates(mut self, aggregates: AggregateRequest) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn order_by(mut self, order: GroupOrder) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }
}

/// One surviving partition.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    /// Group-by field values.
    pub keys: Record,
    pub aggregates: Aggregates,
}

impl GroupRow {
    pub fn get(&self, target: &GroupTarget) -> Value {
        match target {
            GroupTarget::Field(field) => self.keys.get(field).clone(),
            GroupTarget::Aggregate(target) => self.aggregates.get(target),
        }
    }
}

/// Validated grouped aggregate.
#[derive(Debug, Clone)]
pub struct GroupPlan {
    spec: GroupSpec,
    filter: Filter,
    having: Option<Having>,
}

impl GroupPlan {
    /// Validate the whole spec before any store access.
    pub fn new(schema: &EntitySchema, spec: &GroupSpec) -> Result<Self, ValidationError> {
        Self::validate(schema, spec).map_err(|e| e.with_entity(schema.name()))
    }

    fn validate(schema: &EntitySchema, spec: &GroupSpec) -> Result<Self, ValidationError> {
        if spec.by.is_empty() {
            return Err(ValidationError::new(
                ValidationKind::InvalidAggregate,
                "group by needs at least one field",
            ));
        }
        for field in &spec.by {
            schema.require_field(field)?;
        }
        let filter = FilterEvaluator::new(schema).prepare(&spec.filter)?;
        spec.aggregates.validate(schema)?;

        let having = spec
            .having
            .as_ref()
            .map(|h| prepare_having(schema, spec, h))
            .transpose()?;

        for order in &spec.order_by {
            if !target_available(spec, &order.target) {
                return Err(ValidationError::new(
                    ValidationKind::InvalidOrder,
                    format!(
                        "cannot order groups by `{}`: not a group-by field or requested aggregate",
                        order.target
                    ),
                )
                .with_field(order.target.to_string()));
            }
        }

        Ok(Self {
            spec: spec.clone(),
            filter,
            having,
        })
    }

    /// The prepared pre-aggregation filter, for pushing down to the store.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn execute(
        &self,
        schema: &EntitySchema,
        candidates: Vec<Record>,
    ) -> Result<Vec<GroupRow>, ValidationError> {
        let mut partitions: BTreeMap<Vec<Value>, Vec<Record>> = BTreeMap::new();
        for row in candidates {
            if super::filter::matches(&self.filter, &row) {
                partitions
                    .entry(row.project(&self.spec.by))
                    .or_default()
                    .push(row);
            }
        }

        let mut groups = Vec::with_capacity(partitions.len());
        for (key, rows) in partitions {
            let aggregates = self
                .spec
                .aggregates
                .compute(schema, &rows)
                .map_err(|e| e.with_entity(schema.name()))?;
            let keys: Record = self.spec.by.iter().cloned().zip(key).collect();
            let group = GroupRow { keys, aggregates };
            let keep = match &self.having {
                Some(having) => eval_having(having, &group) == Some(true),
                None => true,
            };
            if keep {
                groups.push(group);
            }
        }

        // Partitions come out of the map in key order; a stable sort keeps
        // that as the final tie-breaker.
        if !self.spec.order_by.is_empty() {
            groups.sort_by(|a, b| {
                self.spec
                    .order_by
                    .iter()
                    .map(|o| compare_values(&a.get(&o.target), &b.get(&o.target), o.order, o.nulls))
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        Ok(window(
            groups,
            Anchor::Edge,
            self.spec.skip.unwrap_or(0),
            self.spec.take,
        )
        .collect())
    }
}

fn target_available(spec: &GroupSpec, target: &GroupTarget) -> bool {
    match target {
        GroupTarget::Field(field) => spec.by.contains(field),
        GroupTarget::Aggregate(target) => spec.aggregates.is_requested(target),
    }
}

fn prepare_having(
    schema: &EntitySchema,
    spec: &GroupSpec,
    having: &Having,
) -> Result<Having, ValidationError> {
    let children = |nodes: &[Having]| -> Result<Vec<Having>, ValidationError> {
        nodes
            .iter()
            .map(|n| prepare_having(schema, spec, n))
            .collect()
    };
    Ok(match having {
        Having::And(nodes) => Having::And(children(nodes)?),
        Having::Or(nodes) => Having::Or(children(nodes)?),
        Having::Not(nodes) => Having::Not(children(nodes)?),
        Having::Condition(condition) => {
            if !target_available(spec, &condition.target) {
                return Err(ValidationError::new(
                    ValidationKind::InvalidHaving,
                    format!(
                        "having on `{}`: not a group-by field or requested aggregate",
                        condition.target
                    ),
                )
                .with_field(condition.target.to_string()));
            }
            Having::Condition(prepare_having_condition(schema, condition)?)
        }
    })
}

fn prepare_having_condition(
    schema: &EntitySchema,
    condition: &HavingCondition,
) -> Result<HavingCondition, ValidationError> {
    let kind = condition.op.kind();
    let op = match &condition.target {
        GroupTarget::Field(name) => {
            let field = schema.require_field(name)?;
            check_operator(field, kind, condition.mode)?;
            condition.op.prepare(field)?
        }
        GroupTarget::Aggregate(target) => {
            let label = target.to_string();
            let field = match &target.field {
                Some(name) => Some(schema.require_field(name)?),
                None => None,
            };
            let result_kind = match (target.function, field) {
                (AggregateFn::Count, _) => FieldKind::BigInt,
                (AggregateFn::Avg, _) => FieldKind::Decimal {
                    precision: crate::schema::MAX_DECIMAL_PRECISION,
                    scale: 0,
                },
                (_, Some(field)) => field.kind.clone(),
                (_, None) => {
                    return Err(ValidationError::new(
                        ValidationKind::InvalidHaving,
                        format!("{label} needs a field"),
                    ));
                }
            };
            let null_check = matches!(kind, OperatorKind::IsNull | OperatorKind::IsNotNull);
            // count is never null; every other aggregate is null over no values
            let allowed = if null_check {
                target.function != AggregateFn::Count
            } else {
                operators_for(&result_kind).contains(&kind)
            };
            let bad_mode =
                condition.mode == QueryMode::Insensitive && result_kind != FieldKind::Text;
            if !allowed || bad_mode {
                return Err(ValidationError::operator_not_allowed(
                    &label,
                    kind.as_str(),
                    result_kind.name(),
                ));
            }
            condition
                .op
                .prepare_with(&label, result_kind.name(), |value| {
                    aggregate_operand(&label, target.function, field, value)
                })?
        }
    };
    Ok(HavingCondition {
        target: condition.target.clone(),
        op,
        mode: condition.mode,
    })
}

/// Normalize a having operand to the variant the aggregate produces.
fn aggregate_operand(
    label: &str,
    function: AggregateFn,
    field: Option<&FieldDef>,
    value: Value,
) -> Result<Value, ValidationError> {
    match (function, field) {
        (AggregateFn::Count, _) => match value {
            Value::Int(i) | Value::BigInt(i) => Ok(Value::Int(i)),
            Value::Text(text) => parse_big_int(&text)
                .map(Value::Int)
                .map_err(|e| ValidationError::invalid_value(label, e)),
            other => Err(ValidationError::type_mismatch(label, "integer", other.type_name())),
        },
        (AggregateFn::Avg, _)
        | (
            AggregateFn::Sum,
            Some(FieldDef {
                kind: FieldKind::Decimal { .. },
                ..
            }),
        ) => match value {
            Value::Int(i) | Value::BigInt(i) => Ok(Value::Decimal(Decimal::from(i))),
            Value::Decimal(d) => Ok(Value::Decimal(d)),
            Value::Text(text) => parse_decimal(&text)
                .map(Value::Decimal)
                .map_err(|e| ValidationError::invalid_value(label, e)),
            other => Err(ValidationError::type_mismatch(label, "decimal", other.type_name())),
        },
        (AggregateFn::Sum, Some(FieldDef { kind: FieldKind::Int, .. })) => match value {
            Value::Int(i) => Ok(Value::Int(i)),
            other => Err(ValidationError::type_mismatch(label, "integer", other.type_name())),
        },
        (_, Some(field)) => field.accept(value),
        (_, None) => Err(ValidationError::new(
            ValidationKind::InvalidHaving,
            format!("{label} needs a field"),
        )),
    }
}

fn eval_having(having: &Having, group: &GroupRow) -> Option<bool> {
    match having {
        Having::And(nodes) => all_of(nodes.iter().map(|n| eval_having(n, group))),
        Having::Or(nodes) => any_of(nodes.iter().map(|n| eval_having(n, group))),
        Having::Not(nodes) => all_of(nodes.iter().map(|n| eval_having(n, group).map(|b| !b))),
        Having::Condition(condition) => {
            eval_operator(&group.get(&condition.target), &condition.op, condition.mode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EnumDef;
    use pretty_assertions::assert_eq;

    fn schema() -> EntitySchema {
        EntitySchema::builder("Event")
            .field(FieldDef::new("Id", FieldKind::Int))
            .field(FieldDef::new("MonitorId", FieldKind::Int))
            .field(FieldDef::new("Cause", FieldKind::Text).nullable())
            .field(FieldDef::new("Frames", FieldKind::Int))
            .field(FieldDef::new("DiskSpace", FieldKind::BigInt).nullable())
            .field(FieldDef::new(
                "Score",
                FieldKind::Decimal {
                    precision: 6,
                    scale: 2,
                },
            ))
            .field(FieldDef::new(
                "State",
                FieldKind::Enum(EnumDef::new("State", ["Open", "Closed"])),
            ))
            .primary_key(["Id"])
            .build()
            .unwrap()
    }

    fn event(id: i32, monitor: i32, cause: Option<&str>, frames: i32, score: &str) -> Record {
        Record::new()
            .with("Id", id)
            .with("MonitorId", monitor)
            .with("Cause", cause)
            .with("Frames", frames)
            .with("DiskSpace", Value::Null)
            .with("Score", parse_decimal(score).unwrap())
            .with("State", Value::member("Open"))
    }

    fn events() -> Vec<Record> {
        vec![
            event(1, 1, Some("Motion"), 10, "1.10"),
            event(2, 1, Some("Motion"), 20, "2.20"),
            event(3, 2, None, 30, "3.30"),
            event(4, 2, Some("Alarm"), 40, "4.40"),
            event(5, 3, None, 50, "0.01"),
        ]
    }

    fn dec(text: &str) -> Value {
        Value::Decimal(parse_decimal(text).unwrap())
    }

    #[test]
    fn test_plain_aggregates() {
        let schema = schema();
        let request = AggregateRequest::new()
            .count_all()
            .count("Cause")
            .avg("Frames")
            .sum("Frames")
            .sum("Score")
            .min("Cause")
            .max("Score")
            .avg("DiskSpace");
        let out = request.compute(&schema, &events()).unwrap();
        assert_eq!(out.count_all, Some(5));
        assert_eq!(out.count["Cause"], 3);
        assert_eq!(out.avg["Frames"], dec("30"));
        assert_eq!(out.sum["Frames"], Value::Int(150));
        assert_eq!(out.sum["Score"], dec("11.01"));
        assert_eq!(out.min["Cause"], Value::from("Alarm"));
        assert_eq!(out.max["Score"], dec("4.40"));
        assert_eq!(out.avg["DiskSpace"], Value::Null);
    }

    #[test]
    fn test_avg_over_nothing_is_null() {
        let schema = schema();
        let out = AggregateRequest::new()
            .avg("Score")
            .sum("Score")
            .min("Id")
            .compute(&schema, &[])
            .unwrap();
        assert_eq!(out.avg["Score"], Value::Null);
        assert_eq!(out.sum["Score"], Value::Null);
        assert_eq!(out.min["Id"], Value::Null);
    }

    #[test]
    fn test_avg_stays_exact() {
        let schema = schema();
        let rows = vec![event(1, 1, None, 1, "0.10"), event(2, 1, None, 2, "0.20")];
        let out = AggregateRequest::new().avg("Score").compute(&schema, &rows).unwrap();
        assert_eq!(out.avg["Score"], dec("0.15"));
    }

    #[test]
    fn test_int_sum_overflow_is_reported() {
        let schema = schema();
        let rows = vec![
            event(1, 1, None, i32::MAX, "0"),
            event(2, 1, None, 1, "0"),
        ];
        let err = AggregateRequest::new()
            .sum("Frames")
            .compute(&schema, &rows)
            .unwrap_err();
        assert_eq!(err.kind, ValidationKind::Overflow);
    }

    #[test]
    fn test_sum_on_text_is_rejected() {
        let err = AggregateRequest::new().sum("Cause").validate(&schema()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidAggregate);
        let err = AggregateRequest::new().avg("State").validate(&schema()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidAggregate);
    }

    #[test]
    fn test_group_counts_add_up() {
        let schema = schema();
        let spec = GroupSpec::new(["Cause"]).aggregates(AggregateRequest::new().count_all());
        let groups = GroupPlan::new(&schema, &spec)
            .unwrap()
            .execute(&schema, events())
            .unwrap();

        // null is its own bucket and sorts first
        let keys: Vec<Value> = groups.iter().map(|g| g.keys.get("Cause").clone()).collect();
        assert_eq!(keys, vec![Value::Null, Value::from("Alarm"), Value::from("Motion")]);
        let total: i64 = groups.iter().filter_map(|g| g.aggregates.count_all).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_having_and_order_by_aggregate() {
        let schema = schema();
        let count = AggregateTarget::count_all();
        let spec = GroupSpec::new(["MonitorId"])
            .aggregates(AggregateRequest::new().count_all().sum("Frames"))
            .having(Having::aggregate(count.clone(), Operator::Gt(Value::Int(1))))
            .order_by(GroupOrder::new(
                GroupTarget::Aggregate(AggregateTarget::new(AggregateFn::Sum, "Frames")),
                SortOrder::Desc,
            ));
        let groups = GroupPlan::new(&schema, &spec)
            .unwrap()
            .execute(&schema, events())
            .unwrap();
        let monitors: Vec<Value> = groups.iter().map(|g| g.keys.get("MonitorId").clone()).collect();
        assert_eq!(monitors, vec![Value::Int(2), Value::Int(1)]);
        assert_eq!(groups[0].get(&GroupTarget::Aggregate(count)), Value::Int(2));
    }

    #[test]
    fn test_having_on_decimal_avg_parses_text() {
        let schema = schema();
        let avg = AggregateTarget::new(AggregateFn::Avg, "Score");
        let spec = GroupSpec::new(["MonitorId"])
            .aggregates(AggregateRequest::new().avg("Score"))
            .having(Having::aggregate(avg, Operator::Gte(Value::from("1.65"))));
        let groups = GroupPlan::new(&schema, &spec)
            .unwrap()
            .execute(&schema, events())
            .unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_having_must_reference_group_or_requested_aggregate() {
        let schema = schema();
        let spec = GroupSpec::new(["MonitorId"])
            .having(Having::field("Cause", Operator::Equals("Motion".into())));
        let err = GroupPlan::new(&schema, &spec).unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidHaving);
        assert_eq!(err.entity.as_deref(), Some("Event"));

        let spec = GroupSpec::new(["MonitorId"]).having(Having::aggregate(
            AggregateTarget::new(AggregateFn::Avg, "Frames"),
            Operator::Gt(Value::Int(1)),
        ));
        let err = GroupPlan::new(&schema, &spec).unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidHaving);
    }

    #[test]
    fn test_order_must_reference_group_or_requested_aggregate() {
        let schema = schema();
        let spec = GroupSpec::new(["MonitorId"])
            .order_by(GroupOrder::new(GroupTarget::Field("Frames".into()), SortOrder::Asc));
        let err = GroupPlan::new(&schema, &spec).unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidOrder);

        let err = GroupPlan::new(&schema, &GroupSpec::new(Vec::<String>::new())).unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidAggregate);
    }

    #[test]
    fn test_group_window() {
        let schema = schema();
        let spec = GroupSpec::new(["MonitorId"])
            .aggregates(AggregateRequest::new().count_all())
            .skip(1)
            .take(1);
        let groups = GroupPlan::new(&schema, &spec)
            .unwrap()
            .execute(&schema, events())
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keys.get("MonitorId"), &Value::Int(2));
    }
}
