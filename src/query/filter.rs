//! Filter expressions and their evaluator
//!
//! A [`Filter`] is a boolean tree over one entity's fields. Leaves are
//! `(field, operator, operand)` conditions; `And`, `Or` and `Not` hold ordered
//! child lists. The [`FilterEvaluator`] validates a tree against an
//! [`EntitySchema`] (operator table per field kind, operand types, enum
//! membership) and evaluates it with SQL three-valued logic so in-process
//! results agree with what a relational store returns.

use crate::error::ValidationError;
use crate::schema::{EntitySchema, FieldDef, FieldKind};
use crate::value::{Record, Value};

/// Case sensitivity of text comparisons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
    #[default]
    Default,
    Insensitive,
}

/// Operator name without its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Equals,
    Not,
    In,
    NotIn,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

impl OperatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorKind::Equals => "equals",
            OperatorKind::Not => "not",
            OperatorKind::In => "in",
            OperatorKind::NotIn => "notIn",
            OperatorKind::Lt => "lt",
            OperatorKind::Lte => "lte",
            OperatorKind::Gt => "gt",
            OperatorKind::Gte => "gte",
            OperatorKind::Contains => "contains",
            OperatorKind::StartsWith => "startsWith",
            OperatorKind::EndsWith => "endsWith",
            OperatorKind::IsNull => "isNull",
            OperatorKind::IsNotNull => "isNotNull",
        }
    }
}

/// Operators a field kind accepts. `isNull`/`isNotNull` are gated on
/// nullability instead and never appear here.
pub fn operators_for(kind: &FieldKind) -> &'static [OperatorKind] {
    use OperatorKind as Op;
    match kind {
        FieldKind::Int | FieldKind::BigInt | FieldKind::Decimal { .. } | FieldKind::Timestamp => &[
            Op::Equals,
            Op::Not,
            Op::In,
            Op::NotIn,
            Op::Lt,
            Op::Lte,
            Op::Gt,
            Op::Gte,
        ],
        FieldKind::Text => &[
            Op::Equals,
            Op::Not,
            Op::In,
            Op::NotIn,
            Op::Contains,
            Op::StartsWith,
            Op::EndsWith,
        ],
        FieldKind::Boolean => &[Op::Equals, Op::Not],
        FieldKind::Enum(_) => &[Op::Equals, Op::Not, Op::In, Op::NotIn],
    }
}

/// Comparison with its operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Equals(Value),
    /// Not equal.
    Not(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Operator::Equals(_) => OperatorKind::Equals,
            Operator::Not(_) => OperatorKind::Not,
            Operator::In(_) => OperatorKind::In,
            Operator::NotIn(_) => OperatorKind::NotIn,
            Operator::Lt(_) => OperatorKind::Lt,
            Operator::Lte(_) => OperatorKind::Lte,
            Operator::Gt(_) => OperatorKind::Gt,
            Operator::Gte(_) => OperatorKind::Gte,
            Operator::Contains(_) => OperatorKind::Contains,
            Operator::StartsWith(_) => OperatorKind::StartsWith,
            Operator::EndsWith(_) => OperatorKind::EndsWith,
            Operator::IsNull => OperatorKind::IsNull,
            Operator::IsNotNull => OperatorKind::IsNotNull,
        }
    }

    /// Validate and normalize the operand(s) against `field`.
    pub(crate) fn prepare(&self, field: &FieldDef) -> Result<Operator, ValidationError> {
        self.prepare_with(&field.name, field.kind.name(), |value| field.accept(value))
    }

    /// Validate and normalize the operand(s) with a custom conversion.
    ///
    /// `target` names what the operator applies to in errors and `expected`
    /// describes the operand type `normalize` accepts.
    pub(crate) fn prepare_with(
        &self,
        target: &str,
        expected: &str,
        normalize: impl Fn(Value) -> Result<Value, ValidationError>,
    ) -> Result<Operator, ValidationError> {
        let name = self.kind().as_str();
        let operand = |value: &Value| -> Result<Value, ValidationError> {
            if value.is_null() {
                return Err(ValidationError::type_mismatch(
                    target,
                    expected,
                    "null (use isNull/isNotNull)",
                )
                .with_operator(name));
            }
            normalize(value.clone()).map_err(|e| e.with_operator(name))
        };
        let list = |values: &[Value]| -> Result<Vec<Value>, ValidationError> {
            if values.is_empty() {
                return Err(ValidationError::empty_list(target, name));
            }
            values.iter().map(operand).collect()
        };

        Ok(match self {
            Operator::Equals(v) => Operator::Equals(operand(v)?),
            Operator::Not(v) => Operator::Not(operand(v)?),
            Operator::In(vs) => Operator::In(list(vs)?),
            Operator::NotIn(vs) => Operator::NotIn(list(vs)?),
            Operator::Lt(v) => Operator::Lt(operand(v)?),
            Operator::Lte(v) => Operator::Lte(operand(v)?),
            Operator::Gt(v) => Operator::Gt(operand(v)?),
            Operator::Gte(v) => Operator::Gte(operand(v)?),
            Operator::Contains(s) => Operator::Contains(s.clone()),
            Operator::StartsWith(s) => Operator::StartsWith(s.clone()),
            Operator::EndsWith(s) => Operator::EndsWith(s.clone()),
            Operator::IsNull => Operator::IsNull,
            Operator::IsNotNull => Operator::IsNotNull,
        })
    }
}

/// Leaf of a filter tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub mode: QueryMode,
}

/// Boolean filter tree over one entity's fields.
///
/// `And([])` matches every row, `Or([])` matches none, and
/// `Not(children)` is `And` of the negated children, so `Not([])` matches
/// every row.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Vec<Filter>),
    Condition(Condition),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::And(Vec::new())
    }
}

impl Filter {
    /// The empty filter, matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(children: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(children.into_iter().collect())
    }

    pub fn not(children: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Not(children.into_iter().collect())
    }

    pub fn condition(field: impl Into<String>, op: Operator) -> Self {
        Filter::Condition(Condition {
            field: field.into(),
            op,
            mode: QueryMode::Default,
        })
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Equals(value.into()))
    }

    /// Switch a leaf to case-insensitive matching. No effect on interior nodes.
    pub fn insensitive(mut self) -> Self {
        if let Filter::Condition(condition) = &mut self {
            condition.mode = QueryMode::Insensitive;
        }
        self
    }

    /// True for a filter without any constraint.
    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::And(children) if children.is_empty())
    }

    /// Visit every leaf.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Filter::And(children) | Filter::Or(children) | Filter::Not(children) => {
                for child in children {
                    child.collect_conditions(out);
                }
            }
            Filter::Condition(condition) => out.push(condition),
        }
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Validates filters against one schema and evaluates them over records.
#[derive(Debug, Clone, Copy)]
pub struct FilterEvaluator<'s> {
    schema: &'s EntitySchema,
}

impl<'s> FilterEvaluator<'s> {
    pub fn new(schema: &'s EntitySchema) -> Self {
        Self { schema }
    }

    /// Validate `filter` and return it with every operand normalized to the
    /// exact value of its field kind (decimal text parsed, enum names
    /// resolved, timestamps parsed).
    pub fn prepare(&self, filter: &Filter) -> Result<Filter, ValidationError> {
        self.prepare_node(filter)
            .map_err(|e| e.with_entity(self.schema.name()))
    }

    fn prepare_node(&self, filter: &Filter) -> Result<Filter, ValidationError> {
        Ok(match filter {
            Filter::And(children) => Filter::And(self.prepare_children(children)?),
            Filter::Or(children) => Filter::Or(self.prepare_children(children)?),
            Filter::Not(children) => Filter::Not(self.prepare_children(children)?),
            Filter::Condition(condition) => Filter::Condition(self.prepare_condition(condition)?),
        })
    }

    fn prepare_children(&self, children: &[Filter]) -> Result<Vec<Filter>, ValidationError> {
        children.iter().map(|c| self.prepare_node(c)).collect()
    }

    fn prepare_condition(&self, condition: &Condition) -> Result<Condition, ValidationError> {
        let field = self.schema.require_field(&condition.field)?;
        check_operator(field, condition.op.kind(), condition.mode)?;
        Ok(Condition {
            field: condition.field.clone(),
            op: condition.op.prepare(field)?,
            mode: condition.mode,
        })
    }

    /// Whether `record` satisfies a prepared filter.
    pub fn matches(&self, filter: &Filter, record: &Record) -> bool {
        matches(filter, record)
    }
}

/// Check the operator table and the mode for one field.
pub(crate) fn check_operator(
    field: &FieldDef,
    kind: OperatorKind,
    mode: QueryMode,
) -> Result<(), ValidationError> {
    let allowed = match kind {
        OperatorKind::IsNull | OperatorKind::IsNotNull => field.nullable,
        other => operators_for(&field.kind).contains(&other),
    };
    if !allowed {
        let described = match kind {
            OperatorKind::IsNull | OperatorKind::IsNotNull => "non-nullable",
            _ => field.kind.name(),
        };
        return Err(ValidationError::operator_not_allowed(
            &field.name,
            kind.as_str(),
            described,
        ));
    }
    if mode == QueryMode::Insensitive && field.kind != FieldKind::Text {
        return Err(ValidationError::operator_not_allowed(
            &field.name,
            "mode",
            field.kind.name(),
        ));
    }
    Ok(())
}

/// Whether `record` satisfies a prepared filter: only a definite true matches.
pub fn matches(filter: &Filter, record: &Record) -> bool {
    eval(filter, record) == Some(true)
}

/// Three-valued evaluation; `None` is SQL's unknown.
pub(crate) fn eval(filter: &Filter, record: &Record) -> Option<bool> {
    match filter {
        Filter::And(children) => all_of(children.iter().map(|c| eval(c, record))),
        Filter::Or(children) => any_of(children.iter().map(|c| eval(c, record))),
        Filter::Not(children) => all_of(children.iter().map(|c| eval(c, record).map(|b| !b))),
        Filter::Condition(condition) => {
            eval_operator(record.get(&condition.field), &condition.op, condition.mode)
        }
    }
}

pub(crate) fn all_of(results: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut unknown = false;
    for result in results {
        match result {
            Some(false) => return Some(false),
            None => unknown = true,
            Some(true) => {}
        }
    }
    if unknown { None } else { Some(true) }
}

pub(crate) fn any_of(results: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut unknown = false;
    for result in results {
        match result {
            Some(true) => return Some(true),
            None => unknown = true,
            Some(false) => {}
        }
    }
    if unknown { None } else { Some(false) }
}

/// Apply one operator to a stored value. Comparisons against null are unknown.
pub(crate) fn eval_operator(value: &Value, op: &Operator, mode: QueryMode) -> Option<bool> {
    match op {
        Operator::IsNull => Some(value.is_null()),
        Operator::IsNotNull => Some(!value.is_null()),
        _ if value.is_null() => None,
        Operator::Equals(x) => Some(values_equal(value, x, mode)),
        Operator::Not(x) => Some(!values_equal(value, x, mode)),
        Operator::In(xs) => Some(xs.iter().any(|x| values_equal(value, x, mode))),
        Operator::NotIn(xs) => Some(!xs.iter().any(|x| values_equal(value, x, mode))),
        Operator::Lt(x) => Some(value < x),
        Operator::Lte(x) => Some(value <= x),
        Operator::Gt(x) => Some(value > x),
        Operator::Gte(x) => Some(value >= x),
        Operator::Contains(needle) => text_test(value, needle, mode, |h, n| h.contains(n)),
        Operator::StartsWith(prefix) => text_test(value, prefix, mode, |h, n| h.starts_with(n)),
        Operator::EndsWith(suffix) => text_test(value, suffix, mode, |h, n| h.ends_with(n)),
    }
}

fn values_equal(value: &Value, operand: &Value, mode: QueryMode) -> bool {
    match (mode, value, operand) {
        (QueryMode::Insensitive, Value::Text(a), Value::Text(b)) => {
            a.to_lowercase() == b.to_lowercase()
        }
        _ => value == operand,
    }
}

fn text_test(
    value: &Value,
    operand: &str,
    mode: QueryMode,
    test: impl Fn(&str, &str) -> bool,
) -> Option<bool> {
    let haystack = value.as_text()?;
    Some(match mode {
        QueryMode::Default => test(haystack, operand),
        QueryMode::Insensitive => test(&haystack.to_lowercase(), &operand.to_lowercase()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationKind;
    use crate::schema::{EnumDef, FieldDef};
    use rust_decimal::Decimal;

    fn schema() -> EntitySchema {
        EntitySchema::builder("Monitor")
            .field(FieldDef::new("Id", FieldKind::Int))
            .field(FieldDef::new("Name", FieldKind::Text))
            .field(FieldDef::new("Notes", FieldKind::Text).nullable())
            .field(FieldDef::new(
                "MaxFPS",
                FieldKind::Decimal {
                    precision: 5,
                    scale: 2,
                },
            ))
            .field(FieldDef::new(
                "Type",
                FieldKind::Enum(EnumDef::new("MonitorType", ["Local", "Remote"])),
            ))
            .field(FieldDef::new("Enabled", FieldKind::Boolean))
            .primary_key(["Id"])
            .build()
            .unwrap()
    }

    fn record(id: i64, name: &str, notes: Option<&str>) -> Record {
        Record::new()
            .with("Id", id)
            .with("Name", name)
            .with("Notes", notes)
            .with("MaxFPS", Decimal::new(1050, 2))
            .with("Type", Value::member("Local"))
            .with("Enabled", true)
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let schema = schema();
        let err = FilterEvaluator::new(&schema)
            .prepare(&Filter::equals("Nope", 1))
            .unwrap_err();
        assert_eq!(err.kind, ValidationKind::UnknownField);
        assert_eq!(err.entity.as_deref(), Some("Monitor"));
    }

    #[test]
    fn test_operator_table_is_enforced() {
        let schema = schema();
        let evaluator = FilterEvaluator::new(&schema);
        let cases = [
            Filter::condition("Id", Operator::Contains("1".into())),
            Filter::condition("Name", Operator::Lt(Value::from("b"))),
            Filter::condition("Enabled", Operator::In(vec![Value::Bool(true)])),
            Filter::condition("Type", Operator::Gt(Value::member("Local"))),
            Filter::condition("Name", Operator::IsNull),
            Filter::equals("Id", 1).insensitive(),
        ];
        for filter in cases {
            let err = evaluator.prepare(&filter).unwrap_err();
            assert_eq!(err.kind, ValidationKind::OperatorNotAllowed, "{filter:?}");
        }
    }

    #[test]
    fn test_nested_errors_surface() {
        let schema = schema();
        let filter = Filter::and([Filter::or([Filter::not([Filter::equals("Id", "x")])])]);
        let err = FilterEvaluator::new(&schema).prepare(&filter).unwrap_err();
        assert_eq!(err.kind, ValidationKind::TypeMismatch);
        assert_eq!(err.operator, Some("equals"));
    }

    #[test]
    fn test_in_requires_values() {
        let schema = schema();
        let err = FilterEvaluator::new(&schema)
            .prepare(&Filter::condition("Id", Operator::In(vec![])))
            .unwrap_err();
        assert_eq!(err.kind, ValidationKind::EmptyList);
    }

    #[test]
    fn test_null_operand_is_rejected() {
        let schema = schema();
        let err = FilterEvaluator::new(&schema)
            .prepare(&Filter::equals("Notes", Value::Null))
            .unwrap_err();
        assert_eq!(err.kind, ValidationKind::TypeMismatch);
    }

    #[test]
    fn test_decimal_text_operands_compare_exactly() {
        let schema = schema();
        let evaluator = FilterEvaluator::new(&schema);
        let filter = evaluator
            .prepare(&Filter::condition("MaxFPS", Operator::Gte(Value::from("10.50"))))
            .unwrap();
        assert!(evaluator.matches(&filter, &record(1, "a", None)));

        let filter = evaluator
            .prepare(&Filter::condition("MaxFPS", Operator::Gt(Value::from("10.5"))))
            .unwrap();
        assert!(!evaluator.matches(&filter, &record(1, "a", None)));
    }

    #[test]
    fn test_text_modes() {
        let schema = schema();
        let evaluator = FilterEvaluator::new(&schema);
        let row = record(1, "Front Door", None);

        let sensitive = evaluator
            .prepare(&Filter::condition("Name", Operator::Contains("door".into())))
            .unwrap();
        assert!(!evaluator.matches(&sensitive, &row));

        let insensitive = evaluator
            .prepare(&Filter::condition("Name", Operator::Contains("door".into())).insensitive())
            .unwrap();
        assert!(evaluator.matches(&insensitive, &row));

        let starts = evaluator
            .prepare(&Filter::condition("Name", Operator::StartsWith("Front".into())))
            .unwrap();
        assert!(evaluator.matches(&starts, &row));
    }

    #[test]
    fn test_empty_connectives() {
        let row = record(1, "a", None);
        assert!(matches(&Filter::and([]), &row));
        assert!(!matches(&Filter::or([]), &row));
        assert!(matches(&Filter::not([]), &row));
    }

    #[test]
    fn test_null_comparisons_are_unknown() {
        let schema = schema();
        let evaluator = FilterEvaluator::new(&schema);
        let row = record(1, "a", None);

        let not_x = evaluator
            .prepare(&Filter::condition("Notes", Operator::Not(Value::from("x"))))
            .unwrap();
        assert!(!evaluator.matches(&not_x, &row));

        // NOT(unknown) stays unknown, so the row is still excluded
        let negated = Filter::not([Filter::condition("Notes", Operator::Equals("x".into()))]);
        assert!(!evaluator.matches(&evaluator.prepare(&negated).unwrap(), &row));

        let is_null = evaluator
            .prepare(&Filter::condition("Notes", Operator::IsNull))
            .unwrap();
        assert!(evaluator.matches(&is_null, &row));
    }

    #[test]
    fn test_double_negation() {
        let schema = schema();
        let evaluator = FilterEvaluator::new(&schema);
        let inner = Filter::condition("Notes", Operator::StartsWith("n".into()));
        let twice = Filter::not([Filter::not([inner.clone()])]);
        let inner = evaluator.prepare(&inner).unwrap();
        let twice = evaluator.prepare(&twice).unwrap();

        for row in [
            record(1, "a", None),
            record(2, "b", Some("note")),
            record(3, "c", Some("other")),
        ] {
            assert_eq!(evaluator.matches(&inner, &row), evaluator.matches(&twice, &row));
        }
    }
}
