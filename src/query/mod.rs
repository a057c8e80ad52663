//! Query specification values and their semantics
//!
//! Everything here is a request-scoped value object: built from caller
//! input, validated against an [`EntitySchema`](crate::schema::EntitySchema)
//! before any store access, executed once and dropped.

pub mod aggregate;
pub mod filter;
pub mod mutation;
pub mod page;
pub mod planner;
pub mod sort;
pub mod unique;

pub use aggregate::{
    AggregateArgs, AggregateFn, AggregatePlan, AggregateRequest, AggregateTarget, Aggregates,
    GroupOrder, GroupPlan, GroupRow, GroupSpec, GroupTarget, Having, HavingCondition,
};
pub use filter::{Condition, Filter, FilterEvaluator, Operator, OperatorKind, QueryMode};
pub use mutation::{BatchResult, CreateInput, FieldUpdate, UpdateInput};
pub use page::PageRequest;
pub use planner::{FindManyArgs, RetrievalPlan, RetrievalPlanner, Rows};
pub use sort::{EffectiveSort, NullsOrder, SortField, SortOrder, SortSpec};
pub use unique::{ResolvedKey, UniqueSelector};
