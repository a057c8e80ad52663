//! Retrieval planner (find-many)
//!
//! Validates a filter, sort and page request against a schema and turns a set
//! of candidate rows into the ordered, bounded result. The pipeline is:
//! filter, sort, distinct, cursor positioning, skip, take.

use std::collections::HashSet;
use std::fmt;

use super::filter::{Filter, FilterEvaluator, matches};
use super::page::{Anchor, PageRequest, Window, window};
use super::sort::{EffectiveSort, SortSpec};
use super::unique::ResolvedKey;
use crate::error::ValidationError;
use crate::schema::EntitySchema;
use crate::value::{Record, Value};

/// Arguments of a find-many style read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindManyArgs {
    pub filter: Filter,
    pub order_by: SortSpec,
    pub page: PageRequest,
}

impl FindManyArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order_by: SortSpec) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }
}

/// Builds [`RetrievalPlan`]s for one schema.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalPlanner<'s> {
    schema: &'s EntitySchema,
}

impl<'s> RetrievalPlanner<'s> {
    pub fn new(schema: &'s EntitySchema) -> Self {
        Self { schema }
    }

    /// Validate every part of `args`. Nothing touches the store here.
    pub fn plan(&self, args: &FindManyArgs) -> Result<RetrievalPlan, ValidationError> {
        let filter = FilterEvaluator::new(self.schema).prepare(&args.filter)?;
        let sort = args.order_by.effective(self.schema)?;
        let cursor = args
            .page
            .cursor
            .as_ref()
            .map(|c| c.resolve(self.schema))
            .transpose()?;
        for field in &args.page.distinct {
            self.schema.require_field(field)?;
        }
        Ok(RetrievalPlan {
            filter,
            sort,
            cursor,
            take: args.page.take,
            skip: args.page.skip.unwrap_or(0),
            distinct: args.page.distinct.clone(),
        })
    }
}

/// A validated read, ready to run over candidate rows.
#[derive(Debug, Clone)]
pub struct RetrievalPlan {
    filter: Filter,
    sort: EffectiveSort,
    cursor: Option<ResolvedKey>,
    take: Option<i64>,
    skip: u64,
    distinct: Vec<String>,
}

impl RetrievalPlan {
    /// The prepared filter, for pushing down to the store.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn sort(&self) -> &EffectiveSort {
        &self.sort
    }

    pub fn take(&self) -> Option<i64> {
        self.take
    }

    /// Replace the signed take, keeping everything else.
    pub(crate) fn with_take(mut self, take: Option<i64>) -> Self {
        self.take = take;
        self
    }

    /// Run the pipeline over `candidates`.
    ///
    /// Candidates may be a superset of the matching rows; the filter is
    /// applied again here so stores may push down only part of it.
    pub fn execute(&self, candidates: Vec<Record>) -> Rows {
        let mut rows: Vec<Record> = candidates
            .into_iter()
            .filter(|r| matches(&self.filter, r))
            .collect();
        rows.sort_by(|a, b| self.sort.compare(a, b));

        if !self.distinct.is_empty() {
            let mut seen: HashSet<Vec<Value>> = HashSet::new();
            rows.retain(|r| seen.insert(r.project(&self.distinct)));
        }

        let anchor = match &self.cursor {
            None => Anchor::Edge,
            Some(key) => match rows.iter().position(|r| key.matches(r)) {
                Some(pos) => Anchor::At(pos),
                None => return Rows::empty(),
            },
        };
        Rows {
            inner: window(rows, anchor, self.skip, self.take),
        }
    }
}

/// Lazy, ordered result of a read.
pub struct Rows {
    inner: Window<Record>,
}

impl Rows {
    pub fn empty() -> Self {
        Self {
            inner: Box::new(std::iter::empty()),
        }
    }
}

impl Iterator for Rows {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.inner.next()
    }
}

impl fmt::Debug for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows").finish_non_exhaustive()
    }
}
