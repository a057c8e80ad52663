//! Sort specifications
//!
//! Fields are compared left to right. Nulls are the smallest value unless a
//! sort field places them explicitly, so ascending order puts them first and
//! descending order puts them last.

use std::cmp::Ordering;

use crate::error::ValidationError;
use crate::schema::EntitySchema;
use crate::value::{Record, Value};

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Explicit placement of nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// One `(field, direction)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
    pub nulls: Option<NullsOrder>,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
            nulls: None,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
            nulls: None,
        }
    }

    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

/// Compare two values of one field under a direction and null placement.
pub(crate) fn compare_values(
    a: &Value,
    b: &Value,
    order: SortOrder,
    nulls: Option<NullsOrder>,
) -> Ordering {
    let nulls_first = match nulls {
        Some(NullsOrder::First) => true,
        Some(NullsOrder::Last) => false,
        None => order == SortOrder::Asc,
    };
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if nulls_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if nulls_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match order {
            SortOrder::Asc => a.cmp(b),
            SortOrder::Desc => b.cmp(a),
        },
    }
}

/// Ordered list of sort fields as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    fields: Vec<SortField>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tie-breaker.
    pub fn then(mut self, field: SortField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate the fields and append the primary key ascending, which makes
    /// the order total.
    pub fn effective(&self, schema: &EntitySchema) -> Result<EffectiveSort, ValidationError> {
        let mut fields = Vec::with_capacity(self.fields.len() + schema.primary_key().fields.len());
        for sort in &self.fields {
            schema
                .require_field(&sort.field)
                .map_err(|e| e.with_entity(schema.name()))?;
            fields.push(sort.clone());
        }
        for key_field in &schema.primary_key().fields {
            if !fields.iter().any(|s| &s.field == key_field) {
                fields.push(SortField::asc(key_field.clone()));
            }
        }
        Ok(EffectiveSort { fields })
    }
}

impl FromIterator<SortField> for SortSpec {
    fn from_iter<I: IntoIterator<Item = SortField>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Validated sort ending in the primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSort {
    fields: Vec<SortField>,
}

impl EffectiveSort {
    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.fields
            .iter()
            .map(|s| compare_values(a.get(&s.field), b.get(&s.field), s.order, s.nulls))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}
