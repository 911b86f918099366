//! Query modifier values and canonical plan folding.

use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Sort direction for one ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl Display for OrderDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

/// Comparison operator of a filter term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    IsNull,
    IsNotNull,
}

/// Literal compared against a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    List(Vec<FilterValue>),
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// One `field <op> value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Lte, value)
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Like, FilterValue::Text(pattern.into()))
    }

    pub fn is_in(field: impl Into<String>, values: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::In, values)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOp::IsNull, FilterValue::Null)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOp::IsNotNull, FilterValue::Null)
    }
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    pub field: String,
    pub direction: OrderDirection,
}

/// Declarative refinement of a read query.
///
/// Modifiers may be passed in any order; repositories fold them with
/// [`QueryPlan::from_modifiers`] and apply the categories canonically.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryModifier {
    Where(Filter),
    OrderBy(Ordering),
    Limit(u32),
    Offset(u32),
    /// Eager-load a named association of the entity.
    Preload(String),
    /// Make soft-deleted records visible.
    IncludeDeleted,
}

impl QueryModifier {
    pub fn filter(filter: Filter) -> Self {
        Self::Where(filter)
    }

    pub fn order_by(field: impl Into<String>, direction: OrderDirection) -> Self {
        Self::OrderBy(Ordering {
            field: field.into(),
            direction,
        })
    }

    pub fn order_asc(field: impl Into<String>) -> Self {
        Self::order_by(field, OrderDirection::Asc)
    }

    pub fn order_desc(field: impl Into<String>) -> Self {
        Self::order_by(field, OrderDirection::Desc)
    }

    /// Parses `"<field> [asc|desc]"`, e.g. `"created_at desc"`.
    pub fn parse_order(raw: &str) -> DomainResult<Self> {
        let mut parts = raw.split_whitespace();
        let field = parts.next().ok_or_else(|| {
            DomainError::bad_request("order clause is empty").with_detail("order", raw)
        })?;
        let direction = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => OrderDirection::Asc,
            Some("desc") => OrderDirection::Desc,
            Some(other) => {
                return Err(DomainError::bad_request(format!(
                    "unsupported order direction `{other}`; expected asc|desc"
                ))
                .with_detail("order", raw));
            }
        };
        if parts.next().is_some() {
            return Err(
                DomainError::bad_request("order clause has trailing tokens")
                    .with_detail("order", raw),
            );
        }
        Ok(Self::order_by(field, direction))
    }

    pub fn limit(limit: u32) -> Self {
        Self::Limit(limit)
    }

    pub fn offset(offset: u32) -> Self {
        Self::Offset(offset)
    }

    pub fn preload(association: impl Into<String>) -> Self {
        Self::Preload(association.into())
    }
}

/// Canonical form of a modifier list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    pub filters: Vec<Filter>,
    pub orderings: Vec<Ordering>,
    pub limit: Option<u32>,
    pub offset: u32,
    pub preloads: Vec<String>,
    pub include_deleted: bool,
}

impl QueryPlan {
    pub fn from_modifiers(modifiers: &[QueryModifier]) -> Self {
        let mut plan = Self::default();
        for modifier in modifiers {
            match modifier {
                QueryModifier::Where(filter) => plan.filters.push(filter.clone()),
                QueryModifier::OrderBy(ordering) => plan.orderings.push(ordering.clone()),
                QueryModifier::Limit(limit) => plan.limit = Some(*limit),
                QueryModifier::Offset(offset) => plan.offset = *offset,
                QueryModifier::Preload(association) => {
                    if !plan.preloads.contains(association) {
                        plan.preloads.push(association.clone());
                    }
                }
                QueryModifier::IncludeDeleted => plan.include_deleted = true,
            }
        }
        plan
    }

    /// Returns the plan with ordering and pagination dropped, as used by
    /// single-record and aggregate reads.
    pub fn without_paging(mut self) -> Self {
        self.orderings.clear();
        self.limit = None;
        self.offset = 0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, FilterValue, OrderDirection, Ordering, QueryModifier, QueryPlan};
    use crate::error::ErrorKind;

    #[test]
    fn plan_is_independent_of_category_interleaving() {
        let forward = QueryPlan::from_modifiers(&[
            QueryModifier::order_desc("created_at"),
            QueryModifier::limit(2),
            QueryModifier::filter(Filter::gt("quantity", 1)),
        ]);
        let reversed = QueryPlan::from_modifiers(&[
            QueryModifier::filter(Filter::gt("quantity", 1)),
            QueryModifier::limit(2),
            QueryModifier::order_desc("created_at"),
        ]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn last_pagination_value_wins_and_preloads_dedupe() {
        let plan = QueryPlan::from_modifiers(&[
            QueryModifier::limit(10),
            QueryModifier::offset(5),
            QueryModifier::preload("parts"),
            QueryModifier::limit(3),
            QueryModifier::preload("parts"),
            QueryModifier::IncludeDeleted,
        ]);
        assert_eq!(plan.limit, Some(3));
        assert_eq!(plan.offset, 5);
        assert_eq!(plan.preloads, vec!["parts".to_string()]);
        assert!(plan.include_deleted);
    }

    #[test]
    fn parse_order_accepts_field_and_direction() {
        let modifier = QueryModifier::parse_order("created_at DESC").unwrap();
        assert_eq!(
            modifier,
            QueryModifier::OrderBy(Ordering {
                field: "created_at".to_string(),
                direction: OrderDirection::Desc,
            })
        );

        let default_direction = QueryModifier::parse_order("name").unwrap();
        assert_eq!(default_direction, QueryModifier::order_asc("name"));
    }

    #[test]
    fn parse_order_rejects_unknown_direction() {
        let err = QueryModifier::parse_order("name sideways").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = QueryModifier::parse_order("   ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn without_paging_keeps_filters_and_visibility() {
        let plan = QueryPlan::from_modifiers(&[
            QueryModifier::filter(Filter::eq("name", "bolt")),
            QueryModifier::order_asc("name"),
            QueryModifier::limit(1),
            QueryModifier::offset(4),
            QueryModifier::IncludeDeleted,
        ])
        .without_paging();
        assert_eq!(plan.filters.len(), 1);
        assert!(plan.orderings.is_empty());
        assert_eq!(plan.limit, None);
        assert_eq!(plan.offset, 0);
        assert!(plan.include_deleted);
    }

    #[test]
    fn list_values_convert_elementwise() {
        let value = FilterValue::from(vec!["a", "b"]);
        assert_eq!(
            value,
            FilterValue::List(vec![
                FilterValue::Text("a".to_string()),
                FilterValue::Text("b".to_string())
            ])
        );
    }
}
