//! Store-agnostic read-query refinement.
//!
//! # Responsibility
//! - Define declarative query modifiers (filter, order, pagination, preload).
//! - Fold any modifier list into a canonical `QueryPlan`.
//!
//! # Invariants
//! - Application order is fixed: filters, ordering, pagination, preload.
//! - Call order only matters within one category (filters AND in order given,
//!   orderings are successive tie-breakers, last limit/offset wins).

pub mod modifier;

pub use modifier::{
    Filter, FilterOp, FilterValue, OrderDirection, Ordering, QueryModifier, QueryPlan,
};
