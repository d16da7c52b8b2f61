//! Alert query engine.
//!
//! Raw request parameters flow through four stages:
//!
//! 1. [`filter::parse`] validates them into an immutable [`AlertFilterSet`].
//! 2. [`templates::expand`] turns report template ids into a test allow-set.
//! 3. [`planner::AlertQueryEngine`] merges both into one conjunctive
//!    [`perfdash_storage::AlertQuery`] and runs it against the store.
//! 4. [`assemble`] maps the returned records to the stable output shape.

pub mod assemble;
pub mod error;
pub mod filter;
pub mod planner;
pub mod templates;

#[cfg(test)]
mod tests;

pub use assemble::{AlertsResponse, AnomalyView};
pub use error::{QueryError, Result, ValidationError};
pub use filter::{AlertFilterSet, LimitPolicy, RawAlertParams};
pub use planner::AlertQueryEngine;
