//! In-memory relational table algebra and query planning.
//!
//! Tables compose by wrapping: filters, joins and virtual row lists sit on
//! top of storage tables without copying values. The planner compiles a
//! parsed select expression into a [`plan::PlanNode`] tree, which evaluates
//! into one such table.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod explain;
pub mod expr;
pub mod plan;
pub mod planner;
pub mod scalar;
pub mod schema;
pub mod scheme;
pub mod table;

#[cfg(test)]
mod testutil;
