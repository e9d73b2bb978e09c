//! The converge transaction engine.
//!
//! Drives a catalog of declared resources from observed to desired state:
//! builds the relationship graph (container splicing + auto-requires),
//! topologically orders it, evaluates each resource sequentially, routes
//! emitted events into subscription edges, delivers callbacks bottom-up
//! through the container hierarchy, and supports reverse-order rollback.
//!
//! # Architecture
//!
//! - **relationship**: builds the spliced, auto-required relationship graph
//! - **transaction**: the sequential evaluator, cleanup, and rollback
//! - **trigger**: upward-recursive subscription callback delivery
//! - **report**: counters, per-kind timings, and the structured run report

pub mod relationship;
pub mod report;
pub mod transaction;
pub mod trigger;

pub use relationship::PrepareError;
pub use report::{LogLevel, Report, ReportSink, ResourceMetrics};
pub use transaction::Transaction;
