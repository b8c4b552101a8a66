//! Batch Module
//!
//! Token-bounded sub-batching with partial-failure aggregation.

pub mod plan;
pub mod processor;

pub use plan::{plan_batches, BatchBudget, ItemCost};
pub use processor::{BatchHandler, BatchOutcome, BatchProcessor, BatchPrompts};
