//! Sub-batch Planning
//!
//! Greedy, order-preserving split of work items into sub-batches that fit a
//! model's context and output limits.

use crate::capability::ModelLimits;
use crate::config::BatchConfig;
use std::ops::Range;

/// Estimated cost of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemCost {
    pub input: u32,
    pub output: u32,
}

impl ItemCost {
    pub fn new(input: u32, output: u32) -> Self {
        Self { input, output }
    }
}

/// Ceilings a sub-batch must stay under
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchBudget {
    /// Input plus expected output
    pub total_tokens: u32,
    pub output_tokens: u32,
    pub max_items: usize,
    /// Prompt overhead paid once per sub-batch
    pub base_tokens: u32,
}

impl BatchBudget {
    pub fn new(limits: ModelLimits, config: &BatchConfig, base_tokens: u32) -> Self {
        let fraction = config.context_fraction.clamp(0.05, 1.0);
        Self {
            total_tokens: (limits.context_window as f64 * fraction) as u32,
            output_tokens: limits.max_output,
            max_items: config.max_items_per_batch.max(1),
            base_tokens,
        }
    }
}

/// Split `costs` into consecutive ranges.
///
/// A batch closes before the item that would push it over a ceiling. An item
/// too large for any batch still gets one of its own; the dispatcher's budget
/// check decides its fate.
pub fn plan_batches(costs: &[ItemCost], budget: &BatchBudget) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut total = budget.base_tokens;
    let mut output = 0u32;

    for (idx, cost) in costs.iter().enumerate() {
        let count = idx - start;
        let item_total = cost.input.saturating_add(cost.output);
        let overflows = total.saturating_add(item_total) > budget.total_tokens
            || output.saturating_add(cost.output) > budget.output_tokens
            || count >= budget.max_items;

        if count > 0 && overflows {
            batches.push(start..idx);
            start = idx;
            total = budget.base_tokens;
            output = 0;
        }

        total = total.saturating_add(item_total);
        output = output.saturating_add(cost.output);
    }

    if start < costs.len() {
        batches.push(start..costs.len());
    }
    batches
}
