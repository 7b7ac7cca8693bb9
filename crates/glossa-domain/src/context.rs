use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::project::{Item, Project};
use crate::tokens::TokenCounter;

/// How surrounding items are chosen as translation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Alternating outward walk packing items into 80% of the budget,
    /// skipping oversized items without halting.
    #[default]
    FillBudget,
    /// Alternating outward walk over the full budget that halts on the
    /// first round adding nothing.
    Nearby,
    /// Per-item checkbox flags; no token accounting.
    Manual,
}

/// Disjoint classification of item indices for one translation request.
/// Indices outside the project never appear in either set. In `nearby` mode
/// the target index itself is a member of `included`; the payload builder
/// skips it when rendering the context block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSelection {
    pub included: BTreeSet<usize>,
    pub excluded: BTreeSet<usize>,
}

impl ContextSelection {
    /// Included indices other than the target, in ascending order. This is
    /// the exact sequence the context block renders.
    pub fn context_indices(&self, target: usize) -> Vec<usize> {
        self.included
            .iter()
            .copied()
            .filter(|&index| index != target)
            .collect()
    }
}

/// Classifies every item of `project` relative to `target` under the
/// project's context mode and token budget.
///
/// Budgeted policies cost each item as source tokens plus translated
/// tokens and evaluate the right neighbor before the left one in each step
/// of the outward walk.
pub fn select_context(
    project: &Project,
    target: usize,
    counter: &TokenCounter,
) -> ContextSelection {
    let items = project.items();
    if target >= items.len() {
        return ContextSelection::default();
    }

    match project.context_mode {
        ContextMode::Manual => select_manual(items),
        ContextMode::FillBudget => {
            select_fill_budget(items, target, project.context_token_budget, counter)
        }
        ContextMode::Nearby => select_nearby(items, target, project.context_token_budget, counter),
    }
}

fn select_manual(items: &[Item]) -> ContextSelection {
    let mut selection = ContextSelection::default();
    for (index, item) in items.iter().enumerate() {
        if item.include_in_context {
            selection.included.insert(index);
        } else {
            selection.excluded.insert(index);
        }
    }
    selection
}

fn select_fill_budget(
    items: &[Item],
    target: usize,
    limit: i64,
    counter: &TokenCounter,
) -> ContextSelection {
    // Non-positive budget means no context at all in this mode.
    if limit <= 0 {
        return ContextSelection::default();
    }
    let target_budget = (limit as usize).saturating_mul(8) / 10;

    let mut selection = ContextSelection::default();
    let mut accumulated = 0usize;
    let mut left = target.checked_sub(1);
    let mut right = target + 1;

    while left.is_some() || right < items.len() {
        if right < items.len() {
            let cost = item_cost(&items[right], counter);
            if accumulated + cost <= target_budget {
                selection.included.insert(right);
                accumulated += cost;
            } else {
                // Oversized items are skipped, not walk-enders: a smaller
                // item further out may still fit.
                selection.excluded.insert(right);
            }
            right += 1;
        }
        if let Some(index) = left {
            let cost = item_cost(&items[index], counter);
            if accumulated + cost <= target_budget {
                selection.included.insert(index);
                accumulated += cost;
            } else {
                selection.excluded.insert(index);
            }
            left = index.checked_sub(1);
        }
    }

    selection
}

fn select_nearby(
    items: &[Item],
    target: usize,
    limit: i64,
    counter: &TokenCounter,
) -> ContextSelection {
    let mut selection = ContextSelection::default();
    selection.included.insert(target);

    if limit > 0 {
        let target_budget = limit as usize;
        let mut accumulated = 0usize;
        let mut left = target.checked_sub(1);
        let mut right = target + 1;

        while left.is_some() || right < items.len() {
            let mut added_in_round = false;
            if right < items.len() {
                let cost = item_cost(&items[right], counter);
                if accumulated + cost <= target_budget {
                    selection.included.insert(right);
                    accumulated += cost;
                    added_in_round = true;
                }
                right += 1;
            }
            if let Some(index) = left {
                let cost = item_cost(&items[index], counter);
                if accumulated + cost <= target_budget {
                    selection.included.insert(index);
                    accumulated += cost;
                    added_in_round = true;
                }
                left = index.checked_sub(1);
            }
            // Unlike fill_budget, one round with no addition ends the walk.
            if !added_in_round {
                break;
            }
        }
    }

    for index in 0..items.len() {
        if !selection.included.contains(&index) {
            selection.excluded.insert(index);
        }
    }
    selection
}

fn item_cost(item: &Item, counter: &TokenCounter) -> usize {
    counter.count_pair(&item.source_text, &item.translated_text)
}
