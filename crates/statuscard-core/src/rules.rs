//! Maps a live count to a card color.
//!
//! Conditional rules are scanned in index order 1, 2, 3 and the first active
//! rule whose comparison holds wins. Overlapping ranges are resolved by that
//! order alone, never by how narrow a range is.

use crate::{ColorRules, ConditionalRule};

/// Index (1..=3) of the conditional rule that applies to `count`, if any.
pub fn matching_rule(count: Option<u64>, rules: &ColorRules) -> Option<usize> {
    let count = i128::from(count?);
    rules
        .conditional()
        .into_iter()
        .position(|rule| rule_matches(rule, count))
        .map(|i| i + 1)
}

fn rule_matches(rule: &ConditionalRule, count: i128) -> bool {
    match rule.threshold.as_ref().and_then(|t| t.as_integer()) {
        Some(threshold) => rule.operator.holds(count, threshold),
        None => false,
    }
}

/// Color for a card showing `count`. Without a count only the base rule
/// applies.
pub fn evaluate(count: Option<u64>, rules: &ColorRules) -> &str {
    match matching_rule(count, rules) {
        Some(1) => rules.first.color.as_str(),
        Some(2) => rules.second.color.as_str(),
        Some(3) => rules.third.color.as_str(),
        _ => rules.base.color.as_str(),
    }
}
