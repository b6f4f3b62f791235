//! Token budget for search results.

use serde::Serialize;

/// Roughly four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone, Serialize)]
pub struct Budgeted<T> {
    pub items: Vec<T>,
    pub total_tokens: usize,
    /// True iff the budget excluded at least one item.
    pub truncated: bool,
}

/// Keep items in the given order until the next one would exceed
/// `max_tokens`, then stop. With no budget every item is kept.
pub fn apply_budget<T>(
    items: Vec<T>,
    max_tokens: Option<usize>,
    text: impl Fn(&T) -> &str,
) -> Budgeted<T> {
    let mut kept = Vec::with_capacity(items.len());
    let mut total_tokens = 0usize;
    let mut truncated = false;

    for item in items {
        let cost = estimate_tokens(text(&item));
        if max_tokens.is_some_and(|max| total_tokens + cost > max) {
            truncated = true;
            break;
        }
        total_tokens += cost;
        kept.push(item);
    }

    Budgeted {
        items: kept,
        total_tokens,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lens: &[usize]) -> Vec<String> {
        lens.iter().map(|n| "x".repeat(*n)).collect()
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // Characters, not bytes.
        assert_eq!(estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn stops_at_first_item_that_does_not_fit() {
        // 10, 20, 5 tokens
        let out = apply_budget(texts(&[40, 80, 20]), Some(25), |s| s.as_str());
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.total_tokens, 10);
        assert!(out.truncated);
    }

    #[test]
    fn oversized_first_item_yields_nothing() {
        let out = apply_budget(texts(&[400]), Some(10), |s| s.as_str());
        assert!(out.items.is_empty());
        assert_eq!(out.total_tokens, 0);
        assert!(out.truncated);
    }

    #[test]
    fn exact_fit_is_not_truncated() {
        let out = apply_budget(texts(&[40, 40]), Some(20), |s| s.as_str());
        assert_eq!(out.items.len(), 2);
        assert!(!out.truncated);

        let unbounded = apply_budget(texts(&[4000, 4000]), None, |s| s.as_str());
        assert_eq!(unbounded.total_tokens, 2000);
        assert!(!unbounded.truncated);
    }

    #[test]
    fn larger_budget_never_keeps_fewer_items() {
        let items = texts(&[12, 40, 7, 90, 33, 61]);
        let mut previous = 0;
        for max in (0..120).step_by(5) {
            let kept = apply_budget(items.clone(), Some(max), |s| s.as_str()).items.len();
            assert!(kept >= previous, "budget {max} kept {kept} < {previous}");
            previous = kept;
        }
    }
}
