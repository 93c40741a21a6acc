//! Agent retention heuristic between an invalidated application and its resubmission.

use serde::{Deserialize, Serialize};

use crate::keys::is_unknown_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnOutcome {
    Retained,
    Churned,
    /// Either side has no usable agent key, or there was no resubmission.
    Indeterminate,
}

/// Heuristic "same agent" test over two known keys: exact equality, or one key
/// contained in the other (either direction).
///
/// Containment tolerates naming drift such as an added organizational qualifier.
/// It will also treat unrelated agents with overlapping names (`"r kelly"` and
/// `"r kelly associates"`) as the same, and will miss a rebrand to an unrelated
/// name.
pub fn same_agent(a: &str, b: &str) -> bool {
    a == b || a.contains(b) || b.contains(a)
}

/// Classify the agent relationship between the pre- and post-invalidation keys.
pub fn classify_churn(pre_agent_key: &str, post_agent_key: &str) -> ChurnOutcome {
    if is_unknown_key(pre_agent_key) || is_unknown_key(post_agent_key) {
        ChurnOutcome::Indeterminate
    } else if same_agent(pre_agent_key, post_agent_key) {
        ChurnOutcome::Retained
    } else {
        ChurnOutcome::Churned
    }
}
