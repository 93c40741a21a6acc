//! Agents dropped by their clients after an invalidation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::churn::ChurnOutcome;
use crate::keys::is_unknown_key;
use crate::lifecycle::MatchResult;

use super::percent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentChurnRow {
    pub name: String,
    pub invalid_count: usize,
    pub churned_count: usize,
    pub retained_count: usize,
    /// `churned / (churned + retained) * 100`; `None` when no outcome is known.
    pub loss_rate_percent: Option<f64>,
}

/// Per pre-invalidation agent: invalidations, churned and retained outcomes.
///
/// Indeterminate outcomes count toward `invalid_count` only. Agents never churned
/// are omitted; the rest are ranked by churned count, descending.
pub fn aggregate_agent_churn(results: &[MatchResult]) -> Vec<AgentChurnRow> {
    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, AgentChurnRow> = HashMap::new();

    for result in results {
        let agent = &result.pre_agent_key;
        if is_unknown_key(agent) {
            continue;
        }
        let row = rows.entry(agent.clone()).or_insert_with(|| {
            order.push(agent.clone());
            AgentChurnRow {
                name: agent.clone(),
                invalid_count: 0,
                churned_count: 0,
                retained_count: 0,
                loss_rate_percent: None,
            }
        });
        row.invalid_count += 1;
        match result.churn {
            ChurnOutcome::Churned => row.churned_count += 1,
            ChurnOutcome::Retained => row.retained_count += 1,
            ChurnOutcome::Indeterminate => {}
        }
    }

    let mut ranked: Vec<AgentChurnRow> = order
        .iter()
        .filter_map(|name| rows.remove(name))
        .filter(|row| row.churned_count > 0)
        .map(|mut row| {
            let known = row.churned_count + row.retained_count;
            row.loss_rate_percent = (known > 0).then(|| percent(row.churned_count, known));
            row
        })
        .collect();
    ranked.sort_by(|a, b| b.churned_count.cmp(&a.churned_count));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleOutcome;
    use pinv_core::RecordId;

    fn result(id: i64, pre: &str, churn: ChurnOutcome) -> MatchResult {
        let followed = churn != ChurnOutcome::Indeterminate;
        MatchResult {
            invalid_id: RecordId::new("DLR", id),
            matched_id: followed.then(|| RecordId::new("DLR", id + 100)),
            pre_agent_key: pre.to_string(),
            post_agent_key: None,
            outcome: if followed {
                LifecycleOutcome::FollowedUp
            } else {
                LifecycleOutcome::Abandoned
            },
            churn,
            days_to_reapply: None,
        }
    }

    #[test]
    fn counts_outcomes_per_pre_agent() {
        let rows = aggregate_agent_churn(&[
            result(1, "bob smith", ChurnOutcome::Churned),
            result(2, "bob smith", ChurnOutcome::Retained),
            result(3, "bob smith", ChurnOutcome::Indeterminate),
            result(4, "jane doyle", ChurnOutcome::Retained),
            result(5, "ann kelly", ChurnOutcome::Churned),
            result(6, "ann kelly", ChurnOutcome::Churned),
            result(7, "Unknown/None", ChurnOutcome::Churned),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "ann kelly");
        assert_eq!(rows[0].loss_rate_percent, Some(100.0));

        let bob = &rows[1];
        assert_eq!((bob.invalid_count, bob.churned_count, bob.retained_count), (3, 1, 1));
        assert_eq!(bob.loss_rate_percent, Some(50.0));
        for row in &rows {
            assert!(row.churned_count + row.retained_count <= row.invalid_count);
        }
    }
}
