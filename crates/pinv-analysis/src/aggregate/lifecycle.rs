//! Follow-up, abandonment and churn rates for one scope (overall or a jurisdiction).

use serde::{Deserialize, Serialize};

use crate::churn::ChurnOutcome;
use crate::lifecycle::{LifecycleOutcome, MatchResult};

use super::percent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleSummary {
    pub scope_label: String,
    pub total_applications: usize,
    pub total_invalids: usize,
    pub followed_up: usize,
    pub abandoned: usize,
    pub churned: usize,
    pub retained: usize,
    pub indeterminate: usize,
    pub invalidation_rate: f64,
    pub follow_up_rate: f64,
    pub abandonment_rate: f64,
    /// Mean over follow-ups whose invalidated record carries a registration date.
    pub avg_days_to_reapply: f64,
    /// Churned over follow-ups with a known outcome (churned + retained).
    pub churn_rate: f64,
}

pub fn summarize_lifecycle(
    scope_label: impl Into<String>,
    total_applications: usize,
    results: &[MatchResult],
) -> LifecycleSummary {
    let total_invalids = results.len();
    let mut followed_up = 0usize;
    let mut abandoned = 0usize;
    let mut churned = 0usize;
    let mut retained = 0usize;
    let mut indeterminate = 0usize;
    let mut total_days = 0i64;
    let mut dated_follow_ups = 0usize;

    for result in results {
        match result.outcome {
            LifecycleOutcome::Abandoned => abandoned += 1,
            LifecycleOutcome::FollowedUp => {
                followed_up += 1;
                if let Some(days) = result.days_to_reapply {
                    total_days += days;
                    dated_follow_ups += 1;
                }
                match result.churn {
                    ChurnOutcome::Churned => churned += 1,
                    ChurnOutcome::Retained => retained += 1,
                    ChurnOutcome::Indeterminate => indeterminate += 1,
                }
            }
        }
    }

    let avg_days_to_reapply = if dated_follow_ups == 0 {
        0.0
    } else {
        total_days as f64 / dated_follow_ups as f64
    };

    LifecycleSummary {
        scope_label: scope_label.into(),
        total_applications,
        total_invalids,
        followed_up,
        abandoned,
        churned,
        retained,
        indeterminate,
        invalidation_rate: percent(total_invalids, total_applications),
        follow_up_rate: percent(followed_up, total_invalids),
        abandonment_rate: percent(abandoned, total_invalids),
        avg_days_to_reapply,
        churn_rate: percent(churned, churned + retained),
    }
}
