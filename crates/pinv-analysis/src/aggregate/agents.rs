//! Per-agent invalidation leaderboard.

use std::collections::HashMap;

use pinv_core::ApplicationRecord;
use serde::{Deserialize, Serialize};

use super::{percent, FrequencyTable};
use crate::contact::extract_email;
use crate::keys::{agent_key, is_unknown_key};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLeaderboardRow {
    pub name: String,
    pub invalid_count: usize,
    pub total: usize,
    pub rate_percent: f64,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInvalidationReport {
    /// Ranked by raw invalid count.
    pub by_invalid_count: Vec<AgentLeaderboardRow>,
    /// Ranked by rate, restricted to agents with at least `min_submissions_for_rate` submissions.
    pub by_rate: Vec<AgentLeaderboardRow>,
    pub min_submissions_for_rate: usize,
}

#[derive(Debug, Default)]
struct AgentTally {
    total: usize,
    invalid: usize,
    emails: FrequencyTable,
    phones: FrequencyTable,
}

pub fn aggregate_agent_invalidations(
    records: &[ApplicationRecord],
    min_submissions_for_rate: usize,
) -> AgentInvalidationReport {
    let mut order: Vec<String> = Vec::new();
    let mut tallies: HashMap<String, AgentTally> = HashMap::new();

    for record in records {
        let agent = agent_key(record);
        if is_unknown_key(&agent) {
            continue;
        }
        let tally = tallies.entry(agent.clone()).or_insert_with(|| {
            order.push(agent.clone());
            AgentTally::default()
        });
        tally.total += 1;
        if record.is_invalidated() {
            tally.invalid += 1;
        }
        tally
            .emails
            .add_non_empty(&extract_email(record.agent_email.as_deref()));
        tally
            .phones
            .add_non_empty(record.agent_phone.as_deref().unwrap_or_default().trim());
    }

    let rows: Vec<AgentLeaderboardRow> = order
        .into_iter()
        .filter_map(|name| {
            let tally = tallies.remove(&name)?;
            (tally.total > 0).then(|| AgentLeaderboardRow {
                invalid_count: tally.invalid,
                total: tally.total,
                rate_percent: percent(tally.invalid, tally.total),
                email: tally.emails.most_common().unwrap_or_default().to_string(),
                phone: tally.phones.most_common().unwrap_or_default().to_string(),
                name,
            })
        })
        .collect();

    let mut by_invalid_count = rows.clone();
    by_invalid_count.sort_by(|a, b| b.invalid_count.cmp(&a.invalid_count));

    let mut by_rate: Vec<_> = rows
        .into_iter()
        .filter(|row| row.total >= min_submissions_for_rate)
        .collect();
    by_rate.sort_by(|a, b| b.rate_percent.total_cmp(&a.rate_percent));

    AgentInvalidationReport {
        by_invalid_count,
        by_rate,
        min_submissions_for_rate,
    }
}
