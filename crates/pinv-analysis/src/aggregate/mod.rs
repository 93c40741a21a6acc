//! Report producers over a snapshot and its match results.
//!
//! Every producer shares [`FrequencyTable`] and [`percent`], so ranking and
//! division-by-zero behavior cannot drift between reports.

use std::collections::HashMap;

pub mod agents;
pub mod failures;
pub mod lifecycle;
pub mod retention;
pub mod spread;

pub use agents::{aggregate_agent_invalidations, AgentInvalidationReport, AgentLeaderboardRow};
pub use failures::{aggregate_failures, clean_note, FailureCategory, NoteCount, GENERIC_NOTE};
pub use lifecycle::{summarize_lifecycle, LifecycleSummary};
pub use retention::{aggregate_agent_churn, AgentChurnRow};
pub use spread::{aggregate_spread, SpreadReport, SpreadRow, UNSPECIFIED_REASON};

/// `numerator / denominator * 100`, or `0.0` when the denominator is zero.
pub fn percent(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

/// Value counts that remember first-seen order.
///
/// Rankings are by count descending; equal counts keep first-seen order, which
/// makes ties deterministic for a given snapshot order.
#[derive(Debug, Clone, Default)]
pub struct FrequencyTable {
    entries: Vec<(String, usize)>,
    positions: HashMap<String, usize>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: &str) {
        match self.positions.get(value) {
            Some(&pos) => self.entries[pos].1 += 1,
            None => {
                self.positions.insert(value.to_string(), self.entries.len());
                self.entries.push((value.to_string(), 1));
            }
        }
    }

    /// Count a value unless it is empty.
    pub fn add_non_empty(&mut self, value: &str) {
        if !value.is_empty() {
            self.add(value);
        }
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest count, earliest-seen on ties.
    pub fn most_common(&self) -> Option<&str> {
        let mut best: Option<&(String, usize)> = None;
        for entry in &self.entries {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(value, _)| value.as_str())
    }

    pub fn ranked(&self) -> Vec<(String, usize)> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }
}
