//! One full analysis pass over a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{
    aggregate_agent_churn, aggregate_agent_invalidations, aggregate_failures, aggregate_spread,
    summarize_lifecycle, AgentChurnRow, AgentInvalidationReport, FailureCategory,
    LifecycleSummary, SpreadReport,
};
use crate::lifecycle::{LifecycleMatcher, MatchResult};
use crate::location::LocationMatcher;
use crate::snapshot::{SkipTally, Snapshot};

pub const OVERALL_SCOPE: &str = "overall";

/// Thresholds for one analysis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub coordinate_tolerance: f64,
    pub jaccard_threshold: f64,
    pub min_submissions_for_rate: usize,
    /// Pareto coverage target as a fraction.
    pub spread_coverage: f64,
    pub failure_categories: usize,
    pub notes_per_category: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let location = LocationMatcher::default();
        Self {
            coordinate_tolerance: location.coordinate_tolerance,
            jaccard_threshold: location.jaccard_threshold,
            min_submissions_for_rate: 10,
            spread_coverage: 0.95,
            failure_categories: 30,
            notes_per_category: 5,
        }
    }
}

impl AnalysisConfig {
    pub fn matcher(&self) -> LifecycleMatcher {
        LifecycleMatcher::new(LocationMatcher::new(
            self.coordinate_tolerance,
            self.jaccard_threshold,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub overall: LifecycleSummary,
    pub by_jurisdiction: Vec<LifecycleSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub snapshot_size: usize,
    pub skipped: SkipTally,
    pub agents: AgentInvalidationReport,
    pub churn: Vec<AgentChurnRow>,
    pub lifecycle: LifecycleReport,
    pub spread: SpreadReport,
    pub failures: Vec<FailureCategory>,
    #[serde(skip)]
    pub matches: Vec<MatchResult>,
}

pub fn analyze(snapshot: &Snapshot, config: &AnalysisConfig) -> AnalysisReport {
    let matcher = config.matcher();
    let matches = matcher.match_all(snapshot);

    let overall = summarize_lifecycle(OVERALL_SCOPE, snapshot.len(), &matches);
    let by_jurisdiction = snapshot
        .partition_by_jurisdiction()
        .into_iter()
        .map(|(jurisdiction, part)| {
            let part_matches = matcher.match_all(&part);
            summarize_lifecycle(jurisdiction, part.len(), &part_matches)
        })
        .collect();

    let report = AnalysisReport {
        generated_at: Utc::now(),
        snapshot_size: snapshot.len(),
        skipped: snapshot.skipped().clone(),
        agents: aggregate_agent_invalidations(snapshot.records(), config.min_submissions_for_rate),
        churn: aggregate_agent_churn(&matches),
        lifecycle: LifecycleReport {
            overall,
            by_jurisdiction,
        },
        spread: aggregate_spread(snapshot.records(), config.spread_coverage),
        failures: aggregate_failures(
            snapshot.records(),
            config.failure_categories,
            config.notes_per_category,
        ),
        matches,
    };

    debug!(
        records = report.snapshot_size,
        skipped = report.skipped.total,
        invalids = report.lifecycle.overall.total_invalids,
        followed_up = report.lifecycle.overall.followed_up,
        "analysis pass complete"
    );
    report
}
