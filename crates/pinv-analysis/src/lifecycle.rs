//! Links each invalidated application to its earliest same-site resubmission.

use std::collections::HashMap;

use pinv_core::{ApplicationRecord, RecordId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::churn::{classify_churn, ChurnOutcome};
use crate::keys::{agent_key, applicant_key};
use crate::location::LocationMatcher;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOutcome {
    FollowedUp,
    Abandoned,
}

/// Per-invalidation result of one analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub invalid_id: RecordId,
    pub matched_id: Option<RecordId>,
    pub pre_agent_key: String,
    pub post_agent_key: Option<String>,
    pub outcome: LifecycleOutcome,
    pub churn: ChurnOutcome,
    pub days_to_reapply: Option<i64>,
}

/// Applicant key -> that applicant's records, in snapshot (chronological) order.
#[derive(Debug, Default)]
pub struct ApplicantIndex<'a> {
    by_applicant: HashMap<String, Vec<&'a ApplicationRecord>>,
}

impl<'a> ApplicantIndex<'a> {
    pub fn build(snapshot: &'a Snapshot) -> Self {
        let mut by_applicant: HashMap<String, Vec<&'a ApplicationRecord>> = HashMap::new();
        for record in snapshot.records() {
            let key = applicant_key(record);
            if key.is_empty() {
                continue;
            }
            by_applicant.entry(key).or_default().push(record);
        }
        Self { by_applicant }
    }

    pub fn candidates(&self, applicant_key: &str) -> &[&'a ApplicationRecord] {
        self.by_applicant
            .get(applicant_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn applicant_count(&self) -> usize {
        self.by_applicant.len()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleMatcher {
    location: LocationMatcher,
}

impl LifecycleMatcher {
    pub fn new(location: LocationMatcher) -> Self {
        Self { location }
    }

    /// Earliest candidate of the same applicant, strictly later than `invalid`, at the same site.
    pub fn find_resubmission<'a>(
        &self,
        invalid: &ApplicationRecord,
        index: &ApplicantIndex<'a>,
    ) -> Option<&'a ApplicationRecord> {
        let key = applicant_key(invalid);
        index
            .candidates(&key)
            .iter()
            .copied()
            .filter(|candidate| !candidate.same_identity(invalid))
            .filter(|candidate| candidate.registered_at > invalid.registered_at)
            .find(|candidate| self.location.matches(invalid, candidate))
    }

    /// One [`MatchResult`] per invalidated record of the snapshot, in snapshot order.
    pub fn match_all(&self, snapshot: &Snapshot) -> Vec<MatchResult> {
        let index = ApplicantIndex::build(snapshot);
        debug!(applicants = index.applicant_count(), "applicant index built");
        snapshot
            .records()
            .iter()
            .filter(|record| record.is_invalidated())
            .map(|invalid| self.resolve(invalid, &index))
            .collect()
    }

    fn resolve(&self, invalid: &ApplicationRecord, index: &ApplicantIndex<'_>) -> MatchResult {
        let pre_agent_key = agent_key(invalid);
        match self.find_resubmission(invalid, index) {
            Some(resubmission) => {
                let post_agent_key = agent_key(resubmission);
                let churn = classify_churn(&pre_agent_key, &post_agent_key);
                let days = invalid
                    .has_registration()
                    .then(|| (resubmission.registered_at - invalid.registered_at).num_days());
                MatchResult {
                    invalid_id: invalid.record_id(),
                    matched_id: Some(resubmission.record_id()),
                    pre_agent_key,
                    post_agent_key: Some(post_agent_key),
                    outcome: LifecycleOutcome::FollowedUp,
                    churn,
                    days_to_reapply: days,
                }
            }
            None => MatchResult {
                invalid_id: invalid.record_id(),
                matched_id: None,
                pre_agent_key,
                post_agent_key: None,
                outcome: LifecycleOutcome::Abandoned,
                churn: ChurnOutcome::Indeterminate,
                days_to_reapply: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn app(id: i64, decision: &str, date: (i32, u32, u32), location: &str) -> ApplicationRecord {
        let mut r = ApplicationRecord::new("DLR", id, decision);
        r.registered_at = NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        r.applicant_forename = Some("J".into());
        r.applicant_surname = Some("Doe".into());
        r.location = Some(location.into());
        r.agent_contact_name = Some("Bob Smith".into());
        r
    }

    #[test]
    fn picks_the_earliest_later_candidate() {
        let snapshot = Snapshot::new(vec![
            app(3, "GRANT PERMISSION", (2024, 3, 1), "12 High Street"),
            app(1, "INVALID", (2024, 1, 1), "12 High St"),
            app(2, "GRANT PERMISSION", (2024, 2, 1), "12 High Street"),
        ]);
        let results = LifecycleMatcher::default().match_all(&snapshot);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].matched_id, Some(RecordId::new("DLR", 2)));
        assert_eq!(results[0].days_to_reapply, Some(31));
    }

    #[test]
    fn earlier_and_same_time_candidates_are_ignored() {
        let snapshot = Snapshot::new(vec![
            app(1, "GRANT PERMISSION", (2023, 12, 1), "12 High Street"),
            app(2, "INVALID", (2024, 1, 1), "12 High St"),
            app(3, "GRANT PERMISSION", (2024, 1, 1), "12 High Street"),
        ]);
        let results = LifecycleMatcher::default().match_all(&snapshot);
        assert_eq!(results[0].outcome, LifecycleOutcome::Abandoned);
        assert_eq!(results[0].churn, ChurnOutcome::Indeterminate);
        assert_eq!(results[0].days_to_reapply, None);
    }

    #[test]
    fn a_later_invalid_application_can_be_the_follow_up() {
        let snapshot = Snapshot::new(vec![
            app(1, "INVALID", (2024, 1, 1), "12 High St"),
            app(2, "INVALID", (2024, 1, 20), "12 High Street"),
        ]);
        let results = LifecycleMatcher::default().match_all(&snapshot);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].matched_id, Some(RecordId::new("DLR", 2)));
        assert_eq!(results[1].outcome, LifecycleOutcome::Abandoned);
    }

    #[test]
    fn applicant_without_name_has_no_candidates() {
        let mut invalid = app(1, "INVALID", (2024, 1, 1), "12 High St");
        let mut later = app(2, "GRANTED", (2024, 2, 1), "12 High St");
        for r in [&mut invalid, &mut later] {
            r.applicant_forename = None;
            r.applicant_surname = None;
        }
        let snapshot = Snapshot::new(vec![invalid, later]);
        let results = LifecycleMatcher::default().match_all(&snapshot);
        assert_eq!(results[0].outcome, LifecycleOutcome::Abandoned);
    }

    #[test]
    fn same_id_in_another_jurisdiction_is_a_distinct_record() {
        let invalid = app(1, "INVALID", (2024, 1, 1), "12 High St");
        let mut other = app(1, "GRANTED", (2024, 2, 1), "12 High Street");
        other.jurisdiction = "FG".into();
        let snapshot = Snapshot::new(vec![invalid, other]);
        let results = LifecycleMatcher::default().match_all(&snapshot);
        assert_eq!(results[0].matched_id, Some(RecordId::new("FG", 1)));
    }
}
