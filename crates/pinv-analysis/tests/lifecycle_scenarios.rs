use chrono::NaiveDate;
use pinv_analysis::{
    analyze, normalize, normalize_text, AnalysisConfig, ChurnOutcome, LifecycleMatcher,
    LifecycleOutcome, LocationMatcher, Snapshot, UNKNOWN_SENTINEL,
};
use pinv_core::{ApplicationRecord, RecordId, MISSING_TIMESTAMP};

fn application(
    id: i64,
    decision: &str,
    date: (i32, u32, u32),
    location: &str,
    agent: &str,
) -> ApplicationRecord {
    let mut r = ApplicationRecord::new("DLR", id, decision);
    r.registered_at = NaiveDate::from_ymd_opt(date.0, date.1, date.2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    r.applicant_forename = Some("J".into());
    r.applicant_surname = Some("Doe".into());
    r.location = Some(location.into());
    r.agent_contact_name = Some(agent.into());
    r
}

#[test]
fn scenario_a_resubmission_with_same_agent_is_retained() {
    let snapshot = Snapshot::new(vec![
        application(1, "INVALID APPLICATION", (2024, 1, 1), "12 High St", "Bob Smith"),
        application(2, "GRANT PERMISSION", (2024, 2, 1), "12 High Street", "Bob Smith Arch"),
    ]);
    let results = LifecycleMatcher::default().match_all(&snapshot);
    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.outcome, LifecycleOutcome::FollowedUp);
    assert_eq!(r.matched_id, Some(RecordId::new("DLR", 2)));
    assert_eq!(r.churn, ChurnOutcome::Retained);
    assert_eq!(r.days_to_reapply, Some(31));
}

#[test]
fn scenario_b_resubmission_with_new_agent_is_churned() {
    let snapshot = Snapshot::new(vec![
        application(1, "INVALID APPLICATION", (2024, 1, 1), "12 High St", "Bob Smith"),
        application(2, "GRANT PERMISSION", (2024, 2, 1), "12 High Street", "Jane Doyle"),
    ]);
    let results = LifecycleMatcher::default().match_all(&snapshot);
    assert_eq!(results[0].outcome, LifecycleOutcome::FollowedUp);
    assert_eq!(results[0].churn, ChurnOutcome::Churned);
    assert_eq!(results[0].post_agent_key.as_deref(), Some("jane doyle"));
}

#[test]
fn scenario_c_no_later_application_is_abandoned() {
    let snapshot = Snapshot::new(vec![application(
        1,
        "INVALID APPLICATION",
        (2024, 1, 1),
        "12 High St",
        "Bob Smith",
    )]);
    let report = analyze(&snapshot, &AnalysisConfig::default());
    let overall = &report.lifecycle.overall;
    assert_eq!(overall.abandoned, 1);
    assert_eq!(overall.followed_up, 0);
    assert_eq!(overall.churn_rate, 0.0);
    assert_eq!(report.matches[0].churn, ChurnOutcome::Indeterminate);
    assert!(report.churn.is_empty());
}

#[test]
fn scenario_d_distant_coordinates_and_disjoint_text_do_not_match() {
    let mut a = application(1, "INVALID", (2024, 1, 1), "Seafield Lodge", "Bob Smith");
    a.easting = Some(100.0);
    a.northing = Some(100.0);
    let mut b = application(2, "GRANTED", (2024, 2, 1), "Rathmore Cottage", "Bob Smith");
    b.easting = Some(200.0);
    b.northing = Some(200.0);

    let matcher = LocationMatcher::default();
    assert!(!matcher.matches(&a, &b));

    let results = LifecycleMatcher::default().match_all(&Snapshot::new(vec![a, b]));
    assert_eq!(results[0].outcome, LifecycleOutcome::Abandoned);
}

#[test]
fn close_coordinates_override_divergent_text() {
    let mut a = application(1, "INVALID", (2024, 1, 1), "Seafield Lodge", "Bob Smith");
    a.easting = Some(100.0);
    a.northing = Some(100.0);
    let mut b = application(2, "GRANTED", (2024, 2, 1), "Rathmore Cottage", "Bob Smith");
    b.easting = Some(130.0);
    b.northing = Some(130.0);
    assert!(LocationMatcher::default().matches(&a, &b));
}

#[test]
fn location_matching_is_symmetric() {
    let locations = [
        ("12 High St", None),
        ("12 High Street, Dublin", Some((100.0, 100.0))),
        ("Site at Rear, 4 Pier Rd", Some((120.0, 90.0))),
        ("4 Pier Road", None),
        ("The Old Mill, Ave Lane", Some((5000.0, 5000.0))),
        ("", None),
    ];
    let records: Vec<_> = locations
        .iter()
        .enumerate()
        .map(|(i, (loc, grid))| {
            let mut r = application(i as i64, "GRANTED", (2024, 1, 1), loc, "x");
            if let Some((x, y)) = grid {
                r.easting = Some(*x);
                r.northing = Some(*y);
            }
            r
        })
        .collect();
    let matcher = LocationMatcher::default();
    for a in &records {
        for b in &records {
            assert_eq!(matcher.matches(a, b), matcher.matches(b, a));
        }
    }
}

#[test]
fn every_invalidation_gets_exactly_one_outcome() {
    let snapshot = Snapshot::new(vec![
        application(1, "INVALID", (2024, 1, 1), "12 High St", "Bob Smith"),
        application(2, "Invalid", (2024, 1, 5), "9 Low Rd", "Bob Smith"),
        application(3, "GRANTED", (2024, 2, 1), "12 High Street", "Jane Doyle"),
        application(4, "REFUSED", (2024, 3, 1), "Elsewhere", "Jane Doyle"),
    ]);
    let report = analyze(&snapshot, &AnalysisConfig::default());
    let overall = &report.lifecycle.overall;
    assert_eq!(overall.total_invalids, 2);
    assert_eq!(overall.followed_up + overall.abandoned, 2);
    assert_eq!(overall.invalidation_rate, 50.0);
    assert_eq!(overall.churn_rate, 100.0);
    assert_eq!(report.churn[0].name, "bob smith");
    assert_eq!(report.churn[0].invalid_count, 2);
    assert_eq!(report.churn[0].churned_count, 1);
}

#[test]
fn jurisdiction_summaries_use_their_own_partition() {
    let mut other = application(10, "INVALID", (2024, 1, 1), "1 Main St", "Ann Kelly");
    other.jurisdiction = "FG".into();
    let snapshot = Snapshot::new(vec![
        application(1, "INVALID", (2024, 1, 1), "12 High St", "Bob Smith"),
        application(2, "GRANTED", (2024, 2, 1), "12 High Street", "Bob Smith"),
        other,
    ]);
    let report = analyze(&snapshot, &AnalysisConfig::default());
    let scopes: Vec<_> = report
        .lifecycle
        .by_jurisdiction
        .iter()
        .map(|s| (s.scope_label.as_str(), s.total_applications, s.followed_up))
        .collect();
    assert_eq!(scopes, vec![("DLR", 2, 1), ("FG", 1, 0)]);
    assert_eq!(report.lifecycle.overall.total_applications, 3);
}

#[test]
fn normalize_is_idempotent_and_handles_absence() {
    assert_eq!(normalize_text(None), UNKNOWN_SENTINEL);
    for raw in ["Bob Smith Arch", "J. O'Doe (Agent) <j@doe.ie>", "x"] {
        let once = normalize(raw);
        assert_eq!(normalize(&once), once);
    }
}

#[test]
fn undated_invalidation_still_follows_up_without_a_day_count() {
    let mut undated = application(1, "INVALID APPLICATION", (2024, 1, 1), "12 High St", "Bob Smith");
    undated.registered_at = MISSING_TIMESTAMP;
    let snapshot = Snapshot::new(vec![
        undated,
        application(2, "INVALID APPLICATION", (2024, 1, 1), "12 High St", "Bob Smith"),
        application(3, "GRANT PERMISSION", (2024, 2, 1), "12 High Street", "Bob Smith"),
    ]);

    let report = analyze(&snapshot, &AnalysisConfig::default());
    let undated_match = report
        .matches
        .iter()
        .find(|m| m.invalid_id == RecordId::new("DLR", 1))
        .expect("undated invalidation");
    assert_eq!(undated_match.outcome, LifecycleOutcome::FollowedUp);
    assert_eq!(undated_match.churn, ChurnOutcome::Retained);
    assert_eq!(undated_match.days_to_reapply, None);

    let overall = &report.lifecycle.overall;
    assert_eq!(overall.followed_up, 2);
    assert_eq!(overall.avg_days_to_reapply, 31.0);
}
