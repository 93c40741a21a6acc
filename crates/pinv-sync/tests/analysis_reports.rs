use std::path::PathBuf;

use pinv_adapters::{load_fixture_json, parse_conditions, parse_search_response};
use pinv_analysis::aggregate::GENERIC_NOTE;
use pinv_analysis::{AnalysisConfig, AnalysisReport, ChurnOutcome, LifecycleOutcome};
use pinv_core::{InvalidationNote, RawApplicationRow};
use pinv_sync::reports::{AGENTS_CSV, AGENTS_JSON, BRIEF_MD, CHURN_JSON, LIFECYCLE_JSON, SPREAD_JSON};
use pinv_sync::{analyze_rows, render_brief, ReportWriter};
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/agile")
        .join(name)
}

/// Rows shaped the way the store hands them over after a sync of the fixtures.
fn fixture_rows() -> Vec<RawApplicationRow> {
    let page = parse_search_response(load_fixture_json(fixture("search_results.json")).expect("search"))
        .expect("page");
    let conditions =
        parse_conditions(load_fixture_json(fixture("conditions.json")).expect("conditions")).expect("parsed");
    let notes: Vec<InvalidationNote> = conditions
        .into_iter()
        .map(|c| InvalidationNote {
            category: c.short_desc,
            detail: c.long_desc,
        })
        .collect();

    let mut rows: Vec<RawApplicationRow> = page
        .applications
        .into_iter()
        .map(|draft| RawApplicationRow {
            id: draft.id,
            jurisdiction: "dunlaoghaire".to_string(),
            decision: draft.decision,
            registration_date: draft.registration_date,
            grid_x: draft.grid_x,
            grid_y: draft.grid_y,
            raw_json: Some(draft.raw),
            notes: Vec::new(),
        })
        .collect();
    rows[0].notes = notes;

    rows.push(RawApplicationRow {
        id: 40999,
        jurisdiction: "dunlaoghaire".to_string(),
        decision: Some("INVALID".to_string()),
        registration_date: Some("2024-05-01".to_string()),
        grid_x: None,
        grid_y: None,
        raw_json: None,
        notes: Vec::new(),
    });
    rows
}

fn fixture_report() -> AnalysisReport {
    analyze_rows(fixture_rows(), &AnalysisConfig::default())
}

#[test]
fn fixture_resubmission_with_new_agent_is_churn() {
    let report = fixture_report();

    assert_eq!(report.snapshot_size, 2);
    assert_eq!(report.skipped.total, 1);
    assert_eq!(report.skipped.by_reason.get("missing_payload"), Some(&1));

    let overall = &report.lifecycle.overall;
    assert_eq!(overall.total_invalids, 1);
    assert_eq!(overall.followed_up, 1);
    assert_eq!(overall.churned, 1);
    assert_eq!(overall.avg_days_to_reapply, 49.0);

    let matched = &report.matches[0];
    assert_eq!(matched.invalid_id.id, 40211);
    assert_eq!(matched.outcome, LifecycleOutcome::FollowedUp);
    assert_eq!(matched.churn, ChurnOutcome::Churned);
    assert_eq!(report.churn[0].name, "ciaran walsh");
}

#[test]
fn fixture_reasons_feed_spread_and_failure_breakdown() {
    let report = fixture_report();

    assert_eq!(report.spread.total_issues, 2);
    assert_eq!(report.failures.len(), 2);
    let newspaper = report
        .failures
        .iter()
        .find(|f| f.category == "Newspaper Notice")
        .expect("newspaper category");
    assert_eq!(newspaper.top_notes[0].note, GENERIC_NOTE);
}

#[tokio::test]
async fn writer_emits_every_report_file() {
    let dir = tempdir().expect("tempdir");
    let report = fixture_report();
    let writer = ReportWriter::new(dir.path().join("out"));

    let summary = writer.write_all(&report).await;
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    assert_eq!(summary.written.len(), 7);

    let lifecycle: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("out").join(LIFECYCLE_JSON)).expect("lifecycle"),
    )
    .expect("json");
    assert!(lifecycle["timestamp"].is_string());
    assert_eq!(lifecycle["data"]["overall"]["followed_up"], 1);

    let churn: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("out").join(CHURN_JSON)).expect("churn"),
    )
    .expect("json");
    assert_eq!(churn["data"][0]["churned_count"], 1);

    let csv = std::fs::read_to_string(dir.path().join("out").join(AGENTS_CSV)).expect("csv");
    assert!(csv.starts_with("agent,invalid_count,total_submissions,invalid_rate_percent,email,phone"));
}

#[tokio::test]
async fn one_unwritable_report_does_not_block_the_rest() {
    let dir = tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join(AGENTS_JSON)).expect("blocking directory");

    let summary = ReportWriter::new(dir.path()).write_all(&fixture_report()).await;

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].file, AGENTS_JSON);
    assert_eq!(summary.written.len(), 6);
    assert!(dir.path().join(SPREAD_JSON).exists());
    assert!(dir.path().join(BRIEF_MD).exists());
}

#[test]
fn brief_lists_lifecycle_per_jurisdiction_and_skips() {
    let brief = render_brief(&fixture_report(), 5);

    assert!(brief.starts_with("# Planning Invalidation Brief"));
    assert!(brief.contains("| overall | 2 | 1 |"));
    assert!(brief.contains("| dunlaoghaire | 2 | 1 |"));
    assert!(brief.contains("## Agents losing clients after invalidation"));
    assert!(brief.contains("- missing_payload: 1"));
}

#[test]
fn brief_is_built_line_by_line_with_blank_separators() {
    let brief = render_brief(&fixture_report(), 5);
    let lines: Vec<&str> = brief.lines().collect();

    assert_eq!(lines[0], "# Planning Invalidation Brief");
    assert_eq!(lines[1], "");
    assert!(brief.ends_with('\n'));
    let rate_heading = lines
        .iter()
        .position(|l| *l == "## Agents by invalidation rate (min 10 submissions)")
        .expect("rate heading");
    assert_eq!(lines[rate_heading + 1], "");
    assert_eq!(lines[rate_heading + 2], "| Agent | Invalid | Total | Rate |");
}
