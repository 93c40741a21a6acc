//! JSON envelopes, the agent CSV and the Markdown brief written after each analysis pass.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pinv_analysis::aggregate::{AgentLeaderboardRow, LifecycleSummary};
use pinv_analysis::AnalysisReport;
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

pub const AGENTS_JSON: &str = "agents_latest.json";
pub const CHURN_JSON: &str = "churn_latest.json";
pub const FAILURES_JSON: &str = "failures_latest.json";
pub const LIFECYCLE_JSON: &str = "lifecycle_latest.json";
pub const SPREAD_JSON: &str = "spread_latest.json";
pub const AGENTS_CSV: &str = "agents_latest.csv";
pub const BRIEF_MD: &str = "brief_latest.md";

const BRIEF_TOP_ROWS: usize = 10;

#[derive(Debug, Serialize)]
struct ReportEnvelope<'a, T: Serialize> {
    timestamp: DateTime<Utc>,
    data: &'a T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFailure {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportWriteSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<ReportFailure>,
}

#[derive(Debug, Clone)]
pub struct ReportWriter {
    out_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Write every report file. Each file is attempted independently; failures are
    /// logged and collected rather than returned.
    pub async fn write_all(&self, report: &AnalysisReport) -> ReportWriteSummary {
        let mut summary = ReportWriteSummary::default();

        if let Err(err) = fs::create_dir_all(&self.out_dir).await {
            warn!(dir = %self.out_dir.display(), error = %err, "cannot create report directory");
        }

        let at = report.generated_at;
        let outputs: Vec<(&str, Result<Vec<u8>>)> = vec![
            (AGENTS_JSON, envelope_bytes(at, &report.agents)),
            (CHURN_JSON, envelope_bytes(at, &report.churn)),
            (FAILURES_JSON, envelope_bytes(at, &report.failures)),
            (LIFECYCLE_JSON, envelope_bytes(at, &report.lifecycle)),
            (SPREAD_JSON, envelope_bytes(at, &report.spread)),
            (AGENTS_CSV, agents_csv(&report.agents.by_invalid_count)),
            (BRIEF_MD, Ok(render_brief(report, BRIEF_TOP_ROWS).into_bytes())),
        ];

        for (file, bytes) in outputs {
            let path = self.out_dir.join(file);
            let result = match bytes {
                Ok(bytes) => fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("writing {}", path.display())),
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => summary.written.push(path),
                Err(err) => {
                    warn!(file, error = %format!("{err:#}"), "report not written");
                    summary.failed.push(ReportFailure {
                        file: file.to_string(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        info!(
            dir = %self.out_dir.display(),
            written = summary.written.len(),
            failed = summary.failed.len(),
            "reports written"
        );
        summary
    }
}

fn envelope_bytes<T: Serialize>(timestamp: DateTime<Utc>, data: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(&ReportEnvelope { timestamp, data }).context("serializing report envelope")
}

#[derive(Debug, Serialize)]
struct AgentCsvRow<'a> {
    agent: &'a str,
    invalid_count: usize,
    total_submissions: usize,
    invalid_rate_percent: String,
    email: &'a str,
    phone: &'a str,
}

fn agents_csv(rows: &[AgentLeaderboardRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(AgentCsvRow {
                agent: &row.name,
                invalid_count: row.invalid_count,
                total_submissions: row.total,
                invalid_rate_percent: format!("{:.2}", row.rate_percent),
                email: &row.email,
                phone: &row.phone,
            })
            .context("serializing agent csv row")?;
    }
    writer.into_inner().context("flushing agent csv")
}

/// Markdown digest of one analysis pass: lifecycle, agents, churn, reasons, skips.
pub fn render_brief(report: &AnalysisReport, top: usize) -> String {
    let overall = &report.lifecycle.overall;
    let mut lines = vec![
        "# Planning Invalidation Brief".to_string(),
        String::new(),
        format!("- Generated: {}", report.generated_at.to_rfc3339()),
        format!("- Applications analysed: {}", report.snapshot_size),
        format!("- Records skipped: {}", report.skipped.total),
        format!(
            "- Invalidated: {} ({:.1}%)",
            overall.total_invalids, overall.invalidation_rate
        ),
        String::new(),
        "## Lifecycle".to_string(),
        String::new(),
        "| Scope | Applications | Invalid | Followed up | Abandoned | Avg days | Churn rate |".to_string(),
        "|---|---:|---:|---:|---:|---:|---:|".to_string(),
    ];
    lines.extend(
        std::iter::once(overall)
            .chain(report.lifecycle.by_jurisdiction.iter())
            .map(lifecycle_row),
    );

    lines.push(String::new());
    lines.push("## Agents by invalidations".to_string());
    lines.push(String::new());
    lines.extend(agent_table(report.agents.by_invalid_count.iter().take(top)));

    lines.push(String::new());
    lines.push(format!(
        "## Agents by invalidation rate (min {} submissions)",
        report.agents.min_submissions_for_rate
    ));
    lines.push(String::new());
    lines.extend(agent_table(report.agents.by_rate.iter().take(top)));

    lines.push(String::new());
    lines.push("## Agents losing clients after invalidation".to_string());
    lines.push(String::new());
    if report.churn.is_empty() {
        lines.push("_No churn observed._".to_string());
    } else {
        lines.push("| Agent | Invalid | Churned | Retained | Loss rate |".to_string());
        lines.push("|---|---:|---:|---:|---:|".to_string());
        for row in report.churn.iter().take(top) {
            let loss = row
                .loss_rate_percent
                .map(|r| format!("{r:.1}%"))
                .unwrap_or_else(|| "n/a".to_string());
            lines.push(format!(
                "| {} | {} | {} | {} | {} |",
                escape_cell(&row.name),
                row.invalid_count,
                row.churned_count,
                row.retained_count,
                loss
            ));
        }
    }

    let spread = &report.spread;
    lines.push(String::new());
    lines.push("## Invalidation reasons".to_string());
    lines.push(String::new());
    lines.push(format!(
        "{} cited reasons; the top 10 cover {} ({:.1}%).",
        spread.total_issues, spread.top_10_count, spread.top_10_pct
    ));
    if let Some(rank) = spread.coverage_rank {
        lines.push(format!(
            "{rank} reasons reach {:.0}% coverage.",
            spread.coverage_target_pct
        ));
    }
    lines.push(String::new());
    lines.push("| # | Reason | Count | Share | Cumulative |".to_string());
    lines.push("|---:|---|---:|---:|---:|".to_string());
    for row in spread.rows.iter().take(top) {
        lines.push(format!(
            "| {} | {} | {} | {:.1}% | {:.1}% |",
            row.rank,
            escape_cell(&row.reason),
            row.count,
            row.pct_of_total,
            row.cumulative_pct
        ));
    }

    if !report.failures.is_empty() {
        lines.push(String::new());
        lines.push("## Failure notes".to_string());
        lines.push(String::new());
        for category in report.failures.iter().take(top) {
            lines.push(format!(
                "- **{}** ({})",
                escape_cell(&category.category),
                category.count
            ));
            for note in &category.top_notes {
                lines.push(format!("  - {} ({})", note.note, note.count));
            }
        }
    }

    if !report.skipped.is_empty() {
        lines.push(String::new());
        lines.push("## Skipped records".to_string());
        lines.push(String::new());
        for (reason, count) in &report.skipped.by_reason {
            lines.push(format!("- {reason}: {count}"));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

fn lifecycle_row(summary: &LifecycleSummary) -> String {
    format!(
        "| {} | {} | {} | {} ({:.1}%) | {} ({:.1}%) | {:.1} | {:.1}% |",
        summary.scope_label,
        summary.total_applications,
        summary.total_invalids,
        summary.followed_up,
        summary.follow_up_rate,
        summary.abandoned,
        summary.abandonment_rate,
        summary.avg_days_to_reapply,
        summary.churn_rate
    )
}

fn agent_table<'a>(rows: impl Iterator<Item = &'a AgentLeaderboardRow>) -> Vec<String> {
    let mut lines = vec![
        "| Agent | Invalid | Total | Rate |".to_string(),
        "|---|---:|---:|---:|".to_string(),
    ];
    lines.extend(rows.map(|row| {
        format!(
            "| {} | {} | {} | {:.1}% |",
            escape_cell(&row.name),
            row.invalid_count,
            row.total,
            row.rate_percent
        )
    }));
    lines
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
