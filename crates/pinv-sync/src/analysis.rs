//! Snapshot load, analysis pass and report output.

use std::path::PathBuf;

use anyhow::Result;
use pinv_analysis::{analyze, AnalysisConfig, AnalysisReport, Snapshot};
use pinv_core::RawApplicationRow;
use pinv_storage::PlanningStore;
use tracing::{info, info_span, Instrument};

use crate::reports::{ReportWriteSummary, ReportWriter};

pub struct AnalysisStageOutcome {
    pub report: AnalysisReport,
    pub written: ReportWriteSummary,
}

pub struct AnalysisStage {
    store: PlanningStore,
    writer: ReportWriter,
    config: AnalysisConfig,
}

impl AnalysisStage {
    pub fn new(store: PlanningStore, out_dir: impl Into<PathBuf>, config: AnalysisConfig) -> Self {
        Self {
            store,
            writer: ReportWriter::new(out_dir),
            config,
        }
    }

    pub async fn run(&self, jurisdiction: Option<&str>) -> Result<AnalysisStageOutcome> {
        let span = info_span!("analysis_stage", jurisdiction = jurisdiction.unwrap_or("all"));
        async {
            let rows = self.store.load_snapshot_rows(jurisdiction).await?;
            info!(rows = rows.len(), "snapshot loaded");

            let report = analyze_rows(rows, &self.config);
            let written = self.writer.write_all(&report).await;
            info!(
                records = report.snapshot_size,
                skipped = report.skipped.total,
                written = written.written.len(),
                failed = written.failed.len(),
                "analysis stage finished"
            );
            anyhow::Ok(AnalysisStageOutcome { report, written })
        }
        .instrument(span)
        .await
    }
}

/// Decode persisted rows into a snapshot and run one analysis pass over it.
pub fn analyze_rows(rows: Vec<RawApplicationRow>, config: &AnalysisConfig) -> AnalysisReport {
    let snapshot = Snapshot::from_rows(rows);
    analyze(&snapshot, config)
}
