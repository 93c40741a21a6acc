use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use pinv_analysis::aggregate::AgentLeaderboardRow;
use pinv_analysis::{AnalysisConfig, AnalysisReport};
use pinv_storage::{PlanningStore, SearchFilter, SearchHit};
use pinv_sync::{AnalysisStage, SyncConfig, SyncOptions, SyncPipeline, SyncRunSummary};
use tracing::info;

mod telemetry;

#[derive(Debug, Parser)]
#[command(name = "pinv")]
#[command(about = "Planning application invalidation analytics")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync every enabled jurisdiction, then analyse (the default).
    Run {
        #[arg(long, conflicts_with = "analyze_only")]
        sync_only: bool,
        #[arg(long)]
        analyze_only: bool,
    },
    /// Fetch new applications and hydrate their details.
    Sync {
        #[arg(long)]
        jurisdiction: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Only store search results; skip detail/document/condition fetches.
        #[arg(long)]
        no_hydrate: bool,
        /// Hydrate every stored application again, not just unhydrated ones.
        #[arg(long)]
        rehydrate: bool,
    },
    /// Analyse the stored snapshot and write reports.
    Analyze {
        #[arg(long)]
        jurisdiction: Option<String>,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Create or upgrade the database schema.
    Migrate,
    /// Search stored applications.
    Search(SearchArgs),
    /// Download the documents of one application.
    Documents { jurisdiction: String, app_id: i64 },
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    jurisdiction: Option<String>,
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long)]
    decision: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    min_x: Option<f64>,
    #[arg(long)]
    max_x: Option<f64>,
    #[arg(long)]
    min_y: Option<f64>,
    #[arg(long)]
    max_y: Option<f64>,
}

impl From<SearchArgs> for SearchFilter {
    fn from(args: SearchArgs) -> Self {
        SearchFilter {
            jurisdiction: args.jurisdiction,
            date_from: args.from,
            date_to: args.to,
            decision: args.decision,
            status: args.status,
            location: args.location,
            min_x: args.min_x,
            max_x: args.max_x,
            min_y: args.min_y,
            max_y: args.max_y,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    telemetry::init(&config.log_level)?;

    let command = cli.command.unwrap_or(Commands::Run {
        sync_only: false,
        analyze_only: false,
    });
    let store = connect(&config).await?;

    match command {
        Commands::Run {
            sync_only,
            analyze_only,
        } => {
            store.migrate().await?;
            if !analyze_only {
                let summary = run_sync(&config, &store, SyncOptions::default()).await?;
                print_sync_summary(&summary);
            }
            if !sync_only {
                run_analysis(&config, &store, None, 10).await?;
            }
        }
        Commands::Sync {
            jurisdiction,
            limit,
            no_hydrate,
            rehydrate,
        } => {
            let options = SyncOptions {
                jurisdiction,
                limit,
                hydrate: !no_hydrate,
                skip_hydrated: !rehydrate,
            };
            let summary = run_sync(&config, &store, options).await?;
            print_sync_summary(&summary);
        }
        Commands::Analyze { jurisdiction, top } => {
            run_analysis(&config, &store, jurisdiction.as_deref(), top).await?;
        }
        Commands::Migrate => {
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Search(args) => {
            let hits = store.search(&args.into()).await?;
            print_search_hits(&hits);
        }
        Commands::Documents {
            jurisdiction,
            app_id,
        } => {
            let pipeline = SyncPipeline::new(config.clone(), store.clone())?;
            let summary = pipeline.download_documents(&jurisdiction, app_id).await?;
            println!(
                "documents for {}/{}: downloaded={} unchanged={} without_hash={} failed={}",
                summary.jurisdiction,
                summary.app_id,
                summary.downloaded,
                summary.deduplicated,
                summary.without_hash,
                summary.failed
            );
            for path in &summary.paths {
                println!("  {path}");
            }
        }
    }

    Ok(())
}

async fn connect(config: &SyncConfig) -> Result<PlanningStore> {
    let url = config.require_database_url()?;
    PlanningStore::connect(url)
        .await
        .context("opening planning store")
}

async fn run_sync(config: &SyncConfig, store: &PlanningStore, options: SyncOptions) -> Result<SyncRunSummary> {
    let pipeline = SyncPipeline::new(config.clone(), store.clone())?;
    pipeline.run_once(&options).await
}

async fn run_analysis(
    config: &SyncConfig,
    store: &PlanningStore,
    jurisdiction: Option<&str>,
    top: usize,
) -> Result<()> {
    let stage = AnalysisStage::new(store.clone(), config.out_dir.clone(), AnalysisConfig::default());
    let outcome = stage.run(jurisdiction).await?;
    print_analysis(&outcome.report, top);
    for failure in &outcome.written.failed {
        eprintln!("report {} not written: {}", failure.file, failure.error);
    }
    info!(out_dir = %config.out_dir.display(), "reports written");
    Ok(())
}

fn print_sync_summary(summary: &SyncRunSummary) {
    println!("sync complete: run_id={}", summary.run_id);
    println!(
        "{:<14} {:>8} {:>8} {:>8} {:>9} {:>9}  status",
        "jurisdiction", "found", "stored", "saved", "hydrated", "failures"
    );
    for j in &summary.jurisdictions {
        println!(
            "{:<14} {:>8} {:>8} {:>8} {:>9} {:>9}  {}",
            j.jurisdiction,
            j.found,
            j.already_stored,
            j.saved,
            j.hydrated,
            j.save_failures + j.hydration_failures,
            j.error.as_deref().unwrap_or("ok")
        );
    }
}

fn print_analysis(report: &AnalysisReport, top: usize) {
    let overall = &report.lifecycle.overall;
    println!(
        "analysed {} applications ({} skipped); {} invalid ({:.1}%)",
        report.snapshot_size, report.skipped.total, overall.total_invalids, overall.invalidation_rate
    );

    println!("\nLIFECYCLE");
    println!(
        "{:<14} {:>8} {:>8} {:>10} {:>10} {:>9} {:>8}",
        "scope", "apps", "invalid", "followed", "abandoned", "avg days", "churn%"
    );
    for s in std::iter::once(overall).chain(report.lifecycle.by_jurisdiction.iter()) {
        println!(
            "{:<14} {:>8} {:>8} {:>10} {:>10} {:>9.1} {:>8.1}",
            s.scope_label,
            s.total_applications,
            s.total_invalids,
            s.followed_up,
            s.abandoned,
            s.avg_days_to_reapply,
            s.churn_rate
        );
    }

    println!("\nTOP AGENTS BY INVALIDATIONS");
    for line in agent_lines(&report.agents.by_invalid_count, top) {
        println!("{line}");
    }

    println!(
        "\nTOP AGENTS BY INVALIDATION RATE (min {} submissions)",
        report.agents.min_submissions_for_rate
    );
    if report.agents.by_rate.is_empty() {
        println!("no agent has enough submissions");
    }
    for line in agent_lines(&report.agents.by_rate, top) {
        println!("{line}");
    }

    println!("\nAGENTS LOSING CLIENTS");
    for row in report.churn.iter().take(top) {
        let loss = row
            .loss_rate_percent
            .map(|r| format!("{r:.1}%"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{:<40} invalid={:<4} churned={:<4} retained={:<4} loss={}",
            truncate(&row.name, 40),
            row.invalid_count,
            row.churned_count,
            row.retained_count,
            loss
        );
    }

    println!(
        "\nINVALIDATION REASONS ({} cited, top 10 cover {:.1}%)",
        report.spread.total_issues, report.spread.top_10_pct
    );
    for row in report.spread.rows.iter().take(top) {
        println!(
            "{:>3}. {:<50} {:>5} {:>6.1}% {:>6.1}%",
            row.rank,
            truncate(&row.reason, 50),
            row.count,
            row.pct_of_total,
            row.cumulative_pct
        );
    }
}

fn agent_lines(rows: &[AgentLeaderboardRow], top: usize) -> Vec<String> {
    rows.iter()
        .take(top)
        .map(|row| {
            format!(
                "{:<40} {:>5} / {:<5} {:>6.1}%  {}",
                truncate(&row.name, 40),
                row.invalid_count,
                row.total,
                row.rate_percent,
                row.email
            )
        })
        .collect()
}

fn print_search_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("no matching applications");
        return;
    }
    for hit in hits {
        println!(
            "{:<12} {:>8} {:<14} {:<10} {:<24} {}",
            hit.lpa,
            hit.id,
            hit.reference.as_deref().unwrap_or("-"),
            hit.registration_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            truncate(hit.decision.as_deref().unwrap_or("-"), 24),
            hit.location.as_deref().unwrap_or("-")
        );
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('~');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_full_run() {
        let cli = Cli::try_parse_from(["pinv"]).expect("parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn run_flags_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["pinv", "run", "--sync-only", "--analyze-only"]).is_err());
        assert!(Cli::try_parse_from(["pinv", "run", "--analyze-only"]).is_ok());
    }

    #[test]
    fn search_args_become_a_filter() {
        let cli = Cli::try_parse_from([
            "pinv",
            "search",
            "--decision",
            "invalid",
            "--from",
            "2024-01-01",
            "--min-x",
            "320000",
        ])
        .expect("parse");
        let Some(Commands::Search(args)) = cli.command else {
            panic!("expected search");
        };
        let filter: SearchFilter = args.into();
        assert_eq!(filter.decision.as_deref(), Some("invalid"));
        assert_eq!(filter.date_from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(filter.min_x, Some(320000.0));
        assert!(filter.status.is_none());
    }

    #[test]
    fn agent_lines_keep_ranking_order_and_respect_top() {
        let row = |name: &str, invalid: usize, total: usize| AgentLeaderboardRow {
            name: name.to_string(),
            invalid_count: invalid,
            total,
            rate_percent: invalid as f64 * 100.0 / total as f64,
            email: String::new(),
            phone: String::new(),
        };
        let by_rate = vec![row("bob smith", 6, 10), row("jane doyle", 3, 12), row("ann kelly", 1, 20)];

        let lines = agent_lines(&by_rate, 2);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("bob smith"));
        assert!(lines[0].contains("60.0%"));
        assert!(lines[1].starts_with("jane doyle"));
    }

    #[test]
    fn long_names_are_truncated_with_a_marker() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd~");
    }
}
