//! Sync and analysis pipeline orchestration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use pinv_adapters::{AGILE_PORTAL_ID, DEFAULT_API_BASE_URL, DEFAULT_IDENTITY_URL};
use pinv_storage::{HttpClientConfig, TokenBucketConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod analysis;
pub mod reports;
pub mod sync;

pub use analysis::{analyze_rows, AnalysisStage, AnalysisStageOutcome};
pub use reports::{render_brief, ReportWriteSummary, ReportWriter};
pub use sync::{
    DocumentDownloadSummary, JurisdictionSyncSummary, SyncOptions, SyncPipeline, SyncRunSummary,
};

pub const CRATE_NAME: &str = "pinv-sync";

pub const REGISTRY_FILE: &str = "jurisdictions.yaml";
const DEFAULT_DATE_FROM: &str = "2024-01-01";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub api_base_url: String,
    pub identity_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub requests_per_second: f64,
    pub out_dir: PathBuf,
    pub documents_dir: PathBuf,
    pub default_date_from: NaiveDate,
    pub log_level: String,
    pub workspace_root: PathBuf,
}

impl SyncConfig {
    /// Read configuration from the process environment, after loading `.env` if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let default_date_from = var("PINV_DEFAULT_DATE_FROM")
            .and_then(|raw| match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(err) => {
                    warn!(value = %raw, error = %err, "ignoring PINV_DEFAULT_DATE_FROM");
                    None
                }
            })
            .unwrap_or_else(fallback_date_from);

        Self {
            database_url: var("DATABASE_URL"),
            api_base_url: var("PINV_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            identity_url: var("PINV_IDENTITY_URL").unwrap_or_else(|| DEFAULT_IDENTITY_URL.to_string()),
            user_agent: var("PINV_USER_AGENT").unwrap_or_else(|| "pinv-bot/0.1".to_string()),
            http_timeout_secs: var("PINV_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(20),
            requests_per_second: var("PINV_REQUESTS_PER_SECOND")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(2.0),
            out_dir: var("PINV_OUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("out")),
            documents_dir: var("PINV_DOCUMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("documents")),
            default_date_from,
            log_level: var("PINV_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            workspace_root: var("PINV_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is not set; export it or add it to .env")
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            token_bucket: TokenBucketConfig::per_second(self.requests_per_second),
            ..Default::default()
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workspace_root.join(REGISTRY_FILE)
    }
}

fn fallback_date_from() -> NaiveDate {
    NaiveDate::parse_from_str(DEFAULT_DATE_FROM, "%Y-%m-%d").unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionRegistry {
    pub jurisdictions: Vec<JurisdictionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionConfig {
    pub slug: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_portal")]
    pub portal: String,
}

fn default_enabled() -> bool {
    true
}

fn default_portal() -> String {
    AGILE_PORTAL_ID.to_string()
}

impl Default for JurisdictionRegistry {
    fn default() -> Self {
        let entry = |slug: &str, display_name: &str| JurisdictionConfig {
            slug: slug.to_string(),
            display_name: display_name.to_string(),
            enabled: true,
            portal: default_portal(),
        };
        Self {
            jurisdictions: vec![
                entry("dunlaoghaire", "Dun Laoghaire-Rathdown County Council"),
                entry("fingal", "Fingal County Council"),
                entry("dublincity", "Dublin City Council"),
                entry("southdublin", "South Dublin County Council"),
            ],
        }
    }
}

impl JurisdictionRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing jurisdiction registry")
    }

    /// Load the registry file, falling back to the built-in Dublin authorities when absent.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            warn!(path = %path.display(), "jurisdiction registry missing; using defaults");
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &JurisdictionConfig> {
        self.jurisdictions.iter().filter(|j| j.enabled)
    }

    pub fn find(&self, slug: &str) -> Option<&JurisdictionConfig> {
        self.jurisdictions.iter().find(|j| j.slug == slug)
    }

    /// The jurisdictions a run should cover: one named slug, or every enabled entry.
    pub fn select(&self, slug: Option<&str>) -> Result<Vec<JurisdictionConfig>> {
        match slug {
            Some(slug) => {
                let found = self
                    .find(slug)
                    .with_context(|| format!("unknown jurisdiction {slug}"))?;
                Ok(vec![found.clone()])
            }
            None => Ok(self.enabled().cloned().collect()),
        }
    }
}
