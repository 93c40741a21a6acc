//! Per-jurisdiction search, upsert and hydration against the planning portal.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use pinv_adapters::{adapter_for_portal, AgileApplicationsAdapter, PortalAdapter, PortalContext};
use pinv_core::ApplicationDraft;
use pinv_storage::{sanitize_path_component, DocumentStore, HttpFetcher, PlanningStore};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{JurisdictionConfig, JurisdictionRegistry, SyncConfig};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub jurisdiction: Option<String>,
    pub limit: Option<usize>,
    pub hydrate: bool,
    pub skip_hydrated: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            jurisdiction: None,
            limit: None,
            hydrate: true,
            skip_hydrated: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JurisdictionSyncSummary {
    pub jurisdiction: String,
    pub client_code: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub found: usize,
    pub skipped_without_id: usize,
    pub already_stored: usize,
    pub saved: usize,
    pub save_failures: usize,
    pub hydrated: usize,
    pub hydration_failures: usize,
    /// Set when the jurisdiction stopped early.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jurisdictions: Vec<JurisdictionSyncSummary>,
}

impl SyncRunSummary {
    pub fn total_saved(&self) -> usize {
        self.jurisdictions.iter().map(|j| j.saved).sum()
    }

    pub fn total_hydrated(&self) -> usize {
        self.jurisdictions.iter().map(|j| j.hydrated).sum()
    }

    pub fn failed_jurisdictions(&self) -> impl Iterator<Item = &JurisdictionSyncSummary> {
        self.jurisdictions.iter().filter(|j| j.error.is_some())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentDownloadSummary {
    pub jurisdiction: String,
    pub app_id: i64,
    pub downloaded: usize,
    pub deduplicated: usize,
    pub without_hash: usize,
    pub failed: usize,
    pub paths: Vec<String>,
}

pub struct SyncPipeline {
    config: SyncConfig,
    http: Arc<HttpFetcher>,
    store: PlanningStore,
    documents: DocumentStore,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: PlanningStore) -> Result<Self> {
        let http = HttpFetcher::new(config.http_config())?;
        let documents = DocumentStore::new(config.documents_dir.clone());
        Ok(Self {
            config,
            http: Arc::new(http),
            store,
            documents,
        })
    }

    pub fn store(&self) -> &PlanningStore {
        &self.store
    }

    fn adapter_for(&self, jurisdiction: &JurisdictionConfig) -> Result<Arc<dyn PortalAdapter>> {
        if jurisdiction.portal == pinv_adapters::AGILE_PORTAL_ID {
            return Ok(Arc::new(AgileApplicationsAdapter::new(
                self.config.api_base_url.clone(),
                self.config.identity_url.clone(),
            )));
        }
        adapter_for_portal(&jurisdiction.portal)
            .map(Arc::from)
            .with_context(|| {
                format!(
                    "no portal adapter registered for {} ({})",
                    jurisdiction.slug, jurisdiction.portal
                )
            })
    }

    /// Sync every selected jurisdiction concurrently, one task each. A failing
    /// jurisdiction is reported in its summary entry without affecting the others.
    pub async fn run_once(&self, options: &SyncOptions) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let registry = JurisdictionRegistry::load(&self.config.registry_path()).await?;
        let selected = registry.select(options.jurisdiction.as_deref())?;
        let today = Utc::now().date_naive();

        info!(%run_id, jurisdictions = selected.len(), "sync run starting");

        let mut handles = Vec::with_capacity(selected.len());
        for jurisdiction in selected {
            let worker = JurisdictionWorker {
                run_id,
                adapter: self.adapter_for(&jurisdiction)?,
                http: Arc::clone(&self.http),
                store: self.store.clone(),
                slug: jurisdiction.slug.clone(),
                default_date_from: self.config.default_date_from,
                today,
                options: options.clone(),
            };
            let span = info_span!("sync_jurisdiction", %run_id, jurisdiction = %jurisdiction.slug);
            handles.push((jurisdiction.slug, tokio::spawn(worker.run().instrument(span))));
        }

        let mut jurisdictions = Vec::with_capacity(handles.len());
        for (slug, handle) in handles {
            match handle.await {
                Ok(summary) => jurisdictions.push(summary),
                Err(err) => {
                    warn!(jurisdiction = %slug, error = %err, "sync worker aborted");
                    jurisdictions.push(JurisdictionSyncSummary {
                        jurisdiction: slug,
                        error: Some(format!("worker aborted: {err}")),
                        ..Default::default()
                    });
                }
            }
        }

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            jurisdictions,
        };
        info!(
            %run_id,
            saved = summary.total_saved(),
            hydrated = summary.total_hydrated(),
            failed = summary.failed_jurisdictions().count(),
            "sync run finished"
        );
        Ok(summary)
    }

    /// Download every document of one application into the document store.
    pub async fn download_documents(&self, jurisdiction: &str, app_id: i64) -> Result<DocumentDownloadSummary> {
        let run_id = Uuid::new_v4();
        let registry = JurisdictionRegistry::load(&self.config.registry_path()).await?;
        let config = registry.select(Some(jurisdiction))?.remove(0);
        let adapter = self.adapter_for(&config)?;

        let client_code = adapter
            .resolve_client_code(&self.http, run_id, jurisdiction)
            .await
            .with_context(|| format!("resolving client code for {jurisdiction}"))?;
        let ctx = PortalContext {
            run_id,
            jurisdiction: jurisdiction.to_string(),
            client_code,
        };

        let documents = adapter
            .application_documents(&self.http, &ctx, app_id)
            .await
            .with_context(|| format!("listing documents for {jurisdiction}/{app_id}"))?;

        let mut summary = DocumentDownloadSummary {
            jurisdiction: jurisdiction.to_string(),
            app_id,
            ..Default::default()
        };

        for document in documents {
            let Some(hash) = document.document_hash.clone() else {
                summary.without_hash += 1;
                continue;
            };
            let filename = document
                .filename
                .clone()
                .unwrap_or_else(|| format!("{}.bin", sanitize_path_component(&hash)));

            let stored = async {
                self.store.upsert_document(jurisdiction, app_id, &document).await?;
                let bytes = adapter.download_document(&self.http, &ctx, &hash).await?;
                let stored = self
                    .documents
                    .store_bytes(jurisdiction, app_id, &filename, &bytes)
                    .await?;
                let local_path = stored.absolute_path.display().to_string();
                self.store
                    .record_document_path(jurisdiction, app_id, &hash, &local_path)
                    .await?;
                anyhow::Ok(stored)
            }
            .await;

            match stored {
                Ok(stored) => {
                    if stored.deduplicated {
                        summary.deduplicated += 1;
                    } else {
                        summary.downloaded += 1;
                    }
                    summary.paths.push(stored.absolute_path.display().to_string());
                }
                Err(err) => {
                    warn!(jurisdiction, app_id, document = %filename, error = %err, "document download failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            jurisdiction,
            app_id,
            downloaded = summary.downloaded,
            deduplicated = summary.deduplicated,
            failed = summary.failed,
            "document download finished"
        );
        Ok(summary)
    }
}

struct JurisdictionWorker {
    run_id: Uuid,
    adapter: Arc<dyn PortalAdapter>,
    http: Arc<HttpFetcher>,
    store: PlanningStore,
    slug: String,
    default_date_from: NaiveDate,
    today: NaiveDate,
    options: SyncOptions,
}

impl JurisdictionWorker {
    async fn run(self) -> JurisdictionSyncSummary {
        let mut summary = JurisdictionSyncSummary {
            jurisdiction: self.slug.clone(),
            ..Default::default()
        };
        if let Err(err) = self.sync_into(&mut summary).await {
            warn!(jurisdiction = %self.slug, error = %format!("{err:#}"), "jurisdiction sync stopped");
            summary.error = Some(format!("{err:#}"));
        }
        summary
    }

    async fn sync_into(&self, summary: &mut JurisdictionSyncSummary) -> Result<()> {
        let client_code = self
            .adapter
            .resolve_client_code(&self.http, self.run_id, &self.slug)
            .await
            .with_context(|| format!("resolving client code for {}", self.slug))?;
        summary.client_code = Some(client_code.clone());
        let ctx = PortalContext {
            run_id: self.run_id,
            jurisdiction: self.slug.clone(),
            client_code,
        };

        let latest = self.store.latest_registration_date(&self.slug).await?;
        let (date_from, date_to) = sync_window(latest, self.default_date_from, self.today);
        summary.date_from = Some(date_from);
        summary.date_to = Some(date_to);

        let page = self
            .adapter
            .search(&self.http, &ctx, date_from, date_to)
            .await
            .with_context(|| format!("searching {} from {date_from} to {date_to}", self.slug))?;
        summary.found = page.applications.len();
        summary.skipped_without_id = page.skipped_without_id;

        let existing = self.store.existing_ids(&self.slug).await?;
        let (fresh, already_stored) =
            select_new_applications(page.applications, &existing, self.options.limit);
        summary.already_stored = already_stored;

        for draft in &fresh {
            match self.store.upsert_application(&self.slug, draft).await {
                Ok(()) => summary.saved += 1,
                Err(err) => {
                    warn!(app_id = draft.id, error = %format!("{err:#}"), "saving application failed");
                    summary.save_failures += 1;
                }
            }
        }
        info!(
            found = summary.found,
            already_stored = summary.already_stored,
            saved = summary.saved,
            "search results stored"
        );

        if !self.options.hydrate {
            return Ok(());
        }

        let pending = self
            .store
            .applications_needing_hydration(&self.slug, self.options.skip_hydrated)
            .await?;
        for app_id in pending {
            match self.hydrate(&ctx, app_id).await {
                Ok(()) => summary.hydrated += 1,
                Err(err) => {
                    warn!(app_id, error = %format!("{err:#}"), "hydration failed");
                    summary.hydration_failures += 1;
                }
            }
        }
        info!(
            hydrated = summary.hydrated,
            failures = summary.hydration_failures,
            "hydration finished"
        );
        Ok(())
    }

    async fn hydrate(&self, ctx: &PortalContext, app_id: i64) -> Result<()> {
        let detail = self.adapter.application_detail(&self.http, ctx, app_id).await?;
        self.store.upsert_application(&self.slug, &detail).await?;

        let documents = self.adapter.application_documents(&self.http, ctx, app_id).await?;
        for document in &documents {
            self.store.upsert_document(&self.slug, app_id, document).await?;
        }

        let conditions = self.adapter.application_conditions(&self.http, ctx, app_id).await?;
        for condition in &conditions {
            self.store.upsert_condition(&self.slug, app_id, condition).await?;
        }

        self.store.mark_hydrated_now(&self.slug, app_id).await
    }
}

/// Search window: from the latest stored registration date (else the default) up to today.
pub fn sync_window(latest: Option<NaiveDate>, default_from: NaiveDate, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let from = latest.unwrap_or(default_from).min(today);
    (from, today)
}

/// Drop already-stored ids, then apply the optional limit. Returns the survivors and
/// how many were dropped as already stored.
pub fn select_new_applications(
    drafts: Vec<ApplicationDraft>,
    existing: &HashSet<i64>,
    limit: Option<usize>,
) -> (Vec<ApplicationDraft>, usize) {
    let before = drafts.len();
    let mut fresh: Vec<_> = drafts.into_iter().filter(|d| !existing.contains(&d.id)).collect();
    let already_stored = before - fresh.len();
    if let Some(limit) = limit {
        fresh.truncate(limit);
    }
    (fresh, already_stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(id: i64) -> ApplicationDraft {
        ApplicationDraft {
            id,
            reference: None,
            registration_date: None,
            description: None,
            location: None,
            decision: None,
            status: None,
            grid_x: None,
            grid_y: None,
            raw: json!({ "id": id }),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn window_resumes_from_latest_stored_date() {
        let today = date(2026, 10, 19);
        assert_eq!(
            sync_window(Some(date(2026, 9, 30)), date(2024, 1, 1), today),
            (date(2026, 9, 30), today)
        );
        assert_eq!(sync_window(None, date(2024, 1, 1), today), (date(2024, 1, 1), today));
    }

    #[test]
    fn window_never_starts_after_today() {
        let today = date(2026, 10, 19);
        assert_eq!(sync_window(Some(date(2027, 1, 1)), date(2024, 1, 1), today), (today, today));
    }

    #[test]
    fn existing_ids_are_dropped_before_the_limit() {
        let existing: HashSet<i64> = [1, 2].into_iter().collect();
        let (fresh, already) =
            select_new_applications(vec![draft(1), draft(2), draft(3), draft(4), draft(5)], &existing, Some(2));
        assert_eq!(already, 2);
        assert_eq!(fresh.iter().map(|d| d.id).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn run_summary_totals_span_jurisdictions() {
        let summary = SyncRunSummary {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            jurisdictions: vec![
                JurisdictionSyncSummary {
                    jurisdiction: "fingal".into(),
                    saved: 3,
                    hydrated: 2,
                    ..Default::default()
                },
                JurisdictionSyncSummary {
                    jurisdiction: "dublincity".into(),
                    error: Some("resolving client code".into()),
                    ..Default::default()
                },
            ],
        };
        assert_eq!(summary.total_saved(), 3);
        assert_eq!(summary.total_hydrated(), 2);
        assert_eq!(summary.failed_jurisdictions().count(), 1);
    }
}
