//! PostgreSQL persistence for applications, their documents and decision conditions.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use pinv_core::{
    parse_registration_date, ApplicationDraft, ConditionDraft, DocumentDraft, InvalidationNote,
    RawApplicationRow,
};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{info, warn};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS applications (
        id INTEGER NOT NULL,
        lpa TEXT NOT NULL,
        reference TEXT,
        registration_date DATE,
        description TEXT,
        location TEXT,
        decision TEXT,
        status TEXT,
        grid_x DOUBLE PRECISION,
        grid_y DOUBLE PRECISION,
        raw_json JSONB,
        last_hydrated_at TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT now(),
        PRIMARY KEY (id, lpa)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS documents (
        id SERIAL PRIMARY KEY,
        app_id INTEGER NOT NULL,
        lpa TEXT NOT NULL,
        filename TEXT,
        document_hash TEXT,
        doc_id TEXT,
        description TEXT,
        media_description TEXT,
        received_date TEXT,
        media_id BIGINT,
        local_path TEXT,
        raw_json JSONB,
        FOREIGN KEY (app_id, lpa) REFERENCES applications (id, lpa)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS conditions (
        id SERIAL PRIMARY KEY,
        app_id INTEGER NOT NULL,
        lpa TEXT NOT NULL,
        order_num INTEGER,
        short_desc TEXT,
        long_desc TEXT,
        code TEXT,
        code_desc TEXT,
        complied_id BIGINT,
        complied_desc TEXT,
        complied_date TEXT,
        raw_json JSONB,
        FOREIGN KEY (app_id, lpa) REFERENCES applications (id, lpa)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_applications_lpa_date ON applications (lpa, registration_date)",
    "CREATE INDEX IF NOT EXISTS idx_documents_app ON documents (app_id, lpa)",
    "CREATE INDEX IF NOT EXISTS idx_conditions_app ON conditions (app_id, lpa)",
];

/// Upgrades for databases created before hydration tracking and typed grid columns.
const UPGRADES: &[&str] = &[
    "ALTER TABLE applications ADD COLUMN IF NOT EXISTS last_hydrated_at TIMESTAMP",
    "ALTER TABLE applications ALTER COLUMN registration_date TYPE DATE USING registration_date::date",
    "ALTER TABLE applications ALTER COLUMN grid_x TYPE DOUBLE PRECISION USING grid_x::double precision",
    "ALTER TABLE applications ALTER COLUMN grid_y TYPE DOUBLE PRECISION USING grid_y::double precision",
];

/// `last_hydrated_at` is only stamped once detail, documents and conditions are
/// all stored, so a partially hydrated application stays queued.
const HYDRATION_QUEUE_SQL: &str = r#"
SELECT a.id::bigint
FROM applications a
WHERE a.lpa = $1
  AND (NOT $2 OR a.last_hydrated_at IS NULL)
ORDER BY a.id
"#;

pub const SEARCH_LIMIT: i64 = 20;

/// Ad hoc search filters; `None` fields are not applied.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub jurisdiction: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub decision: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub min_x: Option<f64>,
    pub max_x: Option<f64>,
    pub min_y: Option<f64>,
    pub max_y: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub lpa: String,
    pub reference: Option<String>,
    pub registration_date: Option<NaiveDate>,
    pub decision: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub grid_x: Option<f64>,
    pub grid_y: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PlanningStore {
    pool: PgPool,
}

impl PlanningStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("connecting to planning database")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("applying schema statement: {}", first_line(statement)))?;
        }
        for statement in UPGRADES {
            if let Err(err) = sqlx::query(statement).execute(&self.pool).await {
                warn!(statement, error = %err, "schema upgrade skipped");
            }
        }
        info!("planning schema ready");
        Ok(())
    }

    pub async fn upsert_application(&self, lpa: &str, draft: &ApplicationDraft) -> Result<()> {
        let registration_date = draft
            .registration_date
            .as_deref()
            .and_then(parse_registration_date);

        sqlx::query(
            r#"
            INSERT INTO applications
                (id, lpa, reference, registration_date, description, location,
                 decision, status, grid_x, grid_y, raw_json, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
            ON CONFLICT (id, lpa) DO UPDATE SET
                reference = COALESCE(EXCLUDED.reference, applications.reference),
                registration_date = COALESCE(EXCLUDED.registration_date, applications.registration_date),
                description = COALESCE(EXCLUDED.description, applications.description),
                location = COALESCE(EXCLUDED.location, applications.location),
                decision = COALESCE(EXCLUDED.decision, applications.decision),
                status = COALESCE(EXCLUDED.status, applications.status),
                grid_x = COALESCE(EXCLUDED.grid_x, applications.grid_x),
                grid_y = COALESCE(EXCLUDED.grid_y, applications.grid_y),
                raw_json = EXCLUDED.raw_json,
                updated_at = now()
            "#,
        )
        .bind(app_id_param(draft.id)?)
        .bind(lpa)
        .bind(&draft.reference)
        .bind(registration_date)
        .bind(&draft.description)
        .bind(&draft.location)
        .bind(&draft.decision)
        .bind(&draft.status)
        .bind(draft.grid_x)
        .bind(draft.grid_y)
        .bind(&draft.raw)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting application {lpa}/{}", draft.id))?;
        Ok(())
    }

    /// Documents are matched by content hash when one is present, otherwise by filename.
    pub async fn upsert_document(&self, lpa: &str, app_id: i64, draft: &DocumentDraft) -> Result<()> {
        let app_id = app_id_param(app_id)?;
        let existing: Option<i32> = match draft.document_hash.as_deref() {
            Some(hash) => sqlx::query_scalar::<_, i32>(
                "SELECT id FROM documents WHERE app_id = $1 AND lpa = $2 AND document_hash = $3 LIMIT 1",
            )
            .bind(app_id)
            .bind(lpa)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await,
            None => sqlx::query_scalar::<_, i32>(
                "SELECT id FROM documents WHERE app_id = $1 AND lpa = $2 AND filename IS NOT DISTINCT FROM $3 LIMIT 1",
            )
            .bind(app_id)
            .bind(lpa)
            .bind(&draft.filename)
            .fetch_optional(&self.pool)
            .await,
        }
        .with_context(|| format!("looking up document for {lpa}/{app_id}"))?;

        match existing {
            Some(row_id) => {
                sqlx::query(
                    r#"
                    UPDATE documents SET
                        filename = $2, document_hash = $3, doc_id = $4, description = $5,
                        media_description = $6, received_date = $7, media_id = $8, raw_json = $9
                    WHERE id = $1
                    "#,
                )
                .bind(row_id)
                .bind(&draft.filename)
                .bind(&draft.document_hash)
                .bind(&draft.doc_id)
                .bind(&draft.description)
                .bind(&draft.media_description)
                .bind(&draft.received_date)
                .bind(draft.media_id)
                .bind(&draft.raw)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO documents
                        (app_id, lpa, filename, document_hash, doc_id, description,
                         media_description, received_date, media_id, raw_json)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(app_id)
                .bind(lpa)
                .bind(&draft.filename)
                .bind(&draft.document_hash)
                .bind(&draft.doc_id)
                .bind(&draft.description)
                .bind(&draft.media_description)
                .bind(&draft.received_date)
                .bind(draft.media_id)
                .bind(&draft.raw)
                .execute(&self.pool)
                .await
            }
        }
        .with_context(|| format!("upserting document for {lpa}/{app_id}"))?;
        Ok(())
    }

    pub async fn upsert_condition(&self, lpa: &str, app_id: i64, draft: &ConditionDraft) -> Result<()> {
        let app_id = app_id_param(app_id)?;
        let existing: Option<i32> = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM conditions WHERE app_id = $1 AND lpa = $2 AND order_num IS NOT DISTINCT FROM $3 LIMIT 1",
        )
        .bind(app_id)
        .bind(lpa)
        .bind(draft.order_num)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("looking up condition for {lpa}/{app_id}"))?;

        match existing {
            Some(row_id) => {
                sqlx::query(
                    r#"
                    UPDATE conditions SET
                        short_desc = $2, long_desc = $3, code = $4, code_desc = $5,
                        complied_id = $6, complied_desc = $7, complied_date = $8, raw_json = $9
                    WHERE id = $1
                    "#,
                )
                .bind(row_id)
                .bind(&draft.short_desc)
                .bind(&draft.long_desc)
                .bind(&draft.code)
                .bind(&draft.code_desc)
                .bind(draft.complied_id)
                .bind(&draft.complied_desc)
                .bind(&draft.complied_date)
                .bind(&draft.raw)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO conditions
                        (app_id, lpa, order_num, short_desc, long_desc, code, code_desc,
                         complied_id, complied_desc, complied_date, raw_json)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(app_id)
                .bind(lpa)
                .bind(draft.order_num)
                .bind(&draft.short_desc)
                .bind(&draft.long_desc)
                .bind(&draft.code)
                .bind(&draft.code_desc)
                .bind(draft.complied_id)
                .bind(&draft.complied_desc)
                .bind(&draft.complied_date)
                .bind(&draft.raw)
                .execute(&self.pool)
                .await
            }
        }
        .with_context(|| format!("upserting condition for {lpa}/{app_id}"))?;
        Ok(())
    }

    pub async fn mark_hydrated(&self, lpa: &str, app_id: i64, at: NaiveDateTime) -> Result<()> {
        sqlx::query("UPDATE applications SET last_hydrated_at = $3 WHERE id = $1 AND lpa = $2")
            .bind(app_id_param(app_id)?)
            .bind(lpa)
            .bind(at)
            .execute(&self.pool)
            .await
            .with_context(|| format!("marking {lpa}/{app_id} hydrated"))?;
        Ok(())
    }

    pub async fn mark_hydrated_now(&self, lpa: &str, app_id: i64) -> Result<()> {
        self.mark_hydrated(lpa, app_id, Utc::now().naive_utc()).await
    }

    pub async fn record_document_path(
        &self,
        lpa: &str,
        app_id: i64,
        document_hash: &str,
        local_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET local_path = $4 WHERE app_id = $1 AND lpa = $2 AND document_hash = $3",
        )
        .bind(app_id_param(app_id)?)
        .bind(lpa)
        .bind(document_hash)
        .bind(local_path)
        .execute(&self.pool)
        .await
        .with_context(|| format!("recording local path for {lpa}/{app_id}"))?;
        Ok(())
    }

    pub async fn existing_ids(&self, lpa: &str) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar::<_, i64>("SELECT id::bigint FROM applications WHERE lpa = $1")
            .bind(lpa)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("listing stored application ids for {lpa}"))?;
        Ok(ids.into_iter().collect())
    }

    pub async fn latest_registration_date(&self, lpa: &str) -> Result<Option<NaiveDate>> {
        let latest: Option<NaiveDate> =
            sqlx::query_scalar::<_, Option<NaiveDate>>("SELECT max(registration_date) FROM applications WHERE lpa = $1")
                .bind(lpa)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("reading latest registration date for {lpa}"))?;
        Ok(latest)
    }

    /// Ids whose detail, documents and conditions still need fetching. With
    /// `skip_hydrated` off every stored application of the jurisdiction is returned.
    pub async fn applications_needing_hydration(&self, lpa: &str, skip_hydrated: bool) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar::<_, i64>(HYDRATION_QUEUE_SQL)
            .bind(lpa)
            .bind(skip_hydrated)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("listing applications needing hydration for {lpa}"))?;
        Ok(ids)
    }

    /// Every stored application with its condition notes, ordered by
    /// registration date, jurisdiction and id.
    pub async fn load_snapshot_rows(&self, lpa: Option<&str>) -> Result<Vec<RawApplicationRow>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id::bigint AS id, a.lpa, a.decision,
                   a.registration_date::text AS registration_date,
                   a.grid_x, a.grid_y, a.raw_json
            FROM applications a
            WHERE ($1::text IS NULL OR a.lpa = $1)
            ORDER BY a.registration_date NULLS FIRST, a.lpa, a.id
            "#,
        )
        .bind(lpa)
        .fetch_all(&self.pool)
        .await
        .context("loading application snapshot")?;

        let note_rows = sqlx::query(
            r#"
            SELECT c.app_id::bigint AS app_id, c.lpa, c.short_desc, c.long_desc
            FROM conditions c
            WHERE ($1::text IS NULL OR c.lpa = $1)
            ORDER BY c.app_id, c.lpa, c.order_num NULLS LAST, c.id
            "#,
        )
        .bind(lpa)
        .fetch_all(&self.pool)
        .await
        .context("loading condition notes")?;

        let mut notes: HashMap<(String, i64), Vec<InvalidationNote>> = HashMap::new();
        for row in note_rows {
            let app_id: i64 = row.try_get("app_id")?;
            let note_lpa: String = row.try_get("lpa")?;
            notes.entry((note_lpa, app_id)).or_default().push(InvalidationNote {
                category: row.try_get("short_desc")?,
                detail: row.try_get("long_desc")?,
            });
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let jurisdiction: String = row.try_get("lpa")?;
            let row_notes = notes.remove(&(jurisdiction.clone(), id)).unwrap_or_default();
            out.push(RawApplicationRow {
                id,
                jurisdiction,
                decision: row.try_get("decision")?,
                registration_date: row.try_get("registration_date")?,
                grid_x: row.try_get("grid_x")?,
                grid_y: row.try_get("grid_y")?,
                raw_json: row.try_get("raw_json")?,
                notes: row_notes,
            });
        }
        Ok(out)
    }

    pub async fn search(&self, filter: &SearchFilter) -> Result<Vec<SearchHit>> {
        let mut builder = search_query(filter);
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("searching applications")?;

        rows.into_iter()
            .map(|row| -> Result<SearchHit> {
                Ok(SearchHit {
                    id: row.try_get("id")?,
                    lpa: row.try_get("lpa")?,
                    reference: row.try_get("reference")?,
                    registration_date: row.try_get("registration_date")?,
                    decision: row.try_get("decision")?,
                    status: row.try_get("status")?,
                    location: row.try_get("location")?,
                    grid_x: row.try_get("grid_x")?,
                    grid_y: row.try_get("grid_y")?,
                })
            })
            .collect()
    }
}

fn search_query(filter: &SearchFilter) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        "SELECT id::bigint AS id, lpa, reference, registration_date, decision, status, \
         location, grid_x, grid_y FROM applications WHERE 1=1",
    );
    if let Some(lpa) = &filter.jurisdiction {
        builder.push(" AND lpa = ").push_bind(lpa);
    }
    if let Some(from) = filter.date_from {
        builder.push(" AND registration_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        builder.push(" AND registration_date <= ").push_bind(to);
    }
    if let Some(decision) = &filter.decision {
        builder.push(" AND decision ILIKE ").push_bind(like_pattern(decision));
    }
    if let Some(status) = &filter.status {
        builder.push(" AND status ILIKE ").push_bind(like_pattern(status));
    }
    if let Some(location) = &filter.location {
        builder.push(" AND location ILIKE ").push_bind(like_pattern(location));
    }
    if let Some(min_x) = filter.min_x {
        builder.push(" AND grid_x >= ").push_bind(min_x);
    }
    if let Some(max_x) = filter.max_x {
        builder.push(" AND grid_x <= ").push_bind(max_x);
    }
    if let Some(min_y) = filter.min_y {
        builder.push(" AND grid_y >= ").push_bind(min_y);
    }
    if let Some(max_y) = filter.max_y {
        builder.push(" AND grid_y <= ").push_bind(max_y);
    }
    builder
        .push(" ORDER BY registration_date DESC NULLS LAST, lpa, id LIMIT ")
        .push_bind(SEARCH_LIMIT);
    builder
}

/// Substring pattern for ILIKE with the wildcard characters of the input escaped.
pub fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn app_id_param(id: i64) -> Result<i32> {
    i32::try_from(id).with_context(|| format!("application id {id} does not fit the id column"))
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or(statement).trim()
}
