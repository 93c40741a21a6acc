//! Planning portal adapter contracts + the Agile Applications citizen portal adapter.

use std::fs;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use pinv_core::{ApplicationDraft, ConditionDraft, DocumentDraft};
use pinv_storage::{FetchError, FetchRequest, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "pinv-adapters";

pub const AGILE_PORTAL_ID: &str = "agile";
pub const DEFAULT_API_BASE_URL: &str = "https://planningapi.agileapplications.ie/api";
pub const DEFAULT_IDENTITY_URL: &str = "https://identity.agileapplications.ie/api/client/get";

const PRODUCT_HEADER: &str = "CITIZENPORTAL";
const SERVICE_HEADER: &str = "PA";

/// Per-jurisdiction request context: the portal's client code travels as a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalContext {
    pub run_id: Uuid,
    pub jurisdiction: String,
    pub client_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub applications: Vec<ApplicationDraft>,
    /// Entries dropped because they carried no numeric `id`.
    pub skipped_without_id: usize,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no client code registered for jurisdiction {0}")]
    MissingClientCode(String),
    #[error("unexpected {what} payload: {detail}")]
    UnexpectedShape { what: &'static str, detail: String },
    #[error("application payload has no numeric id")]
    MissingId,
}

#[async_trait]
pub trait PortalAdapter: Send + Sync {
    fn portal_id(&self) -> &'static str;

    async fn resolve_client_code(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        jurisdiction: &str,
    ) -> Result<String, AdapterError>;

    async fn search(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<SearchPage, AdapterError>;

    async fn application_detail(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        app_id: i64,
    ) -> Result<ApplicationDraft, AdapterError>;

    async fn application_documents(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        app_id: i64,
    ) -> Result<Vec<DocumentDraft>, AdapterError>;

    async fn application_conditions(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        app_id: i64,
    ) -> Result<Vec<ConditionDraft>, AdapterError>;

    async fn download_document(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        document_hash: &str,
    ) -> Result<Vec<u8>, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct AgileApplicationsAdapter {
    api_base: String,
    identity_url: String,
}

impl Default for AgileApplicationsAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL, DEFAULT_IDENTITY_URL)
    }
}

impl AgileApplicationsAdapter {
    pub fn new(api_base: impl Into<String>, identity_url: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            identity_url: identity_url.into(),
        }
    }

    fn portal_request(&self, ctx: &PortalContext, path: &str) -> FetchRequest {
        FetchRequest::get(format!("{}{path}", self.api_base))
            .header("accept", "application/json, text/plain, */*")
            .header("x-client", ctx.client_code.clone())
            .header("x-product", PRODUCT_HEADER)
            .header("x-service", SERVICE_HEADER)
    }
}

#[async_trait]
impl PortalAdapter for AgileApplicationsAdapter {
    fn portal_id(&self) -> &'static str {
        AGILE_PORTAL_ID
    }

    async fn resolve_client_code(
        &self,
        http: &HttpFetcher,
        run_id: Uuid,
        jurisdiction: &str,
    ) -> Result<String, AdapterError> {
        let request = FetchRequest::get(self.identity_url.clone()).query("url", jurisdiction);
        let payload: JsonValue = http.fetch_json(run_id, jurisdiction, &request).await?;
        parse_client_code(&payload)
            .ok_or_else(|| AdapterError::MissingClientCode(jurisdiction.to_string()))
    }

    async fn search(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<SearchPage, AdapterError> {
        let request = self
            .portal_request(ctx, "/application/search")
            .query("applicationDateFrom", date_from.format("%Y-%m-%d").to_string())
            .query("applicationDateTo", date_to.format("%Y-%m-%d").to_string())
            .query("openApplications", "false");
        let payload: JsonValue = http.fetch_json(ctx.run_id, &ctx.jurisdiction, &request).await?;
        let page = parse_search_response(payload)?;
        debug!(
            jurisdiction = %ctx.jurisdiction,
            found = page.applications.len(),
            skipped = page.skipped_without_id,
            "search page parsed"
        );
        Ok(page)
    }

    async fn application_detail(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        app_id: i64,
    ) -> Result<ApplicationDraft, AdapterError> {
        let request = self.portal_request(ctx, &format!("/application/{app_id}"));
        let payload: JsonValue = http.fetch_json(ctx.run_id, &ctx.jurisdiction, &request).await?;
        parse_application(payload).ok_or(AdapterError::MissingId)
    }

    async fn application_documents(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        app_id: i64,
    ) -> Result<Vec<DocumentDraft>, AdapterError> {
        let request = self.portal_request(ctx, &format!("/application/{app_id}/document"));
        let payload: JsonValue = http.fetch_json(ctx.run_id, &ctx.jurisdiction, &request).await?;
        parse_documents(payload)
    }

    async fn application_conditions(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        app_id: i64,
    ) -> Result<Vec<ConditionDraft>, AdapterError> {
        let request = self.portal_request(ctx, &format!("/application/{app_id}/conditions"));
        let payload: JsonValue = http.fetch_json(ctx.run_id, &ctx.jurisdiction, &request).await?;
        parse_conditions(payload)
    }

    async fn download_document(
        &self,
        http: &HttpFetcher,
        ctx: &PortalContext,
        document_hash: &str,
    ) -> Result<Vec<u8>, AdapterError> {
        let path = format!("/application/document/{}/{document_hash}", ctx.client_code);
        let request = self.portal_request(ctx, &path);
        let response = http.fetch_bytes(ctx.run_id, &ctx.jurisdiction, &request).await?;
        Ok(response.body)
    }
}

pub fn adapter_for_portal(portal_id: &str) -> Option<Box<dyn PortalAdapter>> {
    match portal_id {
        AGILE_PORTAL_ID => Some(Box::new(AgileApplicationsAdapter::default())),
        _ => None,
    }
}

pub fn load_fixture_json(path: impl AsRef<Path>) -> anyhow::Result<JsonValue> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_client_code(payload: &JsonValue) -> Option<String> {
    payload.get("code").and_then(text_value)
}

/// Accepts either a bare array of applications or an object wrapping one in `results`.
pub fn parse_search_response(payload: JsonValue) -> Result<SearchPage, AdapterError> {
    let entries = match payload {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("results") {
            Some(JsonValue::Array(items)) => items,
            Some(JsonValue::Null) | None => Vec::new(),
            Some(other) => {
                return Err(AdapterError::UnexpectedShape {
                    what: "search",
                    detail: format!("results is {}", json_kind(&other)),
                })
            }
        },
        other => {
            return Err(AdapterError::UnexpectedShape {
                what: "search",
                detail: format!("top level is {}", json_kind(&other)),
            })
        }
    };

    let mut page = SearchPage::default();
    for entry in entries {
        match parse_application(entry) {
            Some(draft) => page.applications.push(draft),
            None => page.skipped_without_id += 1,
        }
    }
    Ok(page)
}

/// Map one portal application object into a draft; `None` when it has no numeric id.
pub fn parse_application(payload: JsonValue) -> Option<ApplicationDraft> {
    let obj = payload.as_object()?;
    let id = obj.get("id").and_then(integer_value)?;
    let (grid_x, grid_y) = grid_from_payload(obj).unzip();

    Some(ApplicationDraft {
        id,
        reference: first_text(obj, &["reference", "applicationReference"]),
        registration_date: first_text(obj, &["registrationDate"]),
        description: first_text(obj, &["proposal", "description"]),
        location: first_text(obj, &["location"]),
        decision: first_text(obj, &["decisionText"]),
        status: first_text(obj, &["status"]),
        grid_x,
        grid_y,
        raw: payload,
    })
}

pub fn parse_documents(payload: JsonValue) -> Result<Vec<DocumentDraft>, AdapterError> {
    let items = match payload {
        JsonValue::Array(items) => items,
        JsonValue::Null => Vec::new(),
        other => {
            return Err(AdapterError::UnexpectedShape {
                what: "documents",
                detail: format!("top level is {}", json_kind(&other)),
            })
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|raw| {
            let obj = raw.as_object()?;
            Some(DocumentDraft {
                filename: first_text(obj, &["name", "originalFileName"]),
                document_hash: first_text(obj, &["documentHash"]),
                doc_id: first_text(obj, &["documentId"]),
                description: first_text(obj, &["description"]),
                media_description: first_text(obj, &["mediaDescription"]),
                received_date: first_text(obj, &["receivedDate"]),
                media_id: obj.get("mediaId").and_then(integer_value),
                raw,
            })
        })
        .collect())
}

/// Conditions arrive wrapped in `applicationPrescriptions`; a bare array is accepted too.
pub fn parse_conditions(payload: JsonValue) -> Result<Vec<ConditionDraft>, AdapterError> {
    let items = match payload {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("applicationPrescriptions") {
            Some(JsonValue::Array(items)) => items,
            Some(JsonValue::Null) | None => Vec::new(),
            Some(other) => {
                return Err(AdapterError::UnexpectedShape {
                    what: "conditions",
                    detail: format!("applicationPrescriptions is {}", json_kind(&other)),
                })
            }
        },
        JsonValue::Null => Vec::new(),
        other => {
            return Err(AdapterError::UnexpectedShape {
                what: "conditions",
                detail: format!("top level is {}", json_kind(&other)),
            })
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|raw| {
            let obj = raw.as_object()?;
            Some(ConditionDraft {
                order_num: obj
                    .get("orderNumber")
                    .and_then(integer_value)
                    .and_then(|n| i32::try_from(n).ok()),
                short_desc: first_text(obj, &["shortPrescription"]),
                long_desc: first_text(obj, &["longPrescription"]),
                code: first_text(obj, &["prescriptionCode"]),
                code_desc: first_text(obj, &["prescriptionCodeDescription"]),
                complied_id: obj.get("compliedId").and_then(integer_value),
                complied_desc: first_text(obj, &["compliedStatusDescription"]),
                complied_date: first_text(obj, &["compliedDate"]),
                raw,
            })
        })
        .collect())
}

/// Parse an `"X, Y"` grid reference.
pub fn parse_grid_reference(raw: &str) -> Option<(f64, f64)> {
    let (x, y) = raw.split_once(',')?;
    let y = y.split(',').next().unwrap_or(y);
    let x = x.trim().parse::<f64>().ok()?;
    let y = y.trim().parse::<f64>().ok()?;
    Some((x, y))
}

/// Grid coordinates from `gridReference`, falling back to `easting`/`northing`.
pub fn grid_from_payload(obj: &Map<String, JsonValue>) -> Option<(f64, f64)> {
    if let Some(grid) = obj
        .get("gridReference")
        .and_then(JsonValue::as_str)
        .and_then(parse_grid_reference)
    {
        return Some(grid);
    }
    let easting = obj.get("easting").and_then(number_value)?;
    let northing = obj.get("northing").and_then(number_value)?;
    Some((easting, northing))
}

fn first_text(obj: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| obj.get(*key).and_then(text_value))
}

fn text_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn integer_value(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_value(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
