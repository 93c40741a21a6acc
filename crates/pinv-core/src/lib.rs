//! Core domain model and ingestion handoff types for PINV.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const CRATE_NAME: &str = "pinv-core";

/// Registration timestamp used when the source value is missing or unparseable.
/// It sorts before every real timestamp and is never strictly later than anything.
pub const MISSING_TIMESTAMP: NaiveDateTime = NaiveDateTime::MIN;

/// Decision token marking an application as administratively invalid.
pub const INVALID_DECISION_TOKEN: &str = "INVALID";

/// Identity of a planning application: the id is only unique within its jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub jurisdiction: String,
    pub id: i64,
}

impl RecordId {
    pub fn new(jurisdiction: impl Into<String>, id: i64) -> Self {
        Self {
            jurisdiction: jurisdiction.into(),
            id,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.jurisdiction, self.id)
    }
}

/// One cited reason attached to an application decision (a "condition" row upstream).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvalidationNote {
    pub category: Option<String>,
    pub detail: Option<String>,
}

/// Read-only snapshot element consumed by the analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: i64,
    pub jurisdiction: String,
    pub decision: String,
    pub registered_at: NaiveDateTime,
    pub applicant_forename: Option<String>,
    pub applicant_surname: Option<String>,
    pub agent_contact_name: Option<String>,
    pub agent_organization: Option<String>,
    pub agent_surname: Option<String>,
    pub agent_email: Option<String>,
    pub agent_phone: Option<String>,
    pub location: Option<String>,
    pub easting: Option<f64>,
    pub northing: Option<f64>,
    #[serde(default)]
    pub notes: Vec<InvalidationNote>,
    /// Remaining payload fields, opaque to the analysis core.
    #[serde(default)]
    pub extra: Map<String, JsonValue>,
}

impl ApplicationRecord {
    /// A bare record with no applicant, agent or location data.
    pub fn new(jurisdiction: impl Into<String>, id: i64, decision: impl Into<String>) -> Self {
        Self {
            id,
            jurisdiction: jurisdiction.into(),
            decision: decision.into(),
            registered_at: MISSING_TIMESTAMP,
            applicant_forename: None,
            applicant_surname: None,
            agent_contact_name: None,
            agent_organization: None,
            agent_surname: None,
            agent_email: None,
            agent_phone: None,
            location: None,
            easting: None,
            northing: None,
            notes: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn record_id(&self) -> RecordId {
        RecordId::new(self.jurisdiction.clone(), self.id)
    }

    pub fn same_identity(&self, other: &ApplicationRecord) -> bool {
        self.id == other.id && self.jurisdiction == other.jurisdiction
    }

    /// True when the decision text contains `INVALID`, case-insensitively.
    pub fn is_invalidated(&self) -> bool {
        self.decision
            .to_uppercase()
            .contains(INVALID_DECISION_TOKEN)
    }

    pub fn has_registration(&self) -> bool {
        self.registered_at != MISSING_TIMESTAMP
    }

    /// Both grid coordinates, when present.
    pub fn grid(&self) -> Option<(f64, f64)> {
        match (self.easting, self.northing) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }
}

/// Parse a registration timestamp as stored or served upstream.
///
/// Accepts RFC 3339, naive ISO date-times (with `T` or a space, optional trailing `Z`)
/// and bare `YYYY-MM-DD` dates. Anything else maps to [`MISSING_TIMESTAMP`].
pub fn parse_registration_timestamp(raw: Option<&str>) -> NaiveDateTime {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return MISSING_TIMESTAMP;
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.naive_utc();
    }

    let naive = raw.trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return dt;
        }
    }

    parse_registration_date(raw)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(MISSING_TIMESTAMP)
}

/// Calendar date of a registration value, used when persisting into a DATE column.
pub fn parse_registration_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() < 10 || !raw.is_char_boundary(10) {
        return None;
    }
    NaiveDate::parse_from_str(&raw[..10], "%Y-%m-%d").ok()
}

/// Snapshot row handed from persistence to the analysis pass, before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawApplicationRow {
    pub id: i64,
    pub jurisdiction: String,
    pub decision: Option<String>,
    pub registration_date: Option<String>,
    pub grid_x: Option<f64>,
    pub grid_y: Option<f64>,
    pub raw_json: Option<JsonValue>,
    #[serde(default)]
    pub notes: Vec<InvalidationNote>,
}

/// Parsed application payload handed from portal adapters into persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDraft {
    pub id: i64,
    pub reference: Option<String>,
    pub registration_date: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub decision: Option<String>,
    pub status: Option<String>,
    pub grid_x: Option<f64>,
    pub grid_y: Option<f64>,
    pub raw: JsonValue,
}

/// Document metadata attached to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub filename: Option<String>,
    pub document_hash: Option<String>,
    pub doc_id: Option<String>,
    pub description: Option<String>,
    pub media_description: Option<String>,
    pub received_date: Option<String>,
    pub media_id: Option<i64>,
    pub raw: JsonValue,
}

/// Decision condition (for invalidations: the cited reason).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDraft {
    pub order_num: Option<i32>,
    pub short_desc: Option<String>,
    pub long_desc: Option<String>,
    pub code: Option<String>,
    pub code_desc: Option<String>,
    pub complied_id: Option<i64>,
    pub complied_desc: Option<String>,
    pub complied_date: Option<String>,
    pub raw: JsonValue,
}
