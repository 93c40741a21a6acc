//! Immutable, chronologically ordered record snapshot for one analysis pass.

use std::collections::BTreeMap;

use pinv_core::{parse_registration_timestamp, ApplicationRecord, RawApplicationRow, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::warn;

const MAX_SKIP_EXAMPLES: usize = 20;

/// Payload keys lifted into typed [`ApplicationRecord`] fields.
const TYPED_KEYS: [&str; 10] = [
    "applicantForename",
    "applicantSurname",
    "agentContactName",
    "agentName",
    "agentSurname",
    "agentEmail",
    "agentTelephoneNumber",
    "location",
    "easting",
    "northing",
];

/// Why a persisted row could not enter the analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("row has no payload")]
    MissingPayload,
    #[error("payload is not valid JSON: {0}")]
    UnparseablePayload(String),
    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::MissingPayload => "missing_payload",
            SkipReason::UnparseablePayload(_) => "unparseable_payload",
            SkipReason::NotAnObject(_) => "not_an_object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub id: RecordId,
    pub reason: String,
}

/// Auditable count of rows excluded from a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipTally {
    pub total: usize,
    pub by_reason: BTreeMap<String, usize>,
    /// The first few skipped rows, for inspection.
    pub examples: Vec<SkippedRow>,
}

impl SkipTally {
    pub fn record(&mut self, id: RecordId, reason: &SkipReason) {
        self.total += 1;
        *self.by_reason.entry(reason.label().to_string()).or_default() += 1;
        if self.examples.len() < MAX_SKIP_EXAMPLES {
            self.examples.push(SkippedRow {
                id,
                reason: reason.to_string(),
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Vec<ApplicationRecord>,
    skipped: SkipTally,
}

impl Snapshot {
    /// Sort by registration timestamp; ties keep their input order.
    pub fn new(mut records: Vec<ApplicationRecord>) -> Self {
        records.sort_by_key(|r| r.registered_at);
        Self {
            records,
            skipped: SkipTally::default(),
        }
    }

    /// Decode persisted rows, excluding (and counting) rows whose payload is unusable.
    pub fn from_rows(rows: impl IntoIterator<Item = RawApplicationRow>) -> Self {
        let mut records = Vec::new();
        let mut skipped = SkipTally::default();
        for row in rows {
            let id = RecordId::new(row.jurisdiction.clone(), row.id);
            match decode_row(row) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    warn!(record = %id, %reason, "skipping snapshot row");
                    skipped.record(id, &reason);
                }
            }
        }
        let mut snapshot = Self::new(records);
        snapshot.skipped = skipped;
        snapshot
    }

    pub fn records(&self) -> &[ApplicationRecord] {
        &self.records
    }

    pub fn skipped(&self) -> &SkipTally {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn invalidated(&self) -> impl Iterator<Item = &ApplicationRecord> {
        self.records.iter().filter(|r| r.is_invalidated())
    }

    /// Disjoint per-jurisdiction snapshots, each keeping the parent's order.
    pub fn partition_by_jurisdiction(&self) -> BTreeMap<String, Snapshot> {
        let mut parts: BTreeMap<String, Vec<ApplicationRecord>> = BTreeMap::new();
        for record in &self.records {
            parts
                .entry(record.jurisdiction.clone())
                .or_default()
                .push(record.clone());
        }
        parts
            .into_iter()
            .map(|(jurisdiction, records)| (jurisdiction, Snapshot::new(records)))
            .collect()
    }
}

/// Decode one persisted row into a record, falling back to defaults for missing fields.
pub fn decode_row(row: RawApplicationRow) -> Result<ApplicationRecord, SkipReason> {
    let payload = match row.raw_json {
        None | Some(JsonValue::Null) => return Err(SkipReason::MissingPayload),
        Some(JsonValue::Object(map)) => map,
        Some(JsonValue::String(text)) => match serde_json::from_str::<JsonValue>(&text) {
            Ok(JsonValue::Object(map)) => map,
            Ok(other) => return Err(SkipReason::NotAnObject(json_kind(&other))),
            Err(err) => return Err(SkipReason::UnparseablePayload(err.to_string())),
        },
        Some(other) => return Err(SkipReason::NotAnObject(json_kind(&other))),
    };

    let easting = json_number(&payload, "easting").or(row.grid_x);
    let northing = json_number(&payload, "northing").or(row.grid_y);

    let mut record = ApplicationRecord::new(row.jurisdiction, row.id, row.decision.unwrap_or_default());
    record.registered_at = parse_registration_timestamp(row.registration_date.as_deref());
    record.applicant_forename = json_text(&payload, "applicantForename");
    record.applicant_surname = json_text(&payload, "applicantSurname");
    record.agent_contact_name = json_text(&payload, "agentContactName");
    record.agent_organization = json_text(&payload, "agentName");
    record.agent_surname = json_text(&payload, "agentSurname");
    record.agent_email = json_text(&payload, "agentEmail");
    record.agent_phone = json_text(&payload, "agentTelephoneNumber");
    record.location = json_text(&payload, "location");
    record.easting = easting;
    record.northing = northing;
    record.notes = row.notes;
    record.extra = payload
        .into_iter()
        .filter(|(key, _)| !TYPED_KEYS.contains(&key.as_str()))
        .collect();
    Ok(record)
}

fn json_text(payload: &Map<String, JsonValue>, key: &str) -> Option<String> {
    match payload.get(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_number(payload: &Map<String, JsonValue>, key: &str) -> Option<f64> {
    payload.get(key)?.as_f64()
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
