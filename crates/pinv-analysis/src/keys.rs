//! Applicant and agent keys derived from one record.

use pinv_core::ApplicationRecord;

use crate::normalize::{normalize, normalize_text, UNKNOWN_SENTINEL};

/// Keys shorter than this (in characters) are treated as noise.
pub const MIN_KEY_CHARS: usize = 3;

/// Normalized `forename surname`. Empty when neither part carries usable text.
pub fn applicant_key(record: &ApplicationRecord) -> String {
    let forename = record.applicant_forename.as_deref().unwrap_or_default();
    let surname = record.applicant_surname.as_deref().unwrap_or_default();
    normalize(&format!("{forename} {surname}"))
}

/// Normalized agent identity: contact name, else organization name, else surname.
pub fn agent_key(record: &ApplicationRecord) -> String {
    let raw = [
        record.agent_contact_name.as_deref(),
        record.agent_organization.as_deref(),
        record.agent_surname.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|value| !value.is_empty());
    normalize_text(raw)
}

/// True for the null sentinel and for keys too short to identify anyone.
pub fn is_unknown_key(key: &str) -> bool {
    key == UNKNOWN_SENTINEL || key.chars().count() < MIN_KEY_CHARS
}
