//! Best-effort extraction of an email address from a raw contact string.

use std::sync::LazyLock;

use regex::Regex;

static ANGLE_INTERIOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]+)>").expect("angle interior pattern"));
static EMAIL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.-]+@[\w.-]+").expect("email token pattern"));

/// Extract an email from `"Display Name <email>"`, free text containing an email,
/// or fall back to the trimmed input. Never fails; absent input yields `""`.
pub fn extract_email(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return String::new();
    };

    if let Some(interior) = ANGLE_INTERIOR.captures(raw).and_then(|c| c.get(1)) {
        return interior.as_str().trim().to_string();
    }

    if let Some(token) = EMAIL_TOKEN.find(raw) {
        return token.as_str().to_string();
    }

    raw.trim().to_string()
}
