//! Canonicalization of free-text names into comparable keys.

use std::sync::LazyLock;

use regex::Regex;

/// Result of normalizing an absent or empty value.
pub const UNKNOWN_SENTINEL: &str = "Unknown/None";

/// Professional/organizational suffix words removed as whole words.
pub const SUFFIX_STOPLIST: [&str; 12] = [
    "ltd",
    "limited",
    "arch",
    "architects",
    "planning",
    "assoc",
    "associates",
    "consultants",
    "unknown",
    "services",
    "design",
    "engineers",
];

static ANGLE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("angle segment pattern"));
static PAREN_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]+\)").expect("paren segment pattern"));
static SUFFIX_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b(?:{})\b", SUFFIX_STOPLIST.join("|"))).expect("suffix pattern")
});
static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern"));

/// Normalize a raw name or organization string.
///
/// Lower-cases, drops `<...>` and `(...)` segments, removes [`SUFFIX_STOPLIST`]
/// words, strips punctuation and collapses whitespace. `None`, empty input and the
/// sentinel itself yield [`UNKNOWN_SENTINEL`]; input that cleans down to nothing
/// yields the empty string.
///
/// Suffix removal and punctuation stripping repeat until stable, so that words
/// glued back together by punctuation removal (`"lt.d"`) are also dropped and a
/// second application never changes the result.
pub fn normalize_text(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return UNKNOWN_SENTINEL.to_string();
    };
    if raw == UNKNOWN_SENTINEL {
        return UNKNOWN_SENTINEL.to_string();
    }

    let lowered = raw.to_lowercase();
    let without_angles = ANGLE_SEGMENT.replace_all(&lowered, "");
    let mut text = PAREN_SEGMENT.replace_all(&without_angles, "").into_owned();

    loop {
        let without_suffixes = SUFFIX_WORDS.replace_all(&text, "");
        let next = PUNCTUATION.replace_all(&without_suffixes, "").into_owned();
        if next == text {
            break;
        }
        text = next;
    }

    collapse_whitespace(&text)
}

/// Normalize a present string; convenience over [`normalize_text`].
pub fn normalize(raw: &str) -> String {
    normalize_text(Some(raw))
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
