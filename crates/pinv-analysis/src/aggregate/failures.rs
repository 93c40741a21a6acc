//! Most frequent specific notes within the top invalidation categories.

use std::collections::HashMap;
use std::sync::LazyLock;

use pinv_core::ApplicationRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::spread::{reason_category, reason_frequencies};
use super::FrequencyTable;
use crate::normalize::collapse_whitespace;

/// Bucket for descriptions that carry no `Note:` marker.
pub const GENERIC_NOTE: &str = "(Generic/No specific note parsed)";

static NOTE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bnote\s*[:\-]+\s*(.*)").expect("note marker pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCount {
    pub note: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCategory {
    pub rank: usize,
    pub category: String,
    pub count: usize,
    pub top_notes: Vec<NoteCount>,
}

/// Text following the first whole-word `Note` plus `:`/`-` separator, whitespace collapsed.
pub fn clean_note(text: Option<&str>) -> Option<String> {
    let captured = NOTE_MARKER.captures(text?)?.get(1)?;
    Some(collapse_whitespace(captured.as_str()))
}

pub fn aggregate_failures(
    records: &[ApplicationRecord],
    max_categories: usize,
    notes_per_category: usize,
) -> Vec<FailureCategory> {
    let mut notes: HashMap<&str, FrequencyTable> = HashMap::new();
    for record in records.iter().filter(|r| r.is_invalidated()) {
        for note in &record.notes {
            let parsed = clean_note(note.detail.as_deref());
            notes
                .entry(reason_category(note))
                .or_default()
                .add(parsed.as_deref().unwrap_or(GENERIC_NOTE));
        }
    }

    reason_frequencies(records)
        .into_iter()
        .take(max_categories)
        .enumerate()
        .map(|(idx, (category, count))| {
            let top_notes = notes
                .get(category.as_str())
                .map(|table| {
                    table
                        .ranked()
                        .into_iter()
                        .take(notes_per_category)
                        .map(|(note, count)| NoteCount { note, count })
                        .collect()
                })
                .unwrap_or_default();
            FailureCategory {
                rank: idx + 1,
                category,
                count,
                top_notes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinv_core::InvalidationNote;

    #[test]
    fn extracts_text_after_note_marker() {
        let text = "Some random text. Note: This is the reason. More text.";
        assert_eq!(clean_note(Some(text)).as_deref(), Some("This is the reason. More text."));
        assert_eq!(
            clean_note(Some("NOTE -\n  site notice\n  illegible")).as_deref(),
            Some("site notice illegible")
        );
    }

    #[test]
    fn requires_a_whole_word_marker_and_separator() {
        assert_eq!(clean_note(Some("No note here")), None);
        assert_eq!(clean_note(Some("Footnote: ignored")), None);
        assert_eq!(clean_note(None), None);
    }

    #[test]
    fn groups_notes_under_top_categories() {
        let note = |category: &str, detail: &str| InvalidationNote {
            category: Some(category.into()),
            detail: Some(detail.into()),
        };
        let mut a = ApplicationRecord::new("DLR", 1, "INVALID");
        a.notes = vec![
            note("Site notice", "Note: notice not visible"),
            note("Fee", "Incorrect fee"),
        ];
        let mut b = ApplicationRecord::new("DLR", 2, "INVALID");
        b.notes = vec![
            note("Site notice", "Note: notice not visible"),
            note("Site notice", "Note: wrong date"),
        ];

        let categories = aggregate_failures(&[a, b], 30, 5);
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category, "Site notice");
        assert_eq!(categories[0].count, 3);
        assert_eq!(
            categories[0].top_notes[0],
            NoteCount {
                note: "notice not visible".into(),
                count: 2
            }
        );
        assert_eq!(categories[1].top_notes[0].note, GENERIC_NOTE);

        assert_eq!(aggregate_failures(&[], 30, 5), vec![]);
    }
}
