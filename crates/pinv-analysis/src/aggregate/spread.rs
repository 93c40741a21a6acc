//! Pareto spread of invalidation reasons.

use pinv_core::{ApplicationRecord, InvalidationNote};
use serde::{Deserialize, Serialize};

use super::{percent, FrequencyTable};

/// Category label for reasons recorded without a short description.
pub const UNSPECIFIED_REASON: &str = "(unspecified)";

const TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadRow {
    pub rank: usize,
    pub reason: String,
    pub count: usize,
    pub pct_of_total: f64,
    pub cumulative_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadReport {
    pub total_issues: usize,
    pub rows: Vec<SpreadRow>,
    pub coverage_target_pct: f64,
    /// First rank whose cumulative count reaches the coverage target.
    pub coverage_rank: Option<usize>,
    pub top_10_count: usize,
    pub top_10_pct: f64,
}

impl SpreadReport {
    /// Rows up to and including the coverage rank.
    pub fn covering_rows(&self) -> &[SpreadRow] {
        let end = self.coverage_rank.unwrap_or(self.rows.len());
        &self.rows[..end.min(self.rows.len())]
    }
}

pub(crate) fn reason_category(note: &InvalidationNote) -> &str {
    note.category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNSPECIFIED_REASON)
}

/// Reason categories cited on invalidated records, most frequent first.
pub(crate) fn reason_frequencies(records: &[ApplicationRecord]) -> Vec<(String, usize)> {
    let mut table = FrequencyTable::new();
    for record in records.iter().filter(|r| r.is_invalidated()) {
        for note in &record.notes {
            table.add(reason_category(note));
        }
    }
    table.ranked()
}

/// `coverage` is a fraction (0.95 for 95%).
pub fn aggregate_spread(records: &[ApplicationRecord], coverage: f64) -> SpreadReport {
    let ranked = reason_frequencies(records);
    let total_issues: usize = ranked.iter().map(|(_, count)| count).sum();
    let cutoff = total_issues as f64 * coverage;

    let mut cumulative = 0usize;
    let mut coverage_rank = None;
    let mut rows = Vec::with_capacity(ranked.len());
    for (idx, (reason, count)) in ranked.into_iter().enumerate() {
        let rank = idx + 1;
        cumulative += count;
        if coverage_rank.is_none() && cumulative as f64 >= cutoff {
            coverage_rank = Some(rank);
        }
        rows.push(SpreadRow {
            rank,
            reason,
            count,
            pct_of_total: percent(count, total_issues),
            cumulative_pct: percent(cumulative, total_issues),
        });
    }

    let top_10_count = rows.iter().take(TOP_N).map(|r| r.count).sum();
    SpreadReport {
        total_issues,
        coverage_target_pct: coverage * 100.0,
        coverage_rank,
        top_10_pct: percent(top_10_count, total_issues),
        top_10_count,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_with(id: i64, reasons: &[Option<&str>]) -> ApplicationRecord {
        let mut r = ApplicationRecord::new("DLR", id, "INVALID");
        r.notes = reasons
            .iter()
            .map(|c| InvalidationNote {
                category: c.map(str::to_string),
                detail: None,
            })
            .collect();
        r
    }

    #[test]
    fn ranks_reasons_and_accumulates_shares() {
        let mut records = vec![
            invalid_with(1, &[Some("Site notice"), Some("Fee")]),
            invalid_with(2, &[Some("Site notice"), None]),
        ];
        for i in 3..20 {
            records.push(invalid_with(i, &[Some("Site notice")]));
        }
        let mut granted = ApplicationRecord::new("DLR", 99, "GRANTED");
        granted.notes = vec![InvalidationNote {
            category: Some("Fee".into()),
            detail: None,
        }];
        records.push(granted);

        let report = aggregate_spread(&records, 0.95);
        assert_eq!(report.total_issues, 21);
        assert_eq!(report.rows[0].reason, "Site notice");
        assert_eq!(report.rows[0].count, 19);
        assert_eq!(report.rows[1].reason, "Fee");
        assert_eq!(report.rows[2].reason, UNSPECIFIED_REASON);
        // 19/21 = 90.5%, 20/21 = 95.2%
        assert_eq!(report.coverage_rank, Some(2));
        assert_eq!(report.covering_rows().len(), 2);
        assert!((report.rows[2].cumulative_pct - 100.0).abs() < 1e-9);
        assert_eq!(report.top_10_count, 21);
    }

    #[test]
    fn no_reasons_is_an_empty_report() {
        let report = aggregate_spread(&[ApplicationRecord::new("DLR", 1, "INVALID")], 0.95);
        assert_eq!(report.total_issues, 0);
        assert!(report.rows.is_empty());
        assert_eq!(report.coverage_rank, None);
        assert_eq!(report.top_10_pct, 0.0);
    }
}
