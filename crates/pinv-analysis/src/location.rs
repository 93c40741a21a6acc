//! Same-site decision between two records: grid distance first, then location text.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use pinv_core::ApplicationRecord;
use regex::Regex;

/// Generic planning vocabulary ignored when comparing location text.
pub const LOCATION_STOPWORDS: [&str; 13] = [
    "at",
    "the",
    "of",
    "site",
    "land",
    "co",
    "dublin",
    "road",
    "street",
    "avenue",
    "house",
    "development",
    "permission",
];

static ABBREVIATIONS: LazyLock<[(Regex, &'static str); 3]> = LazyLock::new(|| {
    [
        (Regex::new(r"\bst\b").expect("st pattern"), "street"),
        (Regex::new(r"\brd\b").expect("rd pattern"), "road"),
        (Regex::new(r"\bave\b").expect("ave pattern"), "avenue"),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationMatcher {
    /// Planar distance (map units) strictly below which two grid points are the same site.
    pub coordinate_tolerance: f64,
    /// Jaccard ratio strictly above which two location texts are the same site.
    pub jaccard_threshold: f64,
}

impl Default for LocationMatcher {
    fn default() -> Self {
        Self {
            coordinate_tolerance: 50.0,
            jaccard_threshold: 0.6,
        }
    }
}

impl LocationMatcher {
    pub fn new(coordinate_tolerance: f64, jaccard_threshold: f64) -> Self {
        Self {
            coordinate_tolerance,
            jaccard_threshold,
        }
    }

    /// Symmetric same-site test.
    pub fn matches(&self, a: &ApplicationRecord, b: &ApplicationRecord) -> bool {
        if let Some(distance) = grid_distance(a, b) {
            if distance < self.coordinate_tolerance {
                return true;
            }
        }

        let left = location_tokens(a.location.as_deref());
        let right = location_tokens(b.location.as_deref());
        jaccard(&left, &right).is_some_and(|ratio| ratio > self.jaccard_threshold)
    }
}

/// Euclidean distance between the two grid points, when both records carry usable ones.
///
/// A zero or non-finite coordinate counts as absent.
pub fn grid_distance(a: &ApplicationRecord, b: &ApplicationRecord) -> Option<f64> {
    let (x1, y1) = usable_grid(a)?;
    let (x2, y2) = usable_grid(b)?;
    Some(((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt())
}

fn usable_grid(record: &ApplicationRecord) -> Option<(f64, f64)> {
    let (x, y) = record.grid()?;
    let usable = |v: f64| v.is_finite() && v != 0.0;
    (usable(x) && usable(y)).then_some((x, y))
}

/// Token set of a location string after abbreviation expansion and stopword removal.
pub fn location_tokens(location: Option<&str>) -> BTreeSet<String> {
    let Some(location) = location else {
        return BTreeSet::new();
    };

    let mut text = location.to_lowercase().replace(',', " ").replace('.', "");
    for (pattern, expansion) in ABBREVIATIONS.iter() {
        text = pattern.replace_all(&text, *expansion).into_owned();
    }

    text.split_whitespace()
        .filter(|token| !LOCATION_STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// `|A ∩ B| / |A ∪ B|`, or `None` when either set is empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let overlap = a.intersection(b).count();
    let union = a.union(b).count();
    Some(overlap as f64 / union as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(location: Option<&str>, grid: Option<(f64, f64)>) -> ApplicationRecord {
        let mut r = ApplicationRecord::new("DLR", 1, "");
        r.location = location.map(str::to_string);
        if let Some((x, y)) = grid {
            r.easting = Some(x);
            r.northing = Some(y);
        }
        r
    }

    #[test]
    fn close_coordinates_match_despite_different_text() {
        let m = LocationMatcher::default();
        let a = at(Some("Unit 4, Harbour Yard"), Some((100.0, 100.0)));
        let b = at(Some("Glenageary Lodge"), Some((110.0, 110.0)));
        assert!(m.matches(&a, &b));
        assert!(m.matches(&b, &a));
    }

    #[test]
    fn far_coordinates_fall_back_to_text() {
        let m = LocationMatcher::default();
        let a = at(Some("12 High St"), Some((100.0, 100.0)));
        let b = at(Some("12 High Street"), Some((200.0, 200.0)));
        assert!(m.matches(&a, &b));

        let c = at(Some("Glenageary Lodge"), Some((200.0, 200.0)));
        assert!(!m.matches(&a, &c));
    }

    #[test]
    fn abbreviations_and_punctuation_are_normalized() {
        let m = LocationMatcher::default();
        let a = at(Some("123 High St, Dublin"), None);
        let b = at(Some("123 High Street, Dublin"), None);
        assert!(m.matches(&a, &b));
    }

    #[test]
    fn one_sided_coordinates_are_ignored() {
        let m = LocationMatcher::default();
        let a = at(Some("Seafield House"), Some((100.0, 100.0)));
        let b = at(Some("Rathmore Lodge"), None);
        assert!(grid_distance(&a, &b).is_none());
        assert!(!m.matches(&a, &b));
    }

    #[test]
    fn zero_coordinates_count_as_absent() {
        let a = at(None, Some((0.0, 0.0)));
        let b = at(None, Some((10.0, 10.0)));
        assert!(grid_distance(&a, &b).is_none());
    }

    #[test]
    fn stopword_only_locations_never_match() {
        let m = LocationMatcher::default();
        let a = at(Some("Site at the Road, Dublin"), None);
        let b = at(Some("Land of the Street"), None);
        assert!(location_tokens(a.location.as_deref()).is_empty());
        assert!(!m.matches(&a, &b));
    }

    #[test]
    fn threshold_is_strict() {
        // {1, main, lane} vs {1, main, lane, rear, garden}: 3/5 = 0.6 exactly.
        let m = LocationMatcher::default();
        let a = at(Some("1 Main Lane"), None);
        let b = at(Some("1 Main Lane Rear Garden"), None);
        assert!(!m.matches(&a, &b));
    }
}
