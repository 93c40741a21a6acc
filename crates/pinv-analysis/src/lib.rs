//! Application lifecycle matching and classification for PINV.
//!
//! Given a closed snapshot of planning-application records, link each invalidated
//! application to the earliest later resubmission by the same applicant at the same
//! site, classify whether the professional agent changed, and aggregate agent,
//! jurisdiction and reason statistics. Everything here is synchronous and pure
//! over the snapshot.

pub mod aggregate;
pub mod churn;
pub mod contact;
pub mod keys;
pub mod lifecycle;
pub mod location;
pub mod normalize;
pub mod report;
pub mod snapshot;

pub use churn::{classify_churn, same_agent, ChurnOutcome};
pub use contact::extract_email;
pub use keys::{agent_key, applicant_key, is_unknown_key, MIN_KEY_CHARS};
pub use lifecycle::{ApplicantIndex, LifecycleMatcher, LifecycleOutcome, MatchResult};
pub use location::LocationMatcher;
pub use normalize::{normalize, normalize_text, UNKNOWN_SENTINEL};
pub use report::{analyze, AnalysisConfig, AnalysisReport, LifecycleReport, OVERALL_SCOPE};
pub use snapshot::{SkipReason, SkipTally, Snapshot};

pub const CRATE_NAME: &str = "pinv-analysis";
