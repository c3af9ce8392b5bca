//! Domain module - Core entities and value objects
//!
//! This module contains the review entity, language and selector data,
//! collection/analysis result types, the session state machine and the
//! in-memory session table.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod analysis;
pub mod collection;
pub mod errors;
pub mod events;
pub mod language;
pub mod review;
pub mod selectors;
pub mod session_manager;

// Re-export commonly used items for convenience
pub use analysis::{
    AnalysisReport, FakeReviewResult, SampleCategory, SampledReviews, Sentiment,
    SentimentDistribution, SentimentResult, Verdict,
};
pub use collection::{CollectedCorpus, ScrollStrategy, SortMethod, SortPassSummary, StopReason};
pub use errors::{AnalysisError, ErrorCategory};
pub use events::{AnalysisPhase, ProgressEvent, ProgressSnapshot, SessionStatus};
pub use language::{Language, LanguageDetectionResult, LanguageProfile, RelativeUnit};
pub use review::{RawReviewRecord, RecordRejection, Review, ReviewId, SortOrder};
pub use selectors::{SelectorField, SelectorSet};
pub use session_manager::{CollectionSession, SessionError, SessionManager, SessionStats};
