//! Application layer module
//!
//! Collection, sampling, analysis and the session orchestrator that
//! drives them phase by phase.

pub mod collection;
pub mod deduplication;
pub mod language_detector;
pub mod orchestrator;
pub mod pagination;
pub mod review_extractor;
pub mod sampling;
pub mod selector_resolver;
pub mod sort_navigation;
pub mod text_analysis;
pub mod verdict;

pub use collection::{CollectionEngine, CollectionError, PreparedPage, SortPassResult};
pub use deduplication::{DeduplicationResult, DeduplicationService, ReviewDeduplicator};
pub use language_detector::LanguageDetector;
pub use orchestrator::{OrchestratorError, SessionOrchestrator, SessionStatusView};
pub use pagination::{PaginationEngine, PaginationOutcome};
pub use review_extractor::{ReviewExtraction, ReviewExtractor};
pub use sampling::SamplingEngine;
pub use selector_resolver::SelectorResolver;
pub use sort_navigation::{SortNavigationOutcome, SortNavigator};
pub use text_analysis::{AnalysisRun, AnalysisRunner};
