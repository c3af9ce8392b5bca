//! Review Sentinel - adaptive review collection and trust analysis
//!
//! Collects reviews from dynamically rendered listing pages under several
//! sort orders, deduplicates and samples them, runs sentiment and
//! fake-review analysis and scores how far the listing can be trusted.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

#[doc(hidden)]
pub mod test_utils;

pub use application::{SessionOrchestrator, SessionStatusView};
pub use domain::{AnalysisReport, AnalysisPhase, ProgressEvent, SessionStatus};
pub use infrastructure::AppConfig;
