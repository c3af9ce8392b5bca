//! Infrastructure layer: page access, external analysis, configuration,
//! logging and resource housekeeping.

pub mod config; // Layered configuration (file + environment)
pub mod diagnostics; // Bounded per-URL diagnostic store
pub mod http_client; // Remote text analysis client
pub mod logging; // Logging infrastructure
pub mod page_driver; // Page capability consumed by the collection engine
pub mod resource_monitor; // Memory sampling and cleanup hooks
pub mod retry_manager; // Backoff and retry policy
pub mod snapshot_page; // Offline page over staged HTML snapshots
pub mod text_analyzer; // Sentiment and fake-review analyzers

pub use config::AppConfig;
pub use diagnostics::{DiagnosticPriority, DiagnosticStore};
pub use http_client::HttpTextAnalyzer;
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use page_driver::{NavigateOptions, PageDriver, PageError, PageFactory};
pub use resource_monitor::{ProcMemoryProbe, ResourceMonitor};
pub use retry_manager::{RetryFailure, RetryPolicy, retry_with_backoff};
pub use snapshot_page::{SnapshotPage, SnapshotPageFactory, SnapshotSite};
pub use text_analyzer::{HeuristicAnalyzer, TextAnalyzer};
