//! Configuration infrastructure
//!
//! `AppConfig` is assembled from built-in defaults, an optional TOML/JSON/YAML
//! file and `REVIEW_SENTINEL__*` environment overrides, then validated.
//! Every section deserializes with `#[serde(default)]`, so files only need
//! the keys they change.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::domain::review::SortOrder;
use crate::infrastructure::retry_manager::RetryPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub collection: CollectionConfig,
    pub pagination: PaginationConfig,
    pub sort_navigation: SortNavigationConfig,
    pub deduplication: DeduplicationConfig,
    pub sampling: SamplingConfig,
    pub analysis: AnalysisConfig,
    pub orchestrator: OrchestratorConfig,
    pub detection: DetectionConfig,
    pub resources: ResourceConfig,
    pub diagnostics: DiagnosticsConfig,
    pub logging: LoggingConfig,
}

/// What a session collects and how long it may take
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Reviews requested across all sort passes
    pub target_total: usize,
    pub sort_orders: Vec<SortOrder>,
    /// Overall budget for the scraping phase
    pub session_timeout_secs: u64,
    pub navigation_timeout_ms: u64,
    /// Host suffixes accepted by URL validation; empty accepts any host
    pub allowed_hosts: Vec<String>,
    /// Caller-initiated retries allowed per session
    pub max_session_retries: u32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            target_total: defaults::TARGET_TOTAL,
            sort_orders: SortOrder::COLLECTION_PASSES.to_vec(),
            session_timeout_secs: defaults::SESSION_TIMEOUT_SECS,
            navigation_timeout_ms: defaults::NAVIGATION_TIMEOUT_MS,
            allowed_hosts: Vec::new(),
            max_session_retries: defaults::MAX_SESSION_RETRIES,
        }
    }
}

impl CollectionConfig {
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    /// Split `target_total` evenly over the sort passes; the remainder goes to the earliest passes
    pub fn per_order_targets(&self) -> Vec<(SortOrder, usize)> {
        let passes = self.sort_orders.len().max(1);
        let base = self.target_total / passes;
        let remainder = self.target_total % passes;
        self.sort_orders
            .iter()
            .enumerate()
            .map(|(i, order)| (*order, base + usize::from(i < remainder)))
            .collect()
    }
}

/// Adaptive pagination tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub max_attempts: u32,
    /// Consecutive no-growth cycles that end a run
    pub stagnation_limit: u32,
    pub pass_timeout_secs: u64,
    pub initial_scroll_px: i64,
    pub min_scroll_px: i64,
    pub max_scroll_px: i64,
    pub initial_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Rolling window of cycles used for adjustments
    pub window_size: usize,
    pub slow_response_ms: u64,
    pub fast_response_ms: u64,
    /// Completion ratio at the deadline that earns an extension
    pub progressive_threshold: f64,
    pub extension_ms: u64,
    pub max_extensions: u32,
    /// Run the page cleanup hook every N cycles
    pub cleanup_every: u32,
    pub scroll_containers: Vec<String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            stagnation_limit: 3,
            pass_timeout_secs: 120,
            initial_scroll_px: 1_200,
            min_scroll_px: 400,
            max_scroll_px: 4_000,
            initial_delay_ms: 800,
            min_delay_ms: 200,
            max_delay_ms: 4_000,
            window_size: 5,
            slow_response_ms: 2_500,
            fast_response_ms: 1_000,
            progressive_threshold: 0.8,
            extension_ms: 15_000,
            max_extensions: 2,
            cleanup_every: 10,
            scroll_containers: vec![
                "div.m6QErb.DxyBCb".to_string(),
                "div[role='feed']".to_string(),
                "div.review-list".to_string(),
                "[data-scroll-container]".to_string(),
            ],
        }
    }
}

impl PaginationConfig {
    pub const fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    pub const fn extension(&self) -> Duration {
        Duration::from_millis(self.extension_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortNavigationConfig {
    pub retry: RetryPolicy,
    /// Pause after a click before the page is inspected again
    pub settle_delay_ms: u64,
    /// Ratings sampled when verifying an ordering
    pub verification_sample: usize,
    pub query_params: Vec<String>,
    pub lowest_mean_max: f64,
    pub highest_mean_min: f64,
}

impl Default for SortNavigationConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(3, 500, 4_000, 2.0, true),
            settle_delay_ms: 300,
            verification_sample: 10,
            query_params: vec!["sort".to_string(), "sort_by".to_string()],
            lowest_mean_max: 3.0,
            highest_mean_min: 3.5,
        }
    }
}

impl SortNavigationConfig {
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    pub similarity_threshold: f64,
    /// Texts shorter than this (chars) only collapse on exact equality
    pub min_fuzzy_length: usize,
    /// Identical texts longer than this collapse even across authors
    pub cross_author_min_length: usize,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            min_fuzzy_length: 20,
            cross_author_min_length: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Corpus size above which sampling kicks in
    pub threshold: usize,
    pub per_category: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            threshold: 300,
            per_category: 100,
        }
    }
}

/// Text analysis collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// JSON endpoint; `None` uses the local heuristic analyzer
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub worker_width: usize,
    pub inter_wave_delay_ms: u64,
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            batch_size: 20,
            worker_width: 3,
            inter_wave_delay_ms: 500,
            requests_per_second: 2,
            request_timeout_secs: 60,
            retry: RetryPolicy::new(4, 1_000, 16_000, 2.0, true),
        }
    }
}

impl AnalysisConfig {
    pub const fn inter_wave_delay(&self) -> Duration {
        Duration::from_millis(self.inter_wave_delay_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Retry wrapped around each phase operation
    pub phase_retry: RetryPolicy,
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    pub event_buffer: usize,
    /// Keep sample and analysis artifacts so a retry can reuse them
    pub cache_intermediate_results: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            phase_retry: RetryPolicy::default(),
            retention_hours: 24,
            sweep_interval_secs: 600,
            event_buffer: 256,
            cache_intermediate_results: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn retention(&self) -> chrono::Duration {
        let hours = i64::try_from(self.retention_hours)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 3_600_000);
        chrono::Duration::hours(hours)
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    /// Visible text characters inspected for script and vocabulary signals
    pub visible_text_chars: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            cache_max_entries: 128,
            visible_text_chars: 5_000,
        }
    }
}

impl DetectionConfig {
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub sample_interval_ms: u64,
    pub warning_mb: u64,
    pub critical_mb: u64,
    pub cleanup_cooldown_ms: u64,
    pub history_size: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 5_000,
            warning_mb: 1_024,
            critical_mb: 2_048,
            cleanup_cooldown_ms: 30_000,
            history_size: 120,
        }
    }
}

impl ResourceConfig {
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub const fn cleanup_cooldown(&self) -> Duration {
        Duration::from_millis(self.cleanup_cooldown_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub critical_retention_secs: u64,
    pub high_retention_secs: u64,
    pub medium_retention_secs: u64,
    pub low_retention_secs: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            max_bytes: 10 * 1024 * 1024,
            critical_retention_secs: 24 * 3_600,
            high_retention_secs: 6 * 3_600,
            medium_retention_secs: 3_600,
            low_retention_secs: 600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `logs/` under the platform data directory
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            file_name: "review-sentinel.log".to_string(),
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` (or the default config file if present), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                info!("📄 Loading configuration from {}", path.display());
                builder = builder.add_source(config::File::from(path.to_path_buf()));
            }
            None => {
                if let Some(default_path) = Self::default_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/review-sentinel/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(defaults::APP_DIR).join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.collection;
        if c.target_total == 0 {
            return Err(ConfigError::validation("collection.target_total must be greater than 0"));
        }
        if c.sort_orders.is_empty() {
            return Err(ConfigError::validation("collection.sort_orders must not be empty"));
        }
        let mut seen = HashSet::new();
        if let Some(repeated) = c.sort_orders.iter().find(|order| !seen.insert(**order)) {
            return Err(ConfigError::validation(format!("collection.sort_orders lists {repeated} more than once")));
        }
        if c.session_timeout_secs == 0 {
            return Err(ConfigError::validation("collection.session_timeout_secs must be greater than 0"));
        }

        let p = &self.pagination;
        if p.stagnation_limit == 0 || p.max_attempts == 0 || p.window_size == 0 {
            return Err(ConfigError::validation(
                "pagination.stagnation_limit, max_attempts and window_size must be greater than 0",
            ));
        }
        if !(p.min_scroll_px <= p.initial_scroll_px && p.initial_scroll_px <= p.max_scroll_px) {
            return Err(ConfigError::validation("pagination scroll bounds must satisfy min <= initial <= max"));
        }
        if !(p.min_delay_ms <= p.initial_delay_ms && p.initial_delay_ms <= p.max_delay_ms) {
            return Err(ConfigError::validation("pagination delay bounds must satisfy min <= initial <= max"));
        }
        if !(0.0..=1.0).contains(&p.progressive_threshold) {
            return Err(ConfigError::validation("pagination.progressive_threshold must be within 0..=1"));
        }

        let d = &self.deduplication;
        if !(d.similarity_threshold > 0.0 && d.similarity_threshold <= 1.0) {
            return Err(ConfigError::validation("deduplication.similarity_threshold must be within (0, 1]"));
        }

        if self.sampling.per_category == 0 {
            return Err(ConfigError::validation("sampling.per_category must be greater than 0"));
        }

        let a = &self.analysis;
        if a.batch_size == 0 || a.worker_width == 0 || a.requests_per_second == 0 {
            return Err(ConfigError::validation(
                "analysis.batch_size, worker_width and requests_per_second must be greater than 0",
            ));
        }

        if self.orchestrator.event_buffer == 0 {
            return Err(ConfigError::validation("orchestrator.event_buffer must be greater than 0"));
        }

        if self.resources.warning_mb >= self.resources.critical_mb {
            return Err(ConfigError::validation("resources.warning_mb must be below critical_mb"));
        }

        if self.diagnostics.max_entries == 0 || self.diagnostics.max_bytes == 0 {
            return Err(ConfigError::validation("diagnostics capacity must be greater than 0"));
        }

        Ok(())
    }
}

/// Default configuration values
pub mod defaults {
    /// Environment variable prefix (`REVIEW_SENTINEL__COLLECTION__TARGET_TOTAL=150`)
    pub const ENV_PREFIX: &str = "REVIEW_SENTINEL";

    /// Directory name under the platform config/data directories
    pub const APP_DIR: &str = "review-sentinel";

    /// Reviews requested across all sort passes
    pub const TARGET_TOTAL: usize = 300;

    /// Scraping phase budget
    pub const SESSION_TIMEOUT_SECS: u64 = 300;

    pub const NAVIGATION_TIMEOUT_MS: u64 = 30_000;

    pub const MAX_SESSION_RETRIES: u32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.collection.target_total, 300);
        assert_eq!(config.sampling.threshold, 300);
        assert!(config.orchestrator.cache_intermediate_results);
    }

    #[test]
    fn test_per_order_targets_split_remainder() {
        let mut collection = CollectionConfig::default();
        collection.target_total = 100;
        let targets = collection.per_order_targets();
        assert_eq!(
            targets,
            vec![(SortOrder::Recent, 34), (SortOrder::Lowest, 33), (SortOrder::Highest, 33)]
        );
        assert_eq!(targets.iter().map(|(_, n)| n).sum::<usize>(), 100);
    }

    #[test]
    fn test_per_order_targets_keep_configured_order() {
        let mut config = AppConfig::default();
        config.collection.sort_orders = vec![SortOrder::Highest, SortOrder::Recent];
        config.collection.target_total = 10;
        config.validate().unwrap();
        assert_eq!(
            config.collection.per_order_targets(),
            vec![(SortOrder::Highest, 5), (SortOrder::Recent, 5)]
        );
    }

    #[test]
    fn test_validation_rejects_repeated_sort_order() {
        let mut config = AppConfig::default();
        config.collection.sort_orders = vec![SortOrder::Recent, SortOrder::Lowest, SortOrder::Recent];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn test_validation_rejects_bad_bounds() {
        let mut config = AppConfig::default();
        config.pagination.min_scroll_px = 5_000;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        let mut config = AppConfig::default();
        config.resources.warning_mb = config.resources.critical_mb;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[collection]\ntarget_total = 90\nsort_orders = [\"recent\", \"highest\"]\n\n[sampling]\nper_category = 10"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.collection.target_total, 90);
        assert_eq!(config.collection.sort_orders, vec![SortOrder::Recent, SortOrder::Highest]);
        assert_eq!(config.sampling.per_category, 10);
        assert_eq!(config.pagination.window_size, 5);
    }
}
