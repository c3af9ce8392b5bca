//! Page capability consumed by the collection engine
//!
//! Everything the engine needs from a rendered page goes through
//! `PageDriver`. Implementations return plain snapshots so scoring and
//! ordering logic stays in Rust and can be tested without a browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::errors::ErrorCategory;
use crate::domain::selectors::SelectorField;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("Failed to launch page: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Page operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Page evaluation failed: {0}")]
    Evaluation(String),

    #[error("Page is closed")]
    Closed,
}

impl PageError {
    pub fn navigation(url: &str, reason: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_selector(selector: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Launch(_) | Self::Closed => ErrorCategory::BrowserLaunch,
            Self::Navigation { .. } => ErrorCategory::Navigation,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::InvalidSelector { .. } | Self::Evaluation(_) => ErrorCategory::Scraping,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NavigateOptions {
    pub timeout: Duration,
    /// Selector that must be present before navigation counts as done
    pub wait_for: Option<String>,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            wait_for: None,
        }
    }
}

/// Serializable view of one matched element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    /// Position among the matches of the query
    pub index: usize,
    pub tag: String,
    /// Whitespace-collapsed text content
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub visible: bool,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Accessible label: aria-label, then title, then text
    pub fn label(&self) -> &str {
        self.attr("aria-label")
            .or_else(|| self.attr("title"))
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.text)
    }
}

/// Candidate locators tried, in order, inside each container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldProbe {
    pub field: SelectorField,
    pub selectors: Vec<String>,
}

/// First selector of a probe that matched inside a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub selector: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    /// Number of elements the winning selector matched (star icons, etc.)
    pub match_count: usize,
}

impl FieldMatch {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One container with the fields found inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementBundle {
    pub container: ElementSnapshot,
    pub fields: HashMap<SelectorField, FieldMatch>,
}

impl ElementBundle {
    pub fn field(&self, field: SelectorField) -> Option<&FieldMatch> {
        self.fields.get(&field)
    }
}

/// Rendered page driven by the collection engine.
///
/// Calls against one page are issued sequentially; implementations may rely
/// on that and use interior mutability without fine-grained locking.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn current_url(&self) -> Result<String, PageError>;

    async fn navigate(&self, url: &str, options: &NavigateOptions) -> Result<(), PageError>;

    /// Declared document language (`<html lang>`)
    async fn document_language(&self) -> Result<Option<String>, PageError>;

    /// Visible body text, truncated to `max_chars`
    async fn visible_text(&self, max_chars: usize) -> Result<String, PageError>;

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementSnapshot>, PageError>;

    /// Outermost elements matching `container`, each with the first matching
    /// selector of every probe evaluated inside it
    async fn extract_bundles(
        &self,
        container: &str,
        probes: &[FieldProbe],
    ) -> Result<Vec<ElementBundle>, PageError>;

    async fn count(&self, selector: &str) -> Result<usize, PageError>;

    /// Click the `index`-th match; `Ok(false)` when there is no such element
    async fn click(&self, selector: &str, index: usize) -> Result<bool, PageError>;

    /// Scroll `target` (or the document when `None`) by `pixels`
    async fn scroll_by(&self, target: Option<&str>, pixels: i64) -> Result<(), PageError>;

    async fn scroll_to_origin(&self) -> Result<(), PageError>;

    async fn press_key(&self, key: &str) -> Result<(), PageError>;

    /// Wait until `selector` is present; `Ok(false)` on timeout
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, PageError>;

    /// Page-side memory cleanup hook; returns removed transient markers
    async fn run_cleanup(&self) -> Result<usize, PageError>;

    async fn close(&self) -> Result<(), PageError>;
}

/// Opens one page per session
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn PageDriver>, PageError>;
}
