//! Session-level error classification
//!
//! Components report their own typed failures; only the orchestrator turns
//! an exhausted failure into an `AnalysisError` and decides retryability.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::events::AnalysisPhase;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    NoReviews,
    BrowserLaunch,
    Navigation,
    Timeout,
    Scraping,
    Api,
    Network,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NoReviews => "no_reviews",
            Self::BrowserLaunch => "browser_launch",
            Self::Navigation => "navigation",
            Self::Timeout => "timeout",
            Self::Scraping => "scraping",
            Self::Api => "api",
            Self::Network => "network",
        }
    }

    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Validation | Self::NoReviews)
    }

    /// Message shown to callers instead of the raw failure
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Validation => "The provided URL is not a supported review page. Please check the link and try again.",
            Self::NoReviews => "No reviews were found on this page.",
            Self::BrowserLaunch => "The page could not be opened. Please try again in a moment.",
            Self::Navigation => "The page could not be loaded. It may be unavailable or blocking automated access.",
            Self::Timeout => "Collecting reviews took too long. Partial results were kept; you can retry.",
            Self::Scraping => "Reviews could not be read from the page. The page layout may have changed.",
            Self::Api => "The text analysis service is unavailable or rate limited. Please retry shortly.",
            Self::Network => "A network problem interrupted the analysis. Please check connectivity and retry.",
        }
    }

    /// Best-effort category for an untyped failure message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["invalid url", "unsupported host", "validation"]) {
            Self::Validation
        } else if has(&["no reviews"]) {
            Self::NoReviews
        } else if has(&["timed out", "timeout", "deadline"]) {
            Self::Timeout
        } else if has(&["launch", "browser"]) {
            Self::BrowserLaunch
        } else if has(&["navigat", "page load"]) {
            Self::Navigation
        } else if has(&["rate limit", "429", "api", "analyzer"]) {
            Self::Api
        } else if has(&["network", "connection", "dns", "socket"]) {
            Self::Network
        } else {
            Self::Scraping
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a session phase
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{category} error during {phase}: {message}")]
pub struct AnalysisError {
    pub category: ErrorCategory,
    /// Raw failure description, kept for logs
    pub message: String,
    pub user_message: String,
    pub retryable: bool,
    pub phase: AnalysisPhase,
    /// Session age when the failure surfaced
    pub elapsed_ms: u64,
}

impl AnalysisError {
    pub fn new(category: ErrorCategory, message: impl Into<String>, phase: AnalysisPhase, elapsed_ms: u64) -> Self {
        Self {
            category,
            message: message.into(),
            user_message: category.user_message().to_string(),
            retryable: category.is_retryable(),
            phase,
            elapsed_ms,
        }
    }

    /// Rejection of the session input before any work starts
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message, AnalysisPhase::Pending, 0)
    }

    pub fn no_reviews(url: &str, elapsed_ms: u64) -> Self {
        Self::new(
            ErrorCategory::NoReviews,
            format!("no reviews could be extracted from {url}"),
            AnalysisPhase::Scraping,
            elapsed_ms,
        )
    }
}
