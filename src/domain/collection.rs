//! Collection results shared between pagination, sort navigation and the session table

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::language::Language;
use super::review::{Review, SortOrder};

/// Why a pagination run stopped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    TargetReached,
    Stagnation,
    NoMoreContent,
    Timeout,
    Error,
}

impl StopReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TargetReached => "target-reached",
            Self::Stagnation => "stagnation",
            Self::NoMoreContent => "no-more-content",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a sort order was applied
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SortMethod {
    /// Page default, nothing to do
    Default,
    ButtonClick,
    UrlParameter,
    KeyboardNavigation,
    ScrollIntoView,
    DropdownTrigger,
    ClickableScan,
    /// Every strategy failed
    None,
}

/// Loading mode used by the pagination cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScrollStrategy {
    /// Pick a mode from what the page offers
    #[default]
    Auto,
    ScrollOnly,
    ClickOnly,
    Hybrid,
}

/// Outcome of one sort pass as stored on the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortPassSummary {
    pub sort: SortOrder,
    pub sort_applied: bool,
    pub method: SortMethod,
    pub collected: usize,
    pub duplicates_removed: usize,
    pub stopped_reason: StopReason,
    pub elapsed_ms: u64,
}

/// Everything the scraping phase produced
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectedCorpus {
    /// Deduplicated reviews per sort pass
    pub per_order: BTreeMap<SortOrder, Vec<Review>>,
    /// Cross-order deduplicated union, labelled with the first pass that found each review
    pub merged: Vec<Review>,
    pub duplicates_removed: usize,
    pub collection_time_ms: u64,
    pub language: Option<Language>,
    pub passes: Vec<SortPassSummary>,
}

impl CollectedCorpus {
    pub fn total_unique(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// True when at least one pass ran into the session deadline
    pub fn hit_timeout(&self) -> bool {
        self.passes
            .iter()
            .any(|pass| pass.stopped_reason == StopReason::Timeout)
    }
}
