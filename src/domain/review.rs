//! Review entity and the single validation boundary for extracted records
//!
//! A `Review` is immutable once created. Its id is derived from the
//! (author, text, rating) triple so that the same underlying review collapses
//! to one record no matter which sort pass discovered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Author name used when the record carries no visible author
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// Ordering requested from the source before a collection pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    /// Page default ordering, no navigation required
    Relevant,
    /// Most recent first
    Recent,
    /// Lowest rating first
    Lowest,
    /// Highest rating first
    Highest,
}

impl SortOrder {
    /// Orders collected by a default session
    pub const COLLECTION_PASSES: [Self; 3] = [Self::Recent, Self::Lowest, Self::Highest];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Relevant => "relevant",
            Self::Recent => "recent",
            Self::Lowest => "lowest",
            Self::Highest => "highest",
        }
    }

    /// Query parameter value requested when the ordering is set through the URL
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Relevant => "relevance",
            Self::Recent => "newest",
            Self::Lowest => "lowest_rating",
            Self::Highest => "highest_rating",
        }
    }

    /// Position of the option inside the usual sort menu (relevant, newest, highest, lowest)
    pub const fn menu_position(self) -> usize {
        match self {
            Self::Relevant => 0,
            Self::Recent => 1,
            Self::Highest => 2,
            Self::Lowest => 3,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-derived review identifier (blake3 of author, text and rating)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(String);

impl ReviewId {
    pub fn from_content(author: &str, text: &str, rating: u8) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(author.trim().as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(text.trim().as_bytes());
        hasher.update(&[0x1f, rating]);
        let hex = hasher.finalize().to_hex();
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReviewId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A single extracted user review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub author: String,
    /// 1..=5
    pub rating: u8,
    pub text: String,
    /// Best-effort parsed timestamp
    pub date: Option<DateTime<Utc>>,
    /// Date string as it was shown on the page
    pub raw_date: Option<String>,
    pub original_url: String,
    pub sort_origin: SortOrder,
    /// How much the extractor trusts this record (0.0-1.0)
    pub extraction_confidence: f64,
}

impl Review {
    pub fn new(
        author: impl Into<String>,
        text: impl Into<String>,
        rating: u8,
        date: Option<DateTime<Utc>>,
        original_url: impl Into<String>,
        sort_origin: SortOrder,
    ) -> Self {
        let author = author.into().trim().to_string();
        let text = text.into().trim().to_string();
        let rating = rating.clamp(1, 5);
        Self {
            id: ReviewId::from_content(&author, &text, rating),
            author,
            rating,
            text,
            date,
            raw_date: None,
            original_url: original_url.into(),
            sort_origin,
            extraction_confidence: 1.0,
        }
    }

    #[must_use]
    pub fn with_raw_date(mut self, raw_date: impl Into<String>) -> Self {
        self.raw_date = Some(raw_date.into());
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.extraction_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Copy of this review labelled with another sort pass
    #[must_use]
    pub fn relabelled(&self, sort_origin: SortOrder) -> Self {
        Self {
            sort_origin,
            ..self.clone()
        }
    }

    /// Normalized (author, text, rating) key used for exact content collisions
    pub fn content_key(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}",
            normalize_text(&self.author),
            normalize_text(&self.text),
            self.rating
        )
    }
}

/// Lowercase and collapse whitespace
pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Reasons a raw record is rejected at the validation boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordRejection {
    #[error("record has neither text nor rating")]
    MissingContent,

    #[error("record has no parseable rating")]
    MissingRating,

    #[error("rating {0} is outside 1..=5")]
    InvalidRating(u8),
}

/// Loosely typed record as it comes out of a page query.
///
/// Every field is optional; `validate` is the only place that decides whether
/// the record becomes a `Review` and how much it is trusted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReviewRecord {
    pub author: Option<String>,
    pub rating: Option<u8>,
    pub text: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub raw_date: Option<String>,
    /// Base confidence assigned by the extraction strategy
    pub base_confidence: f64,
}

impl RawReviewRecord {
    pub fn validate(self, original_url: &str, sort_origin: SortOrder) -> Result<Review, RecordRejection> {
        let author = self
            .author
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        let text = self
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let rating = match (self.rating, &text) {
            (None, None) => return Err(RecordRejection::MissingContent),
            (None, Some(_)) => return Err(RecordRejection::MissingRating),
            (Some(r), _) if !(1..=5).contains(&r) => return Err(RecordRejection::InvalidRating(r)),
            (Some(r), _) => r,
        };

        let mut confidence = self.base_confidence + 0.2;
        match &text {
            Some(t) if t.chars().count() >= 10 => confidence += 0.15,
            Some(_) => {}
            None => confidence -= 0.1,
        }
        if author.is_some() {
            confidence += 0.1;
        } else {
            confidence -= 0.15;
        }
        if self.date.is_some() {
            confidence += 0.05;
        } else if self.raw_date.is_some() {
            confidence -= 0.05;
        }

        let mut review = Review::new(
            author.unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string()),
            text.unwrap_or_default(),
            rating,
            self.date,
            original_url,
            sort_origin,
        )
        .with_confidence(confidence);
        review.raw_date = self.raw_date;
        Ok(review)
    }
}
