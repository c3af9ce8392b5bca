//! Sampling and text analysis artifacts, plus the final report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::review::{Review, ReviewId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Sentiment verdict for one review
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentResult {
    pub review_id: ReviewId,
    pub sentiment: Sentiment,
    pub confidence: f64,
    /// Text sentiment contradicts the star rating
    pub mismatch_detected: bool,
}

/// Authenticity verdict for one review
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FakeReviewResult {
    pub review_id: ReviewId,
    pub is_fake: bool,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

/// Sampling bucket a review was drawn into
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SampleCategory {
    Recent,
    FiveStar,
    OneStar,
}

/// Bounded sample handed to text analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SampledReviews {
    pub reviews: Vec<Review>,
    pub sampling_used: bool,
    pub total_available: usize,
    pub recent: Vec<ReviewId>,
    pub five_star: Vec<ReviewId>,
    pub one_star: Vec<ReviewId>,
}

impl SampledReviews {
    pub fn category_of(&self, id: &ReviewId) -> Option<SampleCategory> {
        if self.recent.contains(id) {
            Some(SampleCategory::Recent)
        } else if self.five_star.contains(id) {
            Some(SampleCategory::FiveStar)
        } else if self.one_star.contains(id) {
            Some(SampleCategory::OneStar)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentimentDistribution {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Trustworthy,
    Mixed,
    Suspicious,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Trustworthy => "trustworthy",
            Self::Mixed => "mixed",
            Self::Suspicious => "suspicious",
        };
        f.write_str(label)
    }
}

/// Final result stored on a completed session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub url: String,
    pub total_collected: usize,
    pub analyzed: usize,
    pub sampling_used: bool,
    pub sentiment: SentimentDistribution,
    pub mismatch_count: usize,
    pub fake_count: usize,
    pub fake_percentage: f64,
    pub average_rating: f64,
    /// Average rating without reviews confidently flagged as fake
    pub adjusted_rating: f64,
    pub trust_score: f64,
    pub verdict: Verdict,
    pub sentiment_results: Vec<SentimentResult>,
    pub fake_results: Vec<FakeReviewResult>,
    pub generated_at: DateTime<Utc>,
}
