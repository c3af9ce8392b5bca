//! Text analysis collaborator and its local heuristic stand-in
//!
//! Responses are positionally aligned with the request batch. An entry the
//! collaborator could not answer comes back as `None` and is filled locally
//! by the caller.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::analysis::{FakeReviewResult, Sentiment, SentimentResult};
use crate::domain::errors::ErrorCategory;
use crate::domain::review::{ANONYMOUS_AUTHOR, Review};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("Rate limited by analysis service (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Analysis service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error talking to analysis service: {0}")]
    Network(String),

    #[error("Malformed analysis response: {0}")]
    Malformed(String),

    #[error("Analysis service unavailable: {0}")]
    Unavailable(String),
}

impl AnalyzerError {
    /// Worth another attempt with backoff
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Malformed(_) | Self::Unavailable(_) => false,
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::Network,
            _ => ErrorCategory::Api,
        }
    }
}

/// Sentiment and authenticity classification of review batches
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze_sentiment(&self, batch: &[Review]) -> Result<Vec<Option<SentimentResult>>, AnalyzerError>;

    async fn detect_fake(&self, batch: &[Review]) -> Result<Vec<Option<FakeReviewResult>>, AnalyzerError>;
}

const POSITIVE_WORDS: &[&str] = &[
    "great", "excellent", "amazing", "good", "love", "loved", "friendly", "delicious", "perfect",
    "wonderful", "fantastic", "recommend", "best", "nice", "clean", "fresh", "helpful", "awesome",
    "מעולה", "מצוין", "טעים", "אהבתי", "ممتاز", "رائع", "excelente", "bueno", "delicioso",
    "génial", "excellent", "délicieux", "super", "lecker", "toll", "отлично", "вкусно",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "horrible", "worst", "rude", "dirty", "slow", "cold", "disgusting",
    "never", "poor", "disappointing", "disappointed", "overpriced", "bland", "avoid", "waste",
    "גרוע", "נורא", "איטי", "سيء", "malo", "horrible", "pésimo", "mauvais", "nul", "schlecht",
    "ужасно", "плохо",
];

const GENERIC_PRAISE: &[&str] = &[
    "best ever", "highly recommend", "amazing", "perfect", "must visit", "five stars", "10/10",
    "best place",
];

/// Local classifier used when no collaborator is configured and to fill gaps
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub const fn new() -> Self {
        Self
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric() && c != '/')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Positive minus negative lexicon hits
    fn lexicon_score(text: &str) -> i32 {
        Self::tokens(text)
            .iter()
            .map(|token| {
                let positive = i32::from(POSITIVE_WORDS.contains(&token.as_str()));
                let negative = i32::from(NEGATIVE_WORDS.contains(&token.as_str()));
                positive - negative
            })
            .sum()
    }

    const fn rating_sentiment(rating: u8) -> Sentiment {
        match rating {
            4..=5 => Sentiment::Positive,
            1..=2 => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }

    pub fn classify_sentiment(&self, review: &Review) -> SentimentResult {
        let from_rating = Self::rating_sentiment(review.rating);
        let score = Self::lexicon_score(&review.text);

        let (sentiment, confidence, mismatch) = if score == 0 {
            (from_rating, 0.55, false)
        } else {
            let from_text = if score > 0 { Sentiment::Positive } else { Sentiment::Negative };
            let mismatch = matches!(
                (from_text, from_rating),
                (Sentiment::Positive, Sentiment::Negative) | (Sentiment::Negative, Sentiment::Positive)
            );
            let strength = f64::from(score.unsigned_abs().min(3));
            (from_text, 0.1f64.mul_add(strength, 0.6), mismatch)
        };

        SentimentResult {
            review_id: review.id.clone(),
            sentiment,
            confidence,
            mismatch_detected: mismatch,
        }
    }

    pub fn classify_fake(&self, review: &Review) -> FakeReviewResult {
        let text = review.text.trim();
        let lower = text.to_lowercase();
        let length = text.chars().count();
        let extreme = matches!(review.rating, 1 | 5);
        let mut score: f64 = 0.0;
        let mut reasons = Vec::new();

        if extreme && length < 15 {
            score += 0.25;
            reasons.push("very short text with an extreme rating".to_string());
        }
        if text.matches('!').count() >= 3 {
            score += 0.15;
            reasons.push("excessive exclamation marks".to_string());
        }
        let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() > 10 {
            let upper = letters.iter().filter(|c| c.is_uppercase()).count();
            if upper as f64 / letters.len() as f64 > 0.6 {
                score += 0.15;
                reasons.push("mostly upper-case text".to_string());
            }
        }
        let praise_hits = GENERIC_PRAISE.iter().filter(|p| lower.contains(*p)).count();
        if review.rating == 5 && praise_hits >= 2 && length < 80 {
            score += 0.2;
            reasons.push("generic praise without specifics".to_string());
        }
        let tokens = Self::tokens(text);
        if tokens.len() >= 8 {
            let unique: std::collections::HashSet<_> = tokens.iter().collect();
            if (unique.len() as f64) / (tokens.len() as f64) < 0.5 {
                score += 0.2;
                reasons.push("repetitive wording".to_string());
            }
        }
        if review.author == ANONYMOUS_AUTHOR {
            score += 0.1;
            reasons.push("no visible author".to_string());
        }
        if self.classify_sentiment(review).mismatch_detected {
            score += 0.2;
            reasons.push("text sentiment contradicts the rating".to_string());
        }

        let is_fake = score >= 0.5;
        let confidence = (if is_fake { score } else { 1.0 - score }).clamp(0.5, 0.95);
        FakeReviewResult {
            review_id: review.id.clone(),
            is_fake,
            confidence,
            reasons,
        }
    }
}

#[async_trait]
impl TextAnalyzer for HeuristicAnalyzer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn analyze_sentiment(&self, batch: &[Review]) -> Result<Vec<Option<SentimentResult>>, AnalyzerError> {
        Ok(batch.iter().map(|r| Some(self.classify_sentiment(r))).collect())
    }

    async fn detect_fake(&self, batch: &[Review]) -> Result<Vec<Option<FakeReviewResult>>, AnalyzerError> {
        Ok(batch.iter().map(|r| Some(self.classify_fake(r))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::review::SortOrder;
    use rstest::rstest;

    fn review(author: &str, text: &str, rating: u8) -> Review {
        Review::new(author, text, rating, None, "https://x", SortOrder::Recent)
    }

    #[rstest]
    #[case("Great food and friendly staff", 5, Sentiment::Positive, false)]
    #[case("Terrible service, rude waiter", 1, Sentiment::Negative, false)]
    #[case("Terrible, rude and dirty", 5, Sentiment::Negative, true)]
    #[case("", 3, Sentiment::Neutral, false)]
    fn test_sentiment(
        #[case] text: &str,
        #[case] rating: u8,
        #[case] expected: Sentiment,
        #[case] mismatch: bool,
    ) {
        let result = HeuristicAnalyzer::new().classify_sentiment(&review("Dana", text, rating));
        assert_eq!(result.sentiment, expected);
        assert_eq!(result.mismatch_detected, mismatch);
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn test_fake_signals_accumulate() {
        let analyzer = HeuristicAnalyzer::new();
        let suspicious = analyzer.classify_fake(&review(ANONYMOUS_AUTHOR, "BEST EVER!!! AMAZING!!!", 5));
        assert!(suspicious.is_fake);
        assert!(suspicious.reasons.len() >= 3);

        let genuine = analyzer.classify_fake(&review(
            "Noa",
            "The shakshuka was good but the coffee arrived cold after twenty minutes.",
            3,
        ));
        assert!(!genuine.is_fake);
        assert!(genuine.confidence >= 0.5);
    }

    #[tokio::test]
    async fn test_trait_results_are_aligned() {
        let batch = vec![review("A", "Great", 5), review("B", "Awful", 1)];
        let analyzer = HeuristicAnalyzer::new();
        let sentiment = analyzer.analyze_sentiment(&batch).await.unwrap();
        let fake = analyzer.detect_fake(&batch).await.unwrap();
        assert_eq!(sentiment.len(), 2);
        assert_eq!(fake.len(), 2);
        assert_eq!(sentiment[1].as_ref().unwrap().review_id, batch[1].id);
    }

    #[test]
    fn test_error_retryability() {
        assert!(AnalyzerError::RateLimited { retry_after: None }.is_retryable());
        assert!(AnalyzerError::Http { status: 503, message: String::new() }.is_retryable());
        assert!(!AnalyzerError::Http { status: 400, message: String::new() }.is_retryable());
        assert!(!AnalyzerError::Malformed("x".into()).is_retryable());
        assert_eq!(AnalyzerError::Network("x".into()).category(), ErrorCategory::Network);
    }
}
