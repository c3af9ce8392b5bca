//! Final scoring of an analyzed sample

use chrono::Utc;
use std::collections::HashMap;

use crate::domain::analysis::{
    AnalysisReport, FakeReviewResult, SampledReviews, Sentiment, SentimentDistribution, SentimentResult, Verdict,
};
use crate::domain::review::ReviewId;

/// Fake flags at or above this confidence are excluded from the adjusted rating
pub const FAKE_EXCLUSION_CONFIDENCE: f64 = 0.6;
pub const TRUSTWORTHY_MIN: f64 = 0.75;
pub const MIXED_MIN: f64 = 0.5;

const FAKE_WEIGHT: f64 = 0.6;
const MISMATCH_WEIGHT: f64 = 0.25;
const RATING_GAP_WEIGHT: f64 = 0.15;

pub fn verdict_for(trust_score: f64) -> Verdict {
    if trust_score >= TRUSTWORTHY_MIN {
        Verdict::Trustworthy
    } else if trust_score >= MIXED_MIN {
        Verdict::Mixed
    } else {
        Verdict::Suspicious
    }
}

fn mean(values: impl Iterator<Item = u8>) -> f64 {
    let (sum, count) = values.fold((0u32, 0u32), |(sum, count), v| (sum + u32::from(v), count + 1));
    if count == 0 {
        0.0
    } else {
        f64::from(sum) / f64::from(count)
    }
}

/// Combine the sample with its analysis results into the session report
pub fn build_report(
    url: &str,
    total_collected: usize,
    sample: &SampledReviews,
    sentiment_results: Vec<SentimentResult>,
    fake_results: Vec<FakeReviewResult>,
) -> AnalysisReport {
    let analyzed = sample.reviews.len();

    let mut sentiment = SentimentDistribution::default();
    for result in &sentiment_results {
        match result.sentiment {
            Sentiment::Positive => sentiment.positive += 1,
            Sentiment::Negative => sentiment.negative += 1,
            Sentiment::Neutral => sentiment.neutral += 1,
        }
    }
    let mismatch_count = sentiment_results.iter().filter(|r| r.mismatch_detected).count();

    let flagged: HashMap<&ReviewId, &FakeReviewResult> =
        fake_results.iter().filter(|r| r.is_fake).map(|r| (&r.review_id, r)).collect();
    let fake_count = flagged.len();

    let average_rating = mean(sample.reviews.iter().map(|r| r.rating));
    let adjusted_rating = mean(
        sample
            .reviews
            .iter()
            .filter(|r| {
                flagged
                    .get(&r.id)
                    .is_none_or(|f| f.confidence < FAKE_EXCLUSION_CONFIDENCE)
            })
            .map(|r| r.rating),
    );

    let (fake_ratio, mismatch_ratio) = if analyzed == 0 {
        (0.0, 0.0)
    } else {
        (fake_count as f64 / analyzed as f64, mismatch_count as f64 / analyzed as f64)
    };
    let rating_gap = (average_rating - adjusted_rating).abs() / 4.0;
    let trust_score = if analyzed == 0 {
        0.0
    } else {
        (1.0 - FAKE_WEIGHT * fake_ratio - MISMATCH_WEIGHT * mismatch_ratio - RATING_GAP_WEIGHT * rating_gap)
            .clamp(0.0, 1.0)
    };

    AnalysisReport {
        url: url.to_string(),
        total_collected,
        analyzed,
        sampling_used: sample.sampling_used,
        sentiment,
        mismatch_count,
        fake_count,
        fake_percentage: fake_ratio * 100.0,
        average_rating,
        adjusted_rating,
        trust_score,
        verdict: verdict_for(trust_score),
        sentiment_results,
        fake_results,
        generated_at: Utc::now(),
    }
}
