//! Stratified sampling of a large corpus
//!
//! Above the threshold the sample is drawn from three disjoint buckets:
//! most recent, five-star and one-star. Each bucket filters out reviews
//! already taken by an earlier bucket before it takes its share.

use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::info;

use crate::domain::analysis::SampledReviews;
use crate::domain::review::{Review, ReviewId};
use crate::infrastructure::config::SamplingConfig;

#[derive(Debug, Clone, Default)]
pub struct SamplingEngine {
    config: SamplingConfig,
}

impl SamplingEngine {
    pub const fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn sample_reviews(&self, reviews: &[Review]) -> SampledReviews {
        if reviews.len() <= self.config.threshold {
            return SampledReviews {
                reviews: reviews.to_vec(),
                sampling_used: false,
                total_available: reviews.len(),
                ..SampledReviews::default()
            };
        }

        let per_category = self.config.per_category;
        let mut taken: HashSet<ReviewId> = HashSet::new();

        // undated reviews sort last; the stable sort keeps page order among ties
        let mut by_recency: Vec<&Review> = reviews.iter().collect();
        by_recency.sort_by_key(|r| Reverse(r.date));
        let recent = take_bucket(by_recency.into_iter(), per_category, &mut taken);
        let five_star = take_bucket(reviews.iter().filter(|r| r.rating == 5), per_category, &mut taken);
        let one_star = take_bucket(reviews.iter().filter(|r| r.rating == 1), per_category, &mut taken);

        let sample: Vec<Review> = recent
            .iter()
            .chain(&five_star)
            .chain(&one_star)
            .map(|r| (*r).clone())
            .collect();

        info!(
            total = reviews.len(),
            recent = recent.len(),
            five_star = five_star.len(),
            one_star = one_star.len(),
            "🎯 Sampled {} of {} reviews",
            sample.len(),
            reviews.len()
        );

        SampledReviews {
            total_available: reviews.len(),
            sampling_used: true,
            recent: recent.iter().map(|r| r.id.clone()).collect(),
            five_star: five_star.iter().map(|r| r.id.clone()).collect(),
            one_star: one_star.iter().map(|r| r.id.clone()).collect(),
            reviews: sample,
        }
    }
}

fn take_bucket<'a>(
    candidates: impl Iterator<Item = &'a Review>,
    limit: usize,
    taken: &mut HashSet<ReviewId>,
) -> Vec<&'a Review> {
    let mut bucket = Vec::new();
    for review in candidates {
        if bucket.len() == limit {
            break;
        }
        if taken.insert(review.id.clone()) {
            bucket.push(review);
        }
    }
    bucket
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::review::SortOrder;
    use chrono::{Duration, TimeZone, Utc};

    fn corpus(total: usize, five_star: usize, one_star: usize) -> Vec<Review> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        (0..total)
            .map(|i| {
                let rating = if i < five_star {
                    5
                } else if i < five_star + one_star {
                    1
                } else {
                    3
                };
                let date = base + Duration::hours(i as i64);
                Review::new(format!("user{i}"), format!("review number {i}"), rating, Some(date), "u", SortOrder::Recent)
            })
            .collect()
    }

    #[test]
    fn test_small_corpus_is_returned_unchanged() {
        let reviews = corpus(5, 1, 1);
        let sample = SamplingEngine::default().sample_reviews(&reviews);
        assert!(!sample.sampling_used);
        assert_eq!(sample.reviews, reviews);
        assert!(sample.recent.is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let reviews = corpus(300, 10, 10);
        assert!(!SamplingEngine::default().sample_reviews(&reviews).sampling_used);
    }

    #[test]
    fn test_large_corpus_buckets_do_not_overlap() {
        // ratings live in the oldest reviews so recency never claims them
        let reviews = corpus(350, 40, 10);
        let sample = SamplingEngine::default().sample_reviews(&reviews);

        assert!(sample.sampling_used);
        assert_eq!(sample.total_available, 350);
        assert_eq!(sample.recent.len(), 100);
        assert_eq!(sample.five_star.len(), 40);
        assert_eq!(sample.one_star.len(), 10);
        assert_eq!(sample.reviews.len(), 150);

        let unique: HashSet<_> = sample.reviews.iter().map(|r| &r.id).collect();
        assert_eq!(unique.len(), sample.reviews.len());
    }

    #[test]
    fn test_overlap_is_removed_from_later_buckets() {
        // the newest reviews are five-star, so recency takes them first
        let mut reviews = corpus(350, 0, 10);
        for review in reviews.iter_mut().rev().take(20) {
            *review = Review::new(review.author.clone(), review.text.clone(), 5, review.date, "u", SortOrder::Recent);
        }
        let sample = SamplingEngine::default().sample_reviews(&reviews);
        assert_eq!(sample.recent.len(), 100);
        assert_eq!(sample.five_star.len(), 0);
        assert_eq!(sample.one_star.len(), 10);
    }
}
