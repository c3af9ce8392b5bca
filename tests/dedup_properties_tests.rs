//! Property checks for deduplication and sampling

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;

use review_sentinel_lib::application::deduplication::{DeduplicationService, ReviewDeduplicator};
use review_sentinel_lib::application::sampling::SamplingEngine;
use review_sentinel_lib::domain::{Review, SortOrder};
use review_sentinel_lib::infrastructure::config::{DeduplicationConfig, SamplingConfig};

const WORDS: [&str; 12] = [
    "great", "coffee", "slow", "service", "friendly", "staff", "cold", "pastry", "noisy", "cozy", "place", "again",
];

fn review_strategy() -> impl Strategy<Value = Review> {
    (
        0usize..6,
        prop::collection::vec(0usize..WORDS.len(), 1..12),
        1u8..=5,
        prop::option::of(0i64..2_000),
    )
        .prop_map(|(author, words, rating, hours)| {
            let text = words.iter().map(|w| WORDS[*w]).collect::<Vec<_>>().join(" ");
            let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single();
            let date = hours.and_then(|h| base.map(|b| b - Duration::hours(h)));
            Review::new(format!("author {author}"), text, rating, date, "https://maps.example.com/p", SortOrder::Recent)
        })
}

proptest! {
    #[test]
    fn dedup_never_grows_and_accounts_for_every_input(reviews in prop::collection::vec(review_strategy(), 0..60)) {
        let dedup = ReviewDeduplicator::new(DeduplicationConfig::default());
        let result = dedup.deduplicate(&reviews);
        prop_assert!(result.unique_reviews.len() <= reviews.len());
        prop_assert_eq!(result.unique_reviews.len() + result.duplicate_count, reviews.len());
        prop_assert_eq!(result.duplicate_ids.len(), result.duplicate_count);
    }

    #[test]
    fn dedup_is_idempotent(reviews in prop::collection::vec(review_strategy(), 0..60)) {
        let dedup = ReviewDeduplicator::new(DeduplicationConfig::default());
        let once = dedup.deduplicate(&reviews);
        let twice = dedup.deduplicate(&once.unique_reviews);
        prop_assert_eq!(twice.duplicate_count, 0);
        prop_assert_eq!(twice.unique_reviews, once.unique_reviews);
    }

    #[test]
    fn identical_reviews_always_collapse(reviews in prop::collection::vec(review_strategy(), 1..40)) {
        let dedup = ReviewDeduplicator::new(DeduplicationConfig::default());
        let mut doubled = reviews.clone();
        doubled.extend(reviews.iter().map(|r| r.relabelled(SortOrder::Lowest)));

        let single = dedup.deduplicate(&reviews);
        let result = dedup.deduplicate(&doubled);
        prop_assert_eq!(result.unique_reviews.len(), single.unique_reviews.len());
    }

    #[test]
    fn sampling_partitions_without_overlap(
        reviews in prop::collection::vec(review_strategy(), 0..120),
        threshold in 10usize..60,
        per_category in 1usize..20,
    ) {
        let engine = SamplingEngine::new(SamplingConfig { threshold, per_category });
        let sample = engine.sample_reviews(&reviews);
        prop_assert_eq!(sample.total_available, reviews.len());

        if reviews.len() <= threshold {
            prop_assert!(!sample.sampling_used);
            prop_assert_eq!(sample.reviews, reviews);
        } else {
            prop_assert!(sample.sampling_used);
            prop_assert!(sample.reviews.len() <= 3 * per_category);
            prop_assert!(sample.recent.len() <= per_category);
            prop_assert!(sample.five_star.len() <= per_category);
            prop_assert!(sample.one_star.len() <= per_category);

            let ids: Vec<_> = sample.recent.iter().chain(&sample.five_star).chain(&sample.one_star).collect();
            let distinct: HashSet<_> = ids.iter().collect();
            prop_assert_eq!(distinct.len(), ids.len());
            prop_assert_eq!(ids.len(), sample.reviews.len());

            let input: HashSet<_> = reviews.iter().map(|r| &r.id).collect();
            prop_assert!(sample.reviews.iter().all(|r| input.contains(&r.id)));
        }
    }
}
