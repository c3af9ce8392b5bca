//! Exact and near-duplicate suppression across sort passes
//!
//! Checks run in cost order: identical id, identical normalized content,
//! fuzzy text match within the same author and rating, and finally long
//! identical texts posted under different names.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use crate::domain::review::{Review, ReviewId, SortOrder, normalize_text};
use crate::infrastructure::config::DeduplicationConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationResult {
    pub unique_reviews: Vec<Review>,
    pub duplicate_count: usize,
    /// Ids of the dropped records, in input order
    pub duplicate_ids: Vec<ReviewId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub deduplication: DeduplicationResult,
    /// Survivors contributed by each labelled collection
    pub unique_per_label: BTreeMap<SortOrder, usize>,
}

pub trait DeduplicationService: Send + Sync {
    fn deduplicate(&self, reviews: &[Review]) -> DeduplicationResult;

    fn merge_and_deduplicate(&self, labeled: &[(SortOrder, Vec<Review>)]) -> MergeResult;
}

/// Lowercased tokens with punctuation and symbols removed
pub fn tokenize(text: &str) -> HashSet<String> {
    let filtered: String = text
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c.to_lowercase().next().unwrap_or(c))
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect();
    filtered.split_whitespace().map(str::to_string).collect()
}

/// `0.8 * jaccard(tokens) + 0.2 * length ratio`
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize_text(a), normalize_text(b));
    if na == nb {
        return 1.0;
    }
    let (ta, tb) = (tokenize(&na), tokenize(&nb));
    let union = ta.union(&tb).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        ta.intersection(&tb).count() as f64 / union as f64
    };
    let (la, lb) = (na.chars().count(), nb.chars().count());
    let length_ratio = if la.max(lb) == 0 {
        1.0
    } else {
        la.min(lb) as f64 / la.max(lb) as f64
    };
    0.8 * jaccard + 0.2 * length_ratio
}

#[derive(Debug)]
struct Kept {
    text: String,
    text_len: usize,
}

#[derive(Debug, Clone)]
pub struct ReviewDeduplicator {
    config: DeduplicationConfig,
}

impl ReviewDeduplicator {
    pub const fn new(config: DeduplicationConfig) -> Self {
        Self { config }
    }

    fn is_near_duplicate(&self, text: &str, text_len: usize, kept: &Kept) -> bool {
        if text_len < self.config.min_fuzzy_length || kept.text_len < self.config.min_fuzzy_length {
            return text == kept.text;
        }
        text_similarity(text, &kept.text) >= self.config.similarity_threshold
    }
}

impl DeduplicationService for ReviewDeduplicator {
    fn deduplicate(&self, reviews: &[Review]) -> DeduplicationResult {
        let mut ids: HashSet<&ReviewId> = HashSet::new();
        let mut content_keys: HashSet<String> = HashSet::new();
        let mut by_author_rating: HashMap<(String, u8), Vec<Kept>> = HashMap::new();
        // long normalized text -> normalized authors who posted it
        let mut long_texts: HashMap<String, HashSet<String>> = HashMap::new();
        let mut result = DeduplicationResult::default();

        for review in reviews {
            let text = normalize_text(&review.text);
            let text_len = text.chars().count();
            let group_key = (normalize_text(&review.author), review.rating);
            let content_key = review.content_key();

            let duplicate = ids.contains(&review.id)
                || content_keys.contains(&content_key)
                || by_author_rating
                    .get(&group_key)
                    .is_some_and(|group| group.iter().any(|kept| self.is_near_duplicate(&text, text_len, kept)))
                || (text_len > self.config.cross_author_min_length
                    && long_texts
                        .get(&text)
                        .is_some_and(|authors| authors.iter().any(|author| *author != group_key.0)));

            if duplicate {
                debug!("♻️ Dropping duplicate review {}", review.id);
                result.duplicate_count += 1;
                result.duplicate_ids.push(review.id.clone());
                continue;
            }

            ids.insert(&review.id);
            content_keys.insert(content_key);
            if text_len > self.config.cross_author_min_length {
                long_texts.entry(text.clone()).or_default().insert(group_key.0.clone());
            }
            by_author_rating
                .entry(group_key)
                .or_default()
                .push(Kept { text, text_len });
            result.unique_reviews.push(review.clone());
        }

        result
    }

    fn merge_and_deduplicate(&self, labeled: &[(SortOrder, Vec<Review>)]) -> MergeResult {
        let mut flattened = Vec::new();
        let mut labels = Vec::new();
        for (label, reviews) in labeled {
            flattened.extend(reviews.iter().cloned());
            labels.extend(std::iter::repeat_n(*label, reviews.len()));
        }

        let deduplication = self.deduplicate(&flattened);

        // walk the input again to attribute each survivor to its collection
        let mut survivors: HashSet<&ReviewId> = deduplication.unique_reviews.iter().map(|r| &r.id).collect();
        let mut unique_per_label: BTreeMap<SortOrder, usize> = labeled.iter().map(|(label, _)| (*label, 0)).collect();
        for (review, label) in flattened.iter().zip(labels) {
            if survivors.remove(&review.id) {
                *unique_per_label.entry(label).or_default() += 1;
            }
        }

        info!(
            unique = deduplication.unique_reviews.len(),
            duplicates = deduplication.duplicate_count,
            "♻️ Merged {} labelled collections",
            labeled.len()
        );
        MergeResult {
            deduplication,
            unique_per_label,
        }
    }
}
