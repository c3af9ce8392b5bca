//! Confidence-tiered selector resolution
//!
//! Orders the language-specific and generic selector families according to
//! how sure detection is about the page language. Only the middle tier asks
//! the live page which candidates are present.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::domain::language::LanguageDetectionResult;
use crate::domain::selectors::{SelectorField, SelectorSet, dedup_preserving_order, specificity};
use crate::infrastructure::page_driver::PageDriver;

pub const HIGH_CONFIDENCE: f64 = 0.7;
pub const MEDIUM_CONFIDENCE: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// Language family first, generic appended
    LanguageFirst,
    /// Families interleaved, live-present selectors promoted
    Interleaved,
    /// Generic first, language family as a last resort
    GenericFirst,
}

impl ResolutionTier {
    pub fn for_confidence(confidence: f64) -> Self {
        if confidence >= HIGH_CONFIDENCE {
            Self::LanguageFirst
        } else if confidence >= MEDIUM_CONFIDENCE {
            Self::Interleaved
        } else {
            Self::GenericFirst
        }
    }
}

/// Stable sort by descending specificity
fn by_specificity(mut selectors: Vec<String>) -> Vec<String> {
    selectors.sort_by_key(|s| Reverse(specificity(s)));
    selectors
}

fn interleave(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    for i in 0..a.len().max(b.len()) {
        if let Some(s) = a.get(i) {
            out.push(s.clone());
        }
        if let Some(s) = b.get(i) {
            out.push(s.clone());
        }
    }
    out
}

/// Concatenate groups, dropping anything already placed by an earlier group
fn concat_groups(groups: Vec<Vec<String>>) -> Vec<String> {
    let mut seen = HashSet::new();
    groups
        .into_iter()
        .flatten()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Order the candidates of one field. `counts` is only read in the interleaved tier.
pub fn order_candidates(
    tier: ResolutionTier,
    language: &[String],
    generic: &[String],
    counts: &HashMap<String, usize>,
) -> Vec<String> {
    let language = dedup_preserving_order(language.to_vec());
    let generic = dedup_preserving_order(generic.to_vec());

    match tier {
        ResolutionTier::LanguageFirst => concat_groups(vec![by_specificity(language), by_specificity(generic)]),
        ResolutionTier::GenericFirst => concat_groups(vec![by_specificity(generic), by_specificity(language)]),
        ResolutionTier::Interleaved => {
            let mixed = dedup_preserving_order(interleave(&language, &generic));
            let (mut present, absent): (Vec<String>, Vec<String>) = mixed
                .into_iter()
                .partition(|s| counts.get(s).copied().unwrap_or(0) > 0);
            present.sort_by_key(|s| (Reverse(counts.get(s).copied().unwrap_or(0)), Reverse(specificity(s))));
            concat_groups(vec![present, by_specificity(absent)])
        }
    }
}

/// Builds the ordered `SelectorSet` for an extraction call
#[derive(Debug, Clone, Default)]
pub struct SelectorResolver {
    generic: SelectorSet,
}

impl SelectorResolver {
    pub fn new() -> Self {
        Self {
            generic: SelectorSet::generic(),
        }
    }

    pub async fn resolve(&self, detection: &LanguageDetectionResult, page: &dyn PageDriver) -> SelectorSet {
        let tier = ResolutionTier::for_confidence(detection.confidence);
        let language_family = SelectorSet::for_language(detection.language);

        let counts = if tier == ResolutionTier::Interleaved {
            self.probe(&language_family, page).await
        } else {
            HashMap::new()
        };

        let mut resolved = SelectorSet::default();
        for field in SelectorField::ALL {
            *resolved.field_mut(field) = order_candidates(
                tier,
                language_family.field(field),
                self.generic.field(field),
                &counts,
            );
        }
        debug!(
            language = %detection.language,
            confidence = detection.confidence,
            "🧭 Resolved selectors with {:?} tier", tier
        );
        resolved
    }

    /// Live match counts for every candidate; unparseable selectors count as absent
    async fn probe(&self, language_family: &SelectorSet, page: &dyn PageDriver) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for field in SelectorField::ALL {
            for selector in language_family.field(field).iter().chain(self.generic.field(field)) {
                if counts.contains_key(selector) {
                    continue;
                }
                let count = page.count(selector).await.unwrap_or(0);
                counts.insert(selector.clone(), count);
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::language::Language;
    use crate::infrastructure::snapshot_page::{SnapshotPage, SnapshotSite};
    use rstest::rstest;
    use std::sync::Arc;

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[rstest]
    #[case(0.95, ResolutionTier::LanguageFirst)]
    #[case(0.7, ResolutionTier::LanguageFirst)]
    #[case(0.69, ResolutionTier::Interleaved)]
    #[case(0.4, ResolutionTier::Interleaved)]
    #[case(0.39, ResolutionTier::GenericFirst)]
    fn test_tier_thresholds(#[case] confidence: f64, #[case] tier: ResolutionTier) {
        assert_eq!(ResolutionTier::for_confidence(confidence), tier);
    }

    #[test]
    fn test_language_first_keeps_family_blocks() {
        let language = owned(&["span.a", "div[dir='rtl'][data-x]"]);
        let generic = owned(&["div[data-y]", "span.a"]);
        let ordered = order_candidates(ResolutionTier::LanguageFirst, &language, &generic, &HashMap::new());
        assert_eq!(ordered, owned(&["div[dir='rtl'][data-x]", "span.a", "div[data-y]"]));

        let ordered = order_candidates(ResolutionTier::GenericFirst, &language, &generic, &HashMap::new());
        assert_eq!(ordered[0], "div[data-y]");
        assert_eq!(ordered.len(), 3);
    }

    #[test]
    fn test_interleaved_promotes_present_selectors() {
        let language = owned(&["div.lang", "div.lang2"]);
        let generic = owned(&["div.gen", "div.gen2"]);
        let counts: HashMap<String, usize> = [("div.gen2".to_string(), 3), ("div.lang2".to_string(), 7)]
            .into_iter()
            .collect();
        let ordered = order_candidates(ResolutionTier::Interleaved, &language, &generic, &counts);
        assert_eq!(ordered, owned(&["div.lang2", "div.gen2", "div.lang", "div.gen"]));
    }

    #[tokio::test]
    async fn test_resolve_is_stable_on_unchanged_page() {
        let html = r#"<html><body><div class="jftiEf" data-review-id="1"><span class="wiI7pd">Hi</span></div></body></html>"#;
        let page = SnapshotPage::new(Arc::new(SnapshotSite::single(html)));
        let resolver = SelectorResolver::new();
        let detection = LanguageDetectionResult::new(Language::English, 0.5);

        let first = resolver.resolve(&detection, &page).await;
        let second = resolver.resolve(&detection, &page).await;
        assert_eq!(first, second);
        assert_eq!(first.review_container[0], "div.jftiEf[data-review-id]");
    }
}
