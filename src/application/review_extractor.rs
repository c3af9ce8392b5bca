//! Review extraction from resolved selectors
//!
//! Each call resolves selectors for the current page state, pulls field
//! bundles through the page capability and hands every bundle to
//! `RawReviewRecord::validate`. When no container selector yields data,
//! any element carrying a star-rating aria-label anchors a content-based
//! last resort.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::application::selector_resolver::SelectorResolver;
use crate::domain::language::{Language, LanguageDetectionResult};
use crate::domain::review::{RawReviewRecord, Review, SortOrder};
use crate::domain::selectors::{SelectorField, SelectorSet};
use crate::infrastructure::page_driver::{ElementBundle, FieldMatch, FieldProbe, PageDriver, PageError};

/// Base confidence for records found through resolved selectors
const SELECTOR_CONFIDENCE: f64 = 0.6;
/// Base confidence for content-based records
const CONTENT_CONFIDENCE: f64 = 0.3;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)").expect("valid number pattern"));
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid integer pattern"));

/// Containers tried by the content-based fallback
const CONTENT_CONTAINERS: &[&str] = &["[class*='review']", "[class*='Review']", "article", "li"];

/// Extraction callback invoked by pagination
#[async_trait]
pub trait ReviewExtraction: Send + Sync {
    async fn extract(&self, page: &dyn PageDriver) -> Result<Vec<Review>, PageError>;
}

/// Rating from an aria-label, visible text, `content` attribute or star count
pub fn parse_rating(field: &FieldMatch) -> Option<u8> {
    let candidates = [field.attr("aria-label"), field.attr("content"), Some(field.text.as_str())];
    for candidate in candidates.into_iter().flatten() {
        if let Some(rating) = first_rating(candidate) {
            return Some(rating);
        }
    }
    // one icon per star
    u8::try_from(field.match_count)
        .ok()
        .filter(|n| (1..=5).contains(n) && field.text.trim().is_empty() && field.attr("aria-label").is_none())
}

fn first_rating(text: &str) -> Option<u8> {
    let raw = NUMBER.captures(text)?.get(1)?.as_str().replace(',', ".");
    let value: f64 = raw.parse().ok()?;
    let rounded = value.round();
    (1.0..=5.0).contains(&rounded).then_some(rounded as u8)
}

/// Best-effort date parsing: ISO forms, `Month D, YYYY` and relative phrases
pub fn parse_review_date(raw: &str, language: Language, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    let profiles = std::iter::once(language)
        .chain(Language::ALL.into_iter().filter(move |l| *l != language))
        .map(Language::profile);
    let lower = trimmed.to_lowercase();
    for profile in profiles {
        if !profile.ago_markers.iter().any(|marker| lower.contains(marker)) {
            continue;
        }
        let Some(unit) = profile
            .relative_units
            .iter()
            .find(|(stem, _)| lower.contains(stem))
            .map(|(_, unit)| *unit)
        else {
            continue;
        };
        let amount = INTEGER
            .find(&lower)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(1);
        return Some(now - ChronoDuration::seconds(amount.saturating_mul(unit.seconds())));
    }
    None
}

/// Turn one bundle into a raw record
pub fn bundle_to_record(bundle: &ElementBundle, language: Language, base_confidence: f64, now: DateTime<Utc>) -> RawReviewRecord {
    let text_of = |field| {
        bundle
            .field(field)
            .map(|m| m.text.trim().to_string())
            .filter(|t| !t.is_empty())
    };

    let raw_date = bundle.field(SelectorField::Date).and_then(|m| {
        m.attr("datetime")
            .or_else(|| m.attr("content"))
            .map(str::to_string)
            .or_else(|| Some(m.text.trim().to_string()))
            .filter(|d| !d.is_empty())
    });

    RawReviewRecord {
        author: text_of(SelectorField::AuthorName),
        rating: bundle.field(SelectorField::Rating).and_then(parse_rating),
        text: text_of(SelectorField::ReviewText),
        date: raw_date.as_deref().and_then(|d| parse_review_date(d, language, now)),
        raw_date,
        base_confidence,
    }
}

/// Extracts reviews for one sort pass
#[derive(Debug, Clone)]
pub struct ReviewExtractor {
    resolver: SelectorResolver,
    detection: LanguageDetectionResult,
    original_url: String,
    sort_origin: SortOrder,
}

impl ReviewExtractor {
    pub fn new(
        resolver: SelectorResolver,
        detection: LanguageDetectionResult,
        original_url: impl Into<String>,
        sort_origin: SortOrder,
    ) -> Self {
        Self {
            resolver,
            detection,
            original_url: original_url.into(),
            sort_origin,
        }
    }

    /// Same extractor, labelling reviews with another sort pass
    #[must_use]
    pub fn for_pass(&self, sort_origin: SortOrder) -> Self {
        Self {
            sort_origin,
            ..self.clone()
        }
    }

    pub const fn sort_origin(&self) -> SortOrder {
        self.sort_origin
    }

    fn probes(selectors: &SelectorSet) -> Vec<FieldProbe> {
        [
            SelectorField::AuthorName,
            SelectorField::Rating,
            SelectorField::ReviewText,
            SelectorField::Date,
        ]
        .into_iter()
        .map(|field| FieldProbe {
            field,
            selectors: selectors.field(field).to_vec(),
        })
        .collect()
    }

    fn content_probes(&self) -> Vec<FieldProbe> {
        let star_words = self
            .detection
            .language
            .profile()
            .star_words
            .iter()
            .chain(Language::English.profile().star_words);
        let mut rating: Vec<String> = star_words
            .flat_map(|word| [format!("[aria-label*='{word}']"), format!("[title*='{word}']")])
            .collect();
        rating.push("[aria-label*='Star']".to_string());

        vec![
            FieldProbe {
                field: SelectorField::AuthorName,
                selectors: vec!["[class*='author']".into(), "[class*='name']".into(), "[itemprop='author']".into()],
            },
            FieldProbe {
                field: SelectorField::Rating,
                selectors: rating,
            },
            FieldProbe {
                field: SelectorField::ReviewText,
                selectors: vec!["[class*='text']".into(), "[class*='body']".into(), "p".into(), "q".into()],
            },
            FieldProbe {
                field: SelectorField::Date,
                selectors: vec!["time".into(), "[class*='date']".into()],
            },
        ]
    }

    /// Validate bundles, dropping rejects and repeated ids
    fn validate_bundles(&self, bundles: &[ElementBundle], base_confidence: f64) -> Vec<Review> {
        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut rejected = 0usize;
        let mut reviews = Vec::new();
        for bundle in bundles {
            match bundle_to_record(bundle, self.detection.language, base_confidence, now)
                .validate(&self.original_url, self.sort_origin)
            {
                Ok(review) => {
                    if seen.insert(review.id.clone()) {
                        reviews.push(review);
                    }
                }
                Err(_) => rejected += 1,
            }
        }
        if rejected > 0 {
            debug!("🧾 Rejected {} of {} extracted records", rejected, bundles.len());
        }
        reviews
    }

    async fn extract_with(
        &self,
        page: &dyn PageDriver,
        containers: &[String],
        probes: &[FieldProbe],
        base_confidence: f64,
    ) -> Result<Vec<Review>, PageError> {
        for container in containers {
            let bundles = match page.extract_bundles(container, probes).await {
                Ok(bundles) => bundles,
                Err(PageError::InvalidSelector { selector, reason }) => {
                    debug!("Skipping unusable container '{}': {}", selector, reason);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if bundles.is_empty() {
                continue;
            }
            let reviews = self.validate_bundles(&bundles, base_confidence);
            if !reviews.is_empty() {
                return Ok(reviews);
            }
        }
        Ok(Vec::new())
    }
}

#[async_trait]
impl ReviewExtraction for ReviewExtractor {
    async fn extract(&self, page: &dyn PageDriver) -> Result<Vec<Review>, PageError> {
        let selectors = self.resolver.resolve(&self.detection, page).await;
        let reviews = self
            .extract_with(page, &selectors.review_container, &Self::probes(&selectors), SELECTOR_CONFIDENCE)
            .await?;
        if !reviews.is_empty() {
            return Ok(reviews);
        }

        let containers: Vec<String> = CONTENT_CONTAINERS.iter().map(|s| (*s).to_string()).collect();
        let reviews = self
            .extract_with(page, &containers, &self.content_probes(), CONTENT_CONFIDENCE)
            .await?;
        if !reviews.is_empty() {
            warn!("🩹 Selector extraction found nothing, content-based fallback recovered {} reviews", reviews.len());
        }
        Ok(reviews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::snapshot_page::{SnapshotPage, SnapshotSite};
    use chrono::TimeZone;
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn field(text: &str, aria: Option<&str>, match_count: usize) -> FieldMatch {
        let mut attributes = BTreeMap::new();
        if let Some(aria) = aria {
            attributes.insert("aria-label".to_string(), aria.to_string());
        }
        FieldMatch {
            selector: "x".into(),
            text: text.into(),
            attributes,
            match_count,
        }
    }

    #[rstest]
    #[case(field("", Some("4 stars"), 1), Some(4))]
    #[case(field("", Some("Rated 4,6 out of 5"), 1), Some(5))]
    #[case(field("", Some("‏5 כוכבים"), 1), Some(5))]
    #[case(field("3/5", None, 1), Some(3))]
    #[case(field("", None, 4), Some(4))]
    #[case(field("", Some("no rating"), 1), None)]
    #[case(field("9 stars", None, 1), None)]
    fn test_parse_rating(#[case] input: FieldMatch, #[case] expected: Option<u8>) {
        assert_eq!(parse_rating(&input), expected);
    }

    #[rstest]
    #[case("2 weeks ago", Language::English, 14)]
    #[case("a month ago", Language::English, 30)]
    #[case("לפני 3 ימים", Language::Hebrew, 3)]
    #[case("hace 2 días", Language::English, 2)]
    #[case("vor einem Jahr", Language::German, 365)]
    fn test_parse_relative_dates(#[case] raw: &str, #[case] language: Language, #[case] days: i64) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let parsed = parse_review_date(raw, language, now).unwrap();
        assert_eq!((now - parsed).num_days(), days);
    }

    #[test]
    fn test_parse_absolute_dates() {
        let now = Utc::now();
        let iso = parse_review_date("2024-03-05", Language::English, now).unwrap();
        let long = parse_review_date("March 5, 2024", Language::English, now).unwrap();
        assert_eq!(iso, long);
        assert!(parse_review_date("sometime", Language::English, now).is_none());
    }

    fn detection() -> LanguageDetectionResult {
        LanguageDetectionResult::new(Language::English, 0.9)
    }

    #[tokio::test]
    async fn test_extracts_and_validates_bundles() {
        let html = r#"<html lang="en"><body>
            <div class="jftiEf" data-review-id="1">
                <div class="d4r55">Dana</div>
                <span class="kvMYJc" role="img" aria-label="5 stars"></span>
                <span class="rsqaWe">2 weeks ago</span>
                <span class="wiI7pd">Wonderful staff and tasty food</span>
            </div>
            <div class="jftiEf" data-review-id="2">
                <div class="d4r55">No rating here</div>
                <span class="wiI7pd">Text but nothing else</span>
            </div>
            <div class="jftiEf" data-review-id="3">
                <span class="kvMYJc" role="img" aria-label="2 stars"></span>
            </div>
        </body></html>"#;
        let page = SnapshotPage::new(Arc::new(SnapshotSite::single(html)));
        let extractor = ReviewExtractor::new(SelectorResolver::new(), detection(), "https://x", SortOrder::Recent);

        let reviews = extractor.extract(&page).await.unwrap();
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].author, "Dana");
        assert_eq!(reviews[0].rating, 5);
        assert!(reviews[0].date.is_some());
        assert!(reviews[0].extraction_confidence > reviews[1].extraction_confidence);
        assert_eq!(reviews[1].rating, 2);
        assert_eq!(reviews[1].sort_origin, SortOrder::Recent);
    }

    #[tokio::test]
    async fn test_content_based_fallback() {
        let html = r#"<html><body><ul>
            <li><b class="user-name">Avi</b><i aria-label="1 star"></i><p>Cold soup and a long wait</p></li>
            <li><p>Advertisement</p></li>
        </ul></body></html>"#;
        let page = SnapshotPage::new(Arc::new(SnapshotSite::single(html)));
        let extractor = ReviewExtractor::new(SelectorResolver::new(), detection(), "https://x", SortOrder::Lowest);

        let reviews = extractor.extract(&page).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].rating, 1);
        assert_eq!(reviews[0].author, "Avi");
        assert!(reviews[0].extraction_confidence < 0.9);
    }

    #[tokio::test]
    async fn test_empty_page_yields_nothing() {
        let page = SnapshotPage::new(Arc::new(SnapshotSite::single("<html><body></body></html>")));
        let extractor = ReviewExtractor::new(SelectorResolver::new(), detection(), "https://x", SortOrder::Recent);
        assert!(extractor.extract(&page).await.unwrap().is_empty());
    }
}
