//! Interface language detection
//!
//! Scores every supported language from page signals and keeps results in a
//! bounded TTL cache keyed by page identity. Detection never fails: any page
//! error yields the fixed fallback result.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::language::{Language, LanguageDetectionResult};
use crate::domain::selectors::SelectorSet;
use crate::infrastructure::config::DetectionConfig;
use crate::infrastructure::page_driver::{PageDriver, PageError};

const DECLARED_LANGUAGE_WEIGHT: f64 = 50.0;
const SCRIPT_WEIGHT: f64 = 30.0;
const VOCABULARY_WEIGHT: f64 = 25.0;
const VOCABULARY_HIT: f64 = 5.0;
const RTL_WEIGHT: f64 = 15.0;
const RTL_HIT: f64 = 3.0;

/// Raw observations taken from a page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSignals {
    /// `<html lang>` as declared
    pub declared_language: Option<String>,
    pub visible_text: String,
    /// Elements carrying `dir="rtl"`
    pub rtl_elements: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageScore {
    pub language: Language,
    pub score: f64,
    pub evidence: Vec<String>,
}

/// Score one candidate language against the signals
pub fn score_language(language: Language, signals: &PageSignals) -> LanguageScore {
    let profile = language.profile();
    let mut score = 0.0;
    let mut evidence = Vec::new();

    if signals
        .declared_language
        .as_deref()
        .and_then(Language::from_tag)
        == Some(language)
    {
        score += DECLARED_LANGUAGE_WEIGHT;
        evidence.push(format!("lang attribute: {}", language.code()));
    }

    let letters: Vec<char> = signals
        .visible_text
        .chars()
        .filter(|c| c.is_alphabetic())
        .collect();
    if !letters.is_empty() {
        let in_script = if profile.script_ranges.is_empty() {
            letters.iter().filter(|c| (**c as u32) < 0x0250).count()
        } else {
            letters.iter().filter(|c| profile.in_script(**c)).count()
        };
        let density = in_script as f64 / letters.len() as f64;
        if density > 0.0 {
            score += density * SCRIPT_WEIGHT;
            evidence.push(format!("script density: {density:.2}"));
        }
    }

    let lower = signals.visible_text.to_lowercase();
    let mut vocabulary_hits: Vec<String> = profile
        .ui_vocabulary
        .iter()
        .chain(profile.reviews_tab_labels)
        .chain(profile.ago_markers)
        .map(|term| term.to_lowercase())
        .filter(|term| contains_term(&lower, term))
        .collect();
    vocabulary_hits.sort_unstable();
    vocabulary_hits.dedup();
    if !vocabulary_hits.is_empty() {
        score += (vocabulary_hits.len() as f64 * VOCABULARY_HIT).min(VOCABULARY_WEIGHT);
        evidence.push(format!("vocabulary: {}", vocabulary_hits.join(", ")));
    }

    if language.is_rtl() && signals.rtl_elements > 0 {
        score += (signals.rtl_elements as f64 * RTL_HIT).min(RTL_WEIGHT);
        evidence.push(format!("rtl elements: {}", signals.rtl_elements));
    }

    LanguageScore {
        language,
        score,
        evidence,
    }
}

/// Whole-word match for Latin terms, substring match otherwise
fn contains_term(haystack: &str, term: &str) -> bool {
    if !term.is_ascii() {
        return haystack.contains(term);
    }
    haystack.match_indices(term).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Pick the best scoring language; ties go to the earlier entry of `Language::ALL`
pub fn score_signals(signals: &PageSignals) -> LanguageDetectionResult {
    let mut best: Option<LanguageScore> = None;
    for language in Language::ALL {
        let candidate = score_language(language, signals);
        if best.as_ref().is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }

    let Some(best) = best.filter(|b| b.score > 0.0) else {
        return LanguageDetectionResult::fallback("no language signals on page");
    };

    let mut result = LanguageDetectionResult::new(best.language, (best.score / 100.0).min(1.0));
    result.detected_elements = best.evidence;
    let family = SelectorSet::for_language(best.language);
    result.suggested_selectors = family
        .review_container
        .into_iter()
        .chain(family.reviews_tab)
        .collect();
    result
}

#[derive(Debug, Clone)]
struct CachedDetection {
    result: LanguageDetectionResult,
    inserted_at: Instant,
}

/// Bounded detection cache with a fixed TTL
#[derive(Debug)]
pub struct DetectionCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CachedDetection>>,
}

impl DetectionCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Page identity: URL, optionally qualified by a content hash
    pub fn key(url: &str, content_hash: Option<&str>) -> String {
        match content_hash {
            Some(hash) => format!("{url}#{hash}"),
            None => url.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Option<LanguageDetectionResult> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<LanguageDetectionResult> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = entries.get(key)?;
        if now.duration_since(cached.inserted_at) >= self.ttl {
            entries.remove(key);
            return None;
        }
        Some(cached.result.clone())
    }

    pub fn insert(&self, key: impl Into<String>, result: LanguageDetectionResult) {
        self.insert_at(key.into(), result, Instant::now());
    }

    fn insert_at(&self, key: String, result: LanguageDetectionResult, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, cached| now.duration_since(cached.inserted_at) < ttl);

            while entries.len() >= self.max_entries {
                let victim = entries
                    .iter()
                    .min_by(|(_, a), (_, b)| {
                        a.result
                            .confidence
                            .total_cmp(&b.result.confidence)
                            .then(a.inserted_at.cmp(&b.inserted_at))
                    })
                    .map(|(k, _)| k.clone());
                match victim {
                    Some(victim) => {
                        entries.remove(&victim);
                    }
                    None => break,
                }
            }
        }
        entries.insert(key, CachedDetection { result, inserted_at: now });
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Detects the interface language of a page
#[derive(Debug)]
pub struct LanguageDetector {
    cache: DetectionCache,
    visible_text_chars: usize,
}

impl LanguageDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            cache: DetectionCache::new(config.cache_ttl(), config.cache_max_entries),
            visible_text_chars: config.visible_text_chars,
        }
    }

    pub const fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    pub async fn detect(&self, page: &dyn PageDriver) -> LanguageDetectionResult {
        self.detect_with_hash(page, None).await
    }

    /// Detect, consulting the cache under the page URL (plus `content_hash`)
    pub async fn detect_with_hash(&self, page: &dyn PageDriver, content_hash: Option<&str>) -> LanguageDetectionResult {
        let url = match page.current_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!("⚠️ Language detection could not read page URL: {}", e);
                return LanguageDetectionResult::fallback(&e.to_string());
            }
        };

        let key = DetectionCache::key(&url, content_hash);
        if let Some(cached) = self.cache.get(&key) {
            debug!("🎯 Language detection cache hit for {}", url);
            return cached;
        }

        match self.collect_signals(page).await {
            Ok(signals) => {
                let result = score_signals(&signals);
                info!(
                    language = %result.language,
                    confidence = result.confidence,
                    "🌐 Detected interface language for {}", url
                );
                self.cache.insert(key, result.clone());
                result
            }
            Err(e) => {
                warn!("⚠️ Language detection failed for {}, using fallback: {}", url, e);
                LanguageDetectionResult::fallback(&e.to_string())
            }
        }
    }

    async fn collect_signals(&self, page: &dyn PageDriver) -> Result<PageSignals, PageError> {
        let declared_language = page.document_language().await?;
        let visible_text = page.visible_text(self.visible_text_chars).await?;
        let rtl_elements = page.count("[dir='rtl']").await?;
        Ok(PageSignals {
            declared_language,
            visible_text,
            rtl_elements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::page_driver::NavigateOptions;
    use crate::infrastructure::snapshot_page::{SnapshotPage, SnapshotSite};
    use std::sync::Arc;

    fn signals(lang: Option<&str>, text: &str, rtl: usize) -> PageSignals {
        PageSignals {
            declared_language: lang.map(str::to_string),
            visible_text: text.to_string(),
            rtl_elements: rtl,
        }
    }

    #[test]
    fn test_hebrew_page_scores_high() {
        let result = score_signals(&signals(Some("he"), "ביקורות מיון לפני שבוע כוכבים", 4));
        assert_eq!(result.language, Language::Hebrew);
        assert!(result.is_rtl);
        assert!(result.confidence >= 0.9);
        assert!(!result.suggested_selectors.is_empty());
    }

    #[test]
    fn test_vocabulary_separates_latin_languages() {
        let result = score_signals(&signals(None, "Reseñas ordenar hace 2 semanas más relevantes", 0));
        assert_eq!(result.language, Language::Spanish);
        assert!(result.confidence < 0.7);
    }

    #[test]
    fn test_confidence_is_bounded() {
        let result = score_signals(&signals(
            Some("ar"),
            "المراجعات ترتيب منذ الأحدث التقييم مفيدة المزيد نجوم",
            50,
        ));
        assert!(result.confidence <= 1.0);
        assert!(result.confidence >= 0.0);
    }

    #[test]
    fn test_empty_signals_fall_back() {
        let result = score_signals(&PageSignals::default());
        assert_eq!(result.language, Language::FALLBACK);
        assert!((result.confidence - LanguageDetectionResult::FALLBACK_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_ttl_and_eviction() {
        let cache = DetectionCache::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        cache.insert_at("a".into(), LanguageDetectionResult::new(Language::English, 0.9), now);
        cache.insert_at("b".into(), LanguageDetectionResult::new(Language::German, 0.4), now);
        cache.insert_at("c".into(), LanguageDetectionResult::new(Language::French, 0.8), now);

        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("b", now).is_none());
        assert!(cache.get_at("a", now).is_some());
        assert!(cache.get_at("a", now + Duration::from_secs(61)).is_none());
    }

    #[test]
    fn test_detector_cache_follows_config() {
        let config = DetectionConfig {
            cache_ttl_secs: 42,
            cache_max_entries: 1,
            ..DetectionConfig::default()
        };
        let detector = LanguageDetector::new(&config);
        assert_eq!(detector.cache().ttl(), Duration::from_secs(42));

        detector.cache().insert("a", LanguageDetectionResult::new(Language::English, 0.9));
        detector.cache().insert("b", LanguageDetectionResult::new(Language::German, 0.9));
        assert_eq!(detector.cache().len(), 1);
    }

    #[test]
    fn test_cache_prefers_dropping_expired_entries() {
        let cache = DetectionCache::new(Duration::from_secs(10), 2);
        let start = Instant::now();
        cache.insert_at("old".into(), LanguageDetectionResult::new(Language::English, 0.99), start);
        cache.insert_at("low".into(), LanguageDetectionResult::new(Language::German, 0.1), start + Duration::from_secs(9));
        let later = start + Duration::from_secs(12);
        cache.insert_at("new".into(), LanguageDetectionResult::new(Language::French, 0.5), later);

        assert!(cache.get_at("low", later).is_some());
        assert!(cache.get_at("new", later).is_some());
    }

    #[tokio::test]
    async fn test_detect_uses_cache_and_falls_back_on_error() {
        let html = r#"<html lang="de"><body><div>Rezensionen Sortieren vor 3 Tagen</div></body></html>"#;
        let page = SnapshotPage::new(Arc::new(SnapshotSite::single(html)));
        page.navigate("https://maps.example.com/place/1", &NavigateOptions::default())
            .await
            .unwrap();

        let detector = LanguageDetector::new(&DetectionConfig::default());
        let first = detector.detect(&page).await;
        assert_eq!(first.language, Language::German);
        assert_eq!(detector.cache().len(), 1);

        page.fail_next_evaluations(5);
        let cached = detector.detect(&page).await;
        assert_eq!(cached, first);

        detector.cache().clear();
        let fallback = detector.detect(&page).await;
        assert_eq!(fallback.language, Language::FALLBACK);
        assert!(detector.cache().is_empty());
    }
}
