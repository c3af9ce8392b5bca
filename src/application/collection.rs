//! Sort passes over one page: navigation, pagination and per-pass deduplication
//!
//! The engine never touches session state. It hands back per-pass results
//! and the assembled corpus; the orchestrator decides what to store and
//! what to report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info, warn};

use crate::application::deduplication::DeduplicationService;
use crate::application::language_detector::LanguageDetector;
use crate::application::pagination::{PaginationEngine, PaginationOutcome};
use crate::application::review_extractor::ReviewExtractor;
use crate::application::selector_resolver::SelectorResolver;
use crate::application::sort_navigation::{SortNavigationOutcome, SortNavigator};
use crate::domain::collection::{CollectedCorpus, SortMethod, SortPassSummary, StopReason};
use crate::domain::errors::ErrorCategory;
use crate::domain::language::LanguageDetectionResult;
use crate::domain::review::{Review, SortOrder};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::page_driver::{NavigateOptions, PageDriver, PageError, PageFactory};
use crate::infrastructure::resource_monitor::ResourceMonitor;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    #[error("Failed to open a page: {0}")]
    Launch(#[source] PageError),

    #[error("Failed to load {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: PageError,
    },

    #[error("Collection deadline expired: {0}")]
    Timeout(String),
}

impl CollectionError {
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Launch(_) => ErrorCategory::BrowserLaunch,
            Self::Navigation { source, .. } => match source {
                PageError::Timeout(_) => ErrorCategory::Timeout,
                PageError::Launch(_) | PageError::Closed => ErrorCategory::BrowserLaunch,
                _ => ErrorCategory::Navigation,
            },
            Self::Timeout(_) => ErrorCategory::Timeout,
        }
    }
}

/// A loaded page with its detected interface language
pub struct PreparedPage {
    pub url: String,
    pub page: Arc<dyn PageDriver>,
    pub detection: LanguageDetectionResult,
    extractor: ReviewExtractor,
}

impl std::fmt::Debug for PreparedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedPage")
            .field("url", &self.url)
            .field("detection", &self.detection)
            .finish_non_exhaustive()
    }
}

impl PreparedPage {
    pub async fn close(&self) {
        if let Err(e) = self.page.close().await {
            debug!("Closing page for {} failed: {}", self.url, e);
        }
    }
}

/// Reviews and summary of one sort pass
#[derive(Debug, Clone, PartialEq)]
pub struct SortPassResult {
    pub reviews: Vec<Review>,
    pub summary: SortPassSummary,
    pub error: Option<String>,
}

pub struct CollectionEngine {
    factory: Arc<dyn PageFactory>,
    detector: Arc<LanguageDetector>,
    resolver: SelectorResolver,
    navigator: SortNavigator,
    pagination: PaginationEngine,
    deduplicator: Arc<dyn DeduplicationService>,
    navigation: NavigateOptions,
}

impl std::fmt::Debug for CollectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionEngine")
            .field("navigator", &self.navigator)
            .field("pagination", &self.pagination)
            .finish_non_exhaustive()
    }
}

impl CollectionEngine {
    pub fn new(
        config: &AppConfig,
        factory: Arc<dyn PageFactory>,
        detector: Arc<LanguageDetector>,
        deduplicator: Arc<dyn DeduplicationService>,
    ) -> Self {
        Self {
            factory,
            detector,
            resolver: SelectorResolver::new(),
            navigator: SortNavigator::new(config.sort_navigation.clone(), config.collection.navigation_timeout()),
            pagination: PaginationEngine::new(config.pagination.clone()),
            deduplicator,
            navigation: NavigateOptions {
                timeout: config.collection.navigation_timeout(),
                wait_for: None,
            },
        }
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.pagination = self.pagination.with_monitor(monitor);
        self
    }

    /// Open a page, load `url` and detect its interface language
    pub async fn prepare(&self, url: &str, deadline: TokioInstant) -> Result<PreparedPage, CollectionError> {
        let page = self.factory.open().await.map_err(CollectionError::Launch)?;

        let loaded = tokio::time::timeout_at(deadline, page.navigate(url, &self.navigation)).await;
        let failure = match loaded {
            Ok(Ok(())) => None,
            Ok(Err(source)) => Some(CollectionError::Navigation {
                url: url.to_string(),
                source,
            }),
            Err(_) => Some(CollectionError::Timeout(format!("loading {url}"))),
        };
        if let Some(error) = failure {
            if let Err(e) = page.close().await {
                debug!("Closing failed page: {}", e);
            }
            return Err(error);
        }

        let detection = match tokio::time::timeout_at(deadline, self.detector.detect(page.as_ref())).await {
            Ok(detection) => detection,
            Err(_) => LanguageDetectionResult::fallback("detection deadline expired"),
        };
        info!(
            url = %url,
            language = %detection.language,
            confidence = detection.confidence,
            "🌐 Page ready for collection"
        );

        let extractor = ReviewExtractor::new(self.resolver.clone(), detection.clone(), url, SortOrder::Relevant);
        Ok(PreparedPage {
            url: url.to_string(),
            page,
            detection,
            extractor,
        })
    }

    /// One sort pass: apply the ordering, paginate towards `target`, drop in-pass duplicates
    pub async fn collect_order(
        &self,
        prepared: &PreparedPage,
        sort: SortOrder,
        target: usize,
        deadline: TokioInstant,
    ) -> SortPassResult {
        let started = Instant::now();
        let page = prepared.page.as_ref();
        let extractor = prepared.extractor.for_pass(sort);

        if let Err(e) = page.scroll_to_origin().await {
            debug!("Could not reset scroll before {} pass: {}", sort, e);
        }

        let navigation = match tokio::time::timeout_at(
            deadline,
            self.navigator
                .navigate_to_sort_with_retry(page, sort, prepared.detection.language, &extractor),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("⏰ Deadline expired while sorting by {}", sort);
                return SortPassResult {
                    reviews: Vec::new(),
                    summary: SortPassSummary {
                        sort,
                        sort_applied: false,
                        method: SortMethod::None,
                        collected: 0,
                        duplicates_removed: 0,
                        stopped_reason: StopReason::Timeout,
                        elapsed_ms: elapsed_ms(started),
                    },
                    error: None,
                };
            }
        };

        let mut options = self.pagination.options_for(target);
        options.timeout = options
            .timeout
            .min(deadline.saturating_duration_since(TokioInstant::now()));
        let outcome = self.pagination.paginate_for_target(page, &options, &extractor).await;

        self.finish_pass(sort, &navigation, outcome, started)
    }

    fn finish_pass(
        &self,
        sort: SortOrder,
        navigation: &SortNavigationOutcome,
        outcome: PaginationOutcome,
        started: Instant,
    ) -> SortPassResult {
        let deduplicated = self.deduplicator.deduplicate(&outcome.reviews);
        info!(
            sort = %sort,
            collected = deduplicated.unique_reviews.len(),
            duplicates = deduplicated.duplicate_count,
            stopped = %outcome.stopped_reason,
            sorted = navigation.success,
            "📥 Sort pass finished"
        );

        SortPassResult {
            summary: SortPassSummary {
                sort,
                sort_applied: navigation.success,
                method: navigation.method_used,
                collected: deduplicated.unique_reviews.len(),
                duplicates_removed: deduplicated.duplicate_count,
                stopped_reason: outcome.stopped_reason,
                elapsed_ms: elapsed_ms(started),
            },
            reviews: deduplicated.unique_reviews,
            error: outcome.error,
        }
    }

    /// Merge finished passes into a corpus, deduplicating across orders
    pub fn assemble(&self, prepared: &PreparedPage, passes: Vec<SortPassResult>, started: Instant) -> CollectedCorpus {
        let labeled: Vec<(SortOrder, Vec<Review>)> = passes
            .iter()
            .map(|pass| (pass.summary.sort, pass.reviews.clone()))
            .collect();
        let merged = self.deduplicator.merge_and_deduplicate(&labeled);
        let in_pass_duplicates: usize = passes.iter().map(|p| p.summary.duplicates_removed).sum();

        let mut per_order = BTreeMap::new();
        let mut summaries = Vec::with_capacity(passes.len());
        for pass in passes {
            per_order.insert(pass.summary.sort, pass.reviews);
            summaries.push(pass.summary);
        }

        CollectedCorpus {
            per_order,
            merged: merged.deduplication.unique_reviews,
            duplicates_removed: in_pass_duplicates + merged.deduplication.duplicate_count,
            collection_time_ms: elapsed_ms(started),
            language: Some(prepared.detection.language),
            passes: summaries,
        }
    }

    /// Run every pass in `targets` against `url` and close the page
    pub async fn collect(
        &self,
        url: &str,
        targets: &[(SortOrder, usize)],
        deadline: TokioInstant,
    ) -> Result<CollectedCorpus, CollectionError> {
        let started = Instant::now();
        let prepared = self.prepare(url, deadline).await?;

        let mut passes = Vec::with_capacity(targets.len());
        for (sort, target) in targets {
            passes.push(self.collect_order(&prepared, *sort, *target, deadline).await);
        }

        let corpus = self.assemble(&prepared, passes, started);
        prepared.close().await;
        Ok(corpus)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::deduplication::ReviewDeduplicator;
    use crate::infrastructure::snapshot_page::SnapshotPageFactory;
    use crate::test_utils::{PLACE_URL, fast_config, sortable_site};
    use std::time::Duration;

    fn engine(factory: SnapshotPageFactory) -> (CollectionEngine, Arc<SnapshotPageFactory>) {
        let config = fast_config();
        let factory = Arc::new(factory);
        let engine = CollectionEngine::new(
            &config,
            factory.clone(),
            Arc::new(LanguageDetector::new(&config.detection)),
            Arc::new(ReviewDeduplicator::new(config.deduplication.clone())),
        );
        (engine, factory)
    }

    fn deadline() -> TokioInstant {
        TokioInstant::now() + Duration::from_secs(10)
    }

    #[tokio::test]
    async fn test_collects_every_order_and_merges() {
        let (engine, factory) = engine(SnapshotPageFactory::new(sortable_site(4, 3)));
        let targets = [(SortOrder::Recent, 6), (SortOrder::Lowest, 6), (SortOrder::Highest, 6)];

        let corpus = engine.collect(PLACE_URL, &targets, deadline()).await.unwrap();

        assert_eq!(corpus.passes.len(), 3);
        assert!(corpus.passes.iter().all(|p| p.sort_applied));
        assert!(corpus.passes.iter().all(|p| p.stopped_reason == StopReason::TargetReached));
        assert!(corpus.per_order[&SortOrder::Lowest].iter().all(|r| r.rating == 1));
        assert!(corpus.per_order[&SortOrder::Highest].iter().all(|r| r.rating == 5));
        assert_eq!(corpus.language, Some(crate::domain::language::Language::English));

        let per_order_total: usize = corpus.per_order.values().map(Vec::len).sum();
        assert!(corpus.total_unique() <= per_order_total);
        assert!(corpus.merged.iter().all(|r| !r.text.is_empty()));
        assert_eq!(factory.opened_pages().len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_typed() {
        let (engine, _) = engine(SnapshotPageFactory::new(sortable_site(2, 1)).failing_launches(1));
        let error = engine.prepare(PLACE_URL, deadline()).await.unwrap_err();
        assert_eq!(error.category(), ErrorCategory::BrowserLaunch);
    }

    #[tokio::test]
    async fn test_navigation_failure_closes_page() {
        let (engine, factory) = engine(SnapshotPageFactory::new(sortable_site(2, 1)));
        let error = engine.prepare("not a url", deadline()).await.unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Navigation);
        let pages = factory.opened_pages();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].scroll_to_origin().await.is_err());
    }

    #[tokio::test]
    async fn test_expired_deadline_keeps_partial_pass() {
        let (engine, _) = engine(SnapshotPageFactory::new(sortable_site(3, 4)));
        let prepared = engine.prepare(PLACE_URL, deadline()).await.unwrap();

        let pass = engine
            .collect_order(&prepared, SortOrder::Relevant, 50, TokioInstant::now())
            .await;
        assert_eq!(pass.summary.stopped_reason, StopReason::Timeout);
        assert_eq!(pass.reviews.len(), 3);
    }
}
