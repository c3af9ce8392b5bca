//! Adaptive pagination towards a target review count
//!
//! One cycle = load action (scroll, "load more" click, or both), an adaptive
//! wait and a re-extraction. Speed and scroll distance follow the last few
//! cycles. Every page call is raced against the run deadline so a slow page
//! ends the run with whatever was gathered.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info, warn};

use crate::application::review_extractor::ReviewExtraction;
use crate::application::sort_navigation::find_labelled;
use crate::domain::collection::{ScrollStrategy, StopReason};
use crate::domain::language::Language;
use crate::domain::review::Review;
use crate::infrastructure::config::PaginationConfig;
use crate::infrastructure::page_driver::{PageDriver, PageError};
use crate::infrastructure::resource_monitor::ResourceMonitor;

const LOAD_MORE_CANDIDATES: &str = "button, [role='button'], a";

/// "Load more" labels of every supported language
static LOAD_MORE_LABELS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    Language::ALL
        .iter()
        .flat_map(|language| language.profile().load_more_labels.iter().copied())
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationOptions {
    pub target_count: usize,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub scroll_strategy: ScrollStrategy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Adjustment {
    SpeedUp,
    SlowDown,
    None,
}

/// Diagnostic record of one cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginationAttempt {
    pub cycle: u32,
    pub count_before: usize,
    pub count_after: usize,
    pub response_time_ms: u64,
    pub success: bool,
    pub adjustment: Adjustment,
    pub scroll_px: i64,
    pub delay_ms: u64,
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaginationStats {
    pub cycles: u32,
    pub extensions_used: u32,
    pub cleanups_run: u32,
    pub final_scroll_px: i64,
    pub final_delay_ms: u64,
    pub elapsed_ms: u64,
    pub attempts: Vec<PaginationAttempt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaginationOutcome {
    /// Everything gathered, in first-seen order
    pub reviews: Vec<Review>,
    pub stopped_reason: StopReason,
    pub stats: PaginationStats,
    /// Last failure when the run stopped on errors
    pub error: Option<String>,
}

/// Rolling-window speed control
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    window: VecDeque<(u64, bool)>,
    window_size: usize,
    scroll_px: i64,
    delay_ms: u64,
    min_scroll_px: i64,
    max_scroll_px: i64,
    min_delay_ms: u64,
    max_delay_ms: u64,
    slow_response_ms: u64,
    fast_response_ms: u64,
}

impl AdaptiveController {
    pub fn new(config: &PaginationConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            window_size: config.window_size.max(1),
            scroll_px: config.initial_scroll_px,
            delay_ms: config.initial_delay_ms,
            min_scroll_px: config.min_scroll_px,
            max_scroll_px: config.max_scroll_px.max(config.min_scroll_px),
            min_delay_ms: config.min_delay_ms,
            max_delay_ms: config.max_delay_ms.max(config.min_delay_ms),
            slow_response_ms: config.slow_response_ms,
            fast_response_ms: config.fast_response_ms,
        }
    }

    pub const fn scroll_px(&self) -> i64 {
        self.scroll_px
    }

    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Record a cycle and apply the adjustment the window calls for
    pub fn record(&mut self, response_ms: u64, success: bool) -> Adjustment {
        self.window.push_back((response_ms, success));
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let len = self.window.len() as f64;
        let average_ms = self.window.iter().map(|(ms, _)| *ms as f64).sum::<f64>() / len;
        let success_rate = self.window.iter().filter(|(_, ok)| *ok).count() as f64 / len;

        if average_ms > self.slow_response_ms as f64 || success_rate < 0.4 {
            self.scroll_px = ((self.scroll_px as f64 * 0.75) as i64).clamp(self.min_scroll_px, self.max_scroll_px);
            self.delay_ms = ((self.delay_ms as f64 * 1.5) as u64).clamp(self.min_delay_ms, self.max_delay_ms);
            Adjustment::SlowDown
        } else if average_ms < self.fast_response_ms as f64 && success_rate >= 0.8 {
            self.scroll_px = ((self.scroll_px as f64 * 1.25) as i64).clamp(self.min_scroll_px, self.max_scroll_px);
            self.delay_ms = ((self.delay_ms as f64 * 0.75) as u64).clamp(self.min_delay_ms, self.max_delay_ms);
            Adjustment::SpeedUp
        } else {
            Adjustment::None
        }
    }
}

/// Reviews gathered so far; keeps first occurrences
#[derive(Debug, Default)]
struct Accumulator {
    reviews: Vec<Review>,
    seen: HashSet<String>,
}

impl Accumulator {
    fn merge(&mut self, batch: Vec<Review>) {
        for review in batch {
            if self.seen.insert(review.id.as_str().to_string()) {
                self.reviews.push(review);
            }
        }
    }

    fn len(&self) -> usize {
        self.reviews.len()
    }
}

enum Step<T> {
    Done(T),
    Failed(PageError),
    Expired,
}

async fn race<T>(deadline: TokioInstant, fut: impl Future<Output = Result<T, PageError>>) -> Step<T> {
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(Ok(value)) => Step::Done(value),
        Ok(Err(e)) => Step::Failed(e),
        Err(_) => Step::Expired,
    }
}

#[derive(Debug, Clone)]
pub struct PaginationEngine {
    config: PaginationConfig,
    monitor: Option<Arc<ResourceMonitor>>,
}

impl PaginationEngine {
    pub const fn new(config: PaginationConfig) -> Self {
        Self { config, monitor: None }
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Default options for a target, from configuration
    pub const fn options_for(&self, target_count: usize) -> PaginationOptions {
        PaginationOptions {
            target_count,
            max_attempts: self.config.max_attempts,
            timeout: self.config.pass_timeout(),
            scroll_strategy: ScrollStrategy::Auto,
        }
    }

    pub async fn paginate_for_target(
        &self,
        page: &dyn PageDriver,
        options: &PaginationOptions,
        extractor: &dyn ReviewExtraction,
    ) -> PaginationOutcome {
        let started = Instant::now();
        let mut deadline = TokioInstant::now() + options.timeout;
        let mut controller = AdaptiveController::new(&self.config);
        let mut collected = Accumulator::default();
        let mut stats = PaginationStats::default();
        let mut stagnant = 0u32;
        let mut consecutive_errors = 0u32;
        let mut last_error: Option<String> = None;

        match race(deadline, extractor.extract(page)).await {
            Step::Done(batch) => collected.merge(batch),
            Step::Failed(PageError::Closed) => {
                return Self::finish(collected, StopReason::Error, stats, controller, started, Some(PageError::Closed.to_string()));
            }
            Step::Failed(e) => {
                consecutive_errors += 1;
                last_error = Some(e.to_string());
            }
            Step::Expired => {}
        }

        let mode = self.resolve_mode(options.scroll_strategy, page, deadline).await;
        debug!(target = options.target_count, initial = collected.len(), ?mode, "📜 Pagination started");

        let stopped_reason = loop {
            if collected.len() >= options.target_count {
                break StopReason::TargetReached;
            }
            if stagnant >= self.config.stagnation_limit {
                break StopReason::Stagnation;
            }
            if stats.cycles >= options.max_attempts {
                break StopReason::NoMoreContent;
            }
            if TokioInstant::now() >= deadline {
                let completion = collected.len() as f64 / options.target_count.max(1) as f64;
                if completion >= self.config.progressive_threshold && stats.extensions_used < self.config.max_extensions {
                    deadline += self.config.extension();
                    stats.extensions_used += 1;
                    info!(
                        collected = collected.len(),
                        target = options.target_count,
                        "⏳ Extending pagination deadline ({}/{})",
                        stats.extensions_used,
                        self.config.max_extensions
                    );
                } else {
                    break StopReason::Timeout;
                }
            }
            if consecutive_errors >= self.config.stagnation_limit {
                break StopReason::Error;
            }

            stats.cycles += 1;
            let count_before = collected.len();
            let scroll_px = controller.scroll_px();
            let delay = controller.delay();
            let cycle_started = Instant::now();

            let mut failure = match race(deadline, self.run_cycle(page, mode, scroll_px)).await {
                Step::Done(_) => None,
                Step::Failed(e) => Some(e),
                Step::Expired => continue,
            };
            let action_ms = cycle_started.elapsed();

            if !delay.is_zero() {
                tokio::time::sleep_until((TokioInstant::now() + delay).min(deadline)).await;
            }

            let extraction_started = Instant::now();
            match race(deadline, extractor.extract(page)).await {
                Step::Done(batch) => collected.merge(batch),
                Step::Failed(e) => failure = Some(e),
                Step::Expired => {}
            }
            let response_time_ms = (action_ms + extraction_started.elapsed()).as_millis() as u64;

            if let Some(e) = failure {
                if e == PageError::Closed {
                    last_error = Some(e.to_string());
                    break StopReason::Error;
                }
                warn!("⚠️ Pagination cycle {} failed: {}", stats.cycles, e);
                consecutive_errors += 1;
                last_error = Some(e.to_string());
            } else {
                consecutive_errors = 0;
            }

            let grew = collected.len() > count_before;
            if grew {
                stagnant = 0;
            } else if consecutive_errors == 0 {
                stagnant += 1;
            }
            let adjustment = controller.record(response_time_ms, grew);
            let memory_bytes = self.monitor.as_ref().and_then(|m| m.check()).map(|s| s.bytes);

            stats.attempts.push(PaginationAttempt {
                cycle: stats.cycles,
                count_before,
                count_after: collected.len(),
                response_time_ms,
                success: grew,
                adjustment,
                scroll_px,
                delay_ms: delay.as_millis() as u64,
                memory_bytes,
            });

            if self.config.cleanup_every > 0 && stats.cycles % self.config.cleanup_every == 0 {
                match page.run_cleanup().await {
                    Ok(removed) => {
                        stats.cleanups_run += 1;
                        debug!("🧹 Page cleanup removed {} transient elements", removed);
                    }
                    Err(e) => debug!("Page cleanup failed: {}", e),
                }
            }
        };

        let error = (stopped_reason == StopReason::Error).then_some(last_error).flatten();
        Self::finish(collected, stopped_reason, stats, controller, started, error)
    }

    fn finish(
        collected: Accumulator,
        stopped_reason: StopReason,
        mut stats: PaginationStats,
        controller: AdaptiveController,
        started: Instant,
        error: Option<String>,
    ) -> PaginationOutcome {
        stats.final_scroll_px = controller.scroll_px();
        stats.final_delay_ms = controller.delay().as_millis() as u64;
        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            collected = collected.len(),
            cycles = stats.cycles,
            reason = %stopped_reason,
            "📜 Pagination finished"
        );
        PaginationOutcome {
            reviews: collected.reviews,
            stopped_reason,
            stats,
            error,
        }
    }

    /// `Auto` becomes hybrid when a load-more control exists, scroll-only otherwise
    async fn resolve_mode(&self, strategy: ScrollStrategy, page: &dyn PageDriver, deadline: TokioInstant) -> ScrollStrategy {
        if strategy != ScrollStrategy::Auto {
            return strategy;
        }
        match race(deadline, page.query_all(LOAD_MORE_CANDIDATES)).await {
            Step::Done(elements) if find_labelled(&elements, &LOAD_MORE_LABELS).is_some() => ScrollStrategy::Hybrid,
            _ => ScrollStrategy::ScrollOnly,
        }
    }

    async fn run_cycle(&self, page: &dyn PageDriver, mode: ScrollStrategy, scroll_px: i64) -> Result<bool, PageError> {
        match mode {
            ScrollStrategy::ScrollOnly | ScrollStrategy::Auto => self.scroll(page, scroll_px).await.map(|()| true),
            ScrollStrategy::ClickOnly => self.click_load_more(page).await,
            ScrollStrategy::Hybrid => {
                self.scroll(page, scroll_px).await?;
                self.click_load_more(page).await?;
                Ok(true)
            }
        }
    }

    /// Scroll the first present review container, or the document
    async fn scroll(&self, page: &dyn PageDriver, pixels: i64) -> Result<(), PageError> {
        for container in &self.config.scroll_containers {
            if page.count(container).await.unwrap_or(0) > 0 {
                return page.scroll_by(Some(container), pixels).await;
            }
        }
        page.scroll_by(None, pixels).await
    }

    async fn click_load_more(&self, page: &dyn PageDriver) -> Result<bool, PageError> {
        let candidates = page.query_all(LOAD_MORE_CANDIDATES).await?;
        match find_labelled(&candidates, &LOAD_MORE_LABELS) {
            Some(index) => page.click(LOAD_MORE_CANDIDATES, index).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::review_extractor::ReviewExtractor;
    use crate::application::selector_resolver::SelectorResolver;
    use crate::domain::language::LanguageDetectionResult;
    use crate::domain::review::SortOrder;
    use crate::infrastructure::page_driver::NavigateOptions;
    use crate::infrastructure::snapshot_page::{ClickEffect, ClickRule, PageEvent, SnapshotPage, SnapshotSite};
    use crate::test_utils::staged_listing;

    fn config() -> PaginationConfig {
        PaginationConfig {
            initial_delay_ms: 0,
            min_delay_ms: 0,
            max_delay_ms: 0,
            stagnation_limit: 3,
            ..PaginationConfig::default()
        }
    }

    fn options(target_count: usize) -> PaginationOptions {
        PaginationOptions {
            target_count,
            max_attempts: 20,
            timeout: Duration::from_secs(10),
            scroll_strategy: ScrollStrategy::Auto,
        }
    }

    fn extractor() -> ReviewExtractor {
        ReviewExtractor::new(
            SelectorResolver::new(),
            LanguageDetectionResult::new(Language::English, 0.9),
            "https://x",
            SortOrder::Recent,
        )
    }

    async fn page(stages: &[usize]) -> SnapshotPage {
        let page = SnapshotPage::new(Arc::new(SnapshotSite::new(staged_listing(stages))));
        page.navigate("https://x", &NavigateOptions::default()).await.unwrap();
        page
    }

    #[tokio::test]
    async fn test_target_reached_without_cycles() {
        let page = page(&[5]).await;
        let outcome = PaginationEngine::new(config())
            .paginate_for_target(&page, &options(3), &extractor())
            .await;
        assert_eq!(outcome.stopped_reason, StopReason::TargetReached);
        assert_eq!(outcome.stats.cycles, 0);
        assert_eq!(outcome.reviews.len(), 5);
    }

    #[tokio::test]
    async fn test_scrolling_grows_until_target() {
        let page = page(&[2, 4, 6, 8]).await;
        let outcome = PaginationEngine::new(config())
            .paginate_for_target(&page, &options(5), &extractor())
            .await;
        assert_eq!(outcome.stopped_reason, StopReason::TargetReached);
        assert_eq!(outcome.stats.cycles, 2);
        assert_eq!(outcome.reviews.len(), 6);
        assert!(outcome.stats.attempts.iter().all(|a| a.success));
    }

    #[tokio::test]
    async fn test_stagnation_stops_exactly_at_limit() {
        let page = page(&[2]).await;
        let outcome = PaginationEngine::new(config())
            .paginate_for_target(&page, &options(10), &extractor())
            .await;
        assert_eq!(outcome.stopped_reason, StopReason::Stagnation);
        assert_eq!(outcome.stats.cycles, 3);
        assert_eq!(outcome.reviews.len(), 2);
    }

    #[tokio::test]
    async fn test_attempt_budget_means_no_more_content() {
        let page = page(&[1, 2, 3, 4, 5, 6, 7]).await;
        let mut opts = options(100);
        opts.max_attempts = 3;
        let outcome = PaginationEngine::new(config())
            .paginate_for_target(&page, &opts, &extractor())
            .await;
        assert_eq!(outcome.stopped_reason, StopReason::NoMoreContent);
        assert_eq!(outcome.reviews.len(), 4);
    }

    #[tokio::test]
    async fn test_expired_deadline_keeps_partial_results() {
        let page = page(&[2, 4]).await;
        let mut opts = options(10);
        opts.timeout = Duration::ZERO;
        let outcome = PaginationEngine::new(config())
            .paginate_for_target(&page, &opts, &extractor())
            .await;
        assert_eq!(outcome.stopped_reason, StopReason::Timeout);
        assert_eq!(outcome.reviews.len(), 2);
    }

    #[tokio::test]
    async fn test_progressive_extension_near_completion() {
        let page = page(&[4, 5]).await;
        let mut opts = options(5);
        opts.timeout = Duration::ZERO;
        let engine = PaginationEngine::new(PaginationConfig {
            extension_ms: 5_000,
            max_extensions: 1,
            ..config()
        });
        let outcome = engine.paginate_for_target(&page, &opts, &extractor()).await;
        assert_eq!(outcome.stopped_reason, StopReason::TargetReached);
        assert_eq!(outcome.stats.extensions_used, 1);
    }

    #[tokio::test]
    async fn test_cleanup_runs_every_k_cycles() {
        let page = page(&[2]).await;
        let engine = PaginationEngine::new(PaginationConfig {
            stagnation_limit: 4,
            cleanup_every: 2,
            ..config()
        });
        let outcome = engine.paginate_for_target(&page, &options(10), &extractor()).await;
        assert_eq!(outcome.stats.cycles, 4);
        assert_eq!(page.cleanup_runs(), 2);
        assert_eq!(outcome.stats.cleanups_run, 2);
    }

    #[tokio::test]
    async fn test_repeated_errors_stop_with_error() {
        let page = page(&[2, 4]).await;
        page.fail_next_evaluations(100);
        let outcome = PaginationEngine::new(config())
            .paginate_for_target(&page, &options(10), &extractor())
            .await;
        assert_eq!(outcome.stopped_reason, StopReason::Error);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_click_only_uses_load_more() {
        let stages = staged_listing(&[2, 4]);
        let with_button: Vec<String> = stages
            .iter()
            .map(|s| s.replace("</body>", "<button aria-label=\"More reviews\">More reviews</button></body>"))
            .collect();
        let site = SnapshotSite::new(with_button)
            .scroll_advances_stage(false)
            .with_click_rule(ClickRule::new("button", ClickEffect::AdvanceStage).with_label("More reviews"));
        let page = SnapshotPage::new(Arc::new(site));
        page.navigate("https://x", &NavigateOptions::default()).await.unwrap();

        let mut opts = options(4);
        opts.scroll_strategy = ScrollStrategy::ClickOnly;
        let outcome = PaginationEngine::new(config())
            .paginate_for_target(&page, &opts, &extractor())
            .await;
        assert_eq!(outcome.stopped_reason, StopReason::TargetReached);
        assert!(page.events().iter().any(|e| matches!(e, PageEvent::Click { .. })));
        assert!(!page.events().iter().any(|e| matches!(e, PageEvent::Scroll(_))));
    }

    #[test]
    fn test_controller_slows_down_and_speeds_up_within_bounds() {
        let config = PaginationConfig::default();
        let mut controller = AdaptiveController::new(&config);
        for _ in 0..10 {
            assert_eq!(controller.record(5_000, false), Adjustment::SlowDown);
        }
        assert_eq!(controller.scroll_px(), config.min_scroll_px);
        assert_eq!(controller.delay(), Duration::from_millis(config.max_delay_ms));

        let mut controller = AdaptiveController::new(&config);
        for _ in 0..20 {
            controller.record(100, true);
        }
        assert_eq!(controller.scroll_px(), config.max_scroll_px);
        assert_eq!(controller.delay(), Duration::from_millis(config.min_delay_ms));
    }

    #[test]
    fn test_controller_holds_on_mixed_window() {
        let mut controller = AdaptiveController::new(&PaginationConfig::default());
        controller.record(1_500, true);
        assert_eq!(controller.record(1_500, true), Adjustment::None);
    }
}
