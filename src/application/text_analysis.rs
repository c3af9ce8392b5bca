//! Batched hand-off of reviews to the text analysis collaborator
//!
//! Batches go out in waves of at most `worker_width` concurrent requests.
//! A batch that keeps failing, or comes back misaligned, is classified
//! locally so every review ends up with exactly one result.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::analysis::{FakeReviewResult, SentimentResult};
use crate::domain::review::{Review, ReviewId};
use crate::infrastructure::config::AnalysisConfig;
use crate::infrastructure::retry_manager::retry_with_backoff;
use crate::infrastructure::text_analyzer::{AnalyzerError, HeuristicAnalyzer, TextAnalyzer};

/// Results of one analysis task, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRun<T> {
    pub results: Vec<T>,
    pub batches: usize,
    /// Reviews classified by the local heuristic instead of the collaborator
    pub fallback_count: usize,
}

struct BatchResult<T> {
    results: Vec<T>,
    fallback_count: usize,
}

pub struct AnalysisRunner {
    analyzer: Arc<dyn TextAnalyzer>,
    heuristic: HeuristicAnalyzer,
    config: AnalysisConfig,
}

impl std::fmt::Debug for AnalysisRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRunner")
            .field("analyzer", &self.analyzer.name())
            .field("batch_size", &self.config.batch_size)
            .field("worker_width", &self.config.worker_width)
            .finish()
    }
}

impl AnalysisRunner {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>, config: AnalysisConfig) -> Self {
        Self {
            analyzer,
            heuristic: HeuristicAnalyzer::new(),
            config,
        }
    }

    pub fn analyzer_name(&self) -> &'static str {
        self.analyzer.name()
    }

    pub async fn analyze_sentiment(&self, reviews: &[Review]) -> AnalysisRun<SentimentResult> {
        let run = self.in_waves(reviews, |batch| self.sentiment_batch(batch)).await;
        info!(
            analyzer = self.analyzer.name(),
            batches = run.batches,
            fallback = run.fallback_count,
            "💬 Sentiment analysis finished for {} reviews",
            run.results.len()
        );
        run
    }

    pub async fn detect_fake(&self, reviews: &[Review]) -> AnalysisRun<FakeReviewResult> {
        let run = self.in_waves(reviews, |batch| self.fake_batch(batch)).await;
        info!(
            analyzer = self.analyzer.name(),
            batches = run.batches,
            fallback = run.fallback_count,
            "🕵️ Fake review detection finished for {} reviews",
            run.results.len()
        );
        run
    }

    async fn in_waves<'a, T, Fut>(&self, reviews: &'a [Review], run: impl Fn(&'a [Review]) -> Fut) -> AnalysisRun<T>
    where
        Fut: Future<Output = BatchResult<T>>,
    {
        let batches: Vec<&'a [Review]> = reviews.chunks(self.config.batch_size.max(1)).collect();
        let mut outcome = AnalysisRun {
            results: Vec::with_capacity(reviews.len()),
            batches: batches.len(),
            fallback_count: 0,
        };

        for (wave_index, wave) in batches.chunks(self.config.worker_width.max(1)).enumerate() {
            if wave_index > 0 {
                let delay = self.config.inter_wave_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            debug!("🌊 Analysis wave {} with {} batches", wave_index + 1, wave.len());

            for batch in join_all(wave.iter().map(|batch| run(*batch))).await {
                outcome.fallback_count += batch.fallback_count;
                outcome.results.extend(batch.results);
            }
        }
        outcome
    }

    async fn sentiment_batch(&self, batch: &[Review]) -> BatchResult<SentimentResult> {
        let response = retry_with_backoff(
            &self.config.retry,
            "sentiment batch",
            AnalyzerError::is_retryable,
            |_| self.analyzer.analyze_sentiment(batch),
        )
        .await;

        let aligned = match response {
            Ok(aligned) if aligned.len() == batch.len() => aligned,
            Ok(aligned) => {
                warn!("⚠️ Sentiment response had {} entries for {} reviews", aligned.len(), batch.len());
                Vec::new()
            }
            Err(failure) => {
                warn!("⚠️ Sentiment batch falling back to heuristics: {}", failure);
                Vec::new()
            }
        };
        fill(batch, aligned, |r| &r.review_id, |review| self.heuristic.classify_sentiment(review))
    }

    async fn fake_batch(&self, batch: &[Review]) -> BatchResult<FakeReviewResult> {
        let response = retry_with_backoff(
            &self.config.retry,
            "fake detection batch",
            AnalyzerError::is_retryable,
            |_| self.analyzer.detect_fake(batch),
        )
        .await;

        let aligned = match response {
            Ok(aligned) if aligned.len() == batch.len() => aligned,
            Ok(aligned) => {
                warn!("⚠️ Fake detection response had {} entries for {} reviews", aligned.len(), batch.len());
                Vec::new()
            }
            Err(failure) => {
                warn!("⚠️ Fake detection batch falling back to heuristics: {}", failure);
                Vec::new()
            }
        };
        fill(batch, aligned, |r| &r.review_id, |review| self.heuristic.classify_fake(review))
    }
}

/// One result per review: the collaborator's when present and addressed to that review, else the heuristic's
fn fill<T>(
    batch: &[Review],
    aligned: Vec<Option<T>>,
    review_id: impl Fn(&T) -> &ReviewId,
    heuristic: impl Fn(&Review) -> T,
) -> BatchResult<T> {
    let mut aligned = aligned.into_iter();
    let mut fallback_count = 0;
    let results = batch
        .iter()
        .map(|review| match aligned.next().flatten() {
            Some(result) if review_id(&result) == &review.id => result,
            _ => {
                fallback_count += 1;
                heuristic(review)
            }
        })
        .collect();
    BatchResult { results, fallback_count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::review::SortOrder;
    use crate::infrastructure::retry_manager::RetryPolicy;
    use crate::test_utils::sample_reviews;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted collaborator
    #[derive(Default)]
    struct ScriptedAnalyzer {
        rate_limited_calls: AtomicU32,
        drop_last: bool,
        calls: AtomicU32,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl TextAnalyzer for ScriptedAnalyzer {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn analyze_sentiment(&self, batch: &[Review]) -> Result<Vec<Option<SentimentResult>>, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(batch.len());

            let limited = self
                .rate_limited_calls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if limited {
                return Err(AnalyzerError::RateLimited { retry_after: None });
            }

            let mut results: Vec<_> = batch
                .iter()
                .map(|review| {
                    Some(SentimentResult {
                        review_id: review.id.clone(),
                        sentiment: crate::domain::analysis::Sentiment::Neutral,
                        confidence: 0.99,
                        mismatch_detected: false,
                    })
                })
                .collect();
            if self.drop_last {
                if let Some(last) = results.last_mut() {
                    *last = None;
                }
            }
            Ok(results)
        }

        async fn detect_fake(&self, _batch: &[Review]) -> Result<Vec<Option<FakeReviewResult>>, AnalyzerError> {
            Err(AnalyzerError::Unavailable("scripted".into()))
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            batch_size: 4,
            worker_width: 2,
            inter_wave_delay_ms: 0,
            retry: RetryPolicy::immediate(3),
            ..AnalysisConfig::default()
        }
    }

    #[tokio::test]
    async fn test_waves_are_bounded_and_cover_every_review() {
        let analyzer = Arc::new(ScriptedAnalyzer::default());
        let runner = AnalysisRunner::new(analyzer.clone(), config());
        let reviews = sample_reviews(18, SortOrder::Recent);

        let run = runner.analyze_sentiment(&reviews).await;

        assert_eq!(run.batches, 5);
        assert_eq!(run.fallback_count, 0);
        assert_eq!(run.results.len(), 18);
        for (review, result) in reviews.iter().zip(&run.results) {
            assert_eq!(review.id, result.review_id);
            assert!((result.confidence - 0.99).abs() < f64::EPSILON);
        }
        assert!(analyzer.peak_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(analyzer.batch_sizes.lock().unwrap().iter().sum::<usize>(), 18);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let analyzer = Arc::new(ScriptedAnalyzer {
            rate_limited_calls: AtomicU32::new(2),
            ..ScriptedAnalyzer::default()
        });
        let runner = AnalysisRunner::new(analyzer.clone(), AnalysisConfig { worker_width: 1, ..config() });

        let run = runner.analyze_sentiment(&sample_reviews(4, SortOrder::Recent)).await;
        assert_eq!(run.fallback_count, 0);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_entries_and_failures_fall_back() {
        let analyzer = Arc::new(ScriptedAnalyzer {
            drop_last: true,
            ..ScriptedAnalyzer::default()
        });
        let runner = AnalysisRunner::new(analyzer, config());
        let reviews = sample_reviews(8, SortOrder::Recent);

        let sentiment = runner.analyze_sentiment(&reviews).await;
        assert_eq!(sentiment.results.len(), 8);
        assert_eq!(sentiment.fallback_count, 2);

        let fake = runner.detect_fake(&reviews).await;
        assert_eq!(fake.results.len(), 8);
        assert_eq!(fake.fallback_count, 8);
        assert!(fake.results.iter().zip(&reviews).all(|(r, review)| r.review_id == review.id));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let runner = AnalysisRunner::new(Arc::new(HeuristicAnalyzer::new()), config());
        let run = runner.analyze_sentiment(&[]).await;
        assert!(run.results.is_empty());
        assert_eq!(run.batches, 0);
    }
}
