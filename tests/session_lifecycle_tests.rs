//! End-to-end session lifecycle against snapshot pages

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::StreamExt;

use review_sentinel_lib::application::{OrchestratorError, SessionOrchestrator};
use review_sentinel_lib::domain::{AnalysisPhase, ErrorCategory, SessionStatus, SortOrder};
use review_sentinel_lib::infrastructure::config::AppConfig;
use review_sentinel_lib::infrastructure::{HeuristicAnalyzer, SnapshotPageFactory, SnapshotSite};
use review_sentinel_lib::test_utils::{PLACE_URL, fast_config, listing_page, sortable_site};

const WAIT: Duration = Duration::from_secs(30);

fn orchestrator_with(config: AppConfig, factory: SnapshotPageFactory) -> SessionOrchestrator {
    SessionOrchestrator::new(config, Arc::new(factory), Arc::new(HeuristicAnalyzer::new()))
}

fn orchestrator() -> SessionOrchestrator {
    orchestrator_with(fast_config(), SnapshotPageFactory::new(sortable_site(4, 4)))
}

fn phase_rank(phase: AnalysisPhase) -> usize {
    match phase {
        AnalysisPhase::Pending => 0,
        AnalysisPhase::Complete => 6,
        AnalysisPhase::Error => 7,
        work => AnalysisPhase::WORK_PHASES.iter().position(|p| *p == work).map_or(0, |i| i + 1),
    }
}

#[tokio::test]
async fn session_runs_every_phase_in_order() {
    let orchestrator = orchestrator();
    let id = orchestrator.start_analysis(PLACE_URL).await;
    let events: Vec<_> = orchestrator
        .progress_stream(&id)
        .take_while(|event| !event.phase.is_terminal())
        .collect()
        .await;

    let ranks: Vec<usize> = events.iter().map(|e| phase_rank(e.phase)).collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "phases went backwards: {ranks:?}");
    for phase in AnalysisPhase::WORK_PHASES.iter().skip(1) {
        assert!(events.iter().any(|e| e.phase == *phase), "no progress for {phase}");
    }
    assert!(events.iter().all(|e| e.percent <= 100));

    let status = orchestrator.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(status.status, SessionStatus::Complete);
    let report = status.results.expect("complete session carries a report");
    assert!(!report.sampling_used);
    assert!((0.0..=1.0).contains(&report.trust_score));
    assert_eq!(report.total_collected, report.analyzed);
    assert_eq!(status.per_order_counts.len(), 3);
    assert!(status.per_order_counts.values().sum::<usize>() >= report.total_collected);
}

#[tokio::test]
async fn invalid_url_is_a_validation_error() {
    let orchestrator = orchestrator();
    let id = orchestrator.start_analysis("maps example com/place").await;

    let status = orchestrator.get_status(&id).await.unwrap();
    assert_eq!(status.phase, AnalysisPhase::Error);
    let error = status.error.unwrap();
    assert_eq!(error.category, ErrorCategory::Validation);
    assert!(!error.retryable);
    assert_eq!(error.phase, AnalysisPhase::Pending);
    assert!(status.per_order_counts.is_empty());
    assert!(orchestrator.diagnostics().is_empty());
}

#[tokio::test]
async fn disallowed_host_is_rejected() {
    let mut config = fast_config();
    config.collection.allowed_hosts = vec!["reviews.example.net".to_string()];
    let orchestrator = orchestrator_with(config, SnapshotPageFactory::new(sortable_site(4, 2)));

    let id = orchestrator.start_analysis(PLACE_URL).await;
    let status = orchestrator.get_status(&id).await.unwrap();
    assert_eq!(status.error.unwrap().category, ErrorCategory::Validation);
}

#[tokio::test]
async fn launch_failure_is_retryable_and_retry_completes() {
    // both attempts of the first run fail, the retry gets a page
    let factory = SnapshotPageFactory::new(sortable_site(4, 3)).failing_launches(2);
    let orchestrator = orchestrator_with(fast_config(), factory);
    let id = orchestrator.start_analysis(PLACE_URL).await;

    let failed = orchestrator.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(failed.status, SessionStatus::Error);
    let error = failed.error.clone().unwrap();
    assert_eq!(error.category, ErrorCategory::BrowserLaunch);
    assert_eq!(error.phase, AnalysisPhase::Scraping);
    assert!(failed.can_retry);
    assert!(!error.user_message.contains("injected"));

    let resumed = orchestrator.retry(&id).await.unwrap();
    assert_eq!(resumed, AnalysisPhase::Scraping);

    let status = orchestrator.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(status.status, SessionStatus::Complete, "{:?}", status.error);
    assert_eq!(status.retry_count, 1);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn retry_is_refused_for_complete_sessions() {
    let orchestrator = orchestrator();
    let id = orchestrator.start_analysis(PLACE_URL).await;
    orchestrator.wait_for_terminal(&id, WAIT).await.unwrap();

    let refused = orchestrator.retry(&id).await;
    assert!(matches!(refused, Err(OrchestratorError::NotRetryable { .. })));
}

#[tokio::test]
async fn listing_without_reviews_fails_with_no_reviews() {
    let site = SnapshotSite::single(listing_page("en", &[]));
    let orchestrator = orchestrator_with(fast_config(), SnapshotPageFactory::new(site));
    let id = orchestrator.start_analysis(PLACE_URL).await;

    let status = orchestrator.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(status.status, SessionStatus::Error);
    let error = status.error.unwrap();
    assert_eq!(error.category, ErrorCategory::NoReviews);
    assert!(!status.can_retry);
    assert!(!orchestrator.diagnostics().entries_for(PLACE_URL).is_empty());
}

#[tokio::test]
async fn concurrent_sessions_stay_isolated() {
    let orchestrator = orchestrator();
    let first = orchestrator.start_analysis(PLACE_URL).await;
    let second = orchestrator.start_analysis(PLACE_URL).await;
    assert_ne!(first, second);

    let (a, b) = tokio::join!(
        orchestrator.wait_for_terminal(&first, WAIT),
        orchestrator.wait_for_terminal(&second, WAIT)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.status, SessionStatus::Complete);
    assert_eq!(b.status, SessionStatus::Complete);
    assert_eq!(a.per_order_counts, b.per_order_counts);

    let stats = orchestrator.stats().await;
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.complete, 2);
}

#[tokio::test]
async fn cleanup_and_sweep_forget_sessions() {
    let mut config = fast_config();
    config.orchestrator.retention_hours = 0;
    let orchestrator = orchestrator_with(config, SnapshotPageFactory::new(sortable_site(4, 2)));

    let kept = orchestrator.start_analysis(PLACE_URL).await;
    let removed = orchestrator.start_analysis(PLACE_URL).await;
    assert!(orchestrator.cleanup(&removed).await);
    assert!(matches!(
        orchestrator.get_status(&removed).await,
        Err(OrchestratorError::SessionNotFound(_))
    ));

    orchestrator.wait_for_terminal(&kept, WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let swept = orchestrator.sweep_idle_sessions().await;
    assert_eq!(swept, vec![kept]);
    assert_eq!(orchestrator.stats().await.total_sessions, 0);
}

#[tokio::test]
async fn expired_deadline_keeps_partial_corpus_and_completes() {
    let mut config = fast_config();
    config.collection.session_timeout_secs = 1;
    config.collection.target_total = 300;
    config.pagination.max_extensions = 0;
    let site = sortable_site(4, 40).with_latency(Duration::from_millis(50));
    let orchestrator = orchestrator_with(config, SnapshotPageFactory::new(site));
    let id = orchestrator.start_analysis(PLACE_URL).await;

    let status = orchestrator.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(status.status, SessionStatus::Complete, "{:?}", status.error);
    let report = status.results.unwrap();
    assert!(report.total_collected > 0);
    assert!(report.total_collected < 300);
    assert!(status.per_order_counts.get(&SortOrder::Recent).copied().unwrap_or(0) > 0);
    assert_eq!(status.per_order_counts.get(&SortOrder::Highest).copied().unwrap_or(0), 0);
}

#[tokio::test]
async fn expired_deadline_without_reviews_fails_within_one_timeout() {
    let mut config = fast_config();
    config.collection.session_timeout_secs = 1;
    let site = SnapshotSite::single(listing_page("en", &[])).with_latency(Duration::from_secs(5));
    let orchestrator = orchestrator_with(config, SnapshotPageFactory::new(site));

    let started = Instant::now();
    let id = orchestrator.start_analysis(PLACE_URL).await;
    let status = orchestrator.wait_for_terminal(&id, WAIT).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(status.status, SessionStatus::Error);
    let error = status.error.unwrap();
    assert_eq!(error.category, ErrorCategory::Timeout);
    assert_eq!(error.phase, AnalysisPhase::Scraping);
    assert!(status.can_retry);
    // a second attempt with a fresh deadline would take about twice as long
    assert!(elapsed < Duration::from_millis(1_800), "took {elapsed:?}");
}
