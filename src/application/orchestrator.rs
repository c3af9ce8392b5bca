//! Session orchestrator: the phase state machine behind every analysis
//!
//! The orchestrator owns the session table and the progress channel. Each
//! session runs on its own task, strictly sequentially:
//!
//! `pending → scraping → sampling → sentiment → fake-detection → verdict → complete`
//!
//! Every phase runs inside the configured retry policy. When the policy is
//! exhausted the failure is classified and the session moves to `error`,
//! from where `retry` re-enters the failed phase.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::collection::{CollectionEngine, PreparedPage, SortPassResult};
use crate::application::deduplication::ReviewDeduplicator;
use crate::application::language_detector::LanguageDetector;
use crate::application::sampling::SamplingEngine;
use crate::application::text_analysis::AnalysisRunner;
use crate::application::verdict::build_report;
use crate::domain::analysis::AnalysisReport;
use crate::domain::collection::StopReason;
use crate::domain::errors::{AnalysisError, ErrorCategory};
use crate::domain::events::{AnalysisPhase, ProgressEvent, ProgressSnapshot, SessionStatus};
use crate::domain::review::SortOrder;
use crate::domain::session_manager::{CollectionSession, SessionError, SessionManager, SessionStats};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::diagnostics::{DiagnosticPriority, DiagnosticStore};
use crate::infrastructure::page_driver::PageFactory;
use crate::infrastructure::resource_monitor::{MemoryProbe, ProcMemoryProbe, ResourceMonitor};
use crate::infrastructure::retry_manager::retry_with_backoff;
use crate::infrastructure::text_analyzer::TextAnalyzer;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {session_id} cannot be retried: {reason}")]
    NotRetryable { session_id: String, reason: String },

    #[error("Timed out waiting for session {0}")]
    WaitTimeout(String),

    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for OrchestratorError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::NotFound(id) => Self::SessionNotFound(id),
            other => Self::Session(other),
        }
    }
}

/// What a caller sees when polling a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatusView {
    pub session_id: String,
    pub url: String,
    pub status: SessionStatus,
    pub phase: AnalysisPhase,
    pub progress: ProgressSnapshot,
    pub per_order_counts: BTreeMap<SortOrder, usize>,
    pub duplicates_removed: usize,
    pub collection_time_ms: u64,
    pub retry_count: u32,
    pub can_retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AnalysisError>,
}

impl From<&CollectionSession> for SessionStatusView {
    fn from(session: &CollectionSession) -> Self {
        Self {
            session_id: session.id.clone(),
            url: session.url.clone(),
            status: session.status(),
            phase: session.phase,
            progress: session.progress.clone(),
            per_order_counts: session.per_order_counts(),
            duplicates_removed: session.duplicates_removed(),
            collection_time_ms: session.collection_time_ms(),
            retry_count: session.retry_count,
            can_retry: session.can_retry(),
            results: session.report.clone(),
            error: session.error.clone(),
        }
    }
}

/// Failure of one phase attempt
#[derive(Debug, Clone)]
struct PhaseError {
    category: ErrorCategory,
    message: String,
}

impl PhaseError {
    fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    fn missing(artifact: &str) -> Self {
        Self::new(ErrorCategory::Scraping, format!("{artifact} is missing"))
    }

    /// Timeouts are not retried once the run's deadline has passed
    fn is_retryable_before(&self, deadline: TokioInstant) -> bool {
        self.category.is_retryable() && !(self.category == ErrorCategory::Timeout && TokioInstant::now() >= deadline)
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

/// Accept only absolute http(s) URLs, optionally restricted to host suffixes
pub fn validate_url(raw: &str, allowed_hosts: &[String]) -> Result<url::Url, String> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| format!("invalid url '{raw}': {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("invalid url '{raw}': unsupported scheme {}", parsed.scheme()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| format!("invalid url '{raw}': missing host"))?
        .to_lowercase();
    if !allowed_hosts.is_empty()
        && !allowed_hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
    {
        return Err(format!("unsupported host {host}"));
    }
    Ok(parsed)
}

/// Earliest phase at or before `failed` whose input is missing
fn resume_phase(session: &CollectionSession, failed: AnalysisPhase) -> AnalysisPhase {
    let reached = |phase: AnalysisPhase| {
        let position = |p| AnalysisPhase::WORK_PHASES.iter().position(|w| *w == p);
        position(failed) > position(phase)
    };
    if session.corpus.is_none() || failed == AnalysisPhase::Scraping {
        AnalysisPhase::Scraping
    } else if reached(AnalysisPhase::Sampling) && session.sample.is_none() {
        AnalysisPhase::Sampling
    } else if reached(AnalysisPhase::Sentiment) && session.sentiment.is_none() {
        AnalysisPhase::Sentiment
    } else if reached(AnalysisPhase::FakeDetection) && session.fake_detection.is_none() {
        AnalysisPhase::FakeDetection
    } else {
        failed
    }
}

struct OrchestratorInner {
    config: AppConfig,
    sessions: SessionManager,
    collection: CollectionEngine,
    sampler: SamplingEngine,
    analysis: AnalysisRunner,
    diagnostics: Arc<DiagnosticStore>,
    monitor: Arc<ResourceMonitor>,
    events: broadcast::Sender<ProgressEvent>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Cheap to clone; clones share the session table and the progress channel
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("sessions", &self.inner.sessions)
            .field("analyzer", &self.inner.analysis.analyzer_name())
            .finish_non_exhaustive()
    }
}

impl SessionOrchestrator {
    pub fn new(config: AppConfig, page_factory: Arc<dyn PageFactory>, analyzer: Arc<dyn TextAnalyzer>) -> Self {
        Self::with_memory_probe(config, page_factory, analyzer, Arc::new(ProcMemoryProbe))
    }

    pub fn with_memory_probe(
        config: AppConfig,
        page_factory: Arc<dyn PageFactory>,
        analyzer: Arc<dyn TextAnalyzer>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let diagnostics = Arc::new(DiagnosticStore::new(config.diagnostics.clone()));
        let monitor = Arc::new(ResourceMonitor::new(config.resources.clone(), probe));
        {
            let diagnostics = Arc::clone(&diagnostics);
            let keep = config.diagnostics.max_entries / 2;
            monitor.register_cleanup("diagnostics", Box::new(move || diagnostics.trim_to(keep)));
        }

        let detector = Arc::new(LanguageDetector::new(&config.detection));
        let deduplicator = Arc::new(ReviewDeduplicator::new(config.deduplication.clone()));
        let collection =
            CollectionEngine::new(&config, page_factory, detector, deduplicator).with_monitor(Arc::clone(&monitor));
        let (events, _) = broadcast::channel(config.orchestrator.event_buffer);

        Self {
            inner: Arc::new(OrchestratorInner {
                sampler: SamplingEngine::new(config.sampling.clone()),
                analysis: AnalysisRunner::new(analyzer, config.analysis.clone()),
                sessions: SessionManager::new(),
                collection,
                diagnostics,
                monitor,
                events,
                tasks: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticStore {
        &self.inner.diagnostics
    }

    pub fn resource_monitor(&self) -> Arc<ResourceMonitor> {
        Arc::clone(&self.inner.monitor)
    }

    pub async fn stats(&self) -> SessionStats {
        self.inner.sessions.stats().await
    }

    /// Raw progress events of every session
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    /// Progress events of one session; lagged events are skipped
    pub fn progress_stream(&self, session_id: &str) -> impl Stream<Item = ProgressEvent> + use<> {
        let session_id = session_id.to_string();
        BroadcastStream::new(self.subscribe()).filter_map(move |event| match event {
            Ok(event) if event.session_id == session_id => Some(event),
            Ok(_) => None,
            Err(lagged) => {
                debug!("Progress subscriber lagged: {}", lagged);
                None
            }
        })
    }

    /// Register a session for `url` and start it in the background.
    ///
    /// A URL that fails validation still gets a session id; that session is
    /// already in `error` with a non-retryable validation error.
    pub async fn start_analysis(&self, url: &str) -> String {
        let config = &self.inner.config.collection;
        let targets = config.per_order_targets();
        let timeout_ms = u64::try_from(config.session_timeout().as_millis()).unwrap_or(u64::MAX);
        let session = CollectionSession::new(url, targets, timeout_ms, config.max_session_retries);
        let session_id = self.inner.sessions.insert(session).await;

        if let Err(reason) = validate_url(url, &config.allowed_hosts) {
            warn!("🚫 Rejected analysis request for {}: {}", url, reason);
            let error = AnalysisError::validation(reason);
            let message = error.user_message.clone();
            let recorded = self
                .inner
                .sessions
                .update(&session_id, |session| {
                    session.error = Some(error);
                    session.failed_phase = Some(AnalysisPhase::Pending);
                })
                .await;
            if let Err(e) = recorded {
                warn!("Could not record validation error on session {}: {}", session_id, e);
            }
            if self.inner.sessions.transition(&session_id, AnalysisPhase::Error).await.is_ok() {
                self.emit(&session_id, AnalysisPhase::Error, 100, message).await;
            }
            return session_id;
        }

        info!("🚀 Starting analysis session {} for {}", session_id, url);
        if let Err(e) = self.inner.sessions.transition(&session_id, AnalysisPhase::Scraping).await {
            error!("Failed to start session {}: {}", session_id, e);
            return session_id;
        }
        self.emit(&session_id, AnalysisPhase::Scraping, 0, "Opening page").await;
        self.spawn_run(&session_id, AnalysisPhase::Scraping);
        session_id
    }

    pub async fn get_status(&self, session_id: &str) -> Result<SessionStatusView, OrchestratorError> {
        self.inner
            .sessions
            .get(session_id)
            .await
            .map(|session| SessionStatusView::from(&session))
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))
    }

    /// Re-enter a failed session at the phase that failed, re-deriving missing artifacts first
    pub async fn retry(&self, session_id: &str) -> Result<AnalysisPhase, OrchestratorError> {
        let cache = self.inner.config.orchestrator.cache_intermediate_results;
        let resume = self
            .inner
            .sessions
            .update(session_id, |session| {
                if !session.can_retry() {
                    let reason = match &session.error {
                        _ if session.phase != AnalysisPhase::Error => format!("session is {}", session.phase),
                        Some(error) if !error.retryable => format!("{} errors are not retryable", error.category),
                        _ => format!("retry limit of {} reached", session.max_retries),
                    };
                    return Err(reason);
                }
                if !cache {
                    session.sample = None;
                    session.sentiment = None;
                    session.fake_detection = None;
                }
                let failed = session.failed_phase.unwrap_or(AnalysisPhase::Scraping);
                session.retry_count += 1;
                session.error = None;
                session.failed_phase = None;
                Ok(resume_phase(session, failed))
            })
            .await?
            .map_err(|reason| OrchestratorError::NotRetryable {
                session_id: session_id.to_string(),
                reason,
            })?;

        self.inner.sessions.transition(session_id, resume).await?;
        info!("🔁 Retrying session {} from {}", session_id, resume);
        self.emit(session_id, resume, 0, format!("Retrying from {resume}")).await;
        self.spawn_run(session_id, resume);
        Ok(resume)
    }

    /// Stop a running session and forget it
    pub async fn cleanup(&self, session_id: &str) -> bool {
        let handle = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if let Some(handle) = handle {
            handle.abort();
        }
        self.inner.sessions.remove(session_id).await.is_some()
    }

    /// Evict sessions idle past the retention window
    pub async fn sweep_idle_sessions(&self) -> Vec<String> {
        let evicted = self
            .inner
            .sessions
            .sweep_idle(self.inner.config.orchestrator.retention())
            .await;
        if !evicted.is_empty() {
            let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            for id in &evicted {
                if let Some(handle) = tasks.remove(id) {
                    handle.abort();
                }
            }
        }
        let purged = self.inner.diagnostics.purge_expired();
        if purged > 0 {
            debug!("🧹 Purged {} expired diagnostic entries", purged);
        }
        evicted
    }

    /// Periodic sweep plus the memory monitor, both stopped by `token`
    pub fn spawn_maintenance(&self, token: CancellationToken) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let monitor = Arc::clone(&self.inner.monitor).spawn(token.child_token());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(orchestrator.inner.config.orchestrator.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        orchestrator.sweep_idle_sessions().await;
                    }
                }
            }
            let _ = monitor.await;
            info!("🛑 Session maintenance stopped");
        })
    }

    /// Wait until the session is `complete` or `error`
    pub async fn wait_for_terminal(&self, session_id: &str, timeout: Duration) -> Result<SessionStatusView, OrchestratorError> {
        let mut events = self.subscribe();
        let wait = async {
            loop {
                let status: SessionStatusView = self.get_status(session_id).await?;
                if status.phase.is_terminal() {
                    return Ok::<_, OrchestratorError>(status);
                }
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return self.get_status(session_id).await,
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| OrchestratorError::WaitTimeout(session_id.to_string()))?
    }

    fn spawn_run(&self, session_id: &str, from: AnalysisPhase) {
        let orchestrator = self.clone();
        let id = session_id.to_string();
        let handle = tokio::spawn(async move { orchestrator.run_session(id, from).await });

        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(session_id.to_string(), handle);
    }

    async fn run_session(&self, session_id: String, from: AnalysisPhase) {
        let Some(timeout_ms) = self.inner.sessions.get(&session_id).await.map(|s| s.session_timeout_ms) else {
            debug!("Session {} vanished before it started", session_id);
            return;
        };
        // one scraping deadline per run, shared by every attempt of the phase
        let deadline = TokioInstant::now() + Duration::from_millis(timeout_ms);
        let mut phase = from;
        loop {
            let policy = &self.inner.config.orchestrator.phase_retry;
            let outcome = retry_with_backoff(
                policy,
                phase.as_str(),
                |e: &PhaseError| e.is_retryable_before(deadline),
                |_| self.run_phase(&session_id, phase, deadline),
            )
            .await;

            if let Err(failure) = outcome {
                self.fail(&session_id, phase, failure.into_inner()).await;
                return;
            }

            let Some(next) = phase.next() else { return };
            if let Err(e) = self.inner.sessions.transition(&session_id, next).await {
                warn!("Session {} stopped before {}: {}", session_id, next, e);
                return;
            }
            if next == AnalysisPhase::Complete {
                info!("🎉 Session {} complete", session_id);
                self.emit(&session_id, next, 100, "Analysis complete").await;
                return;
            }
            self.emit(&session_id, next, 0, format!("Starting {next}")).await;
            phase = next;
        }
    }

    async fn run_phase(&self, session_id: &str, phase: AnalysisPhase, deadline: TokioInstant) -> Result<(), PhaseError> {
        match phase {
            AnalysisPhase::Scraping => self.scrape(session_id, deadline).await,
            AnalysisPhase::Sampling => self.sample(session_id).await,
            AnalysisPhase::Sentiment => self.analyze_sentiment(session_id).await,
            AnalysisPhase::FakeDetection => self.detect_fake(session_id).await,
            AnalysisPhase::Verdict => self.score(session_id).await,
            AnalysisPhase::Pending | AnalysisPhase::Complete | AnalysisPhase::Error => Ok(()),
        }
    }

    async fn session(&self, session_id: &str) -> Result<CollectionSession, PhaseError> {
        self.inner
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| PhaseError::new(ErrorCategory::Validation, format!("session {session_id} disappeared")))
    }

    async fn store(&self, session_id: &str, apply: impl FnOnce(&mut CollectionSession)) -> Result<(), PhaseError> {
        self.inner
            .sessions
            .update(session_id, apply)
            .await
            .map_err(|e| PhaseError::new(ErrorCategory::Validation, e.to_string()))
    }

    async fn scrape(&self, session_id: &str, deadline: TokioInstant) -> Result<(), PhaseError> {
        let session = self.session(session_id).await?;
        if TokioInstant::now() >= deadline {
            return Err(PhaseError::new(
                ErrorCategory::Timeout,
                "session deadline expired before the scraping attempt started",
            ));
        }
        let started = Instant::now();
        let collection = &self.inner.collection;

        let prepared = collection
            .prepare(&session.url, deadline)
            .await
            .map_err(|e| PhaseError::new(e.category(), e.to_string()))?;
        let language = prepared.detection.language;
        self.emit(session_id, AnalysisPhase::Scraping, 5, format!("Detected interface language: {language}"))
            .await;

        // the page is closed whether or not every pass could be stored
        let collected = self.collect_passes(session_id, &session, &prepared, deadline, started).await;
        prepared.close().await;
        let passes = collected?;

        let corpus = collection.assemble(&prepared, passes, started);
        let hit_timeout = corpus.hit_timeout();
        let empty = corpus.is_empty();
        info!(
            session = %session_id,
            unique = corpus.total_unique(),
            duplicates = corpus.duplicates_removed,
            elapsed_ms = corpus.collection_time_ms,
            "📦 Collection finished"
        );
        self.store(session_id, |s| s.corpus = Some(corpus)).await?;

        match (empty, hit_timeout) {
            (true, true) => Err(PhaseError::new(
                ErrorCategory::Timeout,
                "session deadline expired before any review was collected",
            )),
            (true, false) => Err(PhaseError::new(
                ErrorCategory::NoReviews,
                format!("no reviews could be extracted from {}", session.url),
            )),
            _ => Ok(()),
        }
    }

    async fn collect_passes(
        &self,
        session_id: &str,
        session: &CollectionSession,
        prepared: &PreparedPage,
        deadline: TokioInstant,
        started: Instant,
    ) -> Result<Vec<SortPassResult>, PhaseError> {
        let collection = &self.inner.collection;
        let total = session.targets.len().max(1);
        let mut passes: Vec<SortPassResult> = Vec::with_capacity(total);
        for (index, (sort, target)) in session.targets.iter().enumerate() {
            let percent = u8::try_from(10 + index * 85 / total).unwrap_or(95);
            self.emit(session_id, AnalysisPhase::Scraping, percent, format!("Collecting {sort} reviews"))
                .await;

            let pass = collection.collect_order(prepared, *sort, *target, deadline).await;
            self.record_pass(&session.url, &pass);
            passes.push(pass);

            // partial corpus stays on the session even if a later pass fails
            let partial = collection.assemble(prepared, passes.clone(), started);
            self.store(session_id, |s| s.corpus = Some(partial)).await?;

            if passes.last().is_some_and(|p| p.summary.stopped_reason == StopReason::Timeout) {
                warn!("⏰ Session {} ran out of time during the {} pass", session_id, sort);
                break;
            }
        }
        Ok(passes)
    }

    fn record_pass(&self, url: &str, pass: &SortPassResult) {
        let priority = match pass.summary.stopped_reason {
            StopReason::Error => DiagnosticPriority::High,
            StopReason::Timeout | StopReason::NoMoreContent => DiagnosticPriority::Medium,
            StopReason::TargetReached | StopReason::Stagnation => DiagnosticPriority::Low,
        };
        let payload = json!({
            "kind": "sort-pass",
            "summary": pass.summary,
            "error": pass.error,
        });
        if let Err(e) = self.inner.diagnostics.insert(url, priority, payload) {
            debug!("Diagnostic entry dropped: {}", e);
        }
    }

    async fn sample(&self, session_id: &str) -> Result<(), PhaseError> {
        let session = self.session(session_id).await?;
        let corpus = session.corpus.ok_or_else(|| PhaseError::missing("collected corpus"))?;
        let sample = self.inner.sampler.sample_reviews(&corpus.merged);
        let message = if sample.sampling_used {
            format!("Sampled {} of {} reviews", sample.reviews.len(), sample.total_available)
        } else {
            format!("Analyzing all {} reviews", sample.reviews.len())
        };
        self.store(session_id, |s| s.sample = Some(sample)).await?;
        self.emit(session_id, AnalysisPhase::Sampling, 100, message).await;
        Ok(())
    }

    async fn analyze_sentiment(&self, session_id: &str) -> Result<(), PhaseError> {
        let session = self.session(session_id).await?;
        let sample = session.sample.ok_or_else(|| PhaseError::missing("review sample"))?;
        let run = self.inner.analysis.analyze_sentiment(&sample.reviews).await;
        let message = format!("Classified sentiment of {} reviews", run.results.len());
        self.store(session_id, |s| s.sentiment = Some(run.results)).await?;
        self.emit(session_id, AnalysisPhase::Sentiment, 100, message).await;
        Ok(())
    }

    async fn detect_fake(&self, session_id: &str) -> Result<(), PhaseError> {
        let session = self.session(session_id).await?;
        let sample = session.sample.ok_or_else(|| PhaseError::missing("review sample"))?;
        let run = self.inner.analysis.detect_fake(&sample.reviews).await;
        let message = format!("Checked {} reviews for authenticity", run.results.len());
        self.store(session_id, |s| s.fake_detection = Some(run.results)).await?;
        self.emit(session_id, AnalysisPhase::FakeDetection, 100, message).await;
        Ok(())
    }

    async fn score(&self, session_id: &str) -> Result<(), PhaseError> {
        let session = self.session(session_id).await?;
        let corpus = session.corpus.ok_or_else(|| PhaseError::missing("collected corpus"))?;
        let sample = session.sample.ok_or_else(|| PhaseError::missing("review sample"))?;
        let sentiment = session.sentiment.ok_or_else(|| PhaseError::missing("sentiment results"))?;
        let fake = session.fake_detection.ok_or_else(|| PhaseError::missing("fake detection results"))?;

        let report = build_report(&session.url, corpus.total_unique(), &sample, sentiment, fake);
        info!(
            session = %session_id,
            trust_score = report.trust_score,
            verdict = %report.verdict,
            "⚖️ Verdict ready"
        );
        self.store(session_id, |s| s.report = Some(report)).await?;
        Ok(())
    }

    async fn fail(&self, session_id: &str, phase: AnalysisPhase, failure: PhaseError) {
        let elapsed_ms = self
            .inner
            .sessions
            .get(session_id)
            .await
            .map_or(0, |s| s.elapsed_ms());
        let error = AnalysisError::new(failure.category, failure.message, phase, elapsed_ms);
        error!(
            session = %session_id,
            category = %error.category,
            retryable = error.retryable,
            "❌ Session failed during {}: {}", phase, error.message
        );

        let url = self.inner.sessions.get(session_id).await.map(|s| s.url).unwrap_or_default();
        let payload = json!({ "kind": "session-error", "session_id": session_id, "error": error });
        if let Err(e) = self.inner.diagnostics.insert(&url, DiagnosticPriority::Critical, payload) {
            debug!("Diagnostic entry dropped: {}", e);
        }

        let message = error.user_message.clone();
        let stored = self
            .inner
            .sessions
            .update(session_id, |session| {
                session.error = Some(error);
                session.failed_phase = Some(phase);
            })
            .await;
        if stored.is_ok() && self.inner.sessions.transition(session_id, AnalysisPhase::Error).await.is_ok() {
            self.emit(session_id, AnalysisPhase::Error, 100, message).await;
        }
    }

    /// Record progress on the session and broadcast it
    async fn emit(&self, session_id: &str, phase: AnalysisPhase, percent: u8, message: impl Into<String>) {
        let event = ProgressEvent::new(session_id, phase, percent, message);
        let snapshot = event.snapshot();
        if self
            .inner
            .sessions
            .update(session_id, |session| session.progress = snapshot)
            .await
            .is_err()
        {
            return;
        }
        debug!(session = %session_id, phase = %phase, percent = event.percent, "📣 {}", event.message);
        if self.inner.events.send(event).is_err() {
            debug!("No progress subscribers for session {}", session_id);
        }
    }
}
