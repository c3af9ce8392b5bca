//! In-memory session table
//!
//! Sessions live only in memory. The orchestrator is the single writer:
//! components hand results back and the orchestrator applies them here.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::analysis::{AnalysisReport, FakeReviewResult, SampledReviews, SentimentResult};
use super::collection::CollectedCorpus;
use super::errors::AnalysisError;
use super::events::{AnalysisPhase, ProgressSnapshot, SessionStatus};
use super::review::SortOrder;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid phase transition {from} -> {to}")]
    InvalidTransition { from: AnalysisPhase, to: AnalysisPhase },
}

/// State of one analysis session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSession {
    pub id: String,
    pub url: String,
    /// Requested review count per sort pass, in pass order
    pub targets: Vec<(SortOrder, usize)>,
    pub session_timeout_ms: u64,
    pub max_retries: u32,
    pub phase: AnalysisPhase,
    pub corpus: Option<CollectedCorpus>,
    pub sample: Option<SampledReviews>,
    pub sentiment: Option<Vec<SentimentResult>>,
    pub fake_detection: Option<Vec<FakeReviewResult>>,
    pub report: Option<AnalysisReport>,
    pub error: Option<AnalysisError>,
    /// Phase a retry re-enters
    pub failed_phase: Option<AnalysisPhase>,
    pub progress: ProgressSnapshot,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CollectionSession {
    pub fn new(url: impl Into<String>, targets: Vec<(SortOrder, usize)>, session_timeout_ms: u64, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            targets,
            session_timeout_ms,
            max_retries,
            phase: AnalysisPhase::Pending,
            corpus: None,
            sample: None,
            sentiment: None,
            fake_detection: None,
            report: None,
            error: None,
            failed_phase: None,
            progress: ProgressSnapshot::default(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from(self.phase)
    }

    /// Reviews per sort pass accumulated so far
    pub fn per_order_counts(&self) -> BTreeMap<SortOrder, usize> {
        self.corpus
            .as_ref()
            .map(|corpus| {
                corpus
                    .per_order
                    .iter()
                    .map(|(order, reviews)| (*order, reviews.len()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn duplicates_removed(&self) -> usize {
        self.corpus.as_ref().map_or(0, |c| c.duplicates_removed)
    }

    pub fn collection_time_ms(&self) -> u64 {
        self.corpus.as_ref().map_or(0, |c| c.collection_time_ms)
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.created_at).num_milliseconds().max(0) as u64
    }

    /// Retry is only offered for sessions that failed with a retryable error
    pub fn can_retry(&self) -> bool {
        self.phase == AnalysisPhase::Error
            && self.error.as_ref().is_some_and(|e| e.retryable)
            && self.retry_count < self.max_retries
    }
}

/// Aggregate counts over the table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub pending: usize,
    pub running: usize,
    pub complete: usize,
    pub error: usize,
}

/// Thread-safe session table
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, CollectionSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: CollectionSession) -> String {
        let id = session.id.clone();
        self.sessions.write().await.insert(id.clone(), session);
        tracing::debug!("🗂️ Session registered: {}", id);
        id
    }

    pub async fn get(&self, session_id: &str) -> Option<CollectionSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Apply `mutate` to the session and bump its update time
    pub async fn update<R>(
        &self,
        session_id: &str,
        mutate: impl FnOnce(&mut CollectionSession) -> R,
    ) -> Result<R, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let result = mutate(session);
        session.updated_at = Utc::now();
        Ok(result)
    }

    /// Move the session to `to`, rejecting transitions the state machine forbids
    pub async fn transition(&self, session_id: &str, to: AnalysisPhase) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let from = session.phase;
        if !(from.can_transition_to(to) || from.can_retry_into(to)) {
            return Err(SessionError::InvalidTransition { from, to });
        }

        session.phase = to;
        session.updated_at = Utc::now();
        if to == AnalysisPhase::Complete {
            session.completed_at = Some(session.updated_at);
        }
        Ok(())
    }

    pub async fn remove(&self, session_id: &str) -> Option<CollectionSession> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            tracing::info!("🧹 Removed session from memory: {}", session_id);
        }
        removed
    }

    /// Evict sessions not updated within `retention`; returns evicted ids
    pub async fn sweep_idle(&self, retention: ChronoDuration) -> Vec<String> {
        let cutoff = Utc::now() - retention;
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|session| session.updated_at < cutoff)
            .map(|session| session.id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!("🧹 Swept {} idle sessions", expired.len());
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let mut stats = SessionStats {
            total_sessions: sessions.len(),
            ..SessionStats::default()
        };
        for session in sessions.values() {
            match session.status() {
                SessionStatus::Pending => stats.pending += 1,
                SessionStatus::Running => stats.running += 1,
                SessionStatus::Complete => stats.complete += 1,
                SessionStatus::Error => stats.error += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CollectionSession {
        let targets = SortOrder::COLLECTION_PASSES.iter().map(|o| (*o, 100)).collect();
        CollectionSession::new("https://maps.example.com/place", targets, 60_000, 3)
    }

    #[tokio::test]
    async fn test_transition_enforces_order() {
        let manager = SessionManager::new();
        let id = manager.insert(session()).await;

        manager.transition(&id, AnalysisPhase::Scraping).await.unwrap();
        let err = manager.transition(&id, AnalysisPhase::Verdict).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                from: AnalysisPhase::Scraping,
                to: AnalysisPhase::Verdict
            }
        );

        manager.transition(&id, AnalysisPhase::Error).await.unwrap();
        manager.transition(&id, AnalysisPhase::Scraping).await.unwrap();
        assert_eq!(manager.get(&id).await.unwrap().phase, AnalysisPhase::Scraping);
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let manager = SessionManager::new();
        let result = manager.update("nope", |s| s.retry_count += 1).await;
        assert_eq!(result, Err(SessionError::NotFound("nope".into())));
    }

    #[tokio::test]
    async fn test_sweep_idle_evicts_only_stale_sessions() {
        let manager = SessionManager::new();
        let fresh = manager.insert(session()).await;
        let mut old = session();
        old.updated_at = Utc::now() - ChronoDuration::hours(48);
        let stale = manager.insert(old).await;

        let evicted = manager.sweep_idle(ChronoDuration::hours(24)).await;
        assert_eq!(evicted, vec![stale]);
        assert!(manager.get(&fresh).await.is_some());
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_stats_by_status() {
        let manager = SessionManager::new();
        let a = manager.insert(session()).await;
        manager.insert(session()).await;
        manager.transition(&a, AnalysisPhase::Scraping).await.unwrap();

        let stats = manager.stats().await;
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.pending, 1);
    }
}
