//! Session phase state machine and progress events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of an analysis session.
///
/// Phases advance strictly in declaration order; `Error` is reachable from
/// any non-terminal phase and is left only through a retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisPhase {
    Pending,
    Scraping,
    Sampling,
    Sentiment,
    FakeDetection,
    Verdict,
    Complete,
    Error,
}

impl AnalysisPhase {
    /// Phases that run work, in execution order
    pub const WORK_PHASES: [Self; 5] = [
        Self::Scraping,
        Self::Sampling,
        Self::Sentiment,
        Self::FakeDetection,
        Self::Verdict,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scraping => "scraping",
            Self::Sampling => "sampling",
            Self::Sentiment => "sentiment",
            Self::FakeDetection => "fake-detection",
            Self::Verdict => "verdict",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Scraping),
            Self::Scraping => Some(Self::Sampling),
            Self::Sampling => Some(Self::Sentiment),
            Self::Sentiment => Some(Self::FakeDetection),
            Self::FakeDetection => Some(Self::Verdict),
            Self::Verdict => Some(Self::Complete),
            Self::Complete | Self::Error => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Allowed forward transitions. Leaving `Error` is a retry and goes
    /// through `can_retry_into`.
    pub fn can_transition_to(self, target: Self) -> bool {
        if target == Self::Error {
            return !self.is_terminal();
        }
        self.next() == Some(target)
    }

    /// A retry may re-enter any work phase from `Error`
    pub fn can_retry_into(self, target: Self) -> bool {
        self == Self::Error && Self::WORK_PHASES.contains(&target)
    }
}

impl fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse session status exposed to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl From<AnalysisPhase> for SessionStatus {
    fn from(phase: AnalysisPhase) -> Self {
        match phase {
            AnalysisPhase::Pending => Self::Pending,
            AnalysisPhase::Complete => Self::Complete,
            AnalysisPhase::Error => Self::Error,
            _ => Self::Running,
        }
    }
}

/// Broadcast on every phase transition and on intra-phase progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub session_id: String,
    pub phase: AnalysisPhase,
    /// Phase-local progress, 0-100
    pub percent: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(session_id: impl Into<String>, phase: AnalysisPhase, percent: u8, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            phase,
            percent: percent.min(100),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: self.phase,
            progress: self.percent,
            message: self.message.clone(),
        }
    }
}

/// Last progress seen for a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub phase: AnalysisPhase,
    pub progress: u8,
    pub message: String,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            phase: AnalysisPhase::Pending,
            progress: 0,
            message: "Queued".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_sequence_is_strict() {
        let mut phase = AnalysisPhase::Pending;
        let mut visited = vec![phase];
        while let Some(next) = phase.next() {
            assert!(phase.can_transition_to(next));
            phase = next;
            visited.push(phase);
        }
        assert_eq!(visited.len(), 7);
        assert_eq!(phase, AnalysisPhase::Complete);
        assert!(!AnalysisPhase::Scraping.can_transition_to(AnalysisPhase::Sentiment));
    }

    #[test]
    fn test_error_reachability() {
        assert!(AnalysisPhase::Pending.can_transition_to(AnalysisPhase::Error));
        assert!(AnalysisPhase::Verdict.can_transition_to(AnalysisPhase::Error));
        assert!(!AnalysisPhase::Complete.can_transition_to(AnalysisPhase::Error));
        assert!(AnalysisPhase::Error.can_retry_into(AnalysisPhase::Sentiment));
        assert!(!AnalysisPhase::Complete.can_retry_into(AnalysisPhase::Scraping));
    }

    #[test]
    fn test_phase_serializes_kebab_case() {
        let json = serde_json::to_string(&AnalysisPhase::FakeDetection).unwrap();
        assert_eq!(json, "\"fake-detection\"");
    }
}
