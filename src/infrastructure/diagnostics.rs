//! Bounded diagnostic store
//!
//! Holds extraction and pagination diagnostics per URL. Capacity is checked
//! before every insert (entry count and estimated bytes). Eviction prefers
//! lower priorities and, within a priority, the least recently used entry;
//! critical entries go only when nothing else is left. Entries expire lazily
//! after a priority-specific retention.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::infrastructure::config::DiagnosticsConfig;

/// Fixed per-entry bookkeeping added to the payload estimate
const ENTRY_OVERHEAD_BYTES: usize = 96;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticEntry {
    pub id: String,
    pub url: String,
    pub priority: DiagnosticPriority,
    pub payload: serde_json::Value,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    #[serde(skip)]
    access_tick: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticsError {
    #[error("Diagnostic entry of {size} bytes exceeds store capacity of {max} bytes")]
    EntryTooLarge { size: usize, max: usize },
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<String, DiagnosticEntry>,
    total_bytes: usize,
    // logical clock for LRU ordering
    tick: u64,
}

impl StoreInner {
    fn remove(&mut self, id: &str) -> Option<DiagnosticEntry> {
        let entry = self.entries.remove(id)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Lowest priority first (critical only as a last resort), then least recently used
    fn eviction_candidate(&self) -> Option<String> {
        self.entries
            .values()
            .min_by_key(|entry| (entry.priority, entry.access_tick))
            .map(|entry| entry.id.clone())
    }
}

#[derive(Debug)]
pub struct DiagnosticStore {
    config: DiagnosticsConfig,
    inner: Mutex<StoreInner>,
}

impl DiagnosticStore {
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn retention(&self, priority: DiagnosticPriority) -> ChronoDuration {
        let secs = match priority {
            DiagnosticPriority::Critical => self.config.critical_retention_secs,
            DiagnosticPriority::High => self.config.high_retention_secs,
            DiagnosticPriority::Medium => self.config.medium_retention_secs,
            DiagnosticPriority::Low => self.config.low_retention_secs,
        };
        ChronoDuration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
    }

    fn is_expired(&self, entry: &DiagnosticEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at > self.retention(entry.priority)
    }

    pub fn insert(
        &self,
        url: &str,
        priority: DiagnosticPriority,
        payload: serde_json::Value,
    ) -> Result<String, DiagnosticsError> {
        self.insert_at(url, priority, payload, Utc::now())
    }

    pub fn insert_at(
        &self,
        url: &str,
        priority: DiagnosticPriority,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<String, DiagnosticsError> {
        let size = payload.to_string().len() + url.len() + ENTRY_OVERHEAD_BYTES;
        if size > self.config.max_bytes {
            return Err(DiagnosticsError::EntryTooLarge {
                size,
                max: self.config.max_bytes,
            });
        }

        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|entry| self.is_expired(entry, now))
            .map(|entry| entry.id.clone())
            .collect();
        for id in &expired {
            inner.remove(id);
        }

        while inner.entries.len() >= self.config.max_entries
            || inner.total_bytes + size > self.config.max_bytes
        {
            let Some(victim) = inner.eviction_candidate() else {
                break;
            };
            if let Some(evicted) = inner.remove(&victim) {
                debug!("🗑️ Evicted {:?} diagnostic {} for {}", evicted.priority, evicted.id, evicted.url);
            }
        }

        inner.tick += 1;
        let entry = DiagnosticEntry {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            priority,
            payload,
            size_bytes: size,
            created_at: now,
            accessed_at: now,
            access_tick: inner.tick,
        };
        let id = entry.id.clone();
        inner.total_bytes += size;
        inner.entries.insert(id.clone(), entry);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<DiagnosticEntry> {
        self.get_at(id, Utc::now())
    }

    /// Fetch and mark as used; an expired entry is dropped instead
    pub fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<DiagnosticEntry> {
        let mut inner = self.lock();
        let expired = self.is_expired(inner.entries.get(id)?, now);
        if expired {
            inner.remove(id);
            return None;
        }
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(id)?;
        entry.access_tick = tick;
        entry.accessed_at = now;
        Some(entry.clone())
    }

    /// Live entries recorded for `url`, oldest first
    pub fn entries_for(&self, url: &str) -> Vec<DiagnosticEntry> {
        let now = Utc::now();
        let inner = self.lock();
        let mut entries: Vec<DiagnosticEntry> = inner
            .entries
            .values()
            .filter(|entry| entry.url == url && !self.is_expired(entry, now))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        entries
    }

    /// Evict by priority/LRU until at most `max_entries` remain; returns evicted count
    pub fn trim_to(&self, max_entries: usize) -> usize {
        let mut inner = self.lock();
        let mut evicted = 0;
        while inner.entries.len() > max_entries {
            let Some(victim) = inner.eviction_candidate() else {
                break;
            };
            inner.remove(&victim);
            evicted += 1;
        }
        evicted
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|entry| self.is_expired(entry, now))
            .map(|entry| entry.id.clone())
            .collect();
        for id in &expired {
            inner.remove(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.lock().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(max_entries: usize, max_bytes: usize) -> DiagnosticStore {
        DiagnosticStore::new(DiagnosticsConfig {
            max_entries,
            max_bytes,
            ..DiagnosticsConfig::default()
        })
    }

    #[test]
    fn test_low_priority_evicted_before_critical() {
        let store = store(2, 1_000_000);
        let critical = store.insert("u", DiagnosticPriority::Critical, json!({"a": 1})).unwrap();
        let low = store.insert("u", DiagnosticPriority::Low, json!({"b": 2})).unwrap();
        let high = store.insert("u", DiagnosticPriority::High, json!({"c": 3})).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get(&low).is_none());
        assert!(store.get(&critical).is_some());
        assert!(store.get(&high).is_some());
    }

    #[test]
    fn test_lru_within_priority() {
        let store = store(2, 1_000_000);
        let first = store.insert("u", DiagnosticPriority::Medium, json!(1)).unwrap();
        let second = store.insert("u", DiagnosticPriority::Medium, json!(2)).unwrap();
        store.get(&first);
        store.insert("u", DiagnosticPriority::Medium, json!(3)).unwrap();

        assert!(store.get(&first).is_some());
        assert!(store.get(&second).is_none());
    }

    #[test]
    fn test_critical_goes_when_nothing_else_left() {
        let store = store(1, 1_000_000);
        let a = store.insert("u", DiagnosticPriority::Critical, json!(1)).unwrap();
        store.insert("u", DiagnosticPriority::Critical, json!(2)).unwrap();
        assert!(store.get(&a).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_byte_budget_and_oversized_entry() {
        let store = store(100, 400);
        store.insert("u", DiagnosticPriority::Low, json!("x".repeat(150))).unwrap();
        store.insert("u", DiagnosticPriority::Low, json!("y".repeat(150))).unwrap();
        assert!(store.total_bytes() <= 400);
        assert_eq!(store.len(), 1);

        let err = store
            .insert("u", DiagnosticPriority::Critical, json!("z".repeat(1_000)))
            .unwrap_err();
        assert!(matches!(err, DiagnosticsError::EntryTooLarge { .. }));
    }

    #[test]
    fn test_lazy_expiry_by_priority() {
        let store = store(10, 1_000_000);
        let now = Utc::now();
        let low = store.insert_at("u", DiagnosticPriority::Low, json!(1), now).unwrap();
        let critical = store.insert_at("u", DiagnosticPriority::Critical, json!(2), now).unwrap();

        let later = now + ChronoDuration::minutes(11);
        assert!(store.get_at(&low, later).is_none());
        assert!(store.get_at(&critical, later).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_trim_to() {
        let store = store(10, 1_000_000);
        for i in 0..6 {
            store.insert("u", DiagnosticPriority::Low, json!(i)).unwrap();
        }
        assert_eq!(store.trim_to(2), 4);
        assert_eq!(store.entries_for("u").len(), 2);
    }
}
