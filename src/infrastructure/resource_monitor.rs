//! Process memory monitoring with pressure-triggered cleanup
//!
//! The monitor samples memory on an interval. Crossing the warning threshold
//! is logged; crossing the critical threshold runs the registered cleanup
//! callbacks and trims the sample history, at most once per cooldown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::config::ResourceConfig;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of the current process memory footprint
pub trait MemoryProbe: Send + Sync {
    /// Resident bytes, `None` when the platform offers no reading
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads `/proc/self/statm` (Linux)
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMemoryProbe;

impl MemoryProbe for ProcMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident_pages * 4096)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemorySample {
    pub bytes: u64,
    pub pressure: MemoryPressure,
    pub sampled_at: DateTime<Utc>,
}

impl MemorySample {
    pub const fn megabytes(&self) -> u64 {
        self.bytes / BYTES_PER_MB
    }
}

/// Cleanup hook; returns how many items it released
pub type CleanupCallback = Box<dyn Fn() -> usize + Send + Sync>;

pub struct ResourceMonitor {
    config: ResourceConfig,
    probe: Arc<dyn MemoryProbe>,
    callbacks: Mutex<Vec<(String, CleanupCallback)>>,
    history: Mutex<VecDeque<MemorySample>>,
    last_cleanup: Mutex<Option<Instant>>,
    cleanups_run: AtomicU64,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("config", &self.config)
            .field("cleanups_run", &self.cleanups_run.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ResourceMonitor {
    pub fn new(config: ResourceConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            config,
            probe,
            callbacks: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            last_cleanup: Mutex::new(None),
            cleanups_run: AtomicU64::new(0),
        }
    }

    pub fn register_cleanup(&self, name: impl Into<String>, callback: CleanupCallback) {
        let name = name.into();
        debug!("🧽 Registered cleanup callback '{}'", name);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, callback));
    }

    pub const fn classify(&self, bytes: u64) -> MemoryPressure {
        let mb = bytes / BYTES_PER_MB;
        if mb >= self.config.critical_mb {
            MemoryPressure::Critical
        } else if mb >= self.config.warning_mb {
            MemoryPressure::Warning
        } else {
            MemoryPressure::Normal
        }
    }

    /// Take one sample and react to its pressure level
    pub fn check(&self) -> Option<MemorySample> {
        let bytes = self.probe.resident_bytes()?;
        let sample = MemorySample {
            bytes,
            pressure: self.classify(bytes),
            sampled_at: Utc::now(),
        };

        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_back(sample);
            while history.len() > self.config.history_size.max(1) {
                history.pop_front();
            }
        }

        match sample.pressure {
            MemoryPressure::Normal => {}
            MemoryPressure::Warning => {
                warn!(memory_mb = sample.megabytes(), "⚠️ Memory usage above warning threshold");
            }
            MemoryPressure::Critical => {
                warn!(memory_mb = sample.megabytes(), "🚨 Memory usage critical");
                self.cleanup();
            }
        }
        Some(sample)
    }

    /// Run cleanup unless one ran within the cooldown; returns whether it ran
    pub fn cleanup(&self) -> bool {
        {
            let mut last = self.last_cleanup.lock().unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|at| at.elapsed() < self.config.cleanup_cooldown()) {
                debug!("🧊 Cleanup skipped, still in cooldown");
                return false;
            }
            *last = Some(Instant::now());
        }

        let released: usize = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, callback)| {
                let freed = callback();
                debug!("🧽 Cleanup '{}' released {} items", name, freed);
                freed
            })
            .sum();

        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            let keep = history.len() / 2;
            let excess = history.len() - keep;
            history.drain(..excess);
        }

        self.cleanups_run.fetch_add(1, Ordering::Relaxed);
        info!(released, "🧹 Memory cleanup completed");
        true
    }

    pub fn latest(&self) -> Option<MemorySample> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .copied()
    }

    pub fn history(&self) -> Vec<MemorySample> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    pub fn cleanups_run(&self) -> u64 {
        self.cleanups_run.load(Ordering::Relaxed)
    }

    /// Sample on the configured interval until `token` is cancelled
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sample_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("📈 Resource monitor started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        self.check();
                    }
                }
            }
            info!("📉 Resource monitor stopped");
        })
    }
}
