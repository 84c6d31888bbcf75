//! # Flush Coordinator
//!
//! Drains the event store to the delivery sink in batches.
//!
//! ## Flush Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  flush(min_count)                                                      │
//! │     │                                                                   │
//! │     ├── network down? ──► last_failure = now, return                   │
//! │     │                                                                   │
//! │     ├── lock busy? ─────► return (another flush is running)            │
//! │     │                                                                   │
//! │     ▼  (holding the single-flight lock)                                │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  while stats().count >= min_count:                              │   │
//! │  │      batch = drain_oldest(batch_size)                           │   │
//! │  │      batch empty? ──► stop                                      │   │
//! │  │      sink.send_batch(batch)                                     │   │
//! │  │        ok  ──► remove(batch), continue                          │   │
//! │  │        err ──► last_failure = now, stop                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  lock released (guard drop, also on panic or cancellation)             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Auto Flush Policy
//! `auto_flush_check()` runs after every enqueue and on every ticker tick.
//! It flushes the whole backlog when `count >= flush_threshold` or the
//! oldest event is at least `flush_interval_ms` old, unless a flush is
//! already running or the last failure is younger than `retry_backoff_ms`.

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use beacon_core::{Event, StoreStats};
use beacon_db::{DbError, EventRepository};

use crate::clock::Clock;
use crate::config::QueueSettings;
use crate::error::TelemetryResult;
use crate::network::NetworkMonitor;
use crate::sink::DeliverySink;

// =============================================================================
// Policy
// =============================================================================

/// Thresholds governing batching and auto flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub batch_size: u32,
    pub size_threshold: i64,
    pub age_threshold_ms: i64,
    pub retry_backoff_ms: i64,
    pub local_event_limit: i64,
}

impl From<&QueueSettings> for FlushPolicy {
    fn from(settings: &QueueSettings) -> Self {
        FlushPolicy {
            batch_size: settings.batch_size,
            size_threshold: settings.flush_threshold,
            age_threshold_ms: settings.flush_interval_ms,
            retry_backoff_ms: settings.retry_backoff_ms,
            local_event_limit: settings.local_event_limit,
        }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::from(&QueueSettings::default())
    }
}

impl FlushPolicy {
    /// Whether the store contents alone warrant a flush.
    pub fn should_flush(&self, stats: &StoreStats, now: i64) -> bool {
        if stats.is_empty() {
            return false;
        }
        stats.count >= self.size_threshold
            || stats
                .oldest_age(now)
                .is_some_and(|age| age >= self.age_threshold_ms)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Why a flush did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NetworkUnavailable,
    InProgress,
    BackingOff,
    BelowThreshold,
}

/// Result of one `flush` or `auto_flush_check` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Skipped(SkipReason),
    /// Every batch that was attempted got delivered.
    Completed { batches: u32, delivered: u64 },
    /// A batch failed; earlier batches in this pass were delivered.
    Failed { batches: u32, delivered: u64 },
}

impl FlushOutcome {
    pub fn delivered(&self) -> u64 {
        match self {
            FlushOutcome::Completed { delivered, .. } | FlushOutcome::Failed { delivered, .. } => {
                *delivered
            }
            FlushOutcome::Skipped(_) => 0,
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct FlushCoordinator {
    store: EventRepository,
    sink: Arc<dyn DeliverySink>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    policy: FlushPolicy,

    /// Single-flight lock. Losers return immediately.
    flush_lock: Mutex<()>,

    last_failure: RwLock<Option<i64>>,
}

impl FlushCoordinator {
    pub fn new(
        store: EventRepository,
        sink: Arc<dyn DeliverySink>,
        network: Arc<dyn NetworkMonitor>,
        clock: Arc<dyn Clock>,
        policy: FlushPolicy,
    ) -> Self {
        FlushCoordinator {
            store,
            sink,
            network,
            clock,
            policy,
            flush_lock: Mutex::new(()),
            last_failure: RwLock::new(None),
        }
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    pub fn store(&self) -> &EventRepository {
        &self.store
    }

    pub fn is_flushing(&self) -> bool {
        self.flush_lock.try_lock().is_err()
    }

    pub async fn last_failure_time(&self) -> Option<i64> {
        *self.last_failure.read().await
    }

    async fn record_failure(&self) {
        *self.last_failure.write().await = Some(self.clock.now_millis());
    }

    /// Persists an event, dropping it when the store is full, then runs the
    /// auto-flush check. The check runs even when the event was dropped.
    pub async fn enqueue(&self, event: Event) {
        match self.store.append(&event, self.policy.local_event_limit).await {
            Ok(()) => {}
            Err(DbError::CapacityExceeded { limit }) => {
                warn!(name = %event.name, limit, "Local events limit reached, dropping event");
            }
            Err(e) => {
                error!(?e, name = %event.name, "Failed to store event");
            }
        }

        self.auto_flush_check().await;
    }

    /// Flushes the whole backlog when the policy says so.
    pub async fn auto_flush_check(&self) -> FlushOutcome {
        if self.is_flushing() {
            return FlushOutcome::Skipped(SkipReason::InProgress);
        }

        let now = self.clock.now_millis();
        if let Some(failed_at) = self.last_failure_time().await {
            if now - failed_at < self.policy.retry_backoff_ms {
                debug!(failed_at, "Within retry backoff window, skipping auto flush");
                return FlushOutcome::Skipped(SkipReason::BackingOff);
            }
        }

        let stats = match self.store.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                error!(?e, "Failed to read event store stats");
                return FlushOutcome::Skipped(SkipReason::BelowThreshold);
            }
        };

        if !self.policy.should_flush(&stats, now) {
            return FlushOutcome::Skipped(SkipReason::BelowThreshold);
        }

        debug!(count = stats.count, oldest = ?stats.oldest_timestamp, "Auto flush triggered");
        self.flush(1).await
    }

    /// Delivers batches while at least `min_count` events are pending.
    pub async fn flush(&self, min_count: i64) -> FlushOutcome {
        if !self.network.is_available() {
            debug!("Network unavailable, skipping flush");
            self.record_failure().await;
            return FlushOutcome::Skipped(SkipReason::NetworkUnavailable);
        }

        let Ok(_guard) = self.flush_lock.try_lock() else {
            debug!("Flush already in progress");
            return FlushOutcome::Skipped(SkipReason::InProgress);
        };

        let mut batches = 0u32;
        let mut delivered = 0u64;

        loop {
            match self.deliver_next_batch(min_count).await {
                Ok(Some(sent)) => {
                    batches += 1;
                    delivered += sent;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, batches, delivered, "Flush stopped on failed batch");
                    self.record_failure().await;
                    return FlushOutcome::Failed { batches, delivered };
                }
            }
        }

        if delivered > 0 {
            info!(batches, delivered, "Flush complete");
        }
        FlushOutcome::Completed { batches, delivered }
    }

    /// Sends and removes one batch. `Ok(None)` when there is nothing (or not
    /// enough) to send.
    async fn deliver_next_batch(&self, min_count: i64) -> TelemetryResult<Option<u64>> {
        let stats = self.store.stats().await?;
        if stats.count < min_count || stats.is_empty() {
            return Ok(None);
        }

        let batch = self.store.drain_oldest(self.policy.batch_size).await?;
        if batch.is_empty() {
            return Ok(None);
        }

        self.sink.send_batch(&batch).await?;
        let removed = self.store.remove(&batch).await?;

        debug!(size = batch.len(), removed, "Batch delivered");
        Ok(Some(batch.len() as u64))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
