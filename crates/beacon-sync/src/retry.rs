//! # Retry Scheduler
//!
//! Periodic background attempts to deliver whatever the foreground missed.
//!
//! ## Wake Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  WakeScheduler fires                                                   │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  retry.attempts += 1   (persisted, survives restarts)                  │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  wait_ready() bounded by wake_timeout                                  │
//! │     ├── ready ─────► sync_pass(): reconcile + flush(1)                 │
//! │     ├── not ready ─► skip                                              │
//! │     └── timeout ───► skip                                              │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  schedule(tier delay for attempts)   (always, replaces pending)        │
//! │                                                                         │
//! │  TIERS:  attempts 0-1 short (1m) │ 2-3 medium (1h) │ 4+ long (7d)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beacon_core::{RetryTier, RetryTiers};
use beacon_db::{SettingKey, SettingsRepository};

use crate::config::RetrySettings;

// =============================================================================
// Seams
// =============================================================================

/// "Run after delay, replacing any pending run."
pub trait WakeScheduler: Send + Sync {
    fn schedule(&self, delay: Duration);

    /// True when a schedule outlives the process (OS job schedulers).
    fn survives_restart(&self) -> bool {
        false
    }
}

/// What a wake drives. Implemented by the running service.
#[async_trait]
pub trait WakeTarget: Send + Sync {
    /// Resolves once the bootstrap phase is over. `false` means the service
    /// ended up without an endpoint.
    async fn wait_ready(&self) -> bool;

    /// One reconciliation plus one full flush.
    async fn sync_pass(&self);
}

// =============================================================================
// Retry Worker
// =============================================================================

pub struct RetryWorker {
    settings: SettingsRepository,
    scheduler: Arc<dyn WakeScheduler>,
    tiers: RetryTiers,
    wake_timeout: Duration,
}

impl RetryWorker {
    pub fn new(
        settings: SettingsRepository,
        scheduler: Arc<dyn WakeScheduler>,
        config: &RetrySettings,
    ) -> Self {
        RetryWorker {
            settings,
            scheduler,
            tiers: config.tiers,
            wake_timeout: config.wake_timeout(),
        }
    }

    pub fn tiers(&self) -> &RetryTiers {
        &self.tiers
    }

    /// Registers the first wake at startup.
    ///
    /// Persistent schedulers are registered only once per install. Unreadable
    /// state never prevents a wake from being registered.
    pub async fn ensure_scheduled(&self) {
        if self.scheduler.survives_restart() {
            match self.settings.get_flag(SettingKey::RetryScheduled).await {
                Ok(true) => {
                    debug!("Retry wake already registered");
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!(?e, "Failed to read retry schedule flag, registering anyway"),
            }
        }

        let attempts = match self.settings.get_i64(SettingKey::RetryAttempts).await {
            Ok(attempts) => attempts.unwrap_or(0),
            Err(e) => {
                warn!(?e, "Unreadable retry attempt counter, starting from zero");
                0
            }
        };
        self.schedule(attempts).await;
    }

    /// Handles one wake and returns the delay until the next one.
    pub async fn on_wake(&self, target: &dyn WakeTarget) -> Duration {
        let attempts = match self.settings.increment(SettingKey::RetryAttempts).await {
            Ok(n) => n,
            Err(e) => {
                warn!(?e, "Failed to persist retry attempt, using long tier");
                i64::MAX
            }
        };
        debug!(attempts, "Retry wake");

        match tokio::time::timeout(self.wake_timeout, target.wait_ready()).await {
            Ok(true) => target.sync_pass().await,
            Ok(false) => debug!("Service has no endpoint, skipping retry pass"),
            Err(_) => warn!(
                timeout_ms = self.wake_timeout.as_millis() as u64,
                "Service not ready in time, skipping retry pass"
            ),
        }

        self.schedule(attempts).await
    }

    async fn schedule(&self, attempts: i64) -> Duration {
        let attempts = attempts.max(0) as u64;
        let delay = self.tiers.delay_for_attempt(attempts);

        self.scheduler.schedule(delay);
        info!(
            attempts,
            tier = ?RetryTier::for_attempt(attempts),
            delay_secs = delay.as_secs(),
            "Next retry wake scheduled"
        );

        if self.scheduler.survives_restart() {
            if let Err(e) = self.settings.set_flag(SettingKey::RetryScheduled, true).await {
                warn!(?e, "Failed to persist retry schedule flag");
            }
        }

        delay
    }
}

// =============================================================================
// In-Process Scheduler
// =============================================================================

/// Tokio timer scheduler. Each `schedule` aborts the pending timer.
pub struct TokioWakeScheduler {
    pending: Mutex<Option<JoinHandle<()>>>,
    wake_tx: mpsc::Sender<()>,
}

impl TokioWakeScheduler {
    /// Returns the scheduler and the receiver that yields one item per wake.
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        (
            TokioWakeScheduler {
                pending: Mutex::new(None),
                wake_tx,
            },
            wake_rx,
        )
    }

    pub fn has_pending(&self) -> bool {
        match self.pending.lock() {
            Ok(pending) => pending.as_ref().is_some_and(|h| !h.is_finished()),
            Err(_) => false,
        }
    }

    pub fn cancel(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
    }
}

impl WakeScheduler for TokioWakeScheduler {
    fn schedule(&self, delay: Duration) {
        let wake_tx = self.wake_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wake_tx.try_send(());
        });

        match self.pending.lock() {
            Ok(mut pending) => {
                if let Some(previous) = pending.replace(timer) {
                    previous.abort();
                }
            }
            Err(_) => warn!("Wake scheduler state poisoned"),
        }
    }
}

impl Drop for TokioWakeScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs `worker.on_wake(target)` for every wake until the channel closes.
pub async fn run_wake_loop(
    worker: Arc<RetryWorker>,
    target: Arc<dyn WakeTarget>,
    mut wake_rx: mpsc::Receiver<()>,
) {
    while wake_rx.recv().await.is_some() {
        worker.on_wake(target.as_ref()).await;
    }
    debug!("Wake loop stopped");
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_db::{Database, DbConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingScheduler {
        delays: Mutex<Vec<Duration>>,
        persistent: bool,
    }

    impl WakeScheduler for RecordingScheduler {
        fn schedule(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }

        fn survives_restart(&self) -> bool {
            self.persistent
        }
    }

    struct Target {
        ready: Option<bool>,
        passes: AtomicUsize,
    }

    impl Target {
        fn ready() -> Self {
            Target {
                ready: Some(true),
                passes: AtomicUsize::new(0),
            }
        }

        /// Never resolves.
        fn hanging() -> Self {
            Target {
                ready: None,
                passes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WakeTarget for Target {
        async fn wait_ready(&self) -> bool {
            match self.ready {
                Some(ready) => ready,
                None => std::future::pending().await,
            }
        }

        async fn sync_pass(&self) {
            self.passes.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn worker(scheduler: Arc<RecordingScheduler>) -> (RetryWorker, SettingsRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let settings = db.settings();
        let worker = RetryWorker::new(settings.clone(), scheduler, &RetrySettings::default());
        (worker, settings)
    }

    #[tokio::test]
    async fn test_delays_follow_tiers() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let (worker, settings) = worker(scheduler.clone()).await;
        let target = Target::ready();

        worker.ensure_scheduled().await;
        for _ in 0..5 {
            worker.on_wake(&target).await;
        }

        let minute = Duration::from_secs(60);
        let hour = Duration::from_secs(3_600);
        let week = Duration::from_secs(604_800);
        // attempts: 0 (initial), then 1..=5
        assert_eq!(
            *scheduler.delays.lock().unwrap(),
            vec![minute, minute, hour, hour, week, week]
        );
        assert_eq!(target.passes.load(Ordering::SeqCst), 5);
        assert_eq!(settings.get_i64(SettingKey::RetryAttempts).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_timeout_still_reschedules() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let config = RetrySettings {
            wake_timeout_ms: 20,
            ..Default::default()
        };
        let worker = RetryWorker::new(db.settings(), scheduler.clone(), &config);
        let target = Target::hanging();

        let delay = worker.on_wake(&target).await;

        assert_eq!(delay, Duration::from_secs(60));
        assert_eq!(scheduler.delays.lock().unwrap().len(), 1);
        assert_eq!(target.passes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_ready_skips_pass() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let (worker, _) = worker(scheduler.clone()).await;
        let target = Target {
            ready: Some(false),
            passes: AtomicUsize::new(0),
        };

        worker.on_wake(&target).await;

        assert_eq!(target.passes.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.delays.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_scheduler_registers_once() {
        let scheduler = Arc::new(RecordingScheduler {
            persistent: true,
            ..Default::default()
        });
        let (worker, settings) = worker(scheduler.clone()).await;

        worker.ensure_scheduled().await;
        worker.ensure_scheduled().await;

        assert_eq!(scheduler.delays.lock().unwrap().len(), 1);
        assert!(settings.get_flag(SettingKey::RetryScheduled).await.unwrap());
    }

    #[tokio::test]
    async fn test_in_process_scheduler_registers_every_start() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let (worker, _) = worker(scheduler.clone()).await;

        worker.ensure_scheduled().await;
        worker.ensure_scheduled().await;

        assert_eq!(scheduler.delays.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_counter_still_schedules() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let (worker, settings) = worker(scheduler.clone()).await;
        settings.put(SettingKey::RetryAttempts, "garbage").await.unwrap();

        worker.ensure_scheduled().await;

        assert_eq!(
            *scheduler.delays.lock().unwrap(),
            vec![Duration::from_secs(60)]
        );

        // The next wake recovers the counter
        worker.on_wake(&Target::ready()).await;
        assert_eq!(settings.get_i64(SettingKey::RetryAttempts).await.unwrap(), Some(1));
        assert_eq!(scheduler.delays.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_replaces_pending() {
        let (scheduler, mut wake_rx) = TokioWakeScheduler::new();

        scheduler.schedule(Duration::from_secs(10));
        scheduler.schedule(Duration::from_secs(60));
        assert!(scheduler.has_pending());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(wake_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(wake_rx.recv().await.is_some());
        assert!(wake_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wake_loop_drives_worker() {
        let (tokio_scheduler, wake_rx) = TokioWakeScheduler::new();
        let tokio_scheduler = Arc::new(tokio_scheduler);

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let config = RetrySettings {
            tiers: RetryTiers {
                short: Duration::from_millis(20),
                medium: Duration::from_secs(3_600),
                long: Duration::from_secs(604_800),
            },
            ..Default::default()
        };
        let worker = Arc::new(RetryWorker::new(db.settings(), tokio_scheduler.clone(), &config));
        let target = Arc::new(Target::ready());

        worker.ensure_scheduled().await;
        let loop_task = tokio::spawn(run_wake_loop(worker, target.clone(), wake_rx));

        // Attempts 0 and 1 are short; attempt 2 parks on the hour tier
        for _ in 0..200 {
            if target.passes.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(target.passes.load(Ordering::SeqCst), 2);
        assert!(tokio_scheduler.has_pending());

        loop_task.abort();
    }
}
