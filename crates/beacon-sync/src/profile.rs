//! # Device Profile Reconciler
//!
//! Keeps the collector's copy of the device profile in step with the device.
//!
//! ## Reconciliation Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  (permit held for the whole pass, other callers wait)                  │
//! │                                                                         │
//! │  1. load current, acknowledged          (settings table)               │
//! │  2. apply live device facts to current                                 │
//! │     referrer only while unset, bounded by referrer_timeout             │
//! │  3. fingerprint(current) == fingerprint(acknowledged) ──► Unchanged    │
//! │  4. save current                                                       │
//! │     first_push = acknowledged has no install token                     │
//! │     hints = { first_push, old_data: acknowledged | null, now }         │
//! │  5. push ── ok ──► acknowledged = pushed value ──► Pushed              │
//! │       └── err ──► push again ── ok ──► (as above)                      │
//! │                       └── err ──► report_error ──► Failed              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use beacon_core::{Attribution, DeviceProfile, ErrorReport, ProfileHints};
use beacon_db::{DbError, SettingKey, SettingsRepository};

use crate::clock::Clock;
use crate::device::DeviceInfoSource;
use crate::error::{TelemetryError, TelemetryResult};
use crate::sink::ProfileSink;

/// Push attempts per pass before the failure is reported.
const PUSH_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Current profile matches the acknowledged one; nothing sent.
    Unchanged,
    Pushed { first_push: bool },
    /// Push failed twice, or the pass could not run.
    Failed,
}

pub struct ProfileReconciler {
    settings: SettingsRepository,
    device: Arc<dyn DeviceInfoSource>,
    clock: Arc<dyn Clock>,
    referrer_timeout: Duration,
    permit: Semaphore,
}

impl ProfileReconciler {
    pub fn new(
        settings: SettingsRepository,
        device: Arc<dyn DeviceInfoSource>,
        clock: Arc<dyn Clock>,
        referrer_timeout: Duration,
    ) -> Self {
        ProfileReconciler {
            settings,
            device,
            clock,
            referrer_timeout,
            permit: Semaphore::new(1),
        }
    }

    /// Runs one pass against `sink`. Errors are logged and folded into
    /// `Failed`.
    pub async fn reconcile(&self, sink: &dyn ProfileSink) -> ReconcileOutcome {
        let Ok(_permit) = self.permit.acquire().await else {
            return ReconcileOutcome::Failed;
        };

        match self.reconcile_locked(sink).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Profile reconciliation failed");
                ReconcileOutcome::Failed
            }
        }
    }

    /// Merges campaign attribution into the stored profile.
    ///
    /// Returns true when the stored profile changed and a pass is due.
    pub async fn set_attribution(&self, attribution: &Attribution) -> TelemetryResult<bool> {
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| TelemetryError::ShuttingDown)?;

        let mut current = self.load(SettingKey::CurrentProfile).await?;
        if !attribution.apply_to(&mut current) {
            return Ok(false);
        }

        self.settings.put_json(SettingKey::CurrentProfile, &current).await?;
        debug!("Attribution stored");
        Ok(true)
    }

    pub async fn acknowledged(&self) -> TelemetryResult<DeviceProfile> {
        self.load(SettingKey::AcknowledgedProfile).await
    }

    async fn reconcile_locked(&self, sink: &dyn ProfileSink) -> TelemetryResult<ReconcileOutcome> {
        let mut current = self.load(SettingKey::CurrentProfile).await?;
        let acknowledged = self.load(SettingKey::AcknowledgedProfile).await?;

        let facts = self.device.collect_facts().await?;
        facts.apply_to(&mut current);

        if current.referrer.is_none() {
            current.referrer = self.fetch_referrer().await;
        }

        if current.fingerprint()? == acknowledged.fingerprint()? {
            debug!("Profile unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        }

        self.settings.put_json(SettingKey::CurrentProfile, &current).await?;

        let first_push = acknowledged.install_token.is_none();
        let old_data = if first_push {
            None
        } else {
            Some(serde_json::to_value(&acknowledged)?)
        };
        let pushed = DeviceProfile {
            hints: Some(ProfileHints {
                first_push,
                old_data,
                device_timestamp_millis: self.clock.now_millis(),
            }),
            ..current
        };

        let mut last_error = None;
        for attempt in 1..=PUSH_ATTEMPTS {
            match sink.push_profile(&pushed).await {
                Ok(()) => {
                    self.settings
                        .put_json(SettingKey::AcknowledgedProfile, &pushed)
                        .await?;
                    info!(first_push, attempt, "Profile pushed");
                    return Ok(ReconcileOutcome::Pushed { first_push });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Profile push failed");
                    last_error = Some(e);
                }
            }
        }

        let failure = TelemetryError::ReconciliationFailed(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        );
        error!(error = %failure, "Giving up on profile push for this pass");
        self.report(sink, &failure).await;

        Ok(ReconcileOutcome::Failed)
    }

    async fn fetch_referrer(&self) -> Option<String> {
        match tokio::time::timeout(self.referrer_timeout, self.device.install_referrer()).await {
            Ok(Ok(referrer)) => referrer
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            Ok(Err(e)) => {
                warn!(error = %e, "Install referrer lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.referrer_timeout.as_millis() as u64,
                    "Install referrer lookup timed out"
                );
                None
            }
        }
    }

    async fn report(&self, sink: &dyn ProfileSink, failure: &TelemetryError) {
        if let Err(e) = sink.report_error(&ErrorReport::new(failure)).await {
            warn!(error = %e, "Error report not delivered");
        }
    }

    /// Stored profile without push hints. Missing or unreadable values read
    /// as the default profile.
    async fn load(&self, key: SettingKey) -> TelemetryResult<DeviceProfile> {
        match self.settings.get_json::<DeviceProfile>(key).await {
            Ok(profile) => Ok(profile.unwrap_or_default().without_hints()),
            Err(DbError::CorruptValue { key, message }) => {
                warn!(%key, %message, "Stored profile unreadable, starting fresh");
                Ok(DeviceProfile::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
