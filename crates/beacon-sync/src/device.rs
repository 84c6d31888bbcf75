//! # Device Information Source
//!
//! The host supplies identity and device facts through [`DeviceInfoSource`].
//! Lookups may be slow (platform services) and may fail; the reconciler
//! bounds and absorbs both.

use async_trait::async_trait;
use tokio::sync::RwLock;

use beacon_core::DeviceFacts;

use crate::error::{TelemetryError, TelemetryResult};

#[async_trait]
pub trait DeviceInfoSource: Send + Sync {
    /// Stable per-install identifier used in collector paths.
    async fn install_id(&self) -> TelemetryResult<String>;

    /// Live device fields, recomputed on every reconciliation pass.
    async fn collect_facts(&self) -> TelemetryResult<DeviceFacts>;

    /// Install referrer. Only asked while the stored profile has none.
    async fn install_referrer(&self) -> TelemetryResult<Option<String>>;
}

/// Fixed device information, updatable at runtime.
#[derive(Debug)]
pub struct StaticDeviceInfo {
    install_id: RwLock<Option<String>>,
    facts: RwLock<DeviceFacts>,
    referrer: RwLock<Option<String>>,
}

impl StaticDeviceInfo {
    pub fn new(install_id: impl Into<String>, facts: DeviceFacts) -> Self {
        StaticDeviceInfo {
            install_id: RwLock::new(Some(install_id.into())),
            facts: RwLock::new(facts),
            referrer: RwLock::new(None),
        }
    }

    /// A source whose install id lookup fails.
    pub fn without_install_id(facts: DeviceFacts) -> Self {
        StaticDeviceInfo {
            install_id: RwLock::new(None),
            facts: RwLock::new(facts),
            referrer: RwLock::new(None),
        }
    }

    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        StaticDeviceInfo {
            referrer: RwLock::new(Some(referrer.into())),
            ..self
        }
    }

    pub async fn set_facts(&self, facts: DeviceFacts) {
        *self.facts.write().await = facts;
    }

    pub async fn set_referrer(&self, referrer: Option<String>) {
        *self.referrer.write().await = referrer;
    }
}

#[async_trait]
impl DeviceInfoSource for StaticDeviceInfo {
    async fn install_id(&self) -> TelemetryResult<String> {
        self.install_id
            .read()
            .await
            .clone()
            .ok_or_else(|| TelemetryError::DeviceInfo("install id unavailable".into()))
    }

    async fn collect_facts(&self) -> TelemetryResult<DeviceFacts> {
        Ok(self.facts.read().await.clone())
    }

    async fn install_referrer(&self) -> TelemetryResult<Option<String>> {
        Ok(self.referrer.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticDeviceInfo::new("install-1", DeviceFacts::default()).with_referrer("r");
        assert_eq!(source.install_id().await.unwrap(), "install-1");
        assert_eq!(source.install_referrer().await.unwrap().as_deref(), Some("r"));

        source
            .set_facts(DeviceFacts {
                geo: Some("NL".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(source.collect_facts().await.unwrap().geo.as_deref(), Some("NL"));
    }

    #[tokio::test]
    async fn test_missing_install_id() {
        let source = StaticDeviceInfo::without_install_id(DeviceFacts::default());
        assert!(matches!(
            source.install_id().await,
            Err(TelemetryError::DeviceInfo(_))
        ));
    }
}
