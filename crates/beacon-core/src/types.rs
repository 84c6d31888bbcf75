//! # Domain Types
//!
//! Events, device profiles and the small records that travel with them.
//!
//! ## Type Relationships
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Event ──── parameters: BTreeMap<String, ParamValue>                   │
//! │    │                                                                    │
//! │    └── stored in the event store until its batch is acknowledged       │
//! │                                                                         │
//! │  DeviceProfile ──── hints: Option<ProfileHints>                        │
//! │    │                                                                    │
//! │    ├── "current"       last computed snapshot                          │
//! │    └── "acknowledged"  last snapshot the collector accepted            │
//! │                                                                         │
//! │  DeviceFacts ──► apply_to(&mut DeviceProfile)                          │
//! │  Attribution ──► apply_to(&mut DeviceProfile) -> changed?              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Field names on the wire follow the collector API, which is why several
//! profile fields carry a `serde(rename)`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// =============================================================================
// Event
// =============================================================================

/// A JSON primitive allowed as an event parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Flat parameter map. Ordered so serialization is stable.
pub type EventParams = BTreeMap<String, ParamValue>;

/// An immutable, named occurrence recorded by the host application.
///
/// ## Wire Format
/// ```json
/// { "id": "0b9c…", "timestamp": 1700000000000, "name": "purchase",
///   "parameters": { "sku": "gold_pack", "price": 4.99 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier (UUID v4), generated at creation.
    pub id: String,

    /// Creation time in milliseconds since the epoch.
    pub timestamp: i64,

    /// Event name, never empty.
    pub name: String,

    #[serde(default)]
    pub parameters: EventParams,
}

impl Event {
    /// Creates an event with a fresh identifier and no parameters.
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Event {
            id: Uuid::new_v4().to_string(),
            timestamp,
            name: name.into(),
            parameters: EventParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, parameters: EventParams) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Aggregate view of the event store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StoreStats {
    pub count: i64,

    /// Smallest creation timestamp, `None` iff `count == 0`.
    pub oldest_timestamp: Option<i64>,
}

impl StoreStats {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Age of the oldest event relative to `now`, in milliseconds.
    pub fn oldest_age(&self, now: i64) -> Option<i64> {
        self.oldest_timestamp.map(|oldest| now - oldest)
    }
}

// =============================================================================
// Device Profile
// =============================================================================

/// Push metadata attached to a profile upload. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileHints {
    /// True when the collector has never acknowledged a profile carrying an
    /// install token for this install.
    #[serde(rename = "first_app_instance_update")]
    pub first_push: bool,

    /// Previously acknowledged profile, absent on the first push.
    pub old_data: Option<serde_json::Value>,

    pub device_timestamp_millis: i64,
}

/// Snapshot of device, install and consent metadata.
///
/// All fields are optional: a default profile is the "never computed" state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Identifier of the embedding SDK build.
    pub lib_id: Option<String>,

    #[serde(rename = "package")]
    pub app_package: Option<String>,

    pub app_first_open_timestamp: Option<i64>,
    pub app_last_update_timestamp: Option<i64>,
    pub app_delete_timestamp: Option<i64>,

    /// Push/install token. Its absence in the acknowledged profile marks the
    /// next push as a first push.
    #[serde(rename = "firebase_token")]
    pub install_token: Option<String>,

    #[serde(rename = "gclid")]
    pub ad_click_id: Option<String>,

    /// Country code.
    pub geo: Option<String>,

    pub os_version: Option<String>,
    pub device: Option<String>,
    pub device_model: Option<String>,
    pub app_version: Option<String>,

    /// Install referrer. Fetched once and then kept.
    pub referrer: Option<String>,

    #[serde(rename = "tenjin_analytics_installation_id")]
    pub analytics_installation_id: Option<String>,

    pub is_limited_ad_tracking: Option<bool>,
    pub advertising_id: Option<String>,
    pub os_version_int: Option<i64>,
    pub app_version_code: Option<i64>,
    pub build_id: Option<String>,
    pub locale: Option<String>,

    #[serde(rename = "affise_clickid")]
    pub campaign_click_id: Option<String>,

    #[serde(rename = "affise_promo_code")]
    pub campaign_promo_code: Option<String>,

    pub hints: Option<ProfileHints>,
}

impl DeviceProfile {
    /// Copy of this profile with push metadata removed.
    pub fn without_hints(&self) -> DeviceProfile {
        DeviceProfile {
            hints: None,
            ..self.clone()
        }
    }

    /// Canonical JSON used to decide whether a push is needed.
    ///
    /// Hints are excluded: they describe the push, not the device.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.without_hints())
    }
}

/// Live device facts recomputed on every reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceFacts {
    pub lib_id: Option<String>,
    pub app_package: Option<String>,
    pub app_first_open_timestamp: Option<i64>,
    pub app_last_update_timestamp: Option<i64>,
    pub install_token: Option<String>,
    pub ad_click_id: Option<String>,
    pub geo: Option<String>,
    pub os_version: Option<String>,
    pub device: Option<String>,
    pub device_model: Option<String>,
    pub app_version: Option<String>,
    pub analytics_installation_id: Option<String>,
    pub is_limited_ad_tracking: Option<bool>,
    pub advertising_id: Option<String>,
    pub os_version_int: Option<i64>,
    pub app_version_code: Option<i64>,
    pub build_id: Option<String>,
    pub locale: Option<String>,
}

impl DeviceFacts {
    /// Overwrites the live fields of `profile`.
    ///
    /// Referrer, deletion time and campaign attribution are left alone.
    pub fn apply_to(&self, profile: &mut DeviceProfile) {
        profile.lib_id = non_blank(&self.lib_id);
        profile.app_package = self.app_package.clone();
        profile.app_first_open_timestamp = self.app_first_open_timestamp;
        profile.app_last_update_timestamp = self.app_last_update_timestamp;
        profile.install_token = non_blank(&self.install_token);
        profile.ad_click_id = non_blank(&self.ad_click_id);
        profile.geo = self.geo.clone();
        profile.os_version = self.os_version.clone();
        profile.device = self.device.clone();
        profile.device_model = self.device_model.clone();
        profile.app_version = self.app_version.clone();
        profile.analytics_installation_id = non_blank(&self.analytics_installation_id);
        profile.is_limited_ad_tracking = self.is_limited_ad_tracking;
        profile.advertising_id = non_blank(&self.advertising_id);
        profile.os_version_int = self.os_version_int;
        profile.app_version_code = self.app_version_code;
        profile.build_id = self.build_id.clone();
        profile.locale = self.locale.clone();
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Campaign attribution supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    pub click_id: Option<String>,
    pub promo_code: Option<String>,
}

impl Attribution {
    /// Merges into `profile`. `None` never clears a stored value.
    ///
    /// Returns true when the profile changed.
    pub fn apply_to(&self, profile: &mut DeviceProfile) -> bool {
        let mut changed = false;

        if let Some(click_id) = &self.click_id {
            if profile.campaign_click_id.as_ref() != Some(click_id) {
                profile.campaign_click_id = Some(click_id.clone());
                changed = true;
            }
        }

        if let Some(promo_code) = &self.promo_code {
            if profile.campaign_promo_code.as_ref() != Some(promo_code) {
                profile.campaign_promo_code = Some(promo_code.clone());
                changed = true;
            }
        }

        changed
    }
}

// =============================================================================
// Error Report
// =============================================================================

/// Body of a best-effort remote error report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: String,
}

impl ErrorReport {
    pub fn new(error: impl std::fmt::Display) -> Self {
        ErrorReport {
            error: error.to_string(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
