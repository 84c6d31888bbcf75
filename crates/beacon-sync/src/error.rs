//! # Telemetry Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Telemetry Error Categories                          │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Delivery     │  │      Profile            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Network-       │  │  Reconciliation-        │ │
//! │  │  InvalidUrl     │  │   Unavailable   │  │   Failed                │ │
//! │  │  ConfigLoad/Save│  │  DeliveryFailed │  │  DeviceInfo             │ │
//! │  │                 │  │  Transport      │  │                         │ │
//! │  │                 │  │  Timeout        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Storage      │  │    Encoding     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  CapacityExceed.│  │  Serialization  │  │  ChannelError           │ │
//! │  │  Database       │  │  Encoding       │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these reach the host application. Each public entry point logs
//! and absorbs them.

use beacon_db::DbError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid collector URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Delivery Errors
    // =========================================================================
    /// The host reported no connectivity; nothing was sent.
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// The collector answered with a non-success status.
    #[error("Delivery failed with status {status}")]
    DeliveryFailed { status: u16 },

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    // =========================================================================
    // Profile Errors
    // =========================================================================
    /// Both push attempts for a changed profile failed.
    #[error("Profile reconciliation failed: {0}")]
    ReconciliationFailed(String),

    /// The host could not provide device information.
    #[error("Device info unavailable: {0}")]
    DeviceInfo(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Event store is full ({limit} events)")]
    CapacityExceeded { limit: i64 },

    #[error("Database error: {0}")]
    Database(String),

    // =========================================================================
    // Encoding Errors
    // =========================================================================
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Payload encoding failed: {0}")]
    Encoding(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Telemetry service is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for TelemetryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::CapacityExceeded { limit } => TelemetryError::CapacityExceeded { limit },
            other => TelemetryError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

impl From<beacon_core::CoreError> for TelemetryError {
    fn from(err: beacon_core::CoreError) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for TelemetryError {
    fn from(err: url::ParseError) -> Self {
        TelemetryError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            TelemetryError::DeliveryFailed {
                status: status.as_u16(),
            }
        } else if err.is_timeout() {
            TelemetryError::Transport(format!("request timed out: {err}"))
        } else {
            TelemetryError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for TelemetryError {
    fn from(err: toml::de::Error) -> Self {
        TelemetryError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for TelemetryError {
    fn from(err: toml::ser::Error) -> Self {
        TelemetryError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl TelemetryError {
    /// True for failures that a later flush or retry wake may get past.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::NetworkUnavailable
            | TelemetryError::Transport(_)
            | TelemetryError::Timeout(_)
            | TelemetryError::ReconciliationFailed(_)
            | TelemetryError::DeviceInfo(_)
            | TelemetryError::Database(_) => true,
            // 4xx other than throttling won't change on retry
            TelemetryError::DeliveryFailed { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TelemetryError::InvalidConfig(_)
                | TelemetryError::InvalidUrl(_)
                | TelemetryError::ConfigLoadFailed(_)
                | TelemetryError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(TelemetryError::NetworkUnavailable.is_retryable());
        assert!(TelemetryError::Transport("reset".into()).is_retryable());
        assert!(TelemetryError::DeliveryFailed { status: 503 }.is_retryable());
        assert!(TelemetryError::DeliveryFailed { status: 429 }.is_retryable());

        assert!(!TelemetryError::DeliveryFailed { status: 400 }.is_retryable());
        assert!(!TelemetryError::InvalidConfig("bad".into()).is_retryable());
        assert!(!TelemetryError::CapacityExceeded { limit: 1 }.is_retryable());
    }

    #[test]
    fn test_capacity_maps_through() {
        let err: TelemetryError = DbError::CapacityExceeded { limit: 5 }.into();
        assert!(matches!(err, TelemetryError::CapacityExceeded { limit: 5 }));

        let err: TelemetryError = DbError::PoolExhausted.into();
        assert!(matches!(err, TelemetryError::Database(_)));
    }

    #[test]
    fn test_config_errors() {
        assert!(TelemetryError::InvalidUrl("x".into()).is_config_error());
        assert!(!TelemetryError::ShuttingDown.is_config_error());
    }
}
