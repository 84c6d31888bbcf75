//! # Error Types
//!
//! Domain errors for beacon-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  beacon-core (this file)                                               │
//! │  ├── CoreError        - Domain failures (profile encoding, ...)        │
//! │  └── ValidationError  - Rejected event input                           │
//! │                                                                         │
//! │  beacon-db                                                             │
//! │  └── DbError          - Storage failures, CapacityExceeded             │
//! │                                                                         │
//! │  beacon-sync                                                           │
//! │  └── TelemetryError   - Delivery, reconciliation, configuration        │
//! │                                                                         │
//! │  None of these reach the host: every public entry point absorbs and    │
//! │  logs them.                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain-level failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A profile snapshot could not be serialized or parsed.
    #[error("Profile encoding failed: {0}")]
    ProfileEncoding(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::ProfileEncoding(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Reasons an incoming event is rejected before it reaches the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("{field} is required")]
    Required { field: String },

    /// Timestamps are milliseconds since the epoch and cannot be negative.
    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: i64 },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}
