//! # beacon-core: Pure Types for the Beacon Telemetry Client
//!
//! Everything in here is deterministic and free of I/O. The database and
//! delivery crates build on these types.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Host application / agent binary                 │   │
//! │  │        track(), set_endpoint(), set_attribution()               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │       beacon-sync (flush, retry, profile, orchestrator)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ beacon-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌───────────┐  ┌──────────┐  │   │
//! │  │   │   types   │  │ validation  │  │   retry   │  │  error   │  │   │
//! │  │   │  Event    │  │ EventDraft  │  │ RetryTier │  │CoreError │  │   │
//! │  │   │  Profile  │  │   checks    │  │  delays   │  │          │  │   │
//! │  │   └───────────┘  └─────────────┘  └───────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use beacon_core::{Event, ParamValue, RetryTiers};
//! use std::time::Duration;
//!
//! let event = Event::new("level_complete", 1_700_000_000_000)
//!     .with_param("level", ParamValue::Int(3));
//! assert_eq!(event.parameters.len(), 1);
//!
//! let tiers = RetryTiers::default();
//! assert_eq!(tiers.delay_for_attempt(0), Duration::from_secs(60));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod retry;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use retry::{RetryTier, RetryTiers};
pub use types::*;
pub use validation::{validate_event_name, EventDraft};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of events uploaded per delivery request.
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Pending event count that triggers an automatic flush.
pub const DEFAULT_FLUSH_THRESHOLD: i64 = 10;

/// Age of the oldest pending event (ms) that triggers an automatic flush.
pub const DEFAULT_FLUSH_INTERVAL_MS: i64 = 10_000;

/// Quiet period (ms) after a failed flush during which auto flushes are skipped.
pub const DEFAULT_RETRY_BACKOFF_MS: i64 = 10_000;

/// Period (ms) of the auto-flush ticker once the service is ready.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 3_000;

/// Maximum number of events kept on the device. Appends beyond this are dropped.
pub const DEFAULT_LOCAL_EVENT_LIMIT: i64 = 10_000;
