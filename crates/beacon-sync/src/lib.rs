//! # beacon-sync: Delivery Pipeline for Beacon
//!
//! Background delivery of telemetry events and device profiles to a remote
//! collector, built so that the host application never waits on it.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Host app ──track()/set_endpoint()──┐    Event bridge (mpsc) ──┐      │
//! │                                      ▼                          ▼      │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │               TelemetryService (actor, service.rs)               │  │
//! │  │   readiness gate • light buffer • ticker • command queue         │  │
//! │  └──────┬──────────────────────┬──────────────────────┬─────────────┘  │
//! │         ▼                      ▼                      ▼                │
//! │  ┌────────────────┐  ┌──────────────────┐  ┌──────────────────────┐    │
//! │  │FlushCoordinator│  │ProfileReconciler │  │ RetryWorker          │    │
//! │  │ single-flight  │  │ permit, hints,   │  │ persisted counter,   │    │
//! │  │ batched drain  │  │ push + 1 retry   │  │ tiered wake delays   │    │
//! │  └───────┬────────┘  └────────┬─────────┘  └──────────────────────┘    │
//! │          ▼                    ▼                                         │
//! │  ┌──────────────────────────────────────┐   ┌──────────────────────┐   │
//! │  │ HttpCollector (DeliverySink +        │   │ beacon-db            │   │
//! │  │ ProfileSink), payload envelope       │   │ events + settings    │   │
//! │  └──────────────────────────────────────┘   └──────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`service`] - `TelemetryService` orchestrator and `TelemetryHandle`
//! - [`flush`] - Flush coordinator and auto-flush policy
//! - [`retry`] - Retry wake scheduling
//! - [`profile`] - Device profile reconciliation
//! - [`bridge`] - Bounded channel for externally produced events
//! - [`sink`] - Collector traits and the reqwest client
//! - [`codec`] - Payload encoders (base64, AES-GCM)
//! - [`device`], [`network`], [`clock`] - Host-provided collaborators
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Pipeline error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_sync::{event_bridge, StaticDeviceInfo, TelemetryConfig, TelemetryService};
//!
//! let config = TelemetryConfig::load_or_default(None);
//! let (bridge, bridge_rx) = event_bridge(config.queue.bridge_capacity);
//!
//! let handle = TelemetryService::new(config, database, Arc::new(device))
//!     .with_bridge(bridge_rx)
//!     .start()
//!     .await?;
//!
//! handle.set_endpoint("collector.example.com", true);
//! handle.track(Event::new("app_open", now));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bridge;
pub mod clock;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod flush;
pub mod network;
pub mod profile;
pub mod retry;
pub mod service;
pub mod sink;

// =============================================================================
// Re-exports
// =============================================================================

pub use bridge::{event_bridge, BridgeSender};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{AesGcmEncoder, Base64Encoder, Envelope, PayloadEncoder, PayloadEncoding};
pub use config::TelemetryConfig;
pub use device::{DeviceInfoSource, StaticDeviceInfo};
pub use error::{TelemetryError, TelemetryResult};
pub use flush::{FlushCoordinator, FlushOutcome, FlushPolicy, SkipReason};
pub use network::{AssumeOnline, NetworkFlag, NetworkMonitor};
pub use profile::{ProfileReconciler, ReconcileOutcome};
pub use retry::{RetryWorker, TokioWakeScheduler, WakeScheduler, WakeTarget};
pub use service::{
    CollectorFactory, Collectors, ServicePhase, ServiceStatus, TelemetryHandle, TelemetryService,
};
pub use sink::{CollectorEndpoint, DeliverySink, HttpCollector, ProfileSink};
