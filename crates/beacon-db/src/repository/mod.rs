//! # Repositories
//!
//! - [`event`] - Pending telemetry events (the event store)
//! - [`settings`] - Durable key-value settings

pub mod event;
pub mod settings;
