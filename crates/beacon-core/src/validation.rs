//! # Event Validation
//!
//! Turns loosely-typed input (from the event bridge or the agent's stdin)
//! into an [`Event`].
//!
//! ## Rules
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────────────┐
//! │ Field        │ Rule                                                     │
//! ├──────────────┼──────────────────────────────────────────────────────────┤
//! │ name         │ required, trimmed, non-empty                             │
//! │ timestamp    │ missing or 0 → now; negative → rejected                  │
//! │ parameters   │ missing → empty map                                      │
//! │ id           │ always freshly generated                                 │
//! └──────────────┴──────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{Event, EventParams};

/// Event input before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub timestamp: Option<i64>,

    #[serde(default)]
    pub parameters: Option<EventParams>,
}

impl EventDraft {
    pub fn named(name: impl Into<String>) -> Self {
        EventDraft {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Validates the draft, filling defaults from `now` (ms since epoch).
    pub fn into_event(self, now: i64) -> Result<Event, ValidationError> {
        let name = validate_event_name(self.name.as_deref())?;

        let timestamp = match self.timestamp {
            None | Some(0) => now,
            Some(ts) if ts < 0 => return Err(ValidationError::InvalidTimestamp { value: ts }),
            Some(ts) => ts,
        };

        Ok(Event::new(name, timestamp).with_params(self.parameters.unwrap_or_default()))
    }
}

/// Returns the trimmed event name or `Required`.
pub fn validate_event_name(name: Option<&str>) -> Result<String, ValidationError> {
    match name.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed.to_string()),
        _ => Err(ValidationError::required("name")),
    }
}
