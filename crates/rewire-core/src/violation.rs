//! Violations: evidence-backed assertions that a constraint is breached.
//!
//! A violation row is immutable apart from two fields: `is_open` flips to
//! false exactly once when later evidence shows the breach has ended, and
//! `last_notified_at` tracks delivery. A recurrence opens a fresh row; the
//! closed one stays as history with its original evidence intact.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The enumerated violation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// No run start within the expected interval plus tolerance.
    Missed,
    /// A run has been going longer than `max_runtime_s`.
    Longrun,
    /// Two runs are in flight although overlap is disallowed.
    Overlap,
    /// A run started sooner after the previous end than `min_spacing_s`.
    Spacing,
    /// A synthetic alert trial was not acknowledged in time.
    NoAck,
    /// The expectation's stored `params_json` cannot be parsed.
    ConfigError,
}

impl ViolationCode {
    /// Stable string form used in the database and notification payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missed => "missed",
            Self::Longrun => "longrun",
            Self::Overlap => "overlap",
            Self::Spacing => "spacing",
            Self::NoAck => "no_ack",
            Self::ConfigError => "config_error",
        }
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ViolationCode {
    type Err = UnknownViolationCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missed" => Ok(Self::Missed),
            "longrun" => Ok(Self::Longrun),
            "overlap" => Ok(Self::Overlap),
            "spacing" => Ok(Self::Spacing),
            "no_ack" => Ok(Self::NoAck),
            "config_error" => Ok(Self::ConfigError),
            other => Err(UnknownViolationCode(other.to_string())),
        }
    }
}

/// A stored violation code string is not one of the known codes.
#[derive(Debug, Error)]
#[error("unknown violation code: {0:?}")]
pub struct UnknownViolationCode(pub String);

/// One row of the violation ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub id: i64,
    pub expectation_id: String,
    pub code: ViolationCode,
    /// Epoch seconds when the reconciler first recorded the breach.
    pub detected_at: i64,
    /// Human-readable rendering of the evidence.
    pub message: String,
    /// The facts that justify this violation, as structured JSON.
    pub evidence: serde_json::Value,
    pub is_open: bool,
    /// Epoch seconds of the last successful notification, if any.
    pub last_notified_at: Option<i64>,
}
