//! Expectations: declared rules about how often a job should run or how
//! promptly an alert path should be acknowledged.
//!
//! An expectation's identity, type, and timing constraints are fixed at
//! creation; only the enable flag changes afterwards. Type-specific options
//! live in an opaque `params_json` column and are parsed on demand, so a
//! malformed document degrades one expectation instead of the whole table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum allowed `expected_interval_s`. Anything tighter than one minute is
/// below the checker's resolution and almost certainly a typo.
pub const MIN_EXPECTED_INTERVAL_S: i64 = 60;

/// The two kinds of expectation rewire can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectationKind {
    /// A periodic job that reports `start`/`end` observations.
    Schedule,
    /// A one-way alert delivery path proven by synthetic trials.
    AlertPath,
}

impl ExpectationKind {
    /// Stable string form used in the database and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::AlertPath => "alert_path",
        }
    }
}

impl std::fmt::Display for ExpectationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExpectationKind {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(Self::Schedule),
            "alert_path" => Ok(Self::AlertPath),
            other => Err(ParamsError::UnknownKind(other.to_string())),
        }
    }
}

/// Constraints for `schedule` expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleParams {
    /// Longest a single run may take before `longrun` opens. 0 disables.
    #[serde(default)]
    pub max_runtime_s: i64,

    /// Minimum gap between a run's start and the previous run's end before
    /// `spacing` opens. 0 disables.
    #[serde(default)]
    pub min_spacing_s: i64,

    /// When false, a second `start` with no intervening `end` opens `overlap`.
    #[serde(default)]
    pub allow_overlap: bool,
}

/// Constraints for `alert_path` expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPathParams {
    /// Seconds the receiver has to acknowledge a synthetic trial.
    pub ack_window_s: i64,

    /// Seconds of silence after which a new synthetic trial is issued.
    pub test_interval_s: i64,
}

/// Parsed type-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectationParams {
    Schedule(ScheduleParams),
    AlertPath(AlertPathParams),
}

impl ExpectationParams {
    /// Parse a `params_json` document for the given expectation kind.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError`] when the document is not valid JSON for the
    /// kind's parameter shape, or when a value is out of range.
    pub fn parse(kind: ExpectationKind, params_json: &str) -> Result<Self, ParamsError> {
        match kind {
            ExpectationKind::Schedule => {
                let params: ScheduleParams = serde_json::from_str(params_json)?;
                if params.max_runtime_s < 0 || params.min_spacing_s < 0 {
                    return Err(ParamsError::OutOfRange(
                        "max_runtime_s and min_spacing_s must be >= 0",
                    ));
                }
                Ok(Self::Schedule(params))
            }
            ExpectationKind::AlertPath => {
                let params: AlertPathParams = serde_json::from_str(params_json)?;
                if params.ack_window_s <= 0 || params.test_interval_s <= 0 {
                    return Err(ParamsError::OutOfRange(
                        "ack_window_s and test_interval_s must be > 0",
                    ));
                }
                Ok(Self::AlertPath(params))
            }
        }
    }
}

/// Errors raised while interpreting expectation fields.
#[derive(Debug, Error)]
pub enum ParamsError {
    /// The stored or submitted type string is not a known kind.
    #[error("unknown expectation type: {0}")]
    UnknownKind(String),

    /// `params_json` is not valid JSON for the expected shape.
    #[error("invalid params_json: {0}")]
    Json(#[from] serde_json::Error),

    /// A parameter value violates its documented range.
    #[error("invalid params: {0}")]
    OutOfRange(&'static str),
}

/// A declared expectation as stored.
#[derive(Debug, Clone, Serialize)]
pub struct Expectation {
    /// URL-safe, unguessable id; doubles as the observe-endpoint capability.
    pub id: String,
    pub kind: ExpectationKind,
    /// Display name used in notifications.
    pub name: String,
    /// Opaque destination handed to the notifier (an email address for the
    /// email channel).
    pub owner_contact: String,
    /// Expected seconds between run starts (or between path proofs).
    pub expected_interval_s: i64,
    /// Grace period added to `expected_interval_s` and to ack windows.
    pub tolerance_s: i64,
    /// Raw type-specific options; parse with [`Expectation::params`].
    pub params_json: String,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Expectation {
    /// Parse this expectation's type-specific parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError`] when the stored `params_json` is malformed;
    /// callers treat that as a `config_error` condition, not a panic.
    pub fn params(&self) -> Result<ExpectationParams, ParamsError> {
        ExpectationParams::parse(self.kind, &self.params_json)
    }

    /// The lateness threshold for `missed`: expected interval plus tolerance.
    #[must_use]
    pub const fn missed_threshold_s(&self) -> i64 {
        self.expected_interval_s + self.tolerance_s
    }
}
