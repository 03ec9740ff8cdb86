//! Alert trials: synthetic alerts injected to prove a delivery path works.
//!
//! A trial's status forms a small DAG: `pending` moves to exactly one of
//! `acked` or `expired` and never moves again. Acked implies a recorded
//! `acked_at`; expired implies there is none.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a synthetic alert trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Sent, waiting for the receiver to follow the ack link.
    Pending,
    /// Acknowledged within the window; the path is proven.
    Acked,
    /// The ack window (plus tolerance) elapsed with no acknowledgement.
    Expired,
}

impl TrialStatus {
    /// Stable string form used in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acked => "acked",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrialStatus {
    type Err = UnknownTrialStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "acked" => Ok(Self::Acked),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownTrialStatus(other.to_string())),
        }
    }
}

/// A stored trial status string is not one of the known states.
#[derive(Debug, Error)]
#[error("unknown trial status: {0:?}")]
pub struct UnknownTrialStatus(pub String);

/// One synthetic alert trial.
#[derive(Debug, Clone, Serialize)]
pub struct AlertTrial {
    /// Unguessable URL-safe id; doubles as the ack-endpoint capability.
    pub id: String,
    pub expectation_id: String,
    /// Epoch seconds when the trial notification was issued.
    pub sent_at: i64,
    /// Epoch seconds of acknowledgement, only when status is `acked`.
    pub acked_at: Option<i64>,
    pub status: TrialStatus,
}

impl AlertTrial {
    /// Seconds since this trial was sent.
    #[must_use]
    pub const fn age_s(&self, now: i64) -> i64 {
        now - self.sent_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [TrialStatus::Pending, TrialStatus::Acked, TrialStatus::Expired] {
            assert_eq!(status.as_str().parse::<TrialStatus>().unwrap(), status);
        }
        assert!("sent".parse::<TrialStatus>().is_err());
    }

    #[test]
    fn test_age() {
        let trial = AlertTrial {
            id: "t".into(),
            expectation_id: "e".into(),
            sent_at: 100,
            acked_at: None,
            status: TrialStatus::Pending,
        };
        assert_eq!(trial.age_s(500), 400);
    }
}
