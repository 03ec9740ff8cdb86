//! Observations: the append-only evidence log.
//!
//! Instrumented jobs POST these; the store stamps `observed_at` itself so a
//! client with a skewed clock cannot rewrite history. Rows are never updated
//! or deleted, and `observed_at` is non-decreasing within one expectation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the opaque `meta` payload of one observation.
pub const MAX_META_BYTES: usize = 4096;

/// What an instrumented event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// A run began.
    Start,
    /// A run finished.
    End,
    /// Liveness signal with no run semantics (also stamped when a synthetic
    /// trial is issued).
    Ping,
    /// A receiver confirmed it saw an alert.
    Ack,
}

impl ObservationKind {
    /// Stable string form used in the database and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Ping => "ping",
            Self::Ack => "ack",
        }
    }
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObservationKind {
    type Err = UnknownObservationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            "ping" => Ok(Self::Ping),
            "ack" => Ok(Self::Ack),
            other => Err(UnknownObservationKind(other.to_string())),
        }
    }
}

/// The submitted kind string is not one of `start|end|ping|ack`.
#[derive(Debug, Error)]
#[error("kind must be start|end|ping|ack, got {0:?}")]
pub struct UnknownObservationKind(pub String);

/// One row of the evidence log.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    /// Insert-order sequence number; the primary ordering of the log.
    pub seq: i64,
    pub expectation_id: String,
    pub kind: ObservationKind,
    /// Epoch seconds, stamped by the store at insert.
    pub observed_at: i64,
    /// Opaque payload supplied by the client, at most [`MAX_META_BYTES`].
    pub meta: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ObservationKind::Start,
            ObservationKind::End,
            ObservationKind::Ping,
            ObservationKind::Ack,
        ] {
            assert_eq!(kind.as_str().parse::<ObservationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_names_the_contract() {
        let err = "begin".parse::<ObservationKind>().unwrap_err();
        assert!(err.to_string().contains("start|end|ping|ack"));
    }
}
