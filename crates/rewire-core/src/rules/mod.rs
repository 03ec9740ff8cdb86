//! The rule evaluator: pure verdicts over observation history.
//!
//! Given an expectation, its observation history (newest first), and the
//! current time, decide per violation code whether it should be open (with
//! the evidence that justifies it) or closed. The evaluator performs no I/O
//! and holds no state; everything it needs arrives in its arguments, which is
//! what makes its behavior property-testable and reproducible.
//!
//! # Verdict shape
//!
//! For each code the evaluator emits exactly one of *open*, *close*, or
//! nothing. "Nothing" means the evidence supports no opinion either way - for
//! example `missed` when no start was ever observed: we cannot claim a job is
//! late if we have never seen it run.
//!
//! All threshold comparisons that open a violation are strict: an age exactly
//! equal to `expected_interval_s + tolerance_s` is not yet missed, a run of
//! exactly `max_runtime_s` is not yet long-running, and a gap of exactly
//! `min_spacing_s` is legal spacing.

use serde_json::json;

use crate::expectation::{AlertPathParams, Expectation, ScheduleParams};
use crate::observation::{Observation, ObservationKind};
use crate::trial::{AlertTrial, TrialStatus};
use crate::violation::ViolationCode;

/// A code the evaluator wants open, with the facts that justify it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenVerdict {
    pub code: ViolationCode,
    /// Human-readable rendering of the evidence.
    pub message: String,
    /// Structured evidence payload stored on the violation row.
    pub evidence: serde_json::Value,
}

/// The evaluator's output for one expectation at one instant.
///
/// `to_open` and `to_close` are disjoint by construction: each code is
/// decided exactly once per call.
#[derive(Debug, Clone, Default)]
pub struct Verdict {
    pub to_open: Vec<OpenVerdict>,
    pub to_close: Vec<ViolationCode>,
}

impl Verdict {
    fn open(&mut self, code: ViolationCode, message: String, evidence: serde_json::Value) {
        self.to_open.push(OpenVerdict {
            code,
            message,
            evidence,
        });
    }

    fn close(&mut self, code: ViolationCode) {
        self.to_close.push(code);
    }

    /// Whether this verdict wants `code` open.
    #[must_use]
    pub fn wants_open(&self, code: ViolationCode) -> bool {
        self.to_open.iter().any(|v| v.code == code)
    }

    /// Whether this verdict wants `code` closed.
    #[must_use]
    pub fn wants_close(&self, code: ViolationCode) -> bool {
        self.to_close.contains(&code)
    }
}

/// Verdict for an alert-path expectation, including trial lifecycle actions.
#[derive(Debug, Clone, Default)]
pub struct AlertPathVerdict {
    pub verdict: Verdict,
    /// Whether the reconciler should issue a fresh synthetic trial.
    pub should_issue_trial: bool,
    /// Pending trials whose ack window (plus tolerance) has elapsed.
    pub trials_to_expire: Vec<String>,
}

/// Evaluate the schedule rules for one expectation.
///
/// `history` is the observation log newest first, as returned by the store.
/// Codes are decided in a fixed order: `missed`, `longrun`, `overlap`,
/// `spacing`.
#[must_use]
pub fn evaluate_schedule(
    exp: &Expectation,
    params: &ScheduleParams,
    history: &[Observation],
    now: i64,
) -> Verdict {
    let mut verdict = Verdict::default();

    let last_start = history.iter().find(|o| o.kind == ObservationKind::Start);

    // missed: without a start we have no evidence either way.
    if let Some(start) = last_start {
        let age = now - start.observed_at;
        let threshold = exp.missed_threshold_s();
        if age > threshold {
            verdict.open(
                ViolationCode::Missed,
                format!(
                    "Expected a start within {}s (+{}s); last start was {age}s ago.",
                    exp.expected_interval_s, exp.tolerance_s
                ),
                json!({
                    "last_start_at": start.observed_at,
                    "age_s": age,
                    "expected_s": exp.expected_interval_s,
                    "tolerance_s": exp.tolerance_s,
                }),
            );
        } else {
            verdict.close(ViolationCode::Missed);
        }
    }

    let end_after_start = last_start.and_then(|start| {
        history
            .iter()
            .find(|o| o.kind == ObservationKind::End && o.observed_at >= start.observed_at)
    });
    let running = last_start.is_some() && end_after_start.is_none();

    // longrun: only meaningful while a run is in flight.
    if params.max_runtime_s > 0 && running {
        // `running` implies a start exists.
        let start = last_start.map_or(0, |s| s.observed_at);
        let running_for = now - start;
        if running_for > params.max_runtime_s {
            verdict.open(
                ViolationCode::Longrun,
                format!(
                    "Run exceeded max_runtime_s={}; running for {running_for}s.",
                    params.max_runtime_s
                ),
                json!({
                    "start_at": start,
                    "running_for_s": running_for,
                    "max_runtime_s": params.max_runtime_s,
                }),
            );
        } else {
            verdict.close(ViolationCode::Longrun);
        }
    } else {
        // Not running, or the check is disabled: nothing can justify an open
        // longrun, so clear any stale one.
        verdict.close(ViolationCode::Longrun);
    }

    // overlap: a second start with no end between it and the newest start.
    if params.allow_overlap || !running {
        verdict.close(ViolationCode::Overlap);
    } else if let Some(start) = last_start {
        let second_start = history
            .iter()
            .filter(|o| o.kind == ObservationKind::Start)
            .nth(1);
        let prev_end = history
            .iter()
            .find(|o| o.kind == ObservationKind::End && o.observed_at < start.observed_at);

        let overlapping = second_start.is_some_and(|s2| {
            s2.observed_at < start.observed_at
                && prev_end.is_none_or(|e| s2.observed_at >= e.observed_at)
        });

        if overlapping {
            let s2 = second_start.map_or(0, |s| s.observed_at);
            verdict.open(
                ViolationCode::Overlap,
                "Detected overlapping runs.".to_string(),
                json!({
                    "newest_start_at": start.observed_at,
                    "other_start_at": s2,
                }),
            );
        } else {
            verdict.close(ViolationCode::Overlap);
        }
    }

    // spacing: judged only on a completed run; while a run is in flight the
    // previous verdict stands.
    if params.min_spacing_s == 0 {
        verdict.close(ViolationCode::Spacing);
    } else if let (Some(start), Some(_end)) = (last_start, end_after_start) {
        let prev_end = history
            .iter()
            .find(|o| o.kind == ObservationKind::End && o.observed_at < start.observed_at);
        let too_close = prev_end.map(|e| start.observed_at - e.observed_at);

        match too_close {
            Some(gap) if gap < params.min_spacing_s => {
                verdict.open(
                    ViolationCode::Spacing,
                    format!(
                        "Start occurred {gap}s after previous end; min_spacing_s={}.",
                        params.min_spacing_s
                    ),
                    json!({
                        "gap_s": gap,
                        "min_spacing_s": params.min_spacing_s,
                        "prev_end_at": prev_end.map(|e| e.observed_at),
                        "start_at": start.observed_at,
                    }),
                );
            }
            _ => verdict.close(ViolationCode::Spacing),
        }
    }

    verdict
}

/// Evaluate the alert-path rules for one expectation.
///
/// `trials` is the expectation's recent trial history newest first; the
/// pending subset drives expiry, while the newest trial's outcome decides
/// whether an open `no_ack` may close. `last_observation_at` is the newest
/// observation of *any* kind - pings from trial issuance reset the test timer
/// on purpose, so a path that just proved itself is not immediately re-tested.
#[must_use]
pub fn evaluate_alert_path(
    exp: &Expectation,
    params: &AlertPathParams,
    last_observation_at: Option<i64>,
    trials: &[AlertTrial],
    now: i64,
) -> AlertPathVerdict {
    let mut out = AlertPathVerdict {
        should_issue_trial: last_observation_at.is_none_or(|t| now - t >= params.test_interval_s),
        ..AlertPathVerdict::default()
    };

    let ack_deadline = params.ack_window_s + exp.tolerance_s;
    let mut newest_expired: Option<&AlertTrial> = None;
    for trial in trials
        .iter()
        .filter(|t| t.status == TrialStatus::Pending && t.age_s(now) > ack_deadline)
    {
        out.trials_to_expire.push(trial.id.clone());
        if newest_expired.is_none_or(|prev| trial.sent_at > prev.sent_at) {
            newest_expired = Some(trial);
        }
    }

    if let Some(trial) = newest_expired {
        // Several trials expiring at once still justify one open violation
        // (single-open-per-code); cite the newest as evidence.
        out.verdict.open(
            ViolationCode::NoAck,
            format!(
                "No ACK received within {}s (+{}s).",
                params.ack_window_s, exp.tolerance_s
            ),
            json!({
                "trial_id": trial.id,
                "sent_at": trial.sent_at,
                "age_s": trial.age_s(now),
            }),
        );
    } else if trials.first().is_some_and(|t| t.status == TrialStatus::Acked) {
        // Only a fresh acknowledgement proves the path works again; an open
        // no_ack outlives expired trials and newly issued pending ones.
        out.verdict.close(ViolationCode::NoAck);
    }

    out
}
