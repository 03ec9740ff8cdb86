//! Runtime audit of the ledger invariants.
//!
//! These checks re-derive, from the store alone, the properties the engine is
//! supposed to maintain: at most one open violation per `(expectation, code)`,
//! consistent trial states, a monotonic observation log, and agreement
//! between the evaluator's verdict and the set of open violations. Run via
//! `rewire-daemon --verify-invariants` against a live database, or from the
//! test suite after driving scenarios.

use serde_json::json;

use rewire_core::rules::{self, Verdict};
use rewire_core::{Clock, ExpectationParams, TrialStatus, ViolationCode};

use crate::store::{Store, StoreError};

/// Outcome of one invariant check.
#[derive(Debug, Clone)]
pub struct InvariantReport {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub evidence: Option<serde_json::Value>,
}

impl InvariantReport {
    fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            evidence: None,
        }
    }

    fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        evidence: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            evidence: Some(evidence),
        }
    }
}

/// Run every invariant check against the store.
///
/// # Errors
///
/// Returns [`StoreError`] when the store cannot be read at all; individual
/// violations of invariants are reported, not raised.
pub fn audit(store: &Store, clock: &dyn Clock) -> Result<Vec<InvariantReport>, StoreError> {
    let mut reports = Vec::new();
    check_single_open_per_code(store, &mut reports)?;
    check_trial_states(store, &mut reports)?;
    check_observation_monotonicity(store, &mut reports)?;
    check_verdict_alignment(store, clock, &mut reports)?;
    Ok(reports)
}

/// Counts of passed and failed reports.
#[must_use]
pub fn tally(reports: &[InvariantReport]) -> (usize, usize) {
    let passed = reports.iter().filter(|r| r.passed).count();
    (passed, reports.len() - passed)
}

/// At any instant there is at most one open row per `(expectation, code)`.
fn check_single_open_per_code(
    store: &Store,
    reports: &mut Vec<InvariantReport>,
) -> Result<(), StoreError> {
    let duplicates = store.duplicate_open_violations()?;
    if duplicates.is_empty() {
        reports.push(InvariantReport::pass(
            "single_open_per_code",
            "no duplicate open violations",
        ));
    } else {
        for (expectation_id, code, count) in duplicates {
            reports.push(InvariantReport::fail(
                format!("single_open_per_code:{expectation_id}:{code}"),
                format!("{count} open rows for one code"),
                json!({ "expectation_id": expectation_id, "code": code, "open_count": count }),
            ));
        }
    }
    Ok(())
}

/// Acked trials carry an ack stamp no earlier than issue; expired trials
/// carry none.
fn check_trial_states(store: &Store, reports: &mut Vec<InvariantReport>) -> Result<(), StoreError> {
    for trial in store.all_trials()? {
        match trial.status {
            TrialStatus::Acked => {
                let consistent = trial.acked_at.is_some_and(|at| at >= trial.sent_at);
                if consistent {
                    reports.push(InvariantReport::pass(
                        format!("acked_has_timestamp:{}", trial.id),
                        "acked trial has a consistent acked_at",
                    ));
                } else {
                    reports.push(InvariantReport::fail(
                        format!("acked_has_timestamp:{}", trial.id),
                        "acked trial without a valid acked_at",
                        json!({ "trial_id": trial.id, "sent_at": trial.sent_at, "acked_at": trial.acked_at }),
                    ));
                }
            }
            TrialStatus::Expired => {
                if trial.acked_at.is_none() {
                    reports.push(InvariantReport::pass(
                        format!("expired_not_acked:{}", trial.id),
                        "expired trial has no acked_at",
                    ));
                } else {
                    reports.push(InvariantReport::fail(
                        format!("expired_not_acked:{}", trial.id),
                        "expired trial carries an acked_at",
                        json!({ "trial_id": trial.id, "acked_at": trial.acked_at }),
                    ));
                }
            }
            TrialStatus::Pending => {}
        }
    }
    Ok(())
}

/// Per expectation, `observed_at` never decreases along the log.
fn check_observation_monotonicity(
    store: &Store,
    reports: &mut Vec<InvariantReport>,
) -> Result<(), StoreError> {
    for exp in store.list_enabled()? {
        let observations = store.recent_observations(&exp.id, 1000)?;
        // Newest first, so stamps must be non-increasing in this order.
        let monotonic = observations.windows(2).all(|w| w[0].observed_at >= w[1].observed_at);
        if monotonic {
            reports.push(InvariantReport::pass(
                format!("observation_monotonic:{}", exp.id),
                format!("{} observations checked", observations.len()),
            ));
        } else {
            reports.push(InvariantReport::fail(
                format!("observation_monotonic:{}", exp.id),
                "observation stamps regress",
                json!({ "expectation_id": exp.id }),
            ));
        }
    }
    Ok(())
}

/// Immediately after a tick, a code has an open violation iff the evaluator
/// says it should. Codes the evaluator has no opinion on are unconstrained.
fn check_verdict_alignment(
    store: &Store,
    clock: &dyn Clock,
    reports: &mut Vec<InvariantReport>,
) -> Result<(), StoreError> {
    let now = clock.now();
    for exp in store.list_enabled()? {
        let verdict = match exp.params() {
            Ok(ExpectationParams::Schedule(schedule)) => {
                let history = store.recent_observations(&exp.id, 1000)?;
                rules::evaluate_schedule(&exp, &schedule, &history, now)
            }
            Ok(ExpectationParams::AlertPath(alert)) => {
                let last_observation = store.last_observation_at(&exp.id, None)?;
                let trials = store.recent_trials(&exp.id, 1000)?;
                rules::evaluate_alert_path(&exp, &alert, last_observation, &trials, now).verdict
            }
            Err(_) => continue,
        };

        align_code_reports(store, &exp.id, &verdict, reports)?;
    }
    Ok(())
}

fn align_code_reports(
    store: &Store,
    expectation_id: &str,
    verdict: &Verdict,
    reports: &mut Vec<InvariantReport>,
) -> Result<(), StoreError> {
    for code in [
        ViolationCode::Missed,
        ViolationCode::Longrun,
        ViolationCode::Overlap,
        ViolationCode::Spacing,
        ViolationCode::NoAck,
    ] {
        let should_be_open = if verdict.wants_open(code) {
            true
        } else if verdict.wants_close(code) {
            false
        } else {
            continue;
        };

        let has_open = store.open_violation(expectation_id, code)?.is_some();
        if should_be_open == has_open {
            reports.push(InvariantReport::pass(
                format!("verdict_alignment:{expectation_id}:{code}"),
                "ledger matches evaluator verdict",
            ));
        } else {
            reports.push(InvariantReport::fail(
                format!("verdict_alignment:{expectation_id}:{code}"),
                format!("should_be_open={should_be_open}, has_open={has_open}"),
                json!({
                    "expectation_id": expectation_id,
                    "code": code,
                    "should_be_open": should_be_open,
                    "has_open": has_open,
                }),
            ));
        }
    }
    Ok(())
}
