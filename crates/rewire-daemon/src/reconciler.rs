//! Per-expectation reconciliation between evaluator verdicts and the ledger.
//!
//! One call per expectation per tick: read the observation snapshot, ask the
//! evaluator what should be true, then make the ledger agree. Closes commit
//! before opens so a violation that flaps within one tick is recorded as a
//! closed row followed by a fresh open row, never two open rows.
//!
//! Notification delivery is best-effort and time-bounded. A failed delivery
//! leaves `last_notified_at` untouched, which is exactly what makes the next
//! tick retry it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use rewire_core::notify::{Message, NotifierStack};
use rewire_core::rules::{self, OpenVerdict, Verdict};
use rewire_core::{Clock, Expectation, ExpectationParams, Violation, ViolationCode};

use crate::store::{Store, StoreError};
use crate::trials::TrialManager;

/// How many observations the evaluator sees per tick. Enough to cover the
/// handful of starts/ends the rules inspect even on chatty expectations.
const EVALUATION_WINDOW: usize = 80;

/// How many recent trials the alert-path evaluator sees per tick.
const TRIAL_WINDOW: usize = 20;

/// Tunables the reconciler takes from daemon configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Re-notify an open violation after this many seconds; 0 disables.
    pub renotify_after_s: i64,
    /// Hard deadline for one notification delivery attempt.
    pub delivery_deadline: Duration,
}

/// Applies evaluator verdicts to the store and emits notifications.
pub struct Reconciler {
    store: Store,
    trials: TrialManager,
    notifier: Arc<NotifierStack>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Store,
        trials: TrialManager,
        notifier: Arc<NotifierStack>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            trials,
            notifier,
            clock,
            config,
        }
    }

    /// Reconcile one expectation against the current evidence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the ledger cannot be read or written; the
    /// checker logs it and moves on to the next expectation.
    pub async fn reconcile(&self, exp: &Expectation) -> Result<(), StoreError> {
        let now = self.clock.now();

        let params = match exp.params() {
            Ok(params) => {
                self.store
                    .close_violations(&exp.id, &[ViolationCode::ConfigError])?;
                params
            }
            Err(e) => {
                // Unreadable params mean no rule can be evaluated honestly;
                // record that as its own violation and skip this tick.
                warn!(expectation_id = %exp.id, error = %e, "params unreadable; skipping rules");
                let open = OpenVerdict {
                    code: ViolationCode::ConfigError,
                    message: format!("Stored params_json cannot be parsed: {e}."),
                    evidence: json!({
                        "error": e.to_string(),
                        "params_json": exp.params_json,
                    }),
                };
                self.apply_open(exp, &open, now).await?;
                return Ok(());
            }
        };

        match params {
            ExpectationParams::Schedule(schedule) => {
                let history = self.store.recent_observations(&exp.id, EVALUATION_WINDOW)?;
                let verdict = rules::evaluate_schedule(exp, &schedule, &history, now);
                self.apply_verdict(exp, &verdict, now).await?;
            }
            ExpectationParams::AlertPath(alert) => {
                let last_observation = self.store.last_observation_at(&exp.id, None)?;
                let trials = self.store.recent_trials(&exp.id, TRIAL_WINDOW)?;
                let out =
                    rules::evaluate_alert_path(exp, &alert, last_observation, &trials, now);

                // Expire overdue trials before the ledger reflects no_ack.
                for trial_id in &out.trials_to_expire {
                    self.trials.expire(trial_id)?;
                }

                self.apply_verdict(exp, &out.verdict, now).await?;

                if out.should_issue_trial {
                    let issued = self.trials.issue(&exp.id)?;
                    self.send_trial_notification(exp, &issued.trial_id, &issued.ack_url)
                        .await;
                }
            }
        }

        Ok(())
    }

    /// Close-before-open application of one verdict.
    async fn apply_verdict(
        &self,
        exp: &Expectation,
        verdict: &Verdict,
        now: i64,
    ) -> Result<(), StoreError> {
        if !verdict.to_close.is_empty() {
            self.store.close_violations(&exp.id, &verdict.to_close)?;
        }
        for open in &verdict.to_open {
            self.apply_open(exp, open, now).await?;
        }
        Ok(())
    }

    /// Ensure one open violation exists for `open.code`, notifying on first
    /// detection and on the renotify schedule.
    async fn apply_open(
        &self,
        exp: &Expectation,
        open: &OpenVerdict,
        now: i64,
    ) -> Result<(), StoreError> {
        match self.store.open_violation(&exp.id, open.code)? {
            None => {
                let violation = self.store.create_violation(
                    &exp.id,
                    open.code,
                    &open.message,
                    &open.evidence,
                )?;
                self.notify_violation(exp, &violation).await
            }
            Some(existing) => {
                // Renotifications carry the original evidence: the row is the
                // fact we alerted on, not a view of the latest state.
                let due = existing.last_notified_at.map_or(true, |notified_at| {
                    self.config.renotify_after_s > 0
                        && now - notified_at >= self.config.renotify_after_s
                });
                if due {
                    self.notify_violation(exp, &existing).await?;
                }
                Ok(())
            }
        }
    }

    /// Deliver a violation notification; on full success, record it.
    async fn notify_violation(
        &self,
        exp: &Expectation,
        violation: &Violation,
    ) -> Result<(), StoreError> {
        let message = render_violation(exp, violation);
        let delivered = tokio::time::timeout(
            self.config.delivery_deadline,
            self.notifier.deliver(&exp.owner_contact, &message),
        )
        .await;

        match delivered {
            Ok(Ok(())) => self.store.mark_notified(violation.id),
            Ok(Err(e)) => {
                warn!(
                    expectation_id = %exp.id,
                    code = %violation.code,
                    error = %e,
                    "violation notification failed; will retry next tick"
                );
                Ok(())
            }
            Err(_) => {
                warn!(
                    expectation_id = %exp.id,
                    code = %violation.code,
                    "violation notification timed out; will retry next tick"
                );
                Ok(())
            }
        }
    }

    /// Deliver the synthetic-test notification for a freshly issued trial.
    /// Best-effort: an undelivered test simply expires unacked, which is the
    /// violation the trial exists to surface.
    async fn send_trial_notification(&self, exp: &Expectation, trial_id: &str, ack_url: &str) {
        let message = render_trial(exp, trial_id, ack_url, self.clock.now());
        let delivered = tokio::time::timeout(
            self.config.delivery_deadline,
            self.notifier.deliver(&exp.owner_contact, &message),
        )
        .await;

        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(expectation_id = %exp.id, trial_id, error = %e, "trial notification failed");
            }
            Err(_) => {
                warn!(expectation_id = %exp.id, trial_id, "trial notification timed out");
            }
        }
    }
}

/// Render a violation into subject/body/webhook payload.
fn render_violation(exp: &Expectation, violation: &Violation) -> Message {
    let detected = chrono::DateTime::from_timestamp(violation.detected_at, 0)
        .map_or_else(|| violation.detected_at.to_string(), |t| t.to_rfc3339());
    let evidence_pretty = serde_json::to_string_pretty(&violation.evidence)
        .unwrap_or_else(|_| violation.evidence.to_string());

    Message {
        subject: format!("[rewire] VIOLATION {}: {}", violation.code, exp.name),
        body: format!(
            "Rewire detected an expectation violation.\n\n\
             Name: {}\n\
             Type: {}\n\
             Code: {}\n\
             Detected: {detected}\n\
             Message: {}\n\n\
             Evidence:\n{evidence_pretty}\n\n\
             Rewire reports only mismatches it can justify with evidence.\n",
            exp.name, exp.kind, violation.code, violation.message
        ),
        payload: json!({
            "expectation_id": exp.id,
            "name": exp.name,
            "type": exp.kind,
            "code": violation.code,
            "message": violation.message,
            "evidence": violation.evidence,
            "detected_at": violation.detected_at,
        }),
    }
}

/// Render the synthetic alert-path test message.
fn render_trial(exp: &Expectation, trial_id: &str, ack_url: &str, sent_at: i64) -> Message {
    Message {
        subject: format!("[rewire] Alert-path test: {}", exp.name),
        body: format!(
            "This is a synthetic rewire alert-path test.\n\n\
             Path: {}\n\
             Expectation ID: {}\n\
             To acknowledge delivery, open this link:\n\
             {ack_url}\n\n\
             If no ack is received in time, rewire will open a violation.\n",
            exp.name, exp.id
        ),
        payload: json!({
            "event": "trial_issued",
            "expectation_id": exp.id,
            "name": exp.name,
            "type": exp.kind,
            "trial_id": trial_id,
            "ack_url": ack_url,
            "sent_at": sent_at,
        }),
    }
}
