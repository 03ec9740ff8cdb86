//! Synthetic alert-trial lifecycle.
//!
//! Issuing a trial writes two facts atomically enough for our purposes: a
//! `pending` trial row and a `ping` observation whose meta carries the ack
//! URL. The ping matters twice over - it is the delivery evidence trail, and
//! it resets the alert path's test-interval timer so a freshly tested path is
//! not immediately re-tested.

use serde_json::json;
use tracing::info;

use rewire_core::ObservationKind;

use crate::store::{Store, StoreError};
use crate::token::url_safe_token;

/// A freshly issued trial and the URL that acknowledges it.
#[derive(Debug, Clone)]
pub struct IssuedTrial {
    pub trial_id: String,
    pub ack_url: String,
}

/// Thin wrapper over the store for trial transitions.
#[derive(Clone)]
pub struct TrialManager {
    store: Store,
    base_url: String,
}

impl TrialManager {
    #[must_use]
    pub fn new(store: Store, base_url: &str) -> Self {
        Self {
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Issue a new trial for an alert-path expectation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when either write fails; a trial row without
    /// its ping is possible on a mid-issue crash and is harmless (it expires
    /// like any unacked trial).
    pub fn issue(&self, expectation_id: &str) -> Result<IssuedTrial, StoreError> {
        let trial_id = url_safe_token();
        let ack_url = format!("{}/ack/{trial_id}", self.base_url);

        self.store.create_trial(&trial_id, expectation_id)?;
        let meta = json!({ "trial_id": trial_id, "ack_url": ack_url }).to_string();
        self.store
            .append_observation(expectation_id, ObservationKind::Ping, Some(&meta))?;

        info!(expectation_id, trial_id = %trial_id, "synthetic trial issued");
        Ok(IssuedTrial { trial_id, ack_url })
    }

    /// Acknowledge a trial. True iff this call won the `pending -> acked`
    /// transition; re-acks and acks of expired trials return false.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn ack(&self, trial_id: &str) -> Result<bool, StoreError> {
        let acked = self.store.ack_trial(trial_id)?;
        if acked {
            info!(trial_id, "trial acknowledged");
        }
        Ok(acked)
    }

    /// Expire a pending trial; a no-op for resolved or unknown trials.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn expire(&self, trial_id: &str) -> Result<(), StoreError> {
        self.store.expire_trial(trial_id)?;
        info!(trial_id, "trial expired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rewire_core::{ExpectationKind, ManualClock, TrialStatus};

    use super::*;
    use crate::store::NewExpectation;

    fn setup() -> (Store, TrialManager) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Store::open_in_memory(clock).unwrap();
        store
            .create_expectation(&NewExpectation {
                id: "path-1".into(),
                kind: ExpectationKind::AlertPath,
                name: "pager-route".into(),
                owner_contact: "oncall@example.com".into(),
                expected_interval_s: 3600,
                tolerance_s: 0,
                params_json: r#"{"ack_window_s":300,"test_interval_s":3600}"#.into(),
            })
            .unwrap();
        let manager = TrialManager::new(store.clone(), "https://rewire.example.com/");
        (store, manager)
    }

    #[test]
    fn test_issue_writes_trial_and_ping() {
        let (store, manager) = setup();
        let issued = manager.issue("path-1").unwrap();

        assert_eq!(
            issued.ack_url,
            format!("https://rewire.example.com/ack/{}", issued.trial_id)
        );

        let pending = store.pending_trials("path-1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, issued.trial_id);
        assert_eq!(pending[0].sent_at, 1_000);

        let obs = store.recent_observations("path-1", 10).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].kind, ObservationKind::Ping);
        let meta: serde_json::Value =
            serde_json::from_str(obs[0].meta.as_deref().unwrap()).unwrap();
        assert_eq!(meta["trial_id"], issued.trial_id.as_str());
        assert_eq!(meta["ack_url"], issued.ack_url.as_str());
    }

    #[test]
    fn test_ack_wins_once() {
        let (store, manager) = setup();
        let issued = manager.issue("path-1").unwrap();

        assert!(manager.ack(&issued.trial_id).unwrap());
        assert!(!manager.ack(&issued.trial_id).unwrap());

        let trials = store.recent_trials("path-1", 10).unwrap();
        assert_eq!(trials[0].status, TrialStatus::Acked);
    }

    #[test]
    fn test_expire_then_ack_is_refused() {
        let (store, manager) = setup();
        let issued = manager.issue("path-1").unwrap();

        manager.expire(&issued.trial_id).unwrap();
        assert!(!manager.ack(&issued.trial_id).unwrap());

        let trials = store.recent_trials("path-1", 10).unwrap();
        assert_eq!(trials[0].status, TrialStatus::Expired);
        assert_eq!(trials[0].acked_at, None);
    }
}
