//! Shared harness for checker integration tests: a file-backed store, a
//! manual clock, and a recording notifier, wired into a real reconciler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use rewire_core::notify::{Message, Notifier, NotifierStack, NotifyError};
use rewire_core::{Expectation, ExpectationKind, ManualClock};
use rewire_daemon::invariants;
use rewire_daemon::reconciler::{Reconciler, ReconcilerConfig};
use rewire_daemon::store::{NewExpectation, Store};
use rewire_daemon::trials::TrialManager;

/// One captured delivery: destination and subject.
pub type Delivery = (String, String);

/// Notifier that records deliveries and can be told to fail its first N
/// attempts.
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<Delivery>>>,
    fail_first: usize,
    attempts: AtomicUsize,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, destination: &str, message: &Message) -> Result<(), NotifyError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(NotifyError::Smtp("induced failure".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), message.subject.clone()));
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Store,
    pub trials: TrialManager,
    pub reconciler: Reconciler,
    pub sent: Arc<Mutex<Vec<Delivery>>>,
    // Keeps the database directory alive for the test's duration.
    _dir: TempDir,
}

impl Harness {
    /// Harness with notifications always succeeding and renotify disabled.
    pub fn new() -> Self {
        Self::with_options(0, 0)
    }

    pub fn with_options(renotify_after_s: i64, fail_first_deliveries: usize) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(0));
        let store =
            Store::open(&dir.path().join("rewire.db"), clock.clone()).expect("open store");
        let trials = TrialManager::new(store.clone(), "http://localhost:8080");

        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(NotifierStack::new(vec![Box::new(RecordingNotifier {
            sent: Arc::clone(&sent),
            fail_first: fail_first_deliveries,
            attempts: AtomicUsize::new(0),
        })]));

        let reconciler = Reconciler::new(
            store.clone(),
            trials.clone(),
            notifier,
            clock.clone(),
            ReconcilerConfig {
                renotify_after_s,
                delivery_deadline: std::time::Duration::from_secs(5),
            },
        );

        Self {
            clock,
            store,
            trials,
            reconciler,
            sent,
            _dir: dir,
        }
    }

    pub fn schedule(&self, id: &str, expected: i64, tolerance: i64, params: &str) -> Expectation {
        self.store
            .create_expectation(&NewExpectation {
                id: id.into(),
                kind: ExpectationKind::Schedule,
                name: format!("job-{id}"),
                owner_contact: "ops@example.com".into(),
                expected_interval_s: expected,
                tolerance_s: tolerance,
                params_json: params.into(),
            })
            .expect("create schedule expectation")
    }

    pub fn alert_path(&self, id: &str, tolerance: i64, params: &str) -> Expectation {
        self.store
            .create_expectation(&NewExpectation {
                id: id.into(),
                kind: ExpectationKind::AlertPath,
                name: format!("path-{id}"),
                owner_contact: "oncall@example.com".into(),
                expected_interval_s: 3600,
                tolerance_s: tolerance,
                params_json: params.into(),
            })
            .expect("create alert-path expectation")
    }

    /// One checker tick over every enabled expectation, followed by a full
    /// invariant audit - open violations must match the evaluator's verdict
    /// right after a tick.
    pub async fn tick(&self) {
        for exp in self.store.list_enabled().expect("list enabled") {
            self.reconciler.reconcile(&exp).await.expect("reconcile");
        }

        let reports = invariants::audit(&self.store, self.clock.as_ref()).expect("audit");
        let (_, failed) = invariants::tally(&reports);
        let failures: Vec<_> = reports.iter().filter(|r| !r.passed).collect();
        assert_eq!(failed, 0, "invariant failures after tick: {failures:?}");
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.sent.lock().unwrap().clone()
    }
}
