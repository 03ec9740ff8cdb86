//! Property tests over the whole engine: arbitrary interleavings of
//! observation appends, trial acks, clock advances, and checker ticks must
//! preserve the ledger invariants after every tick, and a tick must be
//! idempotent when nothing changed in between.

use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use rewire_core::notify::{Message, Notifier, NotifierStack, NotifyError};
use rewire_core::{Clock, ExpectationKind, ManualClock, ObservationKind};
use rewire_daemon::invariants;
use rewire_daemon::reconciler::{Reconciler, ReconcilerConfig};
use rewire_daemon::store::{NewExpectation, Store};
use rewire_daemon::trials::TrialManager;

/// Discards every message; property runs should not spam stderr.
struct NullNotifier;

#[async_trait::async_trait]
impl Notifier for NullNotifier {
    async fn deliver(&self, _destination: &str, _message: &Message) -> Result<(), NotifyError> {
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "null"
    }
}

#[derive(Debug, Clone)]
enum Op {
    Advance(i64),
    Observe(ObservationKind),
    AckNewestTrial,
    Tick,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1i64..120).prop_map(Op::Advance),
        3 => prop_oneof![
            Just(ObservationKind::Start),
            Just(ObservationKind::End),
            Just(ObservationKind::Ping),
            Just(ObservationKind::Ack),
        ]
        .prop_map(Op::Observe),
        1 => Just(Op::AckNewestTrial),
        3 => Just(Op::Tick),
    ]
}

fn arb_schedule_params() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just(0i64), 5i64..90],
        prop_oneof![Just(0i64), 5i64..90],
        any::<bool>(),
    )
        .prop_map(|(max_runtime_s, min_spacing_s, allow_overlap)| {
            serde_json::json!({
                "max_runtime_s": max_runtime_s,
                "min_spacing_s": min_spacing_s,
                "allow_overlap": allow_overlap,
            })
            .to_string()
        })
}

struct Engine {
    clock: Arc<ManualClock>,
    store: Store,
    trials: TrialManager,
    reconciler: Reconciler,
}

fn engine(schedule_params: &str) -> Engine {
    let clock = Arc::new(ManualClock::new(0));
    let store = Store::open_in_memory(clock.clone()).expect("in-memory store");

    store
        .create_expectation(&NewExpectation {
            id: "sched".into(),
            kind: ExpectationKind::Schedule,
            name: "generated-schedule".into(),
            owner_contact: "ops@example.com".into(),
            expected_interval_s: 60,
            tolerance_s: 10,
            params_json: schedule_params.into(),
        })
        .expect("schedule expectation");
    store
        .create_expectation(&NewExpectation {
            id: "path".into(),
            kind: ExpectationKind::AlertPath,
            name: "generated-path".into(),
            owner_contact: "oncall@example.com".into(),
            expected_interval_s: 3600,
            tolerance_s: 5,
            params_json: r#"{"ack_window_s":60,"test_interval_s":120}"#.into(),
        })
        .expect("alert-path expectation");

    let trials = TrialManager::new(store.clone(), "http://localhost:8080");
    let notifier = Arc::new(NotifierStack::new(vec![Box::new(NullNotifier)]));
    let reconciler = Reconciler::new(
        store.clone(),
        trials.clone(),
        notifier,
        clock.clone(),
        ReconcilerConfig {
            renotify_after_s: 0,
            delivery_deadline: std::time::Duration::from_secs(1),
        },
    );

    Engine {
        clock,
        store,
        trials,
        reconciler,
    }
}

async fn run_tick(engine: &Engine) -> Result<(), TestCaseError> {
    for exp in engine.store.list_enabled().expect("list enabled") {
        engine
            .reconciler
            .reconcile(&exp)
            .await
            .expect("reconcile");
    }

    let reports = invariants::audit(&engine.store, engine.clock.as_ref()).expect("audit");
    let (_, failed) = invariants::tally(&reports);
    if failed > 0 {
        let failures: Vec<_> = reports.iter().filter(|r| !r.passed).collect();
        return Err(TestCaseError::fail(format!(
            "invariants broken after tick at t={}: {failures:?}",
            engine.clock.now()
        )));
    }
    Ok(())
}

/// Snapshot of the ledger: (violation id, is_open) pairs plus trial states.
fn ledger_snapshot(engine: &Engine) -> Vec<(i64, bool)> {
    let mut snapshot = Vec::new();
    for exp_id in ["sched", "path"] {
        for violation in engine
            .store
            .recent_violations(exp_id, 100)
            .expect("violations")
        {
            snapshot.push((violation.id, violation.is_open));
        }
    }
    snapshot
}

fn run_case(schedule_params: &str, ops: &[Op]) -> Result<(), TestCaseError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");

    rt.block_on(async {
        let engine = engine(schedule_params);

        for op in ops {
            match op {
                Op::Advance(secs) => engine.clock.advance(*secs),
                Op::Observe(kind) => {
                    engine
                        .store
                        .append_observation("sched", *kind, None)
                        .expect("append");
                }
                Op::AckNewestTrial => {
                    let pending = engine.store.pending_trials("path").expect("pending");
                    if let Some(trial) = pending.first() {
                        engine.trials.ack(&trial.id).expect("ack");
                    }
                }
                Op::Tick => run_tick(&engine).await?,
            }
        }

        // Idempotence: with no intervening changes, a second tick leaves the
        // ledger exactly as the first did.
        run_tick(&engine).await?;
        let before = ledger_snapshot(&engine);
        run_tick(&engine).await?;
        let after = ledger_snapshot(&engine);
        if before != after {
            return Err(TestCaseError::fail(format!(
                "tick not idempotent: {before:?} != {after:?}"
            )));
        }

        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn interleavings_preserve_ledger_invariants(
        schedule_params in arb_schedule_params(),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        run_case(&schedule_params, &ops)?;
    }
}
