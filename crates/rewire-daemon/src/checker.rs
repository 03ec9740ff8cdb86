//! The checker loop: one cooperative task that periodically reconciles every
//! enabled expectation.
//!
//! A failure on one expectation is logged and contained; the rest of the tick
//! proceeds. Shutdown is cooperative: the loop notices the signal between
//! expectations and exits after finishing the one in flight, never
//! mid-reconciliation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::reconciler::Reconciler;
use crate::store::Store;

/// Periodic driver for the [`Reconciler`].
pub struct CheckerLoop {
    store: Store,
    reconciler: Arc<Reconciler>,
    check_every: Duration,
    shutdown: watch::Receiver<bool>,
}

impl CheckerLoop {
    #[must_use]
    pub fn new(
        store: Store,
        reconciler: Arc<Reconciler>,
        check_every: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            reconciler,
            check_every,
            shutdown,
        }
    }

    /// Run ticks until shutdown is signalled.
    pub async fn run(mut self) {
        info!(check_every_s = self.check_every.as_secs(), "checker loop started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.tick().await;

            tokio::select! {
                () = tokio::time::sleep(self.check_every) => {}
                _ = self.shutdown.changed() => {}
            }
        }
        info!("checker loop stopped");
    }

    /// Run one tick over every enabled expectation.
    ///
    /// Public so tests and the invariant audit can drive checks without the
    /// timing loop.
    pub async fn tick(&self) {
        let expectations = match self.store.list_enabled() {
            Ok(expectations) => expectations,
            Err(e) => {
                // A transient store failure costs one tick, not the loop.
                error!(error = %e, "could not enumerate expectations; skipping tick");
                return;
            }
        };

        debug!(count = expectations.len(), "tick started");
        for exp in expectations {
            if *self.shutdown.borrow() {
                info!("shutdown requested; stopping after current expectation");
                break;
            }
            if let Err(e) = self.reconciler.reconcile(&exp).await {
                warn!(
                    expectation_id = %exp.id,
                    error = %e,
                    "reconciliation failed; continuing with next expectation"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rewire_core::notify::{NotifierStack, StderrNotifier};
    use rewire_core::ManualClock;

    use super::*;
    use crate::reconciler::ReconcilerConfig;
    use crate::trials::TrialManager;

    fn test_loop(shutdown: watch::Receiver<bool>) -> CheckerLoop {
        let clock = Arc::new(ManualClock::new(0));
        let store = Store::open_in_memory(clock.clone()).unwrap();
        let trials = TrialManager::new(store.clone(), "http://localhost:8080");
        let notifier = Arc::new(NotifierStack::new(vec![Box::new(StderrNotifier)]));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            trials,
            notifier,
            clock,
            ReconcilerConfig {
                renotify_after_s: 0,
                delivery_deadline: Duration::from_secs(1),
            },
        ));
        CheckerLoop::new(store, reconciler, Duration::from_secs(3600), shutdown)
    }

    #[tokio::test]
    async fn test_run_exits_once_shutdown_is_signalled() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(test_loop(rx).run());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits promptly after shutdown")
            .expect("loop task does not panic");
    }

    #[tokio::test]
    async fn test_tick_on_empty_store_is_a_no_op() {
        let (_tx, rx) = watch::channel(false);
        let checker = test_loop(rx);
        checker.tick().await;
    }
}
