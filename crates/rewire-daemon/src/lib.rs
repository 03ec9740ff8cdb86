//! rewire-daemon library crate.
//!
//! Exposes the daemon's components so integration tests can drive them
//! against real stores without going through the binary:
//!
//! - [`store`]: SQLite persistence for the four entities.
//! - [`trials`]: synthetic alert-trial lifecycle.
//! - [`reconciler`]: per-expectation diff between evaluator verdicts and the
//!   violation ledger.
//! - [`checker`]: the periodic loop that runs the reconciler.
//! - [`invariants`]: live-store audit of the ledger invariants.
//! - [`http`]: the axum surface for observations, acks, and admin commands.
//! - [`config`]: daemon flags and notifier selection.

pub mod checker;
pub mod config;
pub mod http;
pub mod invariants;
pub mod reconciler;
pub mod store;
pub mod token;
pub mod trials;
