//! # rewire-core
//!
//! Core library for rewire - a service that verifies, from external evidence
//! alone, whether periodic jobs actually ran when expected and whether one-way
//! alert-delivery paths actually deliver.
//!
//! This crate holds everything that does not touch a database or a socket:
//!
//! - The data model: [`Expectation`], [`Observation`], [`AlertTrial`],
//!   [`Violation`] and their enumerations.
//! - The pure rule evaluator ([`rules`]): given an expectation, its
//!   observation history, and the current time, decide which violation codes
//!   should be open and which should close.
//! - The notification port ([`notify`]): a uniform sink for violation and
//!   trial messages with email, webhook, and stderr implementations.
//! - An injectable [`Clock`] so every time-dependent decision is testable.
//!
//! The daemon crate wires these to SQLite and an HTTP surface.

pub mod clock;
pub mod expectation;
pub mod notify;
pub mod observation;
pub mod rules;
pub mod trial;
pub mod violation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use expectation::{
    AlertPathParams, Expectation, ExpectationKind, ExpectationParams, ParamsError, ScheduleParams,
};
pub use observation::{Observation, ObservationKind, MAX_META_BYTES};
pub use trial::{AlertTrial, TrialStatus};
pub use violation::{Violation, ViolationCode};
