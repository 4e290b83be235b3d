//! Core data model for the cohda negotiation engine.
//!
//! This crate holds everything the gossip protocol agrees *about*: the
//! immutable [`SystemConfig`] and [`Candidate`] structures with their merge
//! semantics, the [`Objective`] that scores a joint selection against a
//! target curve, the schedule catalogue types, and the [`UnitModel`] trait
//! through which unit agents obtain their private catalogues.
//!
//! The two shared structures follow a strict identity discipline: every
//! mutating operation returns a fresh instance behind a new `Arc`, while a
//! merge that changes nothing returns a clone of the *original* `Arc`.
//! Callers use `Arc::ptr_eq` as a cheap "did anything change?" predicate,
//! so the merge implementations must guarantee that value equality of a
//! merge result with its left input implies pointer identity.

pub mod candidate;
pub mod error;
pub mod model;
pub mod objective;
pub mod schedule;
pub mod sysconf;

pub use candidate::Candidate;
pub use error::{CohdaError, Result};
pub use model::UnitModel;
pub use objective::Objective;
pub use schedule::{OperationSchedule, PossibleSchedule, PossibleSchedules, ScheduleId};
pub use sysconf::SystemConfig;
