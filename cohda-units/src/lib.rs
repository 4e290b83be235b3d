//! Unit models and session input files.
//!
//! Provides the schedule providers a deployment plugs into its unit
//! agents: [`StaticModel`] for catalogues handed over in memory and
//! [`FileCatalogue`] for the CSV-with-JSON-header files units publish
//! their flexibility in. The [`target`] module reads the matching
//! target-curve files a negotiation optimizes against.

pub mod catalogue;
pub mod static_model;
pub mod target;

pub use catalogue::FileCatalogue;
pub use static_model::StaticModel;
pub use target::load_target_curve;
