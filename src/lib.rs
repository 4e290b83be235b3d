//! cohda: distributed heuristic selection of unit operation schedules.
//!
//! A cluster of autonomous unit agents picks one operation schedule each
//! from its private catalogue so that the point-wise sum of the selected
//! schedules tracks a shared target curve. Agreement is reached with the
//! COHDA gossip heuristic: agents exchange immutable snapshots of "who
//! chose what" over a small-world topology and monotonically improve a
//! shared candidate solution until the network quiesces.
//!
//! The workspace splits into:
//!
//! - [`cohda_core`] — the immutable data model and merge semantics
//! - [`cohda_engine`] — planner, controller, observer, topology
//! - [`cohda_net`] — the TCP process boundary
//! - [`cohda_units`] — unit models and session input files
//!
//! The re-exports below cover the common embedded use: build an
//! [`Engine`] over a set of unit models and run negotiations against it.

pub use cohda_core::{
    Candidate, CohdaError, Objective, OperationSchedule, PossibleSchedule, ScheduleId,
    SystemConfig, UnitModel,
};
pub use cohda_engine::{
    Engine, EngineConfig, JsonSink, MemorySink, MessageCounter, Observer, ResultSink,
    TopologyManager, UnitAgent,
};
pub use cohda_net::{Host, NetConnector, RemoteAgent, RemoteObserver};
pub use cohda_units::{load_target_curve, FileCatalogue, StaticModel};
