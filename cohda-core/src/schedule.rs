//! Operation schedules and catalogue entries.

use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// One candidate power curve for a unit over the planning horizon, one
/// value per interval. Treated as immutable once built.
pub type OperationSchedule = Array1<f64>;

/// Identifier of an operation schedule within one agent's private
/// catalogue. Not globally unique; two agents may both offer a schedule 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ScheduleId(pub u32);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalogue entry of a unit model.
///
/// The utility value is carried through the protocol for future selection
/// heuristics; the planner does not read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PossibleSchedule {
    pub sid: ScheduleId,
    pub utility: f64,
    pub os: OperationSchedule,
}

impl PossibleSchedule {
    pub fn new(sid: ScheduleId, utility: f64, os: OperationSchedule) -> Self {
        Self { sid, utility, os }
    }
}

/// A unit's finite, ordered catalogue. The order is significant: the
/// planner seeds from the first entry and scans in list order.
pub type PossibleSchedules = Vec<PossibleSchedule>;
