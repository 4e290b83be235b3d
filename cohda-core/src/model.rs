//! Pluggable schedule providers.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::schedule::{OperationSchedule, PossibleSchedules, ScheduleId};

/// Schedule provider backing one unit agent.
///
/// Implementations own whatever is needed to enumerate the unit's feasible
/// operation schedules for a planning horizon: a file catalogue, a
/// simulation model, or an in-memory list handed over by an external
/// system. Enumeration is CPU-only; providers must not block on IO longer
/// than reading local files.
pub trait UnitModel: Send + Sync {
    /// Enumerate the catalogue for the horizon given by `start`,
    /// `resolution` (seconds per interval) and `intervals`.
    ///
    /// Fails with [`crate::CohdaError::ScheduleUnavailable`] when the
    /// provider has nothing matching the request.
    fn generate_schedules(
        &self,
        start: DateTime<Utc>,
        resolution: u32,
        intervals: usize,
    ) -> Result<PossibleSchedules>;

    /// Look up a single schedule by id from the last enumeration.
    fn schedule(&self, sid: ScheduleId) -> Option<OperationSchedule>;
}
