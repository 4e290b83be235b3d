//! In-memory schedule catalogues.

use chrono::{DateTime, Utc};
use cohda_core::{
    CohdaError, OperationSchedule, PossibleSchedule, PossibleSchedules, Result, ScheduleId,
    UnitModel,
};
use ndarray::Array1;

/// A unit model whose catalogue is handed over directly, the path external
/// systems use when schedules come from a co-simulation instead of files.
///
/// Schedule ids are the list positions; utilities are zero.
pub struct StaticModel {
    schedules: PossibleSchedules,
}

impl StaticModel {
    pub fn new(curves: Vec<Vec<f64>>) -> Self {
        let schedules = curves
            .into_iter()
            .enumerate()
            .map(|(i, curve)| {
                PossibleSchedule::new(ScheduleId(i as u32), 0.0, Array1::from(curve))
            })
            .collect();
        Self { schedules }
    }

    /// Build from pre-assembled catalogue entries, keeping their ids and
    /// utilities.
    pub fn from_entries(schedules: PossibleSchedules) -> Self {
        Self { schedules }
    }
}

impl UnitModel for StaticModel {
    fn generate_schedules(
        &self,
        _start: DateTime<Utc>,
        _resolution: u32,
        intervals: usize,
    ) -> Result<PossibleSchedules> {
        if self.schedules.is_empty() {
            return Err(CohdaError::ScheduleUnavailable(
                "static catalogue is empty".to_owned(),
            ));
        }
        if let Some(entry) = self.schedules.iter().find(|s| s.os.len() != intervals) {
            return Err(CohdaError::ScheduleUnavailable(format!(
                "schedule {} covers {} intervals, {} requested",
                entry.sid,
                entry.os.len(),
                intervals
            )));
        }
        Ok(self.schedules.clone())
    }

    fn schedule(&self, sid: ScheduleId) -> Option<OperationSchedule> {
        self.schedules
            .iter()
            .find(|s| s.sid == sid)
            .map(|s| s.os.clone())
    }
}
