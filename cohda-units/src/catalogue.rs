//! Schedule catalogue files.
//!
//! A catalogue file carries the feasible operation schedules of one unit
//! for one day: line 1 is a JSON header with the schedule start time, the
//! interval length in minutes and one column name per schedule; every
//! further line holds one comma-separated value per schedule.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cohda_core::{
    CohdaError, OperationSchedule, PossibleSchedule, PossibleSchedules, Result, ScheduleId,
    UnitModel,
};
use ndarray::Array1;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CatalogueHeader {
    start_time: DateTime<Utc>,
    interval_minutes: u32,
    cols: Vec<String>,
}

/// A unit model reading its schedules from catalogue files.
///
/// Enumeration scans every file and keeps those whose header matches the
/// requested start and resolution and whose row count matches the horizon.
/// Schedule ids number the accepted columns in discovery order across
/// files.
pub struct FileCatalogue {
    files: Vec<PathBuf>,
    by_sid: Mutex<HashMap<ScheduleId, OperationSchedule>>,
}

impl FileCatalogue {
    /// Use all `.csv` files in `dir`, or only the named ones if `names`
    /// is given.
    pub fn scan(dir: impl AsRef<Path>, names: Option<&[&str]>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CohdaError::Config(format!(
                "catalogue directory {} does not exist",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = match names {
            Some(names) => names.iter().map(|name| dir.join(name)).collect(),
            None => std::fs::read_dir(dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
                .collect(),
        };
        files.sort();
        Self::from_files(files)
    }

    pub fn from_files(files: Vec<PathBuf>) -> Result<Self> {
        for path in &files {
            if path.extension().is_some_and(|ext| ext == "xz") {
                return Err(CohdaError::Config(format!(
                    "{}: compressed catalogues are not supported",
                    path.display()
                )));
            }
            if !path.is_file() {
                return Err(CohdaError::Config(format!(
                    "catalogue file {} does not exist",
                    path.display()
                )));
            }
        }
        Ok(Self {
            files,
            by_sid: Mutex::new(HashMap::new()),
        })
    }

    fn read_columns(path: &Path, resolution: u32, intervals: usize, start: DateTime<Utc>)
        -> Result<Option<Vec<Vec<f64>>>> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header_line = String::new();
        reader.read_line(&mut header_line)?;
        let header: CatalogueHeader = serde_json::from_str(header_line.trim()).map_err(|err| {
            CohdaError::Config(format!("{}: bad catalogue header: {err}", path.display()))
        })?;

        if header.start_time != start || header.interval_minutes * 60 != resolution {
            return Ok(None);
        }

        let mut columns = vec![Vec::with_capacity(intervals); header.cols.len()];
        let mut rows = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows += 1;
            if rows > intervals {
                return Ok(None);
            }
            let values: Vec<&str> = line.trim().split(',').collect();
            if values.len() != columns.len() {
                return Err(CohdaError::Config(format!(
                    "{}: row {} has {} columns, header names {}",
                    path.display(),
                    rows,
                    values.len(),
                    columns.len()
                )));
            }
            for (column, value) in columns.iter_mut().zip(values) {
                let value: f64 = value.trim().parse().map_err(|err| {
                    CohdaError::Config(format!("{}: bad value {value:?}: {err}", path.display()))
                })?;
                column.push(value);
            }
        }

        if rows != intervals {
            return Ok(None);
        }
        Ok(Some(columns))
    }
}

impl UnitModel for FileCatalogue {
    fn generate_schedules(
        &self,
        start: DateTime<Utc>,
        resolution: u32,
        intervals: usize,
    ) -> Result<PossibleSchedules> {
        let mut schedules: PossibleSchedules = Vec::new();
        for path in &self.files {
            let Some(columns) = Self::read_columns(path, resolution, intervals, start)? else {
                continue;
            };
            debug!(path = %path.display(), columns = columns.len(), "catalogue file matched");
            for column in columns {
                let sid = ScheduleId(schedules.len() as u32);
                schedules.push(PossibleSchedule::new(sid, 0.0, Array1::from(column)));
            }
        }

        if schedules.is_empty() {
            return Err(CohdaError::ScheduleUnavailable(format!(
                "no catalogue among {} files matches {} at {}s resolution",
                self.files.len(),
                start,
                resolution
            )));
        }

        let mut by_sid = self.by_sid.lock();
        by_sid.clear();
        for entry in &schedules {
            by_sid.insert(entry.sid, entry.os.clone());
        }
        Ok(schedules)
    }

    fn schedule(&self, sid: ScheduleId) -> Option<OperationSchedule> {
        self.by_sid.lock().get(&sid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_catalogue(dir: &Path, name: &str, start: &str, rows: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"start_time": "{start}", "interval_minutes": 15, "cols": ["low", "high"]}}"#
        )
        .unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        path
    }

    fn tempdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cohda-cat-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn start() -> DateTime<Utc> {
        "2017-07-05T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn columns_become_schedules_in_discovery_order() {
        let dir = tempdir("cols");
        write_catalogue(&dir, "der0.csv", "2017-07-05T00:00:00+00:00", &["0.0,1.5", "0.0,2.5"]);

        let catalogue = FileCatalogue::scan(&dir, None).unwrap();
        let schedules = catalogue.generate_schedules(start(), 900, 2).unwrap();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].os.to_vec(), [0.0, 0.0]);
        assert_eq!(schedules[1].os.to_vec(), [1.5, 2.5]);
        assert_eq!(
            catalogue.schedule(ScheduleId(1)).unwrap().to_vec(),
            [1.5, 2.5]
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn mismatched_files_are_skipped() {
        let dir = tempdir("skip");
        // Wrong start date.
        write_catalogue(&dir, "der0.csv", "2017-07-06T00:00:00+00:00", &["0.0,1.5", "0.0,2.5"]);
        // Wrong row count.
        write_catalogue(&dir, "der1.csv", "2017-07-05T00:00:00+00:00", &["0.0,1.5"]);

        let catalogue = FileCatalogue::scan(&dir, None).unwrap();
        let result = catalogue.generate_schedules(start(), 900, 2);
        assert!(matches!(result, Err(CohdaError::ScheduleUnavailable(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn an_explicit_file_list_restricts_the_scan() {
        let dir = tempdir("list");
        write_catalogue(&dir, "der0.csv", "2017-07-05T00:00:00+00:00", &["0.0,1.0", "0.0,1.0"]);
        write_catalogue(&dir, "der1.csv", "2017-07-05T00:00:00+00:00", &["9.0,9.0", "9.0,9.0"]);

        let catalogue = FileCatalogue::scan(&dir, Some(&["der0.csv"])).unwrap();
        let schedules = catalogue.generate_schedules(start(), 900, 2).unwrap();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[1].os.to_vec(), [1.0, 1.0]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn compressed_catalogues_are_rejected() {
        let err = FileCatalogue::from_files(vec![PathBuf::from("der0.csv.xz")]);
        assert!(matches!(err, Err(CohdaError::Config(_))));
    }

    #[test]
    fn a_missing_directory_is_a_config_error() {
        let err = FileCatalogue::scan("/nonexistent/catalogues", None);
        assert!(matches!(err, Err(CohdaError::Config(_))));
    }
}
