//! Target-curve files.
//!
//! Same framing as the schedule catalogues: line 1 is a JSON header, every
//! further line holds one `target,weight` pair of decimal floats.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use cohda_core::{CohdaError, Result};
use ndarray::Array1;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TargetHeader {
    interval_minutes: u32,
    #[serde(default)]
    #[allow(dead_code)]
    cols: Vec<String>,
}

/// Read a target curve and its weight vector.
///
/// The header's interval length must agree with `resolution` (seconds per
/// interval) and the file must hold exactly `intervals` data rows.
pub fn load_target_curve(
    path: impl AsRef<Path>,
    resolution: u32,
    intervals: usize,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let path = path.as_ref();
    if path.extension().is_some_and(|ext| ext == "xz") {
        return Err(CohdaError::Config(format!(
            "{}: compressed target files are not supported",
            path.display()
        )));
    }
    let mut reader = BufReader::new(File::open(path).map_err(|err| {
        CohdaError::Config(format!("target file {}: {err}", path.display()))
    })?);

    let mut header_line = String::new();
    reader.read_line(&mut header_line)?;
    let header: TargetHeader = serde_json::from_str(header_line.trim()).map_err(|err| {
        CohdaError::Config(format!("{}: bad target header: {err}", path.display()))
    })?;
    if header.interval_minutes * 60 != resolution {
        return Err(CohdaError::Config(format!(
            "{}: {} minute intervals but {}s resolution requested",
            path.display(),
            header.interval_minutes,
            resolution
        )));
    }

    let mut target = Vec::with_capacity(intervals);
    let mut weights = Vec::with_capacity(intervals);
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (value, weight) = line.split_once(',').ok_or_else(|| {
            CohdaError::Config(format!("{}: row {:?} is not a pair", path.display(), line))
        })?;
        let parse = |field: &str| -> Result<f64> {
            field.trim().parse().map_err(|err| {
                CohdaError::Config(format!("{}: bad value {field:?}: {err}", path.display()))
            })
        };
        target.push(parse(value)?);
        weights.push(parse(weight)?);
    }

    if target.len() != intervals {
        return Err(CohdaError::Config(format!(
            "{}: {} rows but {} intervals requested",
            path.display(),
            target.len(),
            intervals
        )));
    }

    Ok((Array1::from(target), Array1::from(weights)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_target(name: &str, header: &str, rows: &[&str]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("cohda-{name}-{}", std::process::id()));
        let mut file = File::create(&path).unwrap();
        writeln!(file, "{header}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        path
    }

    #[test]
    fn loads_values_and_weights() {
        let path = write_target(
            "target-ok.csv",
            r#"{"interval_minutes": 15, "cols": ["target", "weight"]}"#,
            &["1.0,1.0", "2.5,0.5"],
        );
        let (target, weights) = load_target_curve(&path, 900, 2).unwrap();
        assert_eq!(target.to_vec(), [1.0, 2.5]);
        assert_eq!(weights.to_vec(), [1.0, 0.5]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn a_resolution_mismatch_is_fatal() {
        let path = write_target(
            "target-res.csv",
            r#"{"interval_minutes": 60}"#,
            &["1.0,1.0"],
        );
        assert!(matches!(
            load_target_curve(&path, 900, 1),
            Err(CohdaError::Config(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn a_row_count_mismatch_is_fatal() {
        let path = write_target(
            "target-rows.csv",
            r#"{"interval_minutes": 15}"#,
            &["1.0,1.0"],
        );
        assert!(matches!(
            load_target_curve(&path, 900, 4),
            Err(CohdaError::Config(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn a_missing_file_is_a_config_error() {
        assert!(matches!(
            load_target_curve("/nonexistent/target.csv", 900, 4),
            Err(CohdaError::Config(_))
        ));
    }
}
