//! Orientation-sensor recordings: data model, CSV ingestion and file discovery.

use crate::{ANNOTATION_PREFIX, SUPPORTED_EXTENSIONS};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::StringRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Empty file")]
    Empty,
    #[error("Missing column: {0}")]
    MissingColumn(&'static str),
    #[error("No usable rows")]
    NoRows,
    #[error("Timestamps must be strictly increasing (sample {0})")]
    NonIncreasing(usize),
}

/// One row of the sensor log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
}

/// Rotational axis of the orientation sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Yaw,
    Pitch,
    Roll,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Yaw, Axis::Pitch, Axis::Roll];

    fn read(self, sample: &Sample) -> f64 {
        match self {
            Axis::Yaw => sample.yaw,
            Axis::Pitch => sample.pitch,
            Axis::Roll => sample.roll,
        }
    }
}

/// A complete, immutable recording with strictly increasing timestamps.
#[derive(Debug, Clone)]
pub struct Recording {
    samples: Vec<Sample>,
    sample_rate: u32,
}

impl Recording {
    /// Validate `samples` and estimate the sampling rate from their timestamps.
    pub fn new(samples: Vec<Sample>) -> Result<Self, RecordingError> {
        check_increasing(&samples)?;
        let timestamps: Vec<NaiveDateTime> = samples.iter().map(|s| s.timestamp).collect();
        let sample_rate = estimate_sample_rate(&timestamps);
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Validate `samples` with a caller-supplied sampling rate (floored at 1 Hz).
    pub fn with_sample_rate(samples: Vec<Sample>, sample_rate: u32) -> Result<Self, RecordingError> {
        check_increasing(&samples)?;
        Ok(Self {
            samples,
            sample_rate: sample_rate.max(1),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    /// Copy one rotational axis out as an owned channel.
    pub fn channel(&self, axis: Axis) -> Vec<f64> {
        self.samples.iter().map(|s| axis.read(s)).collect()
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.samples.first().map(|s| s.timestamp)
    }

    /// Wall-clock span from first to last sample.
    pub fn duration_secs(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => {
                (last.timestamp - first.timestamp).num_microseconds().unwrap_or(0) as f64 / 1e6
            }
            _ => 0.0,
        }
    }
}

fn check_increasing(samples: &[Sample]) -> Result<(), RecordingError> {
    match samples
        .windows(2)
        .position(|w| w[1].timestamp <= w[0].timestamp)
    {
        Some(i) => Err(RecordingError::NonIncreasing(i + 1)),
        None => Ok(()),
    }
}

/// `round(1 / mean positive delta)`, floored at 1 Hz; 1 Hz when no positive delta exists.
pub fn estimate_sample_rate(timestamps: &[NaiveDateTime]) -> u32 {
    let deltas: Vec<f64> = timestamps
        .windows(2)
        .filter_map(|w| (w[1] - w[0]).num_microseconds())
        .map(|us| us as f64 / 1e6)
        .filter(|d| *d > 0.0)
        .collect();
    if deltas.is_empty() {
        return 1;
    }
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    let rate = (1.0 / mean).round();
    if rate.is_finite() && rate >= 1.0 {
        rate.min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

/// Parse `HH:MM:SS[.fff]` (placed on 1970-01-01) or a full date-time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(time) = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f") {
        return NaiveDate::from_ymd_opt(1970, 1, 1).map(|d| d.and_time(time));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Column names, matched case-insensitively.
const COLUMNS: [&str; 7] = ["Timestamp", "Yaw", "Pitch", "Roll", "Ax", "Ay", "Az"];

/// CSV reader shared by sensor logs and annotation sheets. Quoted cells may
/// hold commas, fields are trimmed and ragged rows are let through.
pub(crate) fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes())
}

/// Parse sensor-log text into clean samples.
///
/// The last row is dropped (the logger may leave it half written), rows with
/// unparsable cells are skipped, and rows that do not advance the clock are
/// discarded.
pub fn parse_csv(text: &str) -> Result<Vec<Sample>, RecordingError> {
    let mut reader = csv_reader(text);
    let header = reader.headers()?.clone();
    if header.is_empty() {
        return Err(RecordingError::Empty);
    }

    let mut index = [0usize; 7];
    for (slot, column) in index.iter_mut().zip(COLUMNS) {
        *slot = header
            .iter()
            .position(|n| n.eq_ignore_ascii_case(column))
            .ok_or(RecordingError::MissingColumn(column))?;
    }

    let mut rows: Vec<Result<StringRecord, csv::Error>> = reader.into_records().collect();
    rows.pop();

    let mut samples: Vec<Sample> = Vec::with_capacity(rows.len());
    let mut malformed = 0usize;
    let mut out_of_order = 0usize;

    for row in rows {
        let Some(sample) = row.ok().and_then(|r| parse_row(&r, &index)) else {
            malformed += 1;
            continue;
        };
        if let Some(prev) = samples.last() {
            if sample.timestamp <= prev.timestamp {
                out_of_order += 1;
                continue;
            }
        }
        samples.push(sample);
    }

    if malformed > 0 {
        log::debug!("Skipped {} malformed rows", malformed);
    }
    if out_of_order > 0 {
        log::warn!("Dropped {} rows with non-increasing timestamps", out_of_order);
    }
    if samples.is_empty() {
        return Err(RecordingError::NoRows);
    }
    Ok(samples)
}

fn parse_row(cells: &StringRecord, index: &[usize; 7]) -> Option<Sample> {
    let number = |i: usize| -> Option<f64> {
        cells
            .get(index[i])
            .and_then(|c| c.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };
    Some(Sample {
        timestamp: parse_timestamp(cells.get(index[0])?)?,
        yaw: number(1)?,
        pitch: number(2)?,
        roll: number(3)?,
        ax: number(4)?,
        ay: number(5)?,
        az: number(6)?,
    })
}

/// Load a recording from a sensor-log CSV file.
pub fn load_csv(path: &Path) -> Result<Recording, RecordingError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let samples = parse_csv(&text)?;
    let recording = Recording::new(samples)?;
    log::debug!(
        "Loaded {}: {} samples at {} Hz",
        path.display(),
        recording.len(),
        recording.sample_rate()
    );
    Ok(recording)
}

fn is_annotation_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(ANNOTATION_PREFIX))
}

/// Collect recording files under `paths` (files or directories), sorted.
/// Annotation files are skipped.
pub fn discover(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) && !is_annotation_file(entry.path()) {
                found.push(entry.into_path());
            }
        }
    }
    found.sort();
    found.dedup();
    found
}

/// Annotation file expected next to a recording: `Notas_<file name>`.
pub fn annotation_path(recording: &Path) -> PathBuf {
    let name = recording
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    recording.with_file_name(format!("{}{}", ANNOTATION_PREFIX, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("motiometrics-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    const LOG: &str = "Timestamp, Yaw ,Pitch,Roll,Ax,Ay,Az\n\
        10:00:00.000,1.0,2.0,3.0,0.1,0.2,0.3\n\
        10:00:00.020, 1.5 ,2.5,3.5,0.1,0.2,0.3\n\
        10:00:00.040,abc,2.5,3.5,0.1,0.2,0.3\n\
        10:00:00.010,9,9,9,9,9,9\n\
        10:00:00.060,2.0,3.0,4.0,0.1,0.2,0.3\n\
        10:00:00.080,2.0,3.0,4.0,0.1,0.2\n";

    #[test]
    fn test_parse_csv_cleans_rows() {
        let samples = parse_csv(LOG).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].timestamp, at(10, 0, 0, 0));
        assert_eq!(samples[1].yaw, 1.5);
        assert_eq!(samples[2].timestamp, at(10, 0, 0, 60));
        assert_eq!(samples[2].roll, 4.0);
    }

    #[test]
    fn test_parse_csv_missing_column() {
        let err = parse_csv("Timestamp,Yaw,Pitch,Ax,Ay,Az\n1,2,3,4,5,6\n").unwrap_err();
        assert!(matches!(err, RecordingError::MissingColumn("Roll")));
        assert!(matches!(parse_csv(""), Err(RecordingError::Empty)));
        assert!(matches!(
            parse_csv("Timestamp,Yaw,Pitch,Roll,Ax,Ay,Az\n10:00:00,1,2,3,4,5,6\n"),
            Err(RecordingError::NoRows)
        ));
    }

    #[test]
    fn test_parse_csv_quoted_cells() {
        let log = "Timestamp,Nota,Yaw,Pitch,Roll,Ax,Ay,Az\n\
            10:00:00.000,\"sentado, mano izq\",1,2,3,4,5,6\n\
            \"10:00:00.020\",plain,7,8,9,4,5,6\n\
            10:00:00.040,\"a,b,c\",1,2,3,4,5\n";
        let samples = parse_csv(log).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].yaw, 1.0);
        assert_eq!(samples[0].az, 6.0);
        assert_eq!(samples[1].timestamp, at(10, 0, 0, 20));
        assert_eq!(samples[1].roll, 9.0);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("10:00:01"), Some(at(10, 0, 1, 0)));
        assert_eq!(parse_timestamp(" 10:00:01.250 "), Some(at(10, 0, 1, 250)));
        let full = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(8, 30, 0, 500)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-05 08:30:00.5"), Some(full));
        assert_eq!(parse_timestamp("2024-03-05T08:30:00.500"), Some(full));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_estimate_sample_rate() {
        let ts: Vec<_> = (0..100).map(|i| at(0, 0, 0, 0) + chrono::Duration::milliseconds(i * 20)).collect();
        assert_eq!(estimate_sample_rate(&ts), 50);
        assert_eq!(estimate_sample_rate(&ts[..1]), 1);
        assert_eq!(estimate_sample_rate(&[]), 1);

        let slow = [at(0, 0, 0, 0), at(0, 0, 5, 0)];
        assert_eq!(estimate_sample_rate(&slow), 1);
    }

    #[test]
    fn test_recording_validates_order() {
        let sample = |ms| Sample {
            timestamp: at(0, 0, 0, ms),
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            ax: 0.0,
            ay: 0.0,
            az: 0.0,
        };
        let err = Recording::new(vec![sample(0), sample(20), sample(20)]).unwrap_err();
        assert!(matches!(err, RecordingError::NonIncreasing(2)));

        let rec = Recording::new(vec![sample(0), sample(20), sample(40)]).unwrap();
        assert_eq!(rec.sample_rate(), 50);
        assert_eq!(rec.channel(Axis::Pitch), vec![0.0; 3]);
        assert!((rec.duration_secs() - 0.04).abs() < 1e-9);

        let rec = Recording::with_sample_rate(vec![sample(0)], 0).unwrap();
        assert_eq!(rec.sample_rate(), 1);
    }

    #[test]
    fn test_load_csv_latin1() {
        let dir = scratch_dir("load");
        let path = dir.join("session.csv");
        let mut bytes = b"Timestamp,Yaw,Pitch,Roll,Ax,Ay,Az,Nota\n".to_vec();
        for i in 0..10 {
            bytes.extend_from_slice(format!("10:00:00.{:03},1,2,3,4,5,6,", i * 20).as_bytes());
            bytes.push(0xE9); // 'é' in Latin-1
            bytes.push(b'\n');
        }
        std::fs::write(&path, bytes).unwrap();

        let rec = load_csv(&path).unwrap();
        assert_eq!(rec.len(), 9);
        assert_eq!(rec.sample_rate(), 50);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_discover_skips_annotations() {
        let dir = scratch_dir("discover");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        for name in ["a.csv", "Notas_a.csv", "readme.txt", "nested/b.CSV"] {
            std::fs::write(dir.join(name), "x").unwrap();
        }

        let found = discover(&[dir.clone()]);
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.CSV"]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_annotation_path() {
        assert_eq!(
            annotation_path(Path::new("/data/p01/session.csv")),
            PathBuf::from("/data/p01/Notas_session.csv")
        );
    }
}
