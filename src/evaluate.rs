//! Scoring the fused tremor timeline against clinical annotations.
//!
//! An annotation file lists activity intervals with a severity grade. A window
//! is ground-truth tremor when its center falls inside an interval whose
//! activity is a tremor task and whose grade is above zero.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

use crate::analyzer::TremorAnalysis;
use crate::recording::{csv_reader, parse_timestamp};

#[derive(Error, Debug)]
pub enum EvaluateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Annotation file is empty")]
    Empty,
    #[error("Annotation file has no '{0}' column")]
    MissingColumn(&'static str),
}

/// One annotated activity interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub activity: String,
    pub grade: f64,
}

impl Annotation {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Accepted header names per field, Spanish first.
const START: &[&str] = &["inicio", "start"];
const END: &[&str] = &["fin", "end"];
const ACTIVITY: &[&str] = &["actividad", "activity"];
const GRADE: &[&str] = &["grado", "grade"];

fn column(names: &csv::StringRecord, aliases: &[&'static str]) -> Option<usize> {
    names
        .iter()
        .position(|n| aliases.iter().any(|a| n.eq_ignore_ascii_case(a)))
}

/// Time-of-day cells are placed on `reference_date`; full date-times are kept.
fn parse_annotation_time(raw: &str, reference_date: NaiveDate) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(time) = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f") {
        return Some(reference_date.and_time(time));
    }
    parse_timestamp(raw)
}

/// Parse annotation CSV text. Rows with unparsable times are skipped; a missing
/// or unparsable grade counts as 0.
pub fn parse_annotations(text: &str, reference_date: NaiveDate) -> Result<Vec<Annotation>, EvaluateError> {
    let mut reader = csv_reader(text);
    let names = reader.headers()?.clone();
    if names.is_empty() {
        return Err(EvaluateError::Empty);
    }

    let start = column(&names, START).ok_or(EvaluateError::MissingColumn("inicio"))?;
    let end = column(&names, END).ok_or(EvaluateError::MissingColumn("fin"))?;
    let activity = column(&names, ACTIVITY);
    let grade = column(&names, GRADE);

    let mut annotations = Vec::new();
    let mut skipped = 0usize;
    for row in reader.into_records() {
        let Ok(cells) = row else {
            skipped += 1;
            continue;
        };
        let times = (
            cells.get(start).and_then(|c| parse_annotation_time(c, reference_date)),
            cells.get(end).and_then(|c| parse_annotation_time(c, reference_date)),
        );
        let (Some(start_time), Some(end_time)) = times else {
            skipped += 1;
            continue;
        };
        annotations.push(Annotation {
            start: start_time,
            end: end_time,
            activity: activity
                .and_then(|i| cells.get(i))
                .map(str::to_string)
                .unwrap_or_default(),
            grade: grade
                .and_then(|i| cells.get(i))
                .and_then(|c| c.parse::<f64>().ok())
                .filter(|g| g.is_finite())
                .unwrap_or(0.0),
        });
    }

    if skipped > 0 {
        log::warn!("Skipped {} unreadable annotation rows", skipped);
    }
    annotations.sort_by(|a, b| a.start.cmp(&b.start));
    Ok(annotations)
}

/// Load an annotation file. Files may be Latin-1 encoded.
pub fn load_annotations(path: &Path, reference_date: NaiveDate) -> Result<Vec<Annotation>, EvaluateError> {
    let bytes = std::fs::read(path)?;
    let annotations = parse_annotations(&String::from_utf8_lossy(&bytes), reference_date)?;
    log::info!("Loaded {} annotations from {}", annotations.len(), path.display());
    Ok(annotations)
}

/// Ground-truth tremor flag for each window center.
pub fn ground_truth(
    window_times: &[NaiveDateTime],
    annotations: &[Annotation],
    activities: &[String],
) -> Vec<bool> {
    let relevant: Vec<&Annotation> = annotations
        .iter()
        .filter(|a| a.grade > 0.0)
        .filter(|a| {
            let label = a.activity.trim();
            activities.iter().any(|act| act.trim().eq_ignore_ascii_case(label))
        })
        .collect();

    window_times
        .iter()
        .map(|&t| relevant.iter().any(|a| a.contains(t)))
        .collect()
}

/// Binary confusion matrix, tremor as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[bool], predicted: &[bool]) -> Self {
        assert_eq!(
            truth.len(),
            predicted.len(),
            "truth and predictions must have the same length"
        );
        let mut m = Self::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t, p) {
                (true, true) => m.true_positive += 1,
                (false, true) => m.false_positive += 1,
                (false, false) => m.true_negative += 1,
                (true, false) => m.false_negative += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }
}

/// Score an analysis' fused timeline against annotations.
pub fn evaluate(
    analysis: &TremorAnalysis,
    annotations: &[Annotation],
    activities: &[String],
) -> ConfusionMatrix {
    let truth = ground_truth(&analysis.window_times, annotations, activities);
    ConfusionMatrix::from_predictions(&truth, &analysis.timeline)
}
