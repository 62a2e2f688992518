use super::episodes::true_runs;
use super::filters::bandpass;
use chrono::NaiveDateTime;
use serde::Serialize;

/// A consolidated tremor interval on the fused timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    /// Peak of the combined band-limited amplitude over the episode.
    pub peak_amplitude: f64,
    /// First sample of the episode (inclusive).
    pub start_index: usize,
    /// Last sample of the episode (inclusive).
    pub end_index: usize,
}

impl Episode {
    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// Band-pass each axis into the tremor band and combine them as a Euclidean norm.
pub fn combined_amplitude(
    yaw: &[f64],
    pitch: &[f64],
    roll: &[f64],
    sample_rate: f64,
    low_hz: f64,
    high_hz: f64,
) -> Vec<f64> {
    assert!(
        yaw.len() == pitch.len() && pitch.len() == roll.len(),
        "axis channels must have equal length"
    );
    let y = bandpass(yaw, sample_rate, low_hz, high_hz);
    let p = bandpass(pitch, sample_rate, low_hz, high_hz);
    let r = bandpass(roll, sample_rate, low_hz, high_hz);

    y.iter()
        .zip(&p)
        .zip(&r)
        .map(|((y, p), r)| (y * y + p * p + r * r).sqrt())
        .collect()
}

/// Map each `true` run of the fused timeline back to samples and timestamps.
///
/// A run spans from half a window before its first center to half a window
/// after its last center, clamped to the recording. With overlapping windows
/// neighbouring spans can overlap; those are merged so episodes stay disjoint.
pub fn extract_episodes(
    timeline: &[bool],
    centers: &[usize],
    window_length: usize,
    timestamps: &[NaiveDateTime],
    rms: &[f64],
) -> Vec<Episode> {
    assert_eq!(timeline.len(), centers.len(), "one center per window");
    assert_eq!(timestamps.len(), rms.len(), "rms must be sample aligned");
    let Some(last) = timestamps.len().checked_sub(1) else {
        return Vec::new();
    };
    let half = window_length / 2;

    let mut spans: Vec<(usize, usize)> = Vec::new();
    for run in true_runs(timeline) {
        let start = centers[run.start].saturating_sub(half);
        let end = (centers[run.end() - 1] + half).min(last);
        match spans.last_mut() {
            Some(prev) if start <= prev.1 => {
                log::debug!(
                    "Merging overlapping episode {}..={} into {}..={}",
                    start,
                    end,
                    prev.0,
                    prev.1
                );
                prev.1 = prev.1.max(end);
            }
            _ => spans.push((start, end)),
        }
    }

    spans
        .into_iter()
        .filter_map(|(start_index, end_index)| {
            if end_index <= start_index {
                log::debug!(
                    "Dropping degenerate episode at samples {}..={}",
                    start_index,
                    end_index
                );
                return None;
            }
            let peak_amplitude = rms[start_index..=end_index]
                .iter()
                .copied()
                .fold(0.0, f64::max);
            Some(Episode {
                start_time: timestamps[start_index],
                end_time: timestamps[end_index],
                peak_amplitude,
                start_index,
                end_index,
            })
        })
        .collect()
}
