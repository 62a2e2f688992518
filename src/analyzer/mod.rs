pub mod episodes;
pub mod filters;
pub mod frequency;
pub mod quantify;
pub mod spectral;
pub mod windows;

use crate::config::DetectionConfig;
use crate::recording::{load_csv, Axis, Recording, RecordingError};
use chrono::NaiveDateTime;
use frequency::{FrequencyProfile, Signals};
use indicatif::{ProgressBar, ProgressStyle};
use quantify::Episode;
use rayon::prelude::*;
use serde::Serialize;
use spectral::{SpectrumEstimate, WindowVerdict};
use std::path::{Path, PathBuf};
use thiserror::Error;
use windows::WindowPlan;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Recording error in {path}: {source}")]
    Recording {
        path: String,
        #[source]
        source: RecordingError,
    },
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Everything the pipeline derives from one recording.
#[derive(Debug, Clone, Serialize)]
pub struct TremorAnalysis {
    pub sample_rate: u32,
    pub duration_secs: f64,
    pub window_length: usize,
    pub window_step: usize,
    /// Center sample of every window.
    pub window_centers: Vec<usize>,
    /// Timestamp at every window center.
    pub window_times: Vec<NaiveDateTime>,
    /// Per-window verdicts after consolidation and fusion.
    pub yaw: Vec<WindowVerdict>,
    pub pitch: Vec<WindowVerdict>,
    pub roll: Vec<WindowVerdict>,
    /// Fused tremor flag per window.
    pub timeline: Vec<bool>,
    pub has_tremor: bool,
    /// Combined band-limited amplitude, one value per sample.
    pub rms: Vec<f64>,
    pub episodes: Vec<Episode>,
    pub frequency: FrequencyProfile,
}

/// Headline numbers of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub dominant_frequency: f64,
    pub psd_peak: f64,
    pub sample_rate: u32,
    pub has_tremor: bool,
    pub episode_count: usize,
    pub max_amplitude: f64,
    pub duration_secs: f64,
}

/// JSON view of an analysis with the per-sample channels decimated.
#[derive(Debug, Serialize)]
pub struct AnalysisExport<'a> {
    pub summary: AnalysisSummary,
    pub decimation: usize,
    pub time: Vec<NaiveDateTime>,
    pub rms: Vec<f64>,
    pub window_times: &'a [NaiveDateTime],
    pub timeline: &'a [bool],
    pub episode_frequencies: &'a [Option<f64>],
    pub spectrum: &'a SpectrumEstimate,
    pub episodes: &'a [Episode],
}

impl TremorAnalysis {
    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary {
            dominant_frequency: self.frequency.dominant_frequency,
            psd_peak: self.frequency.spectrum.peak_power(),
            sample_rate: self.sample_rate,
            has_tremor: self.has_tremor,
            episode_count: self.episodes.len(),
            max_amplitude: self
                .episodes
                .iter()
                .map(|e| e.peak_amplitude)
                .fold(0.0, f64::max),
            duration_secs: self.duration_secs,
        }
    }

    /// Build the export view; `timestamps` are the recording's sample times.
    pub fn export<'a>(&'a self, timestamps: &[NaiveDateTime]) -> AnalysisExport<'a> {
        let step = decimation_factor(timestamps.len());
        AnalysisExport {
            summary: self.summary(),
            decimation: step,
            time: timestamps.iter().step_by(step).copied().collect(),
            rms: self.rms.iter().step_by(step).copied().collect(),
            window_times: &self.window_times,
            timeline: &self.timeline,
            episode_frequencies: &self.frequency.episode_frequencies,
            spectrum: &self.frequency.spectrum,
            episodes: &self.episodes,
        }
    }
}

/// Keep roughly a thousand points of a long channel.
pub fn decimation_factor(len: usize) -> usize {
    if len < 1000 { 1 } else { len / 1000 }
}

/// Drift-filter one axis and classify each of its windows.
fn classify_axis(
    channel: &[f64],
    plan: WindowPlan,
    sample_rate: f64,
    config: &DetectionConfig,
) -> Vec<WindowVerdict> {
    let filtered = filters::highpass(channel, sample_rate, config.drift_cutoff_hz);
    plan.windows(&filtered)
        .map(|w| spectral::classify_window(w.samples, sample_rate, &config.classifier))
        .collect()
}

/// Run the detection pipeline on one recording.
///
/// Never fails: degenerate filters, spectra and episodes fall back to safe values.
pub fn analyze_recording(recording: &Recording, config: &DetectionConfig) -> TremorAnalysis {
    let sr = recording.sample_rate();
    let sample_rate = f64::from(sr);
    let plan = config.window_plan(sr);
    let timestamps = recording.timestamps();

    let channels: Vec<Vec<f64>> = Axis::ALL.iter().map(|&a| recording.channel(a)).collect();

    // Axes are independent until fusion.
    let mut verdicts: Vec<Vec<WindowVerdict>> = channels
        .par_iter()
        .map(|channel| classify_axis(channel, plan, sample_rate, config))
        .collect();

    let params = config.consolidation(&plan, sr);
    let mut flags: Vec<Vec<bool>> = verdicts
        .iter()
        .map(|axis| {
            let mut f: Vec<bool> = axis.iter().map(|v| v.is_tremor).collect();
            episodes::consolidate(&mut f, &params);
            f
        })
        .collect();
    let timeline = episodes::fuse(&mut flags);

    for (axis, cleaned) in verdicts.iter_mut().zip(&flags) {
        for (verdict, &flag) in axis.iter_mut().zip(cleaned) {
            verdict.is_tremor = flag;
        }
    }

    let window_centers = plan.centers(recording.len());
    let window_times = window_centers.iter().map(|&c| timestamps[c]).collect();

    let rms = quantify::combined_amplitude(
        &channels[0],
        &channels[1],
        &channels[2],
        sample_rate,
        config.tremor_band_low_hz,
        config.tremor_band_high_hz,
    );
    let episodes =
        quantify::extract_episodes(&timeline, &window_centers, plan.length, &timestamps, &rms);

    let signals = Signals {
        yaw: &channels[0],
        pitch: &channels[1],
        roll: &channels[2],
        timestamps: &timestamps,
        sample_rate,
    };
    let frequency = frequency::characterize(
        &signals,
        &episodes,
        config.frequency_highpass_hz,
        &config.classifier,
    );

    log::debug!(
        "{} windows, {} flagged, {} episodes, dominant {:.2} Hz",
        timeline.len(),
        timeline.iter().filter(|&&t| t).count(),
        episodes.len(),
        frequency.dominant_frequency
    );

    let mut verdicts = verdicts.into_iter();
    let (yaw, pitch, roll) = (
        verdicts.next().unwrap_or_default(),
        verdicts.next().unwrap_or_default(),
        verdicts.next().unwrap_or_default(),
    );

    TremorAnalysis {
        sample_rate: sr,
        duration_secs: recording.duration_secs(),
        window_length: plan.length,
        window_step: plan.step,
        window_centers,
        window_times,
        yaw,
        pitch,
        roll,
        has_tremor: timeline.iter().any(|&t| t),
        timeline,
        rms,
        episodes,
        frequency,
    }
}

/// One analyzed file.
pub struct RecordingReport {
    pub path: PathBuf,
    pub timestamps: Vec<NaiveDateTime>,
    pub analysis: TremorAnalysis,
}

pub struct AnalyzeResult {
    pub reports: Vec<RecordingReport>,
    pub analyzed: u64,
    pub failed: u64,
}

/// Load and analyze a single recording file.
pub fn analyze_file(path: &Path, config: &DetectionConfig) -> Result<RecordingReport, AnalyzeError> {
    log::debug!(
        "Analyzing: {}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );
    let recording = load_csv(path).map_err(|source| AnalyzeError::Recording {
        path: path.display().to_string(),
        source,
    })?;
    let analysis = analyze_recording(&recording, config);
    Ok(RecordingReport {
        path: path.to_path_buf(),
        timestamps: recording.timestamps(),
        analysis,
    })
}

/// Analyze many recordings in parallel on a pool of `jobs` threads.
///
/// Failures are logged and counted; they don't stop the batch.
pub fn analyze_files(
    paths: &[PathBuf],
    config: &DetectionConfig,
    jobs: usize,
) -> Result<AnalyzeResult, AnalyzeError> {
    if paths.is_empty() {
        log::info!("No recordings to analyze");
        return Ok(AnalyzeResult {
            reports: Vec::new(),
            analyzed: 0,
            failed: 0,
        });
    }

    log::info!("Analyzing {} recordings with {} workers", paths.len(), jobs);

    let pb = ProgressBar::new(paths.len() as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()?;

    let results: Vec<_> = pool.install(|| {
        paths
            .par_iter()
            .map(|path| {
                let result = analyze_file(path, config);
                pb.inc(1);
                result
            })
            .collect()
    });

    let mut reports = Vec::with_capacity(results.len());
    let mut failed: u64 = 0;
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                log::warn!("Analysis failed: {}", e);
                failed += 1;
            }
        }
    }
    let analyzed = reports.len() as u64;

    pb.finish_with_message(format!("Done: {} analyzed, {} failed", analyzed, failed));

    Ok(AnalyzeResult {
        reports,
        analyzed,
        failed,
    })
}
