use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzer::episodes::{ConsolidationParams, Smoothing};
use crate::analyzer::spectral::ClassifierConfig;
use crate::analyzer::windows::WindowPlan;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("window_secs must be positive, got {0}")]
    WindowLength(f64),
    #[error("step_secs must be positive, got {0}")]
    WindowStep(f64),
    #[error("ar_order must be at least 1")]
    ArOrder,
    #[error("nfft must be at least 4, got {0}")]
    Nfft(usize),
    #[error("Frequency bounds are inverted: {low} Hz >= {high} Hz")]
    FrequencyBounds { low: f64, high: f64 },
    #[error("Tremor band is inverted: {low} Hz >= {high} Hz")]
    TremorBand { low: f64, high: f64 },
    #[error("Vote threshold must be in [0, 1), got {0}")]
    VoteThreshold(f64),
    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid detection settings: {0}")]
    Invalid(#[from] ConfigError),
}

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    pub detection: DetectionConfig,
    pub evaluation: EvaluationConfig,
}

/// Flicker suppression strategy, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum SmoothingConfig {
    /// Drop single-window detections.
    Isolation,
    /// Centered moving vote.
    Vote {
        #[serde(default = "default_vote_window")]
        window_secs: f64,
        #[serde(default = "default_vote_threshold")]
        threshold: f64,
    },
}

fn default_vote_window() -> f64 {
    1.0
}

fn default_vote_threshold() -> f64 {
    0.2
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig::Vote {
            window_secs: default_vote_window(),
            threshold: default_vote_threshold(),
        }
    }
}

/// Named threshold sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdPreset {
    /// 3.5–6 Hz, normalized power above 0.03.
    #[default]
    Tight,
    /// 3.5–7.5 Hz, normalized power above 0.05.
    Legacy,
}

/// Parameters of the detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub window_secs: f64,
    /// Hop between window starts; `None` = disjoint windows.
    pub step_secs: Option<f64>,
    /// High-pass cutoff applied before classification.
    pub drift_cutoff_hz: f64,
    pub classifier: ClassifierConfig,
    pub smoothing: SmoothingConfig,
    /// Largest interior gap bridged between tremor runs.
    pub gap_secs: f64,
    /// Shortest tremor run kept.
    pub min_duration_secs: f64,
    pub tremor_band_low_hz: f64,
    pub tremor_band_high_hz: f64,
    /// High-pass cutoff applied before frequency characterization.
    pub frequency_highpass_hz: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_secs: 3.0,
            step_secs: Some(0.5),
            drift_cutoff_hz: 0.25,
            classifier: ClassifierConfig::default(),
            smoothing: SmoothingConfig::default(),
            gap_secs: 1.0,
            min_duration_secs: 2.0,
            tremor_band_low_hz: 3.5,
            tremor_band_high_hz: 6.0,
            frequency_highpass_hz: 0.5,
        }
    }
}

impl DetectionConfig {
    /// Apply a threshold preset to both the classifier and the RMS tremor band.
    pub fn with_preset(mut self, preset: ThresholdPreset) -> Self {
        let bounds = match preset {
            ThresholdPreset::Tight => ClassifierConfig::default(),
            ThresholdPreset::Legacy => ClassifierConfig::legacy(),
        };
        self.classifier.min_frequency_hz = bounds.min_frequency_hz;
        self.classifier.max_frequency_hz = bounds.max_frequency_hz;
        self.classifier.min_amplitude = bounds.min_amplitude;
        self.tremor_band_low_hz = bounds.min_frequency_hz;
        self.tremor_band_high_hz = bounds.max_frequency_hz;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.window_secs > 0.0) {
            return Err(ConfigError::WindowLength(self.window_secs));
        }
        if let Some(step) = self.step_secs {
            if !(step > 0.0) {
                return Err(ConfigError::WindowStep(step));
            }
        }
        if self.classifier.ar_order == 0 {
            return Err(ConfigError::ArOrder);
        }
        if self.classifier.nfft < 4 {
            return Err(ConfigError::Nfft(self.classifier.nfft));
        }
        if !(self.classifier.min_frequency_hz < self.classifier.max_frequency_hz) {
            return Err(ConfigError::FrequencyBounds {
                low: self.classifier.min_frequency_hz,
                high: self.classifier.max_frequency_hz,
            });
        }
        if !(self.tremor_band_low_hz < self.tremor_band_high_hz) || self.tremor_band_low_hz <= 0.0 {
            return Err(ConfigError::TremorBand {
                low: self.tremor_band_low_hz,
                high: self.tremor_band_high_hz,
            });
        }
        if let SmoothingConfig::Vote {
            window_secs,
            threshold,
        } = self.smoothing
        {
            if !(0.0..1.0).contains(&threshold) {
                return Err(ConfigError::VoteThreshold(threshold));
            }
            check_non_negative("smoothing.window_secs", window_secs)?;
        }
        for (name, value) in [
            ("gap_secs", self.gap_secs),
            ("min_duration_secs", self.min_duration_secs),
            ("drift_cutoff_hz", self.drift_cutoff_hz),
            ("frequency_highpass_hz", self.frequency_highpass_hz),
        ] {
            check_non_negative(name, value)?;
        }
        Ok(())
    }

    /// Window geometry at a given sampling rate.
    pub fn window_plan(&self, sample_rate: u32) -> WindowPlan {
        WindowPlan::from_seconds(self.window_secs, self.step_secs, sample_rate)
    }

    /// Convert the seconds-based consolidation settings to window-index units.
    pub fn consolidation(&self, plan: &WindowPlan, sample_rate: u32) -> ConsolidationParams {
        let smoothing = match self.smoothing {
            SmoothingConfig::Isolation => Smoothing::Isolation,
            SmoothingConfig::Vote {
                window_secs,
                threshold,
            } => Smoothing::Vote {
                window: plan.secs_to_windows_floor(window_secs, sample_rate).max(1),
                threshold,
            },
        };
        ConsolidationParams {
            smoothing,
            max_gap: plan.secs_to_windows_floor(self.gap_secs, sample_rate),
            min_run: plan.secs_to_windows_ceil(self.min_duration_secs, sample_rate),
        }
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

/// Settings for scoring detections against clinical annotations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Activity labels that count as tremor tasks (case-insensitive).
    pub tremor_activities: Vec<String>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            tremor_activities: ["Reposo", "Postural", "NarizReposo", "IntentoPostural"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/motiometrics/config.toml`.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path.
    /// Logs a warning and returns defaults if the file can't be read, parsed or validated.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Invalid config {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!(
                    "Failed to read {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self, ParseError> {
        let config = toml::from_str::<AppConfig>(contents)?;
        config.detection.validate()?;
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
