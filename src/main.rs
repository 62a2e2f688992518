use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use motiometrics::analyzer::{self, RecordingReport, TremorAnalysis};
use motiometrics::config::{AppConfig, DetectionConfig, ThresholdPreset};
use motiometrics::{evaluate, recording};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "motiometrics", version, about = "Tremor detection for orientation-sensor recordings")]
struct Cli {
    /// Config file (defaults to the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// 3.5–6 Hz, amplitude > 0.03
    Tight,
    /// 3.5–7.5 Hz, amplitude > 0.05
    Legacy,
}

impl From<Preset> for ThresholdPreset {
    fn from(p: Preset) -> Self {
        match p {
            Preset::Tight => ThresholdPreset::Tight,
            Preset::Legacy => ThresholdPreset::Legacy,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect tremor episodes in recordings (files or directories)
    Analyze {
        /// Recording files or directories to search
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Threshold preset (overrides the config file thresholds)
        #[arg(long, value_enum)]
        preset: Option<Preset>,

        /// Write one JSON file per recording into this directory
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Score detections against the clinical annotation file
    Evaluate {
        /// Recording to evaluate
        recording: PathBuf,

        /// Annotation file (defaults to Notas_<name> next to the recording)
        #[arg(long)]
        notes: Option<PathBuf>,

        #[arg(long, value_enum)]
        preset: Option<Preset>,
    },

    /// Show the tremor spectrum and per-episode frequencies of a recording
    Spectrum {
        recording: PathBuf,

        #[arg(long, value_enum)]
        preset: Option<Preset>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Analyze {
            paths,
            jobs,
            preset,
            json,
        } => {
            let detection = detection_config(&config, preset);
            let files = recording::discover(&paths);
            if files.is_empty() {
                anyhow::bail!("No recordings found under the given paths.");
            }

            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let result = analyzer::analyze_files(&files, &detection, workers)
                .context("Analysis failed")?;

            print_summary_table(&result.reports);
            println!();
            print_episode_table(&result.reports);

            if let Some(dir) = json {
                write_json(&dir, &result.reports)?;
                println!();
                println!("JSON written to {}", dir.display());
            }

            println!();
            println!(
                "Analysis complete: {} analyzed, {} failed",
                result.analyzed, result.failed
            );
        }

        Commands::Evaluate {
            recording: path,
            notes,
            preset,
        } => {
            let detection = detection_config(&config, preset);
            let rec = recording::load_csv(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let analysis = analyzer::analyze_recording(&rec, &detection);

            let notes_path = notes.unwrap_or_else(|| recording::annotation_path(&path));
            let reference_date = rec
                .start()
                .map(|t| t.date())
                .context("Recording has no samples")?;
            let annotations = evaluate::load_annotations(&notes_path, reference_date)
                .with_context(|| format!("Failed to load annotations {}", notes_path.display()))?;

            let matrix = evaluate::evaluate(
                &analysis,
                &annotations,
                &config.evaluation.tremor_activities,
            );

            println!("Recording:   {}", path.display());
            println!("Annotations: {} ({} intervals)", notes_path.display(), annotations.len());
            println!("Windows:     {}", matrix.total());
            println!();
            println!("{:<14} {:>12} {:>12}", "", "Pred tremor", "Pred none");
            println!("{}", "-".repeat(40));
            println!(
                "{:<14} {:>12} {:>12}",
                "True tremor", matrix.true_positive, matrix.false_negative
            );
            println!(
                "{:<14} {:>12} {:>12}",
                "True none", matrix.false_positive, matrix.true_negative
            );
            println!();
            println!("Accuracy:  {:.3}", matrix.accuracy());
            println!("Precision: {:.3}", matrix.precision());
            println!("Recall:    {:.3}", matrix.recall());
            println!("F1:        {:.3}", matrix.f1());
        }

        Commands::Spectrum {
            recording: path,
            preset,
        } => {
            let detection = detection_config(&config, preset);
            let rec = recording::load_csv(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let analysis = analyzer::analyze_recording(&rec, &detection);
            print_spectrum(&analysis);
        }
    }

    Ok(())
}

/// Detection settings from config, with an optional preset applied on top.
fn detection_config(config: &AppConfig, preset: Option<Preset>) -> DetectionConfig {
    let detection = config.detection.clone();
    match preset {
        Some(p) => detection.with_preset(p.into()),
        None => detection,
    }
}

fn display_name(path: &Path, width: usize) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.chars().count() > width {
        let head: String = name.chars().take(width - 3).collect();
        format!("{}...", head)
    } else {
        name
    }
}

/// One row per recording.
fn print_summary_table(reports: &[RecordingReport]) {
    println!(
        "{:<30} {:>4} {:>8} {:>6} {:>4} {:>7} {:>10} {:>8}",
        "Recording", "SR", "Dur(s)", "Tremor", "Eps", "F(Hz)", "PSD peak", "Max amp"
    );
    println!("{}", "-".repeat(84));

    for report in reports {
        let s = report.analysis.summary();
        println!(
            "{:<30} {:>4} {:>8.1} {:>6} {:>4} {:>7.2} {:>10.2} {:>8.2}",
            display_name(&report.path, 30),
            s.sample_rate,
            s.duration_secs,
            if s.has_tremor { "yes" } else { "no" },
            s.episode_count,
            s.dominant_frequency,
            s.psd_peak,
            s.max_amplitude,
        );
    }
}

/// Every episode of every recording.
fn print_episode_table(reports: &[RecordingReport]) {
    let total: usize = reports.iter().map(|r| r.analysis.episodes.len()).sum();
    if total == 0 {
        println!("No tremor episodes detected.");
        return;
    }

    println!(
        "{:<30} {:>3} {:>23} {:>23} {:>7} {:>7}",
        "Recording", "#", "Start", "End", "Dur(s)", "Peak"
    );
    println!("{}", "-".repeat(98));

    for report in reports {
        for (i, ep) in report.analysis.episodes.iter().enumerate() {
            println!(
                "{:<30} {:>3} {:>23} {:>23} {:>7.1} {:>7.2}",
                display_name(&report.path, 30),
                i + 1,
                ep.start_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                ep.end_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                ep.duration_secs(),
                ep.peak_amplitude,
            );
        }
    }
}

fn write_json(dir: &Path, reports: &[RecordingReport]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    for report in reports {
        let stem = report
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string());
        let out = dir.join(format!("{}.json", stem));
        let body = serde_json::to_string_pretty(&report.analysis.export(&report.timestamps))
            .context("Failed to serialize analysis")?;
        std::fs::write(&out, body).with_context(|| format!("Failed to write {}", out.display()))?;
        log::info!("Wrote {}", out.display());
    }
    Ok(())
}

/// Per-episode frequencies and the spectrum around its peak.
fn print_spectrum(analysis: &TremorAnalysis) {
    let profile = &analysis.frequency;

    if analysis.episodes.is_empty() {
        println!("No tremor episodes: whole-signal spectrum.");
    } else {
        println!("Episode frequencies:");
        for (i, f) in profile.episode_frequencies.iter().enumerate() {
            match f {
                Some(f) => println!("  #{:<3} {:>6.2} Hz", i + 1, f),
                None => println!("  #{:<3} {:>6}", i + 1, "n/a"),
            }
        }
    }
    println!("Dominant frequency: {:.2} Hz", profile.dominant_frequency);

    let spectrum = &profile.spectrum;
    let Some(peak) = spectrum.peak_index() else {
        println!("Spectrum unavailable (signal too short or flat).");
        return;
    };

    // ±2 Hz around the peak, about twenty rows.
    let f0 = spectrum.frequencies[peak];
    let rows: Vec<usize> = (0..spectrum.len())
        .filter(|&i| (spectrum.frequencies[i] - f0).abs() <= 2.0)
        .collect();
    let stride = (rows.len() / 20).max(1);
    let peak_power = spectrum.power[peak];

    println!();
    println!("{:>8} {:>14} {:>8}", "F(Hz)", "Power", "Rel");
    println!("{}", "-".repeat(32));
    for &i in rows.iter().step_by(stride) {
        let rel = if peak_power > 0.0 { spectrum.power[i] / peak_power } else { 0.0 };
        println!(
            "{:>8.2} {:>14.4} {:>8.3}",
            spectrum.frequencies[i], spectrum.power[i], rel
        );
    }
}
