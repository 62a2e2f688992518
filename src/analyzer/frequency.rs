use super::filters::highpass;
use super::quantify::Episode;
use super::spectral::{argmax, burg_psd, linspace, ClassifierConfig, SpectrumEstimate};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Episodes shorter than this many samples are not characterized.
const MIN_EPISODE_SAMPLES: usize = 4;

/// Dominant tremor frequency of a recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrequencyProfile {
    /// Dominant frequency of each episode, in episode order; `None` when the
    /// episode is too short or its spectrum could not be estimated.
    pub episode_frequencies: Vec<Option<f64>>,
    pub dominant_frequency: f64,
    /// Pooled episode spectrum, or the whole-signal spectrum when there are no episodes.
    pub spectrum: SpectrumEstimate,
}

/// Inputs shared by every spectral estimate of one recording.
pub struct Signals<'a> {
    pub yaw: &'a [f64],
    pub pitch: &'a [f64],
    pub roll: &'a [f64],
    pub timestamps: &'a [NaiveDateTime],
    pub sample_rate: f64,
}

/// Per-episode and pooled dominant frequency, with a whole-signal fallback
/// when no episode exists.
pub fn characterize(
    signals: &Signals<'_>,
    episodes: &[Episode],
    highpass_hz: f64,
    config: &ClassifierConfig,
) -> FrequencyProfile {
    assert!(
        episodes.windows(2).all(|w| w[0].end_time < w[1].start_time),
        "episodes must be disjoint and in time order"
    );

    let sr = signals.sample_rate;
    let mean = mean_of_axes(
        &highpass(signals.yaw, sr, highpass_hz),
        &highpass(signals.pitch, sr, highpass_hz),
        &highpass(signals.roll, sr, highpass_hz),
    );

    if episodes.is_empty() {
        return whole_signal(&mean, sr, config);
    }

    let mut episode_frequencies = Vec::with_capacity(episodes.len());
    let mut spectra = Vec::with_capacity(episodes.len());

    for episode in episodes {
        let lo = signals
            .timestamps
            .partition_point(|t| *t < episode.start_time);
        let hi = signals
            .timestamps
            .partition_point(|t| *t <= episode.end_time);
        let segment = &mean[lo..hi.max(lo)];

        if segment.len() < MIN_EPISODE_SAMPLES {
            log::debug!(
                "Skipping episode at {}: only {} samples",
                episode.start_time,
                segment.len()
            );
            episode_frequencies.push(None);
            continue;
        }

        let order = config.ar_order.min(segment.len() - 1);
        let estimate = match burg_psd(segment, order, sr, config.nfft) {
            Ok(spectrum) => spectrum.dominant_frequency().map(|f| (f, spectrum)),
            Err(e) => {
                log::warn!("Spectrum of episode at {} failed: {}", episode.start_time, e);
                None
            }
        };
        match estimate {
            Some((f, spectrum)) => {
                episode_frequencies.push(Some(f));
                spectra.push(spectrum);
            }
            None => episode_frequencies.push(None),
        }
    }

    match pool(&spectra, sr) {
        Some(spectrum) => FrequencyProfile {
            episode_frequencies,
            dominant_frequency: spectrum.dominant_frequency().unwrap_or(0.0),
            spectrum,
        },
        None => {
            log::warn!("No episode produced a usable spectrum");
            FrequencyProfile {
                episode_frequencies,
                ..FrequencyProfile::default()
            }
        }
    }
}

fn mean_of_axes(yaw: &[f64], pitch: &[f64], roll: &[f64]) -> Vec<f64> {
    yaw.iter()
        .zip(pitch)
        .zip(roll)
        .map(|((y, p), r)| (y + p + r) / 3.0)
        .collect()
}

fn whole_signal(mean: &[f64], sample_rate: f64, config: &ClassifierConfig) -> FrequencyProfile {
    let order = config.ar_order.min(mean.len().saturating_sub(1));
    match burg_psd(mean, order, sample_rate, config.nfft) {
        Ok(spectrum) => FrequencyProfile {
            episode_frequencies: Vec::new(),
            dominant_frequency: spectrum.dominant_frequency().unwrap_or(0.0),
            spectrum,
        },
        Err(e) => {
            log::warn!("Whole-signal spectrum failed: {}", e);
            FrequencyProfile::default()
        }
    }
}

/// Resample every spectrum onto the shortest one's grid and average pointwise.
fn pool(spectra: &[SpectrumEstimate], sample_rate: f64) -> Option<SpectrumEstimate> {
    let bins = spectra.iter().map(SpectrumEstimate::len).min()?;
    let axis = linspace(0.0, sample_rate / 2.0, bins);

    let mut power = vec![0.0; bins];
    for spectrum in spectra {
        for (acc, p) in power.iter_mut().zip(spectrum.resample(&axis)) {
            *acc += p;
        }
    }
    let count = spectra.len() as f64;
    power.iter_mut().for_each(|p| *p /= count);

    argmax(&power)?;
    Some(SpectrumEstimate::new(axis, power))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::spectral::DEFAULT_NFFT;
    use chrono::{Duration, NaiveDate};
    use std::f64::consts::PI;

    const SR: f64 = 50.0;

    fn clock(n: usize) -> Vec<NaiveDateTime> {
        let origin = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| origin + Duration::milliseconds(i as i64 * 20))
            .collect()
    }

    fn tone(freq: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 2.0 * (2.0 * PI * freq * i as f64 / SR).sin() + 0.001 * ((i * 7919) % 13) as f64)
            .collect()
    }

    fn episode(timestamps: &[NaiveDateTime], start: usize, end: usize) -> Episode {
        Episode {
            start_time: timestamps[start],
            end_time: timestamps[end],
            peak_amplitude: 1.0,
            start_index: start,
            end_index: end,
        }
    }

    #[test]
    fn test_episode_frequencies_and_pooling() {
        let n = 1000;
        let timestamps = clock(n);
        let mut yaw = vec![0.0; n];
        yaw[100..300].copy_from_slice(&tone(5.0, 200));
        yaw[600..800].copy_from_slice(&tone(5.0, 200));
        let quiet = vec![0.0; n];
        let signals = Signals {
            yaw: &yaw,
            pitch: &quiet,
            roll: &quiet,
            timestamps: &timestamps,
            sample_rate: SR,
        };

        let episodes = [episode(&timestamps, 120, 280), episode(&timestamps, 620, 780)];
        let profile = characterize(&signals, &episodes, 0.5, &ClassifierConfig::default());

        assert_eq!(profile.episode_frequencies.len(), 2);
        for f in profile.episode_frequencies.iter().flatten() {
            assert!((f - 5.0).abs() < 0.3, "episode frequency {}", f);
        }
        assert!(profile.episode_frequencies.iter().all(Option::is_some));
        assert!((profile.dominant_frequency - 5.0).abs() < 0.3);
        assert_eq!(profile.spectrum.len(), DEFAULT_NFFT / 2 + 1);
    }

    #[test]
    fn test_no_episodes_uses_whole_signal() {
        let n = 500;
        let timestamps = clock(n);
        let yaw = tone(4.5, n);
        let quiet = vec![0.0; n];
        let signals = Signals {
            yaw: &yaw,
            pitch: &quiet,
            roll: &quiet,
            timestamps: &timestamps,
            sample_rate: SR,
        };
        let config = ClassifierConfig::default();

        let profile = characterize(&signals, &[], 0.5, &config);
        assert!(profile.episode_frequencies.is_empty());

        let mean = mean_of_axes(&highpass(&yaw, SR, 0.5), &quiet, &quiet);
        let expected = burg_psd(&mean, 6, SR, config.nfft).unwrap();
        assert_eq!(profile.dominant_frequency, expected.dominant_frequency().unwrap());
        assert!((profile.dominant_frequency - 4.5).abs() < 0.3);
    }

    #[test]
    fn test_flat_recording_degrades_to_zero() {
        let n = 300;
        let timestamps = clock(n);
        let flat = vec![0.0; n];
        let signals = Signals {
            yaw: &flat,
            pitch: &flat,
            roll: &flat,
            timestamps: &timestamps,
            sample_rate: SR,
        };
        let config = ClassifierConfig::default();

        let profile = characterize(&signals, &[], 0.5, &config);
        assert_eq!(profile, FrequencyProfile::default());
        assert_eq!(profile.dominant_frequency, 0.0);
        assert!(profile.spectrum.is_empty());

        // Episodes exist but none is estimable.
        let profile = characterize(&signals, &[episode(&timestamps, 10, 100)], 0.5, &config);
        assert_eq!(profile.episode_frequencies, vec![None]);
        assert_eq!(profile.dominant_frequency, 0.0);
        assert!(profile.spectrum.is_empty());
    }

    #[test]
    fn test_tiny_episode_keeps_its_slot() {
        let n = 300;
        let timestamps = clock(n);
        let yaw = tone(5.0, n);
        let quiet = vec![0.0; n];
        let signals = Signals {
            yaw: &yaw,
            pitch: &quiet,
            roll: &quiet,
            timestamps: &timestamps,
            sample_rate: SR,
        };
        let profile = characterize(
            &signals,
            &[episode(&timestamps, 10, 12), episode(&timestamps, 50, 250)],
            0.5,
            &ClassifierConfig::default(),
        );
        assert_eq!(profile.episode_frequencies.len(), 2);
        assert_eq!(profile.episode_frequencies[0], None);
        let f = profile.episode_frequencies[1].unwrap();
        assert!((f - 5.0).abs() < 0.3, "episode frequency {}", f);
        // Only the estimable episode feeds the pooled spectrum.
        assert!((profile.dominant_frequency - f).abs() < 1e-9);
    }

    #[test]
    fn test_pool_uses_shortest_grid() {
        let a = SpectrumEstimate::new(linspace(0.0, 25.0, 5), vec![0.0, 1.0, 4.0, 1.0, 0.0]);
        let b = SpectrumEstimate::new(linspace(0.0, 25.0, 3), vec![0.0, 2.0, 0.0]);
        let pooled = pool(&[a, b], 50.0).unwrap();
        assert_eq!(pooled.frequencies, vec![0.0, 12.5, 25.0]);
        assert_eq!(pooled.power, vec![0.0, 3.0, 0.0]);
        assert_eq!(pooled.dominant_frequency(), Some(12.5));
        assert!(pool(&[], 50.0).is_none());
    }

    #[test]
    #[should_panic(expected = "disjoint")]
    fn test_unordered_episodes_panic() {
        let timestamps = clock(100);
        let zeros = vec![0.0; 100];
        let signals = Signals {
            yaw: &zeros,
            pitch: &zeros,
            roll: &zeros,
            timestamps: &timestamps,
            sample_rate: SR,
        };
        characterize(
            &signals,
            &[episode(&timestamps, 50, 60), episode(&timestamps, 10, 20)],
            0.5,
            &ClassifierConfig::default(),
        );
    }

    #[test]
    #[should_panic(expected = "disjoint")]
    fn test_overlapping_episodes_panic() {
        let timestamps = clock(100);
        let zeros = vec![0.0; 100];
        let signals = Signals {
            yaw: &zeros,
            pitch: &zeros,
            roll: &zeros,
            timestamps: &timestamps,
            sample_rate: SR,
        };
        characterize(
            &signals,
            &[episode(&timestamps, 10, 50), episode(&timestamps, 40, 80)],
            0.5,
            &ClassifierConfig::default(),
        );
    }
}
