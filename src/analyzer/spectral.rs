//! Autoregressive spectral estimation (Burg) and the per-window tremor classifier.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Default FFT size used to sample the AR power spectrum.
pub const DEFAULT_NFFT: usize = 4096;

/// Guards the PSD normalization against an all-zero spectrum.
const NORMALIZATION_EPS: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpectralError {
    #[error("Segment of {len} samples is too short for AR order {order}")]
    TooShort { len: usize, order: usize },
    #[error("Segment is flat, nothing to model")]
    FlatSignal,
}

/// Fitted autoregressive model: `x[n] + a1 x[n-1] + ... + ap x[n-p] = e[n]`.
#[derive(Debug, Clone)]
pub struct ArModel {
    /// `[1, a1, ..., ap]`
    pub coefficients: Vec<f64>,
    /// Variance of the driving white noise.
    pub noise_variance: f64,
}

/// Fit an AR model of `order` with Burg's method.
pub fn burg(signal: &[f64], order: usize) -> Result<ArModel, SpectralError> {
    let n = signal.len();
    if order == 0 || n <= order {
        return Err(SpectralError::TooShort { len: n, order });
    }

    let energy = signal.iter().map(|x| x * x).sum::<f64>() / n as f64;
    if !energy.is_finite() || energy <= 0.0 {
        return Err(SpectralError::FlatSignal);
    }

    let mut coefficients = vec![1.0];
    let mut rho = energy;
    let mut forward = signal.to_vec();
    let mut backward = signal.to_vec();

    for m in 0..order {
        let len = n - m - 1;
        let mut num = 0.0;
        let mut den = 0.0;
        for j in 0..len {
            num += forward[j + 1] * backward[j];
            den += forward[j + 1] * forward[j + 1] + backward[j] * backward[j];
        }
        if den <= 0.0 {
            // Residual already zero: the lower-order model is exact.
            break;
        }
        let k = -2.0 * num / den;

        let prev = coefficients.clone();
        coefficients.push(0.0);
        for i in 1..=m + 1 {
            coefficients[i] = prev.get(i).copied().unwrap_or(0.0) + k * prev[m + 1 - i];
        }
        rho *= 1.0 - k * k;

        let next_forward: Vec<f64> = (0..len).map(|j| forward[j + 1] + k * backward[j]).collect();
        let next_backward: Vec<f64> = (0..len).map(|j| backward[j] + k * forward[j + 1]).collect();
        forward = next_forward;
        backward = next_backward;
    }

    if !rho.is_finite() || rho <= 0.0 {
        return Err(SpectralError::FlatSignal);
    }

    Ok(ArModel {
        coefficients,
        noise_variance: rho,
    })
}

/// FFT size for a segment: at least `base`, grown to cover long segments.
pub fn spectrum_size(len: usize, base: usize) -> usize {
    base.max(len.next_power_of_two())
}

/// One-sided Burg PSD of `signal` on a linear axis from 0 to `sample_rate / 2`.
pub fn burg_psd(
    signal: &[f64],
    order: usize,
    sample_rate: f64,
    nfft: usize,
) -> Result<SpectrumEstimate, SpectralError> {
    let model = burg(signal, order)?;
    let bins = spectrum_size(signal.len(), nfft) / 2 + 1;

    let power = (0..bins)
        .map(|i| {
            let omega = PI * i as f64 / (bins - 1) as f64;
            let (re, im) = model
                .coefficients
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(re, im), (k, &a)| {
                    let phase = omega * k as f64;
                    (re + a * phase.cos(), im - a * phase.sin())
                });
            let gain = (re * re + im * im).max(f64::MIN_POSITIVE);
            let sides = if i == 0 || i == bins - 1 { 1.0 } else { 2.0 };
            sides * model.noise_variance / gain
        })
        .collect();

    Ok(SpectrumEstimate::new(
        linspace(0.0, sample_rate / 2.0, bins),
        power,
    ))
}

/// Power spectrum on an ascending frequency axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpectrumEstimate {
    pub frequencies: Vec<f64>,
    pub power: Vec<f64>,
}

impl SpectrumEstimate {
    pub fn new(frequencies: Vec<f64>, power: Vec<f64>) -> Self {
        assert_eq!(
            frequencies.len(),
            power.len(),
            "frequency axis and power must have the same length"
        );
        Self { frequencies, power }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.power.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_empty()
    }

    /// Index of the first maximum-power bin.
    pub fn peak_index(&self) -> Option<usize> {
        argmax(&self.power)
    }

    pub fn dominant_frequency(&self) -> Option<f64> {
        self.peak_index().map(|i| self.frequencies[i])
    }

    /// Maximum power, 0 for an empty spectrum.
    pub fn peak_power(&self) -> f64 {
        self.peak_index().map(|i| self.power[i]).unwrap_or(0.0)
    }

    /// Linearly interpolate this spectrum onto another frequency axis.
    pub fn resample(&self, frequencies: &[f64]) -> Vec<f64> {
        frequencies
            .iter()
            .map(|&f| interpolate(f, &self.frequencies, &self.power))
            .collect()
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, clamped to the end values.
pub fn interpolate(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());
    match xp.len() {
        0 => 0.0,
        1 => fp[0],
        len => {
            if x <= xp[0] {
                return fp[0];
            }
            if x >= xp[len - 1] {
                return fp[len - 1];
            }
            let hi = xp.partition_point(|&v| v <= x);
            let lo = hi - 1;
            let span = xp[hi] - xp[lo];
            if span <= 0.0 {
                fp[lo]
            } else {
                fp[lo] + (fp[hi] - fp[lo]) * (x - xp[lo]) / span
            }
        }
    }
}

/// First index of the maximum value (NaNs never win).
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, bv)) if !(v > bv) => best,
            _ if v.is_nan() => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Frequency/amplitude thresholds of the tremor decision rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Dominant frequency must be strictly above this.
    pub min_frequency_hz: f64,
    /// Dominant frequency must be strictly below this.
    pub max_frequency_hz: f64,
    /// Normalized dominant power must be strictly above this.
    pub min_amplitude: f64,
    pub ar_order: usize,
    pub nfft: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_frequency_hz: 3.5,
            max_frequency_hz: 6.0,
            min_amplitude: 0.03,
            ar_order: 6,
            nfft: DEFAULT_NFFT,
        }
    }
}

impl ClassifierConfig {
    /// The earlier, looser rule: 3.5–7.5 Hz with normalized power above 0.05.
    pub fn legacy() -> Self {
        Self {
            max_frequency_hz: 7.5,
            min_amplitude: 0.05,
            ..Self::default()
        }
    }
}

/// Per-window, per-axis classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowVerdict {
    pub is_tremor: bool,
    pub dominant_frequency: f64,
    pub dominant_amplitude: f64,
}

impl WindowVerdict {
    /// Verdict for a window with no usable spectrum.
    pub fn quiet() -> Self {
        Self {
            is_tremor: false,
            dominant_frequency: 0.0,
            dominant_amplitude: 0.0,
        }
    }
}

/// Classify one window: Burg PSD, dominant bin (skipping DC), threshold rule.
pub fn classify_window(window: &[f64], sample_rate: f64, config: &ClassifierConfig) -> WindowVerdict {
    let order = config.ar_order.min(window.len().saturating_sub(1));
    if order == 0 {
        return WindowVerdict::quiet();
    }

    let spectrum = match burg_psd(window, order, sample_rate, config.nfft) {
        Ok(s) => s,
        Err(e) => {
            log::debug!("Window of {} samples left unclassified: {}", window.len(), e);
            return WindowVerdict::quiet();
        }
    };

    let Some(mut peak) = spectrum.peak_index() else {
        return WindowVerdict::quiet();
    };
    // DC dominance is orientation offset, not tremor: take the runner-up bin.
    if spectrum.frequencies[peak] == 0.0 && spectrum.len() > 1 {
        let runner_up = spectrum
            .power
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != peak)
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, bv)) if !(v > bv) => best,
                _ => Some((i, v)),
            });
        if let Some((i, _)) = runner_up {
            peak = i;
        }
    }

    let total: f64 = spectrum.power.iter().sum();
    let dominant_frequency = spectrum.frequencies[peak];
    let dominant_amplitude = spectrum.power[peak] / (total + NORMALIZATION_EPS);

    let is_tremor = dominant_frequency > config.min_frequency_hz
        && dominant_frequency < config.max_frequency_hz
        && dominant_amplitude > config.min_amplitude;

    WindowVerdict {
        is_tremor,
        dominant_frequency,
        dominant_amplitude,
    }
}
