//! Zero-phase Butterworth filter bank.
//!
//! Filters are designed as cascaded second-order sections (bilinear transform of
//! the analog Butterworth prototype) and run forward then backward over an
//! odd-extended copy of the signal, so the output has no phase lag.
//!
//! Cutoffs that violate Nyquist never raise: high/low-pass hand the input back
//! unchanged and band-pass degrades to a high-pass at half its low cutoff.

use num_complex::Complex64;
use std::f64::consts::PI;

/// Drift-removal high-pass order.
pub const HIGHPASS_ORDER: usize = 1;
/// Low-pass order.
pub const LOWPASS_ORDER: usize = 8;
/// Band-pass order per band edge (the cascade has twice as many poles).
pub const BANDPASS_ORDER: usize = 4;

const MIN_NORMALIZED: f64 = 0.001;
const MAX_NORMALIZED: f64 = 0.999;

// Bilinear constant for a sample rate normalized to 1.
const BILINEAR_K: f64 = 2.0;

/// High-pass filter `signal` at `cutoff_hz` (1st-order Butterworth, zero phase).
pub fn highpass(signal: &[f64], sample_rate: f64, cutoff_hz: f64) -> Vec<f64> {
    if sample_rate <= 2.0 * cutoff_hz {
        log::debug!(
            "High-pass at {} Hz skipped: sample rate {} Hz is below Nyquist",
            cutoff_hz,
            sample_rate
        );
        return signal.to_vec();
    }
    let w = normalized(cutoff_hz, sample_rate).clamp(MIN_NORMALIZED, MAX_NORMALIZED);
    Cascade::butterworth(HIGHPASS_ORDER, Response::Highpass(w)).filtfilt(signal)
}

/// Low-pass filter `signal` at `cutoff_hz` (8th-order Butterworth, zero phase).
pub fn lowpass(signal: &[f64], sample_rate: f64, cutoff_hz: f64) -> Vec<f64> {
    if sample_rate <= 2.0 * cutoff_hz {
        log::debug!(
            "Low-pass at {} Hz skipped: sample rate {} Hz is below Nyquist",
            cutoff_hz,
            sample_rate
        );
        return signal.to_vec();
    }
    let w = normalized(cutoff_hz, sample_rate).clamp(MIN_NORMALIZED, MAX_NORMALIZED);
    Cascade::butterworth(LOWPASS_ORDER, Response::Lowpass(w)).filtfilt(signal)
}

/// Band-pass filter `signal` to `[low_hz, high_hz]` (4th-order Butterworth, zero phase).
///
/// When the sample rate cannot carry `high_hz`, a high-pass at `low_hz / 2` is
/// applied instead so gravity and drift are still removed.
pub fn bandpass(signal: &[f64], sample_rate: f64, low_hz: f64, high_hz: f64) -> Vec<f64> {
    assert!(
        low_hz < high_hz,
        "band-pass low cutoff ({low_hz} Hz) must be below high cutoff ({high_hz} Hz)"
    );
    if sample_rate <= 2.0 * high_hz {
        log::debug!(
            "Band-pass {}-{} Hz not possible at {} Hz, falling back to high-pass",
            low_hz,
            high_hz,
            sample_rate
        );
        return highpass(signal, sample_rate, low_hz / 2.0);
    }
    let w1 = normalized(low_hz, sample_rate).clamp(MIN_NORMALIZED, 0.998);
    let w2 = normalized(high_hz, sample_rate).clamp(0.002, MAX_NORMALIZED);
    Cascade::butterworth(BANDPASS_ORDER, Response::Bandpass(w1, w2)).filtfilt(signal)
}

fn normalized(freq_hz: f64, sample_rate: f64) -> f64 {
    freq_hz / (sample_rate / 2.0)
}

/// Filter shape with cutoffs normalized to Nyquist.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Response {
    Lowpass(f64),
    Highpass(f64),
    Bandpass(f64, f64),
}

/// Second-order section, Direct Form II Transposed, `a0 = 1`.
#[derive(Debug, Clone, Copy)]
struct Section {
    b: [f64; 3],
    a: [f64; 2],
}

impl Section {
    fn step(&self, x: f64, state: &mut [f64; 2]) -> f64 {
        let y = self.b[0] * x + state[0];
        state[0] = self.b[1] * x - self.a[0] * y + state[1];
        state[1] = self.b[2] * x - self.a[1] * y;
        y
    }

    /// H(z) evaluated at the given z^-1.
    fn response(&self, z_inv: Complex64) -> Complex64 {
        let num = z_inv * (z_inv * self.b[2] + self.b[1]) + self.b[0];
        let den = z_inv * (z_inv * self.a[1] + self.a[0]) + 1.0;
        num / den
    }

    /// State reached after a unit step has settled, plus the section's DC gain.
    fn steady_state(&self) -> ([f64; 2], f64) {
        let gain = (self.b[0] + self.b[1] + self.b[2]) / (1.0 + self.a[0] + self.a[1]);
        let s1 = self.b[2] - self.a[1] * gain;
        let s0 = gain - self.b[0];
        ([s0, s1], gain)
    }
}

#[derive(Debug, Clone)]
struct Cascade {
    sections: Vec<Section>,
    /// Total number of poles.
    order: usize,
}

impl Cascade {
    fn butterworth(order: usize, response: Response) -> Self {
        assert!(order > 0, "filter order must be positive");

        let warp = |w: f64| BILINEAR_K * (PI * w / 2.0).tan();
        let prototype = (0..order).map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex64::from_polar(1.0, theta)
        });

        let analog: Vec<Complex64> = match response {
            Response::Lowpass(w) => prototype.map(|p| p * warp(w)).collect(),
            Response::Highpass(w) => prototype.map(|p| Complex64::new(warp(w), 0.0) / p).collect(),
            Response::Bandpass(lo, hi) => {
                let (wl, wh) = (warp(lo), warp(hi));
                let bandwidth = wh - wl;
                let center_sq = wl * wh;
                prototype
                    .flat_map(|p| {
                        let half = p * (bandwidth / 2.0);
                        let root = (half * half - center_sq).sqrt();
                        [half + root, half - root]
                    })
                    .collect()
            }
        };

        let k = Complex64::new(BILINEAR_K, 0.0);
        let digital: Vec<Complex64> = analog.iter().map(|&p| (k + p) / (k - p)).collect();

        // Conjugate pairs become one section each; real poles are paired up.
        let mut denominators: Vec<([f64; 2], usize)> = Vec::new();
        let mut real_poles: Vec<f64> = Vec::new();
        for p in &digital {
            if p.im.abs() <= 1e-10 * p.norm().max(1.0) {
                real_poles.push(p.re);
            } else if p.im > 0.0 {
                denominators.push(([-2.0 * p.re, p.norm_sqr()], 2));
            }
        }
        for pair in real_poles.chunks(2) {
            match *pair {
                [p1, p2] => denominators.push(([-(p1 + p2), p1 * p2], 2)),
                [p] => denominators.push(([-p, 0.0], 1)),
                _ => unreachable!("chunks(2) yields one or two poles"),
            }
        }

        let mut sections: Vec<Section> = denominators
            .into_iter()
            .map(|(a, poles)| {
                let b = match (response, poles) {
                    (Response::Lowpass(_), 1) => [1.0, 1.0, 0.0],
                    (Response::Lowpass(_), _) => [1.0, 2.0, 1.0],
                    (Response::Highpass(_), 1) => [1.0, -1.0, 0.0],
                    (Response::Highpass(_), _) => [1.0, -2.0, 1.0],
                    (Response::Bandpass(..), _) => [1.0, 0.0, -1.0],
                };
                Section { b, a }
            })
            .collect();

        // Unity gain at DC, Nyquist, or the band center.
        let omega = match response {
            Response::Lowpass(_) => 0.0,
            Response::Highpass(_) => PI,
            Response::Bandpass(lo, hi) => 2.0 * ((warp(lo) * warp(hi)).sqrt() / BILINEAR_K).atan(),
        };
        let z_inv = Complex64::from_polar(1.0, -omega);
        let gain = sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(z_inv))
            .norm();
        if gain.is_finite() && gain > 0.0 {
            if let Some(first) = sections.first_mut() {
                first.b.iter_mut().for_each(|c| *c /= gain);
            }
        }

        Self {
            sections,
            order: digital.len(),
        }
    }

    /// Run the cascade once, starting from the steady state of a constant `x0` input.
    fn run(&self, input: &[f64], x0: f64) -> Vec<f64> {
        let mut level = x0;
        let mut states: Vec<[f64; 2]> = self
            .sections
            .iter()
            .map(|s| {
                let (zi, gain) = s.steady_state();
                let state = [zi[0] * level, zi[1] * level];
                level *= gain;
                state
            })
            .collect();

        input
            .iter()
            .map(|&x| {
                self.sections
                    .iter()
                    .zip(states.iter_mut())
                    .fold(x, |v, (s, state)| s.step(v, state))
            })
            .collect()
    }

    /// Forward-backward filtering with odd extension at both ends.
    fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let padlen = (3 * (self.order + 1)).min(n - 1);
        let extended = odd_extend(signal, padlen);

        let mut pass = self.run(&extended, extended[0]);
        pass.reverse();
        let mut pass = self.run(&pass, pass[0]);
        pass.reverse();

        pass[padlen..padlen + n].to_vec()
    }
}

fn odd_extend(x: &[f64], pad: usize) -> Vec<f64> {
    let n = x.len();
    let mut extended = Vec::with_capacity(n + 2 * pad);
    extended.extend((1..=pad).rev().map(|i| 2.0 * x[0] - x[i]));
    extended.extend_from_slice(x);
    extended.extend((1..=pad).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));
    extended
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sr: f64, n: usize, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / sr).sin())
            .collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    /// RMS over the middle half, away from edge effects.
    fn mid_rms(x: &[f64]) -> f64 {
        let n = x.len();
        rms(&x[n / 4..3 * n / 4])
    }

    #[test]
    fn test_highpass_removes_dc_offset() {
        let signal = vec![42.0; 500];
        let out = highpass(&signal, 50.0, 0.25);
        assert_eq!(out.len(), signal.len());
        let mean = out.iter().sum::<f64>() / out.len() as f64;
        assert!(mean.abs() < 1e-6, "mean after high-pass = {}", mean);
    }

    #[test]
    fn test_highpass_keeps_tremor_band() {
        let signal: Vec<f64> = sine(5.0, 50.0, 1000, 2.0).iter().map(|v| v + 30.0).collect();
        let out = highpass(&signal, 50.0, 0.25);
        let expected = sine(5.0, 50.0, 1000, 2.0);
        assert!((mid_rms(&out) - mid_rms(&expected)).abs() < 0.05);
    }

    #[test]
    fn test_lowpass_attenuates_high_frequency() {
        let slow = sine(1.0, 100.0, 2000, 1.0);
        let fast = sine(20.0, 100.0, 2000, 1.0);
        let slow_out = lowpass(&slow, 100.0, 3.5);
        let fast_out = lowpass(&fast, 100.0, 3.5);
        assert!((mid_rms(&slow_out) - mid_rms(&slow)).abs() < 0.02);
        assert!(mid_rms(&fast_out) < 1e-3);
    }

    #[test]
    fn test_lowpass_is_zero_phase() {
        let slow = sine(1.0, 100.0, 2000, 1.0);
        let out = lowpass(&slow, 100.0, 3.5);
        let max_err = slow[500..1500]
            .iter()
            .zip(&out[500..1500])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(max_err < 0.01, "phase/amplitude error {}", max_err);
    }

    #[test]
    fn test_bandpass_isolates_tremor_band() {
        let sr = 100.0;
        let inband = sine(5.0, sr, 3000, 1.0);
        let below = sine(0.5, sr, 3000, 1.0);
        let above = sine(20.0, sr, 3000, 1.0);
        assert!(mid_rms(&bandpass(&inband, sr, 3.5, 7.5)) > 0.6);
        assert!(mid_rms(&bandpass(&below, sr, 3.5, 7.5)) < 0.01);
        assert!(mid_rms(&bandpass(&above, sr, 3.5, 7.5)) < 0.01);
    }

    #[test]
    fn test_nyquist_violation_passes_through() {
        let signal = sine(1.0, 6.0, 60, 1.0);
        assert_eq!(lowpass(&signal, 6.0, 3.5), signal);
        assert_eq!(highpass(&signal, 0.4, 0.25), signal);
    }

    #[test]
    fn test_bandpass_falls_back_to_highpass() {
        let signal: Vec<f64> = sine(1.0, 10.0, 200, 1.0).iter().map(|v| v + 5.0).collect();
        let out = bandpass(&signal, 10.0, 3.5, 6.0);
        assert_eq!(out.len(), signal.len());
        assert_eq!(out, highpass(&signal, 10.0, 1.75));
    }

    #[test]
    fn test_short_and_empty_signals() {
        assert!(highpass(&[], 50.0, 0.25).is_empty());
        assert_eq!(lowpass(&[1.0], 50.0, 3.5).len(), 1);
        assert_eq!(bandpass(&[1.0, 2.0, 3.0], 50.0, 3.5, 6.0).len(), 3);
    }

    #[test]
    fn test_cascade_unity_gain() {
        let lp = Cascade::butterworth(LOWPASS_ORDER, Response::Lowpass(0.14));
        let dc = lp
            .sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(Complex64::new(1.0, 0.0)));
        assert!((dc.norm() - 1.0).abs() < 1e-9);
        assert_eq!(lp.sections.len(), 4);
        assert_eq!(lp.order, 8);

        let hp = Cascade::butterworth(HIGHPASS_ORDER, Response::Highpass(0.01));
        assert_eq!(hp.sections.len(), 1);
        assert_eq!(hp.order, 1);

        let bp = Cascade::butterworth(BANDPASS_ORDER, Response::Bandpass(0.14, 0.24));
        assert_eq!(bp.order, 8);
        assert_eq!(bp.sections.len(), 4);
    }
}
