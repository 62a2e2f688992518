/// Fixed-length, fixed-step segmentation of a channel.
///
/// The trailing partial window is dropped, never padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    /// Window length in samples.
    pub length: usize,
    /// Distance between consecutive window starts, in samples.
    pub step: usize,
}

/// One window of a channel, tagged with its center sample index.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub start: usize,
    pub center: usize,
    pub samples: &'a [f64],
}

impl WindowPlan {
    pub fn new(length: usize, step: usize) -> Self {
        assert!(length > 0, "window length must be positive");
        assert!(step > 0, "window step must be positive");
        Self { length, step }
    }

    /// Plan a window of `window_secs` at `sample_rate`. `step = None` means disjoint windows.
    pub fn from_seconds(window_secs: f64, step_secs: Option<f64>, sample_rate: u32) -> Self {
        let sr = f64::from(sample_rate);
        let length = ((window_secs * sr).round() as usize).max(1);
        let step = match step_secs {
            Some(secs) => ((secs * sr).round() as usize).max(1),
            None => length,
        };
        Self::new(length, step)
    }

    /// Number of complete windows in a channel of `len` samples.
    pub fn count(&self, len: usize) -> usize {
        if len < self.length {
            0
        } else {
            (len - self.length) / self.step + 1
        }
    }

    /// Center sample index of every window.
    pub fn centers(&self, len: usize) -> Vec<usize> {
        (0..self.count(len))
            .map(|i| i * self.step + self.length / 2)
            .collect()
    }

    /// Iterate the windows of `channel` in order.
    pub fn windows(self, channel: &[f64]) -> impl Iterator<Item = Window<'_>> {
        let WindowPlan { length, step } = self;
        (0..self.count(channel.len())).map(move |i| {
            let start = i * step;
            Window {
                start,
                center: start + length / 2,
                samples: &channel[start..start + length],
            }
        })
    }

    /// Convert a duration in seconds to window-index units, rounding down.
    pub fn secs_to_windows_floor(&self, secs: f64, sample_rate: u32) -> usize {
        (secs * f64::from(sample_rate) / self.step as f64).floor().max(0.0) as usize
    }

    /// Convert a duration in seconds to window-index units, rounding up.
    pub fn secs_to_windows_ceil(&self, secs: f64, sample_rate: u32) -> usize {
        (secs * f64::from(sample_rate) / self.step as f64).ceil().max(0.0) as usize
    }
}
