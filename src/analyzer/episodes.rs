//! Consolidation of per-window tremor flags into episodes.
//!
//! Every stage works on a run-length decomposition of the boolean stream:
//! edges are located once, then runs are filtered or merged by length.
//! Runs touching either end of the stream are never merged past the data.

/// A maximal stretch of equal values in a boolean stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub value: bool,
    pub start: usize,
    pub len: usize,
}

impl Run {
    /// One past the last index of the run.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn touches_boundary(&self, total: usize) -> bool {
        self.start == 0 || self.end() >= total
    }
}

/// Decompose `flags` into alternating runs, in order.
pub fn runs(flags: &[bool]) -> Vec<Run> {
    let mut out = Vec::new();
    let Some(&first) = flags.first() else {
        return out;
    };

    // Edges are the indices where the value differs from its predecessor.
    let edges = flags
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0] != pair[1])
        .map(|(i, _)| i + 1);

    let mut start = 0;
    let mut value = first;
    for edge in edges.chain(std::iter::once(flags.len())) {
        out.push(Run {
            value,
            start,
            len: edge - start,
        });
        start = edge;
        value = !value;
    }
    out
}

/// Only the `true` runs of `flags`.
pub fn true_runs(flags: &[bool]) -> Vec<Run> {
    runs(flags).into_iter().filter(|r| r.value).collect()
}

fn set_run(flags: &mut [bool], run: &Run, value: bool) {
    flags[run.start..run.end()].fill(value);
}

/// Clear every `true` run of length one.
pub fn remove_isolated(flags: &mut [bool]) {
    for run in runs(flags) {
        if run.value && run.len == 1 {
            set_run(flags, &run, false);
        }
    }
}

/// Centered moving vote over `window` entries; a position stays `true` when
/// the fraction of `true` neighbours is strictly above `threshold`.
///
/// Near the ends the window is truncated to the available data.
pub fn vote_smooth(flags: &mut [bool], window: usize, threshold: f64) {
    assert!(window > 0, "vote window must be positive");
    let n = flags.len();
    if n == 0 {
        return;
    }

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0usize);
    for &f in flags.iter() {
        prefix.push(prefix[prefix.len() - 1] + usize::from(f));
    }

    let smoothed: Vec<bool> = (0..n)
        .map(|i| {
            let lo = i.saturating_sub(window / 2);
            let hi = (i + (window - 1) / 2 + 1).min(n);
            let votes = prefix[hi] - prefix[lo];
            votes as f64 / (hi - lo) as f64 > threshold
        })
        .collect();
    flags.copy_from_slice(&smoothed);
}

/// Flip interior `false` runs of at most `max_gap` entries to `true`.
pub fn fill_gaps(flags: &mut [bool], max_gap: usize) {
    let total = flags.len();
    for run in runs(flags) {
        if !run.value && run.len <= max_gap && !run.touches_boundary(total) {
            set_run(flags, &run, true);
        }
    }
}

/// Flip `true` runs shorter than `min_run` entries to `false`.
pub fn prune_short(flags: &mut [bool], min_run: usize) {
    for run in runs(flags) {
        if run.value && run.len < min_run {
            set_run(flags, &run, false);
        }
    }
}

/// Flicker suppression applied before gap filling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Smoothing {
    /// Drop single-window detections.
    Isolation,
    /// Centered moving vote, in window-index units.
    Vote { window: usize, threshold: f64 },
}

/// Consolidation parameters, all in window-index units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidationParams {
    pub smoothing: Smoothing,
    pub max_gap: usize,
    pub min_run: usize,
}

/// Smooth, fill gaps, prune: the per-axis half of consolidation.
pub fn consolidate(flags: &mut [bool], params: &ConsolidationParams) {
    match params.smoothing {
        Smoothing::Isolation => remove_isolated(flags),
        Smoothing::Vote { window, threshold } => vote_smooth(flags, window, threshold),
    }
    fill_gaps(flags, params.max_gap);
    prune_short(flags, params.min_run);
}

/// Cross-axis fusion: a window flagged on any axis is flagged on all of them.
///
/// Returns the fused timeline.
pub fn fuse(axes: &mut [Vec<bool>]) -> Vec<bool> {
    let Some(len) = axes.first().map(Vec::len) else {
        return Vec::new();
    };
    assert!(
        axes.iter().all(|a| a.len() == len),
        "axis flag streams must have equal length"
    );

    let fused: Vec<bool> = (0..len).map(|i| axes.iter().any(|a| a[i])).collect();
    for axis in axes.iter_mut() {
        for (flag, &any) in axis.iter_mut().zip(&fused) {
            *flag |= any;
        }
    }
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(pattern: &str) -> Vec<bool> {
        pattern.chars().map(|c| c == '1').collect()
    }

    fn pattern(flags: &[bool]) -> String {
        flags.iter().map(|&f| if f { '1' } else { '0' }).collect()
    }

    #[test]
    fn test_runs_decomposition() {
        let r = runs(&flags("0011101"));
        assert_eq!(
            r,
            vec![
                Run { value: false, start: 0, len: 2 },
                Run { value: true, start: 2, len: 3 },
                Run { value: false, start: 5, len: 1 },
                Run { value: true, start: 6, len: 1 },
            ]
        );
        assert!(runs(&[]).is_empty());
        assert_eq!(runs(&[true]), vec![Run { value: true, start: 0, len: 1 }]);
        assert_eq!(true_runs(&flags("0110011")).len(), 2);
    }

    #[test]
    fn test_remove_isolated() {
        let mut f = flags("1010011010");
        remove_isolated(&mut f);
        assert_eq!(pattern(&f), "0000011000");
    }

    #[test]
    fn test_vote_smooth_suppresses_flicker_and_bridges() {
        // Lone spike inside silence: 1/3 > 0.4 fails.
        let mut f = flags("0001000");
        vote_smooth(&mut f, 3, 0.4);
        assert_eq!(pattern(&f), "0000000");

        // One-window hole inside a run: 2/3 > 0.4 holds.
        let mut f = flags("1110111");
        vote_smooth(&mut f, 3, 0.4);
        assert_eq!(pattern(&f), "1111111");
    }

    #[test]
    fn test_vote_window_one_is_identity() {
        let mut f = flags("0110100");
        vote_smooth(&mut f, 1, 0.2);
        assert_eq!(pattern(&f), "0110100");
    }

    #[test]
    fn test_vote_even_window_alignment() {
        // Window 4 at i covers [i-2, i+1].
        let mut f = flags("00100000");
        vote_smooth(&mut f, 4, 0.2);
        assert_eq!(pattern(&f), "01111000");
    }

    #[test]
    fn test_fill_gaps_interior_only() {
        let mut f = flags("0110011000111");
        fill_gaps(&mut f, 2);
        assert_eq!(pattern(&f), "0111111000111");

        // Boundary gaps stay, whatever their length.
        let mut f = flags("0111101");
        fill_gaps(&mut f, 5);
        assert_eq!(pattern(&f), "0111111");
        assert!(!f[0]);

        let mut f = flags("1100");
        fill_gaps(&mut f, 5);
        assert_eq!(pattern(&f), "1100");
    }

    #[test]
    fn test_fill_gaps_zero_tolerance() {
        let mut f = flags("1101");
        fill_gaps(&mut f, 0);
        assert_eq!(pattern(&f), "1101");
    }

    #[test]
    fn test_prune_short_and_idempotent() {
        let mut f = flags("1101110111101");
        prune_short(&mut f, 3);
        assert_eq!(pattern(&f), "0001110111100");

        let once = f.clone();
        prune_short(&mut f, 3);
        assert_eq!(f, once);
    }

    #[test]
    fn test_consolidate_isolation() {
        let params = ConsolidationParams {
            smoothing: Smoothing::Isolation,
            max_gap: 1,
            min_run: 3,
        };
        let mut f = flags("1000110110000100");
        consolidate(&mut f, &params);
        assert_eq!(pattern(&f), "0000111110000000");
    }

    #[test]
    fn test_fusion_property() {
        let mut axes = vec![flags("1000100"), flags("0100100"), flags("0000110")];
        let originals = axes.clone();
        let fused = fuse(&mut axes);
        for i in 0..fused.len() {
            assert_eq!(fused[i], originals.iter().any(|a| a[i]));
            if fused[i] {
                assert!(axes.iter().all(|a| a[i]));
            }
        }
        assert_eq!(pattern(&fused), "1100110");
    }

    #[test]
    fn test_pitch_only_tremor_marks_all_axes() {
        let params = ConsolidationParams {
            smoothing: Smoothing::Isolation,
            max_gap: 0,
            min_run: 1,
        };
        let mut yaw = vec![false; 10];
        let mut pitch = vec![false; 10];
        let mut roll = vec![false; 10];
        pitch[4..=6].fill(true);

        for axis in [&mut yaw, &mut pitch, &mut roll] {
            consolidate(axis, &params);
        }
        let mut axes = vec![yaw, pitch, roll];
        let fused = fuse(&mut axes);

        assert_eq!(pattern(&fused), "0000111000");
        for axis in &axes {
            assert_eq!(pattern(axis), "0000111000");
        }
    }

    #[test]
    #[should_panic(expected = "equal length")]
    fn test_fuse_length_mismatch_panics() {
        fuse(&mut [vec![true], vec![true, false]]);
    }
}
