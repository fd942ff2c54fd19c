//! Rolling-window smoothing along the time axis and time-index bookkeeping.

use ndarray::{s, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::error::{AnalysisError, Result};

/// Number of leading time steps unrelated to the stimulus in the reference
/// study design.
pub const LEADING_DROP_STEPS: usize = 7;

/// Trailing rolling mean with `min_periods = 1`.
///
/// Row `t` of the output is the mean of the non-NaN values among rows
/// `max(0, t - window + 1)..=t`, or NaN when the window holds none. A window
/// of 0 (or 1) returns the input unchanged.
pub fn smooth(series: ArrayView2<'_, f64>, window: usize) -> Array2<f64> {
    if window <= 1 {
        return series.to_owned();
    }

    let mut out = Array2::zeros(series.raw_dim());
    for t in 0..series.nrows() {
        let start = (t + 1).saturating_sub(window);
        let span = series.slice(s![start..=t, ..]);
        for (slot, column) in out.row_mut(t).iter_mut().zip(span.axis_iter(Axis(1))) {
            let (sum, n) = column
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(sum, n), &v| (sum + v, n + 1));
            *slot = if n == 0 { f64::NAN } else { sum / n as f64 };
        }
    }
    out
}

/// Maps internal (zero-based) time indices to displayed time labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub offset: usize,
    pub len: usize,
}

impl TimeAxis {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn label(&self, index: usize) -> usize {
        index + self.offset
    }

    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).map(move |i| self.label(i))
    }
}

/// Optional leading-window drop followed by optional smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preprocessing {
    /// Rolling window; 0 disables smoothing.
    pub window: usize,
    /// Drop the first `leading_steps` time steps before smoothing.
    pub drop_leading: bool,
    pub leading_steps: usize,
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self {
            window: 0,
            drop_leading: false,
            leading_steps: LEADING_DROP_STEPS,
        }
    }
}

impl Preprocessing {
    pub fn new(window: usize, drop_leading: bool) -> Self {
        Self {
            window,
            drop_leading,
            ..Self::default()
        }
    }

    /// Time steps removed from the front of every series.
    pub fn time_offset(&self) -> usize {
        if self.drop_leading {
            self.leading_steps
        } else {
            0
        }
    }

    pub fn is_identity(&self) -> bool {
        self.window <= 1 && self.time_offset() == 0
    }

    /// Preprocess a single series.
    pub fn apply_series(&self, series: ArrayView2<'_, f64>) -> Array2<f64> {
        let offset = self.time_offset().min(series.nrows());
        smooth(series.slice(s![offset.., ..]), self.window)
    }

    /// Preprocess every subject of a dataset.
    pub fn apply(&self, dataset: &Dataset) -> Result<Dataset> {
        if self.is_identity() {
            return Ok(dataset.clone());
        }
        if self.time_offset() >= dataset.time_steps() {
            return Err(AnalysisError::malformed(format!(
                "cannot drop {} leading time steps from series of length {}",
                self.time_offset(),
                dataset.time_steps()
            )));
        }
        dataset.map_series(|series| self.apply_series(series))
    }

    /// Time axis of a preprocessed series of `len` steps.
    pub fn time_axis(&self, len: usize) -> TimeAxis {
        TimeAxis::new(self.time_offset(), len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RepresentationKind, Subject};
    use ndarray::{array, Array1};

    #[test]
    fn zero_window_is_identity() {
        let x = array![[0.25, -1.0], [3.5, 2.0], [1e-9, 7.0]];
        assert_eq!(smooth(x.view(), 0), x);
    }

    #[test]
    fn rolling_mean_uses_partial_leading_windows() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = smooth(x.view(), 3);
        assert_eq!(y.column(0).to_vec(), vec![1.0, 1.5, 2.0, 3.0]);
    }

    #[test]
    fn rolling_mean_skips_missing_values() {
        let x = array![[1.0], [f64::NAN], [3.0], [f64::NAN], [f64::NAN]];
        let y = smooth(x.view(), 2);
        assert_eq!(y[[0, 0]], 1.0);
        assert_eq!(y[[1, 0]], 1.0);
        assert_eq!(y[[2, 0]], 3.0);
        assert_eq!(y[[3, 0]], 3.0);
        assert!(y[[4, 0]].is_nan());
    }

    #[test]
    fn rolling_mean_is_per_dimension() {
        let x = array![[1.0, 10.0], [3.0, 20.0]];
        let y = smooth(x.view(), 2);
        assert_eq!(y, array![[1.0, 10.0], [2.0, 15.0]]);
    }

    #[test]
    fn leading_drop_offsets_time_labels() {
        let values: Vec<f64> = (0..20).map(|v| v as f64).collect();
        let ds = Dataset::new(
            RepresentationKind::from_statistic(Some("s")),
            vec![Subject::from_curve(1, values)],
        )
        .unwrap();

        let pre = Preprocessing::new(0, true);
        let dropped = pre.apply(&ds).unwrap();
        assert_eq!(dropped.time_steps(), 13);
        assert_eq!(dropped.subjects()[0].series[[0, 0]], 7.0);

        let axis = pre.time_axis(dropped.time_steps());
        assert_eq!(axis.labels().next(), Some(7));
        assert_eq!(axis.labels().last(), Some(19));
    }

    #[test]
    fn drop_happens_before_smoothing() {
        let values = Array1::range(0.0, 10.0, 1.0).insert_axis(Axis(1));
        let pre = Preprocessing::new(2, true);
        let out = pre.apply_series(values.view());
        // First retained value is 7, averaged with nothing before it.
        assert_eq!(out.column(0).to_vec(), vec![7.0, 7.5, 8.5]);
    }

    #[test]
    fn dropping_everything_is_malformed() {
        let ds = Dataset::new(
            RepresentationKind::from_statistic(Some("s")),
            vec![Subject::from_curve(1, vec![1.0; 5])],
        )
        .unwrap();
        assert!(Preprocessing::new(0, true).apply(&ds).is_err());
    }
}
