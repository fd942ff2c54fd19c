use std::collections::BTreeMap;

use clap::ValueEnum;
use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::MetadataValue;
use crate::error::DegenerateScale;

/// What a zero-range column normalises to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DegeneratePolicy {
    /// No variability: the column becomes 0.
    #[default]
    Zero,
    /// `0/0` propagates as NaN.
    Nan,
}

impl DegeneratePolicy {
    fn fill(self) -> f64 {
        match self {
            DegeneratePolicy::Zero => 0.0,
            DegeneratePolicy::Nan => f64::NAN,
        }
    }
}

/// A column is constant only when its extremes coincide exactly.
fn is_degenerate(range: f64) -> bool {
    range == 0.0
}

/// Result of a column-wise min-max rescale.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxOutcome {
    pub values: Array2<f64>,
    pub degenerate: Vec<DegenerateScale>,
}

/// Rescale every column of `d` to `[0, 1]` independently.
pub fn min_max_columns(
    d: ArrayView2<'_, f64>,
    policy: DegeneratePolicy,
    cohort: Option<&str>,
) -> MinMaxOutcome {
    let mut values = d.to_owned();
    let mut degenerate = Vec::new();

    for (t, mut col) in values.axis_iter_mut(Axis(1)).enumerate() {
        let min = col.iter().copied().fold(f64::INFINITY, f64::min);
        let max = col.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        if is_degenerate(range) {
            degenerate.push(DegenerateScale {
                column: t,
                cohort: cohort.map(str::to_string),
                value: min,
            });
            col.fill(policy.fill());
        } else {
            col.mapv_inplace(|v| (v - min) / range);
        }
    }

    MinMaxOutcome { values, degenerate }
}

/// Mean of the non-NaN entries; NaN when there are none.
fn nan_mean(values: ArrayView1<'_, f64>) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, n), &v| (sum + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Sample standard deviation (ddof = 1) of the non-NaN entries; NaN for
/// fewer than two of them.
pub fn sample_std(values: ArrayView1<'_, f64>) -> f64 {
    let n = values.iter().filter(|v| !v.is_nan()).count();
    if n < 2 {
        return f64::NAN;
    }
    let mean = nan_mean(values);
    let ss: f64 = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - mean).powi(2))
        .sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Sample standard deviation of every column.
pub fn column_std(d: ArrayView2<'_, f64>) -> Array1<f64> {
    d.axis_iter(Axis(1)).map(sample_std).collect()
}

/// Standardise a series by its own mean and sample standard deviation.
///
/// NaN entries are ignored by both moments and stay NaN in the output.
pub fn z_score(series: ArrayView1<'_, f64>, policy: DegeneratePolicy) -> Array1<f64> {
    let (min, max) = series
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let std = sample_std(series);
    if std.is_finite() && is_degenerate(max - min) {
        return series.mapv(|v| if v.is_nan() { v } else { policy.fill() });
    }
    let mean = nan_mean(series);
    series.mapv(|v| (v - mean) / std)
}

// ---------------------------------------------------------------------------
// Global mode
// ---------------------------------------------------------------------------

/// Per-time-step normalised deviations and their spread.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariability {
    pub normalized: Array2<f64>,
    /// `std_s(D'[s, t])` per time step.
    pub signal: Array1<f64>,
    pub degenerate: Vec<DegenerateScale>,
}

pub fn global_variability(distances: ArrayView2<'_, f64>, policy: DegeneratePolicy) -> GlobalVariability {
    let MinMaxOutcome { values, degenerate } = min_max_columns(distances, policy, None);
    for d in &degenerate {
        warn!("{d}");
    }
    let signal = column_std(values.view());
    GlobalVariability {
        normalized: values,
        signal,
        degenerate,
    }
}

// ---------------------------------------------------------------------------
// Cohort mode
// ---------------------------------------------------------------------------

/// Z-scored variability of one cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortSeries {
    pub cohort: MetadataValue,
    /// Row indices (into the deviation matrix) of the cohort's subjects.
    pub members: Vec<usize>,
    /// Cohort-normalised deviations, (members × time).
    pub normalized: Array2<f64>,
    pub variability: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CohortVariability {
    pub cohorts: Vec<CohortSeries>,
    pub degenerate: Vec<DegenerateScale>,
}

/// Normalise, aggregate and z-score deviations within each cohort.
///
/// Each cohort only ever sees its own rows of `distances`. Cohorts with
/// fewer than two subjects yield NaN series.
pub fn cohort_variability(
    distances: ArrayView2<'_, f64>,
    labels: &[MetadataValue],
    policy: DegeneratePolicy,
) -> CohortVariability {
    let mut groups: BTreeMap<&MetadataValue, Vec<usize>> = BTreeMap::new();
    for (row, label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(row);
    }

    let n_steps = distances.ncols();
    let mut cohorts = Vec::with_capacity(groups.len());
    let mut degenerate = Vec::new();

    for (label, members) in groups {
        let subset = distances.select(Axis(0), &members);
        let name = label.to_string();
        let outcome = min_max_columns(subset.view(), policy, Some(&name));

        let variability = if members.len() < 2 {
            warn!(
                "cohort {name} has {} subject(s); its variability is undefined",
                members.len()
            );
            Array1::from_elem(n_steps, f64::NAN)
        } else {
            let spread = column_std(outcome.values.view());
            z_score(spread.view(), policy)
        };

        degenerate.extend(outcome.degenerate);
        cohorts.push(CohortSeries {
            cohort: label.clone(),
            members,
            normalized: outcome.values,
            variability,
        });
    }

    CohortVariability {
        cohorts,
        degenerate,
    }
}
