//! Variability analysis: distance of every subject to the population mean,
//! normalised per time step (or per cohort) and aggregated into a
//! time-indexed signal.
//!
//! ```text
//!   Dataset ──▶ Preprocessing ──▶ compute_deviation ──┬──▶ global_variability
//!                                                     └──▶ cohort_variability
//! ```

pub mod deviation;
pub mod normalize;
pub mod report;

use log::info;

pub use deviation::{compute_deviation, Deviation};
pub use normalize::{
    cohort_variability, global_variability, min_max_columns, sample_std, z_score, CohortSeries,
    CohortVariability, DegeneratePolicy, GlobalVariability,
};
pub use report::{CohortCurve, VariabilityReport, VariabilitySignal};

use crate::config::VariabilityConfig;
use crate::data::{CohortAssignment, Dataset};
use crate::error::{AnalysisError, Result};

/// Run the variability pipeline.
///
/// `cohorts` is required when the configuration groups by cohort and must
/// have been aligned against `dataset`.
pub fn analyse(
    dataset: &Dataset,
    config: &VariabilityConfig,
    cohorts: Option<&CohortAssignment>,
) -> Result<VariabilityReport> {
    if config.group && cohorts.is_none() {
        return Err(AnalysisError::unsupported(
            "cohort grouping requested without a cohort table",
        ));
    }
    if let Some(assignment) = cohorts {
        if assignment.len() != dataset.len() {
            return Err(AnalysisError::malformed(format!(
                "cohort assignment covers {} subjects, dataset has {}",
                assignment.len(),
                dataset.len()
            )));
        }
    }

    let prepared = config.preprocessing.apply(dataset)?;
    let time = config.preprocessing.time_axis(prepared.time_steps());
    info!(
        "analysing variability of {} subjects over {} time steps",
        prepared.len(),
        prepared.time_steps()
    );

    let stacked = prepared.stacked();
    let deviation = compute_deviation(stacked.view(), prepared.kind());

    match cohorts.filter(|_| config.group) {
        Some(assignment) => {
            let grouped = cohort_variability(
                deviation.distances.view(),
                assignment.labels(),
                config.degenerate,
            );
            Ok(VariabilityReport {
                time,
                signal: VariabilitySignal::Cohorts(
                    grouped.cohorts.into_iter().map(CohortCurve::from).collect(),
                ),
                degenerate: grouped.degenerate,
            })
        }
        None => {
            let global = global_variability(deviation.distances.view(), config.degenerate);
            Ok(VariabilityReport {
                time,
                signal: VariabilitySignal::Global(global.signal),
                degenerate: global.degenerate,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RepresentationKind, Subject};
    use crate::smoothing::Preprocessing;
    use ndarray::Array2;

    fn offset_dataset() -> Dataset {
        let subjects = (1..=3)
            .map(|id| {
                let series = Array2::from_shape_fn((10, 4), |(t, d)| {
                    let base = 0.5 * t as f64 + 0.25 * d as f64;
                    if id == 2 {
                        base + 1.0
                    } else {
                        base
                    }
                });
                Subject::new(id, series)
            })
            .collect();
        Dataset::new(RepresentationKind::Image, subjects).unwrap()
    }

    #[test]
    fn offset_subject_normalises_to_unit_deviation() {
        let ds = offset_dataset();
        let dev = compute_deviation(ds.stacked().view(), ds.kind());
        let global = global_variability(dev.distances.view(), DegeneratePolicy::Zero);
        for t in 0..10 {
            let col: Vec<f64> = global.normalized.column(t).to_vec();
            assert!((col[0]).abs() < 1e-12);
            assert!((col[1] - 1.0).abs() < 1e-12);
            assert!((col[2]).abs() < 1e-12);
        }
    }

    #[test]
    fn global_report_has_one_value_per_step() {
        let config = VariabilityConfig {
            preprocessing: Preprocessing::new(3, true),
            ..VariabilityConfig::default()
        };
        let report = analyse(&offset_dataset(), &config, None).unwrap();
        assert_eq!(report.time, crate::smoothing::TimeAxis::new(7, 3));
        match report.signal {
            VariabilitySignal::Global(values) => {
                assert_eq!(values.len(), 3);
                // Normalised column is {0, 1, 0}: sample std = sqrt(1/3).
                for v in values.iter() {
                    assert!((v - (1.0f64 / 3.0).sqrt()).abs() < 1e-12);
                }
            }
            other => panic!("expected global signal, got {other:?}"),
        }
    }

    #[test]
    fn grouping_without_cohorts_is_rejected() {
        let config = VariabilityConfig {
            group: true,
            ..VariabilityConfig::default()
        };
        assert!(matches!(
            analyse(&offset_dataset(), &config, None),
            Err(AnalysisError::UnsupportedConfiguration(_))
        ));
    }
}
