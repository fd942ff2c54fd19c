use ndarray::{Array2, Array3, ArrayView3, Axis, Zip};

use crate::data::RepresentationKind;

/// Per-subject distance to the cross-subject mean.
#[derive(Debug, Clone, PartialEq)]
pub struct Deviation {
    /// Mean over subjects, (time × dim).
    pub reference: Array2<f64>,
    /// Distance of every subject to `reference`, (subjects × time).
    pub distances: Array2<f64>,
}

/// Compute the population reference and the deviation matrix of a stacked
/// (subjects × time × dim) array.
///
/// Images use the L2 norm of the difference vector, curves the absolute
/// difference of the scalar.
pub fn compute_deviation(x: ArrayView3<'_, f64>, kind: &RepresentationKind) -> Deviation {
    let (n_subjects, n_steps, dim) = x.dim();
    let reference = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array2::zeros((n_steps, dim)));

    let diff: Array3<f64> = &x - &reference.view().insert_axis(Axis(0));

    let mut distances = Array2::zeros((n_subjects, n_steps));
    match kind {
        RepresentationKind::Image => {
            Zip::from(&mut distances)
                .and(diff.lanes(Axis(2)))
                .for_each(|d, lane| *d = lane.dot(&lane).sqrt());
        }
        RepresentationKind::Curve { .. } => {
            Zip::from(&mut distances)
                .and(diff.lanes(Axis(2)))
                .for_each(|d, lane| *d = lane[0].abs());
        }
    }

    Deviation {
        reference,
        distances,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn identical_subjects_have_zero_deviation() {
        let x = Array3::from_shape_fn((4, 6, 3), |(_, t, d)| (t * 3 + d) as f64 * 0.125);
        let dev = compute_deviation(x.view(), &RepresentationKind::Image);
        assert!(dev.distances.iter().all(|&d| d == 0.0));
        assert_eq!(dev.reference, x.index_axis(Axis(0), 0));
    }

    #[test]
    fn curves_use_absolute_difference() {
        let x = Array3::from_shape_vec((2, 2, 1), vec![1.0, 4.0, 3.0, 0.0]).unwrap();
        let kind = RepresentationKind::Curve {
            statistic: "total_persistence".into(),
        };
        let dev = compute_deviation(x.view(), &kind);
        assert_eq!(dev.reference.column(0).to_vec(), vec![2.0, 2.0]);
        assert_eq!(dev.distances, ndarray::array![[1.0, 2.0], [1.0, 2.0]]);
    }

    #[test]
    fn offset_subject_distances() {
        // Three subjects, subject 2 (index 1) shifted by +1 in all 4 dims.
        let x = Array3::from_shape_fn((3, 10, 4), |(s, t, d)| {
            let base = (t as f64).sin() + d as f64;
            if s == 1 {
                base + 1.0
            } else {
                base
            }
        });
        let dev = compute_deviation(x.view(), &RepresentationKind::Image);
        for t in 0..10 {
            let col = dev.distances.column(t);
            // Mean sits 1/3 above the unshifted subjects: |1/3|·2 and |2/3|·2.
            assert!((col[0] - 2.0 / 3.0).abs() < 1e-12);
            assert!((col[1] - 4.0 / 3.0).abs() < 1e-12);
            assert!((col[2] - 2.0 / 3.0).abs() < 1e-12);
        }
    }
}
