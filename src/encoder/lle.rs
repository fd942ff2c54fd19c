use nalgebra::{DMatrix, DVector};

use super::linalg::sorted_eigen;

/// Standard locally linear embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Lle {
    pub n_components: usize,
    pub n_neighbors: usize,
    pub reg: f64,
    fitted: Option<(DMatrix<f64>, DMatrix<f64>)>,
}

impl Lle {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            n_neighbors: 5,
            reg: 1e-3,
            fitted: None,
        }
    }

    pub fn fit_transform(&mut self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, String> {
        let n = x.nrows();
        if n <= self.n_neighbors {
            return Err(format!(
                "expected n_neighbors ({}) < n_samples ({n})",
                self.n_neighbors
            ));
        }
        if self.n_components >= n {
            return Err(format!(
                "n_components ({}) must be less than n_samples ({n})",
                self.n_components
            ));
        }

        let mut w = DMatrix::zeros(n, n);
        for i in 0..n {
            let neighbours = nearest(x, x.row(i).transpose(), self.n_neighbors, Some(i));
            let weights = barycenter_weights(x, &x.row(i).transpose(), &neighbours, self.reg)?;
            for (&j, wj) in neighbours.iter().zip(weights.iter()) {
                w[(i, j)] = *wj;
            }
        }

        // M = (I - W)^T (I - W); the embedding is spanned by its bottom
        // eigenvectors, skipping the constant one.
        let i_minus_w = DMatrix::identity(n, n) - w;
        let m = i_minus_w.transpose() * &i_minus_w;
        let (_, vectors) = sorted_eigen(m);

        let k = self.n_components;
        let y = DMatrix::from_fn(n, k, |r, c| vectors[(r, n - 2 - c)]);
        if !y.iter().all(|v| v.is_finite()) {
            return Err("eigen decomposition did not converge to a usable basis".into());
        }

        self.fitted = Some((x.clone(), y.clone()));
        Ok(y)
    }

    /// Place new samples by reconstructing them from their neighbours among
    /// the fitted samples.
    pub fn transform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, String> {
        let (train, embedding) = self.fitted.as_ref().ok_or("LLE has not been fitted")?;
        if x.ncols() != train.ncols() {
            return Err(format!("expected {} features, got {}", train.ncols(), x.ncols()));
        }
        let mut y = DMatrix::zeros(x.nrows(), embedding.ncols());
        for i in 0..x.nrows() {
            let point = x.row(i).transpose();
            let neighbours = nearest(train, point.clone(), self.n_neighbors, None);
            let weights = barycenter_weights(train, &point, &neighbours, self.reg)?;
            for (&j, wj) in neighbours.iter().zip(weights.iter()) {
                let row = embedding.row(j) * *wj;
                let mut target = y.row_mut(i);
                target += row;
            }
        }
        Ok(y)
    }
}

fn nearest(data: &DMatrix<f64>, point: DVector<f64>, k: usize, exclude: Option<usize>) -> Vec<usize> {
    let mut candidates: Vec<(usize, f64)> = (0..data.nrows())
        .filter(|&j| Some(j) != exclude)
        .map(|j| (j, (data.row(j).transpose() - &point).norm_squared()))
        .collect();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
    candidates.into_iter().take(k).map(|(j, _)| j).collect()
}

/// Regularised reconstruction weights of `point` from `neighbours`, summing
/// to one.
fn barycenter_weights(
    data: &DMatrix<f64>,
    point: &DVector<f64>,
    neighbours: &[usize],
    reg: f64,
) -> Result<DVector<f64>, String> {
    let k = neighbours.len();
    let z = DMatrix::from_fn(k, data.ncols(), |a, f| data[(neighbours[a], f)] - point[f]);
    let mut gram = &z * z.transpose();
    let trace = gram.trace();
    let r = if trace > 0.0 { reg * trace } else { reg };
    for a in 0..k {
        gram[(a, a)] += r;
    }
    let ones = DVector::from_element(k, 1.0);
    let w = gram
        .lu()
        .solve(&ones)
        .ok_or("singular local Gram matrix")?;
    let s = w.sum();
    if s == 0.0 || !s.is_finite() {
        return Err("degenerate reconstruction weights".into());
    }
    Ok(w / s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spiral() -> DMatrix<f64> {
        DMatrix::from_fn(30, 3, |i, j| {
            let t = i as f64 * 0.2;
            match j {
                0 => t.cos() * (1.0 + t),
                1 => t.sin() * (1.0 + t),
                _ => 0.3 * t,
            }
        })
    }

    #[test]
    fn embedding_has_requested_shape_and_is_centred() {
        let mut lle = Lle::new(2);
        let y = lle.fit_transform(&spiral()).unwrap();
        assert_eq!(y.shape(), (30, 2));
        // Bottom eigenvectors are orthogonal to the constant vector.
        for c in 0..2 {
            assert!(y.column(c).sum().abs() < 1e-6);
        }
    }

    #[test]
    fn barycenter_weights_reconstruct_affine_combinations() {
        let data = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 2.0, 0.0, 0.0, 2.0]);
        let point = DVector::from_vec(vec![0.5, 0.5]);
        let w = barycenter_weights(&data, &point, &[0, 1, 2], 1e-9).unwrap();
        assert!((w.sum() - 1.0).abs() < 1e-12);
        let rebuilt = data.transpose() * &w;
        assert!((rebuilt - point).norm() < 1e-6);
    }

    #[test]
    fn transform_maps_new_samples() {
        let x = spiral();
        let mut lle = Lle::new(2);
        lle.fit_transform(&x).unwrap();
        let query = x.rows(3, 4).into_owned();
        let y = lle.transform(&query).unwrap();
        assert_eq!(y.shape(), (4, 2));
        assert!(y.iter().all(|v| v.is_finite()));
        assert!(Lle::new(2).transform(&query).is_err());
    }

    #[test]
    fn too_few_samples_fail() {
        let x = DMatrix::from_element(4, 3, 0.5);
        assert!(Lle::new(2).fit_transform(&x).is_err());
    }
}
