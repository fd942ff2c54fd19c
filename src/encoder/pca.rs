use nalgebra::{DMatrix, SVD};

use super::linalg::center_columns;

/// Parameters learned by [`fit_transform`](Pca::fit_transform).
#[derive(Debug, Clone, PartialEq)]
pub struct PcaModel {
    pub mean: Vec<f64>,
    /// (features × components)
    pub components: DMatrix<f64>,
    pub explained_variance: Vec<f64>,
}

/// Principal component analysis via a thin SVD of the centred data.
#[derive(Debug, Clone, PartialEq)]
pub struct Pca {
    pub n_components: usize,
    model: Option<PcaModel>,
}

impl Pca {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            model: None,
        }
    }

    pub fn model(&self) -> Option<&PcaModel> {
        self.model.as_ref()
    }

    pub fn fit_transform(&mut self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, String> {
        let (n, f) = x.shape();
        if self.n_components > n.min(f) {
            return Err(format!(
                "n_components={} must be at most min(n_samples={n}, n_features={f})",
                self.n_components
            ));
        }

        let (centred, mean) = center_columns(x);
        let svd = SVD::new(centred.clone(), false, true);
        let v_t = svd.v_t.ok_or("SVD did not produce right singular vectors")?;

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

        let mut components = DMatrix::from_fn(f, self.n_components, |r, c| v_t[(order[c], r)]);

        // Deterministic orientation: largest-magnitude score per component
        // is positive.
        let mut scores = &centred * &components;
        for c in 0..self.n_components {
            let pivot = scores
                .column(c)
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap_or(0.0);
            if pivot < 0.0 {
                components.column_mut(c).neg_mut();
                scores.column_mut(c).neg_mut();
            }
        }

        let denom = (n.max(2) - 1) as f64;
        let explained_variance = order
            .iter()
            .take(self.n_components)
            .map(|&i| svd.singular_values[i].powi(2) / denom)
            .collect();

        self.model = Some(PcaModel {
            mean,
            components,
            explained_variance,
        });
        Ok(scores)
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, String> {
        let model = self.model.as_ref().ok_or("PCA has not been fitted")?;
        if x.ncols() != model.mean.len() {
            return Err(format!(
                "expected {} features, got {}",
                model.mean.len(),
                x.ncols()
            ));
        }
        let centred = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] - model.mean[j]);
        Ok(centred * &model.components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_data() -> DMatrix<f64> {
        // Points on a line along (1, 2, 0) with a small orthogonal wobble.
        DMatrix::from_fn(8, 3, |i, j| {
            let t = i as f64;
            match j {
                0 => t,
                1 => 2.0 * t,
                _ => if i % 2 == 0 { 0.1 } else { -0.1 },
            }
        })
    }

    #[test]
    fn first_component_follows_dominant_direction() {
        let mut pca = Pca::new(2);
        let y = pca.fit_transform(&line_data()).unwrap();
        assert_eq!(y.shape(), (8, 2));

        let model = pca.model().unwrap();
        let c0 = model.components.column(0);
        let expected = nalgebra::DVector::from_vec(vec![1.0, 2.0, 0.0]).normalize();
        assert!((c0.dot(&expected).abs() - 1.0).abs() < 1e-9);
        assert!(model.explained_variance[0] > model.explained_variance[1]);
    }

    #[test]
    fn transform_reproduces_fit() {
        let x = line_data();
        let mut pca = Pca::new(2);
        let fitted = pca.fit_transform(&x).unwrap();
        let again = pca.transform(&x).unwrap();
        assert!((fitted - again).abs().max() < 1e-9);
    }

    #[test]
    fn too_many_components_fail() {
        let x = DMatrix::from_element(1, 4, 1.0);
        assert!(Pca::new(2).fit_transform(&x).is_err());
    }
}
