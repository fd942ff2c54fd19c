use nalgebra::DMatrix;

use super::linalg::{classical_mds, smacof};

/// Metric multidimensional scaling (SMACOF, classical initialisation).
#[derive(Debug, Clone, PartialEq)]
pub struct Mds {
    pub n_components: usize,
    pub max_iter: usize,
    pub eps: f64,
    stress: Option<f64>,
}

impl Mds {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            max_iter: 300,
            eps: 1e-3,
            stress: None,
        }
    }

    /// Raw stress of the last fit.
    pub fn stress(&self) -> Option<f64> {
        self.stress
    }

    /// Embed a symmetric dissimilarity matrix.
    pub fn fit_dissimilarities(&mut self, d: &DMatrix<f64>) -> Result<DMatrix<f64>, String> {
        let n = d.nrows();
        if d.ncols() != n {
            return Err(format!("dissimilarity matrix must be square, got {n}×{}", d.ncols()));
        }
        if n <= self.n_components {
            return Err(format!(
                "need more than {} samples for a {}-dimensional embedding",
                self.n_components, self.n_components
            ));
        }
        let init = classical_mds(d, self.n_components);
        let (y, stress) = smacof(d, init, self.max_iter, self.eps);
        self.stress = Some(stress);
        Ok(y)
    }
}
