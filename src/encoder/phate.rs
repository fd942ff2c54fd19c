//! Diffusion-potential embeddings: PHATE for sample matrices and its
//! multislice variant for (time × subject × feature) tensors.

use log::debug;
use nalgebra::DMatrix;
use ndarray::{ArrayView3, Axis};

use super::linalg::{
    alpha_decay_kernel, classical_mds, matrix_power, row_distances, row_normalize, smacof,
    to_dmatrix,
};
use super::pca::Pca;
use super::Samples;

/// Shared diffusion / potential / MDS chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Diffusion {
    pub n_components: usize,
    /// Diffusion time; `None` selects it from the von Neumann entropy knee.
    pub t: Option<usize>,
    pub t_max: usize,
    /// Potential transform: 1 → log, -1 → identity, otherwise a power.
    pub gamma: f64,
    pub mds_max_iter: usize,
}

impl Diffusion {
    fn new(n_components: usize, gamma: f64) -> Self {
        Self {
            n_components,
            t: None,
            t_max: 100,
            gamma,
            mds_max_iter: 300,
        }
    }

    /// Embed the graph described by a symmetric affinity matrix.
    pub fn embed_kernel(&self, kernel: &DMatrix<f64>) -> Result<(DMatrix<f64>, usize), String> {
        self.embed_operator(&row_normalize(kernel))
    }

    /// Embed the nodes of a row-stochastic diffusion operator.
    pub fn embed_operator(&self, diff_op: &DMatrix<f64>) -> Result<(DMatrix<f64>, usize), String> {
        let n = diff_op.nrows();
        if n <= self.n_components {
            return Err(format!(
                "need more than {} samples for a {}-dimensional embedding",
                self.n_components, self.n_components
            ));
        }
        let t = match self.t {
            Some(t) => t,
            None => optimal_t(diff_op, self.t_max),
        };
        debug!("diffusing {n} nodes for t = {t}");

        let diffused = matrix_power(diff_op, t);
        let potential = potential(&diffused, self.gamma);
        let dist = row_distances(&potential);
        if !dist.iter().all(|v| v.is_finite()) {
            return Err("non-finite diffusion potential".into());
        }

        let init = classical_mds(&dist, self.n_components);
        let (y, _) = smacof(&dist, init, self.mds_max_iter, 1e-3);
        Ok((y, t))
    }
}

fn potential(diffused: &DMatrix<f64>, gamma: f64) -> DMatrix<f64> {
    if gamma == 1.0 {
        diffused.map(|v| -(v + 1e-7).ln())
    } else if gamma == -1.0 {
        diffused.clone()
    } else {
        let c = (1.0 - gamma) / 2.0;
        diffused.map(|v| (v.max(0.0).powf(c) - 1.0) / c)
    }
}

/// Diffusion time at the knee of the von Neumann entropy curve.
pub fn optimal_t(diff_op: &DMatrix<f64>, t_max: usize) -> usize {
    let entropy = von_neumann_entropy(diff_op, t_max);
    find_knee(&entropy) + 1
}

/// Entropy of the normalised spectrum of `diff_op^t` for `t = 1..=t_max`.
pub fn von_neumann_entropy(diff_op: &DMatrix<f64>, t_max: usize) -> Vec<f64> {
    let eigenvalues: Vec<f64> = diff_op.clone().singular_values().iter().copied().collect();
    let mut powered = eigenvalues.clone();
    let mut entropy = Vec::with_capacity(t_max);
    for _ in 0..t_max {
        let total: f64 = powered.iter().sum();
        let h = powered
            .iter()
            .map(|v| {
                let p = v / total + f64::EPSILON;
                -p * p.ln()
            })
            .sum();
        entropy.push(h);
        for (p, e) in powered.iter_mut().zip(&eigenvalues) {
            *p *= e;
        }
    }
    entropy
}

/// Index minimising the combined residual of two least-squares lines fit
/// left and right of it.
pub fn find_knee(y: &[f64]) -> usize {
    let n = y.len();
    if n < 5 {
        return n / 2;
    }
    let mut best = (f64::INFINITY, n / 2);
    for k in 2..n - 2 {
        let err = line_residual(&y[..=k], 0) + line_residual(&y[k..], k);
        if err < best.0 {
            best = (err, k);
        }
    }
    best.1
}

fn line_residual(y: &[f64], x0: usize) -> f64 {
    let n = y.len() as f64;
    let xs: Vec<f64> = (0..y.len()).map(|i| (x0 + i) as f64).collect();
    let mx = xs.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    let sxy: f64 = xs.iter().zip(y).map(|(x, v)| (x - mx) * (v - my)).sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    xs.iter()
        .zip(y)
        .map(|(x, v)| (v - (my + slope * (x - mx))).powi(2))
        .sum()
}

// ---------------------------------------------------------------------------
// PHATE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Phate {
    pub knn: usize,
    pub decay: f64,
    pub thresh: f64,
    /// Reduce raw coordinates to this many principal components first.
    pub n_pca: Option<usize>,
    pub diffusion: Diffusion,
    chosen_t: Option<usize>,
}

impl Phate {
    pub fn new(n_components: usize) -> Self {
        Self {
            knn: 5,
            decay: 40.0,
            thresh: 1e-4,
            n_pca: Some(100),
            diffusion: Diffusion::new(n_components, 1.0),
            chosen_t: None,
        }
    }

    /// Diffusion time used by the last fit.
    pub fn chosen_t(&self) -> Option<usize> {
        self.chosen_t
    }

    pub fn fit_transform(&mut self, samples: Samples<'_>) -> Result<DMatrix<f64>, String> {
        let n = samples.len();
        if n < 3 {
            return Err(format!("need at least 3 samples, got {n}"));
        }

        let distances = match samples {
            Samples::Coordinates(x) => {
                let reduced = match self.n_pca {
                    Some(k) if x.ncols() > k && n > k => Pca::new(k).fit_transform(x)?,
                    _ => x.clone(),
                };
                row_distances(&reduced)
            }
            Samples::Dissimilarities(d) => d.clone(),
        };

        let knn = self.knn.min(n - 1);
        let kernel = alpha_decay_kernel(&distances, knn, self.decay, self.thresh);
        let (y, t) = self.diffusion.embed_kernel(&kernel)?;
        self.chosen_t = Some(t);
        Ok(y)
    }
}

// ---------------------------------------------------------------------------
// Multislice PHATE
// ---------------------------------------------------------------------------

/// Multislice PHATE over a (time × subject × feature) tensor.
///
/// The multislice kernel itself is dense over all `time × subject` nodes.
/// Above `n_landmark` nodes, diffusion and MDS run on landmark clusters and
/// nodes are placed by their transition weights into those clusters.
#[derive(Debug, Clone, PartialEq)]
pub struct MPhate {
    pub intraslice_knn: usize,
    pub interslice_knn: usize,
    pub decay: f64,
    pub thresh: f64,
    /// `None` always diffuses the full node graph.
    pub n_landmark: Option<usize>,
    pub diffusion: Diffusion,
}

impl MPhate {
    pub fn new(n_components: usize) -> Self {
        Self {
            intraslice_knn: 2,
            interslice_knn: 25,
            decay: 5.0,
            thresh: 1e-4,
            n_landmark: Some(1000),
            diffusion: Diffusion::new(n_components, 0.0),
        }
    }

    /// Embed a (time × subject × feature) tensor. Output rows are
    /// time-major: row `t * subjects + s`.
    pub fn fit_transform(&mut self, tensor: ArrayView3<'_, f64>) -> Result<DMatrix<f64>, String> {
        let (n_steps, n_subjects, _) = tensor.dim();
        if n_steps < 2 || n_subjects < 2 {
            return Err(format!(
                "multislice embedding needs at least 2 time steps and 2 subjects, got {n_steps}×{n_subjects}"
            ));
        }
        let kernel = self.multislice_kernel(tensor);
        match self.n_landmark {
            Some(landmarks) if kernel.nrows() > landmarks => {
                let nodes = node_features(tensor);
                let clusters = landmark_clusters(&nodes, landmarks);
                debug!(
                    "compressing {} nodes onto {} landmarks",
                    kernel.nrows(),
                    clusters.iter().max().map_or(0, |&c| c + 1)
                );
                self.embed_landmarks(&kernel, &clusters)
            }
            _ => self.diffusion.embed_kernel(&kernel).map(|(y, _)| y),
        }
    }

    /// Diffuse between landmark clusters, then interpolate every node from
    /// its transition probabilities into the clusters.
    fn embed_landmarks(&self, kernel: &DMatrix<f64>, clusters: &[usize]) -> Result<DMatrix<f64>, String> {
        let n = kernel.nrows();
        let l = clusters.iter().max().map_or(0, |&c| c + 1);
        let diff_op = row_normalize(kernel);

        // node → landmark and landmark → node transitions
        let mut to_landmark = DMatrix::zeros(n, l);
        let mut from_landmark = DMatrix::zeros(l, n);
        for j in 0..n {
            let c = clusters[j];
            for i in 0..n {
                to_landmark[(i, c)] += diff_op[(i, j)];
                from_landmark[(c, i)] += kernel[(j, i)];
            }
        }
        let from_landmark = row_normalize(&from_landmark);
        let landmark_op = row_normalize(&(&from_landmark * &to_landmark));

        let (y, _) = self.diffusion.embed_operator(&landmark_op)?;
        Ok(&to_landmark * y)
    }

    /// Affinities between every (time, subject) node: intraslice kernels
    /// within each time step, interslice kernels linking a subject to itself
    /// across time.
    pub fn multislice_kernel(&self, tensor: ArrayView3<'_, f64>) -> DMatrix<f64> {
        let (n_steps, n_subjects, _) = tensor.dim();
        let n = n_steps * n_subjects;
        let node = |t: usize, s: usize| t * n_subjects + s;
        let mut kernel = DMatrix::zeros(n, n);

        let intra_knn = self.intraslice_knn.min(n_subjects - 1);
        for (t, slice) in tensor.axis_iter(Axis(0)).enumerate() {
            let d = row_distances(&to_dmatrix(slice));
            let k = alpha_decay_kernel(&d, intra_knn, self.decay, self.thresh);
            for a in 0..n_subjects {
                for b in 0..n_subjects {
                    kernel[(node(t, a), node(t, b))] = k[(a, b)];
                }
            }
        }

        let inter_knn = self.interslice_knn.min(n_steps - 1);
        for (s, trajectory) in tensor.axis_iter(Axis(1)).enumerate() {
            let d = row_distances(&to_dmatrix(trajectory));
            let k = alpha_decay_kernel(&d, inter_knn, self.decay, self.thresh);
            for a in 0..n_steps {
                for b in 0..n_steps {
                    if a != b {
                        kernel[(node(a, s), node(b, s))] = k[(a, b)];
                    }
                }
            }
        }

        kernel
    }
}

/// Time-major (node × feature) view of a tensor: row `t * subjects + s`.
fn node_features(tensor: ArrayView3<'_, f64>) -> DMatrix<f64> {
    let (_, n_subjects, n_features) = tensor.dim();
    let n = tensor.len_of(Axis(0)) * n_subjects;
    DMatrix::from_fn(n, n_features, |i, f| tensor[[i / n_subjects, i % n_subjects, f]])
}

/// Up to `k` landmarks by farthest-point traversal; returns the landmark
/// index of every row. Selection stops early once all rows coincide with a
/// landmark, so every landmark owns at least its own row.
fn landmark_clusters(x: &DMatrix<f64>, k: usize) -> Vec<usize> {
    let n = x.nrows();
    let mut owner = vec![0usize; n];
    if n == 0 || k == 0 {
        return owner;
    }
    let dist = |a: usize, b: usize| (x.row(a) - x.row(b)).norm();
    let mut nearest: Vec<f64> = (0..n).map(|i| dist(i, 0)).collect();

    for landmark in 1..k.min(n) {
        let (next, &gap) = nearest
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap_or((0, &0.0));
        if gap <= 0.0 {
            break;
        }
        for i in 0..n {
            let d = dist(i, next);
            if d < nearest[i] {
                nearest[i] = d;
                owner[i] = landmark;
            }
        }
    }
    owner
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn knee_of_piecewise_linear_curve() {
        let y: Vec<f64> = (0..40)
            .map(|i| if i < 10 { 10.0 - i as f64 } else { 0.0 - 0.01 * (i - 10) as f64 })
            .collect();
        let knee = find_knee(&y);
        assert!((9..=11).contains(&knee), "knee at {knee}");
    }

    #[test]
    fn entropy_decreases_with_diffusion() {
        let pts = DMatrix::from_fn(12, 2, |i, j| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let k = alpha_decay_kernel(&row_distances(&pts), 3, 10.0, 1e-4);
        let h = von_neumann_entropy(&row_normalize(&k), 20);
        assert_eq!(h.len(), 20);
        assert!(h[19] < h[0]);
    }

    #[test]
    fn phate_embeds_a_curve() {
        let x = DMatrix::from_fn(25, 4, |i, j| (i as f64 * 0.3 + j as f64).sin());
        let mut phate = Phate::new(2);
        let y = phate.fit_transform(Samples::Coordinates(&x)).unwrap();
        assert_eq!(y.shape(), (25, 2));
        assert!(y.iter().all(|v| v.is_finite()));
        assert!(phate.chosen_t().unwrap() >= 1);
    }

    #[test]
    fn multislice_kernel_links_slices_and_subjects() {
        let tensor = Array3::from_shape_fn((4, 3, 2), |(t, s, f)| t as f64 + 0.1 * s as f64 + f as f64);
        let mphate = MPhate::new(2);
        let k = mphate.multislice_kernel(tensor.view());
        assert_eq!(k.shape(), (12, 12));
        // Same time step, different subjects.
        assert!(k[(0, 1)] > 0.0);
        // Same subject, adjacent time steps.
        assert!(k[(0, 3)] > 0.0);
        // Different subject and different time step are never linked.
        assert_eq!(k[(0, 4)], 0.0);
    }

    #[test]
    fn multislice_embedding_has_one_row_per_node() {
        let tensor = Array3::from_shape_fn((6, 3, 2), |(t, s, f)| (t as f64 * 0.5).cos() + s as f64 * 0.2 + f as f64);
        let mut mphate = MPhate::new(2);
        mphate.diffusion.t = Some(5);
        let y = mphate.fit_transform(tensor.view()).unwrap();
        assert_eq!(y.shape(), (18, 2));
    }

    #[test]
    fn landmarks_partition_rows() {
        let x = DMatrix::from_row_slice(6, 1, &[0.0, 0.1, 5.0, 5.1, 10.0, 10.0]);
        let owner = landmark_clusters(&x, 3);
        assert_eq!(owner[0], owner[1]);
        assert_eq!(owner[2], owner[3]);
        assert_eq!(owner[4], owner[5]);
        let mut distinct = owner.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct, vec![0, 1, 2]);

        // Only two distinct points: selection stops at two landmarks.
        let same = DMatrix::from_row_slice(4, 1, &[1.0, 1.0, 2.0, 2.0]);
        assert_eq!(landmark_clusters(&same, 3), vec![0, 0, 1, 1]);
    }

    #[test]
    fn landmark_embedding_covers_every_node() {
        let tensor = Array3::from_shape_fn((10, 4, 2), |(t, s, f)| {
            (t as f64 * 0.4).sin() + s as f64 * 0.3 + f as f64 * 0.1
        });
        let mut mphate = MPhate::new(2);
        mphate.n_landmark = Some(12);
        mphate.diffusion.t = Some(4);
        let y = mphate.fit_transform(tensor.view()).unwrap();
        assert_eq!(y.shape(), (40, 2));
        assert!(y.iter().all(|v| v.is_finite()));
    }
}
