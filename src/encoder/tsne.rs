use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use super::pca::Pca;
use super::Samples;

const MACHINE_EPSILON: f64 = f64::EPSILON;

/// Exact t-distributed stochastic neighbour embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Tsne {
    pub n_components: usize,
    pub perplexity: f64,
    pub early_exaggeration: f64,
    pub exploration_iter: usize,
    pub max_iter: usize,
    pub min_grad_norm: f64,
    pub seed: u64,
    kl_divergence: Option<f64>,
}

impl Tsne {
    pub fn new(n_components: usize, seed: u64) -> Self {
        Self {
            n_components,
            perplexity: 30.0,
            early_exaggeration: 12.0,
            exploration_iter: 250,
            max_iter: 1000,
            min_grad_norm: 1e-7,
            seed,
            kl_divergence: None,
        }
    }

    pub fn kl_divergence(&self) -> Option<f64> {
        self.kl_divergence
    }

    pub fn fit_transform(&mut self, samples: Samples<'_>) -> Result<DMatrix<f64>, String> {
        let n = samples.len();
        if self.perplexity >= n as f64 {
            return Err(format!(
                "perplexity ({}) must be less than n_samples ({n})",
                self.perplexity
            ));
        }

        let distances = match samples {
            Samples::Coordinates(x) => squared_distances(x),
            Samples::Dissimilarities(d) => d.clone(),
        };
        let p = joint_probabilities(&distances, self.perplexity);

        let init = match samples {
            Samples::Coordinates(x) if x.ncols() >= self.n_components => {
                let y = Pca::new(self.n_components).fit_transform(x)?;
                let std = column_std(&y, 0);
                if std > 0.0 {
                    y * (1e-4 / std)
                } else {
                    self.random_init(n)?
                }
            }
            _ => self.random_init(n)?,
        };

        let learning_rate = (n as f64 / self.early_exaggeration / 4.0).max(50.0);
        let dof = (self.n_components.saturating_sub(1)).max(1) as f64;

        let mut y = init;
        let mut update: DMatrix<f64> = DMatrix::zeros(n, self.n_components);
        let mut gains: DMatrix<f64> = DMatrix::from_element(n, self.n_components, 1.0);

        let exaggerated = &p * self.early_exaggeration;
        for it in 0..self.max_iter {
            let exploring = it < self.exploration_iter;
            let momentum = if exploring { 0.5 } else { 0.8 };
            let target = if exploring { &exaggerated } else { &p };

            let (kl, grad) = kl_gradient(target, &y, dof);
            if !exploring {
                self.kl_divergence = Some(kl);
            }

            for ((g, u), gain) in grad.iter().zip(update.iter()).zip(gains.iter_mut()) {
                if u * g < 0.0 {
                    *gain += 0.2;
                } else {
                    *gain *= 0.8;
                }
                *gain = gain.max(0.01);
            }
            let scaled = grad.component_mul(&gains);
            update = &update * momentum - scaled * learning_rate;
            y += &update;

            if grad.norm() < self.min_grad_norm {
                break;
            }
        }

        if !y.iter().all(|v| v.is_finite()) {
            return Err("optimisation diverged".into());
        }
        Ok(y)
    }

    fn random_init(&self, n: usize) -> Result<DMatrix<f64>, String> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let normal = Normal::new(0.0, 1e-4).map_err(|e| e.to_string())?;
        Ok(DMatrix::from_fn(n, self.n_components, |_, _| normal.sample(&mut rng)))
    }
}

fn squared_distances(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    DMatrix::from_fn(n, n, |i, j| (x.row(i) - x.row(j)).norm_squared())
}

fn column_std(y: &DMatrix<f64>, c: usize) -> f64 {
    let col = y.column(c);
    let mean = col.mean();
    let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / col.len().max(1) as f64;
    var.sqrt()
}

/// Symmetrised joint probabilities with per-point bandwidths matched to the
/// target perplexity by binary search.
fn joint_probabilities(distances: &DMatrix<f64>, perplexity: f64) -> DMatrix<f64> {
    let n = distances.nrows();
    let target_entropy = perplexity.ln();
    let mut conditional = DMatrix::zeros(n, n);

    for i in 0..n {
        let mut beta = 1.0;
        let (mut beta_min, mut beta_max) = (f64::NEG_INFINITY, f64::INFINITY);
        let mut row = vec![0.0; n];

        for _ in 0..100 {
            let mut sum = 0.0;
            for j in 0..n {
                row[j] = if j == i {
                    0.0
                } else {
                    (-distances[(i, j)] * beta).exp()
                };
                sum += row[j];
            }
            if sum == 0.0 {
                sum = MACHINE_EPSILON;
            }
            let mut weighted = 0.0;
            for j in 0..n {
                row[j] /= sum;
                weighted += distances[(i, j)] * row[j];
            }
            let entropy = sum.ln() + beta * weighted;
            let diff = entropy - target_entropy;
            if diff.abs() <= 1e-5 {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max == f64::INFINITY {
                    beta * 2.0
                } else {
                    (beta + beta_max) / 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min == f64::NEG_INFINITY {
                    beta / 2.0
                } else {
                    (beta + beta_min) / 2.0
                };
            }
        }

        for j in 0..n {
            conditional[(i, j)] = row[j];
        }
    }

    let joint = &conditional + conditional.transpose();
    let total = joint.sum().max(MACHINE_EPSILON);
    joint.map(|v| (v / total).max(MACHINE_EPSILON))
}

/// KL divergence between `p` and the Student-t affinities of `y`, and its
/// gradient with respect to `y`.
fn kl_gradient(p: &DMatrix<f64>, y: &DMatrix<f64>, dof: f64) -> (f64, DMatrix<f64>) {
    let n = y.nrows();
    let exponent = (dof + 1.0) / 2.0;

    let mut num = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let d = (y.row(i) - y.row(j)).norm_squared();
            let v = (1.0 + d / dof).powf(-exponent);
            num[(i, j)] = v;
            num[(j, i)] = v;
        }
    }
    let total = num.sum().max(MACHINE_EPSILON);

    let mut kl = 0.0;
    let mut grad = DMatrix::zeros(n, y.ncols());
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let q = (num[(i, j)] / total).max(MACHINE_EPSILON);
            let pij = p[(i, j)];
            kl += pij * (pij.max(MACHINE_EPSILON) / q).ln();
            let coeff = (pij - q) * num[(i, j)];
            for c in 0..y.ncols() {
                grad[(i, c)] += coeff * (y[(i, c)] - y[(j, c)]);
            }
        }
    }
    let c = 2.0 * (dof + 1.0) / dof;
    (kl, grad * c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clusters() -> DMatrix<f64> {
        DMatrix::from_fn(20, 5, |i, j| {
            let centre = if i < 10 { 0.0 } else { 10.0 };
            centre + ((i * 7 + j * 3) % 5) as f64 * 0.1
        })
    }

    #[test]
    fn probabilities_sum_to_one() {
        let p = joint_probabilities(&squared_distances(&two_clusters()), 5.0);
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert!((&p - p.transpose()).abs().max() < 1e-15);
    }

    #[test]
    fn clusters_stay_separated() {
        let x = two_clusters();
        let mut tsne = Tsne::new(2, 42);
        tsne.perplexity = 5.0;
        tsne.max_iter = 500;
        let y = tsne.fit_transform(Samples::Coordinates(&x)).unwrap();
        assert_eq!(y.shape(), (20, 2));

        let centroid = |range: std::ops::Range<usize>| {
            let len = range.len() as f64;
            let mut c = nalgebra::RowDVector::zeros(2);
            for i in range {
                c += y.row(i);
            }
            c / len
        };
        let a = centroid(0..10);
        let b = centroid(10..20);
        let spread = (0..10).map(|i| (y.row(i) - &a).norm()).fold(0.0, f64::max);
        assert!((a - b).norm() > spread);
    }

    #[test]
    fn perplexity_must_be_below_sample_count() {
        let x = DMatrix::from_element(10, 3, 1.0);
        assert!(Tsne::new(2, 42).fit_transform(Samples::Coordinates(&x)).is_err());
    }
}
