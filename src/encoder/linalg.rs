//! Dense linear-algebra building blocks shared by the encoders.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView2};

pub fn to_dmatrix(x: ArrayView2<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[[i, j]])
}

pub fn to_array(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

pub fn is_finite(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}

/// Eigen-decomposition of a symmetric matrix, eigenpairs sorted by
/// descending eigenvalue.
pub fn sorted_eigen(sym: DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let n = sym.nrows();
    let eigen = SymmetricEigen::new(sym);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let vectors = DMatrix::from_fn(n, n, |r, c| eigen.eigenvectors[(r, order[c])]);
    (values, vectors)
}

/// Euclidean distances between the rows of `x`.
pub fn row_distances(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let mut d = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let v = (x.row(i) - x.row(j)).norm();
            d[(i, j)] = v;
            d[(j, i)] = v;
        }
    }
    d
}

/// Flip every column so its largest-magnitude entry is positive.
pub fn flip_signs(m: &mut DMatrix<f64>) {
    for mut col in m.column_iter_mut() {
        let pivot = col
            .iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(0.0);
        if pivot < 0.0 {
            col.neg_mut();
        }
    }
}

/// Classical (Torgerson) scaling of a dissimilarity matrix into `k`
/// dimensions. Negative eigenvalues are clipped to zero.
pub fn classical_mds(d: &DMatrix<f64>, k: usize) -> DMatrix<f64> {
    let n = d.nrows();
    let sq = d.map(|v| v * v);

    let row_means: Vec<f64> = (0..n).map(|i| sq.row(i).mean()).collect();
    let grand = row_means.iter().sum::<f64>() / n as f64;
    let b = DMatrix::from_fn(n, n, |i, j| -0.5 * (sq[(i, j)] - row_means[i] - row_means[j] + grand));

    let (values, vectors) = sorted_eigen(b);
    let mut coords = DMatrix::from_fn(n, k, |i, c| {
        if c < values.len() {
            vectors[(i, c)] * values[c].max(0.0).sqrt()
        } else {
            0.0
        }
    });
    flip_signs(&mut coords);
    coords
}

/// Metric stress majorisation (SMACOF) starting from `init`.
///
/// Returns the configuration and its final raw stress.
pub fn smacof(
    dissimilarities: &DMatrix<f64>,
    init: DMatrix<f64>,
    max_iter: usize,
    eps: f64,
) -> (DMatrix<f64>, f64) {
    let n = dissimilarities.nrows();
    let mut x = init;
    let mut old_stress: Option<f64> = None;
    let mut stress = f64::INFINITY;

    for _ in 0..max_iter {
        let dis = row_distances(&x);
        stress = (&dis - dissimilarities).map(|v| v * v).sum() / 2.0;

        // Guttman transform.
        let mut b = DMatrix::zeros(n, n);
        for i in 0..n {
            let mut diag = 0.0;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let ratio = dissimilarities[(i, j)] / dis[(i, j)].max(1e-5);
                b[(i, j)] = -ratio;
                diag += ratio;
            }
            b[(i, i)] = diag;
        }
        x = (b * &x) / n as f64;

        let scale: f64 = x.row_iter().map(|r| r.norm()).sum();
        if scale <= 0.0 {
            break;
        }
        let normalized = stress / scale;
        if let Some(old) = old_stress {
            if old - normalized < eps {
                break;
            }
        }
        old_stress = Some(normalized);
    }

    (x, stress)
}

/// Distance from each row to its `k`-th nearest other row.
pub fn knn_bandwidth(d: &DMatrix<f64>, k: usize) -> Vec<f64> {
    (0..d.nrows())
        .map(|i| {
            let mut row: Vec<f64> = (0..d.ncols()).filter(|&j| j != i).map(|j| d[(i, j)]).collect();
            row.sort_by(f64::total_cmp);
            let idx = k.clamp(1, row.len().max(1)) - 1;
            row.get(idx).copied().unwrap_or(0.0)
        })
        .collect()
}

/// Adaptive alpha-decay affinity `exp(-(d_ij / σ_i)^α)` with σ_i the
/// distance to the `knn`-th neighbour. Entries below `thresh` are zeroed and
/// the result is symmetrised by averaging.
pub fn alpha_decay_kernel(d: &DMatrix<f64>, knn: usize, decay: f64, thresh: f64) -> DMatrix<f64> {
    let n = d.nrows();
    let bandwidth = knn_bandwidth(d, knn);
    let mut k = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            return 1.0;
        }
        let sigma = bandwidth[i];
        let v = if sigma > 0.0 {
            (-(d[(i, j)] / sigma).powf(decay)).exp()
        } else if d[(i, j)] == 0.0 {
            1.0
        } else {
            0.0
        };
        if v < thresh {
            0.0
        } else {
            v
        }
    });
    let kt = k.transpose();
    k += kt;
    k / 2.0
}

/// Row-stochastic normalisation. Rows summing to zero are left as-is.
pub fn row_normalize(k: &DMatrix<f64>) -> DMatrix<f64> {
    let mut p = k.clone();
    for mut row in p.row_iter_mut() {
        let s = row.sum();
        if s > 0.0 {
            row /= s;
        }
    }
    p
}

/// `m^t` by repeated squaring.
pub fn matrix_power(m: &DMatrix<f64>, mut t: usize) -> DMatrix<f64> {
    let mut result = DMatrix::identity(m.nrows(), m.ncols());
    let mut base = m.clone();
    while t > 0 {
        if t & 1 == 1 {
            result = &result * &base;
        }
        t >>= 1;
        if t > 0 {
            base = &base * &base;
        }
    }
    result
}

/// Centre columns; returns the centred matrix and the column means.
pub fn center_columns(x: &DMatrix<f64>) -> (DMatrix<f64>, Vec<f64>) {
    let means: Vec<f64> = x.column_iter().map(|c| c.mean()).collect();
    let centred = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] - means[j]);
    (centred, means)
}
