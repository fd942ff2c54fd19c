//! Encoder abstraction: one interface over interchangeable
//! dimensionality-reduction algorithms.
//!
//! ```text
//!               ┌───────────────┐
//!   Samples ──▶ │    Encoder     │ ──▶ (samples × 2|3)
//!               │ pca mds tsne  │
//!   Tensor ───▶ │ lle phate     │
//!               │ m-phate       │
//!               └───────────────┘
//! ```
//!
//! Which inputs and calls a variant accepts is declared by
//! [`EncoderKind::capabilities`] and checked when a configuration is
//! validated, before any numeric work starts.

pub mod distance;
pub mod linalg;
pub mod lle;
pub mod mds;
pub mod pca;
pub mod phate;
pub mod tsne;

use std::fmt;

use clap::ValueEnum;
use log::debug;
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

pub use distance::{pairwise_distances, Metric};

use crate::error::EmbeddingFailure;
use linalg::{is_finite, to_array, to_dmatrix};

// ---------------------------------------------------------------------------
// Variant set and capabilities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EncoderKind {
    /// Principal component analysis
    Pca,
    /// Metric multidimensional scaling
    Mds,
    /// t-distributed stochastic neighbour embedding
    Tsne,
    /// Locally linear embedding
    Lle,
    /// Diffusion potential embedding
    Phate,
    /// Multislice diffusion embedding of (time × subject) tensors
    #[value(name = "m-phate")]
    MPhate,
}

/// What a variant supports beyond `fit_transform` on raw coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `transform` with parameters from a previous fit.
    pub transform: bool,
    /// Input given as a dissimilarity matrix.
    pub precomputed: bool,
    /// Joint (time × subject × feature) input; global mode only.
    pub tensor: bool,
}

impl EncoderKind {
    pub const ALL: [EncoderKind; 6] = [
        EncoderKind::Pca,
        EncoderKind::Mds,
        EncoderKind::Tsne,
        EncoderKind::Lle,
        EncoderKind::Phate,
        EncoderKind::MPhate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EncoderKind::Pca => "pca",
            EncoderKind::Mds => "mds",
            EncoderKind::Tsne => "tsne",
            EncoderKind::Lle => "lle",
            EncoderKind::Phate => "phate",
            EncoderKind::MPhate => "m-phate",
        }
    }

    pub fn capabilities(self) -> Capabilities {
        let (transform, precomputed, tensor) = match self {
            EncoderKind::Pca => (true, false, false),
            EncoderKind::Mds => (false, true, false),
            EncoderKind::Tsne => (false, true, false),
            EncoderKind::Lle => (true, false, false),
            EncoderKind::Phate => (false, true, false),
            EncoderKind::MPhate => (false, false, true),
        };
        Capabilities {
            transform,
            precomputed,
            tensor,
        }
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Flat (sample × feature) input as seen by the variants.
#[derive(Debug, Clone, Copy)]
pub enum Samples<'a> {
    Coordinates(&'a DMatrix<f64>),
    /// Symmetric (sample × sample) dissimilarities.
    Dissimilarities(&'a DMatrix<f64>),
}

impl Samples<'_> {
    pub fn len(&self) -> usize {
        match self {
            Samples::Coordinates(m) | Samples::Dissimilarities(m) => m.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Input handed to [`Encoder::fit_transform`].
#[derive(Debug, Clone, Copy)]
pub enum EncoderInput<'a> {
    /// Raw (sample × feature) coordinates.
    Coordinates(ArrayView2<'a, f64>),
    /// Precomputed (sample × sample) distance matrix.
    Dissimilarities(ArrayView2<'a, f64>),
    /// (time × subject × feature) tensor.
    Tensor(ArrayView3<'a, f64>),
}

impl EncoderInput<'_> {
    pub fn samples(&self) -> usize {
        match self {
            EncoderInput::Coordinates(x) | EncoderInput::Dissimilarities(x) => x.nrows(),
            EncoderInput::Tensor(x) => x.shape()[0] * x.shape()[1],
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// A configured dimensionality-reduction algorithm.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoder {
    Pca(pca::Pca),
    Mds(mds::Mds),
    Tsne(tsne::Tsne),
    Lle(lle::Lle),
    Phate(phate::Phate),
    MPhate(phate::MPhate),
}

impl Encoder {
    /// Default-parameter encoder of the given kind.
    pub fn new(kind: EncoderKind, n_components: usize, seed: u64) -> Self {
        match kind {
            EncoderKind::Pca => Encoder::Pca(pca::Pca::new(n_components)),
            EncoderKind::Mds => Encoder::Mds(mds::Mds::new(n_components)),
            EncoderKind::Tsne => Encoder::Tsne(tsne::Tsne::new(n_components, seed)),
            EncoderKind::Lle => Encoder::Lle(lle::Lle::new(n_components)),
            EncoderKind::Phate => Encoder::Phate(phate::Phate::new(n_components)),
            EncoderKind::MPhate => Encoder::MPhate(phate::MPhate::new(n_components)),
        }
    }

    pub fn kind(&self) -> EncoderKind {
        match self {
            Encoder::Pca(_) => EncoderKind::Pca,
            Encoder::Mds(_) => EncoderKind::Mds,
            Encoder::Tsne(_) => EncoderKind::Tsne,
            Encoder::Lle(_) => EncoderKind::Lle,
            Encoder::Phate(_) => EncoderKind::Phate,
            Encoder::MPhate(_) => EncoderKind::MPhate,
        }
    }

    /// Fit to `input` and return its embedding.
    pub fn fit_transform(&mut self, input: EncoderInput<'_>) -> Result<Array2<f64>, EmbeddingFailure> {
        let kind = self.kind();
        let samples = input.samples();
        let fail = |reason: String| EmbeddingFailure::new(kind, samples, reason);

        let y = match input {
            EncoderInput::Tensor(tensor) => match self {
                Encoder::MPhate(m) => {
                    if !tensor.iter().all(|v| v.is_finite()) {
                        return Err(fail("input contains non-finite values".into()));
                    }
                    m.fit_transform(tensor)
                }
                _ => Err(format!("{kind} does not accept tensor input")),
            },
            EncoderInput::Coordinates(x) => {
                let x = to_dmatrix(x);
                if !is_finite(&x) {
                    return Err(fail("input contains non-finite values".into()));
                }
                match self {
                    Encoder::Pca(p) => p.fit_transform(&x),
                    Encoder::Mds(m) => m.fit_dissimilarities(&linalg::row_distances(&x)),
                    Encoder::Tsne(t) => t.fit_transform(Samples::Coordinates(&x)),
                    Encoder::Lle(l) => l.fit_transform(&x),
                    Encoder::Phate(p) => p.fit_transform(Samples::Coordinates(&x)),
                    Encoder::MPhate(_) => Err(format!("{kind} only accepts tensor input")),
                }
            }
            EncoderInput::Dissimilarities(d) => {
                let d = to_dmatrix(d);
                if !is_finite(&d) {
                    return Err(fail("distance matrix contains non-finite values".into()));
                }
                match self {
                    Encoder::Mds(m) => m.fit_dissimilarities(&d),
                    Encoder::Tsne(t) => t.fit_transform(Samples::Dissimilarities(&d)),
                    Encoder::Phate(p) => p.fit_transform(Samples::Dissimilarities(&d)),
                    _ => Err(format!("{kind} does not accept precomputed distances")),
                }
            }
        }
        .map_err(fail)?;

        if let Some(summary) = self.fit_summary() {
            debug!("{kind} fit on {samples} samples: {summary}");
        }
        Ok(to_array(&y))
    }

    /// Quality diagnostic of the last fit, where the algorithm has one.
    pub fn fit_summary(&self) -> Option<String> {
        match self {
            Encoder::Pca(p) => p.model().map(|m| {
                let total: f64 = m.explained_variance.iter().sum();
                format!("explained variance {total:.4}")
            }),
            Encoder::Mds(m) => m.stress().map(|s| format!("stress {s:.4}")),
            Encoder::Tsne(t) => t.kl_divergence().map(|kl| format!("KL divergence {kl:.4}")),
            Encoder::Phate(p) => p.chosen_t().map(|t| format!("diffusion time {t}")),
            Encoder::Lle(_) | Encoder::MPhate(_) => None,
        }
    }

    /// Embed new samples with the parameters of the last fit.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, EmbeddingFailure> {
        let kind = self.kind();
        let m = to_dmatrix(x);
        let y = match self {
            Encoder::Pca(p) => p.transform(&m),
            Encoder::Lle(l) => l.transform(&m),
            _ => Err(format!("{kind} cannot transform without refitting")),
        }
        .map_err(|reason| EmbeddingFailure::new(kind, x.nrows(), reason))?;
        Ok(to_array(&y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn capability_table() {
        for kind in EncoderKind::ALL {
            let caps = kind.capabilities();
            assert_eq!(caps.tensor, kind == EncoderKind::MPhate);
        }
        assert!(EncoderKind::Pca.capabilities().transform);
        assert!(!EncoderKind::Pca.capabilities().precomputed);
        assert!(EncoderKind::Mds.capabilities().precomputed);
        assert!(!EncoderKind::MPhate.capabilities().precomputed);
    }

    #[test]
    fn names_round_trip_through_clap() {
        for kind in EncoderKind::ALL {
            assert_eq!(EncoderKind::from_str(kind.name(), false).unwrap(), kind);
        }
    }

    #[test]
    fn degenerate_input_is_an_embedding_failure() {
        let x = Array2::from_elem((1, 5), 0.5);
        let mut enc = Encoder::new(EncoderKind::Pca, 2, 42);
        let err = enc.fit_transform(EncoderInput::Coordinates(x.view())).unwrap_err();
        assert_eq!(err.encoder, EncoderKind::Pca);
        assert_eq!(err.samples, 1);
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let mut x = Array2::from_elem((6, 3), 0.5);
        x[[2, 1]] = f64::NAN;
        let mut enc = Encoder::new(EncoderKind::Mds, 2, 42);
        assert!(enc.fit_transform(EncoderInput::Coordinates(x.view())).is_err());
    }

    #[test]
    fn pca_fit_then_transform() {
        let x = Array2::from_shape_fn((10, 4), |(i, j)| (i * (j + 1)) as f64 + (j as f64).sin());
        let mut enc = Encoder::new(EncoderKind::Pca, 2, 42);
        let fitted = enc.fit_transform(EncoderInput::Coordinates(x.view())).unwrap();
        let again = enc.transform(x.view()).unwrap();
        assert_eq!(fitted.shape(), &[10, 2]);
        assert!(enc.fit_summary().unwrap().starts_with("explained variance"));
        for (a, b) in fitted.iter().zip(again.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn mds_accepts_precomputed_distances() {
        let x = Array2::from_shape_fn((6, 2), |(i, j)| if j == 0 { i as f64 } else { (i * i) as f64 * 0.1 });
        let d = pairwise_distances(x.view(), &Metric::Euclidean);
        let mut enc = Encoder::new(EncoderKind::Mds, 2, 42);
        assert!(enc.fit_summary().is_none());
        let y = enc.fit_transform(EncoderInput::Dissimilarities(d.view())).unwrap();
        assert_eq!(y.shape(), &[6, 2]);
        assert!(enc.fit_summary().unwrap().starts_with("stress"));
    }

    #[test]
    fn transform_without_support_fails() {
        let x = Array2::from_elem((6, 3), 1.0);
        let enc = Encoder::new(EncoderKind::Tsne, 2, 42);
        assert!(enc.transform(x.view()).is_err());
    }
}
