use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2};

/// User-supplied distance between two samples.
pub type DistanceFn = Arc<dyn Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64 + Send + Sync>;

/// Pairwise distance used to build a precomputed dissimilarity matrix.
#[derive(Clone)]
pub enum Metric {
    Euclidean,
    SqEuclidean,
    Cityblock,
    Cosine,
    Chebyshev,
    Correlation,
    Custom { name: String, func: DistanceFn },
}

impl Metric {
    /// Wrap a closure as a metric.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64 + Send + Sync + 'static,
    {
        Metric::Custom {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Canonical name, or `None` for closures (those are not encoded in
    /// output file names).
    pub fn name(&self) -> Option<&'static str> {
        Some(match self {
            Metric::Euclidean => "euclidean",
            Metric::SqEuclidean => "sqeuclidean",
            Metric::Cityblock => "cityblock",
            Metric::Cosine => "cosine",
            Metric::Chebyshev => "chebyshev",
            Metric::Correlation => "correlation",
            Metric::Custom { .. } => return None,
        })
    }

    pub fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        match self {
            Metric::Euclidean => squared_euclidean(a, b).sqrt(),
            Metric::SqEuclidean => squared_euclidean(a, b),
            Metric::Cityblock => a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum(),
            Metric::Chebyshev => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, f64::max),
            Metric::Cosine => cosine_distance(a, b),
            Metric::Correlation => {
                let ma = a.mean().unwrap_or(0.0);
                let mb = b.mean().unwrap_or(0.0);
                let ca = a.mapv(|v| v - ma);
                let cb = b.mapv(|v| v - mb);
                cosine_distance(ca.view(), cb.view())
            }
            Metric::Custom { func, .. } => func(a, b),
        }
    }
}

fn squared_euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn cosine_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let na = a.dot(&a).sqrt();
    let nb = b.dot(&b).sqrt();
    if na == 0.0 || nb == 0.0 {
        // Zero vectors have no direction; treat them as maximally dissimilar
        // from everything but another zero vector.
        return if na == nb { 0.0 } else { 1.0 };
    }
    (1.0 - a.dot(&b) / (na * nb)).max(0.0)
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Custom { name, .. } => write!(f, "Custom({name})"),
            other => write!(f, "{}", other.name().unwrap_or("custom")),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Custom { name, .. } => write!(f, "{name}"),
            other => write!(f, "{}", other.name().unwrap_or("custom")),
        }
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Metric::Custom { func: a, .. }, Metric::Custom { func: b, .. }) => Arc::ptr_eq(a, b),
            (a, b) => a.name() == b.name(),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "sqeuclidean" => Ok(Metric::SqEuclidean),
            "cityblock" | "manhattan" | "l1" => Ok(Metric::Cityblock),
            "cosine" => Ok(Metric::Cosine),
            "chebyshev" => Ok(Metric::Chebyshev),
            "correlation" => Ok(Metric::Correlation),
            other => Err(format!("unknown metric '{other}'")),
        }
    }
}

impl serde::Serialize for Metric {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Metric {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Symmetric (n × n) distance matrix between the rows of `x`.
pub fn pairwise_distances(x: ArrayView2<'_, f64>, metric: &Metric) -> Array2<f64> {
    let n = x.nrows();
    let mut d = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let v = metric.distance(x.row(i), x.row(j));
            d[[i, j]] = v;
            d[[j, i]] = v;
        }
    }
    d
}
