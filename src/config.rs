//! Run configuration for both pipelines.
//!
//! Both structs deserialize from JSON with every field optional; the CLI
//! loads a file first and lets explicit flags override it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::loader::DEFAULT_COHORT_COLUMN;
use crate::encoder::{Capabilities, EncoderKind, Metric};
use crate::error::AnalysisError;
use crate::smoothing::Preprocessing;
use crate::variability::DegeneratePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariabilityConfig {
    #[serde(flatten)]
    pub preprocessing: Preprocessing,
    /// Normalise and aggregate within cohorts instead of globally.
    pub group: bool,
    pub degenerate: DegeneratePolicy,
    /// Label column of the cohort table.
    pub cohort_column: String,
}

impl Default for VariabilityConfig {
    fn default() -> Self {
        Self {
            preprocessing: Preprocessing::default(),
            group: false,
            degenerate: DegeneratePolicy::default(),
            cohort_column: DEFAULT_COHORT_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    #[serde(flatten)]
    pub preprocessing: Preprocessing,
    pub encoder: EncoderKind,
    /// Target dimensionality, 2 or 3.
    pub dimension: usize,
    /// Embed pairwise distances under this metric instead of raw coordinates.
    pub metric: Option<Metric>,
    /// Fit one encoder on all subjects jointly.
    pub global: bool,
    /// Fit once on all subjects, then embed each subject with `transform`.
    pub reuse_global_fit: bool,
    pub seed: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            preprocessing: Preprocessing::default(),
            encoder: EncoderKind::Pca,
            dimension: 2,
            metric: None,
            global: false,
            reuse_global_fit: false,
            seed: 42,
        }
    }
}

impl EmbeddingConfig {
    /// Reject every combination the selected encoder cannot honour.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let caps = self.encoder.capabilities();

        if !(2..=3).contains(&self.dimension) {
            return Err(AnalysisError::unsupported(format!(
                "target dimension must be 2 or 3, got {}",
                self.dimension
            )));
        }
        if caps.tensor && !self.global {
            return Err(AnalysisError::unsupported(format!(
                "{} only supports global embedding",
                self.encoder
            )));
        }
        if let Some(metric) = &self.metric {
            if !caps.precomputed {
                return Err(AnalysisError::unsupported(format!(
                    "{} does not accept precomputed {metric} distances (use one of: {})",
                    self.encoder,
                    encoders_where(|c| c.precomputed)
                )));
            }
            if self.reuse_global_fit {
                return Err(AnalysisError::unsupported(
                    "a precomputed metric cannot be combined with transform-only reuse",
                ));
            }
        }
        if self.reuse_global_fit && !caps.transform {
            return Err(AnalysisError::unsupported(format!(
                "{} cannot embed new samples without refitting (use one of: {})",
                self.encoder,
                encoders_where(|c| c.transform)
            )));
        }
        Ok(())
    }
}

/// Comma-separated names of the encoders with a given capability.
fn encoders_where(has: impl Fn(Capabilities) -> bool) -> String {
    EncoderKind::ALL
        .iter()
        .filter(|k| has(k.capabilities()))
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read a JSON configuration file.
pub fn load_config<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let v = VariabilityConfig::default();
        assert_eq!(v.preprocessing.window, 0);
        assert!(!v.preprocessing.drop_leading);
        assert_eq!(v.preprocessing.leading_steps, 7);
        assert!(!v.group);
        assert_eq!(v.degenerate, DegeneratePolicy::Zero);
        assert_eq!(v.cohort_column, "cluster");

        let e = EmbeddingConfig::default();
        assert_eq!(e.encoder, EncoderKind::Pca);
        assert_eq!(e.dimension, 2);
        assert!(e.metric.is_none());
        assert!(!e.global);
        assert_eq!(e.seed, 42);
        assert!(e.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let e: EmbeddingConfig =
            serde_json::from_str(r#"{"encoder": "tsne", "metric": "cosine", "window": 4}"#).unwrap();
        assert_eq!(e.encoder, EncoderKind::Tsne);
        assert_eq!(e.metric, Some(Metric::Cosine));
        assert_eq!(e.preprocessing.window, 4);
        assert_eq!(e.dimension, 2);
    }

    #[test]
    fn tensor_encoder_requires_global_mode() {
        let mut e = EmbeddingConfig {
            encoder: EncoderKind::MPhate,
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            e.validate(),
            Err(AnalysisError::UnsupportedConfiguration(_))
        ));
        e.global = true;
        assert!(e.validate().is_ok());
    }

    #[test]
    fn metric_needs_precomputed_support() {
        let e = EmbeddingConfig {
            encoder: EncoderKind::Pca,
            metric: Some(Metric::Euclidean),
            ..EmbeddingConfig::default()
        };
        assert!(e.validate().is_err());
        let e = EmbeddingConfig {
            encoder: EncoderKind::Mds,
            ..e
        };
        assert!(e.validate().is_ok());
    }

    #[test]
    fn reuse_needs_transform_support() {
        let e = EmbeddingConfig {
            encoder: EncoderKind::Phate,
            reuse_global_fit: true,
            ..EmbeddingConfig::default()
        };
        match e.validate() {
            Err(AnalysisError::UnsupportedConfiguration(msg)) => {
                assert!(msg.ends_with("(use one of: pca, lle)"), "{msg}")
            }
            other => panic!("unexpected {other:?}"),
        }
        let e = EmbeddingConfig {
            encoder: EncoderKind::Lle,
            ..e
        };
        assert!(e.validate().is_ok());
    }

    #[test]
    fn dimension_is_two_or_three() {
        for (dim, ok) in [(1, false), (2, true), (3, true), (4, false)] {
            let e = EmbeddingConfig {
                dimension: dim,
                ..EmbeddingConfig::default()
            };
            assert_eq!(e.validate().is_ok(), ok, "dimension {dim}");
        }
    }

    #[test]
    fn config_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"group": true, "degenerate": "nan", "drop_leading": true}}"#).unwrap();
        let v: VariabilityConfig = load_config(file.path()).unwrap();
        assert!(v.group);
        assert_eq!(v.degenerate, DegeneratePolicy::Nan);
        assert!(v.preprocessing.drop_leading);
        assert_eq!(v.preprocessing.leading_steps, 7);
    }
}
