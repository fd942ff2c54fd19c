//! Variability analysis and low-dimensional trajectory embeddings of
//! time-resolved per-subject representations (persistence images or
//! summary-statistic curves).

pub mod color;
pub mod config;
pub mod data;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod render;
pub mod smoothing;
pub mod variability;

pub use config::{EmbeddingConfig, VariabilityConfig};
pub use data::{CohortAssignment, Dataset, RepresentationKind};
pub use embedding::{embed, EmbeddingResult};
pub use encoder::{EncoderKind, Metric};
pub use error::{AnalysisError, DegenerateScale, EmbeddingFailure};
pub use variability::{analyse, VariabilityReport};
