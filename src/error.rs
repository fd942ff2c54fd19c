use thiserror::Error;

use crate::encoder::EncoderKind;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Fatal errors raised by the analysis and embedding pipelines.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Shape or length mismatch in the dataset or the cohort table.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A configuration the selected encoder cannot honour. Raised before any
    /// numeric work starts.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// An encoder failed on input it cannot embed. Only fatal outside the
    /// per-subject loop of local mode.
    #[error(transparent)]
    Embedding(#[from] EmbeddingFailure),
}

impl AnalysisError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        AnalysisError::MalformedInput(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        AnalysisError::UnsupportedConfiguration(msg.into())
    }
}

/// An encoder could not produce an embedding for its input.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{encoder} failed on {samples} samples: {reason}")]
pub struct EmbeddingFailure {
    pub encoder: EncoderKind,
    pub samples: usize,
    pub reason: String,
}

impl EmbeddingFailure {
    pub fn new(encoder: EncoderKind, samples: usize, reason: impl Into<String>) -> Self {
        Self {
            encoder,
            samples,
            reason: reason.into(),
        }
    }
}

/// A normalisation column whose range is zero.
///
/// Recoverable: the run continues and the affected cells follow the
/// configured [`DegeneratePolicy`](crate::variability::DegeneratePolicy).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("time step {column}{} has zero range (value {value})", cohort_suffix(.cohort))]
pub struct DegenerateScale {
    /// Internal (zero-based) time-step column.
    pub column: usize,
    /// Cohort the column belongs to, for cohort-mode normalisation.
    pub cohort: Option<String>,
    /// The common value of every entry in the column.
    pub value: f64,
}

fn cohort_suffix(cohort: &Option<String>) -> String {
    match cohort {
        Some(c) => format!(" in cohort {c}"),
        None => String::new(),
    }
}

pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;
