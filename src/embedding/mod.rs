//! Embedding orchestration: per-subject (local) or joint (global) fits of a
//! configured encoder, returned as one trajectory per subject.
//!
//! ```text
//!   local   ─▶ subject ─▶ [distances] ─▶ fresh Encoder ─▶ Trajectory
//!   global  ─▶ concatenated | tensor ─▶ Encoder ─▶ GlobalEmbedding ─▶ slices
//!   reuse   ─▶ concatenated ─▶ Encoder (fit once) ─▶ transform(subject)
//! ```

pub mod export;

use log::{info, warn};
use ndarray::{Array2, ArrayView2, Axis};

use crate::config::EmbeddingConfig;
use crate::data::Dataset;
use crate::encoder::{pairwise_distances, Encoder, EncoderInput, EncoderKind};
use crate::error::{EmbeddingFailure, Result};
use crate::smoothing::TimeAxis;

pub use export::OutputNaming;

/// One subject's embedded time series. Row `i` connects to row `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub subject: i64,
    pub time: TimeAxis,
    pub coordinates: Array2<f64>,
    /// Produced from a fit over all subjects rather than this subject alone.
    pub from_global_fit: bool,
}

impl Trajectory {
    /// Displayed time label of every row.
    pub fn index(&self) -> Vec<usize> {
        self.time.labels().collect()
    }

    pub fn dimension(&self) -> usize {
        self.coordinates.ncols()
    }
}

/// Which subject and internal time step an output row of a joint fit came
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowOrigin {
    pub subject: i64,
    pub step: usize,
}

/// Output of a single fit over every subject.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalEmbedding {
    pub coordinates: Array2<f64>,
    /// One entry per row of `coordinates`.
    pub index: Vec<RowOrigin>,
    pub time: TimeAxis,
    /// Rows are time-major (tensor encoders) rather than subject-major.
    pub time_major: bool,
}

impl GlobalEmbedding {
    /// Rows belonging to `subject`, in ascending time order.
    pub fn rows_of(&self, subject: i64) -> Vec<usize> {
        let mut rows: Vec<usize> = (0..self.index.len())
            .filter(|&r| self.index[r].subject == subject)
            .collect();
        rows.sort_by_key(|&r| self.index[r].step);
        rows
    }

    /// Slice the joint output back into per-subject trajectories.
    pub fn trajectories(&self, subjects: &[i64]) -> Vec<Trajectory> {
        subjects
            .iter()
            .map(|&id| Trajectory {
                subject: id,
                time: self.time,
                coordinates: self.coordinates.select(Axis(0), &self.rows_of(id)),
                from_global_fit: true,
            })
            .collect()
    }
}

/// A subject whose local embedding failed.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSubject {
    pub subject: i64,
    pub failure: EmbeddingFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    pub encoder: EncoderKind,
    pub trajectories: Vec<Trajectory>,
    /// Present in global mode.
    pub global: Option<GlobalEmbedding>,
    pub skipped: Vec<SkippedSubject>,
    /// Encoder fits performed: one per subject locally, one otherwise.
    pub fits: usize,
}

/// Run the embedding pipeline.
///
/// Configuration problems are reported before any numeric work. In local
/// mode a failing subject is skipped; a failing joint fit is fatal.
pub fn embed(dataset: &Dataset, config: &EmbeddingConfig) -> Result<EmbeddingResult> {
    config.validate()?;
    let prepared = config.preprocessing.apply(dataset)?;
    let time = config.preprocessing.time_axis(prepared.time_steps());
    info!(
        "embedding {} subjects with {} ({}D, {})",
        prepared.len(),
        config.encoder,
        config.dimension,
        if config.global { "global" } else { "local" }
    );

    let mut result = EmbeddingResult {
        encoder: config.encoder,
        trajectories: Vec::new(),
        global: None,
        skipped: Vec::new(),
        fits: 0,
    };

    let fitted = if config.global {
        let (global, encoder) = embed_global(&prepared, config, time)?;
        result.fits = 1;
        if !config.reuse_global_fit {
            result.trajectories = global.trajectories(&prepared.ids());
        }
        result.global = Some(global);
        Some(encoder)
    } else {
        None
    };

    if config.reuse_global_fit {
        let encoder = match fitted {
            Some(encoder) => encoder,
            None => {
                result.fits = 1;
                fit_on_all(&prepared, config)?
            }
        };
        let (trajectories, skipped) = each_subject(&prepared, time, true, |series| {
            encoder.transform(series)
        });
        result.trajectories = trajectories;
        result.skipped = skipped;
    } else if !config.global {
        let fits = &mut result.fits;
        let (trajectories, skipped) = each_subject(&prepared, time, false, |series| {
            *fits += 1;
            let mut encoder = Encoder::new(config.encoder, config.dimension, config.seed);
            match &config.metric {
                Some(metric) => {
                    let d = pairwise_distances(series, metric);
                    encoder.fit_transform(EncoderInput::Dissimilarities(d.view()))
                }
                None => encoder.fit_transform(EncoderInput::Coordinates(series)),
            }
        });
        result.trajectories = trajectories;
        result.skipped = skipped;
    }

    if !result.skipped.is_empty() {
        warn!(
            "{} of {} subjects could not be embedded",
            result.skipped.len(),
            prepared.len()
        );
    }
    Ok(result)
}

/// Apply `embed_one` to every subject, collecting failures instead of
/// propagating them.
fn each_subject<F>(
    dataset: &Dataset,
    time: TimeAxis,
    from_global_fit: bool,
    mut embed_one: F,
) -> (Vec<Trajectory>, Vec<SkippedSubject>)
where
    F: FnMut(ArrayView2<'_, f64>) -> std::result::Result<Array2<f64>, EmbeddingFailure>,
{
    let mut trajectories = Vec::with_capacity(dataset.len());
    let mut skipped = Vec::new();
    for subject in dataset.subjects() {
        match embed_one(subject.series.view()) {
            Ok(coordinates) => trajectories.push(Trajectory {
                subject: subject.id,
                time,
                coordinates,
                from_global_fit,
            }),
            Err(failure) => {
                warn!("skipping subject {}: {failure}", subject.id);
                skipped.push(SkippedSubject {
                    subject: subject.id,
                    failure,
                });
            }
        }
    }
    (trajectories, skipped)
}

/// Fit one encoder on the concatenated series of every subject.
fn fit_on_all(dataset: &Dataset, config: &EmbeddingConfig) -> Result<Encoder> {
    let all = dataset.concatenated();
    let mut encoder = Encoder::new(config.encoder, config.dimension, config.seed);
    encoder.fit_transform(EncoderInput::Coordinates(all.view()))?;
    Ok(encoder)
}

/// One joint fit over every subject. The fitted encoder is returned so
/// per-subject projections can reuse it.
fn embed_global(
    dataset: &Dataset,
    config: &EmbeddingConfig,
    time: TimeAxis,
) -> Result<(GlobalEmbedding, Encoder)> {
    let ids = dataset.ids();
    let steps = dataset.time_steps();
    let mut encoder = Encoder::new(config.encoder, config.dimension, config.seed);

    if config.encoder.capabilities().tensor {
        let tensor = dataset.time_major_tensor();
        let coordinates = encoder.fit_transform(EncoderInput::Tensor(tensor.view()))?;
        let index = (0..steps)
            .flat_map(|step| ids.iter().map(move |&subject| RowOrigin { subject, step }))
            .collect();
        let global = GlobalEmbedding {
            coordinates,
            index,
            time,
            time_major: true,
        };
        return Ok((global, encoder));
    }

    let all = dataset.concatenated();
    let coordinates = match &config.metric {
        Some(metric) => {
            let d = pairwise_distances(all.view(), metric);
            encoder.fit_transform(EncoderInput::Dissimilarities(d.view()))?
        }
        None => encoder.fit_transform(EncoderInput::Coordinates(all.view()))?,
    };
    let index = ids
        .iter()
        .flat_map(|&subject| (0..steps).map(move |step| RowOrigin { subject, step }))
        .collect();
    let global = GlobalEmbedding {
        coordinates,
        index,
        time,
        time_major: false,
    };
    Ok((global, encoder))
}
