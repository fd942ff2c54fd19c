//! Deterministic output paths and coordinate CSV export.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::ArrayView1;

use super::{GlobalEmbedding, Trajectory};
use crate::config::EmbeddingConfig;
use crate::encoder::EncoderKind;

const COORDINATE_NAMES: [&str; 3] = ["x", "y", "z"];

/// Naming scheme for every artifact of one embedding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    pub encoder: EncoderKind,
    pub dimension: usize,
    pub window: usize,
    /// Named metric, if any. Custom closures are not encoded.
    pub metric: Option<&'static str>,
}

impl OutputNaming {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            encoder: config.encoder,
            dimension: config.dimension,
            window: config.preprocessing.window,
            metric: config.metric.as_ref().and_then(|m| m.name()),
        }
    }

    /// `{encoder}_{dim}D_r{window}[_{metric}]_{subject}[_global]`
    ///
    /// `subject` is the canonical integer id, without any zero padding the
    /// input key carried.
    pub fn subject_stem(&self, subject: i64, from_global_fit: bool) -> String {
        let mut stem = format!("{}_{}D_r{}", self.encoder, self.dimension, self.window);
        if let Some(metric) = self.metric {
            stem.push('_');
            stem.push_str(metric);
        }
        stem.push_str(&format!("_{subject}"));
        if from_global_fit {
            stem.push_str("_global");
        }
        stem
    }

    pub fn trajectory_stem(&self, trajectory: &Trajectory) -> String {
        self.subject_stem(trajectory.subject, trajectory.from_global_fit)
    }

    pub fn global_plot(&self) -> String {
        format!("{}_global.png", self.encoder)
    }

    pub fn global_csv(&self) -> String {
        format!("{}_global.csv", self.encoder)
    }

    pub fn density_plot(&self) -> String {
        format!("{}_density.png", self.encoder)
    }
}

/// `{out_dir}/{input file stem}`.
pub fn output_dir(out_dir: &Path, input: &Path) -> PathBuf {
    let base = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    out_dir.join(base)
}

fn coordinate_header(dimension: usize) -> impl Iterator<Item = &'static str> {
    COORDINATE_NAMES.into_iter().take(dimension)
}

fn format_row(row: ArrayView1<'_, f64>) -> impl Iterator<Item = String> + '_ {
    row.into_iter().map(|v| format!("{v:.4}"))
}

/// `time,x,y[,z]` with four decimals.
pub fn write_trajectory_csv<W: Write>(trajectory: &Trajectory, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let header: Vec<&str> = std::iter::once("time")
        .chain(coordinate_header(trajectory.dimension()))
        .collect();
    out.write_record(&header)?;
    for (t, row) in trajectory.index().into_iter().zip(trajectory.coordinates.rows()) {
        let record: Vec<String> = std::iter::once(t.to_string()).chain(format_row(row)).collect();
        out.write_record(&record)?;
    }
    out.flush().context("flushing trajectory")?;
    Ok(())
}

/// `subject,time,x,y[,z]`, one row per output row of the joint fit.
pub fn write_global_csv<W: Write>(global: &GlobalEmbedding, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let header: Vec<&str> = ["subject", "time"]
        .into_iter()
        .chain(coordinate_header(global.coordinates.ncols()))
        .collect();
    out.write_record(&header)?;
    for (origin, row) in global.index.iter().zip(global.coordinates.rows()) {
        let record: Vec<String> = [origin.subject.to_string(), global.time.label(origin.step).to_string()]
            .into_iter()
            .chain(format_row(row))
            .collect();
        out.write_record(&record)?;
    }
    out.flush().context("flushing global embedding")?;
    Ok(())
}

pub fn save_trajectory_csv(trajectory: &Trajectory, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_trajectory_csv(trajectory, file)
}

pub fn save_global_csv(global: &GlobalEmbedding, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_global_csv(global, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::RowOrigin;
    use crate::encoder::Metric;
    use crate::smoothing::TimeAxis;
    use ndarray::array;

    #[test]
    fn stems_encode_run_parameters() {
        let naming = OutputNaming {
            encoder: EncoderKind::Tsne,
            dimension: 3,
            window: 5,
            metric: Some("cosine"),
        };
        assert_eq!(naming.subject_stem(12, false), "tsne_3D_r5_cosine_12");
        assert_eq!(naming.subject_stem(12, true), "tsne_3D_r5_cosine_12_global");
        assert_eq!(naming.global_plot(), "tsne_global.png");
    }

    #[test]
    fn custom_metrics_are_not_named() {
        let config = EmbeddingConfig {
            encoder: EncoderKind::MPhate,
            metric: Some(Metric::custom("mine", |a, b| (&a - &b).sum().abs())),
            ..EmbeddingConfig::default()
        };
        let naming = OutputNaming::from_config(&config);
        assert_eq!(naming.subject_stem(1, true), "m-phate_2D_r0_1_global");
    }

    #[test]
    fn output_dir_uses_input_stem() {
        let dir = output_dir(Path::new("/tmp/out"), Path::new("/data/study_a.json"));
        assert_eq!(dir, PathBuf::from("/tmp/out/study_a"));
    }

    #[test]
    fn trajectory_csv_has_time_index() {
        let tr = Trajectory {
            subject: 4,
            time: TimeAxis::new(7, 2),
            coordinates: array![[0.123456, -1.0], [2.0, 3.33333]],
            from_global_fit: false,
        };
        let mut buf = Vec::new();
        write_trajectory_csv(&tr, &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "time,x,y\n7,0.1235,-1.0000\n8,2.0000,3.3333\n"
        );
    }

    #[test]
    fn global_csv_lists_subject_and_time() {
        let global = GlobalEmbedding {
            coordinates: array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            index: vec![
                RowOrigin { subject: 1, step: 0 },
                RowOrigin { subject: 2, step: 0 },
            ],
            time: TimeAxis::new(0, 1),
            time_major: true,
        };
        let mut buf = Vec::new();
        write_global_csv(&global, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "subject,time,x,y,z\n1,0,1.0000,2.0000,3.0000\n2,0,4.0000,5.0000,6.0000\n"
        );
    }
}
