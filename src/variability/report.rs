use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array1;

use super::normalize::CohortSeries;
use crate::data::MetadataValue;
use crate::error::DegenerateScale;
use crate::smoothing::TimeAxis;

/// Reportable variability signal.
#[derive(Debug, Clone, PartialEq)]
pub enum VariabilitySignal {
    /// One value per time step.
    Global(Array1<f64>),
    /// One z-scored series per cohort.
    Cohorts(Vec<CohortCurve>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CohortCurve {
    pub cohort: MetadataValue,
    pub subjects: usize,
    pub values: Array1<f64>,
}

impl CohortCurve {
    /// Group name used in exported tables: the label prefixed with `g`.
    pub fn group_name(&self) -> String {
        format!("g{}", self.cohort)
    }
}

impl From<CohortSeries> for CohortCurve {
    fn from(series: CohortSeries) -> Self {
        Self {
            cohort: series.cohort,
            subjects: series.members.len(),
            values: series.variability,
        }
    }
}

/// Time-indexed variability report.
#[derive(Debug, Clone, PartialEq)]
pub struct VariabilityReport {
    pub time: TimeAxis,
    pub signal: VariabilitySignal,
    pub degenerate: Vec<DegenerateScale>,
}

impl VariabilityReport {
    /// Displayed time labels of all degenerate columns.
    pub fn degenerate_time_steps(&self) -> Vec<usize> {
        let mut steps: Vec<usize> = self
            .degenerate
            .iter()
            .map(|d| self.time.label(d.column))
            .collect();
        steps.sort_unstable();
        steps.dedup();
        steps
    }

    /// Write the report as delimited text.
    ///
    /// Global: `time,variability`. Cohorts (long format): `cohort,time,std`
    /// with `g`-prefixed group names. NaN cells are left empty.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        match &self.signal {
            VariabilitySignal::Global(values) => {
                out.write_record(["time", "variability"])?;
                for (t, v) in self.time.labels().zip(values.iter()) {
                    out.write_record([t.to_string(), format_value(*v)])?;
                }
            }
            VariabilitySignal::Cohorts(curves) => {
                out.write_record(["cohort", "time", "std"])?;
                for curve in curves {
                    let name = curve.group_name();
                    for (t, v) in self.time.labels().zip(curve.values.iter()) {
                        out.write_record([name.clone(), t.to_string(), format_value(*v)])?;
                    }
                }
            }
        }
        out.flush().context("flushing variability report")?;
        Ok(())
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        self.write_csv(file)
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).context("report is not UTF-8")
    }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}
