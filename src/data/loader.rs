use std::path::Path;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};
use log::{debug, info};
use ndarray::Array2;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{CohortTable, Dataset, MetadataValue, RepresentationKind, Subject};
use crate::error::AnalysisError;

/// Default cohort-label column of the participant table.
pub const DEFAULT_COHORT_COLUMN: &str = "cluster";

// ---------------------------------------------------------------------------
// Dataset loader
// ---------------------------------------------------------------------------

/// Load a subject dataset from a JSON file.
///
/// Expected schema (image kind, one array per time step, nesting allowed):
///
/// ```json
/// {
///   "101": [[0.0, 0.1, ...], [0.0, 0.2, ...], ...],
///   "102": [...],
///   "schema": { ... }
/// }
/// ```
///
/// For the curve kind every subject maps statistic names to arrays:
/// `{ "101": { "total_persistence": [1.0, 1.2, ...] } }`.
pub fn load_dataset(path: &Path, kind: &RepresentationKind) -> Result<Dataset> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    let dataset = dataset_from_json(&root, kind)?;
    info!(
        "loaded {} subjects × {} time steps × {} dims from {}",
        dataset.len(),
        dataset.time_steps(),
        dataset.dim(),
        path.display()
    );
    Ok(dataset)
}

/// Build a dataset from an already parsed JSON document. Keys that are not
/// integers are auxiliary metadata and are skipped.
pub fn dataset_from_json(root: &JsonValue, kind: &RepresentationKind) -> Result<Dataset> {
    let obj = root
        .as_object()
        .context("Expected top-level JSON object keyed by subject")?;

    let mut subjects = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        let Ok(id) = key.trim().parse::<i64>() else {
            debug!("skipping non-subject key '{key}'");
            continue;
        };
        let subject = match kind {
            RepresentationKind::Image => image_subject(id, value)?,
            RepresentationKind::Curve { statistic } => curve_subject(id, value, statistic)?,
        };
        subjects.push(subject);
    }

    Ok(Dataset::new(kind.clone(), subjects)?)
}

fn image_subject(id: i64, value: &JsonValue) -> Result<Subject> {
    let steps = value
        .as_array()
        .with_context(|| format!("Subject {id}: expected an array of time steps"))?;

    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(steps.len());
    for (t, step) in steps.iter().enumerate() {
        let mut row = Vec::new();
        flatten_numbers(step, &mut row)
            .with_context(|| format!("Subject {id}, time step {t}"))?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(AnalysisError::malformed(format!(
                    "subject {id}: time step {t} has {} values, time step 0 has {}",
                    row.len(),
                    first.len()
                ))
                .into());
            }
        }
        rows.push(row);
    }

    let dim = rows.first().map_or(0, Vec::len);
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let series = Array2::from_shape_vec((steps.len(), dim), flat)
        .with_context(|| format!("Subject {id}: ragged time steps"))?;
    Ok(Subject::new(id, series))
}

fn curve_subject(id: i64, value: &JsonValue, statistic: &str) -> Result<Subject> {
    let obj = value
        .as_object()
        .with_context(|| format!("Subject {id}: expected an object of summary statistics"))?;
    let Some(curve) = obj.get(statistic) else {
        return Err(AnalysisError::malformed(format!(
            "subject {id} has no summary statistic '{statistic}'"
        ))
        .into());
    };
    let values = json_array_to_f64(curve, id, statistic)?;
    Ok(Subject::from_curve(id, values))
}

/// Row-major flattening of arbitrarily nested numeric arrays.
fn flatten_numbers(val: &JsonValue, out: &mut Vec<f64>) -> Result<()> {
    match val {
        JsonValue::Array(items) => {
            for item in items {
                flatten_numbers(item, out)?;
            }
            Ok(())
        }
        JsonValue::Number(n) => {
            out.push(n.as_f64().context("number out of range")?);
            Ok(())
        }
        JsonValue::Null => {
            out.push(f64::NAN);
            Ok(())
        }
        other => bail!("expected a number, found {other}"),
    }
}

fn json_array_to_f64(val: &JsonValue, id: i64, statistic: &str) -> Result<Vec<f64>> {
    let arr = val
        .as_array()
        .with_context(|| format!("Subject {id}: '{statistic}' is not an array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Subject {id}, {statistic}[{j}]: not a number"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Cohort tables
// ---------------------------------------------------------------------------

/// Load the cohort-label column of a participant table. Dispatch by
/// extension.
///
/// Supported formats:
/// * `.csv`     – header row, one participant per row
/// * `.json`    – `[{ "cluster": 0, ... }, ...]`
/// * `.parquet` – any scalar column
///
/// Rows must follow the sorted subject order of the dataset.
pub fn load_cohort_table(path: &Path, column: &str) -> Result<CohortTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let labels = match ext.as_str() {
        "parquet" | "pq" => load_parquet_column(path, column)?,
        "json" => load_json_column(path, column)?,
        "csv" => load_csv_column(path, column)?,
        other => bail!("Unsupported cohort table extension: .{other}"),
    };

    info!("loaded {} cohort labels from {}", labels.len(), path.display());
    Ok(CohortTable {
        column: column.to_string(),
        labels,
    })
}

fn load_csv_column(path: &Path, column: &str) -> Result<Vec<MetadataValue>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let idx = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .position(|h| h == column)
        .with_context(|| format!("CSV missing '{column}' column"))?;

    let mut labels = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        labels.push(parse_label(record.get(idx).unwrap_or("")));
    }
    Ok(labels)
}

/// Integer, then float, else text; an empty cell is missing.
fn parse_label(s: &str) -> MetadataValue {
    if s.is_empty() {
        MetadataValue::Null
    } else if let Ok(i) = s.parse() {
        MetadataValue::Integer(i)
    } else if let Ok(v) = s.parse() {
        MetadataValue::Float(v)
    } else {
        MetadataValue::String(s.to_string())
    }
}

fn load_json_column(path: &Path, column: &str) -> Result<Vec<MetadataValue>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    let records = root.as_array().context("Expected top-level JSON array")?;

    records
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let obj = rec
                .as_object()
                .with_context(|| format!("Row {i} is not a JSON object"))?;
            Ok(obj.get(column).map_or(MetadataValue::Null, json_label))
        })
        .collect()
}

fn json_label(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::Null => MetadataValue::Null,
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => MetadataValue::Integer(i),
            (None, Some(v)) => MetadataValue::Float(v),
            (None, None) => MetadataValue::String(n.to_string()),
        },
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        other => MetadataValue::String(other.to_string()),
    }
}

fn load_parquet_column(path: &Path, column: &str) -> Result<Vec<MetadataValue>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut labels = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let idx = batch
            .schema()
            .index_of(column)
            .map_err(|_| anyhow::anyhow!("Parquet file missing '{column}' column"))?;
        let col = batch.column(idx).as_ref();
        for row in 0..batch.num_rows() {
            labels.push(arrow_label(col, row)?);
        }
    }
    Ok(labels)
}

/// Label at `row` of a string, integer or float Arrow column.
fn arrow_label(col: &dyn Array, row: usize) -> Result<MetadataValue> {
    if col.is_null(row) {
        return Ok(MetadataValue::Null);
    }
    let label = match col.data_type() {
        DataType::Utf8 => MetadataValue::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => MetadataValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => MetadataValue::Integer(col.as_primitive::<Int32Type>().value(row).into()),
        DataType::Int64 => MetadataValue::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => MetadataValue::Float(col.as_primitive::<Float32Type>().value(row).into()),
        DataType::Float64 => MetadataValue::Float(col.as_primitive::<Float64Type>().value(row)),
        other => bail!("unsupported cohort label type {other:?}"),
    };
    Ok(label)
}
