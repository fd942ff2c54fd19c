use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::ArrowWriter;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde_json::{json, Map, Value};

const SUBJECTS: i64 = 12;
const TIME_STEPS: usize = 40;
const GRID: usize = 10;
const COHORTS: [&str; 3] = ["low", "mid", "high"];

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn cohort_of(subject: i64) -> usize {
    (subject as usize) % COHORTS.len()
}

/// A persistence-image-like grid: one bump drifting along the diagonal at a
/// cohort-specific speed.
fn image(subject: i64, t: usize, rng: &mut ChaCha8Rng, noise: &Normal<f64>) -> Vec<Vec<f64>> {
    let speed = 0.05 + 0.05 * cohort_of(subject) as f64;
    let centre = 2.0 + (t as f64 * speed) % (GRID as f64 - 4.0);
    let amplitude = 1.0 + 0.1 * subject as f64;
    (0..GRID)
        .map(|i| {
            (0..GRID)
                .map(|j| {
                    let v = gaussian(i as f64, centre, 1.5, amplitude)
                        * gaussian(j as f64, centre + 1.0, 1.5, 1.0);
                    (v + noise.sample(rng)).max(0.0)
                })
                .collect()
        })
        .collect()
}

fn image_dataset(rng: &mut ChaCha8Rng) -> Result<Value> {
    let noise = Normal::new(0.0, 0.02)?;
    let mut root = Map::new();
    root.insert(
        "schema".into(),
        json!({ "kind": "persistence_image", "resolution": [GRID, GRID] }),
    );
    for subject in 1..=SUBJECTS {
        let steps: Vec<Vec<Vec<f64>>> = (0..TIME_STEPS)
            .map(|t| image(subject, t, rng, &noise))
            .collect();
        root.insert(subject.to_string(), json!(steps));
    }
    Ok(Value::Object(root))
}

fn curve_dataset(rng: &mut ChaCha8Rng) -> Result<Value> {
    let noise = Normal::new(0.0, 0.05)?;
    let mut root = Map::new();
    for subject in 1..=SUBJECTS {
        let phase = cohort_of(subject) as f64 * 0.8;
        let total: Vec<f64> = (0..TIME_STEPS)
            .map(|t| 2.0 + (t as f64 * 0.2 + phase).sin() + noise.sample(rng))
            .collect();
        let inf_norm: Vec<f64> = (0..TIME_STEPS)
            .map(|t| 1.0 + 0.5 * (t as f64 * 0.1 + phase).cos() + noise.sample(rng))
            .collect();
        root.insert(
            subject.to_string(),
            json!({ "total_persistence": total, "infinity_norm": inf_norm }),
        );
    }
    Ok(Value::Object(root))
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(file, value).with_context(|| format!("writing {}", path.display()))
}

fn write_cohorts_csv(path: &Path) -> Result<()> {
    let mut out = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    out.write_record(["subject", "cluster"])?;
    for subject in 1..=SUBJECTS {
        out.write_record([subject.to_string(), COHORTS[cohort_of(subject)].to_string()])?;
    }
    out.flush()?;
    Ok(())
}

fn write_cohorts_parquet(path: &Path) -> Result<()> {
    let ids: Vec<i64> = (1..=SUBJECTS).collect();
    let labels: Vec<&str> = ids.iter().map(|&s| COHORTS[cohort_of(s)]).collect();

    let schema = Arc::new(Schema::new(vec![
        Field::new("subject", DataType::Int64, false),
        Field::new("cluster", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(labels)),
        ],
    )?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = ChaCha8Rng::seed_from_u64(42);

    write_json(&out_dir.join("images.json"), &image_dataset(&mut rng)?)?;
    write_json(&out_dir.join("curves.json"), &curve_dataset(&mut rng)?)?;
    write_cohorts_csv(&out_dir.join("cohorts.csv"))?;
    write_cohorts_parquet(&out_dir.join("cohorts.parquet"))?;

    info!("seed 42, {SUBJECTS} subjects × {TIME_STEPS} time steps");
    println!(
        "Wrote {SUBJECTS} subjects ({TIME_STEPS} time steps, {GRID}×{GRID} images) to {}",
        out_dir.display()
    );
    Ok(())
}
