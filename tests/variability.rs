use std::fs;
use std::path::Path;

use ephemeral::config::VariabilityConfig;
use ephemeral::data::{
    load_cohort_table, load_dataset, CohortAssignment, MetadataValue, RepresentationKind,
};
use ephemeral::smoothing::{Preprocessing, TimeAxis};
use ephemeral::variability::{analyse, compute_deviation, global_variability, DegeneratePolicy, VariabilitySignal};
use ephemeral::AnalysisError;
use serde_json::{json, Map, Value};
use tempfile::tempdir;

fn write(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string(value).unwrap()).unwrap();
}

/// Three subjects, ten steps, 2×2 images; subject 2 is offset by +1
/// everywhere.
fn offset_images() -> Value {
    let mut root = Map::new();
    root.insert("schema".into(), json!({"kind": "image"}));
    for id in 1..=3 {
        let steps: Vec<Value> = (0..10)
            .map(|t| {
                let base = 0.25 * t as f64;
                let shift = if id == 2 { 1.0 } else { 0.0 };
                json!([[base + shift, base + shift], [base + shift, base + shift]])
            })
            .collect();
        root.insert(id.to_string(), Value::Array(steps));
    }
    Value::Object(root)
}

fn curves(subjects: i64, steps: usize) -> Value {
    let mut root = Map::new();
    for id in 1..=subjects {
        let values: Vec<f64> = (0..steps)
            .map(|t| ((t as f64) * 0.4 + id as f64).sin() * id as f64)
            .collect();
        root.insert(id.to_string(), json!({ "mean": values, "max": values }));
    }
    Value::Object(root)
}

#[test]
fn offset_subject_scenario_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("offset.json");
    write(&path, &offset_images());

    let ds = load_dataset(&path, &RepresentationKind::Image).unwrap();
    assert_eq!(ds.ids(), vec![1, 2, 3]);
    assert_eq!((ds.time_steps(), ds.dim()), (10, 4));

    let dev = compute_deviation(ds.stacked().view(), ds.kind());
    let global = global_variability(dev.distances.view(), DegeneratePolicy::Zero);
    for t in 0..10 {
        let d = dev.distances.column(t);
        // Subject 2 sits twice as far from the mean as the others.
        assert!((d[1] - 2.0 * d[0]).abs() < 1e-12);
        assert!((d[0] - d[2]).abs() < 1e-12);
        let n = global.normalized.column(t);
        assert_eq!(n.to_vec(), vec![0.0, 1.0, 0.0]);
    }
    assert!(global.degenerate.is_empty());
}

#[test]
fn identical_subjects_report_zero_and_flag_every_step() {
    let mut root = Map::new();
    for id in 1..=4 {
        root.insert(id.to_string(), json!({ "mean": [1.0, 2.0, 3.0, 4.0] }));
    }
    let dir = tempdir().unwrap();
    let path = dir.path().join("same.json");
    write(&path, &Value::Object(root));

    let ds = load_dataset(&path, &RepresentationKind::from_statistic(Some("mean"))).unwrap();
    let report = analyse(&ds, &VariabilityConfig::default(), None).unwrap();
    match &report.signal {
        VariabilitySignal::Global(values) => assert!(values.iter().all(|&v| v == 0.0)),
        other => panic!("unexpected signal {other:?}"),
    }
    assert_eq!(report.degenerate_time_steps(), vec![0, 1, 2, 3]);

    let nan = VariabilityConfig {
        degenerate: DegeneratePolicy::Nan,
        ..VariabilityConfig::default()
    };
    let report = analyse(&ds, &nan, None).unwrap();
    assert_eq!(
        report.to_csv_string().unwrap(),
        "time,variability\n0,\n1,\n2,\n3,\n"
    );
}

#[test]
fn leading_drop_offsets_reported_time() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("curves.json");
    write(&path, &curves(5, 20));

    let ds = load_dataset(&path, &RepresentationKind::from_statistic(Some("mean"))).unwrap();
    let config = VariabilityConfig {
        preprocessing: Preprocessing::new(4, true),
        ..VariabilityConfig::default()
    };
    let report = analyse(&ds, &config, None).unwrap();
    assert_eq!(report.time, TimeAxis::new(7, 13));

    let csv = report.to_csv_string().unwrap();
    let first = csv.lines().nth(1).unwrap();
    assert!(first.starts_with("7,"), "{first}");
    assert_eq!(csv.lines().count(), 14);
}

#[test]
fn cohort_mode_from_csv_table() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("curves.json");
    let table = dir.path().join("cohorts.csv");
    write(&data, &curves(6, 12));
    fs::write(&table, "subject,cluster\n1,a\n2,a\n3,a\n4,b\n5,b\n6,c\n").unwrap();

    let ds = load_dataset(&data, &RepresentationKind::from_statistic(Some("max"))).unwrap();
    let cohorts = load_cohort_table(&table, "cluster").unwrap();
    let assignment = CohortAssignment::align(&ds, &cohorts).unwrap();
    assert_eq!(assignment.label_of(5), Some(&MetadataValue::String("b".into())));

    let config = VariabilityConfig {
        group: true,
        ..VariabilityConfig::default()
    };
    let report = analyse(&ds, &config, Some(&assignment)).unwrap();
    let curves = match &report.signal {
        VariabilitySignal::Cohorts(curves) => curves,
        other => panic!("unexpected signal {other:?}"),
    };
    assert_eq!(curves.len(), 3);
    assert_eq!(curves[0].subjects, 3);

    // z-scored: zero mean across time.
    let a = &curves[0].values;
    assert!((a.sum() / a.len() as f64).abs() < 1e-9);
    // Singleton cohort is undefined.
    assert!(curves[2].values.iter().all(|v| v.is_nan()));

    let csv = report.to_csv_string().unwrap();
    assert!(csv.starts_with("cohort,time,std\nga,0,"));
    assert_eq!(csv.lines().count(), 1 + 3 * 12);
}

#[test]
fn cohort_table_length_mismatch_is_malformed() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("curves.json");
    let table = dir.path().join("cohorts.json");
    write(&data, &curves(4, 8));
    write(&table, &json!([{"cluster": 0}, {"cluster": 1}]));

    let ds = load_dataset(&data, &RepresentationKind::from_statistic(Some("mean"))).unwrap();
    let cohorts = load_cohort_table(&table, "cluster").unwrap();
    assert!(matches!(
        CohortAssignment::align(&ds, &cohorts),
        Err(AnalysisError::MalformedInput(_))
    ));
}

#[test]
fn report_is_saved_to_disk() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("images.json");
    write(&data, &offset_images());
    let ds = load_dataset(&data, &RepresentationKind::Image).unwrap();
    let report = analyse(&ds, &VariabilityConfig::default(), None).unwrap();

    let out = dir.path().join("report.csv");
    report.save_csv(&out).unwrap();
    let text = fs::read_to_string(&out).unwrap();
    assert!(text.starts_with("time,variability\n0,"));
    assert_eq!(text.lines().count(), 11);
}

#[test]
fn degenerate_step_under_nan_policy_stays_local_to_its_cell() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("curves.json");
    let table = dir.path().join("cohorts.csv");
    write(
        &data,
        &json!({
            "1": {"mean": [0.0, 0.0, 1.0, 2.0]},
            "2": {"mean": [1.0, 0.0, 0.0, 5.0]},
            "3": {"mean": [5.0, 0.0, 3.0, 1.0]},
        }),
    );
    fs::write(&table, "subject,cluster\n1,1\n2,1\n3,1\n").unwrap();

    let ds = load_dataset(&data, &RepresentationKind::from_statistic(Some("mean"))).unwrap();
    let cohorts = load_cohort_table(&table, "cluster").unwrap();
    let assignment = CohortAssignment::align(&ds, &cohorts).unwrap();
    let config = VariabilityConfig {
        group: true,
        degenerate: DegeneratePolicy::Nan,
        ..VariabilityConfig::default()
    };
    let report = analyse(&ds, &config, Some(&assignment)).unwrap();
    assert_eq!(report.degenerate_time_steps(), vec![1]);

    let csv = report.to_csv_string().unwrap();
    let rows: Vec<&str> = csv.lines().skip(1).collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[1], "g1,1,");
    for row in [rows[0], rows[2], rows[3]] {
        let value: f64 = row.rsplit(',').next().unwrap().parse().unwrap();
        assert!(value.is_finite(), "{row}");
    }
}
