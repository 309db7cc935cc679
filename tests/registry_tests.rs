use std::collections::BTreeSet;
use std::fs;

use logtriage::bundle::{BundleModel, ModelKind};
use logtriage::isolation::{AnomalyModel, AnomalyParams};
use logtriage::registry::ModelRegistry;
use logtriage::TriageError;

fn small_model(seed: u64) -> AnomalyModel {
    let corpus: Vec<String> = (0..60)
        .map(|i| format!("worker {} finished job kind {}", ["alpha", "beta", "gamma"][i % 3], ["build", "lint", "docs", "test"][i % 4]))
        .collect();
    let params = AnomalyParams { ensemble_size: 50, seed, ..AnomalyParams::default() };
    AnomalyModel::train(&corpus, &params).unwrap()
}

#[test]
fn publish_then_latest_round_trips_bit_identically() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let model = small_model(42);
    let samples = ["worker alpha finished job kind docs", "worker delta crashed", "unrelated text"];
    let before: Vec<f64> = samples.iter().map(|p| model.score(p)).collect();

    let info = registry.publish(BundleModel::Anomaly(model.clone())).unwrap();
    assert!(info.name.starts_with("anomaly_"));
    assert!(info.path.exists());

    // A fresh registry has an empty cache, so this goes through the file.
    let reopened = ModelRegistry::open(dir.path()).unwrap();
    let bundle = reopened.latest(ModelKind::Anomaly).unwrap();
    assert_eq!(bundle.name, info.name);
    assert_eq!(bundle.created_at, info.created_at);
    let loaded = bundle.anomaly().unwrap();
    assert_eq!(loaded, &model);
    let after: Vec<f64> = samples.iter().map(|p| loaded.score(p)).collect();
    assert_eq!(before, after);
    assert_eq!(loaded.threshold.to_bits(), model.threshold.to_bits());
}

#[test]
fn versions_increase_and_latest_wins() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let first = registry.publish(BundleModel::Anomaly(small_model(1))).unwrap();
    let second = registry.publish(BundleModel::Anomaly(small_model(2))).unwrap();
    assert!(second.name > first.name);
    assert!(second.created_at > first.created_at);

    let latest = registry.latest(ModelKind::Anomaly).unwrap();
    assert_eq!(latest.name, second.name);
    assert_eq!(latest.anomaly().unwrap(), &small_model(2));

    let names: Vec<String> = registry.list().unwrap().into_iter().map(|b| b.name).collect();
    assert_eq!(names, vec![first.name, second.name]);
}

#[test]
fn list_skips_foreign_and_temporary_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("README.txt"), "notes").unwrap();
    fs::write(dir.path().join(".anomaly_20240101000000000000.77.tmp"), "{}").unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    assert!(registry.list().unwrap().is_empty());
    assert!(matches!(
        registry.latest(ModelKind::Classifier),
        Err(TriageError::NoTrainedModel(ModelKind::Classifier))
    ));
}

#[test]
fn corrupt_newest_bundle_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    registry.publish(BundleModel::Anomaly(small_model(3))).unwrap();
    fs::write(dir.path().join("anomaly_29991231235959999999.json"), "{not json").unwrap();

    match registry.latest(ModelKind::Anomaly) {
        Err(TriageError::ModelLoad { name, .. }) => assert_eq!(name, "anomaly_29991231235959999999"),
        other => panic!("expected a load error, got {other:?}"),
    }
}

#[test]
fn unknown_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"{"format":"logtriage-bundle","schema_version":99,"kind":"anomaly","created_at":"2024-01-01T00:00:00Z","model":{}}"#;
    fs::write(dir.path().join("anomaly_20240101000000000000.json"), body).unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let err = registry.latest(ModelKind::Anomaly).unwrap_err();
    match err {
        TriageError::ModelLoad { reason, .. } => assert!(reason.contains("schema version 99")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn foreign_format_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"{"format":"pickle","schema_version":1,"kind":"anomaly","model":{}}"#;
    fs::write(dir.path().join("anomaly_20240101000000000000.json"), body).unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    assert!(matches!(registry.latest(ModelKind::Anomaly), Err(TriageError::ModelLoad { .. })));
}

#[test]
fn concurrent_publishes_of_one_version_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let seeded = registry.publish(BundleModel::Anomaly(small_model(5))).unwrap();
    // A bundle dated far ahead pins every publisher to the same next version.
    fs::copy(&seeded.path, dir.path().join("anomaly_29990101000000000000.json")).unwrap();
    fs::remove_file(&seeded.path).unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let model = small_model(6);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| registry.publish(BundleModel::Anomaly(model.clone()))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let names: BTreeSet<String> = results.into_iter().map(|r| r.unwrap().name).collect();
    assert_eq!(names.len(), 8);
    let listed = registry.list().unwrap();
    assert_eq!(listed.len(), 9);
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    for name in &names {
        let text = fs::read_to_string(dir.path().join(format!("{name}.json"))).unwrap();
        assert!(text.contains("logtriage-bundle"));
    }
}
