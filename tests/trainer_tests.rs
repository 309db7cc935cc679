use std::sync::Arc;
use std::time::Duration;

use logtriage::bundle::ModelKind;
use logtriage::classifier::Classifier;
use logtriage::config::Settings;
use logtriage::labels::{write_table, LabeledRow};
use logtriage::registry::ModelRegistry;
use logtriage::trainer::Trainer;
use logtriage::TriageError;

fn trainer(dir: &tempfile::TempDir, settings: Settings) -> (Arc<ModelRegistry>, Trainer) {
    let registry = Arc::new(ModelRegistry::open(dir.path()).unwrap());
    (Arc::clone(&registry), Trainer::new(registry, settings))
}

fn quick_settings() -> Settings {
    let mut s = Settings::default();
    s.anomaly.ensemble_size = 50;
    s.classifier.tree_count = 40;
    s
}

fn build_log() -> String {
    (0..40)
        .map(|i| format!("12:00:{:02} step {} {} ok", i % 60, i, ["fetch", "compile", "link", "package"][i % 4]))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn blank_texts_are_empty_input() {
    let dir = tempfile::tempdir().unwrap();
    let (_, trainer) = trainer(&dir, quick_settings());
    let err = trainer.train_from_texts(&["", "  \n\n"]).unwrap_err();
    assert!(matches!(err, TriageError::EmptyInput));
}

#[test]
fn numbers_only_is_empty_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let (_, trainer) = trainer(&dir, quick_settings());
    let err = trainer.train_from_texts(&["12 34\n0x1f\n2024-01-01 10:00:00"]).unwrap_err();
    assert!(matches!(err, TriageError::EmptyCorpus));
}

#[test]
fn line_budget_aborts_training() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings { line_budget: 10, ..quick_settings() };
    let (registry, trainer) = trainer(&dir, settings);
    let err = trainer.train_from_texts(&[build_log()]).unwrap_err();
    assert!(matches!(err, TriageError::TrainingAborted(_)));
    assert!(registry.list().unwrap().is_empty());
}

#[test]
fn invalid_contamination_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = quick_settings();
    settings.anomaly.contamination = 0.7;
    let (_, trainer) = trainer(&dir, settings);
    let err = trainer.train_from_texts(&[build_log()]).unwrap_err();
    assert!(matches!(err, TriageError::InvalidParameter(_)));
}

#[test]
fn train_publishes_and_lists_models() {
    let dir = tempfile::tempdir().unwrap();
    let (_, trainer) = trainer(&dir, quick_settings());
    let report = trainer.train_from_texts(&[build_log()]).unwrap();
    assert_eq!(report.lines, 40);
    assert!(report.model.starts_with("anomaly_"));

    let models = trainer.list_models().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, report.model);
    assert_eq!(models[0].path, report.model_path);
}

#[test]
fn background_job_reports_completion() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, trainer) = trainer(&dir, quick_settings());
    let mut job = trainer.spawn_train(vec![build_log()]).unwrap();

    let report = loop {
        if let Some(outcome) = job.try_result() {
            break outcome.unwrap();
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    assert!(job.try_result().is_none());
    assert_eq!(registry.latest(ModelKind::Anomaly).unwrap().name, report.model);
}

#[test]
fn background_job_surfaces_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (_, trainer) = trainer(&dir, quick_settings());
    let job = trainer.spawn_train(vec!["   ".to_string()]).unwrap();
    assert!(matches!(job.wait(), Err(TriageError::EmptyInput)));
}

#[test]
fn classifier_from_table_drives_classification() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, trainer) = trainer(&dir, quick_settings());

    let mut rows = Vec::new();
    for i in 0..20 {
        rows.push(LabeledRow::new(format!("disk quota exceeded on volume data{}", i % 3), "DiskFull"));
        rows.push(LabeledRow::new(format!("connection reset by peer host{}", i % 4), "NetworkReset"));
        rows.push(LabeledRow::new(format!("unlabeled noise {i}"), ""));
    }
    let table = dir.path().join("labels.csv");
    write_table(&table, &rows).unwrap();

    let report = trainer.train_classifier(&table).unwrap();
    assert!(report.model.starts_with("classifier_"));
    assert_eq!(report.lines, 40);

    let classifier = Classifier::new(registry);
    let out = classifier
        .classify_text("connection reset by peer host1\n\nDisk quota exceeded on volume data2")
        .unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!((out[0].line_number, out[0].label.as_str()), (1, "NetworkReset"));
    assert_eq!((out[1].line_number, out[1].label.as_str()), (3, "DiskFull"));
    assert!(out.iter().all(|c| c.confidence >= 0.5 && c.confidence <= 1.0));
}

#[test]
fn table_without_labels_has_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (_, trainer) = trainer(&dir, quick_settings());
    let table = dir.path().join("labels.csv");
    write_table(&table, &[LabeledRow::new("some line", "")]).unwrap();
    assert!(matches!(trainer.train_classifier(&table), Err(TriageError::NoLabeledRows)));
}
