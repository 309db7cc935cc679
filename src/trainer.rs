use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use crate::bundle::BundleModel;
use crate::config::Settings;
use crate::error::{Result, TriageError};
use crate::forest::ClassificationModel;
use crate::isolation::AnomalyModel;
use crate::labels::{read_table, LabeledRow};
use crate::normalize::corpus_from_texts;
use crate::registry::{BundleInfo, ModelRegistry};
use crate::report::{ModelInfo, TrainReport};

/// Trains models and publishes them to the registry.
#[derive(Debug, Clone)]
pub struct Trainer {
    registry: Arc<ModelRegistry>,
    settings: Settings,
}

impl Trainer {
    pub fn new(registry: Arc<ModelRegistry>, settings: Settings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn train_from_texts<S: AsRef<str>>(&self, texts: &[S]) -> Result<TrainReport> {
        self.train_anomaly(texts, &AtomicBool::new(false))
    }

    pub fn train_classifier(&self, table: &Path) -> Result<TrainReport> {
        let rows = read_table(table)?;
        self.train_classifier_rows(&rows, &AtomicBool::new(false))
    }

    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.registry.list()?.iter().map(ModelInfo::from).collect())
    }

    fn train_anomaly<S: AsRef<str>>(&self, texts: &[S], cancel: &AtomicBool) -> Result<TrainReport> {
        if texts.iter().all(|t| t.as_ref().trim().is_empty()) {
            return Err(TriageError::EmptyInput);
        }
        let corpus = corpus_from_texts(texts);
        if corpus.is_empty() {
            return Err(TriageError::EmptyCorpus);
        }
        self.check_budget(corpus.len())?;
        let model = AnomalyModel::train_with_cancel(&corpus, &self.settings.anomaly, cancel)?;
        tracing::info!(lines = corpus.len(), threshold = model.threshold, "anomaly model trained");
        self.publish(BundleModel::Anomaly(model), corpus.len(), cancel)
    }

    fn train_classifier_rows(&self, rows: &[LabeledRow], cancel: &AtomicBool) -> Result<TrainReport> {
        self.check_budget(rows.len())?;
        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.line_norm.as_str(), r.label.as_str()))
            .collect();
        let model = ClassificationModel::train_with_cancel(&pairs, &self.settings.classifier, cancel)?;
        tracing::info!(rows = pairs.len(), labels = model.labels.len(), "classifier trained");
        self.publish(BundleModel::Classifier(model), pairs.len(), cancel)
    }

    fn check_budget(&self, lines: usize) -> Result<()> {
        if lines > self.settings.line_budget {
            return Err(TriageError::TrainingAborted(format!(
                "corpus of {lines} lines exceeds the budget of {}",
                self.settings.line_budget
            )));
        }
        Ok(())
    }

    fn publish(&self, model: BundleModel, lines: usize, cancel: &AtomicBool) -> Result<TrainReport> {
        if cancel.load(Ordering::Relaxed) {
            return Err(TriageError::TrainingAborted("cancelled before publishing".into()));
        }
        let info: BundleInfo = self.registry.publish(model)?;
        Ok(TrainReport {
            model: info.name,
            model_path: info.path.display().to_string(),
            trained_at: info.created_at.to_rfc3339(),
            lines,
        })
    }

    /// Trains an anomaly model on a worker thread.
    pub fn spawn_train(&self, texts: Vec<String>) -> Result<TrainingJob> {
        let trainer = self.clone();
        TrainingJob::spawn("logtriage-train", move |cancel| trainer.train_anomaly(&texts, cancel))
    }

    /// Trains a classifier on a worker thread.
    pub fn spawn_train_classifier(&self, rows: Vec<LabeledRow>) -> Result<TrainingJob> {
        let trainer = self.clone();
        TrainingJob::spawn("logtriage-train-classifier", move |cancel| {
            trainer.train_classifier_rows(&rows, cancel)
        })
    }
}

/// Handle on a background training run.
pub struct TrainingJob {
    cancel: Arc<AtomicBool>,
    receiver: Receiver<Result<TrainReport>>,
    finished: bool,
}

impl TrainingJob {
    fn spawn<F>(name: &str, work: F) -> Result<Self>
    where
        F: FnOnce(&AtomicBool) -> Result<TrainReport> + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, receiver) = mpsc::channel();
        let flag = Arc::clone(&cancel);
        thread::Builder::new().name(name.to_string()).spawn(move || {
            let outcome = work(&flag);
            if let Err(e) = &outcome {
                tracing::warn!(error = %e, "training job failed");
            }
            let _ = tx.send(outcome);
        })?;
        Ok(Self { cancel, receiver, finished: false })
    }

    /// Requests a stop. Best effort: a run that already finished still publishes.
    pub fn abort(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The outcome once the worker is done; `None` while it runs or after the
    /// outcome was already taken.
    pub fn try_result(&mut self) -> Option<Result<TrainReport>> {
        if self.finished {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(outcome) => {
                self.finished = true;
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                Some(Err(TriageError::TrainingAborted("training worker exited without a result".into())))
            }
        }
    }

    pub fn wait(mut self) -> Result<TrainReport> {
        if self.finished {
            return Err(TriageError::TrainingAborted("outcome already taken".into()));
        }
        self.finished = true;
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(TriageError::TrainingAborted("training worker exited without a result".into())))
    }
}
