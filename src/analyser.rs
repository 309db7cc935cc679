use chrono::Utc;
use std::sync::Arc;

use crate::bundle::ModelKind;
use crate::classifier::Classifier;
use crate::error::{Result, TriageError};
use crate::normalize::{split_lines, LogLine};
use crate::registry::ModelRegistry;
use crate::report::{AnalysisReport, Anomaly};
use crate::rules::ERROR_KEYWORDS;

/// Distance below the threshold given to keyword-fallback anomalies.
pub const FALLBACK_EPSILON: f64 = 0.001;

/// Anything that turns a raw log into scored anomalies.
pub trait LogAnalyser {
    fn analyse(&self, text: &str) -> Result<AnalysisReport>;

    /// Analyse, then attach per-line classifications when a classifier is given.
    fn analyse_with(&self, text: &str, classifier: Option<&Classifier>) -> Result<AnalysisReport> {
        let mut report = self.analyse(text)?;
        if let Some(classifier) = classifier {
            report.classifications = Some(classifier.classify_text(text)?);
        }
        Ok(report)
    }
}

/// Scores lines against the most recent anomaly bundle in the registry.
#[derive(Debug, Clone)]
pub struct Analyser {
    registry: Arc<ModelRegistry>,
}

impl Analyser {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }
}

impl LogAnalyser for Analyser {
    fn analyse(&self, text: &str) -> Result<AnalysisReport> {
        if text.trim().is_empty() {
            return Err(TriageError::EmptyInput);
        }
        let bundle = self.registry.latest(ModelKind::Anomaly)?;
        let model = bundle.anomaly().ok_or_else(|| TriageError::ModelLoad {
            name: bundle.name.clone(),
            reason: "bundle does not hold an anomaly model".into(),
        })?;

        let lines = split_lines(text);
        let normalized: Vec<&str> = lines.iter().map(|l| l.normalized.as_str()).collect();
        let scores = model.score_all(&normalized);

        let mut anomalies: Vec<Anomaly> = lines
            .iter()
            .zip(scores)
            .filter(|(_, score)| model.is_anomalous(*score))
            .map(|(line, score)| Anomaly {
                line_number: line.line_number,
                score,
                message: line.raw.clone(),
            })
            .collect();

        if anomalies.is_empty() {
            anomalies = keyword_fallback(&lines, model.threshold);
            if !anomalies.is_empty() {
                tracing::debug!(count = anomalies.len(), "scorer flagged nothing, using keyword fallback");
            }
        }

        Ok(AnalysisReport {
            anomalies,
            classifications: None,
            model_used: bundle.name.clone(),
            generated_at: Utc::now().to_rfc3339(),
        })
    }
}

/// Every line carrying an error keyword, scored just under the threshold.
pub fn keyword_fallback(lines: &[LogLine], threshold: f64) -> Vec<Anomaly> {
    let score = (threshold - FALLBACK_EPSILON).clamp(-1.0, 1.0);
    lines
        .iter()
        .filter(|l| ERROR_KEYWORDS.is_match(&l.raw))
        .map(|l| Anomaly { line_number: l.line_number, score, message: l.raw.clone() })
        .collect()
}
