use rayon::prelude::*;
use std::sync::Arc;

use crate::bundle::ModelKind;
use crate::error::{Result, TriageError};
use crate::forest::{accept, ClassificationModel};
use crate::normalize::{split_lines, LogLine};
use crate::registry::ModelRegistry;
use crate::report::Classification;
use crate::rules::FAILURE_RULES;

/// Labels lines with the latest classifier bundle, falling back to the failure rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    registry: Arc<ModelRegistry>,
}

impl Classifier {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn classify_text(&self, text: &str) -> Result<Vec<Classification>> {
        if text.trim().is_empty() {
            return Err(TriageError::EmptyInput);
        }
        self.classify_lines(&split_lines(text))
    }

    /// A missing classifier bundle is not an error here: output is then rule-only.
    pub fn classify_lines(&self, lines: &[LogLine]) -> Result<Vec<Classification>> {
        let bundle = match self.registry.latest(ModelKind::Classifier) {
            Ok(bundle) => Some(bundle),
            Err(TriageError::NoTrainedModel(_)) => {
                tracing::debug!("no classifier bundle, classifying with rules only");
                None
            }
            Err(e) => return Err(e),
        };
        let model = bundle.as_deref().and_then(|b| b.classifier());

        let mut out: Vec<Classification> = lines
            .par_iter()
            .filter_map(|line| classify_line(model, line))
            .collect();
        out.sort_by_key(|c| c.line_number);
        Ok(out)
    }
}

/// The model's answer when it clears the confidence floor, else the first failure rule.
pub fn classify_line(model: Option<&ClassificationModel>, line: &LogLine) -> Option<Classification> {
    if let Some(model) = model {
        let prediction = model.classify(&line.normalized);
        if accept(prediction.confidence) {
            return Some(Classification {
                line_number: line.line_number,
                label: prediction.label,
                confidence: prediction.confidence,
                message: line.raw.clone(),
            });
        }
    }
    FAILURE_RULES.first_match(&line.raw).map(|label| Classification {
        line_number: line.line_number,
        label: label.to_string(),
        confidence: 1.0,
        message: line.raw.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_cover_lines_without_a_model() {
        let line = LogLine::new(7, "ERROR 12:00:01 KERNEL : Segmentation fault");
        let c = classify_line(None, &line).unwrap();
        assert_eq!(c.label, "SegmentationFault");
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.line_number, 7);
        assert!(classify_line(None, &LogLine::new(1, "build ok")).is_none());
    }
}
