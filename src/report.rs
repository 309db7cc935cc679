use serde::{Deserialize, Serialize};

use crate::registry::BundleInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub line_number: usize,
    pub score: f64, // [-1, 1], lower is more anomalous
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub line_number: usize,
    pub label: String,
    pub confidence: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub anomalies: Vec<Anomaly>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifications: Option<Vec<Classification>>,
    pub model_used: String,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub model: String,
    pub model_path: String,
    pub trained_at: String,
    pub lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub created_at: String,
    pub path: String,
}

impl From<&BundleInfo> for ModelInfo {
    fn from(info: &BundleInfo) -> Self {
        Self {
            name: info.name.clone(),
            created_at: info.created_at.to_rfc3339(),
            path: info.path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineReport {
    pub total: usize,
    pub matched: usize,
    pub correct: usize,
    pub precision: f64,
    pub recall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelReport {
    pub table: String,
    pub rows: usize,
    pub added: usize,
}
