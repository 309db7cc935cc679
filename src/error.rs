use thiserror::Error;

use crate::bundle::ModelKind;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("no usable text submitted")]
    EmptyInput,
    #[error("training corpus is empty after normalization")]
    EmptyCorpus,
    #[error("no labeled rows found")]
    NoLabeledRows,
    #[error("no trained {0} model available")]
    NoTrainedModel(ModelKind),
    #[error("remote analysis failed: {0}")]
    RemoteAnalysis(String),
    #[error("cannot load model bundle {name}: {reason}")]
    ModelLoad { name: String, reason: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid label table: {0}")]
    InvalidTable(String),
    #[error("training aborted: {0}")]
    TrainingAborted(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TriageError>;
