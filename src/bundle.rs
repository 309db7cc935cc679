use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TriageError};
use crate::forest::ClassificationModel;
use crate::isolation::AnomalyModel;

pub const BUNDLE_FORMAT: &str = "logtriage-bundle";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Anomaly,
    Classifier,
}

impl ModelKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ModelKind::Anomaly => "anomaly",
            ModelKind::Classifier => "classifier",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "anomaly" => Some(ModelKind::Anomaly),
            "classifier" => Some(ModelKind::Classifier),
            _ => None,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BundleModel {
    Anomaly(AnomalyModel),
    Classifier(ClassificationModel),
}

impl BundleModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            BundleModel::Anomaly(_) => ModelKind::Anomaly,
            BundleModel::Classifier(_) => ModelKind::Classifier,
        }
    }
}

/// A published, immutable model snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub model: BundleModel,
}

impl ModelBundle {
    pub fn kind(&self) -> ModelKind {
        self.model.kind()
    }

    pub fn anomaly(&self) -> Option<&AnomalyModel> {
        match &self.model {
            BundleModel::Anomaly(m) => Some(m),
            _ => None,
        }
    }

    pub fn classifier(&self) -> Option<&ClassificationModel> {
        match &self.model {
            BundleModel::Classifier(m) => Some(m),
            _ => None,
        }
    }
}

/// Fields read and checked before the payload is decoded.
#[derive(Debug, Deserialize)]
struct Header {
    format: String,
    schema_version: u32,
    kind: ModelKind,
}

#[derive(Serialize, Deserialize)]
struct Envelope<M> {
    format: String,
    schema_version: u32,
    kind: ModelKind,
    created_at: DateTime<Utc>,
    model: M,
}

impl<M> Envelope<M> {
    fn new(kind: ModelKind, created_at: DateTime<Utc>, model: M) -> Self {
        Self { format: BUNDLE_FORMAT.to_string(), schema_version: SCHEMA_VERSION, kind, created_at, model }
    }
}

pub fn encode(model: &BundleModel, created_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let bytes = match model {
        BundleModel::Anomaly(m) => serde_json::to_vec(&Envelope::new(ModelKind::Anomaly, created_at, m))?,
        BundleModel::Classifier(m) => serde_json::to_vec(&Envelope::new(ModelKind::Classifier, created_at, m))?,
    };
    Ok(bytes)
}

pub fn decode(name: &str, bytes: &[u8]) -> Result<ModelBundle> {
    let fail = |reason: String| TriageError::ModelLoad { name: name.to_string(), reason };
    let header: Header = serde_json::from_slice(bytes).map_err(|e| fail(format!("unreadable header: {e}")))?;
    if header.format != BUNDLE_FORMAT {
        return Err(fail(format!("unknown bundle format {:?}", header.format)));
    }
    if header.schema_version != SCHEMA_VERSION {
        return Err(fail(format!(
            "unsupported schema version {} (expected {SCHEMA_VERSION})",
            header.schema_version
        )));
    }
    let (created_at, model) = match header.kind {
        ModelKind::Anomaly => {
            let env: Envelope<AnomalyModel> = serde_json::from_slice(bytes).map_err(|e| fail(e.to_string()))?;
            env.model.validate().map_err(fail)?;
            (env.created_at, BundleModel::Anomaly(env.model))
        }
        ModelKind::Classifier => {
            let env: Envelope<ClassificationModel> = serde_json::from_slice(bytes).map_err(|e| fail(e.to_string()))?;
            env.model.validate().map_err(fail)?;
            (env.created_at, BundleModel::Classifier(env.model))
        }
    };
    Ok(ModelBundle { name: name.to_string(), created_at, model })
}
