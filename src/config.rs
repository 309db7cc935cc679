use std::path::PathBuf;

use crate::forest::ClassifierParams;
use crate::isolation::AnomalyParams;

pub const DEFAULT_MODELS_DIR: &str = "models";
pub const DEFAULT_REMOTE_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LINE_BUDGET: usize = 2_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub models_dir: PathBuf,
    pub anomaly: AnomalyParams,
    pub classifier: ClassifierParams,
    pub remote_model: String,
    pub remote_endpoint: String,
    /// Largest training corpus, in lines, accepted before training is aborted.
    pub line_budget: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            anomaly: AnomalyParams::default(),
            classifier: ClassifierParams::default(),
            remote_model: DEFAULT_REMOTE_MODEL.to_string(),
            remote_endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            line_budget: DEFAULT_LINE_BUDGET,
        }
    }
}

impl Settings {
    /// Uses one seed for both engines.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.anomaly.seed = seed;
        self.classifier.seed = seed;
        self
    }
}
