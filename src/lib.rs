pub mod error;
pub mod config;
pub mod normalize;
pub mod vectorizer;
pub mod isolation;
pub mod forest;
pub mod rules;
pub mod bundle;
pub mod registry;
pub mod report;
pub mod analyser;
pub mod classifier;
pub mod remote;
pub mod labels;
pub mod trainer;

pub use error::{Result, TriageError};
