//! Analysis delegated to a chat-completion service.
//!
//! The service gets the raw log (truncated) and must answer with a JSON
//! object `{"anomalies": [{line_number, score, message}, ...]}`. The answer
//! is checked against the same contract as local analysis before it is
//! returned; anything else becomes `RemoteAnalysis`.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::analyser::LogAnalyser;
use crate::config::{DEFAULT_REMOTE_ENDPOINT, DEFAULT_REMOTE_MODEL};
use crate::error::{Result, TriageError};
use crate::report::{AnalysisReport, Anomaly};

pub const MAX_PROMPT_CHARS: usize = 20_000;

const SYSTEM_PROMPT: &str = "You are a senior DevOps engineer. Return JSON with key 'anomalies' \
([{line_number:int, score:float, message:str}]). Respond ONLY JSON.";

/// One request/response exchange with a chat model. Errors are plain messages.
pub trait ChatBackend: Send + Sync {
    fn complete(&self, model: &str, system: &str, user: &str) -> std::result::Result<String, String>;
}

impl<T: ChatBackend + ?Sized> ChatBackend for &T {
    fn complete(&self, model: &str, system: &str, user: &str) -> std::result::Result<String, String> {
        (**self).complete(model, system, user)
    }
}

pub struct OpenAiBackend {
    endpoint: String,
    api_key: String,
    agent: ureq::Agent,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, DEFAULT_REMOTE_ENDPOINT)
    }

    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(Duration::from_secs(120)).build();
        Self { endpoint: endpoint.into(), api_key: api_key.into(), agent }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl ChatBackend for OpenAiBackend {
    fn complete(&self, model: &str, system: &str, user: &str) -> std::result::Result<String, String> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
        });
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Content-Type", "application/json")
            .send_string(&body.to_string());

        let text = match response {
            Ok(resp) => resp.into_string().map_err(|e| format!("unreadable response: {e}"))?,
            Err(ureq::Error::Status(401, _)) => return Err("API key rejected".into()),
            Err(ureq::Error::Status(429, _)) => return Err("rate limited".into()),
            Err(e) => return Err(e.to_string()),
        };
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("unexpected response shape: {e}"))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "response has no message content".to_string())
    }
}

pub struct RemoteAnalyser<B: ChatBackend> {
    backend: B,
    model: String,
}

impl RemoteAnalyser<OpenAiBackend> {
    /// `OPENAI_API_KEY`-style construction; a missing key is a remote analysis failure.
    pub fn openai(api_key: Option<String>) -> Result<Self> {
        let key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TriageError::RemoteAnalysis("no OpenAI API key provided".into()))?;
        Ok(Self::new(OpenAiBackend::new(key)))
    }
}

impl<B: ChatBackend> RemoteAnalyser<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, model: DEFAULT_REMOTE_MODEL.to_string() }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl<B: ChatBackend> LogAnalyser for RemoteAnalyser<B> {
    fn analyse(&self, text: &str) -> Result<AnalysisReport> {
        if text.trim().is_empty() {
            return Err(TriageError::EmptyInput);
        }
        let prompt = truncate_chars(text, MAX_PROMPT_CHARS);
        let content = self
            .backend
            .complete(&self.model, SYSTEM_PROMPT, prompt)
            .map_err(TriageError::RemoteAnalysis)?;
        let anomalies = parse_anomalies(&content)?;
        Ok(AnalysisReport {
            anomalies,
            classifications: None,
            model_used: format!("{} (OpenAI)", self.model),
            generated_at: Utc::now().to_rfc3339(),
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Deserialize)]
struct RemotePayload {
    #[serde(default)]
    anomalies: Vec<Anomaly>,
}

/// Parses and checks a model answer. Code fences around the JSON are tolerated.
pub fn parse_anomalies(content: &str) -> Result<Vec<Anomaly>> {
    let body = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let payload: RemotePayload = serde_json::from_str(body)
        .map_err(|e| TriageError::RemoteAnalysis(format!("invalid JSON from model: {e}")))?;
    for a in &payload.anomalies {
        if a.line_number == 0 {
            return Err(TriageError::RemoteAnalysis("anomaly with line number 0".into()));
        }
        if !a.score.is_finite() || !(-1.0..=1.0).contains(&a.score) {
            return Err(TriageError::RemoteAnalysis(format!(
                "anomaly score {} outside [-1, 1]",
                a.score
            )));
        }
    }
    let mut anomalies = payload.anomalies;
    anomalies.sort_by_key(|a| a.line_number);
    Ok(anomalies)
}
