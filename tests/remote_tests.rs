use std::sync::Mutex;

use logtriage::analyser::LogAnalyser;
use logtriage::remote::{ChatBackend, RemoteAnalyser, MAX_PROMPT_CHARS};
use logtriage::TriageError;

struct Canned {
    answer: Result<String, String>,
    seen: Mutex<Vec<(String, usize)>>,
}

impl Canned {
    fn ok(answer: &str) -> Self {
        Self { answer: Ok(answer.to_string()), seen: Mutex::new(Vec::new()) }
    }

    fn failing(reason: &str) -> Self {
        Self { answer: Err(reason.to_string()), seen: Mutex::new(Vec::new()) }
    }
}

impl ChatBackend for Canned {
    fn complete(&self, model: &str, _system: &str, user: &str) -> Result<String, String> {
        self.seen.lock().unwrap().push((model.to_string(), user.chars().count()));
        self.answer.clone()
    }
}

#[test]
fn answer_is_mapped_into_a_report() {
    let backend = Canned::ok(r#"{"anomalies":[{"line_number":2,"score":-0.8,"message":"Segmentation fault"}]}"#);
    let analyser = RemoteAnalyser::new(backend);
    let report = analyser.analyse("ok\nSegmentation fault").unwrap();
    assert_eq!(report.model_used, "gpt-4o-mini (OpenAI)");
    assert_eq!(report.anomalies.len(), 1);
    assert_eq!(report.anomalies[0].line_number, 2);
    assert_eq!(report.anomalies[0].score, -0.8);
}

#[test]
fn unordered_answer_is_reported_in_line_order() {
    let backend = Canned::ok(
        r#"{"anomalies":[{"line_number":3,"score":-0.1,"message":"c"},{"line_number":1,"score":-0.7,"message":"a"}]}"#,
    );
    let report = RemoteAnalyser::new(backend).analyse("a\nb\nc").unwrap();
    let lines: Vec<usize> = report.anomalies.iter().map(|a| a.line_number).collect();
    assert_eq!(lines, vec![1, 3]);
}

#[test]
fn long_input_is_truncated() {
    let analyser = RemoteAnalyser::new(Canned::ok(r#"{"anomalies":[]}"#)).with_model("gpt-test");
    let text = "é".repeat(MAX_PROMPT_CHARS + 500);
    let report = analyser.analyse(&text).unwrap();
    assert_eq!(report.model_used, "gpt-test (OpenAI)");
    assert!(report.anomalies.is_empty());
}

#[test]
fn truncation_reaches_the_backend() {
    let backend = Canned::ok(r#"{"anomalies":[]}"#);
    let text = "y".repeat(MAX_PROMPT_CHARS + 1);
    let analyser = RemoteAnalyser::new(&backend);
    analyser.analyse(&text).unwrap();
    let seen = backend.seen.lock().unwrap();
    assert_eq!(seen.as_slice(), &[("gpt-4o-mini".to_string(), MAX_PROMPT_CHARS)]);
}

#[test]
fn transport_failure_is_a_remote_error() {
    let analyser = RemoteAnalyser::new(Canned::failing("connection refused"));
    match analyser.analyse("some log") {
        Err(TriageError::RemoteAnalysis(msg)) => assert!(msg.contains("connection refused")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn malformed_answer_is_a_remote_error() {
    for answer in ["not json", r#"{"anomalies":[{"line_number":1}]}"#, r#"{"anomalies":[{"line_number":0,"score":0.0,"message":""}]}"#] {
        let analyser = RemoteAnalyser::new(Canned::ok(answer));
        assert!(matches!(analyser.analyse("log"), Err(TriageError::RemoteAnalysis(_))), "{answer}");
    }
}

#[test]
fn missing_key_is_a_remote_error() {
    assert!(matches!(RemoteAnalyser::openai(None), Err(TriageError::RemoteAnalysis(_))));
    assert!(matches!(RemoteAnalyser::openai(Some("  ".into())), Err(TriageError::RemoteAnalysis(_))));
}

#[test]
fn blank_text_is_empty_input() {
    let analyser = RemoteAnalyser::new(Canned::ok("{}"));
    assert!(matches!(analyser.analyse("\n \n"), Err(TriageError::EmptyInput)));
}
