use once_cell::sync::Lazy;
use regex::Regex;

// HH:MM:SS clock times and YYYY-MM-DD dates
static RE_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{2}:\d{2}:\d{2}\b|\b\d{4}-\d{2}-\d{2}\b").unwrap()
});

static RE_HEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"0x[0-9a-f]+").unwrap()
});

static RE_INT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d+\b").unwrap()
});

/// One non-blank line of a submitted log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub line_number: usize,
    pub raw: String,
    pub normalized: String,
}

impl LogLine {
    pub fn new(line_number: usize, raw: &str) -> Self {
        let raw = raw.trim_end().to_string();
        let normalized = normalize(&raw);
        Self { line_number, raw, normalized }
    }
}

/// Canonicalizes a raw line so that lines differing only in times, addresses
/// or counters compare equal. Idempotent.
pub fn normalize(raw: &str) -> String {
    // Case-fold first so `0X1F` and `0x1f` are treated alike.
    let lowered = raw.to_lowercase();
    let s = RE_TIMESTAMP.replace_all(&lowered, "");
    let s = RE_HEX.replace_all(&s, "");
    let s = RE_INT.replace_all(&s, "");
    s.trim().to_string()
}

/// Decodes raw log bytes as UTF-8, dropping invalid sequences instead of
/// failing. Genuine U+FFFD characters in the input are kept.
pub fn decode_lossy(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                out.push_str(s);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(n) => bytes = &rest[n..],
                    // truncated sequence at the end
                    None => return out,
                }
            }
        }
    }
}

/// Splits a text blob into its non-blank lines, numbered by physical position.
pub fn split_lines(text: &str) -> Vec<LogLine> {
    // Blank lines still count, so numbers match the remote analyser's view of the text.
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| LogLine::new(i + 1, l))
        .collect()
}

/// Normalized, non-empty lines of every blob, in input order.
pub fn corpus_from_texts<S: AsRef<str>>(texts: &[S]) -> Vec<String> {
    texts
        .iter()
        .flat_map(|t| split_lines(t.as_ref()))
        .map(|l| l.normalized)
        .filter(|n| !n.is_empty())
        .collect()
}
