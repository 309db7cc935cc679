use once_cell::sync::Lazy;
use regex::Regex;

/// Lines carrying an explicit error marker.
pub static ERROR_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(ERROR|FAIL|FATAL)\b").unwrap()
});

#[derive(Debug)]
pub struct Rule {
    pub label: &'static str,
    pub pattern: Regex,
}

/// Ordered rule list, evaluated top to bottom; the first match wins.
#[derive(Debug)]
pub struct RuleSet {
    pub name: &'static str,
    rules: Vec<Rule>,
}

impl RuleSet {
    fn compile(name: &'static str, table: &[(&'static str, &str)]) -> Self {
        let rules = table
            .iter()
            .map(|(label, pattern)| Rule {
                label: *label,
                pattern: Regex::new(&format!("(?i){pattern}")).unwrap(),
            })
            .collect();
        Self { name, rules }
    }

    pub fn first_match(&self, text: &str) -> Option<&'static str> {
        self.rules.iter().find(|r| r.pattern.is_match(text)).map(|r| r.label)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.label).collect()
    }
}

/// Fallback when no classifier result was accepted for a line.
pub static FAILURE_RULES: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::compile("failure", &[
        ("TimeoutError", r"timeout"),
        ("SegmentationFault", r"segmentation fault"),
        ("NullPointer", r"null pointer"),
        ("TestFailure", r"test(failure| failed)"),
        ("MemoryLeak", r"memory leak"),
    ])
});

// The two tables below share label names but never a pattern, so scoring
// the baseline against auto-labeled data does not grade itself.

/// Narrow patterns used to build the labeled-line table.
pub static LABELING_RULES: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::compile("labeling", &[
        ("BluetoothError", r"\[bluetooth.*error"),
        ("NoNetworkRoute", r"no network route"),
        ("LayoutConstraint", r"unable to simultaneously satisfy constraints"),
        ("SSHAuthFail", r"authentication failure"),
        ("SSHPossibleBreak", r"possible break-in attempt"),
    ])
});

/// Broader patterns for the regex baseline.
pub static BASELINE_RULES: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::compile("baseline", &[
        ("SSHInvalidUser", r"invalid user"),
        ("SSHFailedPass", r"failed password"),
        ("SSHTooManyAuth", r"too many authentication failures"),
        ("BluetoothError", r"bluetooth.*error"),
        ("NoNetworkRoute", r"network (route|unreachable)"),
    ])
});
