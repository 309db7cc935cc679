//! The flat labeled-line table (`line_norm,label`) and the tools that feed on it.

use ahash::AHashSet;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, TriageError};
use crate::normalize::{normalize, split_lines};
use crate::report::BaselineReport;
use crate::rules::{BASELINE_RULES, LABELING_RULES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledRow {
    pub line_norm: String,
    pub label: String,
}

impl LabeledRow {
    pub fn new(line_norm: impl Into<String>, label: impl Into<String>) -> Self {
        Self { line_norm: line_norm.into(), label: label.into() }
    }
}

pub fn read_table(path: &Path) -> Result<Vec<LabeledRow>> {
    let file = std::fs::File::open(path)?;
    read_table_from(file)
}

/// Reads a table with a `label` column and either `line_norm` or a raw `line`
/// column (normalized on read). Other columns are ignored, rows with a blank
/// label are dropped.
pub fn read_table_from<R: Read>(reader: R) -> Result<Vec<LabeledRow>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let label_col = column("label")
        .ok_or_else(|| TriageError::InvalidTable("missing `label` column".into()))?;
    let (line_col, raw) = match (column("line_norm"), column("line")) {
        (Some(i), _) => (i, false),
        (None, Some(i)) => (i, true),
        (None, None) => {
            return Err(TriageError::InvalidTable("missing `line_norm` or `line` column".into()))
        }
    };

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in rdr.records() {
        let record = record?;
        let label = record.get(label_col).unwrap_or("").trim();
        if label.is_empty() {
            skipped += 1;
            continue;
        }
        let line = record.get(line_col).unwrap_or("");
        let line_norm = if raw { normalize(line) } else { line.trim().to_string() };
        rows.push(LabeledRow::new(line_norm, label));
    }
    if skipped > 0 {
        tracing::warn!(skipped, "dropped label rows without a label");
    }
    Ok(rows)
}

pub fn write_table(path: &Path, rows: &[LabeledRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_table_to(file, rows)
}

pub fn write_table_to<W: Write>(writer: W, rows: &[LabeledRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["line_norm", "label"])?;
    for row in rows {
        wtr.write_record([row.line_norm.as_str(), row.label.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Extends `existing` with every new normalized line the labeling rules recognise.
/// Existing rows are kept as they are and a normalized line is only ever added once.
pub fn auto_label<S: AsRef<str>>(texts: &[S], existing: Vec<LabeledRow>) -> Vec<LabeledRow> {
    let mut known: AHashSet<String> = existing.iter().map(|r| r.line_norm.clone()).collect();
    let mut rows = existing;
    for text in texts {
        for line in split_lines(text.as_ref()) {
            if known.contains(&line.normalized) {
                continue;
            }
            if let Some(label) = LABELING_RULES.first_match(&line.normalized) {
                known.insert(line.normalized.clone());
                rows.push(LabeledRow::new(line.normalized, label));
            }
        }
    }
    rows
}

/// Grades the baseline rules against the label table on the lines of `texts`
/// that appear in it. Precision counts only lines the baseline labeled at all.
pub fn baseline_report<S: AsRef<str>>(texts: &[S], rows: &[LabeledRow]) -> Result<BaselineReport> {
    let truth: HashMap<&str, &str> = rows
        .iter()
        .map(|r| (r.line_norm.as_str(), r.label.as_str()))
        .collect();

    let (mut total, mut matched, mut correct) = (0usize, 0usize, 0usize);
    for text in texts {
        for line in split_lines(text.as_ref()) {
            let Some(expected) = truth.get(line.normalized.as_str()) else { continue };
            total += 1;
            if let Some(predicted) = BASELINE_RULES.first_match(&line.raw) {
                matched += 1;
                if predicted == *expected {
                    correct += 1;
                }
            }
        }
    }
    if total == 0 {
        return Err(TriageError::NoLabeledRows);
    }
    let ratio = |a: usize, b: usize| if b == 0 { 0.0 } else { a as f64 / b as f64 };
    Ok(BaselineReport {
        total,
        matched,
        correct,
        precision: ratio(correct, matched),
        recall: ratio(correct, total),
    })
}
