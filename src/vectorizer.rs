use ahash::AHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TriageError};

/// Frozen term table: terms sorted lexicographically, the position is the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    terms: Vec<String>,
    idf: Vec<f64>,
}

/// Sparse weights keyed by term id, ascending and without duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    entries: Vec<(u32, f64)>,
}

impl FeatureVector {
    pub fn from_entries(mut entries: Vec<(u32, f64)>) -> Self {
        entries.sort_by_key(|(id, _)| *id);
        entries.dedup_by_key(|(id, _)| *id);
        Self { entries }
    }

    pub fn get(&self, id: u32) -> f64 {
        match self.entries.binary_search_by_key(&id, |(i, _)| *i) {
            Ok(pos) => self.entries[pos].1,
            Err(_) => 0.0,
        }
    }

    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }

    pub fn is_zero(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Unigrams followed by bigrams of whitespace tokens.
pub fn terms(line: &str) -> Vec<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut out: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    out.extend(tokens.iter().tuple_windows().map(|(a, b)| format!("{a} {b}")));
    out
}

impl Vocabulary {
    pub fn fit<S: AsRef<str>>(corpus: &[S]) -> Result<Self> {
        if corpus.is_empty() {
            return Err(TriageError::EmptyCorpus);
        }
        let mut df: AHashMap<String, usize> = AHashMap::new();
        for line in corpus {
            for term in terms(line.as_ref()).into_iter().unique() {
                *df.entry(term).or_insert(0) += 1;
            }
        }
        if df.is_empty() {
            return Err(TriageError::EmptyCorpus);
        }
        let n = corpus.len() as f64;
        let sorted: BTreeMap<String, usize> = df.into_iter().collect();
        let mut terms = Vec::with_capacity(sorted.len());
        let mut idf = Vec::with_capacity(sorted.len());
        for (term, count) in sorted {
            terms.push(term);
            idf.push(((1.0 + n) / (1.0 + count as f64)).ln() + 1.0);
        }
        Ok(Self { terms, idf })
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn id_of(&self, term: &str) -> Option<u32> {
        self.terms
            .binary_search_by(|t| t.as_str().cmp(term))
            .ok()
            .map(|i| i as u32)
    }

    pub fn idf(&self, id: u32) -> Option<f64> {
        self.idf.get(id as usize).copied()
    }

    pub fn transform(&self, line: &str) -> FeatureVector {
        let mut counts: BTreeMap<u32, f64> = BTreeMap::new();
        for term in terms(line) {
            if let Some(id) = self.id_of(&term) {
                *counts.entry(id).or_insert(0.0) += 1.0;
            }
        }
        let mut entries: Vec<(u32, f64)> = counts
            .into_iter()
            .map(|(id, tf)| (id, tf * self.idf[id as usize]))
            .collect();
        let norm = entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in entries.iter_mut() {
                *w /= norm;
            }
        }
        FeatureVector { entries }
    }

    pub fn transform_all<S: AsRef<str>>(&self, lines: &[S]) -> Vec<FeatureVector> {
        lines.iter().map(|l| self.transform(l.as_ref())).collect()
    }

    /// Structural check used when a bundle is loaded from disk.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.terms.len() != self.idf.len() {
            return Err(format!("vocabulary has {} terms but {} weights", self.terms.len(), self.idf.len()));
        }
        if !self.terms.windows(2).all(|w| w[0] < w[1]) {
            return Err("vocabulary terms are not strictly sorted".into());
        }
        if self.idf.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err("vocabulary contains a non-positive weight".into());
        }
        Ok(())
    }
}
