//! Bagged decision trees for failure-category labels.

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, TriageError};
use crate::isolation::tree_seed;
use crate::vectorizer::{FeatureVector, Vocabulary};

/// Lowest accepted model confidence (inclusive). Anything below defers to
/// the rule table.
pub const CONFIDENCE_FLOOR: f64 = 0.5;

pub fn accept(confidence: f64) -> bool {
    confidence >= CONFIDENCE_FLOOR
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierParams {
    pub tree_count: usize,
    pub max_depth: usize,
    pub seed: u64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self { tree_count: 400, max_depth: 30, seed: 42 }
    }
}

impl ClassifierParams {
    pub fn validate(&self) -> Result<()> {
        if self.tree_count == 0 {
            return Err(TriageError::InvalidParameter("tree count must be at least 1".into()));
        }
        if self.max_depth == 0 {
            return Err(TriageError::InvalidParameter("max depth must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum DecisionNode {
    Split { feature: u32, threshold: f64, left: u32, right: u32 },
    /// Class probabilities indexed like `ClassificationModel::labels`.
    Leaf { distribution: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<DecisionNode>,
}

struct Grower<'a> {
    points: &'a [FeatureVector],
    classes: &'a [usize],
    class_count: usize,
    max_depth: usize,
    features_per_split: usize,
}

impl Grower<'_> {
    fn grow(&self, samples: Vec<(usize, f64)>, rng: &mut ChaCha8Rng) -> DecisionTree {
        let mut nodes = vec![DecisionNode::Leaf { distribution: Vec::new() }];
        let mut stack = vec![(0usize, samples, 0usize)];
        while let Some((slot, samples, depth)) = stack.pop() {
            let totals = self.class_totals(&samples);
            let pure = totals.iter().filter(|w| **w > 0.0).count() <= 1;
            let split = if depth >= self.max_depth || pure || samples.len() < 2 {
                None
            } else {
                self.best_split(&samples, rng)
            };
            let Some((feature, threshold)) = split else {
                nodes[slot] = DecisionNode::Leaf { distribution: normalized(&totals) };
                continue;
            };
            let (left, right): (Vec<(usize, f64)>, Vec<(usize, f64)>) = samples
                .into_iter()
                .partition(|(row, _)| self.points[*row].get(feature) <= threshold);
            let l = nodes.len();
            nodes.push(DecisionNode::Leaf { distribution: Vec::new() });
            let r = nodes.len();
            nodes.push(DecisionNode::Leaf { distribution: Vec::new() });
            nodes[slot] = DecisionNode::Split { feature, threshold, left: l as u32, right: r as u32 };
            stack.push((r, right, depth + 1));
            stack.push((l, left, depth + 1));
        }
        DecisionTree { nodes }
    }

    fn class_totals(&self, samples: &[(usize, f64)]) -> Vec<f64> {
        let mut totals = vec![0.0; self.class_count];
        for (row, w) in samples {
            totals[self.classes[*row]] += w;
        }
        totals
    }

    /// Lowest weighted Gini impurity over a random subset of the features
    /// that actually vary inside this node.
    fn best_split(&self, samples: &[(usize, f64)], rng: &mut ChaCha8Rng) -> Option<(u32, f64)> {
        let varying = varying_features(self.points, samples);
        if varying.is_empty() {
            return None;
        }
        let take = self.features_per_split.min(varying.len());
        let mut best: Option<(f64, u32, f64)> = None;
        for pick in index::sample(rng, varying.len(), take).into_iter() {
            let feature = varying[pick];
            let mut column: Vec<(f64, usize, f64)> = samples
                .iter()
                .map(|(row, w)| (self.points[*row].get(feature), self.classes[*row], *w))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            let total = self.class_totals(samples);
            let total_w: f64 = total.iter().sum();
            let mut left = vec![0.0; self.class_count];
            let mut left_w = 0.0;
            for i in 0..column.len() - 1 {
                let (value, class, w) = column[i];
                left[class] += w;
                left_w += w;
                let next = column[i + 1].0;
                if value >= next {
                    continue;
                }
                let right: Vec<f64> = total.iter().zip(&left).map(|(t, l)| t - l).collect();
                let right_w = total_w - left_w;
                let impurity = left_w * gini(&left, left_w) + right_w * gini(&right, right_w);
                if best.map_or(true, |(b, _, _)| impurity < b) {
                    let mut threshold = value + (next - value) / 2.0;
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some((impurity, feature, threshold));
                }
            }
        }
        best.map(|(_, feature, threshold)| (feature, threshold))
    }
}

fn varying_features(points: &[FeatureVector], samples: &[(usize, f64)]) -> Vec<u32> {
    let mut ranges: BTreeMap<u32, (f64, f64, usize)> = BTreeMap::new();
    for (row, _) in samples {
        for &(id, w) in points[*row].entries() {
            let e = ranges.entry(id).or_insert((w, w, 0));
            e.0 = e.0.min(w);
            e.1 = e.1.max(w);
            e.2 += 1;
        }
    }
    ranges
        .into_iter()
        .filter(|(_, (lo, hi, seen))| *seen < samples.len() || lo < hi)
        .map(|(id, _)| id)
        .collect()
}

fn gini(totals: &[f64], weight: f64) -> f64 {
    if weight <= 0.0 {
        return 0.0;
    }
    1.0 - totals.iter().map(|t| (t / weight) * (t / weight)).sum::<f64>()
}

fn normalized(totals: &[f64]) -> Vec<f64> {
    let sum: f64 = totals.iter().sum();
    if sum <= 0.0 {
        return totals.to_vec();
    }
    totals.iter().map(|t| t / sum).collect()
}

impl DecisionTree {
    pub fn distribution(&self, x: &FeatureVector) -> &[f64] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                DecisionNode::Split { feature, threshold, left, right } => {
                    let next = if x.get(*feature) <= *threshold { *left } else { *right };
                    idx = next as usize;
                }
                DecisionNode::Leaf { distribution } => return distribution,
            }
        }
    }

    pub fn nodes(&self) -> &[DecisionNode] {
        &self.nodes
    }

    fn validate(&self, dimension: usize, class_count: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("decision tree without nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                DecisionNode::Split { feature, threshold, left, right } => {
                    let (l, r) = (*left as usize, *right as usize);
                    if l <= i || r <= i || l >= self.nodes.len() || r >= self.nodes.len() {
                        return Err(format!("decision node {i} has out-of-order children"));
                    }
                    if *feature as usize >= dimension || !threshold.is_finite() {
                        return Err(format!("decision node {i} splits on an invalid feature"));
                    }
                }
                DecisionNode::Leaf { distribution } => {
                    if distribution.len() != class_count {
                        return Err(format!("decision leaf {i} has {} classes, expected {class_count}", distribution.len()));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationModel {
    pub vocabulary: Vocabulary,
    pub ensemble: Vec<DecisionTree>,
    /// Sorted, unique; leaf distributions follow this order.
    pub labels: Vec<String>,
}

impl ClassificationModel {
    pub fn train<S: AsRef<str>, L: AsRef<str>>(rows: &[(S, L)], params: &ClassifierParams) -> Result<Self> {
        Self::train_with_cancel(rows, params, &AtomicBool::new(false))
    }

    pub fn train_with_cancel<S: AsRef<str>, L: AsRef<str>>(
        rows: &[(S, L)],
        params: &ClassifierParams,
        cancel: &AtomicBool,
    ) -> Result<Self> {
        params.validate()?;
        let kept: Vec<(&str, &str)> = rows
            .iter()
            .map(|(line, label)| (line.as_ref().trim(), label.as_ref().trim()))
            .filter(|(_, label)| !label.is_empty())
            .collect();
        if kept.is_empty() {
            return Err(TriageError::NoLabeledRows);
        }
        let labels: Vec<String> = kept
            .iter()
            .map(|(_, l)| l.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let lines: Vec<&str> = kept.iter().map(|(line, _)| *line).collect();
        let vocabulary = Vocabulary::fit(&lines)?;
        let points = vocabulary.transform_all(&lines);
        let classes: Vec<usize> = kept
            .iter()
            .filter_map(|(_, l)| labels.binary_search_by(|x| x.as_str().cmp(l)).ok())
            .collect();

        // Balanced class weights: n / (k * count_c)
        let mut counts = vec![0usize; labels.len()];
        for c in &classes {
            counts[*c] += 1;
        }
        let n = classes.len();
        let class_weight: Vec<f64> = counts
            .iter()
            .map(|c| n as f64 / (labels.len() as f64 * *c as f64))
            .collect();

        let grower = Grower {
            points: &points,
            classes: &classes,
            class_count: labels.len(),
            max_depth: params.max_depth,
            features_per_split: ((vocabulary.len() as f64).sqrt().floor() as usize).max(1),
        };
        let ensemble = (0..params.tree_count)
            .into_par_iter()
            .map(|t| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(TriageError::TrainingAborted("cancelled while growing decision trees".into()));
                }
                let mut rng = ChaCha8Rng::seed_from_u64(tree_seed(params.seed, t));
                let mut drawn = vec![0usize; n];
                for _ in 0..n {
                    drawn[rng.gen_range(0..n)] += 1;
                }
                let samples: Vec<(usize, f64)> = drawn
                    .iter()
                    .enumerate()
                    .filter(|(_, k)| **k > 0)
                    .map(|(row, k)| (row, *k as f64 * class_weight[classes[row]]))
                    .collect();
                Ok(grower.grow(samples, &mut rng))
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(rows = n, classes = labels.len(), trees = ensemble.len(), "classifier trained");
        Ok(Self { vocabulary, ensemble, labels })
    }

    /// Averaged tree probabilities for an already normalized line.
    pub fn probabilities(&self, normalized: &str) -> Vec<f64> {
        let x = self.vocabulary.transform(normalized);
        let mut acc = vec![0.0; self.labels.len()];
        for tree in &self.ensemble {
            for (a, p) in acc.iter_mut().zip(tree.distribution(&x)) {
                *a += p;
            }
        }
        let trees = self.ensemble.len() as f64;
        acc.iter().map(|a| a / trees).collect()
    }

    pub fn classify(&self, normalized: &str) -> Prediction {
        let probs = self.probabilities(normalized);
        let mut best = 0usize;
        for (i, p) in probs.iter().enumerate() {
            if *p > probs[best] {
                best = i;
            }
        }
        Prediction {
            label: self.labels[best].clone(),
            confidence: probs[best].clamp(0.0, 1.0),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.vocabulary.validate()?;
        if self.labels.is_empty() {
            return Err("classifier has no labels".into());
        }
        if !self.labels.windows(2).all(|w| w[0] < w[1]) {
            return Err("classifier labels are not sorted and unique".into());
        }
        if self.ensemble.is_empty() {
            return Err("classifier ensemble has no trees".into());
        }
        for tree in &self.ensemble {
            tree.validate(self.vocabulary.len(), self.labels.len())?;
        }
        Ok(())
    }
}
