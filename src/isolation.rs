//! Isolation forest over sparse term vectors.
//!
//! Points that separate from the rest after few random cuts are outliers. The
//! ensemble is trained on clean lines only; the decision threshold is taken
//! from the score distribution of the training lines themselves.

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, TriageError};
use crate::vectorizer::{FeatureVector, Vocabulary};

const DEFAULT_SUBSAMPLE: usize = 256;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyParams {
    pub contamination: f64,
    pub ensemble_size: usize,
    pub seed: u64,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self { contamination: 0.05, ensemble_size: 100, seed: 42 }
    }
}

impl AnomalyParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.contamination) {
            return Err(TriageError::InvalidParameter(format!(
                "contamination must be within [0, 0.5], got {}",
                self.contamination
            )));
        }
        if !(50..=500).contains(&self.ensemble_size) {
            return Err(TriageError::InvalidParameter(format!(
                "ensemble size must be within [50, 500], got {}",
                self.ensemble_size
            )));
        }
        Ok(())
    }

    /// Sub-sample drawn per tree. A low contamination rate needs a larger
    /// sample for the rare points to show up at all.
    pub fn subsample_size(&self, corpus_len: usize) -> usize {
        let floor = if self.contamination > 0.0 {
            (10.0 / self.contamination).ceil() as usize
        } else {
            0
        };
        corpus_len.min(DEFAULT_SUBSAMPLE.max(floor))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum IsolationNode {
    Split { feature: u32, threshold: f64, left: u32, right: u32 },
    Leaf { size: u32 },
}

/// Nodes stored in allocation order; children always sit after their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<IsolationNode>,
}

impl IsolationTree {
    fn grow(points: &[&FeatureVector], max_depth: usize, rng: &mut ChaCha8Rng) -> Self {
        let mut nodes = vec![IsolationNode::Leaf { size: 0 }];
        let mut stack: Vec<(usize, Vec<usize>, usize)> = vec![(0, (0..points.len()).collect(), 0)];
        while let Some((slot, members, depth)) = stack.pop() {
            let leaf = IsolationNode::Leaf { size: members.len() as u32 };
            if depth >= max_depth || members.len() <= 1 {
                nodes[slot] = leaf;
                continue;
            }
            let candidates = splittable_features(points, &members);
            if candidates.is_empty() {
                nodes[slot] = leaf;
                continue;
            }
            let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
            let threshold = rng.gen_range(lo..hi);
            let (left, right): (Vec<usize>, Vec<usize>) = members
                .iter()
                .partition(|&&i| points[i].get(feature) <= threshold);
            if left.is_empty() || right.is_empty() {
                nodes[slot] = leaf;
                continue;
            }
            let l = nodes.len();
            nodes.push(IsolationNode::Leaf { size: 0 });
            let r = nodes.len();
            nodes.push(IsolationNode::Leaf { size: 0 });
            nodes[slot] = IsolationNode::Split { feature, threshold, left: l as u32, right: r as u32 };
            stack.push((r, right, depth + 1));
            stack.push((l, left, depth + 1));
        }
        Self { nodes }
    }

    pub fn path_length(&self, x: &FeatureVector) -> f64 {
        let mut idx = 0usize;
        let mut depth = 0.0;
        loop {
            match &self.nodes[idx] {
                IsolationNode::Split { feature, threshold, left, right } => {
                    let next = if x.get(*feature) <= *threshold { *left } else { *right };
                    idx = next as usize;
                    depth += 1.0;
                }
                IsolationNode::Leaf { size } => return depth + average_path_length(*size as usize),
            }
        }
    }

    pub fn nodes(&self) -> &[IsolationNode] {
        &self.nodes
    }

    fn validate(&self, dimension: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("isolation tree without nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let IsolationNode::Split { feature, threshold, left, right } = node {
                let (l, r) = (*left as usize, *right as usize);
                if l <= i || r <= i || l >= self.nodes.len() || r >= self.nodes.len() {
                    return Err(format!("isolation node {i} has out-of-order children"));
                }
                if *feature as usize >= dimension || !threshold.is_finite() {
                    return Err(format!("isolation node {i} splits on an invalid feature"));
                }
            }
        }
        Ok(())
    }
}

/// Features whose values differ inside `members`, with their observed range.
/// A point lacking a term has weight zero for it.
fn splittable_features(points: &[&FeatureVector], members: &[usize]) -> Vec<(u32, f64, f64)> {
    let mut ranges: BTreeMap<u32, (f64, f64, usize)> = BTreeMap::new();
    for &i in members {
        for &(id, w) in points[i].entries() {
            let e = ranges.entry(id).or_insert((w, w, 0));
            e.0 = e.0.min(w);
            e.1 = e.1.max(w);
            e.2 += 1;
        }
    }
    ranges
        .into_iter()
        .filter_map(|(id, (mut lo, mut hi, seen))| {
            if seen < members.len() {
                lo = lo.min(0.0);
                hi = hi.max(0.0);
            }
            (lo < hi).then_some((id, lo, hi))
        })
        .collect()
}

/// Expected path length of an unsuccessful search in a binary search tree
/// of `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

pub(crate) fn tree_seed(seed: u64, tree: usize) -> u64 {
    seed ^ (tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    subsample_size: usize,
}

impl IsolationForest {
    pub fn fit(points: &[FeatureVector], params: &AnomalyParams, cancel: &AtomicBool) -> Result<Self> {
        let subsample_size = params.subsample_size(points.len());
        let max_depth = ((subsample_size as f64).log2().ceil() as usize).max(1);
        let trees = (0..params.ensemble_size)
            .into_par_iter()
            .map(|t| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(TriageError::TrainingAborted("cancelled while growing isolation trees".into()));
                }
                let mut rng = ChaCha8Rng::seed_from_u64(tree_seed(params.seed, t));
                let picked: Vec<&FeatureVector> = index::sample(&mut rng, points.len(), subsample_size)
                    .into_iter()
                    .map(|i| &points[i])
                    .collect();
                Ok(IsolationTree::grow(&picked, max_depth, &mut rng))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { trees, subsample_size })
    }

    /// `1 - 2s` where `s = 2^(-E[h]/c)`: -1 for instantly isolated points,
    /// close to 1 for points buried deep in every tree.
    pub fn score(&self, x: &FeatureVector) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
        let mean_depth = total / self.trees.len() as f64;
        let c = average_path_length(self.subsample_size);
        let c = if c > 0.0 { c } else { 1.0 };
        let s = 2f64.powf(-mean_depth / c);
        (1.0 - 2.0 * s).clamp(-1.0, 1.0)
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    pub fn subsample_size(&self) -> usize {
        self.subsample_size
    }
}

/// `mean - 2 * stddev` (population deviation). The mean is accumulated
/// relative to the first score so a constant series calibrates to itself.
pub fn calibrate_threshold(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let n = scores.len() as f64;
    let base = scores[0];
    let mean = base + scores.iter().map(|s| s - base).sum::<f64>() / n;
    let var = scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
    mean - 2.0 * var.sqrt()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyModel {
    pub vocabulary: Vocabulary,
    pub ensemble: IsolationForest,
    pub threshold: f64,
}

impl AnomalyModel {
    pub fn train<S: AsRef<str> + Sync>(lines: &[S], params: &AnomalyParams) -> Result<Self> {
        Self::train_with_cancel(lines, params, &AtomicBool::new(false))
    }

    pub fn train_with_cancel<S: AsRef<str> + Sync>(
        lines: &[S],
        params: &AnomalyParams,
        cancel: &AtomicBool,
    ) -> Result<Self> {
        params.validate()?;
        let corpus: Vec<&str> = lines
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .collect();
        if corpus.is_empty() {
            return Err(TriageError::EmptyCorpus);
        }
        let vocabulary = Vocabulary::fit(&corpus)?;
        let points = vocabulary.transform_all(&corpus);
        let ensemble = IsolationForest::fit(&points, params, cancel)?;
        let scores: Vec<f64> = points.par_iter().map(|p| ensemble.score(p)).collect();
        let threshold = calibrate_threshold(&scores);
        tracing::debug!(lines = corpus.len(), trees = ensemble.trees.len(), threshold, "anomaly model trained");
        Ok(Self { vocabulary, ensemble, threshold })
    }

    /// Score of an already normalized line.
    pub fn score(&self, normalized: &str) -> f64 {
        self.ensemble.score(&self.vocabulary.transform(normalized))
    }

    pub fn score_all<S: AsRef<str> + Sync>(&self, normalized: &[S]) -> Vec<f64> {
        normalized.par_iter().map(|l| self.score(l.as_ref())).collect()
    }

    pub fn is_anomalous(&self, score: f64) -> bool {
        // Strict, so a corpus of identical lines flags nothing.
        score < self.threshold
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.vocabulary.validate()?;
        if self.ensemble.trees.is_empty() {
            return Err("anomaly ensemble has no trees".into());
        }
        if !self.threshold.is_finite() {
            return Err("anomaly threshold is not finite".into());
        }
        for tree in &self.ensemble.trees {
            tree.validate(self.vocabulary.len())?;
        }
        Ok(())
    }
}
