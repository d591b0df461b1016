//! Similarity and consistency analytics over embedded outputs.
//!
//! Centroids are elementwise sums, not means. Cosine similarity ignores
//! magnitude, so a sum ranks the same as a mean and needs no count.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::group::group_by;
use crate::model::OutputBundle;

/// Cosine similarity. Missing, zero-length, zero-norm or mismatched vectors
/// give 0.
pub fn similarity(a: Option<&[f64]>, b: Option<&[f64]>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut na = 0.0;
    let mut nb = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

/// Elementwise sum. `None` for no vectors or vectors of different lengths.
pub fn centroid<'v, I>(vectors: I) -> Option<Vec<f64>>
where
    I: IntoIterator<Item = &'v [f64]>,
{
    let mut iter = vectors.into_iter();
    let mut sum = iter.next()?.to_vec();
    for v in iter {
        if v.len() != sum.len() {
            return None;
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += x;
        }
    }
    Some(sum)
}

/// Mean similarity of each output to the group's centroid. Undefined when
/// the group is empty or any output has no embedding.
pub fn consistency<B: Borrow<OutputBundle>>(outputs: &[B]) -> Option<f64> {
    let vectors = outputs
        .iter()
        .map(|o| o.borrow().embedding.as_deref())
        .collect::<Option<Vec<&[f64]>>>()?;
    let center = centroid(vectors.iter().copied())?;

    let total: f64 = vectors
        .iter()
        .map(|v| similarity(Some(&center), Some(v)))
        .sum();
    Some(total / vectors.len() as f64)
}

/// Pairwise similarities of the outputs, in order. The diagonal is 1.
pub fn consistency_grid<B: Borrow<OutputBundle>>(outputs: &[B]) -> Vec<Vec<f64>> {
    let k = outputs.len();
    let mut grid = vec![vec![0.0; k]; k];
    for i in 0..k {
        for j in 0..k {
            grid[i][j] = if i == j {
                1.0
            } else {
                similarity(
                    outputs[i].borrow().embedding.as_deref(),
                    outputs[j].borrow().embedding.as_deref(),
                )
            };
        }
    }
    grid
}

/// Sum of the embeddings a model's outputs have.
pub fn model_centroid<B: Borrow<OutputBundle>>(outputs: &[B]) -> Option<Vec<f64>> {
    centroid(
        outputs
            .iter()
            .filter_map(|o| o.borrow().embedding.as_deref()),
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityMatrix {
    pub models: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl SimilarityMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.models.iter().position(|m| m == a)?;
        let j = self.models.iter().position(|m| m == b)?;
        Some(self.values[i][j])
    }

    /// Other models, most similar first.
    pub fn nearest(&self, model: &str) -> Vec<(&str, f64)> {
        let Some(i) = self.models.iter().position(|m| m == model) else {
            return Vec::new();
        };
        let mut others: Vec<(&str, f64)> = self
            .models
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(j, m)| (m.as_str(), self.values[i][j]))
            .collect();
        others.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        others
    }
}

pub fn similarity_matrix(centroids: &[(String, Vec<f64>)]) -> SimilarityMatrix {
    let values = centroids
        .iter()
        .map(|(_, a)| {
            centroids
                .iter()
                .map(|(_, b)| similarity(Some(a), Some(b)))
                .collect()
        })
        .collect();
    SimilarityMatrix {
        models: centroids.iter().map(|(m, _)| m.clone()).collect(),
        values,
    }
}

/// Models ordered by similarity to a reference centroid, closest first.
pub fn rank_by_reference(centroids: &[(String, Vec<f64>)], reference: &[f64]) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = centroids
        .iter()
        .map(|(m, c)| (m.clone(), similarity(Some(c), Some(reference))))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Sum of the scores present. `None` means unscored, which is not zero.
pub fn score<B: Borrow<OutputBundle>>(outputs: &[B], evaluation_model: &str) -> Option<f64> {
    outputs
        .iter()
        .filter_map(|o| o.borrow().score(evaluation_model))
        .fold(None, |acc, s| Some(acc.unwrap_or(0.0) + s))
}

/// Mean cost over outputs with recorded usage; the rest are left out.
pub fn average_cost<B: Borrow<OutputBundle>>(outputs: &[B]) -> Option<f64> {
    let costs: Vec<f64> = outputs
        .iter()
        .filter_map(|o| o.borrow().total_cost())
        .collect();
    if costs.is_empty() {
        return None;
    }
    Some(costs.iter().sum::<f64>() / costs.len() as f64)
}

// ---------------------------------------------------------------------------
// Per-model summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model: String,
    pub outputs: usize,
    pub score: Option<f64>,
    pub average_cost: Option<f64>,
    pub consistency: Option<f64>,
    pub reference_similarity: Option<f64>,
}

/// Centroid per model, sorted by model id. Models with no embeddings are left out.
pub fn model_centroids(bundles: &[OutputBundle]) -> Vec<(String, Vec<f64>)> {
    let mut centroids: Vec<(String, Vec<f64>)> = group_by(bundles, |b| b.model().to_string())
        .into_iter()
        .filter_map(|(model, group)| model_centroid(&group).map(|c| (model, c)))
        .collect();
    centroids.sort_by(|a, b| a.0.cmp(&b.0));
    centroids
}

/// Groups bundles by model and computes each model's figures. Scores use
/// `evaluation_model`; similarity is measured against the centroid of
/// `reference_model`'s outputs when it has any.
pub fn summarize(
    bundles: &[OutputBundle],
    evaluation_model: Option<&str>,
    reference_model: &str,
) -> Vec<ModelSummary> {
    let grouped = group_by(bundles, |b| b.model().to_string());
    let centroids: Vec<(String, Vec<f64>)> = grouped
        .iter()
        .filter_map(|(model, group)| model_centroid(group).map(|c| (model.clone(), c)))
        .collect();
    let to_reference: HashMap<String, f64> = centroids
        .iter()
        .find(|(model, _)| model == reference_model)
        .map(|(_, reference)| rank_by_reference(&centroids, reference))
        .unwrap_or_default()
        .into_iter()
        .collect();

    grouped
        .iter()
        .map(|(model, group)| ModelSummary {
            model: model.clone(),
            outputs: group.len(),
            score: evaluation_model.and_then(|e| score(group, e)),
            average_cost: average_cost(group),
            consistency: consistency(group),
            reference_similarity: to_reference.get(model).copied(),
        })
        .collect()
}

/// Scored models by score descending, then unscored models; ties by model id.
pub fn rank_models(summaries: &mut [ModelSummary]) {
    rank_by(summaries, |s| s.score);
}

/// Models ordered by how consistent their own outputs are, undefined last.
pub fn rank_by_consistency(summaries: &mut [ModelSummary]) {
    rank_by(summaries, |s| s.consistency);
}

/// Models closest to the reference answers first, unmeasured last.
pub fn rank_by_similarity(summaries: &mut [ModelSummary]) {
    rank_by(summaries, |s| s.reference_similarity);
}

fn rank_by(summaries: &mut [ModelSummary], key: fn(&ModelSummary) -> Option<f64>) {
    summaries.sort_by(|a, b| match (key(a), key(b)) {
        (Some(x), Some(y)) => y.total_cmp(&x).then_with(|| a.model.cmp(&b.model)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.model.cmp(&b.model),
    });
}
