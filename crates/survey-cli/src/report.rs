//! Terminal and JSON rendering of the analytics.

use std::fmt::Write as _;

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::Serialize;

use survey_core::analytics::{self, ModelSummary, SimilarityMatrix};
use survey_core::{group_by, model_company, SurveyStore};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum SortBy {
    /// Judged score, unscored models last
    #[default]
    Score,
    /// Similarity to the reference answers
    Similarity,
    /// Agreement between a model's own outputs
    Consistency,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub prompt_id: String,
    pub embedding_model: String,
    pub evaluation_model: Option<String>,
    pub reference_model: String,
    pub rankings: Vec<ModelSummary>,
    pub similarity: SimilarityMatrix,
}

#[derive(Debug, Serialize)]
pub struct ModelDetail {
    pub prompt_id: String,
    pub model: String,
    pub output_ids: Vec<String>,
    pub consistency: Option<f64>,
    pub grid: Vec<Vec<f64>>,
    /// Other models ranked by centroid similarity, closest first.
    pub nearest: Vec<(String, f64)>,
}

pub fn build_report<S: SurveyStore + ?Sized>(
    store: &S,
    prompt_id: &str,
    embedding_model: &str,
    evaluation_model: Option<&str>,
    reference_model: &str,
    sort: SortBy,
) -> Result<Report> {
    let bundles = store.load_bundles(prompt_id, embedding_model)?;
    if bundles.is_empty() {
        bail!("no outputs for prompt {prompt_id}");
    }

    let mut rankings = analytics::summarize(&bundles, evaluation_model, reference_model);
    match sort {
        SortBy::Score => analytics::rank_models(&mut rankings),
        SortBy::Similarity => analytics::rank_by_similarity(&mut rankings),
        SortBy::Consistency => analytics::rank_by_consistency(&mut rankings),
    }

    let centroids = analytics::model_centroids(&bundles);
    Ok(Report {
        prompt_id: prompt_id.to_string(),
        embedding_model: embedding_model.to_string(),
        evaluation_model: evaluation_model.map(str::to_string),
        reference_model: reference_model.to_string(),
        rankings,
        similarity: analytics::similarity_matrix(&centroids),
    })
}

pub fn build_model_detail<S: SurveyStore + ?Sized>(
    store: &S,
    prompt_id: &str,
    embedding_model: &str,
    model: &str,
) -> Result<ModelDetail> {
    let bundles = store.load_bundles(prompt_id, embedding_model)?;
    let grouped = group_by(&bundles, |b| b.model().to_string());
    let Some(own) = grouped.get(&model.to_string()) else {
        bail!("no outputs from {model} for prompt {prompt_id}");
    };

    let matrix = analytics::similarity_matrix(&analytics::model_centroids(&bundles));
    let nearest = matrix
        .nearest(model)
        .into_iter()
        .map(|(m, sim)| (m.to_string(), sim))
        .collect();

    Ok(ModelDetail {
        prompt_id: prompt_id.to_string(),
        model: model.to_string(),
        output_ids: own.iter().map(|b| b.output.id.clone()).collect(),
        consistency: analytics::consistency(own),
        grid: analytics::consistency_grid(own),
        nearest,
    })
}

// ---------------------------------------------------------------------------
// Text rendering
// ---------------------------------------------------------------------------

fn opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => "-".into(),
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Prompt:     {}", report.prompt_id);
    let _ = writeln!(out, "Embeddings: {}", report.embedding_model);
    let _ = writeln!(
        out,
        "Judge:      {}",
        report.evaluation_model.as_deref().unwrap_or("(none)")
    );
    let _ = writeln!(out, "Reference:  {}", report.reference_model);
    out.push('\n');

    let _ = writeln!(
        out,
        "{:<4} {:<40} {:<12} {:>7} {:>8} {:>10} {:>11} {:>9}",
        "#", "Model", "Company", "Outputs", "Score", "Avg cost", "Consistency", "Reference"
    );
    let _ = writeln!(out, "{}", "-".repeat(108));
    for (i, s) in report.rankings.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:<4} {:<40} {:<12} {:>7} {:>8} {:>10} {:>11} {:>9}",
            i + 1,
            truncate(&s.model, 40),
            truncate(model_company(&s.model).unwrap_or("-"), 12),
            s.outputs,
            opt(s.score, 1),
            opt(s.average_cost, 6),
            opt(s.consistency, 3),
            opt(s.reference_similarity, 3),
        );
    }
    out
}

pub fn render_model_detail(detail: &ModelDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Model:       {}", detail.model);
    let _ = writeln!(out, "Prompt:      {}", detail.prompt_id);
    let _ = writeln!(out, "Outputs:     {}", detail.output_ids.len());
    let _ = writeln!(out, "Consistency: {}", opt(detail.consistency, 3));
    out.push('\n');

    out.push_str(&format!("{:<4}", ""));
    for j in 0..detail.grid.len() {
        let _ = write!(out, " {:>6}", j + 1);
    }
    out.push('\n');
    for (i, row) in detail.grid.iter().enumerate() {
        let _ = write!(out, "{:<4}", i + 1);
        for value in row {
            let _ = write!(out, " {value:>6.3}");
        }
        out.push('\n');
    }

    if !detail.nearest.is_empty() {
        out.push_str("\nNearest models:\n");
        for (model, sim) in detail.nearest.iter().take(5) {
            let _ = writeln!(out, "  {sim:>6.3}  {model}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use survey_core::{Embedding, Evaluation, ModelOutput, Prompt, Usage};
    use survey_store::SqliteStore;

    fn seeded() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.save_prompt(&Prompt::new("p", "question")).unwrap();

        let rows: [(&str, [f32; 2], &str, Option<f64>); 5] = [
            ("human/human", [1.0, 0.0], "", None),
            ("a/good", [0.9, 0.1], "Score: 9", Some(0.02)),
            ("a/good", [1.0, 0.0], "Score: 8", Some(0.04)),
            ("b/odd", [0.0, 1.0], "Score: 2", Some(0.01)),
            ("c/unjudged", [0.5, 0.5], "no verdict", None),
        ];
        for (model, vector, judgement, cost) in rows {
            let mut output = ModelOutput::new("p", model, format!("{model} answer"));
            if let Some(cost) = cost {
                output = output.with_usage(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                    total_cost: cost,
                });
            }
            let id = store.insert_output(output).unwrap();
            store
                .insert_embedding(Embedding::new(&id, "emb", vector.to_vec()))
                .unwrap();
            if !judgement.is_empty() {
                store
                    .insert_evaluation(Evaluation::new(&id, "judge", judgement))
                    .unwrap();
            }
        }
        store
    }

    #[test]
    fn test_report_ranks_by_score() {
        let store = seeded();
        let report =
            build_report(&store, "p", "emb", Some("judge"), "human/human", SortBy::Score).unwrap();
        let order: Vec<&str> = report.rankings.iter().map(|s| s.model.as_str()).collect();
        assert_eq!(order, vec!["a/good", "b/odd", "c/unjudged", "human/human"]);

        let good = &report.rankings[0];
        assert_eq!(good.score, Some(17.0));
        assert!((good.average_cost.unwrap() - 0.03).abs() < 1e-9);
        assert!(good.reference_similarity.unwrap() > 0.99);

        let text = render_report(&report);
        assert!(text.contains("a/good"));
        assert!(text.contains("17.0"));
        assert!(text.contains("Judge:      judge"));
    }

    #[test]
    fn test_report_sorted_by_similarity() {
        let store = seeded();
        let report =
            build_report(&store, "p", "emb", None, "human/human", SortBy::Similarity).unwrap();
        assert_eq!(report.rankings[0].model, "human/human");
        assert_eq!(report.rankings.last().unwrap().model, "b/odd");
        assert!(report.rankings.iter().all(|s| s.score.is_none()));
    }

    #[test]
    fn test_report_json_shape() {
        let store = seeded();
        let report =
            build_report(&store, "p", "emb", Some("judge"), "human/human", SortBy::Score).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["prompt_id"], "p");
        assert_eq!(json["rankings"].as_array().unwrap().len(), 4);
        assert_eq!(json["rankings"][2]["score"], serde_json::Value::Null);
        assert_eq!(json["similarity"]["models"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_report_requires_outputs() {
        let store = seeded();
        assert!(build_report(&store, "missing", "emb", None, "human/human", SortBy::Score).is_err());
    }

    #[test]
    fn test_model_detail_grid() {
        let store = seeded();
        let detail = build_model_detail(&store, "p", "emb", "a/good").unwrap();
        assert_eq!(detail.output_ids.len(), 2);
        assert_eq!(detail.grid.len(), 2);
        assert_eq!(detail.grid[0][0], 1.0);
        assert_eq!(detail.grid[1][1], 1.0);
        assert!(detail.consistency.unwrap() > 0.99);
        assert_eq!(detail.nearest[0].0, "human/human");
        assert!(detail.nearest.iter().all(|(m, _)| m != "a/good"));

        let text = render_model_detail(&detail);
        assert!(text.contains("Model:       a/good"));
        assert!(text.contains("Nearest models:"));

        assert!(build_model_detail(&store, "p", "emb", "z/none").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-model-name", 10), "a-very-...");
    }
}
