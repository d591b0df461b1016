//! Work planning: what is still missing, computed from persisted state.
//!
//! Planning is read-only. A dry run is simply a plan that is printed instead
//! of handed to the runner.

use std::collections::HashSet;

use crate::error::{SurveyError, SurveyResult};
use crate::group::group_by;
use crate::model::{Model, ModelOutput, Prompt};
use crate::store::{OutputFilter, SurveyStore};

/// Catalog entries that never take part in a survey.
pub const IGNORED_MODELS: &[&str] = &[
    // Routers onto other models, not models in their own right.
    "openrouter/auto",
    "openrouter/flavor-of-the-week",
    // Requires an image.
    "liuhaotian/llava-13b",
    // Times out.
    "meta-llama/llama-3-8b",
];

pub fn is_ignored(model_id: &str) -> bool {
    IGNORED_MODELS.contains(&model_id)
}

/// One missing generation.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    /// Catalog record at planning time. Its pricing is the cost snapshot.
    pub model: Model,
    pub prompt_id: String,
    /// Replicate index for this (model, prompt): 0 for the first generation.
    pub sample: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Only plan for model ids containing this substring.
    pub model_contains: Option<String>,
    /// Cap on the number of tasks returned.
    pub limit: Option<usize>,
}

impl PlanOptions {
    fn admits(&self, model_id: &str) -> bool {
        self.model_contains
            .as_deref()
            .map_or(true, |needle| model_id.contains(needle))
    }
}

pub struct WorkPlanner<'a, S: SurveyStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SurveyStore + ?Sized> WorkPlanner<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// `max(0, count - existing)` tasks per eligible model, by model id.
    /// Each task takes the lowest replicate index in `0..count` that has no
    /// stored output yet.
    pub fn generation(
        &self,
        prompt: &Prompt,
        count: usize,
        options: &PlanOptions,
    ) -> SurveyResult<Vec<GenerationTask>> {
        let mut models = self.store.list_models()?;
        models.retain(|m| !is_ignored(&m.id) && options.admits(&m.id));
        models.sort_by(|a, b| a.id.cmp(&b.id));

        let outputs = self
            .store
            .list_outputs(&OutputFilter::for_prompt(&prompt.id))?;
        let existing = group_by(outputs, |o| o.model.clone());

        let mut tasks = Vec::new();
        for model in models {
            let stored = existing.get(&model.id).unwrap_or(&[]);
            let missing = free_samples(stored, count);
            for sample in missing {
                tasks.push(GenerationTask {
                    model: model.clone(),
                    prompt_id: prompt.id.clone(),
                    sample,
                });
            }
        }

        if let Some(limit) = options.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    /// The judge for `prompt`: `requested`, else the prompt's own, else
    /// `fallback`. Fails before any work is planned when no judge resolves,
    /// the judge is not in the catalog (it has to be priced), or the prompt
    /// has nothing to mark against.
    pub fn evaluator(
        &self,
        prompt: &Prompt,
        requested: Option<&str>,
        fallback: Option<&str>,
    ) -> SurveyResult<Model> {
        let id = requested
            .or(prompt.evaluation_model.as_deref())
            .or(fallback)
            .ok_or_else(|| {
                SurveyError::Config(format!(
                    "no evaluation model for prompt {}: pass --evaluation-model, \
                     set one on the prompt or in [evaluation] model",
                    prompt.id
                ))
            })?;

        if prompt.marking_scheme.trim().is_empty() {
            return Err(SurveyError::Config(format!(
                "prompt {} has no marking scheme",
                prompt.id
            )));
        }

        self.store.get_model(id)?.ok_or_else(|| {
            SurveyError::Config(format!("evaluation model {id} is not in the model catalog"))
        })
    }

    /// Outputs of `prompt_id` not yet judged by `evaluation_model`.
    pub fn evaluation(
        &self,
        prompt_id: &str,
        evaluation_model: &str,
        options: &PlanOptions,
    ) -> SurveyResult<Vec<ModelOutput>> {
        self.store.list_outputs(&OutputFilter {
            prompt_id: Some(prompt_id.to_string()),
            model_contains: options.model_contains.clone(),
            missing_evaluation: Some(evaluation_model.to_string()),
            limit: options.limit,
            ..Default::default()
        })
    }

    /// Outputs with no embedding from `embedding_model`, across all prompts
    /// unless `prompt_id` is given.
    pub fn embedding(
        &self,
        embedding_model: &str,
        prompt_id: Option<&str>,
        options: &PlanOptions,
    ) -> SurveyResult<Vec<ModelOutput>> {
        self.store.list_outputs(&OutputFilter {
            prompt_id: prompt_id.map(str::to_string),
            model_contains: options.model_contains.clone(),
            missing_embedding: Some(embedding_model.to_string()),
            limit: options.limit,
            ..Default::default()
        })
    }
}

/// Replicate indices still to generate for one model. Outputs stored without
/// an index count toward the target but do not claim a slot.
fn free_samples(stored: &[ModelOutput], count: usize) -> Vec<u32> {
    let deficit = count.saturating_sub(stored.len());
    let taken: HashSet<u32> = stored.iter().filter_map(|o| o.sample).collect();
    (0..count as u32)
        .filter(|i| !taken.contains(i))
        .take(deficit)
        .collect()
}
