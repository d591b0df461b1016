//! Sequential execution of planned work.
//!
//! Each task is one cached provider call followed by one insert. A task that
//! fails on the provider side is skipped and reported; anything else (store,
//! serialization) aborts the run. Rerunning after an abort is safe because
//! the next plan is computed from what was persisted.

use tracing::{info, warn};

use crate::cache::{CacheKey, RequestCache};
use crate::error::{SurveyError, SurveyResult};
use crate::model::{Embedding, Evaluation, Model, ModelOutput, Prompt, Usage};
use crate::planner::GenerationTask;
use crate::provider::{ChatProvider, EmbeddingProvider, EmbeddingVector};
use crate::store::{RequestLogStore, SurveyStore};
use crate::template::EvaluationTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generate,
    Evaluate,
    Embed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The provider was called.
    Fresh,
    /// Answered from the request log.
    Reused,
    /// Skipped after an external failure.
    Failed,
}

/// Reported after every task.
#[derive(Debug, Clone)]
pub struct Progress<'p> {
    pub stage: Stage,
    /// 1-based position in the task list.
    pub index: usize,
    pub total: usize,
    pub model: &'p str,
    pub outcome: Outcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub model: String,
    /// What the task was about: a replicate index or an output id.
    pub subject: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub fresh: usize,
    pub reused: usize,
    pub failures: Vec<TaskFailure>,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.fresh + self.reused
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Runner<'a, S: SurveyStore + RequestLogStore + ?Sized> {
    store: &'a S,
    cache: RequestCache<'a, S>,
    progress: Option<&'a dyn Fn(&Progress<'_>)>,
}

impl<'a, S: SurveyStore + RequestLogStore + ?Sized> Runner<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            cache: RequestCache::new(store),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn Fn(&Progress<'_>)) -> Self {
        self.progress = Some(progress);
        self
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    pub fn generate(
        &self,
        prompt: &Prompt,
        tasks: &[GenerationTask],
        chat: &dyn ChatProvider,
    ) -> SurveyResult<RunSummary> {
        let mut summary = RunSummary::default();
        for (i, task) in tasks.iter().enumerate() {
            let result = self.generate_one(prompt, task, chat);
            self.settle(
                &mut summary,
                Stage::Generate,
                (i, tasks.len()),
                &task.model.id,
                format!("sample {}", task.sample),
                result,
            )?;
        }
        Ok(summary)
    }

    fn generate_one(
        &self,
        prompt: &Prompt,
        task: &GenerationTask,
        chat: &dyn ChatProvider,
    ) -> SurveyResult<bool> {
        let model_id = task.model.id.as_str();
        let key = CacheKey::completion(model_id, &prompt.prompt, Some(task.sample))?;
        let cached = self
            .cache
            .invoke(&key, || chat.complete(model_id, &prompt.prompt))?;

        let completion = cached.response;
        let mut output = ModelOutput::new(&task.prompt_id, model_id, completion.content)
            .with_request(cached.log_id)
            .with_sample(task.sample);
        if let Some(tokens) = completion.usage {
            output = output.with_usage(Usage::priced(&tokens, &task.model.pricing));
        }

        let id = self.store.insert_output(output)?;
        info!(model = model_id, sample = task.sample, output = %id, "output stored");
        Ok(cached.reused)
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    pub fn evaluate(
        &self,
        prompt: &Prompt,
        evaluator: &Model,
        template: &EvaluationTemplate,
        outputs: &[ModelOutput],
        chat: &dyn ChatProvider,
    ) -> SurveyResult<RunSummary> {
        let mut summary = RunSummary::default();
        for (i, output) in outputs.iter().enumerate() {
            let result = self.evaluate_one(prompt, evaluator, template, output, chat);
            self.settle(
                &mut summary,
                Stage::Evaluate,
                (i, outputs.len()),
                &output.model,
                output.id.clone(),
                result,
            )?;
        }
        Ok(summary)
    }

    fn evaluate_one(
        &self,
        prompt: &Prompt,
        evaluator: &Model,
        template: &EvaluationTemplate,
        output: &ModelOutput,
        chat: &dyn ChatProvider,
    ) -> SurveyResult<bool> {
        let text = template.render(&prompt.prompt, &prompt.marking_scheme, &output.content);
        let key = CacheKey::completion(&evaluator.id, &text, None)?;
        let cached = self
            .cache
            .invoke(&key, || chat.complete(&evaluator.id, &text))?;

        let completion = cached.response;
        let mut evaluation = Evaluation::new(&output.id, &evaluator.id, completion.content);
        evaluation.request_id = Some(cached.log_id);
        evaluation.usage = completion
            .usage
            .map(|tokens| Usage::priced(&tokens, &evaluator.pricing));

        let score = evaluation.score();
        let id = self.store.insert_evaluation(evaluation)?;
        info!(output = %output.id, evaluation = %id, ?score, "evaluation stored");
        Ok(cached.reused)
    }

    // -----------------------------------------------------------------------
    // Embedding
    // -----------------------------------------------------------------------

    pub fn embed(
        &self,
        embedding_model: &str,
        outputs: &[ModelOutput],
        embedder: &dyn EmbeddingProvider,
    ) -> SurveyResult<RunSummary> {
        let mut summary = RunSummary::default();
        let mut dimensions = self.store.embedding_dimensions(embedding_model)?;
        for (i, output) in outputs.iter().enumerate() {
            let result = self.embed_one(embedding_model, output, embedder, &mut dimensions);
            self.settle(
                &mut summary,
                Stage::Embed,
                (i, outputs.len()),
                &output.model,
                output.id.clone(),
                result,
            )?;
        }
        Ok(summary)
    }

    fn embed_one(
        &self,
        embedding_model: &str,
        output: &ModelOutput,
        embedder: &dyn EmbeddingProvider,
        dimensions: &mut Option<usize>,
    ) -> SurveyResult<bool> {
        let expected = *dimensions;
        let key = CacheKey::embedding(embedding_model, &output.content)?;
        let cached = self.cache.invoke(&key, || {
            let response = embedder.embed(embedding_model, &output.content)?;
            check_dimensions(&response, expected)?;
            Ok(response)
        })?;

        let vector = cached.response.vector;
        dimensions.get_or_insert(vector.len());

        let mut embedding = Embedding::new(&output.id, embedding_model, vector);
        embedding.request_id = Some(cached.log_id);
        let id = self.store.insert_embedding(embedding)?;
        info!(output = %output.id, embedding = %id, "embedding stored");
        Ok(cached.reused)
    }

    // -----------------------------------------------------------------------

    fn settle(
        &self,
        summary: &mut RunSummary,
        stage: Stage,
        (position, total): (usize, usize),
        model: &str,
        subject: String,
        result: SurveyResult<bool>,
    ) -> SurveyResult<()> {
        let (outcome, error) = match result {
            Ok(true) => {
                summary.reused += 1;
                (Outcome::Reused, None)
            }
            Ok(false) => {
                summary.fresh += 1;
                (Outcome::Fresh, None)
            }
            Err(e) if e.is_external() => {
                warn!(?stage, model, subject = %subject, error = %e, "task skipped");
                let message = e.to_string();
                summary.failures.push(TaskFailure {
                    model: model.to_string(),
                    subject,
                    error: message.clone(),
                });
                (Outcome::Failed, Some(message))
            }
            Err(e) => return Err(e),
        };

        if let Some(report) = self.progress {
            report(&Progress {
                stage,
                index: position + 1,
                total,
                model,
                outcome,
                error,
            });
        }
        Ok(())
    }
}

fn check_dimensions(response: &EmbeddingVector, expected: Option<usize>) -> SurveyResult<()> {
    if response.vector.is_empty() {
        return Err(SurveyError::Provider(format!(
            "{} returned an empty embedding",
            response.model
        )));
    }
    match expected {
        Some(dims) if dims != response.vector.len() => Err(SurveyError::Provider(format!(
            "{} returned {} dimensions, expected {dims}",
            response.model,
            response.vector.len()
        ))),
        _ => Ok(()),
    }
}
