use crate::error::SurveyResult;
use crate::model::{
    Embedding, Evaluation, Model, ModelOutput, OutputBundle, Prompt, RequestLog, StoreStats,
};

/// Selection of model outputs. Every field narrows the result; the default
/// selects everything.
#[derive(Debug, Clone, Default)]
pub struct OutputFilter {
    pub prompt_id: Option<String>,
    /// Exact model id.
    pub model: Option<String>,
    /// Substring of the model id.
    pub model_contains: Option<String>,
    /// Only outputs that have no embedding from this embedding model.
    pub missing_embedding: Option<String>,
    /// Only outputs that have no evaluation from this evaluation model.
    pub missing_evaluation: Option<String>,
    pub limit: Option<usize>,
}

impl OutputFilter {
    pub fn for_prompt(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: Some(prompt_id.into()),
            ..Default::default()
        }
    }
}

pub trait SurveyStore {
    // Reference data
    fn upsert_model(&self, model: &Model) -> SurveyResult<()>;
    fn get_model(&self, id: &str) -> SurveyResult<Option<Model>>;
    fn list_models(&self) -> SurveyResult<Vec<Model>>;

    fn save_prompt(&self, prompt: &Prompt) -> SurveyResult<()>;
    fn get_prompt(&self, id: &str) -> SurveyResult<Option<Prompt>>;
    fn list_prompts(&self) -> SurveyResult<Vec<Prompt>>;

    // Results (append-only)
    fn insert_output(&self, output: ModelOutput) -> SurveyResult<String>;
    fn get_output(&self, id: &str) -> SurveyResult<Option<ModelOutput>>;
    /// Ordered by model id, then insertion order.
    fn list_outputs(&self, filter: &OutputFilter) -> SurveyResult<Vec<ModelOutput>>;

    fn insert_embedding(&self, embedding: Embedding) -> SurveyResult<String>;
    fn get_embedding(&self, output_id: &str, model: &str) -> SurveyResult<Option<Embedding>>;
    /// Vector length already used by an embedding model, if it has any rows.
    fn embedding_dimensions(&self, model: &str) -> SurveyResult<Option<usize>>;

    fn insert_evaluation(&self, evaluation: Evaluation) -> SurveyResult<String>;
    fn list_evaluations(&self, output_id: &str) -> SurveyResult<Vec<Evaluation>>;
    fn evaluation_models(&self) -> SurveyResult<Vec<String>>;

    // Aggregates
    fn load_bundles(&self, prompt_id: &str, embedding_model: &str)
        -> SurveyResult<Vec<OutputBundle>>;
    fn stats(&self) -> SurveyResult<StoreStats>;
}

/// Get/put interface over the request log, keyed by `(resource, request)`.
pub trait RequestLogStore {
    fn get_logged_request(&self, resource: &str, request: &str)
        -> SurveyResult<Option<RequestLog>>;
    fn log_request(
        &self,
        resource: &str,
        request: &str,
        response: &serde_json::Value,
    ) -> SurveyResult<String>;
}
