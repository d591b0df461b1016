pub mod analytics;
pub mod cache;
pub mod error;
pub mod group;
#[cfg(feature = "local-embeddings")]
pub mod local_embedder;
pub mod model;
pub mod planner;
pub mod provider;
pub mod runner;
pub mod scoring;
pub mod store;
pub mod template;

pub use analytics::{ModelSummary, SimilarityMatrix};
pub use cache::{CacheKey, Cached, RequestCache};
pub use error::{SurveyError, SurveyResult};
pub use group::{group_by, Grouped};
#[cfg(feature = "local-embeddings")]
pub use local_embedder::{LocalEmbedder, LOCAL_EMBEDDING_MODEL};
pub use model::{
    model_company, model_name, Embedding, Evaluation, Model, ModelOutput, OutputBundle, Pricing,
    Prompt, RequestLog, StoreStats, Usage, HUMAN_MODEL,
};
pub use planner::{GenerationTask, PlanOptions, WorkPlanner};
pub use provider::{ChatCompletion, ChatProvider, EmbeddingProvider, EmbeddingVector, TokenUsage};
pub use runner::{Outcome, Progress, RunSummary, Runner, Stage, TaskFailure};
pub use store::{OutputFilter, RequestLogStore, SurveyStore};
pub use template::EvaluationTemplate;
