use std::time::Duration;

use survey_core::{EmbeddingProvider, EmbeddingVector, SurveyResult};

use crate::http::{env_key, JsonClient};
use crate::wire::{parse_embedding, EmbeddingRequest, EmbeddingResponse};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

/// OpenAI `POST /embeddings`.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    http: JsonClient,
}

impl OpenAiEmbedder {
    pub fn from_env() -> SurveyResult<Self> {
        Self::with_config(OPENAI_BASE_URL, Duration::from_secs(120))
    }

    pub fn with_config(base_url: &str, timeout: Duration) -> SurveyResult<Self> {
        Ok(Self::new(env_key(OPENAI_KEY_VAR)?, base_url, timeout))
    }

    pub fn new(api_key: impl Into<String>, base_url: &str, timeout: Duration) -> Self {
        Self {
            http: JsonClient::new(api_key.into(), base_url, timeout),
        }
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn embed(&self, model_id: &str, content: &str) -> SurveyResult<EmbeddingVector> {
        let response: EmbeddingResponse = self.http.post(
            "embeddings",
            &EmbeddingRequest {
                model: model_id,
                input: content,
            },
        )?;
        parse_embedding(model_id, response)
    }
}
