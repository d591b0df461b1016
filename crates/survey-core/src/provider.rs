use serde::{Deserialize, Serialize};

use crate::error::SurveyResult;

/// Token counts as reported by the provider, before pricing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// The part of a chat completion the survey keeps. This is what the request
/// log stores as the response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub model: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub model: String,
    pub vector: Vec<f32>,
}

pub trait ChatProvider {
    fn complete(&self, model_id: &str, prompt: &str) -> SurveyResult<ChatCompletion>;
}

pub trait EmbeddingProvider {
    fn embed(&self, model_id: &str, content: &str) -> SurveyResult<EmbeddingVector>;
}
