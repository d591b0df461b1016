//! OpenRouter: chat completions and the model catalog.

use std::time::Duration;

use serde_json::Value;

use survey_core::{ChatCompletion, ChatProvider, SurveyResult};

use crate::http::{env_key, JsonClient};
use crate::wire::{parse_chat, ChatRequest, ChatResponse};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_KEY_VAR: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: JsonClient,
}

impl OpenRouterClient {
    /// Key from `OPENROUTER_API_KEY`, default base URL, 120 s timeout.
    pub fn from_env() -> SurveyResult<Self> {
        Self::with_config(OPENROUTER_BASE_URL, Duration::from_secs(120))
    }

    /// Key from `OPENROUTER_API_KEY` with an explicit endpoint and timeout.
    pub fn with_config(base_url: &str, timeout: Duration) -> SurveyResult<Self> {
        Ok(Self::new(env_key(OPENROUTER_KEY_VAR)?, base_url, timeout))
    }

    pub fn new(api_key: impl Into<String>, base_url: &str, timeout: Duration) -> Self {
        Self {
            http: JsonClient::new(api_key.into(), base_url, timeout),
        }
    }

    /// Raw `GET /models` body. Parse it with [`crate::wire::parse_models`].
    pub fn fetch_catalog(&self) -> SurveyResult<Value> {
        self.http.get("models")
    }
}

impl ChatProvider for OpenRouterClient {
    fn complete(&self, model_id: &str, prompt: &str) -> SurveyResult<ChatCompletion> {
        let response: ChatResponse = self
            .http
            .post("chat/completions", &ChatRequest::user(model_id, prompt))?;
        parse_chat(model_id, response)
    }
}
