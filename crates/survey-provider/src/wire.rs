//! Request and response bodies of the OpenAI-compatible HTTP APIs.
//!
//! Parsing is kept apart from transport so that every mapping from a
//! provider answer to a domain value can be tested on fixtures.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use survey_core::{
    model_name, ChatCompletion, EmbeddingVector, Model, Pricing, SurveyError, SurveyResult,
    TokenUsage,
};

// ---------------------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
pub struct Message<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

impl<'a> ChatRequest<'a> {
    /// A single user turn.
    pub fn user(model: &'a str, prompt: &'a str) -> Self {
        Self {
            model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub model: Option<String>,
    pub choices: Option<Vec<Choice>>,
    pub usage: Option<WireUsage>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub message: Option<String>,
    pub code: Option<Value>,
}

impl ApiError {
    fn describe(&self) -> String {
        let message = self.message.as_deref().unwrap_or("unknown error");
        match &self.code {
            Some(code) => format!("{message} (code {code})"),
            None => message.to_string(),
        }
    }
}

/// Error envelope of a non-2xx body, when it has one.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ApiError>,
}

/// Message for a non-2xx answer, preferring the provider's own error text.
pub fn status_error(status: u16, body: &str) -> SurveyError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .map(|e| e.describe())
        .unwrap_or_else(|| body.chars().take(200).collect());
    SurveyError::Provider(format!("HTTP {status}: {detail}"))
}

pub fn parse_chat(model_id: &str, response: ChatResponse) -> SurveyResult<ChatCompletion> {
    if let Some(error) = response.error {
        return Err(SurveyError::Provider(format!(
            "{model_id}: {}",
            error.describe()
        )));
    }

    let choice = response
        .choices
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| SurveyError::Provider(format!("{model_id}: no choices in response")))?;

    let content = choice
        .message
        .and_then(|m| m.content)
        .unwrap_or_default();

    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens.unwrap_or(0),
        completion_tokens: u.completion_tokens.unwrap_or(0),
        total_tokens: u.total_tokens,
    });

    Ok(ChatCompletion {
        model: response.model.unwrap_or_else(|| model_id.to_string()),
        content,
        usage,
    })
}

// ---------------------------------------------------------------------------
// Model catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Catalog {
    data: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    name: Option<String>,
    description: Option<String>,
    context_length: Option<u64>,
    pricing: Option<CatalogPricing>,
}

#[derive(Debug, Deserialize)]
struct CatalogPricing {
    prompt: Option<Value>,
    completion: Option<Value>,
}

/// Catalog prices are decimal strings (`"0.0000025"`), occasionally numbers.
fn price(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Models from a `GET /models` body.
pub fn parse_models(body: &Value) -> SurveyResult<Vec<Model>> {
    if let Some(error) = body.get("error") {
        let error: ApiError = serde_json::from_value(error.clone())?;
        return Err(SurveyError::Provider(format!("models: {}", error.describe())));
    }

    let catalog: Catalog = serde_json::from_value(body.clone())?;
    Ok(catalog
        .data
        .into_iter()
        .map(|entry| {
            let pricing = entry
                .pricing
                .map(|p| Pricing::new(price(p.prompt.as_ref()), price(p.completion.as_ref())))
                .unwrap_or_default();
            Model {
                name: entry
                    .name
                    .unwrap_or_else(|| model_name(&entry.id).to_string()),
                description: entry.description.unwrap_or_default(),
                context_length: entry.context_length,
                pricing,
                id: entry.id,
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub model: Option<String>,
    pub data: Option<Vec<EmbeddingData>>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
}

pub fn parse_embedding(model_id: &str, response: EmbeddingResponse) -> SurveyResult<EmbeddingVector> {
    if let Some(error) = response.error {
        return Err(SurveyError::Provider(format!(
            "{model_id}: {}",
            error.describe()
        )));
    }

    let vector = response
        .data
        .and_then(|d| d.into_iter().next())
        .map(|d| d.embedding)
        .ok_or_else(|| SurveyError::Provider(format!("{model_id}: no embedding in response")))?;

    Ok(EmbeddingVector {
        model: response.model.unwrap_or_else(|| model_id.to_string()),
        vector,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(body: Value) -> ChatResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_chat_request_shape() {
        let body = serde_json::to_value(ChatRequest::user("openai/gpt-4o", "Hi")).unwrap();
        assert_eq!(
            body,
            json!({"model": "openai/gpt-4o", "messages": [{"role": "user", "content": "Hi"}]})
        );
    }

    #[test]
    fn test_parse_chat_success() {
        let response = chat(json!({
            "id": "gen-123",
            "model": "openai/gpt-4o-2024-05-13",
            "choices": [{"message": {"role": "assistant", "content": "About 20,000."}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        }));
        let completion = parse_chat("openai/gpt-4o", response).unwrap();
        assert_eq!(completion.model, "openai/gpt-4o-2024-05-13");
        assert_eq!(completion.content, "About 20,000.");
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 5,
                total_tokens: Some(17),
            })
        );
    }

    #[test]
    fn test_parse_chat_without_usage() {
        let response = chat(json!({"choices": [{"message": {"content": "ok"}}]}));
        let completion = parse_chat("m/a", response).unwrap();
        assert_eq!(completion.model, "m/a");
        assert_eq!(completion.usage, None);
    }

    #[test]
    fn test_parse_chat_in_band_error() {
        let response = chat(json!({
            "error": {"message": "Rate limit exceeded", "code": 429}
        }));
        let err = parse_chat("m/a", response).unwrap_err();
        assert!(matches!(&err, SurveyError::Provider(msg) if msg.contains("Rate limit exceeded")));
        assert!(err.is_external());
    }

    #[test]
    fn test_parse_chat_empty_choices() {
        let response = chat(json!({"choices": []}));
        assert!(matches!(
            parse_chat("m/a", response),
            Err(SurveyError::Provider(_))
        ));
    }

    #[test]
    fn test_status_error_prefers_provider_message() {
        let err = status_error(402, r#"{"error": {"message": "Insufficient credits", "code": 402}}"#);
        assert!(matches!(&err, SurveyError::Provider(msg) if msg.contains("Insufficient credits")));

        let err = status_error(502, "Bad gateway");
        assert!(matches!(&err, SurveyError::Provider(msg) if msg == "HTTP 502: Bad gateway"));
    }

    #[test]
    fn test_parse_models() {
        let body = json!({
            "data": [
                {
                    "id": "openai/gpt-4o",
                    "name": "OpenAI: GPT-4o",
                    "description": "Omni model",
                    "context_length": 128000,
                    "pricing": {"prompt": "0.000005", "completion": "0.000015", "image": "0.007"}
                },
                {"id": "mystery/model", "pricing": {"prompt": 0.5}},
            ]
        });
        let models = parse_models(&body).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "openai/gpt-4o");
        assert_eq!(models[0].name, "OpenAI: GPT-4o");
        assert_eq!(models[0].context_length, Some(128_000));
        assert_eq!(models[0].pricing, Pricing::new(0.000005, 0.000015));
        assert_eq!(models[1].name, "model");
        assert_eq!(models[1].pricing, Pricing::new(0.5, 0.0));
    }

    #[test]
    fn test_parse_models_error() {
        let body = json!({"error": {"message": "Unauthorized"}});
        assert!(matches!(parse_models(&body), Err(SurveyError::Provider(_))));
        assert!(matches!(
            parse_models(&json!({"unexpected": true})),
            Err(SurveyError::Serialization(_))
        ));
    }

    #[test]
    fn test_parse_embedding() {
        let response: EmbeddingResponse = serde_json::from_value(json!({
            "object": "list",
            "model": "text-embedding-3-small",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.1, -0.2, 0.3]}],
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        }))
        .unwrap();
        let vector = parse_embedding("text-embedding-3-small", response).unwrap();
        assert_eq!(vector.vector, vec![0.1, -0.2, 0.3]);

        let empty: EmbeddingResponse = serde_json::from_value(json!({"data": []})).unwrap();
        assert!(matches!(
            parse_embedding("text-embedding-3-small", empty),
            Err(SurveyError::Provider(_))
        ));
    }
}
