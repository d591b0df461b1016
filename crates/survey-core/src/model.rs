use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::TokenUsage;
use crate::scoring::extract_score;

/// Model id under which human-authored reference answers are stored.
pub const HUMAN_MODEL: &str = "human/human";

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// Per-token prices in USD, as published by the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub prompt: f64,
    pub completion: f64,
}

impl Pricing {
    pub fn new(prompt: f64, completion: f64) -> Self {
        Self { prompt, completion }
    }

    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        f64::from(prompt_tokens) * self.prompt + f64::from(completion_tokens) * self.completion
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: String,
    pub context_length: Option<u64>,
    pub pricing: Pricing,
}

impl Model {
    pub fn new(id: impl Into<String>, pricing: Pricing) -> Self {
        let id = id.into();
        Self {
            name: model_name(&id).to_string(),
            id,
            description: String::new(),
            context_length: None,
            pricing,
        }
    }
}

/// `openai/gpt-4-turbo` -> `gpt-4-turbo`
pub fn model_name(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

/// `openai/gpt-4-turbo` -> `openai`. Ids without a provider prefix have no company.
pub fn model_company(model_id: &str) -> Option<&str> {
    model_id.rsplit_once('/').map(|(company, _)| company)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub marking_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_model: Option<String>,
}

impl Prompt {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Token counts plus the cost fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub total_cost: f64,
}

impl Usage {
    /// Prices the reported tokens with a snapshot of the model's pricing.
    /// The result is never recomputed if the catalog price changes later.
    pub fn priced(tokens: &TokenUsage, pricing: &Pricing) -> Self {
        Self {
            prompt_tokens: tokens.prompt_tokens,
            completion_tokens: tokens.completion_tokens,
            total_tokens: tokens
                .total_tokens
                .unwrap_or(tokens.prompt_tokens + tokens.completion_tokens),
            total_cost: pricing.cost(tokens.prompt_tokens, tokens.completion_tokens),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOutput {
    pub id: String,
    pub prompt_id: String,
    pub model: String,
    pub content: String,
    pub usage: Option<Usage>,
    pub request_id: Option<String>,
    /// Replicate index within `(model, prompt)`. `None` for hand-written outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl ModelOutput {
    pub fn new(
        prompt_id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            prompt_id: prompt_id.into(),
            model: model.into(),
            content: content.into(),
            usage: None,
            request_id: None,
            sample: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_sample(mut self, sample: u32) -> Self {
        self.sample = Some(sample);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub output_id: String,
    pub model: String,
    pub vector: Vec<f32>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub fn new(output_id: impl Into<String>, model: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            output_id: output_id.into(),
            model: model.into(),
            vector,
            request_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub output_id: String,
    pub model: String,
    pub content: String,
    pub usage: Option<Usage>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn new(
        output_id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            output_id: output_id.into(),
            model: model.into(),
            content: content.into(),
            usage: None,
            request_id: None,
            created_at: Utc::now(),
        }
    }

    /// Numeric mark found in the judgement text, if the judge gave one.
    pub fn score(&self) -> Option<f64> {
        extract_score(&self.content)
    }
}

/// One row of the append-only request log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub resource: String,
    pub request: String,
    pub response: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// An output with its children for one embedding model, loaded eagerly.
#[derive(Debug, Clone)]
pub struct OutputBundle {
    pub output: ModelOutput,
    pub embedding: Option<Vec<f64>>,
    pub evaluations: Vec<Evaluation>,
}

impl OutputBundle {
    pub fn new(output: ModelOutput) -> Self {
        Self {
            output,
            embedding: None,
            evaluations: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.output.model
    }

    pub fn evaluation(&self, evaluation_model: &str) -> Option<&Evaluation> {
        self.evaluations.iter().find(|e| e.model == evaluation_model)
    }

    pub fn score(&self, evaluation_model: &str) -> Option<f64> {
        self.evaluation(evaluation_model).and_then(Evaluation::score)
    }

    pub fn total_cost(&self) -> Option<f64> {
        self.output.usage.map(|u| u.total_cost)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub models: usize,
    pub prompts: usize,
    pub outputs: usize,
    pub embeddings: usize,
    pub evaluations: usize,
    pub requests: usize,
}
