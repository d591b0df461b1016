mod http;
pub mod openai;
pub mod openrouter;
pub mod wire;

pub use openai::{OpenAiEmbedder, OPENAI_BASE_URL, OPENAI_KEY_VAR};
pub use openrouter::{OpenRouterClient, OPENROUTER_BASE_URL, OPENROUTER_KEY_VAR};
pub use wire::parse_models;
