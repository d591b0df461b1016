//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `$LLM_SURVEY_CONFIG` environment variable
//! 2. `~/.config/llm-survey/config.toml`
//! 3. Built-in defaults (everything is optional)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use survey_core::{EvaluationTemplate, HUMAN_MODEL};
use survey_provider::{OPENAI_BASE_URL, OPENROUTER_BASE_URL};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub survey: SurveyConfig,
    pub embedding: EmbeddingConfig,
    pub evaluation: EvaluationConfig,
    pub report: ReportConfig,
    pub providers: ProvidersConfig,
}

/// Database storage settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. Default: platform-specific data dir.
    pub path: Option<String>,
}

/// Generation targets for `run`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub default_prompt: String,
    /// Outputs wanted per (model, prompt).
    pub count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Judge used when neither the command line nor the prompt names one.
    pub model: Option<String>,
    /// Custom judge instructions with `{problem}`, `{marking_scheme}` and
    /// `{answer}` placeholders.
    pub template: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Model whose outputs are the reference answers.
    pub reference_model: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openrouter_base_url: String,
    pub openai_base_url: String,
    pub timeout_secs: u64,
}

// --- Defaults ---

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            default_prompt: "marshmallow".into(),
            count: 3,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".into(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            reference_model: HUMAN_MODEL.into(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openrouter_base_url: OPENROUTER_BASE_URL.into(),
            openai_base_url: OPENAI_BASE_URL.into(),
            timeout_secs: 120,
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EvaluationConfig {
    pub fn template(&self) -> Result<EvaluationTemplate> {
        match &self.template {
            Some(text) => EvaluationTemplate::new(text.as_str()).context("invalid [evaluation] template"),
            None => Ok(EvaluationTemplate::default()),
        }
    }
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config() -> Result<Config> {
    let path = config_path();

    if let Some(p) = &path {
        if p.exists() {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    // 1. Environment variable
    if let Ok(p) = std::env::var("LLM_SURVEY_CONFIG") {
        return Some(PathBuf::from(p));
    }

    // 2. ~/.config/llm-survey/config.toml
    if let Some(home) = dirs_home() {
        let p = home.join(".config").join("llm-survey").join("config.toml");
        return Some(p);
    }

    None
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// Show the active config path (for `llm-survey config`).
pub fn show_config_path() -> String {
    match config_path() {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}
