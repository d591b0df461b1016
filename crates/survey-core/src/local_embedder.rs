use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::error::{SurveyError, SurveyResult};
use crate::provider::{EmbeddingProvider, EmbeddingVector};

/// Model id under which local embeddings are stored.
pub const LOCAL_EMBEDDING_MODEL: &str = "fastembed/bge-small-en-v1.5";

/// In-process embeddings, no API key required. The model is downloaded and
/// loaded on first use.
pub struct LocalEmbedder {
    model: OnceLock<TextEmbedding>,
    init_lock: Mutex<()>,
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self {
            model: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    fn get_model(&self) -> SurveyResult<&TextEmbedding> {
        if let Some(m) = self.model.get() {
            return Ok(m);
        }
        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| SurveyError::Provider("embedding model init lock poisoned".into()))?;
        if let Some(m) = self.model.get() {
            return Ok(m);
        }
        info!(model = LOCAL_EMBEDDING_MODEL, "loading local embedding model");
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::BGESmallENV15Q).with_show_download_progress(true),
        )
        .map_err(|e| SurveyError::Provider(format!("failed to init model: {e}")))?;
        Ok(self.model.get_or_init(|| model))
    }
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn embed(&self, model_id: &str, content: &str) -> SurveyResult<EmbeddingVector> {
        if model_id != LOCAL_EMBEDDING_MODEL {
            return Err(SurveyError::Config(format!(
                "local embedder only serves {LOCAL_EMBEDDING_MODEL}, not {model_id}"
            )));
        }
        let model = self.get_model()?;
        let vector = model
            .embed(vec![content], None)
            .map_err(|e| SurveyError::Provider(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| SurveyError::Provider("empty embedding result".into()))?;
        Ok(EmbeddingVector {
            model: LOCAL_EMBEDDING_MODEL.to_string(),
            vector,
        })
    }
}
