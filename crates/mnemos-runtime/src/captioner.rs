//! [`OllamaCaptioner`] – image bytes → caption, via a vision model on
//! `/api/generate`.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mnemos_types::{Captioner, ProducerError};
use tracing::debug;

use crate::ollama::OllamaClient;

pub const DEFAULT_CAPTION_MODEL: &str = "llava";

pub const CAPTION_PROMPT: &str = "Describe this image in one short sentence.";

/// [`Captioner`] backed by an Ollama vision model.
pub struct OllamaCaptioner {
    client: OllamaClient,
    model: String,
}

impl OllamaCaptioner {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Captioner for OllamaCaptioner {
    async fn caption(&self, image: &[u8]) -> Result<String, ProducerError> {
        if image.is_empty() {
            return Err(ProducerError::EncodingError("empty image".into()));
        }
        let encoded = [STANDARD.encode(image)];
        let reply = self
            .client
            .generate(&self.model, CAPTION_PROMPT, &encoded)
            .await
            .map_err(|e| ProducerError::ModelUnavailable(e.to_string()))?;
        let caption = reply.trim();
        if caption.is_empty() {
            return Err(ProducerError::ModelUnavailable("model returned an empty caption".into()));
        }
        debug!(model = %self.model, bytes = image.len(), "image captioned");
        Ok(caption.to_string())
    }
}
