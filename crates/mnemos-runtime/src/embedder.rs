//! [`OllamaEmbedder`] – text → vector, via `/api/embeddings`.

use async_trait::async_trait;
use mnemos_types::{Embedder, Embedding, ProducerError};
use tracing::debug;

use crate::ollama::{OllamaClient, OllamaError};

pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";

/// [`Embedder`] backed by an Ollama embedding model.
///
/// `dimension` is what the model is expected to produce; the store rejects
/// vectors of any other length.
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dimension,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProducerError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ProducerError::EncodingError("cannot embed empty text".into()));
        }
        let vector = self.client.embeddings(&self.model, text).await.map_err(|e| match e {
            OllamaError::BadResponse(msg) => ProducerError::EncodingError(msg),
            other => ProducerError::ModelUnavailable(other.to_string()),
        })?;
        debug!(model = %self.model, dim = vector.len(), "text embedded");
        Ok(Embedding::new(vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn offline() -> OllamaEmbedder {
        OllamaEmbedder::new(
            OllamaClient::new("http://127.0.0.1:1", Duration::from_secs(2)),
            DEFAULT_EMBEDDING_MODEL,
            384,
        )
    }

    #[tokio::test]
    async fn blank_text_is_an_encoding_error() {
        let err = offline().embed("   ").await.unwrap_err();
        assert!(matches!(err, ProducerError::EncodingError(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_model_unavailable() {
        let embedder = offline();
        assert_eq!(embedder.dimension(), 384);
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, ProducerError::ModelUnavailable(_)));
    }
}
