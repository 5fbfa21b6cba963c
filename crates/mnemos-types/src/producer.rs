//! Seams to the external models that feed and summarise the store.
//!
//! The store itself only needs "given content, produce (text, modality,
//! vector)" and "given captions, produce a summary". Implementations live
//! outside this crate (`mnemos-runtime` ships Ollama-backed ones); tests use
//! hand-written fakes.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::embedding::Embedding;

/// Failures reported by an external producer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// The input could not be encoded (empty text, unreadable response).
    #[error("encoding error: {0}")]
    EncodingError(String),
    /// The captioning / transcription / embedding model cannot be reached.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("summarizer unavailable: {0}")]
    SummarizerUnavailable(String),
    #[error("summarizer timed out: {0}")]
    SummarizerTimeout(String),
}

/// Text → fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Embedding, ProducerError>;
}

/// Image bytes → caption.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image: &[u8]) -> Result<String, ProducerError>;
}

/// Audio file → transcript.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String, ProducerError>;
}

/// Captions of one cluster → a short natural-language summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, captions: &[String]) -> Result<String, ProducerError>;
}
