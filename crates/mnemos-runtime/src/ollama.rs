//! [`OllamaClient`] – thin async client for a local Ollama server.
//!
//! Covers the three endpoints the producers need:
//!
//! | endpoint          | used by                                              |
//! |-------------------|------------------------------------------------------|
//! | `/api/chat`       | [`OllamaSummarizer`][crate::summarizer::OllamaSummarizer] |
//! | `/api/generate`   | [`OllamaCaptioner`][crate::captioner::OllamaCaptioner] (base64 images) |
//! | `/api/embeddings` | [`OllamaEmbedder`][crate::embedder::OllamaEmbedder]   |
//!
//! # Example
//!
//! ```rust,no_run
//! use mnemos_runtime::ollama::{ChatMessage, OllamaClient, Role};
//! use std::time::Duration;
//!
//! let client = OllamaClient::new("http://localhost:11434", Duration::from_secs(60));
//! let messages = vec![ChatMessage { role: Role::User, content: "Hello".into() }];
//!
//! // Requires a running Ollama instance.
//! // let reply = client.chat("llama3:8b", &messages).await.unwrap();
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from talking to Ollama.
#[derive(Error, Debug)]
pub enum OllamaError {
    /// The HTTP request failed or returned an error status.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response body did not have the expected shape.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl OllamaError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, OllamaError::Http(e) if e.is_timeout())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    images: &'a [String],
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// OllamaClient
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for the Ollama REST API.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client for `base_url` (e.g. `"http://localhost:11434"`).
    /// Every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `messages` to `model` and return the assistant's reply text.
    pub async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, OllamaError> {
        let body = ChatRequest {
            model,
            messages,
            stream: false,
        };
        let response: ChatResponse = self.post("/api/chat", &body).await?;
        Ok(response.message.content)
    }

    /// One-shot completion. `images` are base64-encoded.
    pub async fn generate(&self, model: &str, prompt: &str, images: &[String]) -> Result<String, OllamaError> {
        let body = GenerateRequest {
            model,
            prompt,
            images,
            stream: false,
        };
        let response: GenerateResponse = self.post("/api/generate", &body).await?;
        Ok(response.response)
    }

    pub async fn embeddings(&self, model: &str, prompt: &str) -> Result<Vec<f32>, OllamaError> {
        let body = EmbeddingsRequest { model, prompt };
        let response: EmbeddingsResponse = self.post("/api/embeddings", &body).await?;
        if response.embedding.is_empty() {
            return Err(OllamaError::BadResponse("empty embedding".into()));
        }
        Ok(response.embedding)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, OllamaError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "ollama request");
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| OllamaError::BadResponse(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
