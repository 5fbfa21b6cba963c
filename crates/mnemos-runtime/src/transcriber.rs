//! [`WhisperTranscriber`] – audio file → transcript, via a Whisper server
//! speaking the OpenAI-compatible `POST /v1/audio/transcriptions` API
//! (faster-whisper-server, whisper.cpp `--inference-path`, LocalAI).

use async_trait::async_trait;
use mnemos_types::{ProducerError, Transcriber};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_WHISPER_URL: &str = "http://localhost:8000";

pub const DEFAULT_WHISPER_MODEL: &str = "Systran/faster-whisper-base";

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// [`Transcriber`] backed by a Whisper HTTP server.
pub struct WhisperTranscriber {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WhisperTranscriber {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Segments of a transcript joined into one line.
fn normalise(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<String, ProducerError> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| ProducerError::EncodingError(format!("cannot read {}: {e}", audio.display())))?;
        if bytes.is_empty() {
            return Err(ProducerError::EncodingError("empty recording".into()));
        }
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("model", self.model.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProducerError::ModelUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProducerError::ModelUnavailable(format!("whisper returned {status}: {body}")));
        }
        let reply: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProducerError::EncodingError(e.to_string()))?;

        let transcript = normalise(&reply.text);
        if transcript.is_empty() {
            return Err(ProducerError::EncodingError("no speech recognised".into()));
        }
        debug!(model = %self.model, chars = transcript.len(), "audio transcribed");
        Ok(transcript)
    }
}
