//! [`OllamaSummarizer`] – cluster captions → short summary, via `/api/chat`.

use async_trait::async_trait;
use mnemos_types::{ProducerError, Summarizer};
use std::time::Duration;
use tracing::debug;

use crate::ollama::{ChatMessage, OllamaClient, OllamaError, Role};

pub const DEFAULT_SUMMARY_MODEL: &str = "llama3:8b";

pub const SYSTEM_PROMPT: &str = "You are a super smart and helpful assistant.";

pub const INSTRUCTION: &str = "Summarize the following memory entries into a short paragraph \
capturing the main themes, in 2-3 sentences max.";

/// Build the user message for one cluster: the instruction followed by one
/// `- caption` line per member.
pub fn build_prompt(captions: &[String]) -> String {
    let mut prompt = String::from(INSTRUCTION);
    prompt.push_str("\n\n");
    for caption in captions {
        prompt.push_str("- ");
        prompt.push_str(caption.trim());
        prompt.push('\n');
    }
    prompt
}

/// [`Summarizer`] backed by an Ollama chat model.
pub struct OllamaSummarizer {
    client: OllamaClient,
    model: String,
}

impl OllamaSummarizer {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Shorthand for a summarizer with its own client.
    pub fn connect(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self::new(OllamaClient::new(base_url, timeout), model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, captions: &[String]) -> Result<String, ProducerError> {
        if captions.is_empty() {
            return Err(ProducerError::EncodingError("no captions to summarize".into()));
        }
        let messages = [
            ChatMessage {
                role: Role::System,
                content: SYSTEM_PROMPT.into(),
            },
            ChatMessage {
                role: Role::User,
                content: build_prompt(captions),
            },
        ];
        debug!(model = %self.model, captions = captions.len(), "summarizing cluster");
        let reply = self.client.chat(&self.model, &messages).await.map_err(map_error)?;
        let summary = reply.trim();
        if summary.is_empty() {
            return Err(ProducerError::SummarizerUnavailable("model returned an empty summary".into()));
        }
        Ok(summary.to_string())
    }
}

fn map_error(e: OllamaError) -> ProducerError {
    if e.is_timeout() {
        ProducerError::SummarizerTimeout(e.to_string())
    } else {
        ProducerError::SummarizerUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_caption() {
        let prompt = build_prompt(&["a dog on a beach".into(), "  waves at sunset ".into()]);
        assert!(prompt.starts_with(INSTRUCTION));
        assert!(prompt.contains("- a dog on a beach\n"));
        assert!(prompt.contains("- waves at sunset\n"));
        assert_eq!(prompt.matches("\n- ").count(), 2);
    }

    #[tokio::test]
    async fn empty_cluster_is_rejected_without_a_request() {
        let summarizer = OllamaSummarizer::connect("http://127.0.0.1:1", DEFAULT_SUMMARY_MODEL, Duration::from_secs(1));
        let err = summarizer.summarize(&[]).await.unwrap_err();
        assert!(matches!(err, ProducerError::EncodingError(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let summarizer = OllamaSummarizer::connect("http://127.0.0.1:1", DEFAULT_SUMMARY_MODEL, Duration::from_secs(2));
        let err = summarizer.summarize(&["x".into()]).await.unwrap_err();
        assert!(matches!(err, ProducerError::SummarizerUnavailable(_)));
    }
}
