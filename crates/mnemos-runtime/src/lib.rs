//! `mnemos-runtime` – producers and flows around the memory store.
//!
//! # Modules
//!
//! - [`ollama`] – [`OllamaClient`][ollama::OllamaClient]: async client for
//!   a local [Ollama](https://ollama.com) server (`http://localhost:11434`).
//! - [`embedder`], [`captioner`], [`summarizer`] – Ollama-backed
//!   implementations of the producer traits from `mnemos-types`.
//! - [`transcriber`] – [`WhisperTranscriber`]: audio transcripts from a
//!   Whisper server with the OpenAI-compatible transcription API.
//! - [`ingest`] – [`Ingestor`]: remember text, images and audio, and recall
//!   memories for a free-text query.
//! - [`scheduler`] – [`ReflectionScheduler`]: periodic reflection runs,
//!   stopped through a `CancellationToken`.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: stderr
//!   logging (compact or JSON) with optional OTLP span export.

pub mod captioner;
pub mod embedder;
pub mod ingest;
pub mod ollama;
pub mod scheduler;
pub mod summarizer;
pub mod telemetry;
pub mod transcriber;

pub use captioner::OllamaCaptioner;
pub use embedder::OllamaEmbedder;
pub use ingest::{IngestError, Ingestor};
pub use ollama::{OllamaClient, OllamaError};
pub use scheduler::ReflectionScheduler;
pub use summarizer::OllamaSummarizer;
pub use telemetry::{TelemetryConfig, TracerProviderGuard, init_tracing};
pub use transcriber::WhisperTranscriber;
