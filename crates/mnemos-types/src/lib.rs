//! `mnemos-types` – shared data model for the Mnemos memory store.
//!
//! - [`embedding`] – the embedding-space contract: [`Embedding`] and the
//!   squared-L2 distance every other crate ranks by.
//! - [`producer`] – the seams to external models (embedder, captioner,
//!   transcriber, summarizer) and their [`ProducerError`].
//!
//! The record types in this module are what the store persists and what
//! presentation layers read back.

pub mod embedding;
pub mod producer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use embedding::{Embedding, squared_l2};
pub use producer::{Captioner, Embedder, ProducerError, Summarizer, Transcriber};

/// Stable identity of a memory record.
///
/// Assigned by the relational log, strictly increasing and never reused.
/// The vector index is keyed by the same id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub i64);

impl MemoryId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MemoryId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Content type a memory was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Image,
    Audio,
    Text,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Text => "text",
        }
    }

    /// Parse the lowercase storage form. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Modality::Image),
            "audio" => Some(Modality::Audio),
            "text" => Some(Modality::Text),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored memory.
///
/// Created by the store when a memory is added; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    /// Caption or transcript text.
    pub caption: String,
    pub modality: Modality,
    /// Creation instant, assigned by the store. Non-decreasing in id order.
    pub timestamp: DateTime<Utc>,
    /// Reference to externally stored content. Never validated.
    pub filepath: String,
}

/// A generated summary over one cluster of memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    pub id: i64,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// One k-NN result: the resolved record and its squared-L2 distance to the
/// query (lower is more similar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub distance: f32,
}
