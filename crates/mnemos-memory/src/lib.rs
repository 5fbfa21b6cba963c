//! `mnemos-memory` – The Memory Store.
//!
//! Persists captioned memories and their embeddings to two local SQLite
//! files and keeps them in lock-step.
//!
//! # Modules
//!
//! - [`metadata_log`] – [`MetadataLog`][metadata_log::MetadataLog]: the
//!   relational record of every memory and reflection. Assigns ids.
//! - [`vector_index`] – [`VectorIndex`][vector_index::VectorIndex]: exact L2
//!   nearest-neighbour search over embeddings keyed by memory id.
//! - [`store`] – [`MemoryStore`]: the only writer of both stores. Guarantees
//!   that every memory is present in both or in neither.
//! - [`cluster`] – k-means over embeddings.
//! - [`reflection`] – [`ReflectionPipeline`]: clusters recent memories and
//!   asks a summarizer for one reflection per cluster.
//! - [`error`] – [`StoreError`].

pub mod cluster;
pub mod error;
pub mod metadata_log;
pub mod reflection;
pub mod store;
pub mod vector_index;

pub use error::StoreError;
pub use reflection::{ReflectionConfig, ReflectionPipeline, ReflectionRun, RetryPolicy};
pub use store::{ConsistencyReport, MemoryStore, StoreConfig};
