//! Memory Store.
//!
//! Composition root over the [`MetadataLog`] and the [`VectorIndex`]. The
//! store owns both, assigns timestamps, and keeps one invariant: once
//! [`MemoryStore::add_memory`] returns, a record exists in both stores under
//! the same id, or in neither.
//!
//! # Write protocol
//!
//! `add_memory` runs under the store's write lock:
//!
//! 1. open a log transaction and insert the row (SQLite assigns the id);
//! 2. add `(id, embedding)` to the index, durably;
//! 3. commit the log transaction.
//!
//! A failure in step 2 rolls the transaction back. A failure in step 3
//! removes the vector added in step 2. A crash between steps 2 and 3 leaves
//! a vector without a row, which [`MemoryStore::open`] discards on the next
//! start. A vector already sitting on the id the log hands out can only be
//! such a leftover, so step 2 overwrites it.
//!
//! Rows without a vector are never deleted. They can only appear when the
//! index file was lost or replaced; they are reported by
//! [`MemoryStore::check_consistency`] and skipped by searches and loads.
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::MemoryStore;
//! use mnemos_types::{Embedding, Modality};
//!
//! let store = MemoryStore::open_in_memory(3).unwrap();
//! let a = store
//!     .add_memory("a sunny beach", Modality::Image, "beach.png", Embedding::new(vec![1.0, 0.0, 0.0]))
//!     .unwrap();
//! store
//!     .add_memory("a snowy peak", Modality::Image, "peak.png", Embedding::new(vec![0.0, 1.0, 0.0]))
//!     .unwrap();
//!
//! let hits = store.search_memory(&Embedding::new(vec![0.9, 0.1, 0.0]), 1).unwrap();
//! assert_eq!(hits[0].record.id, a.id);
//! ```

use chrono::{DateTime, Utc};
use mnemos_types::{Embedding, MemoryId, MemoryRecord, Modality, ReflectionRecord, SearchHit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, poisoned};
use crate::metadata_log::{MetadataLog, NewMemory};
use crate::vector_index::VectorIndex;

/// File name of the relational log inside the data directory.
pub const LOG_FILE: &str = "memories.db";
/// File name of the vector index inside the data directory.
pub const INDEX_FILE: &str = "vectors.db";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where and how a [`MemoryStore`] persists its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding [`LOG_FILE`] and [`INDEX_FILE`]. Created if absent.
    pub data_dir: PathBuf,
    /// Embedding dimension. Fixed once the index file exists.
    pub embedding_dim: usize,
    /// Upper bound on waiting for a busy database.
    pub storage_timeout: Duration,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>, embedding_dim: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            embedding_dim,
            storage_timeout: Duration::from_secs(5),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConsistencyReport
// ─────────────────────────────────────────────────────────────────────────────

/// Ids that exist in only one of the two sub-stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub rows_without_vectors: Vec<MemoryId>,
    pub vectors_without_rows: Vec<MemoryId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.rows_without_vectors.is_empty() && self.vectors_without_rows.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

struct Stores {
    log: MetadataLog,
    index: VectorIndex,
    /// Newest timestamp issued, used to keep timestamps non-decreasing even
    /// if the wall clock steps backwards.
    last_timestamp: Option<DateTime<Utc>>,
}

impl Stores {
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    fn consistency(&self) -> Result<ConsistencyReport, StoreError> {
        let rows: BTreeSet<MemoryId> = self.log.ids()?.into_iter().collect();
        let vectors: BTreeSet<MemoryId> = self.index.ids()?.into_iter().collect();
        Ok(ConsistencyReport {
            rows_without_vectors: rows.difference(&vectors).copied().collect(),
            vectors_without_rows: vectors.difference(&rows).copied().collect(),
        })
    }

    /// Discard vectors left behind by interrupted inserts. Rows missing
    /// their vector are only reported; their content is never dropped.
    fn reconcile(&self) -> Result<ConsistencyReport, StoreError> {
        let report = self.consistency()?;
        for id in &report.vectors_without_rows {
            warn!(id = %id, "consistency violation: vector without metadata row; discarding");
            self.index.remove(*id)?;
        }
        if !report.rows_without_vectors.is_empty() {
            warn!(
                rows = report.rows_without_vectors.len(),
                first = %report.rows_without_vectors[0],
                "consistency violation: memories without vectors are kept but unsearchable"
            );
        }
        Ok(report)
    }
}

/// The persistent multimodal memory store.
///
/// `MemoryStore` is `Send + Sync`; construct it once and share it as
/// `Arc<MemoryStore>`. Inserts are serialised by a write lock; searches and
/// loads share a read lock, so a reader never observes half an insert.
pub struct MemoryStore {
    dimension: usize,
    data_dir: Option<PathBuf>,
    inner: RwLock<Stores>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("dimension", &self.dimension)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open (or create) a persistent store.
    ///
    /// Creates the data directory, both databases and their schemas if they
    /// are absent, checks the persisted embedding dimension, and discards any
    /// vector left behind by an insert interrupted by a crash.
    ///
    /// # Errors
    ///
    /// [`StoreError::StorageUnavailable`] if the directory cannot be created
    /// or written, [`StoreError::DimensionMismatch`] if the index was created
    /// with another dimension.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.embedding_dim == 0 {
            return Err(StoreError::InvalidConfig("embedding_dim must be positive".into()));
        }
        fs::create_dir_all(&config.data_dir).map_err(|e| {
            StoreError::StorageUnavailable(format!("cannot create {}: {e}", config.data_dir.display()))
        })?;
        if fs::metadata(&config.data_dir)?.permissions().readonly() {
            return Err(StoreError::StorageUnavailable(format!(
                "{} is read-only",
                config.data_dir.display()
            )));
        }
        info!(
            data_dir = %config.data_dir.display(),
            dimension = config.embedding_dim,
            "opening memory store"
        );
        let log = MetadataLog::open(&config.log_path(), config.storage_timeout)?;
        let index = VectorIndex::open(&config.index_path(), config.embedding_dim, config.storage_timeout)?;
        Self::assemble(log, index, Some(config.data_dir.clone()))
    }

    /// Open a temporary in-memory store (useful for testing).
    pub fn open_in_memory(dimension: usize) -> Result<Self, StoreError> {
        Self::assemble(
            MetadataLog::open_in_memory()?,
            VectorIndex::open_in_memory(dimension)?,
            None,
        )
    }

    fn assemble(log: MetadataLog, index: VectorIndex, data_dir: Option<PathBuf>) -> Result<Self, StoreError> {
        let last_timestamp = log.latest_timestamp()?;
        let stores = Stores {
            log,
            index,
            last_timestamp,
        };
        let report = stores.reconcile()?;
        if !report.vectors_without_rows.is_empty() {
            warn!(
                vectors_discarded = report.vectors_without_rows.len(),
                "recovered from an interrupted insert"
            );
        }
        Ok(Self {
            dimension: stores.index.dimension(),
            data_dir,
            inner: RwLock::new(stores),
        })
    }

    /// Re-run schema creation and leftover recovery. Idempotent; concurrent
    /// inserts wait for it to finish.
    pub fn ensure_initialized(&self) -> Result<(), StoreError> {
        let stores = self.write()?;
        stores.log.ensure_schema()?;
        stores.index.ensure_schema()?;
        stores.reconcile()?;
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Directory the store persists into; `None` for in-memory stores.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Persist a new memory and its embedding.
    ///
    /// # Errors
    ///
    /// [`StoreError::DimensionMismatch`] if `embedding` does not have the
    /// configured dimension; storage errors otherwise. On any error neither
    /// store holds the record.
    pub fn add_memory(
        &self,
        caption: &str,
        modality: Modality,
        filepath: &str,
        embedding: Embedding,
    ) -> Result<MemoryRecord, StoreError> {
        embedding.check_dimension(self.dimension)?;

        let mut stores = self.write()?;
        let new = NewMemory {
            caption,
            modality,
            timestamp: stores.next_timestamp(),
            filepath,
        };

        let mut indexed = None;
        let result = stores.log.insert_with(&new, |record| {
            // The id is uncommitted, so a vector already on it is a leftover.
            if stores.index.upsert(record.id, embedding)?.is_some() {
                warn!(id = %record.id, "replaced stale vector on a new id");
            }
            indexed = Some(record.id);
            Ok(())
        });

        match result {
            Ok(record) => {
                stores.last_timestamp = Some(record.timestamp);
                debug!(id = %record.id, modality = %record.modality, "memory added");
                Ok(record)
            }
            Err(e) => {
                if let Some(id) = indexed {
                    // The row was never committed; take the vector back out.
                    if let Err(undo) = stores.index.remove(id) {
                        error!(id = %id, error = %undo, "failed to remove vector of an uncommitted memory");
                    }
                }
                warn!(error = %e, "add_memory aborted; no state changed");
                Err(e)
            }
        }
    }

    /// The `k` memories nearest to `query`, ascending by distance.
    ///
    /// An indexed id without a metadata row is a consistency violation: it is
    /// logged and skipped, and the remaining hits are still returned.
    pub fn search_memory(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>, StoreError> {
        query.check_dimension(self.dimension)?;
        let stores = self.read()?;
        let nearest = stores.index.search(query, k)?;
        let mut hits = Vec::with_capacity(nearest.len());
        for (id, distance) in nearest {
            match stores.log.get_by_id(id) {
                Ok(Some(record)) => hits.push(SearchHit { record, distance }),
                Ok(None) => {
                    warn!(id = %id, "consistency violation: indexed id has no metadata row; skipping")
                }
                Err(StoreError::Corrupt(reason)) => {
                    warn!(id = %id, reason = %reason, "unreadable metadata row; skipping")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(hits)
    }

    /// Look up one memory. Unknown ids are `Ok(None)`.
    pub fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>, StoreError> {
        self.read()?.log.get_by_id(id)
    }

    /// The embedding stored for `id`, if any.
    pub fn get_embedding(&self, id: MemoryId) -> Result<Option<Embedding>, StoreError> {
        self.read()?.index.get(id)
    }

    /// Every memory, ascending by id.
    pub fn list_memories(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        self.read()?.log.list_all()
    }

    pub fn memory_count(&self) -> Result<usize, StoreError> {
        self.read()?.log.count()
    }

    /// The `n` most recent memories paired with their embeddings by id,
    /// newest first. Records whose vector is missing are logged and skipped.
    pub fn load_recent(&self, n: usize) -> Result<Vec<(MemoryRecord, Embedding)>, StoreError> {
        let stores = self.read()?;
        let records = stores.log.list_recent(n)?;
        let mut loaded = Vec::with_capacity(records.len());
        for record in records {
            match stores.index.get(record.id)? {
                Some(embedding) => loaded.push((record, embedding)),
                None => warn!(id = %record.id, "consistency violation: memory has no vector; skipping"),
            }
        }
        Ok(loaded)
    }

    /// Append a reflection. Reflections are not embedded or indexed.
    pub fn save_reflection(&self, summary: &str, tags: &[String]) -> Result<ReflectionRecord, StoreError> {
        let reflection = self.read()?.log.save_reflection(summary, tags, Utc::now())?;
        info!(id = reflection.id, "reflection saved");
        Ok(reflection)
    }

    /// Reflections, newest first.
    pub fn list_reflections(&self, limit: Option<usize>) -> Result<Vec<ReflectionRecord>, StoreError> {
        self.read()?.log.list_reflections(limit)
    }

    /// Compare the id sets of both sub-stores without changing anything.
    pub fn check_consistency(&self) -> Result<ConsistencyReport, StoreError> {
        self.read()?.consistency()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Stores>, StoreError> {
        self.inner.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Stores>, StoreError> {
        self.inner.write().map_err(poisoned)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
