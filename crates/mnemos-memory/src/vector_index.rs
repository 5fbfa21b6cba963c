//! Vector Index.
//!
//! Exact (flat) nearest-neighbour index over embeddings, keyed by the
//! caller-supplied [`MemoryId`]. Searches return ids, never array positions,
//! so results stay correct whatever order rows were inserted or removed in.
//!
//! Vectors are held in memory for search and written through to a SQLite
//! file before [`VectorIndex::add`] returns.
//!
//! # Storage layout
//!
//! | table        | column    | type    | description                          |
//! |--------------|-----------|---------|--------------------------------------|
//! | `index_meta` | key       | TEXT    | `"dimension"`                        |
//! |              | value     | TEXT    | decimal value                        |
//! | `vectors`    | id        | INTEGER | memory id (same id space as the log) |
//! |              | embedding | BLOB    | little-endian f32 vector (4 × D)     |

use mnemos_types::{Embedding, MemoryId, squared_l2};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::error::{StoreError, poisoned};

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// VectorIndex
// ─────────────────────────────────────────────────────────────────────────────

/// Id-aware flat L2 index with SQLite persistence.
pub struct VectorIndex {
    dimension: usize,
    conn: Mutex<Connection>,
    entries: RwLock<BTreeMap<MemoryId, Embedding>>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Open (or create) the index file at `path` for vectors of `dimension`.
    ///
    /// A file created with a different dimension is rejected with
    /// [`StoreError::DimensionMismatch`]: the dimension is fixed at first
    /// initialisation.
    pub fn open(path: &Path, dimension: usize, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::from_connection(conn, dimension)
    }

    /// Open a temporary in-memory index (useful for testing).
    pub fn open_in_memory(dimension: usize) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, dimension)
    }

    fn from_connection(conn: Connection, dimension: usize) -> Result<Self, StoreError> {
        if dimension == 0 {
            return Err(StoreError::InvalidConfig("embedding dimension must be positive".into()));
        }
        let index = Self {
            dimension,
            conn: Mutex::new(conn),
            entries: RwLock::new(BTreeMap::new()),
        };
        index.ensure_schema()?;
        index.reload()?;
        Ok(index)
    }

    /// Create the tables if absent and record the dimension on first use.
    /// Safe to call repeatedly.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key   TEXT NOT NULL PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS vectors (
                id        INTEGER NOT NULL PRIMARY KEY,
                embedding BLOB NOT NULL
            );",
        )?;
        let stored: Option<String> = conn
            .query_row("SELECT value FROM index_meta WHERE key = 'dimension'", [], |row| row.get(0))
            .optional()?;
        match stored {
            None => {
                conn.execute(
                    "INSERT INTO index_meta (key, value) VALUES ('dimension', ?1)",
                    params![self.dimension.to_string()],
                )?;
            }
            Some(raw) => {
                let persisted: usize = raw
                    .parse()
                    .map_err(|_| StoreError::Corrupt(format!("index dimension {raw:?} is not a number")))?;
                if persisted != self.dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: persisted,
                        actual: self.dimension,
                    });
                }
            }
        }
        Ok(())
    }

    /// Replace the in-memory view with what is on disk.
    fn reload(&self) -> Result<(), StoreError> {
        let loaded = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare("SELECT id, embedding FROM vectors ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?;
            let mut loaded = BTreeMap::new();
            for row in rows {
                let (id, blob) = row?;
                let embedding = Embedding::new(bytes_to_embedding(&blob));
                if embedding.len() != self.dimension || blob.len() % 4 != 0 {
                    return Err(StoreError::Corrupt(format!(
                        "vector {id} has {} bytes, expected {}",
                        blob.len(),
                        self.dimension * 4
                    )));
                }
                loaded.insert(MemoryId(id), embedding);
            }
            loaded
        };
        debug!(vectors = loaded.len(), dimension = self.dimension, "vector index loaded");
        *self.entries.write().map_err(poisoned)? = loaded;
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Store `embedding` under `id`. Durable before returning.
    ///
    /// Rejects a wrong-length vector and an id that is already indexed.
    pub fn add(&self, id: MemoryId, embedding: Embedding) -> Result<(), StoreError> {
        embedding.check_dimension(self.dimension)?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries.contains_key(&id) {
            return Err(StoreError::ConsistencyViolation(format!("id {id} is already indexed")));
        }
        self.lock()?.execute(
            "INSERT INTO vectors (id, embedding) VALUES (?1, ?2)",
            params![id.get(), embedding_to_bytes(embedding.as_slice())],
        )?;
        entries.insert(id, embedding);
        Ok(())
    }

    /// Store `embedding` under `id`, overwriting whatever was there.
    /// Returns the replaced vector. Durable before returning.
    pub fn upsert(&self, id: MemoryId, embedding: Embedding) -> Result<Option<Embedding>, StoreError> {
        embedding.check_dimension(self.dimension)?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        self.lock()?.execute(
            "INSERT OR REPLACE INTO vectors (id, embedding) VALUES (?1, ?2)",
            params![id.get(), embedding_to_bytes(embedding.as_slice())],
        )?;
        Ok(entries.insert(id, embedding))
    }

    /// The `k` nearest ids to `query`, ascending by squared L2 distance
    /// (ties broken by id). Returns at most `k` results.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<(MemoryId, f32)>, StoreError> {
        query.check_dimension(self.dimension)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().map_err(poisoned)?;
        let mut scored: Vec<(MemoryId, f32)> = entries
            .iter()
            .map(|(id, e)| (*id, squared_l2(e.as_slice(), query.as_slice())))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn get(&self, id: MemoryId) -> Result<Option<Embedding>, StoreError> {
        Ok(self.entries.read().map_err(poisoned)?.get(&id).cloned())
    }

    /// Drop the vector stored under `id`. Used to undo uncommitted inserts and
    /// to discard orphans; returns whether a vector was removed.
    pub fn remove(&self, id: MemoryId) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        self.lock()?
            .execute("DELETE FROM vectors WHERE id = ?1", params![id.get()])?;
        Ok(entries.remove(&id).is_some())
    }

    /// All indexed ids, ascending.
    pub fn ids(&self) -> Result<Vec<MemoryId>, StoreError> {
        Ok(self.entries.read().map_err(poisoned)?.keys().copied().collect())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(poisoned)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
