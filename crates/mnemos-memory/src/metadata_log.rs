//! Relational Metadata Log.
//!
//! Append-mostly SQLite table of memory records plus the reflections table.
//! Ids are assigned by SQLite (`AUTOINCREMENT`), so they are strictly
//! increasing, never reused, and insertion order equals id order.
//!
//! # Storage layout
//!
//! | table         | column    | type    | description                              |
//! |---------------|-----------|---------|------------------------------------------|
//! | `memories`    | id        | INTEGER | primary key, autoincrement               |
//! |               | caption   | TEXT    | caption or transcript                    |
//! |               | modality  | TEXT    | `"image"`, `"audio"` or `"text"`         |
//! |               | timestamp | TEXT    | RFC-3339 UTC, microsecond precision      |
//! |               | filepath  | TEXT    | opaque reference to the original content |
//! | `reflections` | id        | INTEGER | primary key, autoincrement               |
//! |               | summary   | TEXT    | generated summary                        |
//! |               | tags      | TEXT    | JSON array of strings                    |
//! |               | timestamp | TEXT    | RFC-3339 UTC, microsecond precision      |
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use mnemos_memory::metadata_log::{MetadataLog, NewMemory};
//! use mnemos_types::Modality;
//!
//! let log = MetadataLog::open_in_memory().unwrap();
//! let record = log
//!     .insert(&NewMemory {
//!         caption: "a red bicycle",
//!         modality: Modality::Image,
//!         timestamp: Utc::now(),
//!         filepath: "data/images/bike.png",
//!     })
//!     .unwrap();
//! assert_eq!(log.get_by_id(record.id).unwrap(), Some(record));
//! ```

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use mnemos_types::{MemoryId, MemoryRecord, Modality, ReflectionRecord};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{StoreError, poisoned};

const MEMORY_COLUMNS: &str = "id, caption, modality, timestamp, filepath";

/// Fields of a record before the log assigns its id.
#[derive(Debug, Clone, Copy)]
pub struct NewMemory<'a> {
    pub caption: &'a str,
    pub modality: Modality,
    pub timestamp: DateTime<Utc>,
    pub filepath: &'a str,
}

/// SQLite-backed log of memory and reflection records.
///
/// The connection sits behind a mutex so the log can be shared between
/// threads; every method takes `&self`.
pub struct MetadataLog {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for MetadataLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataLog").finish_non_exhaustive()
    }
}

impl MetadataLog {
    /// Open (or create) the log at `path`. SQLite waits up to `busy_timeout`
    /// for a competing lock before the call fails with
    /// [`StoreError::StorageTimeout`].
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let log = Self {
            conn: Mutex::new(conn),
        };
        log.ensure_schema()?;
        Ok(log)
    }

    /// Open a temporary in-memory log (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let log = Self {
            conn: Mutex::new(conn),
        };
        log.ensure_schema()?;
        Ok(log)
    }

    /// Create both tables if they do not exist. Safe to call repeatedly.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                caption   TEXT NOT NULL,
                modality  TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                filepath  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS memories_timestamp ON memories (timestamp);
            CREATE TABLE IF NOT EXISTS reflections (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                summary   TEXT NOT NULL,
                tags      TEXT NOT NULL DEFAULT '[]',
                timestamp TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Insert a record and return it with its assigned id.
    pub fn insert(&self, new: &NewMemory<'_>) -> Result<MemoryRecord, StoreError> {
        self.insert_with(new, |_| Ok(()))
    }

    /// Insert a record inside a transaction and run `before_commit` with the
    /// assigned record before committing.
    ///
    /// If `before_commit` fails the transaction is rolled back and its error
    /// returned; the row never becomes visible and its id is not consumed.
    pub fn insert_with<F>(&self, new: &NewMemory<'_>, before_commit: F) -> Result<MemoryRecord, StoreError>
    where
        F: FnOnce(&MemoryRecord) -> Result<(), StoreError>,
    {
        // Stored with microsecond precision; return what a re-read yields.
        let timestamp = new.timestamp.trunc_subsecs(6);
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO memories (caption, modality, timestamp, filepath)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.caption,
                new.modality.as_str(),
                format_timestamp(&timestamp),
                new.filepath,
            ],
        )?;
        let record = MemoryRecord {
            id: MemoryId(tx.last_insert_rowid()),
            caption: new.caption.to_string(),
            modality: new.modality,
            timestamp,
            filepath: new.filepath.to_string(),
        };
        // Dropping `tx` on the error path rolls the insert back.
        before_commit(&record)?;
        tx.commit()?;
        Ok(record)
    }

    /// Look up a record. An unknown id is `Ok(None)`, not an error.
    pub fn get_by_id(&self, id: MemoryId) -> Result<Option<MemoryRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id.get()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Every record, ascending by id.
    pub fn list_all(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {MEMORY_COLUMNS} FROM memories ORDER BY id ASC"))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The `n` most recent records, newest first.
    pub fn list_recent(&self, n: usize) -> Result<Vec<MemoryRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// All record ids, ascending.
    pub fn ids(&self) -> Result<Vec<MemoryId>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM memories ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0).map(MemoryId))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Timestamp of the newest record, if any.
    pub fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn.query_row("SELECT MAX(timestamp) FROM memories", [], |row| row.get(0))?;
        raw.map(|s| parse_timestamp(&s, 3).map_err(StoreError::from)).transpose()
    }

    #[cfg(test)]
    fn remove(&self, id: MemoryId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM memories WHERE id = ?1", params![id.get()])?;
        Ok(n > 0)
    }

    /// Append a reflection.
    pub fn save_reflection(
        &self,
        summary: &str,
        tags: &[String],
        timestamp: DateTime<Utc>,
    ) -> Result<ReflectionRecord, StoreError> {
        let timestamp = timestamp.trunc_subsecs(6);
        let tags_json = serde_json::to_string(tags).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reflections (summary, tags, timestamp) VALUES (?1, ?2, ?3)",
            params![summary, tags_json, format_timestamp(&timestamp)],
        )?;
        Ok(ReflectionRecord {
            id: conn.last_insert_rowid(),
            summary: summary.to_string(),
            tags: tags.to_vec(),
            timestamp,
        })
    }

    /// Reflections, newest first. `None` returns all of them.
    pub fn list_reflections(&self, limit: Option<usize>) -> Result<Vec<ReflectionRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, summary, tags, timestamp FROM reflections
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let rows = stmt.query_map(params![limit], row_to_reflection)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(poisoned)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let id: i64 = row.get(0)?;
    let caption: String = row.get(1)?;
    let modality_str: String = row.get(2)?;
    let ts_str: String = row.get(3)?;
    let filepath: String = row.get(4)?;
    let modality = Modality::parse(&modality_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(2, modality_str, rusqlite::types::Type::Text)
    })?;
    Ok(MemoryRecord {
        id: MemoryId(id),
        caption,
        modality,
        timestamp: parse_timestamp(&ts_str, 3)?,
        filepath,
    })
}

fn row_to_reflection(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReflectionRecord> {
    let id: i64 = row.get(0)?;
    let summary: String = row.get(1)?;
    let tags_json: String = row.get(2)?;
    let ts_str: String = row.get(3)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ReflectionRecord {
        id,
        summary,
        tags,
        timestamp: parse_timestamp(&ts_str, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn new_text<'a>(caption: &'a str, timestamp: DateTime<Utc>) -> NewMemory<'a> {
        NewMemory {
            caption,
            modality: Modality::Text,
            timestamp,
            filepath: "",
        }
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let log = MetadataLog::open_in_memory().unwrap();
        let now = Utc::now();
        let a = log.insert(&new_text("a", now)).unwrap();
        let b = log.insert(&new_text("b", now)).unwrap();
        let c = log.insert(&new_text("c", now)).unwrap();
        assert!(a.id < b.id && b.id < c.id);
    }

    #[test]
    fn get_unknown_id_is_none() {
        let log = MetadataLog::open_in_memory().unwrap();
        assert_eq!(log.get_by_id(MemoryId(99)).unwrap(), None);
    }

    #[test]
    fn record_fields_survive_storage() {
        let log = MetadataLog::open_in_memory().unwrap();
        let inserted = log
            .insert(&NewMemory {
                caption: "voice note about groceries",
                modality: Modality::Audio,
                timestamp: Utc::now(),
                filepath: "data/audio/abc.mp3",
            })
            .unwrap();
        let loaded = log.get_by_id(inserted.id).unwrap().unwrap();
        assert_eq!(loaded.caption, "voice note about groceries");
        assert_eq!(loaded.modality, Modality::Audio);
        assert_eq!(loaded.filepath, "data/audio/abc.mp3");
        assert_eq!(loaded, inserted);
    }

    #[test]
    fn list_all_is_ascending_by_id() {
        let log = MetadataLog::open_in_memory().unwrap();
        let now = Utc::now();
        for caption in ["one", "two", "three"] {
            log.insert(&new_text(caption, now)).unwrap();
        }
        let all = log.list_all().unwrap();
        let captions: Vec<_> = all.iter().map(|r| r.caption.as_str()).collect();
        assert_eq!(captions, ["one", "two", "three"]);
    }

    #[test]
    fn list_recent_is_newest_first_and_bounded() {
        let log = MetadataLog::open_in_memory().unwrap();
        let base = Utc::now();
        for i in 0..5 {
            log.insert(&new_text(&format!("m{i}"), base + TimeDelta::seconds(i)))
                .unwrap();
        }
        let recent = log.list_recent(3).unwrap();
        let captions: Vec<_> = recent.iter().map(|r| r.caption.as_str()).collect();
        assert_eq!(captions, ["m4", "m3", "m2"]);
        assert_eq!(log.list_recent(100).unwrap().len(), 5);
    }

    #[test]
    fn equal_timestamps_fall_back_to_id_order() {
        let log = MetadataLog::open_in_memory().unwrap();
        let now = Utc::now();
        log.insert(&new_text("first", now)).unwrap();
        log.insert(&new_text("second", now)).unwrap();
        let recent = log.list_recent(1).unwrap();
        assert_eq!(recent[0].caption, "second");
    }

    #[test]
    fn insert_with_failure_rolls_back() {
        let log = MetadataLog::open_in_memory().unwrap();
        let err = log
            .insert_with(&new_text("doomed", Utc::now()), |_| {
                Err(StoreError::StorageUnavailable("index offline".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
        assert_eq!(log.count().unwrap(), 0);

        // The rolled-back id is not burned: autoincrement state rolled back too.
        let next = log.insert(&new_text("kept", Utc::now())).unwrap();
        assert_eq!(next.id, MemoryId(1));
    }

    #[test]
    fn removed_ids_are_never_reused() {
        let log = MetadataLog::open_in_memory().unwrap();
        let a = log.insert(&new_text("a", Utc::now())).unwrap();
        assert!(log.remove(a.id).unwrap());
        let b = log.insert(&new_text("b", Utc::now())).unwrap();
        assert!(b.id > a.id);
        assert!(!log.remove(a.id).unwrap());
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let log = MetadataLog::open_in_memory().unwrap();
        log.insert(&new_text("kept", Utc::now())).unwrap();
        log.ensure_schema().unwrap();
        log.ensure_schema().unwrap();
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn latest_timestamp_tracks_newest_row() {
        let log = MetadataLog::open_in_memory().unwrap();
        assert_eq!(log.latest_timestamp().unwrap(), None);
        let base = Utc::now();
        log.insert(&new_text("old", base)).unwrap();
        log.insert(&new_text("new", base + TimeDelta::seconds(5))).unwrap();
        let latest = log.latest_timestamp().unwrap().unwrap();
        assert!(latest >= base + TimeDelta::seconds(4));
    }

    #[test]
    fn reflections_are_listed_newest_first_with_tags() {
        let log = MetadataLog::open_in_memory().unwrap();
        let base = Utc::now();
        log.save_reflection("older", &[], base).unwrap();
        log.save_reflection("newer", &["travel".to_string()], base + TimeDelta::seconds(1))
            .unwrap();
        let all = log.list_reflections(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].summary, "newer");
        assert_eq!(all[0].tags, vec!["travel".to_string()]);
        assert!(all[1].tags.is_empty());
        assert_eq!(log.list_reflections(Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn unknown_modality_is_reported_as_corrupt() {
        let log = MetadataLog::open_in_memory().unwrap();
        log.lock()
            .unwrap()
            .execute(
                "INSERT INTO memories (caption, modality, timestamp, filepath)
                 VALUES ('x', 'video', '2024-01-01T00:00:00.000000Z', '')",
                [],
            )
            .unwrap();
        let err = log.get_by_id(MemoryId(1)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
