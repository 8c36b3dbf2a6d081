//! Embedding storage using SQLite.
//!
//! Provides a persistent keyword -> vector table. Vectors are stored as BLOBs
//! produced by [`crate::codec`], so every read returns exactly the bits that
//! were written.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use serde::Serialize;

use crate::codec::{self, CodecError};

/// Maximum number of keywords bound into a single lookup statement.
const LOOKUP_BATCH: usize = 500;

/// Error type for embedding store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt record for '{keyword}': {source}")]
    CorruptRecord {
        keyword: String,
        #[source]
        source: CodecError,
    },
    #[error("Cannot encode embedding for '{keyword}': {reason}")]
    Encoding { keyword: String, reason: String },
    #[error("Embedding store used after close")]
    UseAfterClose,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Options applied when opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Required vector dimension. `None` accepts any non-empty vector.
    pub dimension: Option<usize>,
    /// How long a writer waits on another process holding the write lock.
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimension: None,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Require every inserted vector to have the given dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of stored keywords.
    pub record_count: usize,
    /// Distinct vector dimensions present, ascending.
    pub dimensions: Vec<usize>,
}

/// Persistent keyword -> embedding table.
///
/// Batch inserts run inside a single transaction, so a crash leaves either
/// all or none of a batch on disk. The connection is released by [`close`]
/// or when the store is dropped.
///
/// [`close`]: EmbeddingStore::close
pub struct EmbeddingStore {
    conn: Option<Connection>,
    config: StoreConfig,
    path: Option<PathBuf>,
    read_only: bool,
}

impl EmbeddingStore {
    /// Open or create an embedding store at the specified path.
    ///
    /// Parent directories and the database file are created if missing.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(config.busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "Opened embedding store");

        let store = Self {
            conn: Some(conn),
            config,
            path: Some(path.to_path_buf()),
            read_only: false,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open an existing store for reading only.
    ///
    /// Nothing is created: a missing file is an error, and writes through
    /// the returned store fail with [`StoreError::Database`].
    pub fn open_read_only<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(config.busy_timeout)?;
        tracing::debug!(path = %path.display(), "Opened embedding store read-only");

        Ok(Self {
            conn: Some(conn),
            config,
            path: Some(path.to_path_buf()),
            read_only: true,
        })
    }

    /// Create an in-memory store.
    pub fn open_in_memory(config: StoreConfig) -> Result<Self> {
        let store = Self {
            conn: Some(Connection::open_in_memory()?),
            config,
            path: None,
            read_only: false,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.connection()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS keyword_embeddings (
                keyword TEXT PRIMARY KEY,
                embedding BLOB NOT NULL
            )",
        )?;
        Ok(())
    }

    /// Look up stored vectors for the given keywords.
    ///
    /// Keywords without a stored vector are omitted. Duplicate keywords in
    /// the input produce a single entry.
    pub fn get_embeddings<S: AsRef<str>>(
        &self,
        keywords: &[S],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let conn = self.connection()?;
        if keywords.is_empty() {
            return Ok(HashMap::new());
        }

        let mut seen = HashSet::new();
        let unique: Vec<&str> = keywords
            .iter()
            .map(|k| k.as_ref())
            .filter(|k| seen.insert(*k))
            .collect();

        let mut found = HashMap::with_capacity(unique.len());
        for batch in unique.chunks(LOOKUP_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(",");
            let sql = format!(
                "SELECT keyword, embedding FROM keyword_embeddings WHERE keyword IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(batch.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            for row in rows {
                let (keyword, blob) = row?;
                let vector = self.decode_record(&keyword, &blob)?;
                found.insert(keyword, vector);
            }
        }

        tracing::trace!(
            requested = unique.len(),
            found = found.len(),
            "Looked up embeddings"
        );
        Ok(found)
    }

    /// Insert or replace embeddings in a single transaction.
    ///
    /// Every pair is validated before anything is written; one invalid pair
    /// rejects the whole batch. When a keyword occurs more than once, the
    /// last occurrence wins.
    pub fn add_embeddings<S: AsRef<str>>(&mut self, pairs: &[(S, Vec<f32>)]) -> Result<()> {
        if self.conn.is_none() {
            return Err(StoreError::UseAfterClose);
        }
        if pairs.is_empty() {
            return Ok(());
        }

        let encoded = pairs
            .iter()
            .map(|(keyword, vector)| {
                let keyword = keyword.as_ref();
                self.validate(keyword, vector)?;
                Ok((keyword, codec::encode(vector)))
            })
            .collect::<Result<Vec<_>>>()?;

        let conn = self.conn.as_mut().ok_or(StoreError::UseAfterClose)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO keyword_embeddings (keyword, embedding) VALUES (?1, ?2)
                 ON CONFLICT(keyword) DO UPDATE SET embedding = excluded.embedding",
            )?;
            for (keyword, bytes) in &encoded {
                stmt.execute(params![keyword, bytes])?;
            }
        }
        tx.commit()?;

        tracing::debug!(count = encoded.len(), "Stored embeddings");
        Ok(())
    }

    /// Check whether a keyword has a stored vector.
    pub fn contains(&self, keyword: &str) -> Result<bool> {
        let found = self
            .connection()?
            .query_row(
                "SELECT 1 FROM keyword_embeddings WHERE keyword = ?1",
                params![keyword],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of stored keywords.
    pub fn len(&self) -> Result<usize> {
        let count: i64 =
            self.connection()?
                .query_row("SELECT COUNT(*) FROM keyword_embeddings", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    /// Whether the store holds no keywords.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT length(embedding), COUNT(*) FROM keyword_embeddings
             GROUP BY length(embedding) ORDER BY length(embedding)",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

        let mut stats = StoreStats::default();
        for row in rows {
            let (byte_len, count) = row?;
            stats.record_count += count as usize;
            stats.dimensions.push(byte_len as usize / codec::ELEMENT_WIDTH);
        }
        Ok(stats)
    }

    /// Read every stored record, ordered by keyword.
    pub fn all_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT keyword, embedding FROM keyword_embeddings ORDER BY keyword")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (keyword, blob) = row?;
            let vector = self.decode_record(&keyword, &blob)?;
            records.push((keyword, vector));
        }
        Ok(records)
    }

    /// Flush pending writes and release the database handle.
    ///
    /// Closing twice is a no-op. Every other operation fails with
    /// [`StoreError::UseAfterClose`] afterwards.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        if self.path.is_some() && !self.read_only {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        }
        conn.close().map_err(|(_, e)| StoreError::Database(e))?;
        tracing::debug!("Closed embedding store");
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Path of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get the underlying SQLite connection for advanced operations.
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(StoreError::UseAfterClose)
    }

    fn validate(&self, keyword: &str, vector: &[f32]) -> Result<()> {
        let reason = if keyword.trim().is_empty() {
            Some("keyword is empty".to_string())
        } else if vector.is_empty() {
            Some("vector is empty".to_string())
        } else {
            match self.config.dimension {
                Some(expected) if expected != vector.len() => Some(format!(
                    "expected dimension {}, got {}",
                    expected,
                    vector.len()
                )),
                _ => None,
            }
        };

        match reason {
            Some(reason) => Err(StoreError::Encoding {
                keyword: keyword.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn decode_record(&self, keyword: &str, blob: &[u8]) -> Result<Vec<f32>> {
        codec::decode(blob, self.config.dimension).map_err(|source| StoreError::CorruptRecord {
            keyword: keyword.to_string(),
            source,
        })
    }
}

impl Drop for EmbeddingStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close embedding store: {}", e);
        }
    }
}
