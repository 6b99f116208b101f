//! SQLite storage layer backing one logical queue file.
//!
//! Each store holds a single table of `(sequence_id, unique_id, payload)`
//! rows. `sequence_id` exists only to recover physical ordering after a
//! restart: blocks flushed from the front page descend below the current
//! minimum, blocks flushed from the back page ascend above the current
//! maximum. No caller may rely on the numeric values.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;

/// Persistent tier of a paginated queue. Payloads travel as JSON text; the
/// queue layer owns (de)serialization.
pub struct QueueStore {
    conn: Option<Connection>,
    path: PathBuf,
}

impl QueueStore {
    /// Open (or create) the queue file and its table.
    pub fn open(path: &Path, config: &QueueConfig) -> Result<Self, QueueError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = {};
             PRAGMA cache_size = {};
             PRAGMA temp_store = MEMORY;",
            config.synchronous, config.cache_size,
        ))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue (
                 sequence_id INTEGER PRIMARY KEY,
                 unique_id   BLOB NOT NULL UNIQUE,
                 payload     TEXT NOT NULL
             )",
            [],
        )?;

        debug!(path = %path.display(), "queue store opened");

        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
        })
    }

    fn conn(&self) -> Result<&Connection, QueueError> {
        self.conn.as_ref().ok_or(QueueError::Closed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> Result<usize, QueueError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM queue", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.count()? == 0)
    }

    fn min_sequence(&self) -> Result<Option<i64>, QueueError> {
        Ok(self
            .conn()?
            .query_row("SELECT MIN(sequence_id) FROM queue", [], |r| r.get(0))?)
    }

    fn max_sequence(&self) -> Result<Option<i64>, QueueError> {
        Ok(self
            .conn()?
            .query_row("SELECT MAX(sequence_id) FROM queue", [], |r| r.get(0))?)
    }

    /// Store a block after everything already persisted, preserving the
    /// block's order. Used when the back page spills.
    pub fn append(&self, entries: &[(Uuid, String)]) -> Result<(), QueueError> {
        if entries.is_empty() {
            return Ok(());
        }
        let start = self.max_sequence()?.map_or(0, |m| m + 1);
        self.insert_block(start, entries)
    }

    /// Store a block before everything already persisted, preserving the
    /// block's order. Used when the front page is flushed at shutdown.
    pub fn prepend(&self, entries: &[(Uuid, String)]) -> Result<(), QueueError> {
        if entries.is_empty() {
            return Ok(());
        }
        let start = self.min_sequence()?.unwrap_or(0) - entries.len() as i64;
        self.insert_block(start, entries)
    }

    fn insert_block(&self, start: i64, entries: &[(Uuid, String)]) -> Result<(), QueueError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO queue (sequence_id, unique_id, payload) VALUES (?1, ?2, ?3)",
            )?;
            for (i, (id, payload)) in entries.iter().enumerate() {
                stmt.execute(params![start + i as i64, id, payload])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove and return up to `n` of the oldest rows, oldest first.
    pub fn load_oldest(&self, n: usize) -> Result<Vec<(Uuid, String)>, QueueError> {
        self.load_page(n, "ASC")
    }

    /// Remove and return up to `n` of the newest rows, still oldest first
    /// within the returned page.
    pub fn load_newest(&self, n: usize) -> Result<Vec<(Uuid, String)>, QueueError> {
        let mut page = self.load_page(n, "DESC")?;
        page.reverse();
        Ok(page)
    }

    fn load_page(&self, n: usize, order: &str) -> Result<Vec<(Uuid, String)>, QueueError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let rows = {
            let mut stmt = tx.prepare(&format!(
                "SELECT sequence_id, unique_id, payload FROM queue
                 ORDER BY sequence_id {} LIMIT ?1",
                order
            ))?;
            let mapped = stmt.query_map(params![n as i64], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, Uuid>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };
        {
            let mut stmt = tx.prepare("DELETE FROM queue WHERE sequence_id = ?1")?;
            for (seq, _, _) in &rows {
                stmt.execute(params![seq])?;
            }
        }
        tx.commit()?;
        Ok(rows.into_iter().map(|(_, id, payload)| (id, payload)).collect())
    }

    pub fn contains(&self, id: &Uuid) -> Result<bool, QueueError> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM queue WHERE unique_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Indexed point lookup; never mutates.
    pub fn get(&self, id: &Uuid) -> Result<Option<String>, QueueError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT payload FROM queue WHERE unique_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// Remove the row with the given id, returning its payload.
    pub fn delete(&self, id: &Uuid) -> Result<Option<String>, QueueError> {
        let conn = self.conn()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM queue WHERE unique_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        if payload.is_some() {
            conn.execute("DELETE FROM queue WHERE unique_id = ?1", params![id])?;
        }
        Ok(payload)
    }

    /// Delete every row, whatever the sign of its sequence id.
    pub fn clear(&self) -> Result<(), QueueError> {
        self.conn()?.execute("DELETE FROM queue", [])?;
        Ok(())
    }

    /// Close the underlying connection. Further calls return `Closed`.
    pub fn close(&mut self) -> Result<(), QueueError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| QueueError::Storage(e))?;
            debug!(path = %self.path.display(), "queue store closed");
        }
        Ok(())
    }
}
