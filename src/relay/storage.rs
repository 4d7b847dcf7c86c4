// Persistent message store using SQLite

use crate::relay::message::StoredMessage;
use crate::relay::query::Predicate;
use rusqlite::{params, Connection};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Storage failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored message {seq} is corrupt: {source}")]
    Corrupt {
        seq: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored message with its arrival sequence number
#[derive(Debug, Clone)]
struct Entry {
    seq: i64,
    message: StoredMessage,
}

/// Ordered, persisted collection of messages
///
/// The in-memory queue mirrors the `messages` table in `seq` order. Every
/// mutation hits the database first and only touches memory once the
/// statement has committed, so a failed write leaves both sides as they
/// were. Callers need `&mut self` for every operation, which is the
/// store's single critical section.
pub struct MessageStore {
    conn: Connection,
    entries: VecDeque<Entry>,
}

impl MessageStore {
    /// Open (or create) the store at `db_path` and load its messages
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;

        let mut store = Self {
            conn,
            entries: VecDeque::new(),
        };

        store.initialize_db()?;
        store.load()?;

        tracing::debug!(
            "Opened message store {:?} with {} messages",
            db_path,
            store.entries.len()
        );

        Ok(store)
    }

    /// Initialize database schema
    fn initialize_db(&self) -> StoreResult<()> {
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                fields TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Read every stored message in arrival order
    fn load(&mut self) -> StoreResult<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, fields FROM messages ORDER BY seq ASC")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = VecDeque::with_capacity(rows.len());
        for (seq, fields) in rows {
            let message = StoredMessage::from_json(&fields)
                .map_err(|source| StoreError::Corrupt { seq, source })?;
            entries.push_back(Entry { seq, message });
        }

        drop(stmt);
        self.entries = entries;

        Ok(())
    }

    /// Append a message at the end of the queue
    pub fn push(&mut self, message: StoredMessage) -> StoreResult<()> {
        let fields = message.to_json().map_err(StoreError::Encode)?;

        self.conn.execute(
            "INSERT INTO messages (fields) VALUES (?1)",
            params![fields],
        )?;
        let seq = self.conn.last_insert_rowid();

        self.entries.push_back(Entry { seq, message });

        Ok(())
    }

    /// Remove and return the earliest message accepted by `predicate`
    pub fn pull_first_matching(&mut self, predicate: &Predicate) -> StoreResult<Option<StoredMessage>> {
        let Some(index) = self.position(predicate) else {
            return Ok(None);
        };

        let seq = self.entries[index].seq;
        self.conn
            .execute("DELETE FROM messages WHERE seq = ?1", params![seq])?;

        Ok(self.entries.remove(index).map(|entry| entry.message))
    }

    /// Return a copy of the earliest message accepted by `predicate`
    pub fn peek_first_matching(&self, predicate: &Predicate) -> Option<StoredMessage> {
        self.position(predicate)
            .map(|index| self.entries[index].message.clone())
    }

    fn position(&self, predicate: &Predicate) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| predicate.matches(&entry.message))
    }

    /// Number of stored messages
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all messages in arrival order
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.entries.iter().map(|entry| entry.message.clone()).collect()
    }

    /// Move the write-ahead log into the main database file
    pub fn flush(&self) -> StoreResult<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Flush and close the database
    pub fn close(self) -> StoreResult<()> {
        self.flush()?;
        self.conn.close().map_err(|(_, e)| StoreError::Database(e))?;
        Ok(())
    }
}
