pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use models::{AttachmentRow, UserRow};
pub use queries::ComplaintFilter;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests and throwaway instances.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

/// A compound index an ordered query depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub collection: &'static str,
    pub fields: &'static [&'static str],
}

/// Ordered complaint-chat queries: `chats` filtered by complaint, ordered by time.
pub const CHAT_INDEX: IndexSpec = IndexSpec {
    collection: "chats",
    fields: &["complaintId", "timestamp"],
};

/// Ordered room queries: `chatMessages` filtered by room, ordered by time.
pub const ROOM_MESSAGE_INDEX: IndexSpec = IndexSpec {
    collection: "chatMessages",
    fields: &["roomId", "timestamp"],
};

pub const REQUIRED_INDEXES: [IndexSpec; 2] = [CHAT_INDEX, ROOM_MESSAGE_INDEX];

/// An ordered query ran before its compound index was ready.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("The query requires an index on {collection} ({})", .fields.join(", "))]
pub struct MissingIndex {
    pub collection: String,
    pub fields: Vec<String>,
}

impl MissingIndex {
    pub fn from_spec(spec: IndexSpec) -> Self {
        Self {
            collection: spec.collection.to_string(),
            fields: spec.fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Link an operator follows to provision the index.
    pub fn console_link(&self, console_url: &str) -> String {
        format!(
            "{}/indexes/create?collection={}&fields={}",
            console_url.trim_end_matches('/'),
            self.collection,
            self.fields.join(",")
        )
    }

    /// Error text carrying the console link, as returned to clients.
    pub fn remediation(&self, console_url: &str) -> String {
        format!(
            "The query requires an index. You can create it here: {}",
            self.console_link(console_url)
        )
    }
}

/// Timestamps are stored as RFC 3339 UTC with millisecond precision so that
/// text ordering matches time ordering.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time at storage precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
