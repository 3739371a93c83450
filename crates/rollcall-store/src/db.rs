use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("corrupt embedding for {identity}/{pose}: {len} bytes")]
    CorruptEmbedding { identity: String, pose: String, len: usize },
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    department  TEXT NOT NULL DEFAULT '',
    position    TEXT NOT NULL DEFAULT '',
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_identities_active ON identities(is_active);

CREATE TABLE IF NOT EXISTS pose_embeddings (
    identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    pose        TEXT NOT NULL,
    embedding   BLOB NOT NULL,
    quality     REAL NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (identity_id, pose)
);

CREATE TABLE IF NOT EXISTS attendance (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id    TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    day            TEXT NOT NULL,
    first_in       TEXT,
    in_camera_id   TEXT,
    in_confidence  REAL,
    last_out       TEXT,
    out_camera_id  TEXT,
    out_confidence REAL,
    created_at     TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at     TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (identity_id, day)
);
CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance(day);
"#;

/// Handle to the Rollcall database.
///
/// Cheap to clone; all clones share one background connection thread, so
/// every statement is executed in submission order.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio_rusqlite::Connection::open(&path).await?;
        tracing::info!(path = %path.display(), "database opened");
        Self::init(conn).await
    }

    /// In-memory database, used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }
}
