//! Job document persistence.
//!
//! The whole job collection is one document: read once on first access,
//! overwritten wholesale on every mutation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{CronJob, Result};

const STORE_VERSION: u32 = 1;

/// The persisted job collection, in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronStoreFile {
    pub version: u32,
    pub jobs: Vec<CronJob>,
}

impl Default for CronStoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            jobs: Vec::new(),
        }
    }
}

/// Durable storage for the job document.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Read the document; a store that was never written loads as empty.
    async fn load(&self) -> Result<CronStoreFile>;

    /// Replace the stored document.
    async fn save(&self, doc: &CronStoreFile) -> Result<()>;

    /// Human-readable location, for status output.
    fn location(&self) -> String;
}

/// Pick a backend from the file extension.
pub fn open_store(path: &Path) -> Result<Arc<dyn JobStore>> {
    let is_sqlite = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("db" | "sqlite" | "sqlite3")
    );
    if is_sqlite {
        Ok(Arc::new(SqliteStore::open(path)?))
    } else {
        Ok(Arc::new(JsonFileStore::new(path)))
    }
}

fn parse_document(raw: &str) -> Result<CronStoreFile> {
    if raw.trim().is_empty() {
        return Ok(CronStoreFile::default());
    }
    let value: serde_json::Value = serde_json::from_str(raw)?;
    // Bare arrays are accepted for hand-written job files.
    if value.is_array() {
        let jobs: Vec<CronJob> = serde_json::from_value(value)?;
        return Ok(CronStoreFile {
            version: STORE_VERSION,
            jobs,
        });
    }
    Ok(serde_json::from_value(value)?)
}

// ─── JSON file ──────────────────────────────────────────

/// Pretty-printed JSON file, replaced atomically via rename.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "jobs.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl JobStore for JsonFileStore {
    async fn load(&self) -> Result<CronStoreFile> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => parse_document(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CronStoreFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, doc: &CronStoreFile) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.sibling(&format!(".{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        // Best effort; the primary file is already durable.
        if let Err(e) = tokio::fs::copy(&self.path, self.sibling(".bak")).await {
            tracing::debug!("cron: backup copy failed: {e}");
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ─── SQLite ─────────────────────────────────────────────

/// The job document kept as a single SQLite row.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteStore {
    /// Open or create a store database.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn, db_path.display().to_string())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:".into())
    }

    fn init(conn: Connection, location: String) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cron_store (
                 id INTEGER PRIMARY KEY CHECK (id = 1),
                 document TEXT NOT NULL,
                 updated_at INTEGER NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn load(&self) -> Result<CronStoreFile> {
        let conn = self.conn.clone();
        let raw: Option<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row("SELECT document FROM cron_store WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
        })
        .await??;

        match raw {
            Some(raw) => parse_document(&raw),
            None => Ok(CronStoreFile::default()),
        }
    }

    async fn save(&self, doc: &CronStoreFile) -> Result<()> {
        let json = serde_json::to_string(doc)?;
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO cron_store (id, document, updated_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at",
                rusqlite::params![json, chrono::Utc::now().timestamp_millis()],
            )
        })
        .await??;
        Ok(())
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}
