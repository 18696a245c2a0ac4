//! SQLite-backed context storage
//!
//! Holds the unabridged history: every update inserts its appended messages
//! inside one transaction, and reads select the most recent window by
//! insertion order.
//!
//! ## Concurrency Model
//!
//! A single connection behind a mutex, used from `spawn_blocking` tasks. The
//! lock is held only for the duration of one statement batch; different keys
//! interleave freely. Other processes sharing the database file are
//! serialized by SQLite's own locking (`busy_timeout`).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Type, ValueRef};
use rusqlite::{Connection, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{ContextError, Result};
use crate::message::{Message, Role};
use crate::project::{AiName, ContextKey, ProjectKey};

use super::run_blocking;
use super::traits::{AiSummary, BackendKind, ContextStore, ContextUpdate};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_key TEXT NOT NULL,
        ai_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(project_key, ai_name)
    );

    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);
    CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at);
";

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn timestamp_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Translate a SQLite failure into the context error taxonomy.
fn translate(location: &str, err: rusqlite::Error) -> ContextError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
            ContextError::corrupt(location, err)
        },
        other => ContextError::storage(location, other),
    }
}

/// SQLite implementation of ContextStore
#[derive(Clone)]
pub struct SqliteContextStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteContextStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let db_path = path.clone();
        let conn = run_blocking("open database", move || {
            if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .map_err(|e| ContextError::storage("create database dir", e))?;
            }
            let conn = Connection::open(&db_path)
                .map_err(|e| ContextError::storage("open database", e))?;
            Self::init(&conn).map_err(|e| ContextError::storage("apply schema", e))?;
            Ok(conn)
        })
        .await?;

        info!("Opened SQLite context store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| ContextError::storage("open database", e))?;
        Self::init(&conn).map_err(|e| ContextError::storage("apply schema", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)
    }

    /// Database file, or `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn run<F, R>(&self, location: String, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        run_blocking("sqlite", move || {
            let mut conn = conn.lock();
            f(&mut conn).map_err(|e| translate(&location, e))
        })
        .await
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn read(&self, key: &ContextKey, window: usize) -> Result<Vec<Message>> {
        let project = key.project.to_string();
        let ai = key.ai.to_string();
        let limit = i64::try_from(window).unwrap_or(i64::MAX);

        let mut messages = self
            .run(format!("read {key}"), move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT m.role, m.content, m.timestamp
                     FROM messages m
                     JOIN sessions s ON s.id = m.session_id
                     WHERE s.project_key = ?1 AND s.ai_name = ?2
                     ORDER BY m.id DESC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![project, ai, limit], |row| {
                    Ok(Message {
                        role: row.get(0)?,
                        content: row.get(1)?,
                        timestamp: timestamp_column(row, 2)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        messages.reverse();
        debug!("Read {} messages for {}", messages.len(), key);
        Ok(messages)
    }

    async fn write(&self, key: &ContextKey, update: &ContextUpdate) -> Result<()> {
        let project = key.project.to_string();
        let ai = key.ai.to_string();
        let appended = update.appended.clone();
        let count = appended.len();

        self.run(format!("write {key}"), move |conn| {
            let now = timestamp_text(&Utc::now());
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO sessions (project_key, ai_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(project_key, ai_name) DO UPDATE SET updated_at = excluded.updated_at",
                params![project, ai, now],
            )?;
            let session_id: i64 = tx.query_row(
                "SELECT id FROM sessions WHERE project_key = ?1 AND ai_name = ?2",
                params![project, ai],
                |row| row.get(0),
            )?;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT INTO messages (session_id, role, content, timestamp)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for message in &appended {
                    insert.execute(params![
                        session_id,
                        message.role.as_str(),
                        message.content,
                        timestamp_text(&message.timestamp)
                    ])?;
                }
            }
            tx.commit()
        })
        .await?;

        debug!("Inserted {} messages for {}", count, key);
        Ok(())
    }

    async fn delete(&self, key: &ContextKey) -> Result<bool> {
        let project = key.project.to_string();
        let ai = key.ai.to_string();
        let removed = self
            .run(format!("delete {key}"), move |conn| {
                conn.execute(
                    "DELETE FROM sessions WHERE project_key = ?1 AND ai_name = ?2",
                    params![project, ai],
                )
            })
            .await?;
        Ok(removed > 0)
    }

    async fn quarantine(&self, key: &ContextKey) -> Result<()> {
        let project = key.project.to_string();
        let ai = key.ai.to_string();
        let suffix = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let moved = self
            .run(format!("quarantine {key}"), move |conn| {
                conn.execute(
                    "UPDATE sessions SET ai_name = ai_name || '.corrupt-' || ?3
                     WHERE project_key = ?1 AND ai_name = ?2",
                    params![project, ai, suffix],
                )
            })
            .await?;
        if moved > 0 {
            warn!("Renamed corrupt session for {} out of the way", key);
        }
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectKey>> {
        let keys = self
            .run("list projects".to_string(), |conn| {
                let mut stmt = conn
                    .prepare_cached("SELECT DISTINCT project_key FROM sessions ORDER BY project_key")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(keys.iter().filter_map(|k| ProjectKey::parse(k)).collect())
    }

    async fn list_ais(&self, project: &ProjectKey) -> Result<Vec<AiName>> {
        let project = project.to_string();
        let names = self
            .run(format!("list ais {project}"), move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT ai_name FROM sessions WHERE project_key = ?1 ORDER BY ai_name",
                )?;
                let rows = stmt.query_map(params![project], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(names
            .iter()
            .filter_map(|name| AiName::parse(name).ok().filter(|ai| ai.as_str() == name))
            .collect())
    }

    async fn summarize(&self, project: &ProjectKey) -> Result<Vec<AiSummary>> {
        let project = project.to_string();
        let rows = self
            .run(format!("summarize {project}"), move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT s.ai_name, COUNT(m.id), s.updated_at
                     FROM sessions s
                     LEFT JOIN messages m ON m.session_id = s.id
                     WHERE s.project_key = ?1
                     GROUP BY s.id
                     ORDER BY s.updated_at DESC, s.ai_name",
                )?;
                let rows = stmt.query_map(params![project], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        timestamp_column(row, 2)?,
                    ))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(name, count, updated_at)| {
                let ai = AiName::parse(&name).ok().filter(|ai| ai.as_str() == name)?;
                Some(AiSummary {
                    ai,
                    message_count: usize::try_from(count).unwrap_or(0),
                    updated_at,
                })
            })
            .collect())
    }

    async fn stale_keys(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextKey>> {
        let cutoff = timestamp_text(&cutoff);
        let rows = self
            .run("list stale".to_string(), move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT project_key, ai_name FROM sessions
                     WHERE updated_at < ?1
                     ORDER BY project_key, ai_name",
                )?;
                let rows = stmt.query_map(params![cutoff], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        // Quarantined sessions age out through their renamed key only.
        Ok(rows
            .iter()
            .filter_map(|(project, ai)| {
                let project = ProjectKey::parse(project)?;
                let ai = AiName::parse(ai).ok().filter(|name| name.as_str() == ai)?;
                Some(ContextKey::new(project, ai))
            })
            .collect())
    }

    async fn delete_if_stale(&self, key: &ContextKey, cutoff: DateTime<Utc>) -> Result<bool> {
        let project = key.project.to_string();
        let ai = key.ai.to_string();
        let cutoff = timestamp_text(&cutoff);
        let removed = self
            .run(format!("purge {key}"), move |conn| {
                conn.execute(
                    "DELETE FROM sessions
                     WHERE project_key = ?1 AND ai_name = ?2 AND updated_at < ?3",
                    params![project, ai, cutoff],
                )
            })
            .await?;
        if removed > 0 {
            info!("Purged stale context session for {}", key);
        }
        Ok(removed > 0)
    }

    async fn health(&self) -> Result<()> {
        self.run("health".to_string(), |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str, ai: &str) -> ContextKey {
        ContextKey::new(
            ProjectKey::from_path(path).unwrap(),
            AiName::parse(ai).unwrap(),
        )
    }

    fn append(messages: Vec<Message>) -> ContextUpdate {
        ContextUpdate {
            appended: messages,
            retained: Vec::new(),
        }
    }

    fn message_rows(store: &SqliteContextStore) -> i64 {
        store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_session_reads_empty() {
        let store = SqliteContextStore::in_memory().unwrap();
        assert!(store.read(&key("/p/a", "gemini"), 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_unabridged_and_window_is_recent() {
        let store = SqliteContextStore::in_memory().unwrap();
        let key = key("/p/a", "gemini");
        for i in 1..=25 {
            store
                .write(&key, &append(vec![Message::user(i.to_string())]))
                .await
                .unwrap();
        }

        assert_eq!(message_rows(&store), 25);
        let window = store.read(&key, 20).await.unwrap();
        assert_eq!(window.len(), 20);
        assert_eq!(window.first().unwrap().content, "6");
        assert_eq!(window.last().unwrap().content, "25");
    }

    #[tokio::test]
    async fn test_timestamps_and_roles_survive() {
        let store = SqliteContextStore::in_memory().unwrap();
        let key = key("/p/a", "openai");
        let sent = vec![Message::system("rules"), Message::assistant("ok")];
        store.write(&key, &append(sent.clone())).await.unwrap();

        let read = store.read(&key, 10).await.unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].role, Role::System);
        assert_eq!(read[1].role, Role::Assistant);
        assert_eq!(
            timestamp_text(&read[1].timestamp),
            timestamp_text(&sent[1].timestamp)
        );
    }

    #[tokio::test]
    async fn test_delete_cascades_to_messages() {
        let store = SqliteContextStore::in_memory().unwrap();
        let key = key("/p/a", "grok");
        store
            .write(&key, &append(vec![Message::user("a"), Message::assistant("b")]))
            .await
            .unwrap();

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        assert_eq!(message_rows(&store), 0);
    }

    #[tokio::test]
    async fn test_corrupt_row_and_quarantine() {
        let store = SqliteContextStore::in_memory().unwrap();
        let key = key("/p/a", "deepseek");
        store
            .write(&key, &append(vec![Message::user("a")]))
            .await
            .unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE messages SET role = 'robot'", [])
            .unwrap();

        assert!(store.read(&key, 20).await.unwrap_err().is_corrupt());

        store.quarantine(&key).await.unwrap();
        assert!(store.read(&key, 20).await.unwrap().is_empty());
        assert!(store.list_ais(&key.project).await.unwrap().is_empty());
        // The quarantined rows are kept.
        assert_eq!(message_rows(&store), 1);
    }

    #[tokio::test]
    async fn test_listing() {
        let store = SqliteContextStore::in_memory().unwrap();
        for k in [key("/p/a", "grok"), key("/p/a", "gemini"), key("/p/b", "openai")] {
            store
                .write(&k, &append(vec![Message::user("x")]))
                .await
                .unwrap();
        }

        let project_a = ProjectKey::from_path("/p/a").unwrap();
        let ais = store.list_ais(&project_a).await.unwrap();
        assert_eq!(
            ais.iter().map(AiName::as_str).collect::<Vec<_>>(),
            vec!["gemini", "grok"]
        );
        assert_eq!(store.list_projects().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let store = SqliteContextStore::in_memory().unwrap();
        let key = key("/p/a", "gemini");
        store
            .write(&key, &append(vec![Message::user("x")]))
            .await
            .unwrap();

        let old = Utc::now() - chrono::Duration::days(30);
        assert!(store.stale_keys(old).await.unwrap().is_empty());
        assert!(!store.delete_if_stale(&key, old).await.unwrap());

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.stale_keys(cutoff).await.unwrap(), vec![key.clone()]);
        assert!(store.delete_if_stale(&key, cutoff).await.unwrap());
        assert_eq!(message_rows(&store), 0);
    }

    #[tokio::test]
    async fn test_summarize_counts_full_history() {
        let store = SqliteContextStore::in_memory().unwrap();
        let gemini = key("/p/a", "gemini");
        let grok = key("/p/a", "grok");
        for i in 0..3 {
            store
                .write(&gemini, &append(vec![Message::user(i.to_string())]))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .write(&grok, &append(vec![Message::user("later")]))
            .await
            .unwrap();

        let summary = store.summarize(&gemini.project).await.unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].ai.as_str(), "grok");
        assert_eq!(summary[0].message_count, 1);
        assert_eq!(summary[1].message_count, 3);
        assert!(summary[0].updated_at >= summary[1].updated_at);

        let other = ProjectKey::from_path("/p/b").unwrap();
        assert!(store.summarize(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("context.db");
        let key = key("/p/a", "gemini");
        {
            let store = SqliteContextStore::open(&path).await.unwrap();
            store
                .write(&key, &append(vec![Message::user("persisted")]))
                .await
                .unwrap();
        }

        let reopened = SqliteContextStore::open(&path).await.unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        let messages = reopened.read(&key, 20).await.unwrap();
        assert_eq!(messages[0].content, "persisted");
        reopened.health().await.unwrap();
    }
}
