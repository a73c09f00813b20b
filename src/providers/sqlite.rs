//! SQL backend on an embedded SQLite database.
//!
//! Table layout:
//!
//! ```sql
//! CREATE TABLE session (
//!     session_key    TEXT PRIMARY KEY,
//!     session_data   BLOB NOT NULL,
//!     session_expiry INTEGER NOT NULL  -- unix seconds of last write/touch
//! );
//! ```
//!
//! The connection sits behind `Arc<Mutex<_>>` and every statement runs on
//! the blocking pool.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use super::config::SqlConfig;
use super::traits::{GcPolicy, SessionProvider, SessionStore};
use crate::session::error::{Result, SessionError};
use crate::session::id::{redact, validate_session_id};
use crate::session::state::SessionValues;

type SharedConnection = Arc<Mutex<Connection>>;

pub struct SqliteProvider {
    conn: Option<SharedConnection>,
    table: String,
    max_lifetime: i64,
}

impl SqliteProvider {
    pub fn new() -> Self {
        Self {
            conn: None,
            table: super::config::DEFAULT_TABLE_NAME.to_string(),
            max_lifetime: 0,
        }
    }

    fn conn(&self) -> Result<SharedConnection> {
        self.conn
            .clone()
            .ok_or_else(|| SessionError::config("sqlite provider used before init"))
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = self.conn()?;
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard, &table)
        })
        .await?
    }

    fn store(&self, sid: &str, data: &[u8]) -> Result<Arc<dyn SessionStore>> {
        Ok(Arc::new(SqliteStore {
            values: SessionValues::decode(sid, data)?,
            conn: self.conn()?,
            table: self.table.clone(),
        }))
    }
}

impl Default for SqliteProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn open_connection(config: &SqlConfig) -> Result<Connection> {
    let conn = if config.path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        let expanded = shellexpand::tilde(&config.path).into_owned();
        let path = Path::new(&expanded);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn
    };

    if let Some(timeout) = config.busy_timeout {
        conn.busy_timeout(timeout)?;
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            session_key    TEXT PRIMARY KEY,
            session_data   BLOB NOT NULL,
            session_expiry INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_expiry ON {table}(session_expiry);",
        table = config.table
    ))?;
    Ok(conn)
}

/// Load the record for `sid`, inserting an empty one if absent, and reset
/// its expiry.
fn load_or_create(conn: &mut Connection, table: &str, sid: &str) -> Result<Vec<u8>> {
    let tx = conn.transaction()?;
    let now = now_secs();
    let existing: Option<Vec<u8>> = tx
        .query_row(
            &format!("SELECT session_data FROM {table} WHERE session_key = ?1"),
            params![sid],
            |row| row.get(0),
        )
        .optional()?;

    let data = if let Some(data) = existing {
        tx.execute(
            &format!("UPDATE {table} SET session_expiry = ?2 WHERE session_key = ?1"),
            params![sid, now],
        )?;
        data
    } else {
        tx.execute(
            &format!(
                "INSERT INTO {table} (session_key, session_data, session_expiry) VALUES (?1, ?2, ?3)"
            ),
            params![sid, Vec::<u8>::new(), now],
        )?;
        Vec::new()
    };
    tx.commit()?;
    Ok(data)
}

#[async_trait]
impl SessionProvider for SqliteProvider {
    async fn init(&mut self, max_lifetime: u64, config: &str) -> Result<()> {
        let config = SqlConfig::parse(config)?;
        let conn = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || open_connection(&config)).await??
        };
        self.conn = Some(Arc::new(Mutex::new(conn)));
        self.table = config.table;
        self.max_lifetime = i64::try_from(max_lifetime).unwrap_or(i64::MAX);
        tracing::debug!(provider = "sqlite", path = %config.path, table = %self.table, "Session table ready");
        Ok(())
    }

    async fn exists(&self, sid: &str) -> Result<bool> {
        validate_session_id(sid)?;
        let sid = sid.to_string();
        let max_lifetime = self.max_lifetime;
        self.run(move |conn, table| {
            let expiry: Option<i64> = conn
                .query_row(
                    &format!("SELECT session_expiry FROM {table} WHERE session_key = ?1"),
                    params![sid],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(expiry.is_some_and(|e| now_secs().saturating_sub(e) <= max_lifetime))
        })
        .await
    }

    async fn read(&self, sid: &str) -> Result<Arc<dyn SessionStore>> {
        validate_session_id(sid)?;
        let owned = sid.to_string();
        let data = self
            .run(move |conn, table| load_or_create(conn, table, &owned))
            .await?;
        self.store(sid, &data)
    }

    async fn regenerate(&self, old_sid: &str, sid: &str) -> Result<Arc<dyn SessionStore>> {
        validate_session_id(old_sid)?;
        validate_session_id(sid)?;
        let (old, new) = (old_sid.to_string(), sid.to_string());
        let data = self
            .run(move |conn, table| {
                let tx = conn.transaction()?;
                tx.execute(
                    &format!("DELETE FROM {table} WHERE session_key = ?1"),
                    params![new],
                )?;
                let moved = tx.execute(
                    &format!(
                        "UPDATE {table} SET session_key = ?2, session_expiry = ?3 WHERE session_key = ?1"
                    ),
                    params![old, new, now_secs()],
                )?;
                tx.commit()?;
                if moved == 0 {
                    return load_or_create(conn, table, &new);
                }
                let data: Vec<u8> = conn.query_row(
                    &format!("SELECT session_data FROM {table} WHERE session_key = ?1"),
                    params![new],
                    |row| row.get(0),
                )?;
                Ok(data)
            })
            .await?;
        tracing::debug!(provider = "sqlite", old = %redact(old_sid), sid = %redact(sid), "Session regenerated");
        self.store(sid, &data)
    }

    async fn destroy(&self, sid: &str) -> Result<()> {
        validate_session_id(sid)?;
        let sid = sid.to_string();
        self.run(move |conn, table| {
            conn.execute(
                &format!("DELETE FROM {table} WHERE session_key = ?1"),
                params![sid],
            )?;
            Ok(())
        })
        .await
    }

    async fn gc(&self) -> Result<()> {
        let max_lifetime = self.max_lifetime;
        let removed = self
            .run(move |conn, table| {
                Ok(conn.execute(
                    &format!("DELETE FROM {table} WHERE session_expiry < ?1"),
                    params![now_secs().saturating_sub(max_lifetime)],
                )?)
            })
            .await?;
        if removed > 0 {
            tracing::debug!(provider = "sqlite", removed, "Expired sessions removed");
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = self
            .run(|conn, table| {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
            })
            .await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    fn gc_policy(&self) -> GcPolicy {
        GcPolicy::Sweep
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

struct SqliteStore {
    values: SessionValues,
    conn: SharedConnection,
    table: String,
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn values(&self) -> &SessionValues {
        &self.values
    }

    async fn release(&self) -> Result<()> {
        let data = self.values.encode()?;
        let sid = self.values.sid().to_string();
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            conn.lock().execute(
                &format!(
                    "INSERT INTO {table} (session_key, session_data, session_expiry)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(session_key) DO UPDATE SET
                        session_data = excluded.session_data,
                        session_expiry = excluded.session_expiry"
                ),
                params![sid, data, now_secs()],
            )?;
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::value::SessionValue;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn provider(tmp: &TempDir, max_lifetime: u64) -> SqliteProvider {
        let db = tmp.path().join("sessions.db");
        let mut p = SqliteProvider::new();
        p.init(max_lifetime, db.to_str().unwrap()).await.unwrap();
        p
    }

    #[tokio::test]
    async fn operations_before_init_are_config_errors() {
        let p = SqliteProvider::new();
        assert!(matches!(p.count().await, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn in_memory_database_works() {
        let mut p = SqliteProvider::new();
        p.init(180, ":memory:").await.unwrap();
        p.read("mem_sid").await.unwrap();
        assert_eq!(p.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn custom_table_name_from_structured_config() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("custom.db");
        let cfg = serde_json::json!({ "path": db, "table": "web_sessions", "busy_timeout": "2s" })
            .to_string();
        let mut p = SqliteProvider::new();
        p.init(180, &cfg).await.unwrap();
        p.read("abc").await.unwrap();

        let conn = Connection::open(&db).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM web_sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn read_then_exists() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        assert!(!p.exists("sql_sid").await.unwrap());
        p.read("sql_sid").await.unwrap();
        assert!(p.exists("sql_sid").await.unwrap());
    }

    #[tokio::test]
    async fn short_ids_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        assert!(p.exists("1").await.unwrap_err().is_invalid_session_id());
        assert!(p.read("").await.err().unwrap().is_invalid_session_id());
    }

    #[tokio::test]
    async fn release_then_reread() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let s = p.read("S1").await.unwrap();
        s.set("user".into(), "alice".into()).unwrap();
        s.release().await.unwrap();
        s.release().await.unwrap();

        let again = p.read("S1").await.unwrap();
        assert_eq!(again.get(&"user".into()), Some(SessionValue::from("alice")));
        assert_eq!(p.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn regenerate_moves_content() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let s = p.read("old_sid").await.unwrap();
        s.set("a".into(), 1.into()).unwrap();
        s.release().await.unwrap();

        let moved = p.regenerate("old_sid", "new_sid").await.unwrap();
        assert!(!p.exists("old_sid").await.unwrap());
        assert!(p.exists("new_sid").await.unwrap());
        assert_eq!(moved.get(&"a".into()), Some(SessionValue::Int(1)));
    }

    #[tokio::test]
    async fn regenerate_absent_old_creates_empty() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let s = p.regenerate("ghost", "fresh").await.unwrap();
        assert!(s.snapshot().is_empty());
        assert!(p.exists("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        p.read("doomed").await.unwrap();
        p.destroy("doomed").await.unwrap();
        p.destroy("doomed").await.unwrap();
        assert_eq!(p.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gc_deletes_expired_rows() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 1).await;
        for i in 0..5 {
            p.read(&format!("gc_{i}")).await.unwrap();
        }
        assert_eq!(p.count().await.unwrap(), 5);
        tokio::time::sleep(Duration::from_secs(2)).await;
        p.gc().await.unwrap();
        assert_eq!(p.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_sets_survive_release() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let store = p.read("busy_sid").await.unwrap();
        let tasks: Vec<_> = (0..100i64)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.set(i.into(), i.into()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        store.release().await.unwrap();
        assert_eq!(p.read("busy_sid").await.unwrap().snapshot().len(), 100);
    }
}
