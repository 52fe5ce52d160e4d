use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::app::ports::JobStore;
use crate::domain::Job;
use crate::error::{FormataError, Result};

/// Durable job store backed by a single SQLite file.
///
/// Each job is stored as its JSON document; `status` and `created_at` are kept in their
/// own columns for listing.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
    // Serializes read-modify-write cycles against deletes
    writes: Arc<tokio::sync::Mutex<()>>,
}

impl SqliteJobStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn).map(|store| {
            info!("Opened SQLite job store at {}", path.display());
            store
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS jobs (
                id          TEXT PRIMARY KEY,
                status      TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                body        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS jobs_created_at ON jobs (created_at);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            writes: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let shared = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = lock(&shared)?;
            f(&conn)
        })
        .await
        .map_err(|e| FormataError::Storage(format!("job store task failed: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| FormataError::Storage("job store connection poisoned".to_string()))
}

fn load(conn: &Connection, id: &str) -> Result<Job> {
    let body: Option<String> = conn
        .query_row("SELECT body FROM jobs WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    match body {
        Some(body) => Ok(serde_json::from_str(&body)?),
        None => Err(FormataError::JobNotFound(id.to_string())),
    }
}

fn save(conn: &Connection, job: &Job) -> Result<()> {
    let body = serde_json::to_string(job)?;
    conn.execute(
        "INSERT INTO jobs (id, status, created_at, body) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET status=excluded.status, body=excluded.body",
        params![job.id, job.status.as_str(), job.created_at.to_rfc3339(), body],
    )?;
    Ok(())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: Job) -> Result<String> {
        self.with_conn(move |conn| {
            let exists: Option<String> = conn
                .query_row("SELECT id FROM jobs WHERE id = ?1", params![job.id], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_some() {
                return Err(FormataError::Storage(format!("job {} already exists", job.id)));
            }
            save(conn, &job)?;
            debug!("Created job {}", job.id);
            Ok(job.id)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Job> {
        let id = id.to_string();
        self.with_conn(move |conn| load(conn, &id)).await
    }

    async fn list(&self) -> Result<Vec<Job>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT body FROM jobs ORDER BY created_at, id")?;
            let bodies = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            bodies
                .iter()
                .map(|body| serde_json::from_str(body).map_err(FormataError::from))
                .collect()
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<Job> {
        let _gate = self.writes.lock().await;
        let id = id.to_string();
        self.with_conn(move |conn| {
            let job = load(conn, &id)?;
            conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
            Ok(job)
        })
        .await
    }

    async fn modify(
        &self,
        id: &str,
        change: &mut (dyn for<'j> FnMut(&'j mut Job) -> Result<()> + Send),
    ) -> Result<Job> {
        // The write gate is held from read to write
        let _gate = self.writes.lock().await;
        let owned = id.to_string();
        let mut job = self.with_conn(move |conn| load(conn, &owned)).await?;
        change(&mut job)?;
        let saved = job.clone();
        self.with_conn(move |conn| save(conn, &saved)).await?;
        Ok(job)
    }
}
