use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row};
use simcity_core::prelude::{derive_run_id, Seed, Tier};

use crate::error::StoreError;
use crate::run_request::{NewRunRequest, RunRequest, RunStatus};
use crate::shared::{shared_schema, shared_table, SYNTHETIC_SOURCE_COLUMN};

/// Environment variable naming the SQLite database file.
pub const SIMCITY_DB_PATH_ENV: &str = "SIMCITY_DB_PATH";

pub const DEFAULT_DB_PATH: &str = "simcity.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RUN_REQUEST_COLUMNS: &str = "id, seed, tier, concurrency, max_events, duration_seconds, \
     status, run_id, created_at, started_at, ended_at, outcome, error";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite backed store.
///
/// Each operation opens its own connection so the store can be shared freely between threads and
/// processes. Cross-connection consistency comes from SQLite locking, see [SqliteStore::try_claim].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open the database at `path`, creating the file and schema if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            db_path: path.into(),
        };
        let conn = store.open_connection()?;
        conn.execute_batch(&schema())?;
        Ok(store)
    }

    /// Open the database named by [SIMCITY_DB_PATH_ENV], or [DEFAULT_DB_PATH].
    pub fn from_env() -> Result<Self, StoreError> {
        let path =
            std::env::var(SIMCITY_DB_PATH_ENV).unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    pub fn submit(&self, request: &NewRunRequest) -> Result<RunRequest, StoreError> {
        let max_events = request
            .max_events
            .map(|v| to_sql_int("max_events", v))
            .transpose()?;
        let duration_seconds = request
            .duration_seconds
            .map(|v| to_sql_int("duration_seconds", v))
            .transpose()?;

        let conn = self.open_connection()?;
        conn.execute(
            "INSERT INTO run_requests
                (seed, tier, concurrency, max_events, duration_seconds, status, run_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.seed.as_str(),
                request.tier.as_str(),
                request.concurrency.map(i64::from),
                max_events,
                duration_seconds,
                RunStatus::Pending.as_str(),
                derive_run_id(&request.seed),
                now_ms(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        log::info!("Submitted run request {id} for seed {}", request.seed);

        get_request(&conn, id)?.ok_or(StoreError::NotFound(id))
    }

    pub fn get(&self, id: i64) -> Result<Option<RunRequest>, StoreError> {
        let conn = self.open_connection()?;
        get_request(&conn, id)
    }

    /// Oldest PENDING request.
    pub fn next_pending(&self) -> Result<Option<RunRequest>, StoreError> {
        let conn = self.open_connection()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {RUN_REQUEST_COLUMNS} FROM run_requests
                     WHERE status = ?1 ORDER BY created_at ASC, id ASC LIMIT 1"
                ),
                params![RunStatus::Pending.as_str()],
                RawRunRequest::from_row,
            )
            .optional()?;
        raw.map(RawRunRequest::into_request).transpose()
    }

    /// The request currently RUNNING, if any.
    pub fn running(&self) -> Result<Option<RunRequest>, StoreError> {
        let conn = self.open_connection()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {RUN_REQUEST_COLUMNS} FROM run_requests
                     WHERE status = ?1 ORDER BY started_at ASC LIMIT 1"
                ),
                params![RunStatus::Running.as_str()],
                RawRunRequest::from_row,
            )
            .optional()?;
        raw.map(RawRunRequest::into_request).transpose()
    }

    /// Move a PENDING request to RUNNING, only if no request is RUNNING.
    ///
    /// The check and the write are a single statement, so of any number of concurrent claims at
    /// most one succeeds. Returns whether this call won.
    pub fn try_claim(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.open_connection()?;
        let changed = conn.execute(
            "UPDATE run_requests SET status = ?1, started_at = ?2
             WHERE id = ?3 AND status = ?4
               AND NOT EXISTS (SELECT 1 FROM run_requests WHERE status = ?1)",
            params![
                RunStatus::Running.as_str(),
                now_ms(),
                id,
                RunStatus::Pending.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    /// External stop. Applies to PENDING or RUNNING requests, returns whether anything changed.
    pub fn mark_stopped(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.open_connection()?;
        let changed = conn.execute(
            "UPDATE run_requests SET status = ?1 WHERE id = ?2 AND status IN (?3, ?4)",
            params![
                RunStatus::Stopped.as_str(),
                id,
                RunStatus::Pending.as_str(),
                RunStatus::Running.as_str()
            ],
        )?;
        if changed == 0 && get_request(&conn, id)?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        Ok(changed == 1)
    }

    /// Record the end time of a request without touching anything else.
    pub fn mark_ended(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.open_connection()?;
        let changed = conn.execute(
            "UPDATE run_requests SET ended_at = ?1 WHERE id = ?2",
            params![now_ms(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Move a RUNNING request to COMPLETED or FAILED.
    ///
    /// The write is conditional on the request still being RUNNING, so a concurrent external stop
    /// is never overwritten. Returns whether the request was finalised.
    pub fn finalize(
        &self,
        id: i64,
        status: RunStatus,
        outcome: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        if !status.is_evaluable() {
            return Err(StoreError::InvalidTransition {
                id,
                from: RunStatus::Running,
                to: status,
            });
        }

        let conn = self.open_connection()?;
        let changed = conn.execute(
            "UPDATE run_requests SET status = ?1, ended_at = ?2, outcome = ?3, error = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                status.as_str(),
                now_ms(),
                outcome,
                error,
                id,
                RunStatus::Running.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    /// Most recent requests first.
    pub fn list(&self, limit: usize) -> Result<Vec<RunRequest>, StoreError> {
        let conn = self.open_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_REQUEST_COLUMNS} FROM run_requests ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], RawRunRequest::from_row)?;

        let mut requests = Vec::new();
        for raw in rows {
            requests.push(raw?.into_request()?);
        }
        Ok(requests)
    }

    /// Latest request recorded for a run id.
    pub fn find_by_run_id(&self, run_id: &str) -> Result<Option<RunRequest>, StoreError> {
        let conn = self.open_connection()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {RUN_REQUEST_COLUMNS} FROM run_requests
                     WHERE run_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![run_id],
                RawRunRequest::from_row,
            )
            .optional()?;
        raw.map(RawRunRequest::into_request).transpose()
    }

    /// Insert a row into a shared table.
    pub fn insert_shared_row(
        &self,
        table: &str,
        synthetic_source: Option<&str>,
        payload: &str,
    ) -> Result<i64, StoreError> {
        let table = shared_table(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let conn = self.open_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {table} ({SYNTHETIC_SOURCE_COLUMN}, payload, created_at)
                 VALUES (?1, ?2, ?3)"
            ),
            params![synthetic_source, payload, now_ms()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count_synthetic(&self, table: &str, source: &str) -> Result<u64, StoreError> {
        let table = shared_table(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let conn = self.open_connection()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {SYNTHETIC_SOURCE_COLUMN} = ?1"),
            params![source],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn delete_synthetic(&self, table: &str, source: &str) -> Result<u64, StoreError> {
        let table = shared_table(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let conn = self.open_connection()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {table} WHERE {SYNTHETIC_SOURCE_COLUMN} = ?1"),
            params![source],
        )?;
        Ok(deleted as u64)
    }

    pub fn count_rows(&self, table: &str) -> Result<u64, StoreError> {
        let table = shared_table(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let conn = self.open_connection()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn to_sql_int(field: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { field, value })
}

fn schema() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS run_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            seed TEXT NOT NULL,
            tier TEXT NOT NULL,
            concurrency INTEGER,
            max_events INTEGER,
            duration_seconds INTEGER,
            status TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            ended_at INTEGER,
            outcome TEXT,
            error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_run_requests_status
            ON run_requests(status, created_at);
        {}",
        shared_schema()
    )
}

fn get_request(conn: &Connection, id: i64) -> Result<Option<RunRequest>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {RUN_REQUEST_COLUMNS} FROM run_requests WHERE id = ?1"),
            params![id],
            RawRunRequest::from_row,
        )
        .optional()?;
    raw.map(RawRunRequest::into_request).transpose()
}

/// Columns as stored, before the text columns are parsed.
struct RawRunRequest {
    id: i64,
    seed: String,
    tier: String,
    concurrency: Option<i64>,
    max_events: Option<i64>,
    duration_seconds: Option<i64>,
    status: String,
    run_id: String,
    created_at: i64,
    started_at: Option<i64>,
    ended_at: Option<i64>,
    outcome: Option<String>,
    error: Option<String>,
}

impl RawRunRequest {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            seed: row.get(1)?,
            tier: row.get(2)?,
            concurrency: row.get(3)?,
            max_events: row.get(4)?,
            duration_seconds: row.get(5)?,
            status: row.get(6)?,
            run_id: row.get(7)?,
            created_at: row.get(8)?,
            started_at: row.get(9)?,
            ended_at: row.get(10)?,
            outcome: row.get(11)?,
            error: row.get(12)?,
        })
    }

    fn into_request(self) -> Result<RunRequest, StoreError> {
        let corrupt = |message: String| StoreError::Corrupt {
            table: "run_requests",
            message,
        };

        let tier: Tier = self.tier.parse().map_err(|e| corrupt(format!("{e}")))?;
        let status: RunStatus = self.status.parse().map_err(corrupt)?;

        Ok(RunRequest {
            id: self.id,
            seed: Seed::new(self.seed),
            tier,
            concurrency: self
                .concurrency
                .map(u32::try_from)
                .transpose()
                .map_err(|e| corrupt(format!("concurrency: {e}")))?,
            max_events: self
                .max_events
                .map(u64::try_from)
                .transpose()
                .map_err(|e| corrupt(format!("max_events: {e}")))?,
            duration_seconds: self
                .duration_seconds
                .map(u64::try_from)
                .transpose()
                .map_err(|e| corrupt(format!("duration_seconds: {e}")))?,
            status,
            run_id: self.run_id,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            outcome: self.outcome,
            error: self.error,
        })
    }
}
