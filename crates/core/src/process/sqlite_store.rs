//! SQLite-backed stream process repository.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    HealthMetrics, NewStreamProcess, ProcessStatus, ProcessStoreError, RecoveryPolicy,
    StreamProcess, StreamProcessRepository,
};

const PROCESS_COLUMNS: &str = "id, channel_id, pid, status, start_time, last_heartbeat, input_source, output_targets, cpu_usage, memory_usage, network_bandwidth_kbps, error_count, max_restarts, restart_delay_ms, health_check_interval_ms, created_at, updated_at";

/// SQLite-backed stream process repository.
pub struct SqliteStreamProcessRepository {
    conn: Mutex<Connection>,
}

impl SqliteStreamProcessRepository {
    pub fn new(path: &Path) -> Result<Self, ProcessStoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, ProcessStoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ProcessStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stream_processes (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL UNIQUE,
                pid INTEGER,
                status TEXT NOT NULL,
                start_time TEXT,
                last_heartbeat TEXT,
                input_source TEXT NOT NULL,
                output_targets TEXT NOT NULL,
                cpu_usage REAL NOT NULL DEFAULT 0,
                memory_usage INTEGER NOT NULL DEFAULT 0,
                network_bandwidth_kbps REAL NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                max_restarts INTEGER NOT NULL,
                restart_delay_ms INTEGER NOT NULL,
                health_check_interval_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_stream_processes_status ON stream_processes(status);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ProcessStoreError> {
        self.conn
            .lock()
            .map_err(|_| ProcessStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn fetch(conn: &Connection, id: &str) -> Result<StreamProcess, ProcessStoreError> {
        let sql = format!("SELECT {} FROM stream_processes WHERE id = ?", PROCESS_COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_process)
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| ProcessStoreError::NotFound(id.to_string()))
    }

    fn query(
        conn: &Connection,
        where_clause: &str,
        values: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<StreamProcess>, ProcessStoreError> {
        let sql = format!(
            "SELECT {} FROM stream_processes {} ORDER BY created_at ASC",
            PROCESS_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(values, Self::row_to_process)
            .map_err(db_err)?;

        let mut processes = Vec::new();
        for row in rows {
            processes.push(row.map_err(db_err)?);
        }
        Ok(processes)
    }

    fn row_to_process(row: &rusqlite::Row) -> rusqlite::Result<StreamProcess> {
        let status_str: String = row.get(3)?;
        let start_time: Option<String> = row.get(4)?;
        let last_heartbeat: Option<String> = row.get(5)?;
        let outputs_json: String = row.get(7)?;
        let created_at: String = row.get(15)?;
        let updated_at: String = row.get(16)?;

        Ok(StreamProcess {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            pid: row.get(2)?,
            status: status_str.parse().unwrap_or(ProcessStatus::Error),
            start_time: start_time.as_deref().and_then(parse_time),
            last_heartbeat: last_heartbeat.as_deref().and_then(parse_time),
            input_source: row.get(6)?,
            output_targets: serde_json::from_str(&outputs_json).unwrap_or_default(),
            health: HealthMetrics {
                cpu_usage: row.get::<_, f64>(8)? as f32,
                memory_usage: row.get::<_, i64>(9)?.max(0) as u64,
                network_bandwidth_kbps: row.get(10)?,
            },
            error_count: row.get(11)?,
            recovery: RecoveryPolicy {
                max_restarts: row.get(12)?,
                restart_delay_ms: row.get::<_, i64>(13)?.max(0) as u64,
                health_check_interval_ms: row.get::<_, i64>(14)?.max(0) as u64,
            },
            created_at: parse_time(&created_at).unwrap_or_else(Utc::now),
            updated_at: parse_time(&updated_at).unwrap_or_else(Utc::now),
        })
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn db_err(e: impl std::fmt::Display) -> ProcessStoreError {
    ProcessStoreError::Database(e.to_string())
}

fn execute_on(
    conn: &Connection,
    id: &str,
    sql: &str,
    values: &[&dyn rusqlite::ToSql],
) -> Result<(), ProcessStoreError> {
    let changed = conn.execute(sql, values).map_err(db_err)?;
    if changed == 0 {
        return Err(ProcessStoreError::NotFound(id.to_string()));
    }
    Ok(())
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl StreamProcessRepository for SqliteStreamProcessRepository {
    async fn create(&self, request: NewStreamProcess) -> Result<StreamProcess, ProcessStoreError> {
        let conn = self.lock()?;

        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM stream_processes WHERE channel_id = ?",
                params![request.channel_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if exists.is_some() {
            return Err(ProcessStoreError::AlreadyExists(request.channel_id));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let outputs_json = serde_json::to_string(&request.output_targets).map_err(db_err)?;

        conn.execute(
            "INSERT INTO stream_processes (id, channel_id, status, input_source, output_targets, max_restarts, restart_delay_ms, health_check_interval_ms, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.channel_id,
                ProcessStatus::Idle.as_str(),
                request.input_source,
                outputs_json,
                request.recovery.max_restarts,
                clamp_i64(request.recovery.restart_delay_ms),
                clamp_i64(request.recovery.health_check_interval_ms),
                now,
                now,
            ],
        )
        .map_err(db_err)?;

        Self::fetch(&conn, &id)
    }

    async fn find_by_id(&self, id: &str) -> Result<StreamProcess, ProcessStoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    async fn find_by_channel_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<StreamProcess>, ProcessStoreError> {
        let conn = self.lock()?;
        Ok(Self::query(&conn, "WHERE channel_id = ?", &[&channel_id])?
            .into_iter()
            .next())
    }

    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        pid: Option<u32>,
    ) -> Result<StreamProcess, ProcessStoreError> {
        let conn = self.lock()?;
        let pid = pid.filter(|_| status.allows_pid());
        let now = Utc::now().to_rfc3339();

        if status == ProcessStatus::Running {
            execute_on(
                &conn,
                id,
                "UPDATE stream_processes SET status = ?, pid = ?, start_time = ?, last_heartbeat = ?, updated_at = ? WHERE id = ?",
                &[&status.as_str(), &pid, &now, &now, &now, &id],
            )?;
        } else {
            execute_on(
                &conn,
                id,
                "UPDATE stream_processes SET status = ?, pid = ?, updated_at = ? WHERE id = ?",
                &[&status.as_str(), &pid, &now, &id],
            )?;
        }
        Self::fetch(&conn, id)
    }

    async fn update_io(
        &self,
        id: &str,
        input_source: &str,
        output_targets: &[String],
    ) -> Result<StreamProcess, ProcessStoreError> {
        let conn = self.lock()?;
        let outputs_json = serde_json::to_string(output_targets).map_err(db_err)?;
        execute_on(
            &conn,
            id,
            "UPDATE stream_processes SET input_source = ?, output_targets = ?, updated_at = ? WHERE id = ?",
            &[&input_source, &outputs_json, &Utc::now().to_rfc3339(), &id],
        )?;
        Self::fetch(&conn, id)
    }

    async fn update_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), ProcessStoreError> {
        let conn = self.lock()?;
        let at = at.to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE stream_processes SET last_heartbeat = ?, updated_at = ? WHERE id = ? AND status = 'RUNNING'",
                params![at, at, id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            // Distinguish "not running" (ignored) from "missing".
            Self::fetch(&conn, id)?;
        }
        Ok(())
    }

    async fn update_health_metrics(
        &self,
        id: &str,
        metrics: HealthMetrics,
    ) -> Result<(), ProcessStoreError> {
        let conn = self.lock()?;
        execute_on(
            &conn,
            id,
            "UPDATE stream_processes SET cpu_usage = ?, memory_usage = ?, network_bandwidth_kbps = ?, updated_at = ? WHERE id = ?",
            &[
                &(metrics.cpu_usage as f64),
                &clamp_i64(metrics.memory_usage),
                &metrics.network_bandwidth_kbps,
                &Utc::now().to_rfc3339(),
                &id,
            ],
        )
    }

    async fn increment_error_count(&self, id: &str) -> Result<u32, ProcessStoreError> {
        let conn = self.lock()?;
        execute_on(
            &conn,
            id,
            "UPDATE stream_processes SET error_count = error_count + 1, updated_at = ? WHERE id = ?",
            &[&Utc::now().to_rfc3339(), &id],
        )?;
        Ok(Self::fetch(&conn, id)?.error_count)
    }

    async fn reset_error_count(&self, id: &str) -> Result<(), ProcessStoreError> {
        let conn = self.lock()?;
        execute_on(
            &conn,
            id,
            "UPDATE stream_processes SET error_count = 0, updated_at = ? WHERE id = ?",
            &[&Utc::now().to_rfc3339(), &id],
        )
    }

    async fn delete(&self, id: &str) -> Result<(), ProcessStoreError> {
        let conn = self.lock()?;
        execute_on(&conn, id, "DELETE FROM stream_processes WHERE id = ?", &[&id])
    }

    async fn delete_by_channel_id(&self, channel_id: &str) -> Result<bool, ProcessStoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM stream_processes WHERE channel_id = ?",
                params![channel_id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn find_stale_processes(
        &self,
        timeout: Duration,
    ) -> Result<Vec<StreamProcess>, ProcessStoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let running = self.get_running_processes().await?;
        Ok(running
            .into_iter()
            .filter(|p| p.last_heartbeat.map_or(true, |hb| hb < cutoff))
            .collect())
    }

    async fn get_running_processes(&self) -> Result<Vec<StreamProcess>, ProcessStoreError> {
        let conn = self.lock()?;
        Self::query(&conn, "WHERE status = 'RUNNING'", &[])
    }
}
