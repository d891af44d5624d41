//! SQLite-backed channel repository.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{Channel, ChannelConfig, ChannelRepository, ChannelStatus, ChannelStoreError, ChannelUpdate, NewChannel};

const CHANNEL_COLUMNS: &str = "id, client_id, name, status, config, hls_endpoint, total_uptime_secs, restart_count, last_start_time, last_stop_time, created_at, updated_at";

/// SQLite-backed channel repository.
pub struct SqliteChannelRepository {
    conn: Mutex<Connection>,
}

impl SqliteChannelRepository {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, ChannelStoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory repository (useful for testing).
    pub fn in_memory() -> Result<Self, ChannelStoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ChannelStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                config TEXT NOT NULL,
                hls_endpoint TEXT,
                total_uptime_secs INTEGER NOT NULL DEFAULT 0,
                restart_count INTEGER NOT NULL DEFAULT 0,
                last_start_time TEXT,
                last_stop_time TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_channels_client_id ON channels(client_id);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ChannelStoreError> {
        self.conn
            .lock()
            .map_err(|_| ChannelStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Channel, ChannelStoreError> {
        let sql = format!("SELECT {} FROM channels WHERE id = ?", CHANNEL_COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_channel)
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| ChannelStoreError::NotFound(id.to_string()))
    }

    fn row_to_channel(row: &rusqlite::Row) -> rusqlite::Result<Channel> {
        let status_str: String = row.get(3)?;
        let config_json: String = row.get(4)?;
        let last_start: Option<String> = row.get(8)?;
        let last_stop: Option<String> = row.get(9)?;
        let created_at: String = row.get(10)?;
        let updated_at: String = row.get(11)?;

        let status = status_str.parse().unwrap_or(ChannelStatus::Error);
        let config: ChannelConfig = serde_json::from_str(&config_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Channel {
            id: row.get(0)?,
            client_id: row.get(1)?,
            name: row.get(2)?,
            status,
            config,
            hls_endpoint: row.get(5)?,
            total_uptime_secs: row.get::<_, i64>(6)?.max(0) as u64,
            restart_count: row.get(7)?,
            last_start_time: last_start.as_deref().and_then(parse_time),
            last_stop_time: last_stop.as_deref().and_then(parse_time),
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

fn db_err(e: impl std::fmt::Display) -> ChannelStoreError {
    ChannelStoreError::Database(e.to_string())
}

/// Run an UPDATE and fail with `NotFound` when no row matched.
fn execute_on(
    conn: &Connection,
    id: &str,
    sql: &str,
    values: &[&dyn rusqlite::ToSql],
) -> Result<(), ChannelStoreError> {
    let changed = conn.execute(sql, values).map_err(db_err)?;
    if changed == 0 {
        return Err(ChannelStoreError::NotFound(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ChannelRepository for SqliteChannelRepository {
    async fn create(&self, request: NewChannel) -> Result<Channel, ChannelStoreError> {
        let conn = self.lock()?;

        let id = request
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now();
        let config_json = serde_json::to_string(&request.config).map_err(db_err)?;

        conn.execute(
            "INSERT INTO channels (id, client_id, name, status, config, hls_endpoint, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.client_id,
                request.name,
                ChannelStatus::Stopped.as_str(),
                config_json,
                request.hls_endpoint,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(Channel {
            id,
            client_id: request.client_id,
            name: request.name,
            status: ChannelStatus::Stopped,
            config: request.config,
            hls_endpoint: request.hls_endpoint,
            total_uptime_secs: 0,
            restart_count: 0,
            last_start_time: None,
            last_stop_time: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Channel, ChannelStoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Vec<Channel>, ChannelStoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM channels WHERE client_id = ? ORDER BY created_at ASC",
            CHANNEL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![client_id], Self::row_to_channel)
            .map_err(db_err)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row.map_err(db_err)?);
        }
        Ok(channels)
    }

    async fn update(&self, id: &str, update: &ChannelUpdate) -> Result<Channel, ChannelStoreError> {
        let conn = self.lock()?;
        let current = Self::fetch(&conn, id)?;

        let name = update.name.clone().unwrap_or(current.name);
        let config = update.apply_to(&current.config);
        let config_json = serde_json::to_string(&config).map_err(db_err)?;

        execute_on(
            &conn,
            id,
            "UPDATE channels SET name = ?, config = ?, updated_at = ? WHERE id = ?",
            &[&name, &config_json, &Utc::now().to_rfc3339(), &id],
        )?;
        Self::fetch(&conn, id)
    }

    async fn update_status(
        &self,
        id: &str,
        status: ChannelStatus,
        at: DateTime<Utc>,
    ) -> Result<Channel, ChannelStoreError> {
        let conn = self.lock()?;
        let at_str = at.to_rfc3339();
        let now = Utc::now().to_rfc3339();

        match status {
            ChannelStatus::Live => execute_on(
                &conn,
                id,
                "UPDATE channels SET status = ?, last_start_time = ?, updated_at = ? WHERE id = ?",
                &[&status.as_str(), &at_str, &now, &id],
            )?,
            ChannelStatus::Stopped => execute_on(
                &conn,
                id,
                "UPDATE channels SET status = ?, last_stop_time = ?, updated_at = ? WHERE id = ?",
                &[&status.as_str(), &at_str, &now, &id],
            )?,
            _ => execute_on(
                &conn,
                id,
                "UPDATE channels SET status = ?, updated_at = ? WHERE id = ?",
                &[&status.as_str(), &now, &id],
            )?,
        }
        Self::fetch(&conn, id)
    }

    async fn update_uptime(
        &self,
        id: &str,
        additional_secs: u64,
    ) -> Result<Channel, ChannelStoreError> {
        let conn = self.lock()?;
        let secs = i64::try_from(additional_secs).unwrap_or(i64::MAX);
        execute_on(
            &conn,
            id,
            "UPDATE channels SET total_uptime_secs = total_uptime_secs + ?, updated_at = ? WHERE id = ?",
            &[&secs, &Utc::now().to_rfc3339(), &id],
        )?;
        Self::fetch(&conn, id)
    }

    async fn increment_restart_count(&self, id: &str) -> Result<Channel, ChannelStoreError> {
        let conn = self.lock()?;
        execute_on(
            &conn,
            id,
            "UPDATE channels SET restart_count = restart_count + 1, updated_at = ? WHERE id = ?",
            &[&Utc::now().to_rfc3339(), &id],
        )?;
        Self::fetch(&conn, id)
    }

    async fn delete(&self, id: &str) -> Result<(), ChannelStoreError> {
        let conn = self.lock()?;
        execute_on(&conn, id, "DELETE FROM channels WHERE id = ?", &[&id])
    }
}
