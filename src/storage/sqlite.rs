use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{ConnectionProfile, ConnectionProfileRequest, EngineKind, Sensitive};

const PROFILE_COLUMNS: &str = "id, name, engine_kind, host, port, database, catalog, schema, \
     username, secret_credential, created_at, updated_at";

/// SQLite storage for connection profiles
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            let mut cleaned = path_str.trim_start_matches("sqlite:");
            cleaned = cleaned.trim_start_matches("//");
            cleaned
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// In-memory store, used by tests and ephemeral deployments.
    pub async fn in_memory() -> SqliteResult<Self> {
        let storage = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS connection_profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                engine_kind TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                database TEXT NOT NULL,
                catalog TEXT,
                schema TEXT,
                username TEXT NOT NULL,
                secret_credential TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_connection_profiles_kind ON connection_profiles(engine_kind)",
            [],
        )?;

        Ok(())
    }

    /// Insert a new profile and return it with its assigned id
    pub async fn insert_profile(
        &self,
        request: &ConnectionProfileRequest,
        secret: &str,
    ) -> SqliteResult<ConnectionProfile> {
        let now = Utc::now();
        let db_conn = self.conn.lock().await;
        db_conn.execute(
            r#"
            INSERT INTO connection_profiles
            (name, engine_kind, host, port, database, catalog, schema, username, secret_credential, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            rusqlite::params![
                request.name,
                request.engine_kind.as_str(),
                request.host.trim(),
                request.port,
                request.database.trim(),
                request.catalog,
                request.schema,
                request.username.trim(),
                secret,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        let id = db_conn.last_insert_rowid();

        Ok(ConnectionProfile {
            id,
            name: request.name.clone(),
            engine_kind: request.engine_kind,
            host: request.host.trim().to_string(),
            port: request.port,
            database: request.database.trim().to_string(),
            catalog: request.catalog.clone(),
            schema: request.schema.clone(),
            username: request.username.trim().to_string(),
            secret_credential: Sensitive::new(secret.to_string()),
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrite a stored profile. Returns false when the id is unknown.
    pub async fn update_profile(&self, profile: &ConnectionProfile) -> SqliteResult<bool> {
        let db_conn = self.conn.lock().await;
        let rows_affected = db_conn.execute(
            r#"
            UPDATE connection_profiles
            SET name = ?2, engine_kind = ?3, host = ?4, port = ?5, database = ?6, catalog = ?7,
                schema = ?8, username = ?9, secret_credential = ?10, updated_at = ?11
            WHERE id = ?1
            "#,
            rusqlite::params![
                profile.id,
                profile.name,
                profile.engine_kind.as_str(),
                profile.host,
                profile.port,
                profile.database,
                profile.catalog,
                profile.schema,
                profile.username,
                profile.secret_credential.expose(),
                profile.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a profile by ID
    pub async fn get_profile(&self, id: i64) -> SqliteResult<Option<ConnectionProfile>> {
        let db_conn = self.conn.lock().await;
        let mut stmt = db_conn.prepare(&format!(
            "SELECT {} FROM connection_profiles WHERE id = ?1",
            PROFILE_COLUMNS
        ))?;

        stmt.query_row(rusqlite::params![id], profile_from_row).optional()
    }

    /// List all profiles, newest first
    pub async fn list_profiles(&self) -> SqliteResult<Vec<ConnectionProfile>> {
        let db_conn = self.conn.lock().await;
        let mut stmt = db_conn.prepare(&format!(
            "SELECT {} FROM connection_profiles ORDER BY id DESC",
            PROFILE_COLUMNS
        ))?;

        let rows = stmt.query_map([], profile_from_row)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?);
        }
        Ok(profiles)
    }

    /// Delete a profile
    pub async fn delete_profile(&self, id: i64) -> SqliteResult<bool> {
        let db_conn = self.conn.lock().await;
        let rows_affected = db_conn.execute(
            "DELETE FROM connection_profiles WHERE id = ?1",
            rusqlite::params![id],
        )?;
        Ok(rows_affected > 0)
    }
}

fn profile_from_row(row: &Row<'_>) -> SqliteResult<ConnectionProfile> {
    let engine_kind: String = row.get(2)?;
    let engine_kind = EngineKind::from_str(&engine_kind).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
    })?;

    Ok(ConnectionProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        engine_kind,
        host: row.get(3)?,
        port: row.get(4)?,
        database: row.get(5)?,
        catalog: row.get(6)?,
        schema: row.get(7)?,
        username: row.get(8)?,
        secret_credential: Sensitive::new(row.get(9)?),
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> SqliteResult<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
