//! Local SQLite database for offline-first operations
//!
//! Provides:
//! - Connection pool and pragmas (WAL, foreign keys)
//! - Schema for the sync queue and every syncable entity table
//! - Generic row snapshots used as queue payloads

use crate::error::SyncResult;
use crate::record::RecordType;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;

/// Configuration for local database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalDbConfig {
    /// Path to the database file
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self {
            db_path: "asha_local.db".to_string(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

/// Local database handle
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open (creating if needed) the database and initialize the schema
    pub async fn new(config: &LocalDbConfig) -> SyncResult<Self> {
        let journal_mode = if config.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.db_path))?
            .create_if_missing(true)
            .journal_mode(journal_mode)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.initialize_schema().await?;

        tracing::debug!(db_path = %config.db_path, "Local database opened");

        Ok(db)
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_type TEXT NOT NULL,
                record_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                last_attempt TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_queue_record ON sync_queue(record_type, record_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                age INTEGER,
                gender TEXT,
                phone TEXT,
                address TEXT,
                village TEXT,
                is_pregnant INTEGER NOT NULL DEFAULT 0,
                asha_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                remote_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id INTEGER NOT NULL,
                visit_date TEXT NOT NULL,
                visit_type TEXT NOT NULL,
                notes TEXT,
                blood_pressure TEXT,
                weight_kg REAL,
                asha_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                remote_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vaccinations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id INTEGER NOT NULL,
                vaccine_name TEXT NOT NULL,
                dose_number INTEGER NOT NULL DEFAULT 1,
                due_date TEXT,
                given_date TEXT,
                status TEXT NOT NULL DEFAULT 'due',
                asha_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                remote_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_visits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id INTEGER NOT NULL,
                scheduled_date TEXT NOT NULL,
                visit_type TEXT NOT NULL,
                notes TEXT,
                status TEXT NOT NULL DEFAULT 'scheduled',
                asha_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                remote_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id INTEGER,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                kind TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                asha_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                remote_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pregnancy_details (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id INTEGER NOT NULL UNIQUE,
                lmp_date TEXT,
                edd_date TEXT,
                gravida INTEGER,
                para INTEGER,
                high_risk INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                asha_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                remote_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for table in ["visits", "vaccinations", "scheduled_visits"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_patient ON {table}(patient_id)"
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Get database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close database connection
    pub async fn close(self) -> SyncResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Read the current row of `record_type`/`record_id` as a JSON object.
///
/// Returns `Ok(None)` when the row does not exist.
pub async fn snapshot_row(
    conn: &mut SqliteConnection,
    record_type: RecordType,
    record_id: i64,
) -> SyncResult<Option<serde_json::Map<String, serde_json::Value>>> {
    let row = sqlx::query(&format!("SELECT * FROM {} WHERE id = ?", record_type.table()))
        .bind(record_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| row_to_json(&row)).transpose()
}

/// Convert an arbitrary SQLite row into a JSON object keyed by column name
pub fn row_to_json(row: &SqliteRow) -> SyncResult<serde_json::Map<String, serde_json::Value>> {
    use serde_json::Value;

    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
                "REAL" | "FLOAT" | "DOUBLE" => Value::from(row.try_get::<f64, _>(index)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(index)?;
                    Value::from(general_purpose::STANDARD.encode(bytes))
                }
                _ => Value::from(row.try_get::<String, _>(index)?),
            }
        };

        object.insert(column.name().to_string(), value);
    }

    Ok(object)
}
