//! Durable outbox of pending local mutations
//!
//! Entity services append an entry after every local write; the reconciler
//! drains entries in ascending id order and removes each one only after the
//! remote store confirmed it. Outbox bookkeeping must never fail the write it
//! describes, so [`OutboxQueue::enqueue`] logs and swallows storage errors.

use crate::error::{SyncError, SyncResult};
use crate::local_db::{snapshot_row, LocalDatabase};
use crate::record::{QueueStatus, RecordType, SyncAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

/// One pending local-to-remote mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Surrogate key; insertion order is processing order
    pub id: i64,
    pub record_type: RecordType,
    /// Local id of the affected entity
    pub record_id: i64,
    pub action: SyncAction,
    /// JSON snapshot of the entity at enqueue time
    pub payload: String,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Payload as a JSON object; anything unparsable becomes `{}`
    pub fn payload_object(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::from_str::<serde_json::Value>(&self.payload) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!(entry_id = self.id, "Queue payload is not a JSON object, using empty payload");
                serde_json::Map::new()
            }
        }
    }

    fn from_row(row: &SqliteRow) -> SyncResult<Self> {
        let record_type: String = row.try_get("record_type")?;
        let action: String = row.try_get("action")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let last_attempt: Option<String> = row.try_get("last_attempt")?;

        Ok(Self {
            id: row.try_get("id")?,
            record_type: record_type.parse()?,
            record_id: row.try_get("record_id")?,
            action: action.parse()?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            created_at: parse_timestamp(&created_at)?,
            last_attempt: last_attempt.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(value: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))
}

const SELECT_ENTRY: &str = r#"
    SELECT id, record_type, record_id, action, payload, status,
           retry_count, last_error, created_at, last_attempt
    FROM sync_queue
"#;

/// SQLite-backed outbox
#[derive(Debug, Clone)]
pub struct OutboxQueue {
    db: LocalDatabase,
}

impl OutboxQueue {
    pub fn new(db: LocalDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }

    /// Append a pending entry for a mutation that already happened locally.
    ///
    /// Returns `None` (after logging) if the entry could not be stored; the
    /// record then stays unsynced until it is written again.
    pub async fn enqueue(
        &self,
        record_type: RecordType,
        record_id: i64,
        action: SyncAction,
    ) -> Option<QueueEntry> {
        let result: SyncResult<QueueEntry> = async {
            let mut conn = self.db.pool().acquire().await?;
            self.enqueue_with(&mut conn, record_type, record_id, action).await
        }
        .await;

        match result {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::error!(
                    record_type = %record_type,
                    record_id,
                    action = %action,
                    error = %e,
                    "Failed to enqueue mutation for sync"
                );
                None
            }
        }
    }

    /// Append a pending entry on a caller-owned connection or transaction.
    ///
    /// Unlike [`enqueue`](Self::enqueue) the insert error is returned, so a
    /// surrounding transaction can roll the entry back together with the
    /// entity writes. The snapshot itself is still best-effort.
    pub async fn enqueue_with(
        &self,
        conn: &mut SqliteConnection,
        record_type: RecordType,
        record_id: i64,
        action: SyncAction,
    ) -> SyncResult<QueueEntry> {
        let payload = match snapshot_row(conn, record_type, record_id).await {
            Ok(Some(snapshot)) => serde_json::Value::Object(snapshot),
            Ok(None) => {
                tracing::debug!(record_type = %record_type, record_id, "No row to snapshot, using empty payload");
                serde_json::json!({})
            }
            Err(e) => {
                tracing::warn!(record_type = %record_type, record_id, error = %e, "Snapshot failed, using empty payload");
                serde_json::json!({})
            }
        };

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (record_type, record_id, action, payload, status, retry_count, created_at)
            VALUES (?, ?, ?, ?, 'pending', 0, ?)
            "#,
        )
        .bind(record_type.as_str())
        .bind(record_id)
        .bind(action.as_str())
        .bind(payload.to_string())
        .bind(now.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        let entry = QueueEntry {
            id: result.last_insert_rowid(),
            record_type,
            record_id,
            action,
            payload: payload.to_string(),
            status: QueueStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            last_attempt: None,
        };

        tracing::debug!(
            entry_id = entry.id,
            record_type = %record_type,
            record_id,
            action = %action,
            "Queued mutation for sync"
        );

        Ok(entry)
    }

    /// Entries eligible for processing (`pending` and `failed`), oldest first.
    ///
    /// Rows that cannot be decoded are marked failed and left out.
    pub async fn list_pending(&self) -> SyncResult<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ENTRY} WHERE status IN ('pending', 'failed') ORDER BY id ASC"
        ))
        .fetch_all(self.db.pool())
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match QueueEntry::from_row(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let id: i64 = row.try_get("id")?;
                    tracing::warn!(entry_id = id, error = %e, "Skipping undecodable queue entry");
                    self.mark_failed(id, &e.to_string()).await?;
                }
            }
        }

        Ok(entries)
    }

    /// Fetch a single entry
    pub async fn get(&self, id: i64) -> SyncResult<Option<QueueEntry>> {
        let row = sqlx::query(&format!("{SELECT_ENTRY} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(QueueEntry::from_row).transpose()
    }

    /// All entries, in any state, for one record
    pub async fn entries_for(&self, record_type: RecordType, record_id: i64) -> SyncResult<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ENTRY} WHERE record_type = ? AND record_id = ? ORDER BY id ASC"
        ))
        .bind(record_type.as_str())
        .bind(record_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(QueueEntry::from_row).collect()
    }

    /// Entries whose last dispatch failed
    pub async fn failed_entries(&self) -> SyncResult<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!("{SELECT_ENTRY} WHERE status = 'failed' ORDER BY id ASC"))
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(QueueEntry::from_row).collect()
    }

    /// Number of entries not yet confirmed by the remote store
    pub async fn pending_count(&self) -> SyncResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM sync_queue WHERE status != 'completed'")
            .fetch_one(self.db.pool())
            .await?;

        Ok(row.try_get("count")?)
    }

    /// Delete an entry after its remote operation succeeded
    pub async fn remove(&self, id: i64) -> SyncResult<()> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        tracing::debug!(entry_id = id, "Removed synced queue entry");

        Ok(())
    }

    /// Stamp the entity with its remote id and complete its in-flight entries.
    ///
    /// Calling this again with the same arguments leaves the same state.
    pub async fn mark_synced(&self, record_type: RecordType, record_id: i64, remote_id: &str) -> SyncResult<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(&format!(
            "UPDATE {} SET synced = 1, remote_id = ? WHERE id = ?",
            record_type.table()
        ))
        .bind(remote_id)
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        // Only the entry being dispatched is in progress; later mutations of
        // the same record must stay pending.
        sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'completed'
            WHERE record_type = ? AND record_id = ? AND status = 'in_progress'
            "#,
        )
        .bind(record_type.as_str())
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(record_type = %record_type, record_id, remote_id, "Marked record as synced");

        Ok(())
    }

    /// Flag an entry as being dispatched
    pub async fn mark_in_progress(&self, id: i64) -> SyncResult<()> {
        sqlx::query("UPDATE sync_queue SET status = 'in_progress', last_attempt = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Record a failed dispatch and increment the retry counter
    pub async fn mark_failed(&self, id: i64, error: &str) -> SyncResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'failed',
                retry_count = retry_count + 1,
                last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        tracing::warn!(entry_id = id, error = error, "Queue entry sync failed");

        Ok(())
    }

    /// Put an entry back to `pending` without counting a failure
    pub async fn revert_to_pending(&self, id: i64) -> SyncResult<()> {
        sqlx::query("UPDATE sync_queue SET status = 'pending' WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Return entries stranded `in_progress` by an interrupted pass to `pending`
    pub async fn requeue_interrupted(&self) -> SyncResult<u64> {
        let result = sqlx::query("UPDATE sync_queue SET status = 'pending' WHERE status = 'in_progress'")
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() > 0 {
            tracing::info!(count = result.rows_affected(), "Requeued interrupted queue entries");
        }

        Ok(result.rows_affected())
    }

    /// Drop entries already marked completed
    pub async fn purge_completed(&self) -> SyncResult<u64> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE status = 'completed'")
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Current remote id of a local row, if the row exists and has synced
    pub async fn remote_id_of(&self, record_type: RecordType, record_id: i64) -> SyncResult<Option<String>> {
        let row = sqlx::query(&format!("SELECT remote_id FROM {} WHERE id = ?", record_type.table()))
            .bind(record_id)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => Ok(row.try_get("remote_id")?),
            None => Ok(None),
        }
    }
}
