//! Entity services
//!
//! Provides:
//! - Local CRUD for every syncable record type
//! - One outbox entry per successful local write
//! - Owner-scoped reads and writes (`asha_id = principal OR asha_id IS NULL`)
//! - Transactional deletes that enqueue each row's snapshot before removing it
//!
//! Writes never wait on the network. When a [`SyncManager`] is attached,
//! every tracked write starts a detached reconciliation pass.

pub mod notification;
pub mod patient;
pub mod pregnancy;
pub mod schedule;
pub mod vaccination;
pub mod visit;

pub use notification::{NewNotification, Notification, NotificationService};
pub use patient::{NewPatient, Patient, PatientService, PatientUpdate};
pub use pregnancy::{PregnancyDetails, PregnancyDetailsInput, PregnancyService};
pub use schedule::{NewScheduledVisit, ScheduleService, ScheduledVisit};
pub use vaccination::{NewVaccination, Vaccination, VaccinationService};
pub use visit::{NewVisit, Visit, VisitService, VisitUpdate};

use crate::auth::PrincipalProvider;
use crate::error::{SyncError, SyncResult};
use crate::queue::{OutboxQueue, QueueEntry};
use crate::reconciler::{SyncManager, SyncReason};
use crate::record::{RecordType, SyncAction};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::sync::Arc;

/// Owner filter appended to every read, update and delete. Bind the owner
/// twice; a `NULL` owner disables scoping.
pub(crate) const OWNER_SCOPE: &str = "(? IS NULL OR asha_id = ? OR asha_id IS NULL)";

/// Shared handles for all entity services
#[derive(Clone)]
pub struct ServiceContext {
    queue: OutboxQueue,
    auth: Arc<dyn PrincipalProvider>,
    sync: Option<Arc<SyncManager>>,
}

impl ServiceContext {
    pub fn new(queue: OutboxQueue, auth: Arc<dyn PrincipalProvider>) -> Self {
        Self { queue, auth, sync: None }
    }

    /// Start a detached pass after every tracked write
    pub fn with_sync(mut self, sync: Arc<SyncManager>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        self.queue.database().pool()
    }

    pub fn queue(&self) -> &OutboxQueue {
        &self.queue
    }

    /// Principal that owns new rows and scopes reads
    pub async fn current_owner(&self) -> Option<String> {
        self.auth.current_principal().await
    }

    /// Enqueue a completed local write and nudge the reconciler.
    pub(crate) async fn record_mutation(
        &self,
        record_type: RecordType,
        record_id: i64,
        action: SyncAction,
    ) -> Option<QueueEntry> {
        let entry = self.queue.enqueue(record_type, record_id, action).await;
        self.trigger_sync();
        entry
    }

    fn trigger_sync(&self) {
        if let Some(sync) = &self.sync {
            // Detached; the outcome is logged by the reconciler.
            drop(sync.trigger(SyncReason::LocalMutation));
        }
    }

    /// Fetch one row by id, scoped to the current owner
    pub(crate) async fn get_scoped<T>(&self, record_type: RecordType, id: i64) -> SyncResult<Option<T>>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let owner = self.current_owner().await;
        let row = sqlx::query_as::<_, T>(&format!(
            "SELECT * FROM {} WHERE id = ? AND {OWNER_SCOPE}",
            record_type.table()
        ))
        .bind(id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// All rows visible to the current owner
    pub(crate) async fn list_scoped<T>(&self, record_type: RecordType, order_by: &str) -> SyncResult<Vec<T>>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let owner = self.current_owner().await;
        let rows = sqlx::query_as::<_, T>(&format!(
            "SELECT * FROM {} WHERE {OWNER_SCOPE} ORDER BY {order_by}",
            record_type.table()
        ))
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Rows of `record_type` belonging to one patient, scoped to the owner
    pub(crate) async fn list_for_patient<T>(
        &self,
        record_type: RecordType,
        patient_id: i64,
        order_by: &str,
    ) -> SyncResult<Vec<T>>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let owner = self.current_owner().await;
        let rows = sqlx::query_as::<_, T>(&format!(
            "SELECT * FROM {} WHERE patient_id = ? AND {OWNER_SCOPE} ORDER BY {order_by}",
            record_type.table()
        ))
        .bind(patient_id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Load a row a mutation just touched, failing if it vanished
    pub(crate) async fn reload<T>(&self, record_type: RecordType, id: i64) -> SyncResult<T>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        sqlx::query_as::<_, T>(&format!("SELECT * FROM {} WHERE id = ?", record_type.table()))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("{} {}", record_type, id)))
    }

    /// Delete rows in one transaction, enqueueing a delete entry with the
    /// row snapshot ahead of each removal.
    ///
    /// Either every row is gone and every entry is queued, or nothing
    /// changed. A target that is missing or owned by another worker fails
    /// the whole delete with [`SyncError::NotFound`]. Returns the number of
    /// rows deleted.
    pub(crate) async fn delete_tracked(&self, targets: &[(RecordType, i64)]) -> SyncResult<usize> {
        let owner = self.current_owner().await;
        let mut tx = self.pool().begin().await?;

        match self.delete_rows(&mut tx, targets, owner.as_deref()).await {
            Ok(deleted) => {
                tx.commit().await?;
                tracing::debug!(deleted, queued = targets.len(), "Tracked delete committed");
                self.trigger_sync();
                Ok(deleted)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "Rollback of tracked delete failed");
                }
                tracing::warn!(error = %e, "Tracked delete rolled back");
                Err(e)
            }
        }
    }

    async fn delete_rows(
        &self,
        conn: &mut SqliteConnection,
        targets: &[(RecordType, i64)],
        owner: Option<&str>,
    ) -> SyncResult<usize> {
        let mut deleted = 0;

        for &(record_type, record_id) in targets {
            self.queue
                .enqueue_with(conn, record_type, record_id, SyncAction::Delete)
                .await?;

            let result = sqlx::query(&format!(
                "DELETE FROM {} WHERE id = ? AND {OWNER_SCOPE}",
                record_type.table()
            ))
            .bind(record_id)
            .bind(owner)
            .bind(owner)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(SyncError::NotFound(format!("{} {}", record_type, record_id)));
            }
            deleted += 1;
        }

        Ok(deleted)
    }

    /// Ids of `record_type` rows attached to a patient, scoped to the owner
    pub(crate) async fn dependent_ids(&self, record_type: RecordType, patient_id: i64) -> SyncResult<Vec<i64>> {
        let owner = self.current_owner().await;
        let rows = sqlx::query(&format!(
            "SELECT id FROM {} WHERE patient_id = ? AND {OWNER_SCOPE} ORDER BY id",
            record_type.table()
        ))
        .bind(patient_id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(SyncError::from))
            .collect()
    }
}

/// Current time as stored in `created_at`/`updated_at`
pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::Session;
    use crate::local_db::{LocalDatabase, LocalDbConfig};
    use tempfile::TempDir;

    /// Context on a fresh temp database, signed in as `principal`
    pub async fn context(principal: Option<&str>) -> (ServiceContext, Arc<Session>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = LocalDbConfig {
            db_path: dir.path().join("services.db").to_str().unwrap().to_string(),
            ..LocalDbConfig::default()
        };
        let db = LocalDatabase::new(&config).await.unwrap();

        let session = Arc::new(match principal {
            Some(id) => Session::signed_in(id),
            None => Session::new(),
        });
        let ctx = ServiceContext::new(OutboxQueue::new(db), session.clone());

        (ctx, session, dir)
    }
}
