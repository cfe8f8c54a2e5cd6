//! Scheduled follow-up visits

use super::{timestamp, ServiceContext, OWNER_SCOPE};
use crate::error::{SyncError, SyncResult};
use crate::record::{RecordType, SyncAction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledVisit {
    pub id: i64,
    pub patient_id: i64,
    pub scheduled_date: String,
    pub visit_type: String,
    pub notes: Option<String>,
    /// `scheduled`, `completed` or `cancelled`
    pub status: String,
    pub asha_id: Option<String>,
    pub synced: bool,
    pub remote_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewScheduledVisit {
    pub patient_id: i64,
    pub scheduled_date: String,
    pub visit_type: String,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct ScheduleService {
    ctx: ServiceContext,
}

impl ScheduleService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, input: NewScheduledVisit) -> SyncResult<ScheduledVisit> {
        let owner = self.ctx.current_owner().await;
        let now = timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_visits (patient_id, scheduled_date, visit_type, notes, status,
                                          asha_id, synced, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'scheduled', ?, 0, ?, ?)
            "#,
        )
        .bind(input.patient_id)
        .bind(&input.scheduled_date)
        .bind(&input.visit_type)
        .bind(&input.notes)
        .bind(&owner)
        .bind(&now)
        .bind(&now)
        .execute(self.ctx.pool())
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(schedule_id = id, date = %input.scheduled_date, "Visit scheduled");

        self.ctx.record_mutation(RecordType::ScheduledVisit, id, SyncAction::Create).await;
        self.ctx.reload(RecordType::ScheduledVisit, id).await
    }

    pub async fn get(&self, id: i64) -> SyncResult<Option<ScheduledVisit>> {
        self.ctx.get_scoped(RecordType::ScheduledVisit, id).await
    }

    pub async fn list(&self) -> SyncResult<Vec<ScheduledVisit>> {
        self.ctx
            .list_scoped(RecordType::ScheduledVisit, "scheduled_date, id")
            .await
    }

    /// Still-open visits on or after `from` (`YYYY-MM-DD`), soonest first
    pub async fn list_upcoming(&self, from: &str) -> SyncResult<Vec<ScheduledVisit>> {
        let owner = self.ctx.current_owner().await;
        let visits = sqlx::query_as::<_, ScheduledVisit>(&format!(
            r#"
            SELECT * FROM scheduled_visits
            WHERE status = 'scheduled' AND scheduled_date >= ? AND {OWNER_SCOPE}
            ORDER BY scheduled_date, id
            "#
        ))
        .bind(from)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .fetch_all(self.ctx.pool())
        .await?;

        Ok(visits)
    }

    pub async fn complete(&self, id: i64) -> SyncResult<ScheduledVisit> {
        self.set_status(id, "completed").await
    }

    pub async fn cancel(&self, id: i64) -> SyncResult<ScheduledVisit> {
        self.set_status(id, "cancelled").await
    }

    async fn set_status(&self, id: i64, status: &str) -> SyncResult<ScheduledVisit> {
        let owner = self.ctx.current_owner().await;
        let result = sqlx::query(&format!(
            "UPDATE scheduled_visits SET status = ?, synced = 0, updated_at = ? WHERE id = ? AND {OWNER_SCOPE}"
        ))
        .bind(status)
        .bind(timestamp())
        .bind(id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .execute(self.ctx.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("scheduled visit {}", id)));
        }

        tracing::debug!(schedule_id = id, status, "Scheduled visit status changed");

        self.ctx
            .record_mutation(RecordType::ScheduledVisit, id, SyncAction::Update)
            .await;
        self.ctx.reload(RecordType::ScheduledVisit, id).await
    }

    pub async fn delete(&self, id: i64) -> SyncResult<()> {
        self.ctx.delete_tracked(&[(RecordType::ScheduledVisit, id)]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::context;

    fn new_schedule(date: &str) -> NewScheduledVisit {
        NewScheduledVisit {
            patient_id: 3,
            scheduled_date: date.to_string(),
            visit_type: "pnc".to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_upcoming_excludes_past_and_closed() {
        let (ctx, _session, _dir) = context(Some("asha-1")).await;
        let service = ScheduleService::new(ctx);

        service.create(new_schedule("2026-01-01")).await.unwrap();
        let done = service.create(new_schedule("2026-02-01")).await.unwrap();
        let cancelled = service.create(new_schedule("2026-02-02")).await.unwrap();
        let open = service.create(new_schedule("2026-02-03")).await.unwrap();

        service.complete(done.id).await.unwrap();
        let cancelled = service.cancel(cancelled.id).await.unwrap();
        assert_eq!(cancelled.status, "cancelled");

        let upcoming = service.list_upcoming("2026-01-15").await.unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, open.id);
        assert_eq!(service.list().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_status_change_is_queued() {
        let (ctx, _session, _dir) = context(Some("asha-1")).await;
        let service = ScheduleService::new(ctx.clone());
        let visit = service.create(new_schedule("2026-03-01")).await.unwrap();

        let completed = service.complete(visit.id).await.unwrap();
        assert_eq!(completed.status, "completed");

        let entries = ctx
            .queue()
            .entries_for(RecordType::ScheduledVisit, visit.id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].payload_object()["status"], serde_json::json!("completed"));
    }
}
