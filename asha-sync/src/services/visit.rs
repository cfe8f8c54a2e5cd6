//! Home and clinic visits

use super::{timestamp, ServiceContext, OWNER_SCOPE};
use crate::error::{SyncError, SyncResult};
use crate::record::{RecordType, SyncAction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Visit {
    pub id: i64,
    pub patient_id: i64,
    pub visit_date: String,
    /// e.g. `anc`, `pnc`, `immunization`, `general`
    pub visit_type: String,
    pub notes: Option<String>,
    pub blood_pressure: Option<String>,
    pub weight_kg: Option<f64>,
    pub asha_id: Option<String>,
    pub synced: bool,
    pub remote_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewVisit {
    pub patient_id: i64,
    pub visit_date: String,
    pub visit_type: String,
    pub notes: Option<String>,
    pub blood_pressure: Option<String>,
    pub weight_kg: Option<f64>,
}

/// Partial update; `None` keeps the stored value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitUpdate {
    pub visit_date: Option<String>,
    pub visit_type: Option<String>,
    pub notes: Option<String>,
    pub blood_pressure: Option<String>,
    pub weight_kg: Option<f64>,
}

#[derive(Clone)]
pub struct VisitService {
    ctx: ServiceContext,
}

impl VisitService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, input: NewVisit) -> SyncResult<Visit> {
        let owner = self.ctx.current_owner().await;
        let now = timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO visits (patient_id, visit_date, visit_type, notes, blood_pressure, weight_kg,
                                asha_id, synced, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(input.patient_id)
        .bind(&input.visit_date)
        .bind(&input.visit_type)
        .bind(&input.notes)
        .bind(&input.blood_pressure)
        .bind(input.weight_kg)
        .bind(&owner)
        .bind(&now)
        .bind(&now)
        .execute(self.ctx.pool())
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(visit_id = id, patient_id = input.patient_id, "Visit recorded");

        self.ctx.record_mutation(RecordType::Visit, id, SyncAction::Create).await;
        self.ctx.reload(RecordType::Visit, id).await
    }

    pub async fn get(&self, id: i64) -> SyncResult<Option<Visit>> {
        self.ctx.get_scoped(RecordType::Visit, id).await
    }

    /// Most recent first
    pub async fn list(&self) -> SyncResult<Vec<Visit>> {
        self.ctx.list_scoped(RecordType::Visit, "visit_date DESC, id DESC").await
    }

    pub async fn list_for_patient(&self, patient_id: i64) -> SyncResult<Vec<Visit>> {
        self.ctx
            .list_for_patient(RecordType::Visit, patient_id, "visit_date DESC, id DESC")
            .await
    }

    pub async fn update(&self, id: i64, update: VisitUpdate) -> SyncResult<Visit> {
        let owner = self.ctx.current_owner().await;
        let result = sqlx::query(&format!(
            r#"
            UPDATE visits
            SET visit_date = COALESCE(?, visit_date),
                visit_type = COALESCE(?, visit_type),
                notes = COALESCE(?, notes),
                blood_pressure = COALESCE(?, blood_pressure),
                weight_kg = COALESCE(?, weight_kg),
                synced = 0,
                updated_at = ?
            WHERE id = ? AND {OWNER_SCOPE}
            "#
        ))
        .bind(&update.visit_date)
        .bind(&update.visit_type)
        .bind(&update.notes)
        .bind(&update.blood_pressure)
        .bind(update.weight_kg)
        .bind(timestamp())
        .bind(id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .execute(self.ctx.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("visit {}", id)));
        }

        self.ctx.record_mutation(RecordType::Visit, id, SyncAction::Update).await;
        self.ctx.reload(RecordType::Visit, id).await
    }

    pub async fn delete(&self, id: i64) -> SyncResult<()> {
        self.ctx.delete_tracked(&[(RecordType::Visit, id)]).await?;
        tracing::info!(visit_id = id, "Visit deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::context;

    fn new_visit(patient_id: i64, date: &str) -> NewVisit {
        NewVisit {
            patient_id,
            visit_date: date.to_string(),
            visit_type: "anc".to_string(),
            weight_kg: Some(54.5),
            ..NewVisit::default()
        }
    }

    #[tokio::test]
    async fn test_list_for_patient_newest_first() {
        let (ctx, _session, _dir) = context(Some("asha-1")).await;
        let service = VisitService::new(ctx);

        service.create(new_visit(1, "2026-02-01")).await.unwrap();
        service.create(new_visit(1, "2026-03-01")).await.unwrap();
        service.create(new_visit(2, "2026-04-01")).await.unwrap();

        let visits = service.list_for_patient(1).await.unwrap();
        let dates: Vec<&str> = visits.iter().map(|v| v.visit_date.as_str()).collect();
        assert_eq!(dates, vec!["2026-03-01", "2026-02-01"]);
        assert_eq!(service.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_and_delete_are_queued_in_order() {
        let (ctx, _session, _dir) = context(Some("asha-1")).await;
        let service = VisitService::new(ctx.clone());
        let visit = service.create(new_visit(1, "2026-02-01")).await.unwrap();

        let updated = service
            .update(
                visit.id,
                VisitUpdate {
                    blood_pressure: Some("110/70".to_string()),
                    ..VisitUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.blood_pressure.as_deref(), Some("110/70"));
        assert_eq!(updated.weight_kg, Some(54.5));

        service.delete(visit.id).await.unwrap();

        let actions: Vec<SyncAction> = ctx
            .queue()
            .entries_for(RecordType::Visit, visit.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![SyncAction::Create, SyncAction::Update, SyncAction::Delete]);
    }

    #[tokio::test]
    async fn test_other_worker_cannot_update_or_delete() {
        let (ctx, session, _dir) = context(Some("asha-1")).await;
        let service = VisitService::new(ctx.clone());
        let visit = service.create(new_visit(1, "2026-02-01")).await.unwrap();

        session.sign_in("asha-2", None);
        assert!(service.get(visit.id).await.unwrap().is_none());

        let update = service
            .update(
                visit.id,
                VisitUpdate {
                    notes: Some("overwritten".to_string()),
                    ..VisitUpdate::default()
                },
            )
            .await;
        assert!(matches!(update, Err(SyncError::NotFound(_))));
        assert!(matches!(service.delete(visit.id).await, Err(SyncError::NotFound(_))));

        let entries = ctx.queue().entries_for(RecordType::Visit, visit.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, SyncAction::Create);

        session.sign_in("asha-1", None);
        let stored = service.get(visit.id).await.unwrap().unwrap();
        assert_eq!(stored.notes, None);
    }

    #[tokio::test]
    async fn test_delete_missing_visit_queues_nothing() {
        let (ctx, _session, _dir) = context(Some("asha-1")).await;
        let service = VisitService::new(ctx.clone());

        assert!(matches!(service.delete(4242).await, Err(SyncError::NotFound(_))));
        assert_eq!(ctx.queue().pending_count().await.unwrap(), 0);
    }
}
