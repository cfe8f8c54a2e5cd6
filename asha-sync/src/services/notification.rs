//! In-app reminders for the field worker

use super::{timestamp, ServiceContext, OWNER_SCOPE};
use crate::error::{SyncError, SyncResult};
use crate::record::{RecordType, SyncAction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub patient_id: Option<i64>,
    pub title: String,
    pub message: String,
    /// e.g. `vaccination_due`, `visit_reminder`
    pub kind: String,
    pub is_read: bool,
    pub asha_id: Option<String>,
    pub synced: bool,
    pub remote_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNotification {
    pub patient_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub kind: String,
}

#[derive(Clone)]
pub struct NotificationService {
    ctx: ServiceContext,
}

impl NotificationService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, input: NewNotification) -> SyncResult<Notification> {
        let owner = self.ctx.current_owner().await;
        let now = timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO notifications (patient_id, title, message, kind, is_read,
                                       asha_id, synced, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, 0, ?, ?)
            "#,
        )
        .bind(input.patient_id)
        .bind(&input.title)
        .bind(&input.message)
        .bind(&input.kind)
        .bind(&owner)
        .bind(&now)
        .bind(&now)
        .execute(self.ctx.pool())
        .await?;

        let id = result.last_insert_rowid();
        self.ctx.record_mutation(RecordType::Notification, id, SyncAction::Create).await;
        self.ctx.reload(RecordType::Notification, id).await
    }

    /// Newest first
    pub async fn list(&self) -> SyncResult<Vec<Notification>> {
        self.ctx
            .list_scoped(RecordType::Notification, "created_at DESC, id DESC")
            .await
    }

    pub async fn mark_read(&self, id: i64) -> SyncResult<Notification> {
        let owner = self.ctx.current_owner().await;
        let result = sqlx::query(&format!(
            "UPDATE notifications SET is_read = 1, synced = 0, updated_at = ? WHERE id = ? AND {OWNER_SCOPE}"
        ))
        .bind(timestamp())
        .bind(id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .execute(self.ctx.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("notification {}", id)));
        }

        self.ctx.record_mutation(RecordType::Notification, id, SyncAction::Update).await;
        self.ctx.reload(RecordType::Notification, id).await
    }

    pub async fn delete(&self, id: i64) -> SyncResult<()> {
        self.ctx.delete_tracked(&[(RecordType::Notification, id)]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::context;

    #[tokio::test]
    async fn test_notification_lifecycle() {
        let (ctx, _session, _dir) = context(Some("asha-1")).await;
        let service = NotificationService::new(ctx.clone());

        let notification = service
            .create(NewNotification {
                patient_id: None,
                title: "TT dose due".to_string(),
                message: "Second TT dose due this week".to_string(),
                kind: "vaccination_due".to_string(),
            })
            .await
            .unwrap();
        assert!(!notification.is_read);

        let read = service.mark_read(notification.id).await.unwrap();
        assert!(read.is_read);

        service.delete(notification.id).await.unwrap();
        assert!(service.list().await.unwrap().is_empty());

        let actions: Vec<SyncAction> = ctx
            .queue()
            .entries_for(RecordType::Notification, notification.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![SyncAction::Create, SyncAction::Update, SyncAction::Delete]);
    }
}
