//! Pregnancy details, at most one row per patient

use super::{timestamp, ServiceContext, OWNER_SCOPE};
use crate::error::{SyncError, SyncResult};
use crate::record::{RecordType, SyncAction};
use serde::{Deserialize, Serialize};
use sqlx::Row;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PregnancyDetails {
    pub id: i64,
    pub patient_id: i64,
    /// Last menstrual period
    pub lmp_date: Option<String>,
    /// Expected delivery date
    pub edd_date: Option<String>,
    pub gravida: Option<i64>,
    pub para: Option<i64>,
    pub high_risk: bool,
    pub notes: Option<String>,
    pub asha_id: Option<String>,
    pub synced: bool,
    pub remote_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PregnancyDetailsInput {
    pub lmp_date: Option<String>,
    pub edd_date: Option<String>,
    pub gravida: Option<i64>,
    pub para: Option<i64>,
    pub high_risk: bool,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct PregnancyService {
    ctx: ServiceContext,
}

impl PregnancyService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Insert or replace the patient's pregnancy details.
    ///
    /// Queued as a create the first time, as an update afterwards. Details
    /// recorded by another worker cannot be replaced.
    pub async fn upsert(&self, patient_id: i64, input: PregnancyDetailsInput) -> SyncResult<PregnancyDetails> {
        let existing = sqlx::query("SELECT id FROM pregnancy_details WHERE patient_id = ?")
            .bind(patient_id)
            .fetch_optional(self.ctx.pool())
            .await?;
        let owner = self.ctx.current_owner().await;
        let now = timestamp();

        let (id, action) = match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let result = sqlx::query(&format!(
                    r#"
                    UPDATE pregnancy_details
                    SET lmp_date = ?, edd_date = ?, gravida = ?, para = ?, high_risk = ?, notes = ?,
                        synced = 0, updated_at = ?
                    WHERE id = ? AND {OWNER_SCOPE}
                    "#
                ))
                .bind(&input.lmp_date)
                .bind(&input.edd_date)
                .bind(input.gravida)
                .bind(input.para)
                .bind(input.high_risk)
                .bind(&input.notes)
                .bind(&now)
                .bind(id)
                .bind(owner.as_deref())
                .bind(owner.as_deref())
                .execute(self.ctx.pool())
                .await?;

                if result.rows_affected() == 0 {
                    return Err(SyncError::NotFound(format!("pregnancy details for patient {}", patient_id)));
                }

                (id, SyncAction::Update)
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO pregnancy_details (patient_id, lmp_date, edd_date, gravida, para, high_risk,
                                                   notes, asha_id, synced, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                    "#,
                )
                .bind(patient_id)
                .bind(&input.lmp_date)
                .bind(&input.edd_date)
                .bind(input.gravida)
                .bind(input.para)
                .bind(input.high_risk)
                .bind(&input.notes)
                .bind(&owner)
                .bind(&now)
                .bind(&now)
                .execute(self.ctx.pool())
                .await?;

                (result.last_insert_rowid(), SyncAction::Create)
            }
        };

        tracing::info!(patient_id, pregnancy_id = id, action = %action, "Pregnancy details saved");

        self.ctx.record_mutation(RecordType::PregnancyDetails, id, action).await;
        self.ctx.reload(RecordType::PregnancyDetails, id).await
    }

    pub async fn get_for_patient(&self, patient_id: i64) -> SyncResult<Option<PregnancyDetails>> {
        let owner = self.ctx.current_owner().await;
        let details = sqlx::query_as::<_, PregnancyDetails>(&format!(
            "SELECT * FROM pregnancy_details WHERE patient_id = ? AND {OWNER_SCOPE}"
        ))
        .bind(patient_id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .fetch_optional(self.ctx.pool())
        .await?;

        Ok(details)
    }

    pub async fn delete(&self, id: i64) -> SyncResult<()> {
        self.ctx.delete_tracked(&[(RecordType::PregnancyDetails, id)]).await?;
        Ok(())
    }
}
