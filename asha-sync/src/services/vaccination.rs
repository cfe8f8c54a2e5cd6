//! Immunization tracking

use super::{timestamp, ServiceContext, OWNER_SCOPE};
use crate::error::{SyncError, SyncResult};
use crate::record::{RecordType, SyncAction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vaccination {
    pub id: i64,
    pub patient_id: i64,
    pub vaccine_name: String,
    pub dose_number: i64,
    pub due_date: Option<String>,
    pub given_date: Option<String>,
    /// `due` or `given`
    pub status: String,
    pub asha_id: Option<String>,
    pub synced: bool,
    pub remote_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVaccination {
    pub patient_id: i64,
    pub vaccine_name: String,
    pub dose_number: i64,
    pub due_date: Option<String>,
}

impl Default for NewVaccination {
    fn default() -> Self {
        Self {
            patient_id: 0,
            vaccine_name: String::new(),
            dose_number: 1,
            due_date: None,
        }
    }
}

#[derive(Clone)]
pub struct VaccinationService {
    ctx: ServiceContext,
}

impl VaccinationService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, input: NewVaccination) -> SyncResult<Vaccination> {
        let owner = self.ctx.current_owner().await;
        let now = timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO vaccinations (patient_id, vaccine_name, dose_number, due_date, status,
                                      asha_id, synced, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'due', ?, 0, ?, ?)
            "#,
        )
        .bind(input.patient_id)
        .bind(&input.vaccine_name)
        .bind(input.dose_number)
        .bind(&input.due_date)
        .bind(&owner)
        .bind(&now)
        .bind(&now)
        .execute(self.ctx.pool())
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(vaccination_id = id, vaccine = %input.vaccine_name, "Vaccination scheduled");

        self.ctx.record_mutation(RecordType::Vaccination, id, SyncAction::Create).await;
        self.ctx.reload(RecordType::Vaccination, id).await
    }

    pub async fn get(&self, id: i64) -> SyncResult<Option<Vaccination>> {
        self.ctx.get_scoped(RecordType::Vaccination, id).await
    }

    /// Soonest due first; undated entries last
    pub async fn list(&self) -> SyncResult<Vec<Vaccination>> {
        self.ctx
            .list_scoped(RecordType::Vaccination, "due_date IS NULL, due_date, id")
            .await
    }

    pub async fn list_for_patient(&self, patient_id: i64) -> SyncResult<Vec<Vaccination>> {
        self.ctx
            .list_for_patient(RecordType::Vaccination, patient_id, "due_date IS NULL, due_date, id")
            .await
    }

    /// Record that the dose was administered on `given_date`
    pub async fn mark_given(&self, id: i64, given_date: &str) -> SyncResult<Vaccination> {
        let owner = self.ctx.current_owner().await;
        let result = sqlx::query(&format!(
            r#"
            UPDATE vaccinations
            SET status = 'given', given_date = ?, synced = 0, updated_at = ?
            WHERE id = ? AND {OWNER_SCOPE}
            "#
        ))
        .bind(given_date)
        .bind(timestamp())
        .bind(id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .execute(self.ctx.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("vaccination {}", id)));
        }

        self.ctx.record_mutation(RecordType::Vaccination, id, SyncAction::Update).await;
        self.ctx.reload(RecordType::Vaccination, id).await
    }

    pub async fn delete(&self, id: i64) -> SyncResult<()> {
        self.ctx.delete_tracked(&[(RecordType::Vaccination, id)]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::context;

    #[tokio::test]
    async fn test_mark_given() {
        let (ctx, _session, _dir) = context(Some("asha-1")).await;
        let service = VaccinationService::new(ctx.clone());
        let vaccination = service
            .create(NewVaccination {
                patient_id: 4,
                vaccine_name: "TT".to_string(),
                due_date: Some("2026-06-01".to_string()),
                ..NewVaccination::default()
            })
            .await
            .unwrap();
        assert_eq!(vaccination.status, "due");
        assert_eq!(vaccination.dose_number, 1);

        let given = service.mark_given(vaccination.id, "2026-05-30").await.unwrap();
        assert_eq!(given.status, "given");
        assert_eq!(given.given_date.as_deref(), Some("2026-05-30"));
        assert!(!given.synced);

        let entries = ctx.queue().entries_for(RecordType::Vaccination, vaccination.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, SyncAction::Update);
    }

    #[tokio::test]
    async fn test_list_orders_undated_last() {
        let (ctx, _session, _dir) = context(None).await;
        let service = VaccinationService::new(ctx);
        for (name, due) in [("OPV", None), ("BCG", Some("2026-01-10")), ("Penta", Some("2026-01-05"))] {
            service
                .create(NewVaccination {
                    patient_id: 1,
                    vaccine_name: name.to_string(),
                    due_date: due.map(str::to_string),
                    ..NewVaccination::default()
                })
                .await
                .unwrap();
        }

        let names: Vec<String> = service
            .list_for_patient(1)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.vaccine_name)
            .collect();
        assert_eq!(names, vec!["Penta", "BCG", "OPV"]);
    }

    #[tokio::test]
    async fn test_mark_given_missing() {
        let (ctx, _session, _dir) = context(Some("asha-1")).await;
        let service = VaccinationService::new(ctx);
        assert!(matches!(
            service.mark_given(7, "2026-01-01").await,
            Err(SyncError::NotFound(_))
        ));
    }
}
