//! Patient registry

use super::{timestamp, ServiceContext, OWNER_SCOPE};
use crate::error::{SyncError, SyncResult};
use crate::record::{RecordType, SyncAction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub village: Option<String>,
    pub is_pregnant: bool,
    pub asha_id: Option<String>,
    pub synced: bool,
    pub remote_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub village: Option<String>,
    pub is_pregnant: bool,
}

/// Partial update; `None` keeps the stored value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub village: Option<String>,
    pub is_pregnant: Option<bool>,
}

/// Dependent record types removed together with their patient, in
/// deletion order
const DEPENDENTS: [RecordType; 5] = [
    RecordType::Visit,
    RecordType::Vaccination,
    RecordType::ScheduledVisit,
    RecordType::Notification,
    RecordType::PregnancyDetails,
];

#[derive(Clone)]
pub struct PatientService {
    ctx: ServiceContext,
}

impl PatientService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, input: NewPatient) -> SyncResult<Patient> {
        if input.name.trim().is_empty() {
            return Err(SyncError::InvalidOperation("Patient name is required".to_string()));
        }

        let owner = self.ctx.current_owner().await;
        let now = timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO patients (name, age, gender, phone, address, village, is_pregnant,
                                  asha_id, synced, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&input.name)
        .bind(input.age)
        .bind(&input.gender)
        .bind(&input.phone)
        .bind(&input.address)
        .bind(&input.village)
        .bind(input.is_pregnant)
        .bind(&owner)
        .bind(&now)
        .bind(&now)
        .execute(self.ctx.pool())
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(patient_id = id, "Patient created");

        self.ctx.record_mutation(RecordType::Patient, id, SyncAction::Create).await;
        self.ctx.reload(RecordType::Patient, id).await
    }

    pub async fn get(&self, id: i64) -> SyncResult<Option<Patient>> {
        self.ctx.get_scoped(RecordType::Patient, id).await
    }

    /// Patients visible to the signed-in worker, alphabetically
    pub async fn list(&self) -> SyncResult<Vec<Patient>> {
        self.ctx.list_scoped(RecordType::Patient, "name COLLATE NOCASE, id").await
    }

    pub async fn update(&self, id: i64, update: PatientUpdate) -> SyncResult<Patient> {
        let owner = self.ctx.current_owner().await;
        let result = sqlx::query(&format!(
            r#"
            UPDATE patients
            SET name = COALESCE(?, name),
                age = COALESCE(?, age),
                gender = COALESCE(?, gender),
                phone = COALESCE(?, phone),
                address = COALESCE(?, address),
                village = COALESCE(?, village),
                is_pregnant = COALESCE(?, is_pregnant),
                synced = 0,
                updated_at = ?
            WHERE id = ? AND {OWNER_SCOPE}
            "#
        ))
        .bind(&update.name)
        .bind(update.age)
        .bind(&update.gender)
        .bind(&update.phone)
        .bind(&update.address)
        .bind(&update.village)
        .bind(update.is_pregnant)
        .bind(timestamp())
        .bind(id)
        .bind(owner.as_deref())
        .bind(owner.as_deref())
        .execute(self.ctx.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("patient {}", id)));
        }

        self.ctx.record_mutation(RecordType::Patient, id, SyncAction::Update).await;
        self.ctx.reload(RecordType::Patient, id).await
    }

    /// Delete a patient and everything recorded against them.
    ///
    /// Dependents go first, the patient row last; every removed row gets
    /// its own delete entry. A failure anywhere leaves all rows and the
    /// queue untouched.
    pub async fn delete(&self, id: i64) -> SyncResult<()> {
        if self.get(id).await?.is_none() {
            return Err(SyncError::NotFound(format!("patient {}", id)));
        }

        let mut targets = Vec::new();
        for record_type in DEPENDENTS {
            for dependent_id in self.ctx.dependent_ids(record_type, id).await? {
                targets.push((record_type, dependent_id));
            }
        }
        targets.push((RecordType::Patient, id));

        let deleted = self.ctx.delete_tracked(&targets).await?;
        tracing::info!(patient_id = id, deleted, "Patient deleted with dependents");

        Ok(())
    }
}
