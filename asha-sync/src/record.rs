//! Record-type routing table and queue vocabulary
//!
//! Every syncable entity maps to exactly one local table and one remote
//! collection. The mapping is closed: adding a record type means adding a
//! variant here, and every `match` over it must handle the new case.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Syncable entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Patient,
    Visit,
    Vaccination,
    ScheduledVisit,
    Notification,
    PregnancyDetails,
}

impl RecordType {
    pub const ALL: [RecordType; 6] = [
        RecordType::Patient,
        RecordType::Visit,
        RecordType::Vaccination,
        RecordType::ScheduledVisit,
        RecordType::Notification,
        RecordType::PregnancyDetails,
    ];

    /// Canonical (singular) name stored in `sync_queue.record_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Patient => "patient",
            RecordType::Visit => "visit",
            RecordType::Vaccination => "vaccination",
            RecordType::ScheduledVisit => "scheduled_visit",
            RecordType::Notification => "notification",
            RecordType::PregnancyDetails => "pregnancy_details",
        }
    }

    /// Local SQLite table holding rows of this type
    pub fn table(&self) -> &'static str {
        match self {
            RecordType::Patient => "patients",
            RecordType::Visit => "visits",
            RecordType::Vaccination => "vaccinations",
            RecordType::ScheduledVisit => "scheduled_visits",
            RecordType::Notification => "notifications",
            RecordType::PregnancyDetails => "pregnancy_details",
        }
    }

    /// Remote collection documents of this type are written to
    pub fn collection(&self) -> &'static str {
        // Remote collections share the local table names.
        self.table()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = SyncError;

    /// Accepts both the singular and the plural (collection) spelling.
    fn from_str(s: &str) -> SyncResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" | "patients" => Ok(RecordType::Patient),
            "visit" | "visits" => Ok(RecordType::Visit),
            "vaccination" | "vaccinations" => Ok(RecordType::Vaccination),
            "scheduled_visit" | "scheduled_visits" => Ok(RecordType::ScheduledVisit),
            "notification" | "notifications" => Ok(RecordType::Notification),
            "pregnancy_details" | "pregnancy_detail" => Ok(RecordType::PregnancyDetails),
            _ => Err(SyncError::UnknownRecordType(s.to_string())),
        }
    }
}

/// Mutation kind carried by a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            _ => Err(SyncError::InvalidOperation(format!("Unknown action: {}", s))),
        }
    }
}

/// Queue entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "in_progress" => Ok(QueueStatus::InProgress),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            _ => Err(SyncError::InvalidOperation(format!("Unknown queue status: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural_and_singular_names_normalize() {
        assert_eq!("patients".parse::<RecordType>().unwrap(), RecordType::Patient);
        assert_eq!("Visit".parse::<RecordType>().unwrap(), RecordType::Visit);
        assert_eq!(
            "scheduled_visits".parse::<RecordType>().unwrap(),
            RecordType::ScheduledVisit
        );
        assert_eq!(
            "pregnancy_details".parse::<RecordType>().unwrap(),
            RecordType::PregnancyDetails
        );
    }

    #[test]
    fn test_unknown_record_type() {
        let err = "household".parse::<RecordType>().unwrap_err();
        assert!(matches!(err, SyncError::UnknownRecordType(ref t) if t == "household"));
    }

    #[test]
    fn test_every_type_has_a_collection() {
        for record_type in RecordType::ALL {
            assert!(!record_type.collection().is_empty());
            assert_eq!(record_type.as_str().parse::<RecordType>().unwrap(), record_type);
            assert_eq!(record_type.table().parse::<RecordType>().unwrap(), record_type);
        }
    }
}
