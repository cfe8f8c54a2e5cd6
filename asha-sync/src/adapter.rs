//! Remote sync adapter
//!
//! Maps one queued mutation onto a document operation in the remote store:
//! create or merge-update keyed by the known remote id, or delete by remote
//! id falling back to a `local_id` lookup. Every document carries the local
//! cross-reference (`local_id`), its owner (`asha_id`) and timestamps.

use crate::auth::PrincipalProvider;
use crate::error::{SyncError, SyncResult};
use crate::record::{RecordType, SyncAction};
use crate::remote::{Document, FieldFilter, RemoteStore};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// Cross-reference field linking a remote document to its local row
pub const LOCAL_ID_FIELD: &str = "local_id";
/// Ownership field
pub const OWNER_FIELD: &str = "asha_id";

/// Payload keys that only make sense on the device
const LOCAL_ONLY_FIELDS: [&str; 4] = ["id", "synced", "remote_id", "firestore_id"];

/// One mutation ready for dispatch
#[derive(Debug, Clone)]
pub struct RemoteMutation {
    pub record_type: RecordType,
    pub action: SyncAction,
    pub local_id: i64,
    pub payload: Document,
    /// Remote id already assigned to the record, if any
    pub remote_id: Option<String>,
}

impl RemoteMutation {
    /// Remote id recorded in the payload snapshot (`remote_id` or the legacy
    /// `firestore_id` column)
    pub fn payload_remote_id(payload: &Document) -> Option<String> {
        ["remote_id", "firestore_id"]
            .iter()
            .filter_map(|key| payload.get(*key))
            .filter_map(Value::as_str)
            .find(|id| !id.is_empty())
            .map(str::to_string)
    }
}

pub struct RemoteSyncAdapter {
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn PrincipalProvider>,
}

impl RemoteSyncAdapter {
    pub fn new(remote: Arc<dyn RemoteStore>, auth: Arc<dyn PrincipalProvider>) -> Self {
        Self { remote, auth }
    }

    /// Perform the remote side of `mutation`.
    ///
    /// Returns the remote id the local row should carry afterwards, or
    /// `None` for deletes.
    pub async fn dispatch(&self, mutation: RemoteMutation) -> SyncResult<Option<String>> {
        let owner = self.resolve_owner(&mutation.payload).await?;
        let collection = mutation.record_type.collection();

        match mutation.action {
            SyncAction::Delete => {
                self.delete(collection, mutation.local_id, mutation.remote_id.as_deref(), &owner)
                    .await?;
                Ok(None)
            }
            SyncAction::Create | SyncAction::Update => {
                let document = build_document(mutation.payload, mutation.local_id, &owner);

                let remote_id = match mutation.remote_id {
                    Some(remote_id) => {
                        self.remote.set(collection, &remote_id, document, true).await?;
                        remote_id
                    }
                    None => {
                        // Not checked against existing local_id matches; a
                        // crash before the local row is stamped can create a
                        // duplicate document on retry.
                        let remote_id = self.remote.new_document_id(collection);
                        self.remote.set(collection, &remote_id, document, false).await?;
                        remote_id
                    }
                };

                tracing::debug!(
                    collection,
                    local_id = mutation.local_id,
                    remote_id = %remote_id,
                    "Remote document written"
                );

                Ok(Some(remote_id))
            }
        }
    }

    async fn delete(&self, collection: &str, local_id: i64, remote_id: Option<&str>, owner: &str) -> SyncResult<()> {
        if let Some(remote_id) = remote_id {
            return self.remote.delete(collection, remote_id).await;
        }

        let matches = self
            .remote
            .find_ids(
                collection,
                vec![
                    FieldFilter::eq(LOCAL_ID_FIELD, local_id),
                    FieldFilter::eq(OWNER_FIELD, owner),
                ],
            )
            .await?;

        if matches.is_empty() {
            tracing::debug!(collection, local_id, "Nothing to delete remotely, record never synced");
        }

        for remote_id in matches {
            self.remote.delete(collection, &remote_id).await?;
        }

        Ok(())
    }

    /// Owner from the payload, else the signed-in principal
    async fn resolve_owner(&self, payload: &Document) -> SyncResult<String> {
        if let Some(owner) = payload.get(OWNER_FIELD).and_then(Value::as_str) {
            if !owner.is_empty() {
                return Ok(owner.to_string());
            }
        }

        self.auth.current_principal().await.ok_or(SyncError::NoAuth)
    }
}

/// Remote document for a create/update
fn build_document(mut payload: Document, local_id: i64, owner: &str) -> Document {
    for field in LOCAL_ONLY_FIELDS {
        payload.remove(field);
    }

    let now = Utc::now().to_rfc3339();
    payload.insert(LOCAL_ID_FIELD.to_string(), Value::from(local_id));
    payload.insert(OWNER_FIELD.to_string(), Value::from(owner));
    payload.insert("updated_at".to_string(), Value::from(now.clone()));

    let has_created_at = payload.get("created_at").is_some_and(|v| !v.is_null());
    if !has_created_at {
        payload.insert("created_at".to_string(), Value::from(now));
    }

    payload
}
