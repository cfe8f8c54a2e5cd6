//! Remote document store seam
//!
//! The reconciler writes one document per local record into a collection
//! named after the record type. Any store offering id generation, whole or
//! merged writes, deletes and equality lookups can sit behind this trait.

pub mod firestore;
pub mod memory;

pub use firestore::{FirestoreConfig, FirestoreRestStore};
pub use memory::InMemoryRemoteStore;

use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Document body: a JSON object of top-level fields
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Equality filter on a top-level document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: serde_json::Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        document.get(&self.field) == Some(&self.value)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Generate an id for a document that is about to be created
    fn new_document_id(&self, collection: &str) -> String;

    /// Write `document` at `collection/id`. With `merge` the listed fields
    /// are updated and the rest of an existing document is kept; without it
    /// the document is created.
    async fn set(&self, collection: &str, id: &str, document: Document, merge: bool) -> SyncResult<()>;

    /// Delete `collection/id`; deleting a missing document succeeds
    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()>;

    /// Ids of documents matching every filter
    async fn find_ids(&self, collection: &str, filters: Vec<FieldFilter>) -> SyncResult<Vec<String>>;
}
