//! In-process remote store, used for dry runs and tests

use super::{Document, FieldFilter, RemoteStore};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one document
    pub async fn document(&self, collection: &str, id: &str) -> Option<Document> {
        let collections = self.collections.read().await;
        collections.get(collection).and_then(|docs| docs.get(id)).cloned()
    }

    /// All documents of a collection keyed by id
    pub async fn documents(&self, collection: &str) -> BTreeMap<String, Document> {
        let collections = self.collections.read().await;
        collections.get(collection).cloned().unwrap_or_default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    fn new_document_id(&self, _collection: &str) -> String {
        Uuid::new_v4().simple().to_string()
    }

    async fn set(&self, collection: &str, id: &str, document: Document, merge: bool) -> SyncResult<()> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        match (docs.get_mut(id), merge) {
            (Some(existing), true) => existing.extend(document),
            (Some(_), false) => {
                return Err(SyncError::Remote(format!("Document {}/{} already exists", collection, id)));
            }
            (None, _) => {
                docs.insert(id.to_string(), document);
            }
        }

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()> {
        let mut collections = self.collections.write().await;
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn find_ids(&self, collection: &str, filters: Vec<FieldFilter>) -> SyncResult<Vec<String>> {
        let collections = self.collections.read().await;
        let ids = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| filters.iter().all(|f| f.matches(doc)))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(ids)
    }
}
