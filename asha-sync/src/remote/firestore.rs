//! Cloud Firestore client over the v1 REST API
//!
//! Only the calls the reconciler needs are implemented:
//! - create: `POST .../documents/{collection}?documentId={id}`
//! - merge update: `PATCH .../documents/{collection}/{id}?updateMask.fieldPaths=...`
//! - delete: `DELETE .../documents/{collection}/{id}`
//! - equality lookup: `POST .../documents:runQuery`
//!
//! A `401` from the API maps to [`SyncError::NoAuth`] so the entry is retried
//! once the session is refreshed.

use super::{Document, FieldFilter, RemoteStore};
use crate::auth::PrincipalProvider;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Firestore connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database_id: String,
    /// REST endpoint, overridable for the emulator
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database_id: "(default)".to_string(),
            base_url: "https://firestore.googleapis.com/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

impl FirestoreConfig {
    /// `projects/{p}/databases/{d}/documents`
    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.base_url.trim_end_matches('/'),
            self.project_id,
            self.database_id
        )
    }
}

pub struct FirestoreRestStore {
    client: reqwest::Client,
    config: FirestoreConfig,
    auth: Arc<dyn PrincipalProvider>,
}

impl FirestoreRestStore {
    pub fn new(config: FirestoreConfig, auth: Arc<dyn PrincipalProvider>) -> SyncResult<Self> {
        if config.project_id.is_empty() {
            return Err(SyncError::Config("Firestore project_id is required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config, auth })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.config.documents_root(), collection)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.config.documents_root(), collection, id)
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        let request = match self.auth.access_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        Ok(response)
    }
}

async fn error_for_status(response: Response, context: &str) -> SyncError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED {
        return SyncError::NoAuth;
    }

    SyncError::Remote(format!("{} failed with status {}: {}", context, status, body))
}

#[async_trait]
impl RemoteStore for FirestoreRestStore {
    fn new_document_id(&self, _collection: &str) -> String {
        Uuid::new_v4().simple().to_string()
    }

    async fn set(&self, collection: &str, id: &str, document: Document, merge: bool) -> SyncResult<()> {
        let body = json!({ "fields": encode_fields(&document) });

        let request = if merge {
            let mut query: Vec<(&str, &str)> = document
                .keys()
                .map(|field| ("updateMask.fieldPaths", field.as_str()))
                .collect();
            if query.is_empty() {
                query.push(("currentDocument.exists", "true"));
            }
            self.client
                .patch(self.document_url(collection, id))
                .query(&query)
                .json(&body)
        } else {
            self.client
                .post(self.collection_url(collection))
                .query(&[("documentId", id)])
                .json(&body)
        };

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(error_for_status(response, "Firestore write").await);
        }

        tracing::debug!(collection, id, merge, "Firestore document written");
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()> {
        let response = self.send(self.client.delete(self.document_url(collection, id))).await?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(collection, id, "Firestore document deleted");
            return Ok(());
        }

        Err(error_for_status(response, "Firestore delete").await)
    }

    async fn find_ids(&self, collection: &str, filters: Vec<FieldFilter>) -> SyncResult<Vec<String>> {
        let url = format!("{}:runQuery", self.config.documents_root());
        let body = structured_query(collection, &filters);

        let response = self.send(self.client.post(url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(error_for_status(response, "Firestore query").await);
        }

        let results: Vec<Value> = response.json().await?;
        Ok(document_ids(&results))
    }
}

/// Build a `runQuery` body with every filter ANDed together
fn structured_query(collection: &str, filters: &[FieldFilter]) -> Value {
    let field_filters: Vec<Value> = filters
        .iter()
        .map(|f| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": f.field },
                    "op": "EQUAL",
                    "value": encode_value(&f.value),
                }
            })
        })
        .collect();

    let mut query = json!({
        "from": [{ "collectionId": collection }],
        "select": { "fields": [{ "fieldPath": "__name__" }] },
    });

    let filter = match field_filters.len() {
        0 => None,
        1 => field_filters.into_iter().next(),
        _ => Some(json!({ "compositeFilter": { "op": "AND", "filters": field_filters } })),
    };
    if let (Some(filter), Some(object)) = (filter, query.as_object_mut()) {
        object.insert("where".to_string(), filter);
    }

    json!({ "structuredQuery": query })
}

/// Extract document ids from a `runQuery` response stream
fn document_ids(results: &[Value]) -> Vec<String> {
    results
        .iter()
        .filter_map(|r| r.get("document")?.get("name")?.as_str())
        .filter_map(|name| name.rsplit('/').next())
        .map(str::to_string)
        .collect()
}

fn encode_fields(document: &Document) -> Value {
    Value::Object(
        document
            .iter()
            .map(|(key, value)| (key.clone(), encode_value(value)))
            .collect(),
    )
}

/// JSON value to Firestore typed value
fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Firestore transports 64-bit integers as strings
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;

    #[test]
    fn test_encode_value_types() {
        assert_eq!(encode_value(&json!(42)), json!({"integerValue": "42"}));
        assert_eq!(encode_value(&json!(54.5)), json!({"doubleValue": 54.5}));
        assert_eq!(encode_value(&json!(null)), json!({"nullValue": null}));
        assert_eq!(
            encode_value(&json!({"bp": "120/80", "flags": [true]})),
            json!({"mapValue": {"fields": {
                "bp": {"stringValue": "120/80"},
                "flags": {"arrayValue": {"values": [{"booleanValue": true}]}}
            }}})
        );
    }

    #[test]
    fn test_structured_query_with_two_filters() {
        let body = structured_query(
            "visits",
            &[FieldFilter::eq("local_id", 12), FieldFilter::eq("asha_id", "w1")],
        );

        let query = &body["structuredQuery"];
        assert_eq!(query["from"][0]["collectionId"], json!("visits"));
        assert_eq!(query["where"]["compositeFilter"]["op"], json!("AND"));
        assert_eq!(
            query["where"]["compositeFilter"]["filters"][0]["fieldFilter"]["value"],
            json!({"integerValue": "12"})
        );
    }

    #[test]
    fn test_structured_query_single_filter_is_not_composite() {
        let body = structured_query("patients", &[FieldFilter::eq("local_id", 3)]);
        assert!(body["structuredQuery"]["where"].get("fieldFilter").is_some());
    }

    #[test]
    fn test_document_ids_skip_non_document_results() {
        let results = vec![
            json!({"readTime": "2026-01-01T00:00:00Z"}),
            json!({"document": {"name": "projects/p/databases/(default)/documents/visits/abc"}}),
        ];
        assert_eq!(document_ids(&results), vec!["abc".to_string()]);
    }

    #[test]
    fn test_urls() {
        let store = FirestoreRestStore::new(
            FirestoreConfig {
                project_id: "asha-ehr".to_string(),
                ..FirestoreConfig::default()
            },
            Arc::new(Session::new()),
        )
        .unwrap();

        assert_eq!(
            store.document_url("patients", "d1"),
            "https://firestore.googleapis.com/v1/projects/asha-ehr/databases/(default)/documents/patients/d1"
        );
    }

    #[test]
    fn test_project_id_required() {
        let result = FirestoreRestStore::new(FirestoreConfig::default(), Arc::new(Session::new()));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
