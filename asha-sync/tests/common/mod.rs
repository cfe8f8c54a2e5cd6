#![allow(dead_code)]

use asha_sync::error::{SyncError, SyncResult};
use asha_sync::remote::{Document, FieldFilter, RemoteStore};
use asha_sync::{
    ConnectivityProbe, InMemoryRemoteStore, LocalDbConfig, ManualConnectivity, NetworkState, Session, SyncEngine,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// How the stub store answers writes
#[derive(Debug, Clone)]
pub enum StubBehavior {
    Succeed,
    /// Every write fails with this message
    Fail(String),
    /// Every write fails as unauthenticated
    NoAuth,
    /// Writes for this `local_id` fail, everything else succeeds
    FailFor(i64),
}

/// One recorded remote call
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Set { collection: String, id: String, local_id: i64, merge: bool },
    Delete { collection: String, id: String },
    Find { collection: String },
}

/// Remote store double that hands out a fixed document id and records calls
pub struct StubRemoteStore {
    document_id: String,
    behavior: Mutex<StubBehavior>,
    calls: Mutex<Vec<RemoteCall>>,
    delay: Duration,
}

impl StubRemoteStore {
    pub fn new(document_id: &str, behavior: StubBehavior) -> Self {
        Self {
            document_id: document_id.to_string(),
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `local_id`s of every write, in call order
    pub fn written_local_ids(&self) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Set { local_id, .. } => Some(local_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RemoteStore for StubRemoteStore {
    fn new_document_id(&self, _collection: &str) -> String {
        self.document_id.clone()
    }

    async fn set(&self, collection: &str, id: &str, document: Document, merge: bool) -> SyncResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let local_id = document.get("local_id").and_then(|v| v.as_i64()).unwrap_or(-1);
        self.calls.lock().unwrap().push(RemoteCall::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            local_id,
            merge,
        });

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            StubBehavior::Succeed => Ok(()),
            StubBehavior::Fail(message) => Err(SyncError::Remote(message)),
            StubBehavior::NoAuth => Err(SyncError::NoAuth),
            StubBehavior::FailFor(failing) if failing == local_id => {
                Err(SyncError::Remote(format!("rejected local_id {}", local_id)))
            }
            StubBehavior::FailFor(_) => Ok(()),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()> {
        self.calls.lock().unwrap().push(RemoteCall::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    async fn find_ids(&self, collection: &str, _filters: Vec<FieldFilter>) -> SyncResult<Vec<String>> {
        self.calls.lock().unwrap().push(RemoteCall::Find {
            collection: collection.to_string(),
        });
        Ok(Vec::new())
    }
}

/// Connectivity probe that takes a while to answer and counts queries.
///
/// Every query is one pass getting past the mutual-exclusion guard.
pub struct SlowProbe {
    delay: Duration,
    pub queries: AtomicUsize,
}

impl SlowProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for SlowProbe {
    async fn network_state(&self) -> SyncResult<NetworkState> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(NetworkState::ONLINE)
    }
}

/// Probe that always errors
pub struct BrokenProbe;

#[async_trait]
impl ConnectivityProbe for BrokenProbe {
    async fn network_state(&self) -> SyncResult<NetworkState> {
        Err(SyncError::Network("probe exploded".to_string()))
    }
}

pub struct TestEngine {
    pub engine: SyncEngine,
    pub session: Arc<Session>,
    _dir: TempDir,
}

/// Engine on a fresh temp database, signed in as `asha-1`, mutations not
/// auto-triggering passes
pub async fn engine_with(remote: Arc<dyn RemoteStore>, connectivity: Arc<dyn ConnectivityProbe>) -> TestEngine {
    let dir = TempDir::new().unwrap();
    let config = LocalDbConfig {
        db_path: dir.path().join("asha.db").to_str().unwrap().to_string(),
        ..LocalDbConfig::default()
    };
    let session = Arc::new(Session::signed_in("asha-1"));

    let engine = SyncEngine::new(&config, remote, connectivity, session.clone(), false)
        .await
        .unwrap();

    TestEngine {
        engine,
        session,
        _dir: dir,
    }
}

pub async fn in_memory_engine(online: bool) -> (TestEngine, Arc<InMemoryRemoteStore>, Arc<ManualConnectivity>) {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let connectivity = Arc::new(ManualConnectivity::new(online));
    let engine = engine_with(remote.clone(), connectivity.clone()).await;
    (engine, remote, connectivity)
}
