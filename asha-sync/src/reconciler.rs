//! Reconciler: drains the outbox against the remote store
//!
//! Provides:
//! - Single-pass mutual exclusion (`is_syncing`) that survives errors and panics
//! - Strict FIFO, one-at-a-time dispatch of queue entries
//! - Per-entry failure isolation (`NO_AUTH` → pending, other errors → failed)
//! - Detached triggers: local mutation, connectivity regained, sign-in, timer, manual
//!
//! A pass never returns an error to its caller. Outcomes are observable
//! through [`SyncManager::status`], the queue itself and the tracing output.

use crate::adapter::{RemoteMutation, RemoteSyncAdapter};
use crate::auth::SessionInfo;
use crate::connectivity::ConnectivityProbe;
use crate::error::SyncResult;
use crate::queue::{OutboxQueue, QueueEntry};
use crate::record::SyncAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Why a pass was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    LocalMutation,
    ConnectivityRestored,
    Authenticated,
    Timer,
    Manual,
}

/// Counts for one completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    /// Entries put back to pending because nobody was signed in
    pub deferred: usize,
    pub failed: usize,
}

/// Result of one `sync_data` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Another pass was running; this request was dropped
    AlreadyRunning,
    Offline,
    /// Online, nothing queued
    Idle,
    Completed(SyncReport),
    /// The pass itself failed before or while loading the queue
    Aborted { error: String },
}

/// Outcome of a single queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Synced,
    Deferred,
    Failed,
}

/// Observable reconciler state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_outcome: Option<SyncOutcome>,
    pub last_error: Option<String>,
    /// `None` when the queue could not be counted
    pub pending_entries: Option<i64>,
}

#[derive(Debug, Default)]
struct SyncState {
    last_sync_attempt: Option<DateTime<Utc>>,
    last_outcome: Option<SyncOutcome>,
    last_error: Option<String>,
}

/// Clears the syncing flag however the pass ends
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Process-wide sync coordinator; build one and share it behind an `Arc`
pub struct SyncManager {
    queue: OutboxQueue,
    adapter: RemoteSyncAdapter,
    connectivity: Arc<dyn ConnectivityProbe>,
    is_syncing: AtomicBool,
    state: RwLock<SyncState>,
}

impl SyncManager {
    pub fn new(queue: OutboxQueue, adapter: RemoteSyncAdapter, connectivity: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            queue,
            adapter,
            connectivity,
            is_syncing: AtomicBool::new(false),
            state: RwLock::new(SyncState::default()),
        }
    }

    pub fn queue(&self) -> &OutboxQueue {
        &self.queue
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    /// Run one reconciliation pass unless one is already running.
    pub async fn sync_data(&self) -> SyncOutcome {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress, request dropped");
            return SyncOutcome::AlreadyRunning;
        }
        let _guard = SyncingGuard(&self.is_syncing);

        self.state.write().await.last_sync_attempt = Some(Utc::now());

        let outcome = match self.run_pass().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Sync pass aborted");
                SyncOutcome::Aborted { error: e.to_string() }
            }
        };

        let mut state = self.state.write().await;
        if let SyncOutcome::Aborted { error } = &outcome {
            state.last_error = Some(error.clone());
        }
        state.last_outcome = Some(outcome.clone());

        outcome
    }

    async fn run_pass(&self) -> SyncResult<SyncOutcome> {
        let network = self.connectivity.network_state().await?;
        if !network.is_online() {
            tracing::info!(
                connected = network.connected,
                internet_reachable = network.internet_reachable,
                "Offline, skipping sync"
            );
            return Ok(SyncOutcome::Offline);
        }

        let pending = self.queue.list_pending().await?;
        if pending.is_empty() {
            tracing::debug!("Sync queue empty");
            return Ok(SyncOutcome::Idle);
        }

        tracing::info!(count = pending.len(), "Starting sync pass");

        let mut report = SyncReport {
            attempted: pending.len(),
            ..SyncReport::default()
        };

        // Strictly one entry at a time: later mutations of a record must
        // never overtake earlier ones.
        for entry in &pending {
            match self.process_queue_item(entry).await {
                ItemOutcome::Synced => report.synced += 1,
                ItemOutcome::Deferred => report.deferred += 1,
                ItemOutcome::Failed => report.failed += 1,
            }
        }

        if let Err(e) = self.queue.purge_completed().await {
            tracing::warn!(error = %e, "Failed to purge completed queue entries");
        }

        tracing::info!(
            synced = report.synced,
            deferred = report.deferred,
            failed = report.failed,
            "Sync pass finished"
        );

        Ok(SyncOutcome::Completed(report))
    }

    /// Dispatch one entry and record the result on the queue. Never fails.
    pub async fn process_queue_item(&self, entry: &QueueEntry) -> ItemOutcome {
        match self.dispatch_entry(entry).await {
            Ok(remote_id) => {
                if let Some(remote_id) = remote_id {
                    // The remote write is the source of truth; local stamping
                    // problems must not fail the item.
                    if let Err(e) = self
                        .queue
                        .mark_synced(entry.record_type, entry.record_id, &remote_id)
                        .await
                    {
                        tracing::warn!(
                            entry_id = entry.id,
                            record_type = %entry.record_type,
                            record_id = entry.record_id,
                            error = %e,
                            "Could not stamp local row as synced"
                        );
                    }
                }

                if let Err(e) = self.queue.remove(entry.id).await {
                    tracing::error!(entry_id = entry.id, error = %e, "Failed to remove synced queue entry");
                }

                ItemOutcome::Synced
            }
            Err(e) if e.is_no_auth() => {
                tracing::info!(entry_id = entry.id, "Not authenticated, entry left pending");
                if let Err(e) = self.queue.revert_to_pending(entry.id).await {
                    tracing::error!(entry_id = entry.id, error = %e, "Failed to revert queue entry");
                }
                ItemOutcome::Deferred
            }
            Err(e) => {
                if let Err(mark_err) = self.queue.mark_failed(entry.id, &e.to_string()).await {
                    tracing::error!(entry_id = entry.id, error = %mark_err, "Failed to record sync failure");
                }
                ItemOutcome::Failed
            }
        }
    }

    async fn dispatch_entry(&self, entry: &QueueEntry) -> SyncResult<Option<String>> {
        if let Err(e) = self.queue.mark_in_progress(entry.id).await {
            tracing::warn!(entry_id = entry.id, error = %e, "Failed to mark entry in progress");
        }

        let payload = entry.payload_object();

        // A create that synced after this entry was queued has stamped the
        // row; prefer that id over creating a second document.
        let remote_id = match RemoteMutation::payload_remote_id(&payload) {
            Some(remote_id) => Some(remote_id),
            None if entry.action != SyncAction::Delete => self
                .queue
                .remote_id_of(entry.record_type, entry.record_id)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(entry_id = entry.id, error = %e, "Remote id lookup failed");
                    None
                }),
            None => None,
        };

        self.adapter
            .dispatch(RemoteMutation {
                record_type: entry.record_type,
                action: entry.action,
                local_id: entry.record_id,
                payload,
                remote_id,
            })
            .await
    }

    /// Snapshot of the observable sync state
    pub async fn status(&self) -> SyncStatus {
        let pending_entries = match self.queue.pending_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "Could not count pending entries");
                None
            }
        };

        let state = self.state.read().await;
        SyncStatus {
            is_syncing: self.is_syncing(),
            last_sync_attempt: state.last_sync_attempt,
            last_outcome: state.last_outcome.clone(),
            last_error: state.last_error.clone(),
            pending_entries,
        }
    }

    /// Start a pass on a detached task.
    ///
    /// The caller does not wait; the outcome goes to the log and to
    /// [`status`](Self::status).
    pub fn trigger(self: &Arc<Self>, reason: SyncReason) -> JoinHandle<SyncOutcome> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = manager.sync_data().await;
            match &outcome {
                SyncOutcome::Aborted { error } => {
                    tracing::error!(reason = ?reason, error = %error, "Triggered sync aborted");
                }
                other => tracing::debug!(reason = ?reason, outcome = ?other, "Triggered sync finished"),
            }
            outcome
        })
    }

    /// Run a triggered pass to completion, logging a pass that panicked
    async fn run_triggered(self: &Arc<Self>, reason: SyncReason) {
        if let Err(e) = self.trigger(reason).await {
            tracing::error!(reason = ?reason, error = %e, "Triggered sync task failed");
        }
    }

    /// Sync after every offline → online transition, once `settle_delay`
    /// has elapsed.
    pub fn spawn_connectivity_watcher(
        self: &Arc<Self>,
        mut online: watch::Receiver<bool>,
        settle_delay: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        // Read before spawning so a transition racing the spawn is not
        // mistaken for the starting state.
        let mut was_online = *online.borrow_and_update();
        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online && !was_online {
                    tracing::info!(settle_ms = settle_delay.as_millis() as u64, "Connectivity regained");
                    tokio::time::sleep(settle_delay).await;
                    manager.run_triggered(SyncReason::ConnectivityRestored).await;
                }
                was_online = is_online;
            }
        })
    }

    /// Sync whenever a principal signs in
    pub fn spawn_auth_watcher(self: &Arc<Self>, mut session: watch::Receiver<Option<SessionInfo>>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut signed_in = session.borrow_and_update().is_some();
        tokio::spawn(async move {
            while session.changed().await.is_ok() {
                let now_signed_in = session.borrow_and_update().is_some();
                if now_signed_in && !signed_in {
                    manager.run_triggered(SyncReason::Authenticated).await;
                }
                signed_in = now_signed_in;
            }
        })
    }

    /// Sync on a fixed interval, starting immediately
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.run_triggered(SyncReason::Timer).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::connectivity::ManualConnectivity;
    use crate::local_db::{LocalDatabase, LocalDbConfig};
    use crate::record::{QueueStatus, RecordType};
    use crate::remote::InMemoryRemoteStore;
    use tempfile::TempDir;

    struct Harness {
        manager: Arc<SyncManager>,
        remote: Arc<InMemoryRemoteStore>,
        connectivity: Arc<ManualConnectivity>,
        session: Arc<Session>,
        _dir: TempDir,
    }

    async fn harness(online: bool) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = LocalDbConfig {
            db_path: dir.path().join("sync.db").to_str().unwrap().to_string(),
            ..LocalDbConfig::default()
        };
        let db = LocalDatabase::new(&config).await.unwrap();

        let remote = Arc::new(InMemoryRemoteStore::new());
        let connectivity = Arc::new(ManualConnectivity::new(online));
        let session = Arc::new(Session::signed_in("asha-1"));
        let adapter = RemoteSyncAdapter::new(remote.clone(), session.clone());
        let manager = Arc::new(SyncManager::new(OutboxQueue::new(db), adapter, connectivity.clone()));

        Harness {
            manager,
            remote,
            connectivity,
            session,
            _dir: dir,
        }
    }

    async fn insert_visit(manager: &SyncManager) -> i64 {
        sqlx::query(
            "INSERT INTO visits (patient_id, visit_date, visit_type, created_at, updated_at)
             VALUES (1, '2026-04-01', 'pnc', '2026-04-01T00:00:00Z', '2026-04-01T00:00:00Z')",
        )
        .execute(manager.queue().database().pool())
        .await
        .unwrap()
        .last_insert_rowid()
    }

    #[tokio::test]
    async fn test_offline_pass_touches_nothing() {
        let h = harness(false).await;
        let visit_id = insert_visit(&h.manager).await;
        let entry = h.manager.queue().enqueue(RecordType::Visit, visit_id, SyncAction::Create).await.unwrap();

        assert_eq!(h.manager.sync_data().await, SyncOutcome::Offline);
        assert!(!h.manager.is_syncing());
        assert_eq!(h.manager.status().await.pending_entries, Some(1));

        let stored = h.manager.queue().get(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert!(stored.last_attempt.is_none());
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let h = harness(true).await;
        assert_eq!(h.manager.sync_data().await, SyncOutcome::Idle);
        let status = h.manager.status().await;
        assert!(status.last_sync_attempt.is_some());
        assert_eq!(status.pending_entries, Some(0));
    }

    #[tokio::test]
    async fn test_create_then_update_reuses_remote_document() {
        let h = harness(false).await;
        let visit_id = insert_visit(&h.manager).await;
        h.manager.queue().enqueue(RecordType::Visit, visit_id, SyncAction::Create).await.unwrap();
        sqlx::query("UPDATE visits SET notes = 'follow up' WHERE id = ?")
            .bind(visit_id)
            .execute(h.manager.queue().database().pool())
            .await
            .unwrap();
        h.manager.queue().enqueue(RecordType::Visit, visit_id, SyncAction::Update).await.unwrap();

        h.connectivity.set_online(true);
        let outcome = h.manager.sync_data().await;

        assert_eq!(
            outcome,
            SyncOutcome::Completed(SyncReport {
                attempted: 2,
                synced: 2,
                deferred: 0,
                failed: 0,
            })
        );
        let docs = h.remote.documents("visits").await;
        assert_eq!(docs.len(), 1);
        let doc = docs.values().next().unwrap();
        assert_eq!(doc["notes"], serde_json::json!("follow up"));
        assert_eq!(h.manager.queue().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_entries_are_deferred() {
        let h = harness(true).await;
        h.session.sign_out();
        let visit_id = insert_visit(&h.manager).await;
        let entry = h.manager.queue().enqueue(RecordType::Visit, visit_id, SyncAction::Create).await.unwrap();

        let outcome = h.manager.sync_data().await;
        assert!(matches!(outcome, SyncOutcome::Completed(ref r) if r.deferred == 1));

        let stored = h.manager.queue().get(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_aborted_pass_clears_flag_and_records_error() {
        let h = harness(true).await;
        sqlx::query("DROP TABLE sync_queue")
            .execute(h.manager.queue().database().pool())
            .await
            .unwrap();

        let outcome = h.manager.sync_data().await;
        assert!(matches!(outcome, SyncOutcome::Aborted { .. }));
        assert!(!h.manager.is_syncing());
        assert!(h.manager.status().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_connectivity_watcher_syncs_after_settle_delay() {
        let h = harness(false).await;
        let visit_id = insert_visit(&h.manager).await;
        h.manager.queue().enqueue(RecordType::Visit, visit_id, SyncAction::Create).await.unwrap();

        let watcher = h
            .manager
            .spawn_connectivity_watcher(h.connectivity.subscribe(), Duration::from_millis(20));
        h.connectivity.set_online(true);

        let mut synced = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if h.remote.len("visits").await == 1 {
                synced = true;
                break;
            }
        }
        watcher.abort();

        assert!(synced);
    }

    #[tokio::test]
    async fn test_auth_watcher_syncs_on_sign_in() {
        let h = harness(true).await;
        h.session.sign_out();
        let visit_id = insert_visit(&h.manager).await;
        h.manager.queue().enqueue(RecordType::Visit, visit_id, SyncAction::Create).await.unwrap();

        let watcher = h.manager.spawn_auth_watcher(h.session.subscribe());
        h.session.sign_in("asha-1", None);

        let mut synced = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if h.remote.len("visits").await == 1 {
                synced = true;
                break;
            }
        }
        watcher.abort();

        assert!(synced);
    }
}
