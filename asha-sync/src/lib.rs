//! Offline-first synchronization engine for the ASHA-EHR field app
//!
//! Provides:
//! - Local SQLite database for offline operations
//! - Durable outbox of pending mutations with unbounded retry
//! - Reconciler draining the outbox in FIFO order under connectivity constraints
//! - Remote sync adapter with local/remote id mapping and ownership stamping
//! - Entity services for patients, visits, vaccinations, schedules,
//!   notifications and pregnancy details

pub mod adapter;
pub mod auth;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod local_db;
pub mod queue;
pub mod reconciler;
pub mod record;
pub mod remote;
pub mod services;
pub mod telemetry;

pub use adapter::{RemoteMutation, RemoteSyncAdapter};
pub use auth::{PrincipalProvider, Session, SessionInfo};
pub use config::AshaSyncConfig;
pub use connectivity::{ConnectivityProbe, HttpReachabilityProbe, ManualConnectivity, NetworkState};
pub use error::{SyncError, SyncResult};
pub use local_db::{LocalDatabase, LocalDbConfig};
pub use queue::{OutboxQueue, QueueEntry};
pub use reconciler::{SyncManager, SyncOutcome, SyncReason, SyncReport, SyncStatus};
pub use record::{QueueStatus, RecordType, SyncAction};
pub use remote::{Document, FieldFilter, FirestoreRestStore, InMemoryRemoteStore, RemoteStore};

use crate::config::RemoteBackend;
use crate::services::{
    NotificationService, PatientService, PregnancyService, ScheduleService, ServiceContext, VaccinationService,
    VisitService,
};
use std::sync::Arc;
use std::time::Duration;

/// Sync engine wiring: one database, one outbox, one reconciler
pub struct SyncEngine {
    db: LocalDatabase,
    ctx: ServiceContext,
    manager: Arc<SyncManager>,
    session: Arc<Session>,
    connectivity: Arc<dyn ConnectivityProbe>,
}

impl SyncEngine {
    /// Open the local database and wire the reconciler.
    ///
    /// Entries left `in_progress` by a previous run are returned to
    /// `pending` before anything else happens.
    pub async fn new(
        db_config: &LocalDbConfig,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn ConnectivityProbe>,
        session: Arc<Session>,
        trigger_on_mutation: bool,
    ) -> SyncResult<Self> {
        let db = LocalDatabase::new(db_config).await?;
        let queue = OutboxQueue::new(db.clone());
        queue.requeue_interrupted().await?;

        let adapter = RemoteSyncAdapter::new(remote, session.clone());
        let manager = Arc::new(SyncManager::new(queue.clone(), adapter, connectivity.clone()));

        let mut ctx = ServiceContext::new(queue, session.clone());
        if trigger_on_mutation {
            ctx = ctx.with_sync(manager.clone());
        }

        Ok(Self {
            db,
            ctx,
            manager,
            session,
            connectivity,
        })
    }

    /// Build the engine described by `config`: remote backend, HTTP
    /// reachability probe and the configured principal.
    pub async fn from_config(config: &AshaSyncConfig) -> SyncResult<Self> {
        config.validate()?;

        let session = Arc::new(Session::new());
        if let Some(principal_id) = &config.auth.principal_id {
            session.sign_in(principal_id.clone(), config.auth.access_token.clone());
        }

        let remote: Arc<dyn RemoteStore> = match config.remote.backend {
            RemoteBackend::Memory => Arc::new(InMemoryRemoteStore::new()),
            RemoteBackend::Firestore => Arc::new(FirestoreRestStore::new(
                config.remote.firestore.clone(),
                session.clone(),
            )?),
        };

        let connectivity: Arc<dyn ConnectivityProbe> = Arc::new(HttpReachabilityProbe::new(
            config.connectivity.probe_url.clone(),
            Duration::from_secs(config.connectivity.probe_timeout_secs),
        )?);

        tracing::info!(
            db_path = %config.database.db_path,
            backend = ?config.remote.backend,
            "Sync engine configured"
        );

        Self::new(
            &config.database,
            remote,
            connectivity,
            session,
            config.sync.trigger_on_mutation,
        )
        .await
    }

    pub fn local_db(&self) -> &LocalDatabase {
        &self.db
    }

    pub fn queue(&self) -> &OutboxQueue {
        self.manager.queue()
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn connectivity(&self) -> &Arc<dyn ConnectivityProbe> {
        &self.connectivity
    }

    pub fn patients(&self) -> PatientService {
        PatientService::new(self.ctx.clone())
    }

    pub fn visits(&self) -> VisitService {
        VisitService::new(self.ctx.clone())
    }

    pub fn vaccinations(&self) -> VaccinationService {
        VaccinationService::new(self.ctx.clone())
    }

    pub fn schedules(&self) -> ScheduleService {
        ScheduleService::new(self.ctx.clone())
    }

    pub fn notifications(&self) -> NotificationService {
        NotificationService::new(self.ctx.clone())
    }

    pub fn pregnancies(&self) -> PregnancyService {
        PregnancyService::new(self.ctx.clone())
    }

    /// Run one pass and wait for it (manual trigger)
    pub async fn sync_now(&self) -> SyncOutcome {
        self.manager.sync_data().await
    }

    pub async fn close(self) -> SyncResult<()> {
        self.db.close().await
    }
}
