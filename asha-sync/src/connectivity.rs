//! Connectivity probes
//!
//! A pass only starts when the device is both connected to a network and
//! able to reach the internet. The probe is a pure query.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Network state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub connected: bool,
    pub internet_reachable: bool,
}

impl NetworkState {
    pub const OFFLINE: NetworkState = NetworkState {
        connected: false,
        internet_reachable: false,
    };

    pub const ONLINE: NetworkState = NetworkState {
        connected: true,
        internet_reachable: true,
    };

    pub fn is_online(&self) -> bool {
        self.connected && self.internet_reachable
    }
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn network_state(&self) -> SyncResult<NetworkState>;
}

/// Connectivity reported by the host app shell.
///
/// Online/offline transitions are published on a watch channel that
/// [`SyncManager::spawn_connectivity_watcher`](crate::reconciler::SyncManager::spawn_connectivity_watcher)
/// consumes.
#[derive(Debug)]
pub struct ManualConnectivity {
    connected: AtomicBool,
    internet_reachable: AtomicBool,
    online_tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (online_tx, _) = watch::channel(online);
        Self {
            connected: AtomicBool::new(online),
            internet_reachable: AtomicBool::new(online),
            online_tx,
        }
    }

    pub fn set_state(&self, state: NetworkState) {
        self.connected.store(state.connected, Ordering::SeqCst);
        self.internet_reachable.store(state.internet_reachable, Ordering::SeqCst);
        self.online_tx.send_if_modified(|online| {
            let changed = *online != state.is_online();
            *online = state.is_online();
            changed
        });
    }

    pub fn set_online(&self, online: bool) {
        self.set_state(if online {
            NetworkState::ONLINE
        } else {
            NetworkState::OFFLINE
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }
}

#[async_trait]
impl ConnectivityProbe for ManualConnectivity {
    async fn network_state(&self) -> SyncResult<NetworkState> {
        Ok(NetworkState {
            connected: self.connected.load(Ordering::SeqCst),
            internet_reachable: self.internet_reachable.load(Ordering::SeqCst),
        })
    }
}

/// Reachability check against a known endpoint
#[derive(Debug, Clone)]
pub struct HttpReachabilityProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpReachabilityProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpReachabilityProbe {
    async fn network_state(&self) -> SyncResult<NetworkState> {
        // Any HTTP answer, error statuses included, means the host was reached.
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                tracing::trace!(url = %self.url, status = %response.status(), "Reachability probe answered");
                Ok(NetworkState::ONLINE)
            }
            Err(e) if e.is_connect() || e.is_timeout() => {
                tracing::debug!(url = %self.url, error = %e, "Reachability probe failed");
                Ok(NetworkState::OFFLINE)
            }
            Err(e) => Err(SyncError::Network(e.to_string())),
        }
    }
}

/// Poll `probe` every `interval` and publish online/offline transitions.
///
/// Probe errors count as offline.
pub fn spawn_probe_poller(
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let online = match probe.network_state().await {
                Ok(state) => state.is_online(),
                Err(e) => {
                    tracing::warn!(error = %e, "Connectivity probe error");
                    false
                }
            };

            tx.send_if_modified(|current| {
                let changed = *current != online;
                *current = online;
                changed
            });

            if tx.is_closed() {
                break;
            }
        }
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_connectivity_requires_both_flags() {
        let connectivity = ManualConnectivity::new(false);
        assert!(!connectivity.network_state().await.unwrap().is_online());

        connectivity.set_state(NetworkState {
            connected: true,
            internet_reachable: false,
        });
        assert!(!connectivity.network_state().await.unwrap().is_online());

        connectivity.set_online(true);
        assert!(connectivity.network_state().await.unwrap().is_online());
    }

    #[tokio::test]
    async fn test_manual_connectivity_publishes_transitions() {
        let connectivity = ManualConnectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        // Same state again is not a transition
        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_probe_poller_reports_online() {
        let probe: Arc<dyn ConnectivityProbe> = Arc::new(ManualConnectivity::new(true));
        let (mut rx, handle) = spawn_probe_poller(probe, Duration::from_millis(10));

        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        handle.abort();
    }

    /// One-shot HTTP server answering every connection with `status_line`
    async fn serve_status(status_line: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_http_reachability_counts_error_status_as_online() {
        let url = serve_status("404 Not Found").await;
        let probe = HttpReachabilityProbe::new(url, Duration::from_secs(2)).unwrap();

        let state = probe.network_state().await.unwrap();
        assert!(state.is_online());
    }

    #[tokio::test]
    async fn test_http_reachability_offline_when_nothing_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let probe = HttpReachabilityProbe::new(url, Duration::from_secs(2)).unwrap();
        assert_eq!(probe.network_state().await.unwrap(), NetworkState::OFFLINE);
    }
}
