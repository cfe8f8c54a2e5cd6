//! Authenticated-principal accessor
//!
//! The sync core only needs two things from authentication: the opaque id
//! of the signed-in ASHA worker (used as the `asha_id` owner of every remote
//! document and to scope local reads) and, for the Firestore client, a bearer
//! token. Login flows themselves live outside this crate.

use async_trait::async_trait;
use tokio::sync::watch;

/// Source of the currently authenticated principal
#[async_trait]
pub trait PrincipalProvider: Send + Sync {
    /// Opaque principal id, `None` when nobody is signed in
    async fn current_principal(&self) -> Option<String>;

    /// Bearer token for remote calls, if the session carries one
    async fn access_token(&self) -> Option<String> {
        None
    }
}

/// Signed-in identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub principal_id: String,
    pub access_token: Option<String>,
}

/// In-process session state fed by the app shell's login flow.
///
/// Changes are published on a watch channel so the reconciler can start a
/// pass as soon as someone signs in.
#[derive(Debug)]
pub struct Session {
    state: watch::Sender<Option<SessionInfo>>,
}

impl Session {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Session already signed in as `principal_id`
    pub fn signed_in(principal_id: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(principal_id, None);
        session
    }

    pub fn sign_in(&self, principal_id: impl Into<String>, access_token: Option<String>) {
        let principal_id = principal_id.into();
        tracing::info!(principal_id = %principal_id, "Principal signed in");
        self.state.send_replace(Some(SessionInfo {
            principal_id,
            access_token,
        }));
    }

    pub fn sign_out(&self) {
        tracing::info!("Principal signed out");
        self.state.send_replace(None);
    }

    /// Replace the bearer token of the current session (token refresh)
    pub fn refresh_token(&self, access_token: String) {
        self.state.send_if_modified(|state| match state {
            Some(info) => {
                info.access_token = Some(access_token);
                true
            }
            None => false,
        });
    }

    /// Receiver observing sign-in and sign-out transitions
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionInfo>> {
        self.state.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrincipalProvider for Session {
    async fn current_principal(&self) -> Option<String> {
        self.state.borrow().as_ref().map(|info| info.principal_id.clone())
    }

    async fn access_token(&self) -> Option<String> {
        self.state.borrow().as_ref().and_then(|info| info.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let session = Session::new();
        assert_eq!(session.current_principal().await, None);

        session.sign_in("asha-17", Some("token-a".to_string()));
        assert_eq!(session.current_principal().await.as_deref(), Some("asha-17"));
        assert_eq!(session.access_token().await.as_deref(), Some("token-a"));

        session.refresh_token("token-b".to_string());
        assert_eq!(session.access_token().await.as_deref(), Some("token-b"));

        session.sign_out();
        assert_eq!(session.current_principal().await, None);
        assert_eq!(session.access_token().await, None);
    }

    #[tokio::test]
    async fn test_subscribers_observe_sign_in() {
        let session = Session::new();
        let mut rx = session.subscribe();

        session.sign_in("asha-3", None);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(|s| s.principal_id.as_str()), Some("asha-3"));
    }
}
