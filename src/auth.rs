//! Session authorization against the store's allow-list.
//!
//! A session is authorized when `<base>/authorized_users/<uid>` exists and
//! is exactly `true`. The state is tri-state: `Unknown` until the first
//! answer, then `Granted` or `Denied`, kept current by a live feed. Any
//! feed error degrades to `Denied` without touching the data mirrors.

use crate::error::{PanelError, Result};
use crate::store::RemoteStore;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// One user's authorization session.
pub struct AuthSession {
    store: Arc<dyn RemoteStore>,
    auth_path: String,
    uid: String,
    tx: watch::Sender<AccessState>,
}

impl AuthSession {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        base_path: &str,
        uid: &str,
    ) -> (Self, watch::Receiver<AccessState>) {
        let (tx, rx) = watch::channel(AccessState::Unknown);
        let session = Self {
            store,
            auth_path: format!("{base_path}/authorized_users/{uid}"),
            uid: uid.to_string(),
            tx,
        };
        (session, rx)
    }

    /// One-shot authorization check.
    pub async fn check(&self) -> AccessState {
        match self.store.read_once(&self.auth_path).await {
            Ok(value) => grant_from(value.as_ref()),
            Err(e) => {
                warn!("[Auth] Authorization check for {} failed: {}", self.uid, e);
                AccessState::Denied
            }
        }
    }

    /// Resolve the initial state, then follow live allow-list changes until
    /// cancelled. Publishes every transition on the watch channel.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let initial = self.check().await;
        info!("[Auth] Session {} starts as {:?}", self.uid, initial);
        self.tx.send_replace(initial);

        let mut feed = self.store.subscribe(&self.auth_path).await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = feed.recv() => match delivery {
                    Some(Ok(value)) => {
                        let state = grant_from(Some(&value));
                        if self.tx.send_replace(state) != state {
                            info!("[Auth] Session {} is now {:?}", self.uid, state);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("[Auth] Authorization feed for {} failed: {}", self.uid, e);
                        self.tx.send_replace(AccessState::Denied);
                    }
                    None => return Err(PanelError::FeedClosed(self.auth_path.clone())),
                },
            }
        }

        info!("[Auth] Session {} closed", self.uid);
        Ok(())
    }
}

fn grant_from(value: Option<&Value>) -> AccessState {
    match value {
        Some(Value::Bool(true)) => AccessState::Granted,
        _ => AccessState::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn check_requires_exact_true() {
        let memory = MemoryStore::new();
        let store: Arc<dyn RemoteStore> = Arc::new(memory.clone());

        let (session, _rx) = AuthSession::new(store.clone(), "smart_home", "alice");
        assert_eq!(session.check().await, AccessState::Denied);

        memory
            .patch("smart_home/authorized_users", json!({ "alice": true }))
            .await
            .expect("patch");
        assert_eq!(session.check().await, AccessState::Granted);

        memory
            .patch("smart_home/authorized_users", json!({ "alice": "yes" }))
            .await
            .expect("patch");
        assert_eq!(session.check().await, AccessState::Denied);
    }

    #[tokio::test]
    async fn live_revocation_reaches_the_watch() {
        let memory = MemoryStore::new();
        memory
            .patch("smart_home/authorized_users", json!({ "bob": true }))
            .await
            .expect("patch");

        let store: Arc<dyn RemoteStore> = Arc::new(memory.clone());
        let (session, mut rx) = AuthSession::new(store, "smart_home", "bob");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));

        rx.wait_for(|s| *s == AccessState::Granted)
            .await
            .expect("granted");

        memory
            .patch("smart_home/authorized_users", json!({ "bob": false }))
            .await
            .expect("patch");
        rx.wait_for(|s| *s == AccessState::Denied)
            .await
            .expect("denied");

        cancel.cancel();
        task.await.expect("join").expect("session run");
    }
}
