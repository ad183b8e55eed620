//! ChangeNotifier - registry change to observer broadcast
//!
//! ## Responsibilities
//!
//! - Broadcast the current registry once at startup
//! - Re-read and re-broadcast it on every store change event
//!
//! The store emits an in-process event from every successful save, so there
//! is no file-watch race: a change cannot be missed between broadcasts. A
//! lagged receiver coalesces the backlog into one re-read of the latest
//! state, which is all observers need.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::realtime_hub::{HubMessage, RealtimeHub};
use crate::registry::RegistryStore;

/// ChangeNotifier instance
pub struct ChangeNotifier {
    store: Arc<RegistryStore>,
    hub: Arc<RealtimeHub>,
}

impl ChangeNotifier {
    pub fn new(store: Arc<RegistryStore>, hub: Arc<RealtimeHub>) -> Self {
        Self { store, hub }
    }

    /// Broadcast the startup state, then follow store changes until the
    /// store is dropped.
    pub async fn start(&self) {
        Self::publish(&self.store, &self.hub).await;

        let store = self.store.clone();
        let hub = self.hub.clone();
        let mut rx = store.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        Self::publish(&store, &hub).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::info!("Change notifier stopped");
        });
    }

    async fn publish(store: &RegistryStore, hub: &RealtimeHub) {
        match store.snapshot().await {
            Ok(records) => {
                hub.broadcast(HubMessage::CameraInfo(records)).await;
            }
            Err(e) => {
                // Broadcast failure must not take down the pipeline; the
                // next change event retries the read.
                tracing::error!(error = %e, "Failed to read registry for broadcast");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::registry::{ActiveSource, CameraRecord, Reachability};

    fn record(addr: &str) -> CameraRecord {
        CameraRecord {
            hostname: "cam".to_string(),
            active_source: ActiveSource::default(),
            stream_address: None,
            probe_address: addr.to_string(),
            reachability: None,
        }
    }

    async fn recv_json(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>,
    ) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for broadcast")
            .expect("hub channel closed");
        serde_json::from_str(&msg).unwrap()
    }

    #[tokio::test]
    async fn startup_broadcasts_current_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RegistryStore::new(dir.path().join("cameraInfo.json")));
        store
            .update(|_| Some(vec![record("10.0.0.1")]))
            .await
            .unwrap();
        let hub = Arc::new(RealtimeHub::new());
        let (_id, mut rx) = hub.register().await;

        ChangeNotifier::new(store, hub).start().await;

        let msg = recv_json(&mut rx).await;
        assert_eq!(msg["type"], "cameraInfo");
        assert_eq!(msg["data"][0]["probeAddress"], "10.0.0.1");
    }

    #[tokio::test]
    async fn write_triggers_one_broadcast_with_new_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RegistryStore::new(dir.path().join("cameraInfo.json")));
        store.init().await.unwrap();
        let hub = Arc::new(RealtimeHub::new());
        let (_id, mut rx) = hub.register().await;

        ChangeNotifier::new(store.clone(), hub).start().await;
        // Drain the startup broadcast
        let startup = recv_json(&mut rx).await;
        assert_eq!(startup["data"].as_array().unwrap().len(), 0);

        store
            .update_reachability("10.0.0.1", Reachability::Ms(1.0))
            .await
            .unwrap();
        store
            .update(|_| Some(vec![record("10.0.0.1")]))
            .await
            .unwrap();

        let msg = recv_json(&mut rx).await;
        assert_eq!(msg["data"][0]["probeAddress"], "10.0.0.1");
    }
}
