//! RealtimeHub - WebSocket observer fan-out
//!
//! ## Responsibilities
//!
//! - Observer connection management
//! - Broadcasting the full registry on every change
//! - Handing new observers the latest known state on connect
//!
//! Delivery is fire-and-forget: a failed send to one observer is logged and
//! never affects the others or the registry pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::registry::CameraRecord;

/// Hub message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum HubMessage {
    /// Full current registry, emitted on every detected change and once at
    /// startup
    #[serde(rename = "cameraInfo")]
    CameraInfo(Vec<CameraRecord>),
}

/// Observer connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
    /// Last broadcast payload, replayed to late subscribers
    last_payload: RwLock<Option<String>>,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
            last_payload: RwLock::new(None),
        }
    }

    /// Register a new observer. The latest known registry state (if any)
    /// is queued for it immediately.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(payload) = self.last_payload.read().await.clone() {
            let _ = tx.send(payload);
        }

        let conn = ClientConnection { id, tx };
        {
            let mut connections = self.connections.write().await;
            connections.insert(id, conn);
        }
        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Observer connected");

        (id, rx)
    }

    /// Unregister an observer
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Observer disconnected");
        }
    }

    /// Broadcast a message to all observers
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub message");
                return;
            }
        };

        *self.last_payload.write().await = Some(json.clone());

        let connections = self.connections.read().await;
        tracing::debug!(observers = connections.len(), "Broadcasting registry state");

        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send to observer");
            }
        }
    }

    /// Get observer count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}
