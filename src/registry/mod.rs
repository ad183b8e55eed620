//! RegistryStore - durable camera registry
//!
//! ## Responsibilities
//!
//! - Load/save the persisted registry document
//! - Process-wide mutual exclusion for read-modify-write sequences
//! - Change notification on every successful write
//!
//! Two background services write through this store on independent timers:
//! the reconciler replaces the full record set, the prober rewrites a single
//! record's reachability. Both run their file I/O under the store's gate;
//! neither holds the gate across network I/O.

mod repository;
mod types;

pub use repository::RegistryRepository;
pub use types::{ActiveSource, CameraRecord, Reachability, RegistryDocument, Resolution};

use std::path::PathBuf;

use tokio::sync::{broadcast, Mutex};

use crate::error::Result;

/// Change-event channel capacity; the notifier only needs "something
/// changed", lagged receivers just re-read the latest state.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// RegistryStore instance
pub struct RegistryStore {
    repo: RegistryRepository,
    /// Exclusive-access gate over the persisted document
    gate: Mutex<()>,
    /// Fires after every successful write
    changes: broadcast::Sender<()>,
}

impl RegistryStore {
    /// Create a store over the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            repo: RegistryRepository::new(path),
            gate: Mutex::new(()),
            changes,
        }
    }

    /// Load the registry once at startup, creating the empty document on
    /// first run. Fails on a corrupt file.
    pub async fn init(&self) -> Result<Vec<CameraRecord>> {
        let _guard = self.gate.lock().await;
        let doc = self.repo.load().await?;
        Ok(doc.camera_info_array)
    }

    /// Read the current record set under the gate and release immediately.
    pub async fn snapshot(&self) -> Result<Vec<CameraRecord>> {
        let _guard = self.gate.lock().await;
        let doc = self.repo.load().await?;
        Ok(doc.camera_info_array)
    }

    /// Read-modify-write under the gate. The closure receives the current
    /// record set and returns the replacement, or `None` to skip the write
    /// entirely (no file touch, no change event). Returns whether a write
    /// happened.
    ///
    /// The closure is synchronous on purpose: slow work (discovery, stream
    /// lookups, probes) must be done before acquiring the gate.
    pub async fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(Vec<CameraRecord>) -> Option<Vec<CameraRecord>>,
    {
        let _guard = self.gate.lock().await;
        let doc = self.repo.load().await?;
        match f(doc.camera_info_array) {
            Some(records) => {
                self.repo
                    .save(&RegistryDocument {
                        camera_info_array: records,
                    })
                    .await?;
                let _ = self.changes.send(());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Set the reachability of the record matching `probe_address`,
    /// leaving every other field untouched. Returns `false` (silently, no
    /// write) when the record no longer exists - it may have been dropped
    /// by a reconciliation since the caller's snapshot.
    pub async fn update_reachability(
        &self,
        probe_address: &str,
        value: Reachability,
    ) -> Result<bool> {
        self.update(|mut records| {
            let record = records
                .iter_mut()
                .find(|r| r.probe_address == probe_address)?;
            record.reachability = Some(value);
            Some(records)
        })
        .await
    }

    /// Subscribe to change events. An event fires after every successful
    /// write; receivers re-read the store for the actual state.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}
