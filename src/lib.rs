//! Camera Registry Sync & Broadcast Server
//!
//! ## Architecture (5 Components)
//!
//! 1. RegistryStore - durable camera registry with exclusive-access gate
//! 2. Reconciler - periodic discovery merge (preserves operator/runtime fields)
//! 3. Prober - periodic per-device reachability sweep
//! 4. ChangeNotifier - pushes the registry to observers on every change
//! 5. WebAPI - registry read endpoint + WebSocket observer transport
//!
//! ## Design Principles
//!
//! - The persisted registry file is the single source of truth
//! - The store's gate serializes all file access; network I/O never runs
//!   under it
//! - One record per probe address; the prober owns only `reachability`

pub mod discovery;
pub mod error;
pub mod models;
pub mod notifier;
pub mod prober;
pub mod realtime_hub;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
