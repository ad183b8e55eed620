//! Discovery & stream-lookup collaborators
//!
//! ## Responsibilities
//!
//! - Collaborator boundary for device discovery (one probe round returns
//!   the currently visible device descriptors)
//! - Collaborator boundary for the one-time stream address lookup
//! - Production ONVIF implementations (WS-Discovery + GetStreamUri)
//!
//! The reconciler only sees the traits; tests drive it with in-memory
//! implementations.

mod onvif;
mod types;

pub use onvif::{OnvifDiscovery, OnvifStreamLookup};
pub use types::{DeviceDescriptor, Endpoint};

use async_trait::async_trait;

use crate::error::Result;

/// Device discovery collaborator. A failed round aborts the whole
/// reconciliation cycle with `Error::Discovery`.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn probe(&self) -> Result<Vec<DeviceDescriptor>>;
}

/// Stream address lookup collaborator, invoked once per newly discovered
/// device. Fails per device with `Error::Lookup`; the device is still
/// registered with the address left absent.
#[async_trait]
pub trait StreamLookup: Send + Sync {
    async fn stream_uri(&self, device: &DeviceDescriptor) -> Result<String>;
}
