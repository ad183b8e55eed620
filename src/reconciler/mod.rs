//! Reconciler - periodic discovery-to-registry merge
//!
//! ## Responsibilities
//!
//! - Run a discovery round on a fixed timer
//! - Merge discovered devices into the registry store
//! - Preserve operator/runtime fields for known devices
//!   (`stream_address` is set once at first discovery, `reachability`
//!   belongs to the prober)
//! - Resolve the stream address exactly once per new device
//!
//! Slow work (the discovery round, stream lookups) happens before the
//! store's gate is taken; the merge itself is a pure in-memory step under
//! the gate against the then-current persisted state.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::interval;

use crate::discovery::{DeviceDescriptor, Discovery, StreamLookup};
use crate::error::Result;
use crate::registry::{CameraRecord, RegistryStore};

/// What happens to registry records that a discovery round did not report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// The registry is exactly the currently visible device set; a device
    /// that misses one round disappears until it is re-discovered.
    #[default]
    DiscoveredOnly,
    /// Records not re-discovered are kept unchanged (union of ever-seen
    /// devices; only reachability reflects current visibility).
    Union,
}

impl FromStr for RetentionPolicy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discovered-only" => Ok(Self::DiscoveredOnly),
            "union" => Ok(Self::Union),
            other => Err(crate::error::Error::Config(format!(
                "unknown retention policy '{other}' (expected 'discovered-only' or 'union')"
            ))),
        }
    }
}

/// ReconcilerService instance
pub struct ReconcilerService {
    store: Arc<RegistryStore>,
    discovery: Arc<dyn Discovery>,
    stream_lookup: Arc<dyn StreamLookup>,
    period: Duration,
    retention: RetentionPolicy,
    running: Arc<RwLock<bool>>,
}

impl ReconcilerService {
    pub fn new(
        store: Arc<RegistryStore>,
        discovery: Arc<dyn Discovery>,
        stream_lookup: Arc<dyn StreamLookup>,
        period: Duration,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            store,
            discovery,
            stream_lookup,
            period,
            retention,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the reconciliation loop. The first run fires immediately,
    /// then every period. A failed run is logged; the next tick is the
    /// retry policy.
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Reconciler already running");
                return;
            }
            *running = true;
        }

        tracing::info!(period_secs = self.period.as_secs(), "Starting reconciler");

        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = interval(service.period);

            loop {
                interval.tick().await;

                if !*service.running.read().await {
                    break;
                }

                match service.run_once().await {
                    Ok(count) => {
                        tracing::info!(devices = count, "Reconciliation cycle complete");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Reconciliation cycle failed");
                    }
                }
            }

            tracing::info!("Reconciler stopped");
        });
    }

    /// Stop the loop at the next tick
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// One reconciliation cycle. Returns the number of discovered devices
    /// merged into the registry.
    pub async fn run_once(&self) -> Result<usize> {
        let devices = self.discovery.probe().await?;
        tracing::debug!(discovered = devices.len(), "Discovery round returned");

        // Derive probe addresses; endpoint-less descriptors are logged and
        // excluded from this run only.
        let mut usable: Vec<(String, DeviceDescriptor)> = Vec::new();
        for device in devices {
            match device.probe_address() {
                Some(addr) => usable.push((addr, device)),
                None => {
                    tracing::warn!(
                        hostname = %device.hostname,
                        "Discovered device reported no endpoints, skipping"
                    );
                }
            }
        }

        if usable.is_empty() {
            // "No devices responded" is not "registry is empty": never
            // overwrite the persisted set with nothing.
            tracing::info!("No usable devices discovered, registry untouched");
            return Ok(0);
        }

        // Resolve stream addresses for devices not yet in the registry,
        // outside the gate. A per-device lookup failure leaves the address
        // absent; the device is still registered.
        let known = self.store.snapshot().await?;
        let mut resolved: HashMap<String, String> = HashMap::new();
        for (addr, device) in &usable {
            if known.iter().any(|r| &r.probe_address == addr) {
                continue;
            }
            match self.stream_lookup.stream_uri(device).await {
                Ok(uri) => {
                    resolved.insert(addr.clone(), uri);
                }
                Err(e) => {
                    tracing::warn!(
                        hostname = %device.hostname,
                        error = %e,
                        "Stream address lookup failed, registering without it"
                    );
                }
            }
        }

        let retention = self.retention;
        let count = usable.len();
        self.store
            .update(move |current| {
                Some(merge(current, usable, &resolved, retention))
            })
            .await?;

        Ok(count)
    }
}

/// Merge one discovery round against the current record set.
///
/// Known devices get fresh descriptor fields with `stream_address` and
/// `reachability` carried over; new devices start with the resolved stream
/// address (if any) and no reachability. The registry holds exactly one
/// record per probe address: duplicate descriptors in one batch are
/// first-wins, whatever the discovery collaborator returned.
fn merge(
    current: Vec<CameraRecord>,
    discovered: Vec<(String, DeviceDescriptor)>,
    resolved: &HashMap<String, String>,
    retention: RetentionPolicy,
) -> Vec<CameraRecord> {
    let mut records: Vec<CameraRecord> = Vec::with_capacity(discovered.len());

    for (addr, device) in discovered {
        if records.iter().any(|r| r.probe_address == addr) {
            tracing::warn!(
                hostname = %device.hostname,
                probe_address = %addr,
                "Duplicate probe address in discovery batch, keeping first"
            );
            continue;
        }
        let existing = current.iter().find(|r| r.probe_address == addr);
        records.push(CameraRecord {
            hostname: device.hostname,
            active_source: device.active_source,
            stream_address: existing
                .and_then(|r| r.stream_address.clone())
                .or_else(|| resolved.get(&addr).cloned()),
            probe_address: addr,
            reachability: existing.and_then(|r| r.reachability),
        });
    }

    if retention == RetentionPolicy::Union {
        for record in current {
            if !records.iter().any(|r| r.probe_address == record.probe_address) {
                records.push(record);
            }
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::discovery::Endpoint;
    use crate::error::Error;
    use crate::registry::{ActiveSource, Reachability, Resolution};

    struct FakeDiscovery {
        devices: Mutex<Result<Vec<DeviceDescriptor>>>,
    }

    impl FakeDiscovery {
        fn returning(devices: Vec<DeviceDescriptor>) -> Arc<Self> {
            Arc::new(Self {
                devices: Mutex::new(Ok(devices)),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                devices: Mutex::new(Err(Error::Discovery("probe timed out".to_string()))),
            })
        }
    }

    #[async_trait]
    impl Discovery for FakeDiscovery {
        async fn probe(&self) -> Result<Vec<DeviceDescriptor>> {
            match &*self.devices.lock().unwrap() {
                Ok(devices) => Ok(devices.clone()),
                Err(_) => Err(Error::Discovery("probe timed out".to_string())),
            }
        }
    }

    struct FakeLookup {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl StreamLookup for FakeLookup {
        async fn stream_uri(&self, device: &DeviceDescriptor) -> Result<String> {
            self.calls.lock().unwrap().push(device.hostname.clone());
            if self.fail {
                Err(Error::Lookup("unauthorized".to_string()))
            } else {
                Ok(format!(
                    "rtsp://{}/stream1",
                    device.endpoints[0].address()
                ))
            }
        }
    }

    fn descriptor(hostname: &str, host: &str, encoding: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            hostname: hostname.to_string(),
            endpoints: vec![Endpoint {
                host: host.to_string(),
                port: None,
            }],
            active_source: ActiveSource {
                source_token: "src0".to_string(),
                profile_token: "prof0".to_string(),
                encoding: encoding.to_string(),
                resolution: Resolution {
                    width: Some(1920),
                    height: Some(1080),
                },
                fps: Some(25.0),
                bitrate: Some(4096.0),
            },
        }
    }

    fn service(
        store: Arc<RegistryStore>,
        discovery: Arc<dyn Discovery>,
        lookup: Arc<dyn StreamLookup>,
        retention: RetentionPolicy,
    ) -> ReconcilerService {
        ReconcilerService::new(store, discovery, lookup, Duration::from_secs(300), retention)
    }

    fn store_in(dir: &tempfile::TempDir) -> Arc<RegistryStore> {
        Arc::new(RegistryStore::new(dir.path().join("cameraInfo.json")))
    }

    #[tokio::test]
    async fn new_device_gets_stream_address_and_no_reachability() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![descriptor("cam1", "192.168.1.10", "H264")]),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );

        let count = reconciler.run_once().await.unwrap();
        assert_eq!(count, 1);

        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].probe_address, "192.168.1.10");
        assert_eq!(
            records[0].stream_address.as_deref(),
            Some("rtsp://192.168.1.10/stream1")
        );
        assert_eq!(records[0].reachability, None);
    }

    #[tokio::test]
    async fn lookup_failure_still_registers_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![descriptor("cam1", "192.168.1.10", "H264")]),
            FakeLookup::failing(),
            RetentionPolicy::DiscoveredOnly,
        );

        reconciler.run_once().await.unwrap();

        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stream_address, None);
    }

    #[tokio::test]
    async fn known_device_keeps_stream_address_and_reachability() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let lookup = FakeLookup::ok();
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![descriptor("cam1", "192.168.1.10", "H264")]),
            lookup.clone(),
            RetentionPolicy::DiscoveredOnly,
        );
        reconciler.run_once().await.unwrap();
        store
            .update_reachability("192.168.1.10", Reachability::Ms(12.5))
            .await
            .unwrap();

        // Same device, new encoding
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![descriptor("cam1-renamed", "192.168.1.10", "H265")]),
            lookup.clone(),
            RetentionPolicy::DiscoveredOnly,
        );
        reconciler.run_once().await.unwrap();

        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hostname, "cam1-renamed");
        assert_eq!(records[0].active_source.encoding, "H265");
        assert_eq!(
            records[0].stream_address.as_deref(),
            Some("rtsp://192.168.1.10/stream1")
        );
        assert_eq!(records[0].reachability, Some(Reachability::Ms(12.5)));
        // Stream lookup is one-time: not re-invoked for the known device
        assert_eq!(lookup.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let devices = vec![
            descriptor("cam1", "192.168.1.10", "H264"),
            descriptor("cam2", "192.168.1.11", "H264"),
        ];
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(devices),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );

        reconciler.run_once().await.unwrap();
        let first = std::fs::read(dir.path().join("cameraInfo.json")).unwrap();
        reconciler.run_once().await.unwrap();
        let second = std::fs::read(dir.path().join("cameraInfo.json")).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_discovery_leaves_registry_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![descriptor("cam1", "192.168.1.10", "H264")]),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );
        reconciler.run_once().await.unwrap();
        let before = std::fs::read(dir.path().join("cameraInfo.json")).unwrap();

        let mut rx = store.subscribe();
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![]),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );
        assert_eq!(reconciler.run_once().await.unwrap(), 0);

        let after = std::fs::read(dir.path().join("cameraInfo.json")).unwrap();
        assert_eq!(before, after);
        // And no change event fired
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn discovery_failure_aborts_cycle_and_keeps_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![descriptor("cam1", "192.168.1.10", "H264")]),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );
        reconciler.run_once().await.unwrap();

        let reconciler = service(
            store.clone(),
            FakeDiscovery::failing(),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );
        let err = reconciler.run_once().await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));

        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn endpoint_less_descriptor_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut broken = descriptor("ghost", "unused", "H264");
        broken.endpoints.clear();
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![broken, descriptor("cam1", "192.168.1.10", "H264")]),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );

        assert_eq!(reconciler.run_once().await.unwrap(), 1);
        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hostname, "cam1");
    }

    #[tokio::test]
    async fn duplicate_probe_addresses_collapse_to_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        // The same camera answering twice in one round (e.g. on two
        // interfaces resolving to one address) must not fork the record.
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(vec![
                descriptor("cam1", "192.168.1.10", "H264"),
                descriptor("cam1-alias", "192.168.1.10", "H265"),
            ]),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );

        reconciler.run_once().await.unwrap();

        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 1);
        // First descriptor wins
        assert_eq!(records[0].hostname, "cam1");
        assert_eq!(records[0].active_source.encoding, "H264");
    }

    #[tokio::test]
    async fn discovered_only_drops_missing_devices_union_keeps_them() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let both = vec![
            descriptor("cam1", "192.168.1.10", "H264"),
            descriptor("cam2", "192.168.1.11", "H264"),
        ];
        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(both.clone()),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );
        reconciler.run_once().await.unwrap();
        store
            .update_reachability("192.168.1.11", Reachability::Ms(2.0))
            .await
            .unwrap();

        // cam2 misses a round under each policy
        let only_cam1 = vec![descriptor("cam1", "192.168.1.10", "H264")];

        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(only_cam1.clone()),
            FakeLookup::ok(),
            RetentionPolicy::Union,
        );
        reconciler.run_once().await.unwrap();
        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 2);
        let cam2 = records
            .iter()
            .find(|r| r.probe_address == "192.168.1.11")
            .unwrap();
        assert_eq!(cam2.reachability, Some(Reachability::Ms(2.0)));

        let reconciler = service(
            store.clone(),
            FakeDiscovery::returning(only_cam1),
            FakeLookup::ok(),
            RetentionPolicy::DiscoveredOnly,
        );
        reconciler.run_once().await.unwrap();
        let records = store.snapshot().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].probe_address, "192.168.1.10");
    }

    #[test]
    fn retention_policy_from_str() {
        assert_eq!(
            "discovered-only".parse::<RetentionPolicy>().unwrap(),
            RetentionPolicy::DiscoveredOnly
        );
        assert_eq!(
            "union".parse::<RetentionPolicy>().unwrap(),
            RetentionPolicy::Union
        );
        assert!("keep-all".parse::<RetentionPolicy>().is_err());
    }
}
