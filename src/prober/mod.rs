//! Reachability prober - periodic per-device ping sweep
//!
//! ## Responsibilities
//!
//! - Measure each known device's reachability on a short timer
//! - Write results back one record at a time, never holding the store's
//!   gate across a probe
//!
//! Probing is slow (a multi-second round trip per device), so a cycle works
//! from a snapshot and re-reads the current state for each single-record
//! write. A record replaced or dropped by a concurrent reconciliation is
//! skipped silently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::{interval, timeout};

use crate::registry::{Reachability, RegistryStore};

/// Probe collaborator: measure average round-trip time to a host in
/// milliseconds. Never fails the caller; `None` on any failure.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn measure(&self, host: &str) -> Option<f64>;
}

/// Ping-based probe (`ping -c <count> -W <secs>`)
pub struct PingProber {
    count: u32,
    /// Per-reply timeout passed to ping
    reply_timeout: Duration,
    /// Hard cap on one ping invocation
    overall_timeout: Duration,
}

impl PingProber {
    pub fn new(count: u32, reply_timeout: Duration) -> Self {
        // ping itself bounds each reply; the outer timeout catches a
        // hanging process (e.g. name resolution stalls).
        let overall_timeout = reply_timeout * count + Duration::from_secs(5);
        Self {
            count,
            reply_timeout,
            overall_timeout,
        }
    }
}

#[async_trait]
impl Probe for PingProber {
    async fn measure(&self, host: &str) -> Option<f64> {
        let child = Command::new("ping")
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(self.reply_timeout.as_secs().max(1).to_string())
            .arg(host)
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.overall_timeout, child).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(_)) => return None,
            Ok(Err(e)) => {
                tracing::warn!(host = %host, error = %e, "Failed to spawn ping");
                return None;
            }
            Err(_) => {
                tracing::warn!(host = %host, "Ping timed out");
                return None;
            }
        };

        parse_avg_ms(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Average RTT from ping's summary line
/// (`rtt min/avg/max/mdev = 0.045/0.052/0.061/0.006 ms`)
fn parse_avg_ms(stdout: &str) -> Option<f64> {
    let line = stdout.lines().find(|l| l.contains("min/avg/max"))?;
    let stats = line.split('=').nth(1)?.trim();
    stats.split('/').nth(1)?.trim().parse().ok()
}

///// Host part of a probe address (`192.168.1.10:8080` -> `192.168.1.10`,
/// `[fe80::1]:80` -> `fe80::1`). A bare IPv6 address has no port to strip.
fn strip_port(probe_address: &str) -> &str {
    if let Some(rest) = probe_address.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }
    match probe_address.split_once(':') {
        // More than one colon and no brackets: bare IPv6
        Some((_, rest)) if rest.contains(':') => probe_address,
        Some((host, _)) => host,
        None => probe_address,
    }
}

/// ProberService instance
pub struct ProberService {
    store: Arc<RegistryStore>,
    probe: Arc<dyn Probe>,
    period: Duration,
    running: Arc<RwLock<bool>>,
}

impl ProberService {
    pub fn new(store: Arc<RegistryStore>, probe: Arc<dyn Probe>, period: Duration) -> Self {
        Self {
            store,
            probe,
            period,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the probe loop
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Prober already running");
                return;
            }
            *running = true;
        }

        tracing::info!(period_secs = self.period.as_secs(), "Starting reachability prober");

        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = interval(service.period);

            loop {
                interval.tick().await;

                if !*service.running.read().await {
                    break;
                }

                service.run_once().await;
            }

            tracing::info!("Prober stopped");
        });
    }

    /// Stop the loop at the next tick
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// One probe cycle: snapshot, then probe and write back sequentially.
    /// A per-device failure never aborts the rest of the sweep.
    pub async fn run_once(&self) {
        let records = match self.store.snapshot().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read registry for probe cycle");
                return;
            }
        };

        for record in records {
            let host = strip_port(&record.probe_address);
            let result = self.probe.measure(host).await;

            let value = match result {
                Some(avg) => Reachability::Ms(avg),
                None => Reachability::Unreachable,
            };

            match self
                .store
                .update_reachability(&record.probe_address, value)
                .await
            {
                Ok(true) => {
                    tracing::debug!(host = %host, reachability = ?value, "Reachability updated");
                }
                Ok(false) => {
                    tracing::debug!(
                        probe_address = %record.probe_address,
                        "Record vanished during probe cycle, skipping"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        probe_address = %record.probe_address,
                        error = %e,
                        "Failed to persist reachability"
                    );
                }
            }
        }
    }
}
