//! Fault injection: leader isolation and network throttling.
//!
//! Isolation goes through the cluster's test-only partition RPC, which severs
//! peer-to-peer traffic while leaving client connections intact; the
//! consistency probe relies on that asymmetry to reconnect to the isolated
//! node afterwards. Throttling and cleanup shell out to `nft`.

use std::process::Command;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cluster::{AddressList, Endpoint};

/// nftables table owned by the harness; cleanup removes it wholesale.
const NFT_TABLE: &str = "kvprobe_test";

#[derive(Debug, Error)]
pub enum FaultError {
    /// The partition RPC to the target node failed.
    #[error("partition request to {endpoint} failed: {detail}")]
    Partition { endpoint: String, detail: String },
}

/// Capability interface for injecting and removing faults, so the concrete
/// mechanism can be swapped without touching the verifier.
pub trait FaultInjector {
    /// Cut the target off from peer traffic for `duration`. Client traffic
    /// must keep flowing to the target.
    fn isolate(&self, endpoint: &Endpoint, duration: Duration) -> Result<(), FaultError>;

    /// Remove all injected rules. Idempotent and best-effort: individual
    /// command failures are logged, never returned.
    fn cleanup(&self);
}

/// Body for POST /debug/partition.
#[derive(Debug, Serialize)]
struct PartitionRequest {
    duration_ms: u64,
}

/// Production fault injector: partition RPC plus nftables rate limiting.
pub struct NetworkFaults {
    http: reqwest::blocking::Client,
}

impl NetworkFaults {
    pub fn new() -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        NetworkFaults { http }
    }

    /// Rate-limit every cluster port to widen the window between leadership
    /// loss and step-down. Failures are logged and tolerated.
    pub fn throttle(&self, targets: &AddressList) {
        info!("setting up artificial network latency");
        run_nft(&["add", "table", "inet", NFT_TABLE]);
        run_nft(&[
            "add", "chain", "inet", NFT_TABLE, "input",
            "{ type filter hook input priority 0 ; }",
        ]);
        run_nft(&[
            "add", "chain", "inet", NFT_TABLE, "output",
            "{ type filter hook output priority 0 ; }",
        ]);
        for endpoint in targets.endpoints() {
            run_nft(&[
                "add", "rule", "inet", NFT_TABLE, "input",
                "tcp", "dport", &endpoint.port,
                "limit", "rate", "100", "bytes/second",
            ]);
            run_nft(&[
                "add", "rule", "inet", NFT_TABLE, "output",
                "tcp", "sport", &endpoint.port,
                "limit", "rate", "100", "bytes/second",
            ]);
        }
        info!("artificial latency setup complete");
    }
}

impl Default for NetworkFaults {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultInjector for NetworkFaults {
    fn isolate(&self, endpoint: &Endpoint, duration: Duration) -> Result<(), FaultError> {
        info!(%endpoint, ?duration, "blocking node from communicating with peers");

        // nft would block client messages as well as intra-cluster messages,
        // so isolation uses the node's own test hook instead.
        let url = format!("http://{}/debug/partition", endpoint);
        let body = PartitionRequest {
            duration_ms: duration.as_millis() as u64,
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| FaultError::Partition {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FaultError::Partition {
                endpoint: endpoint.to_string(),
                detail: format!("unexpected status: {}", response.status()),
            });
        }

        info!(%endpoint, "node blocked from communicating with peers");
        Ok(())
    }

    fn cleanup(&self) {
        info!("cleaning up nftables rules");
        run_nft(&["flush", "table", "inet", NFT_TABLE]);
        run_nft(&["delete", "table", "inet", NFT_TABLE]);
        info!("cleanup complete");
    }
}

/// Run one nft command via sudo; failures are logged, never returned.
fn run_nft(args: &[&str]) {
    let output = Command::new("sudo").arg("nft").args(args).output();
    match output {
        Ok(out) if out.status.success() => {}
        Ok(out) => warn!(
            cmd = ?args,
            stderr = %String::from_utf8_lossy(&out.stderr).trim(),
            "nft command failed"
        ),
        Err(err) => warn!(cmd = ?args, %err, "could not run nft"),
    }
}

/// Runs `cleanup` when dropped, so no exit path of the harness leaves the
/// environment partitioned or throttled.
pub struct CleanupGuard<'a, F: FaultInjector + ?Sized> {
    injector: &'a F,
}

impl<'a, F: FaultInjector + ?Sized> CleanupGuard<'a, F> {
    pub fn new(injector: &'a F) -> Self {
        CleanupGuard { injector }
    }
}

impl<F: FaultInjector + ?Sized> Drop for CleanupGuard<'_, F> {
    fn drop(&mut self) {
        self.injector.cleanup();
    }
}
