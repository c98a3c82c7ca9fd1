//! Leader discovery via per-node status queries.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::client::KvCluster;
use crate::cluster::{AddressList, Endpoint};

/// Interval between discovery passes while waiting for an election.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LeaderError {
    /// No node reported leadership within the overall timeout.
    #[error("no leader elected within {0:?}")]
    NoLeader(Duration),
}

/// One ordered pass over the address list; returns the first endpoint whose
/// status query reports leadership.
///
/// A node that cannot be reached is treated as "not the leader" and skipped:
/// one dead follower must not abort discovery.
pub fn find_leader<C: KvCluster>(
    client: &C,
    targets: &AddressList,
    query_timeout: Duration,
) -> Option<Endpoint> {
    for endpoint in targets.endpoints() {
        match client.status(endpoint, query_timeout) {
            Ok(report) if report.is_leader => {
                debug!(%endpoint, term = report.term, "node reports leadership");
                return Some(endpoint.clone());
            }
            Ok(_) => {}
            Err(err) => debug!(%endpoint, %err, "status query failed, skipping node"),
        }
    }
    None
}

/// Poll `find_leader` every 100 ms until a leader appears.
///
/// The wait carries an overall timeout so a cluster that never elects
/// reports a distinct failure instead of hanging.
pub fn wait_for_leader<C: KvCluster>(
    client: &C,
    targets: &AddressList,
    query_timeout: Duration,
    overall_timeout: Duration,
) -> Result<Endpoint, LeaderError> {
    let deadline = Instant::now() + overall_timeout;
    loop {
        if let Some(endpoint) = find_leader(client, targets, query_timeout) {
            return Ok(endpoint);
        }
        if Instant::now() >= deadline {
            return Err(LeaderError::NoLeader(overall_timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
