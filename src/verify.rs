//! Consistency verification.
//!
//! Probes whether a leader that has been partitioned away from its peers can
//! still serve data older than an acknowledged write: write a baseline
//! through the current leader, isolate it, write a new value through the
//! replacement leader, then reconnect directly to the isolated node and read
//! the key back. Deliberately sequential; the value of the probe lies in the
//! ordering of the partition, write, and read steps.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ClientError, Connector, KvCluster};
use crate::cluster::AddressList;
use crate::fault::{FaultError, FaultInjector};
use crate::leader::{self, LeaderError};

/// Directory holding the probe key.
pub const TEST_DIR: &str = "/ConsistencyTest";
/// Key written before and after the partition.
pub const TEST_KEY: &str = "/ConsistencyTest/test";
/// Value written through the original leader.
pub const BASELINE_VALUE: &str = "foo";
/// Value written through the replacement leader.
pub const NEW_VALUE: &str = "bar";

/// Per-node status query timeout.
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
/// Bound on waiting for an election; a cluster that never elects fails
/// with a distinct error instead of hanging.
const ELECTION_TIMEOUT: Duration = Duration::from_secs(60);
/// How long the old leader stays cut off from its peers.
const ISOLATION_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Leader(#[from] LeaderError),
    #[error(transparent)]
    Fault(#[from] FaultError),
}

/// What the probe concluded about the isolated ex-leader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The read through the old leader returned the newest value.
    Consistent,
    /// The old leader served data older than the acknowledged write:
    /// a linearizability / read-your-writes violation.
    Violation {
        expected: String,
        observed: Option<String>,
    },
}

/// Full outcome of one verification run.
#[derive(Clone, Debug)]
pub struct VerifyReport {
    pub verdict: Verdict,
    /// The isolated node still claimed leadership when probed directly,
    /// i.e. it failed to step down after losing contact with its peers.
    pub stale_leader: bool,
}

/// Run the probe end to end. Each step opens a fresh connection through
/// `connector` so leader identity is never cached across steps; a cached
/// identity would prevent the very race this probe is designed to surface.
pub fn run<C, F>(
    connector: &C,
    injector: &F,
    cluster: &AddressList,
) -> Result<VerifyReport, VerifyError>
where
    C: Connector,
    F: FaultInjector,
{
    // Baseline through the current leader. The connection is scoped to this
    // block and dropped before the next step.
    let old_leader = {
        let client = connector.connect(cluster)?;
        let leader = leader::wait_for_leader(&client, cluster, STATUS_TIMEOUT, ELECTION_TIMEOUT)?;
        info!(endpoint = %leader, "found leader, writing {:?} under {}", BASELINE_VALUE, TEST_KEY);
        client.make_dir(TEST_DIR)?;
        client.write(TEST_KEY, BASELINE_VALUE)?;
        injector.isolate(&leader, ISOLATION_WINDOW)?;
        leader
    };

    // Recompute the quorum without the isolated member.
    let survivors = cluster.without_port(&old_leader.port);
    info!(remaining = %survivors, "waiting for a new leader among the survivors");

    // New leader, new value.
    {
        let client = connector.connect(&survivors)?;
        let new_leader =
            leader::wait_for_leader(&client, &survivors, STATUS_TIMEOUT, ELECTION_TIMEOUT)?;
        info!(endpoint = %new_leader, "found new leader, writing {:?}", NEW_VALUE);
        client.write(TEST_KEY, NEW_VALUE)?;
    }

    // Reconnect straight to the isolated node. This can succeed because the
    // partition blocks peer traffic only.
    info!(endpoint = %old_leader, "reconnecting to the old leader");
    let direct = AddressList::single(old_leader.clone());
    let client = connector.connect(&direct)?;

    let stale_leader = match client.status(&old_leader, STATUS_TIMEOUT) {
        Ok(report) => report.is_leader,
        Err(err) => {
            warn!(endpoint = %old_leader, %err, "status query on the isolated node failed");
            false
        }
    };
    if stale_leader {
        warn!(
            endpoint = %old_leader,
            "isolated node still claims leadership after losing its peers"
        );
    }

    let observed = client.read(TEST_KEY)?;
    info!(?observed, "read {} from the isolated node", TEST_KEY);

    let verdict = if observed.as_deref() == Some(NEW_VALUE) {
        info!("no violation: the isolated node returned the newest value");
        Verdict::Consistent
    } else {
        warn!(
            expected = NEW_VALUE,
            ?observed,
            "consistency violation: the isolated node served stale data"
        );
        Verdict::Violation {
            expected: NEW_VALUE.to_string(),
            observed,
        }
    };

    Ok(VerifyReport {
        verdict,
        stale_leader,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimCluster, SimConnector, SimInjector};

    fn three_nodes() -> AddressList {
        AddressList::parse("a:1,b:2,c:3").unwrap()
    }

    #[test]
    fn test_violation_detected_when_old_leader_serves_stale_data() {
        let cluster = SimCluster::new("1");
        cluster.on_isolation(true, true);
        let connector = SimConnector::new(&cluster);
        let injector = SimInjector::new(&cluster);

        let report = run(&connector, &injector, &three_nodes()).unwrap();

        assert_eq!(
            report.verdict,
            Verdict::Violation {
                expected: "bar".to_string(),
                observed: Some("foo".to_string()),
            }
        );
        assert!(report.stale_leader);
    }

    #[test]
    fn test_verified_when_old_leader_returns_new_value() {
        let cluster = SimCluster::new("2");
        cluster.on_isolation(false, false);
        let connector = SimConnector::new(&cluster);
        let injector = SimInjector::new(&cluster);

        let report = run(&connector, &injector, &three_nodes()).unwrap();

        assert_eq!(report.verdict, Verdict::Consistent);
        assert!(!report.stale_leader);
    }

    #[test]
    fn test_stale_leadership_claim_is_reported_even_without_violation() {
        let cluster = SimCluster::new("1");
        cluster.on_isolation(true, false);
        let connector = SimConnector::new(&cluster);
        let injector = SimInjector::new(&cluster);

        let report = run(&connector, &injector, &three_nodes()).unwrap();

        assert_eq!(report.verdict, Verdict::Consistent);
        assert!(report.stale_leader);
    }

    #[test]
    fn test_each_step_uses_a_fresh_connection() {
        let cluster = SimCluster::new("1");
        let connector = SimConnector::new(&cluster);
        let injector = SimInjector::new(&cluster);

        run(&connector, &injector, &three_nodes()).unwrap();

        // Discovery+baseline, survivors, direct reconnect.
        assert_eq!(connector.connects(), 3);
    }

    #[test]
    fn test_baseline_and_new_value_are_both_written() {
        let cluster = SimCluster::new("3");
        cluster.on_isolation(true, true);
        let connector = SimConnector::new(&cluster);
        let injector = SimInjector::new(&cluster);

        run(&connector, &injector, &three_nodes()).unwrap();

        // The live quorum holds the new value; the isolated node froze the
        // baseline.
        assert_eq!(cluster.get(TEST_KEY), Some(NEW_VALUE.to_string()));
        assert!(cluster.has_dir(TEST_DIR));
        assert!(cluster.is_isolated("3"));
    }

    #[test]
    fn test_new_leader_is_elected_among_survivors_only() {
        let cluster = SimCluster::new("1");
        let connector = SimConnector::new(&cluster);
        let injector = SimInjector::new(&cluster);

        run(&connector, &injector, &three_nodes()).unwrap();

        let new_leader = cluster.leader_port().unwrap();
        assert_ne!(new_leader, "1");
    }
}
