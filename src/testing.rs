//! In-process simulated cluster for exercising the harness without a real
//! deployment.
//!
//! `SimCluster` owns a shared world (key/value data, leadership, partition
//! state) behind a mutex; `SimConnector` hands out fresh connections scoped
//! to a target list, the way the real connector does, and `SimInjector`
//! flips the simulated world instead of the network. Isolating a node takes
//! a frozen copy of the store so the node can later serve stale data.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::{ClientError, Connector, KvCluster, StatusReport};
use crate::cluster::{AddressList, Endpoint};
use crate::fault::{FaultError, FaultInjector};

/// Status polls on survivors before a new leader appears after isolation.
const DEFAULT_ELECTION_POLLS: u32 = 3;

#[derive(Debug)]
struct IsolatedNode {
    port: String,
    /// Copy of the store taken at isolation time.
    frozen: HashMap<String, String>,
    /// The node keeps claiming leadership after losing its peers.
    still_claims_leadership: bool,
    /// Serve the frozen store instead of the live one.
    serves_stale: bool,
}

#[derive(Debug)]
struct SimWorld {
    /// Committed key/value data as seen by the live quorum.
    store: HashMap<String, String>,
    dirs: HashSet<String>,
    /// Port of the node currently claiming leadership in the live quorum.
    leader_port: Option<String>,
    term: u64,
    /// Ports whose status queries fail outright.
    unreachable: HashSet<String>,
    isolated: Option<IsolatedNode>,
    /// Status polls remaining before a pending election resolves; the node
    /// being polled when this hits zero becomes the leader.
    election_countdown: u32,
    /// Behavior the next isolation installs on the victim.
    pending_still_claims: bool,
    pending_serves_stale: bool,
    fail_writes: bool,
    cleanup_calls: usize,
}

/// Handle to a simulated cluster; clones share one world.
#[derive(Clone, Debug)]
pub struct SimCluster {
    world: Arc<Mutex<SimWorld>>,
}

impl SimCluster {
    /// A cluster whose node on `leader_port` currently leads.
    pub fn new(leader_port: &str) -> Self {
        SimCluster {
            world: Arc::new(Mutex::new(SimWorld {
                store: HashMap::new(),
                dirs: HashSet::new(),
                leader_port: Some(leader_port.to_string()),
                term: 1,
                unreachable: HashSet::new(),
                isolated: None,
                election_countdown: 0,
                pending_still_claims: true,
                pending_serves_stale: true,
                fail_writes: false,
                cleanup_calls: 0,
            })),
        }
    }

    /// A cluster with no leader at all.
    pub fn with_no_leader() -> Self {
        let cluster = SimCluster::new("");
        cluster.lock().leader_port = None;
        cluster
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimWorld> {
        self.world.lock().unwrap()
    }

    /// Make status queries to `port` fail with a network error.
    pub fn set_unreachable(&self, port: &str) {
        self.lock().unreachable.insert(port.to_string());
    }

    /// Schedule an election: a leader emerges after this many status polls.
    pub fn set_election_countdown(&self, polls: u32) {
        self.lock().election_countdown = polls;
    }

    /// Configure how the next isolated node behaves: whether it keeps
    /// claiming leadership, and whether it serves its frozen (stale) store.
    pub fn on_isolation(&self, still_claims_leadership: bool, serves_stale: bool) {
        let mut world = self.lock();
        world.pending_still_claims = still_claims_leadership;
        world.pending_serves_stale = serves_stale;
    }

    /// Make every write fail, to exercise the fatal-error path.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Current value under `key` in the live quorum's store.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().store.get(key).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    pub fn leader_port(&self) -> Option<String> {
        self.lock().leader_port.clone()
    }

    pub fn is_isolated(&self, port: &str) -> bool {
        self.lock()
            .isolated
            .as_ref()
            .is_some_and(|node| node.port == port)
    }

    pub fn cleanup_calls(&self) -> usize {
        self.lock().cleanup_calls
    }

    /// Status of one node as seen over a direct client connection, or None
    /// if the node is unreachable.
    pub fn direct_status(&self, port: &str) -> Option<StatusReport> {
        status_of(&mut self.lock(), port).ok()
    }
}

/// One node's answer to a status query, advancing any pending election.
fn status_of(world: &mut SimWorld, port: &str) -> Result<StatusReport, ClientError> {
    if world.unreachable.contains(port) {
        return Err(ClientError::Network(format!("{} unreachable", port)));
    }

    if let Some(node) = &world.isolated {
        if node.port == port {
            return Ok(StatusReport {
                is_leader: node.still_claims_leadership,
                term: world.term,
            });
        }
    }

    if world.election_countdown > 0 {
        world.election_countdown -= 1;
        if world.election_countdown == 0 {
            world.leader_port = Some(port.to_string());
            world.term += 1;
            return Ok(StatusReport {
                is_leader: true,
                term: world.term,
            });
        }
        return Ok(StatusReport {
            is_leader: false,
            term: world.term,
        });
    }

    Ok(StatusReport {
        is_leader: world.leader_port.as_deref() == Some(port),
        term: world.term,
    })
}

/// One simulated connection, scoped to a target list like a real client.
pub struct SimConn {
    world: Arc<Mutex<SimWorld>>,
    targets: AddressList,
}

impl SimConn {
    /// Whether this connection goes solely to the isolated node.
    fn direct_to_isolated(&self, world: &SimWorld) -> bool {
        match (&world.isolated, self.targets.endpoints()) {
            (Some(node), [only]) => only.port == node.port,
            _ => false,
        }
    }
}

impl KvCluster for SimConn {
    fn read(&self, key: &str) -> Result<Option<String>, ClientError> {
        let world = self.world.lock().unwrap();
        if self.direct_to_isolated(&world) {
            let node = world.isolated.as_ref().expect("isolated node");
            let store = if node.serves_stale {
                &node.frozen
            } else {
                &world.store
            };
            return Ok(store.get(key).cloned());
        }
        Ok(world.store.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let mut world = self.world.lock().unwrap();
        if world.fail_writes {
            return Err(ClientError::Network("injected write failure".to_string()));
        }
        world.store.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn make_dir(&self, path: &str) -> Result<(), ClientError> {
        self.world.lock().unwrap().dirs.insert(path.to_string());
        Ok(())
    }

    fn status(
        &self,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<StatusReport, ClientError> {
        status_of(&mut self.world.lock().unwrap(), &endpoint.port)
    }
}

/// Connector producing fresh `SimConn`s; counts the connections handed out.
#[derive(Clone)]
pub struct SimConnector {
    cluster: SimCluster,
    connects: Arc<AtomicUsize>,
}

impl SimConnector {
    pub fn new(cluster: &SimCluster) -> Self {
        SimConnector {
            cluster: cluster.clone(),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many connections this connector has produced.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for SimConnector {
    type Client = SimConn;

    fn connect(&self, targets: &AddressList) -> Result<SimConn, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(SimConn {
            world: self.cluster.world.clone(),
            targets: targets.clone(),
        })
    }
}

/// Fault injector that flips the simulated world instead of the network.
pub struct SimInjector {
    cluster: SimCluster,
}

impl SimInjector {
    pub fn new(cluster: &SimCluster) -> Self {
        SimInjector {
            cluster: cluster.clone(),
        }
    }
}

impl FaultInjector for SimInjector {
    fn isolate(&self, endpoint: &Endpoint, _duration: Duration) -> Result<(), FaultError> {
        let mut world = self.cluster.lock();
        world.isolated = Some(IsolatedNode {
            port: endpoint.port.clone(),
            frozen: world.store.clone(),
            still_claims_leadership: world.pending_still_claims,
            serves_stale: world.pending_serves_stale,
        });
        world.leader_port = None;
        world.election_countdown = DEFAULT_ELECTION_POLLS;
        Ok(())
    }

    fn cleanup(&self) {
        let mut world = self.cluster.lock();
        world.cleanup_calls += 1;
        world.isolated = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_freezes_the_store() {
        let cluster = SimCluster::new("1");
        let connector = SimConnector::new(&cluster);
        let injector = SimInjector::new(&cluster);
        let all = AddressList::parse("a:1,b:2").unwrap();

        let conn = connector.connect(&all).unwrap();
        conn.write("/k", "old").unwrap();
        injector
            .isolate(&Endpoint::new("a", "1"), Duration::from_secs(1))
            .unwrap();
        conn.write("/k", "new").unwrap();

        // Through the quorum: the new value. Direct to the isolated node:
        // the frozen one.
        assert_eq!(conn.read("/k").unwrap(), Some("new".to_string()));
        let direct = connector
            .connect(&AddressList::single(Endpoint::new("a", "1")))
            .unwrap();
        assert_eq!(direct.read("/k").unwrap(), Some("old".to_string()));
    }

    #[test]
    fn test_election_countdown_resolves_on_polled_node() {
        let cluster = SimCluster::with_no_leader();
        cluster.set_election_countdown(2);
        let connector = SimConnector::new(&cluster);
        let conn = connector
            .connect(&AddressList::parse("a:1,b:2").unwrap())
            .unwrap();

        let first = conn
            .status(&Endpoint::new("a", "1"), Duration::ZERO)
            .unwrap();
        assert!(!first.is_leader);
        let second = conn
            .status(&Endpoint::new("b", "2"), Duration::ZERO)
            .unwrap();
        assert!(second.is_leader);
        assert_eq!(cluster.leader_port(), Some("2".to_string()));
    }
}
