//! External test harness for a replicated key-value cluster.
//!
//! Two tools built on a shared client layer: a concurrent throughput
//! benchmark ([`bench`]) and a consistency probe ([`verify`]) that partitions
//! the current leader and checks whether it can still serve data older than
//! an acknowledged write.

pub mod bench;
pub mod client;
pub mod cluster;
pub mod deadline;
pub mod fault;
pub mod leader;
pub mod logging;
pub mod verify;

/// In-process simulated cluster for tests.
pub mod testing;

pub use client::{ClientError, Connector, HttpConnector, KvCluster};
pub use cluster::{AddressList, Endpoint};
