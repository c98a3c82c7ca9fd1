//! End-to-end runs of the benchmark and the consistency probe against the
//! in-process simulated cluster.

use std::time::Duration;

use kvprobe::bench::{self, BenchConfig, OperationKind};
use kvprobe::client::Connector;
use kvprobe::cluster::AddressList;
use kvprobe::deadline::{DeadlineTimer, StopFlag};
use kvprobe::fault::CleanupGuard;
use kvprobe::testing::{SimCluster, SimConnector, SimInjector};
use kvprobe::verify::{self, Verdict};

fn three_nodes() -> AddressList {
    AddressList::parse("node-a:5254,node-b:5255,node-c:5256").unwrap()
}

#[test]
fn test_benchmark_completes_within_deadline() {
    let cluster = SimCluster::new("5254");
    let client = SimConnector::new(&cluster)
        .connect(&three_nodes())
        .unwrap();
    let config = BenchConfig {
        workers: 4,
        total_operations: 1000,
        kind: OperationKind::Write,
        key: "/bench".to_string(),
        value: "v".repeat(1024),
    };

    let stop = StopFlag::new();
    let timer = DeadlineTimer::start(Duration::from_secs(30), stop.clone());
    let report = bench::run(&client, &config, &stop).unwrap();
    timer.stop();

    assert_eq!(report.total_operations(), 1000);
    assert_eq!(report.per_worker, vec![250, 250, 250, 250]);
    assert_eq!(cluster.get("/bench"), Some("v".repeat(1024)));
    assert!(report.ops_per_sec() > 0.0);
}

#[test]
fn test_benchmark_deadline_cuts_the_run_short() {
    let cluster = SimCluster::new("5254");
    let client = SimConnector::new(&cluster)
        .connect(&three_nodes())
        .unwrap();
    let config = BenchConfig {
        workers: 2,
        total_operations: u64::MAX,
        kind: OperationKind::Read,
        key: "/bench".to_string(),
        value: String::new(),
    };

    let stop = StopFlag::new();
    let timer = DeadlineTimer::start(Duration::from_millis(100), stop.clone());
    let report = bench::run(&client, &config, &stop).unwrap();
    timer.stop();

    // The deadline fired mid-run; partial counts are the expected outcome.
    assert!(stop.is_set());
    assert!(report.total_operations() < u64::MAX);
}

#[test]
fn test_consistency_probe_detects_a_stale_read() {
    let cluster = SimCluster::new("5254");
    cluster.on_isolation(true, true);
    let connector = SimConnector::new(&cluster);
    let injector = SimInjector::new(&cluster);

    let report = {
        let _cleanup = CleanupGuard::new(&injector);
        verify::run(&connector, &injector, &three_nodes()).unwrap()
    };

    assert_eq!(
        report.verdict,
        Verdict::Violation {
            expected: "bar".to_string(),
            observed: Some("foo".to_string()),
        }
    );
    assert!(report.stale_leader);
    // Teardown ran exactly once when the guard dropped.
    assert_eq!(cluster.cleanup_calls(), 1);
}

#[test]
fn test_consistency_probe_passes_on_a_well_behaved_cluster() {
    let cluster = SimCluster::new("5255");
    cluster.on_isolation(false, false);
    let connector = SimConnector::new(&cluster);
    let injector = SimInjector::new(&cluster);

    let report = {
        let _cleanup = CleanupGuard::new(&injector);
        verify::run(&connector, &injector, &three_nodes()).unwrap()
    };

    assert_eq!(report.verdict, Verdict::Consistent);
    assert!(!report.stale_leader);
    // The new leader came from the surviving members.
    assert_ne!(cluster.leader_port(), Some("5255".to_string()));
    assert_eq!(cluster.cleanup_calls(), 1);
}

#[test]
fn test_cleanup_runs_even_when_the_probe_fails() {
    // Writing the baseline fails, so the probe errors out early; the guard
    // still tears the faults down.
    let cluster = SimCluster::new("5254");
    cluster.fail_writes(true);
    let connector = SimConnector::new(&cluster);
    let injector = SimInjector::new(&cluster);

    let result = {
        let _cleanup = CleanupGuard::new(&injector);
        verify::run(&connector, &injector, &three_nodes())
    };

    assert!(result.is_err());
    assert_eq!(cluster.cleanup_calls(), 1);
}
