//! Concurrent read/write benchmark engine.
//!
//! Spawns a fixed number of OS worker threads, each repeating one operation
//! against a single key until its share of the operation budget is exhausted
//! or the shared stop flag trips. Worker counters are exclusively owned and
//! aggregated only after all workers have joined.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::client::{ClientError, KvCluster};
use crate::deadline::StopFlag;

/// Which single-key operation the benchmark repeats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => f.write_str("read"),
            OperationKind::Write => f.write_str("write"),
        }
    }
}

/// Benchmark parameters.
#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub workers: usize,
    pub total_operations: u64,
    pub kind: OperationKind,
    pub key: String,
    pub value: String,
}

/// A fatal benchmark failure. A malfunctioning cluster mid-run would corrupt
/// the throughput numbers, so the run is abandoned rather than tolerated.
#[derive(Debug, Error)]
#[error("{kind} of {key:?} failed on worker {worker}: {source}")]
pub struct BenchError {
    pub worker: usize,
    pub kind: OperationKind,
    pub key: String,
    #[source]
    pub source: ClientError,
}

/// Aggregated outcome of one benchmark run.
#[derive(Clone, Debug)]
pub struct BenchReport {
    /// Completed operations per worker, indexed by worker.
    pub per_worker: Vec<u64>,
    /// Wall-clock time from first spawn to last join.
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn total_operations(&self) -> u64 {
        self.per_worker.iter().sum()
    }

    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_operations() as f64 / secs
        }
    }
}

/// Number of operations assigned to one worker.
///
/// The budget splits evenly; the first `total % workers` workers by index
/// take one extra, so the assignments always sum to `total` and differ by at
/// most one.
pub fn operations_for_worker(total: u64, workers: usize, index: usize) -> u64 {
    debug_assert!(workers > 0 && index < workers);
    let workers = workers as u64;
    let base = total / workers;
    if (index as u64) < total % workers {
        base + 1
    } else {
        base
    }
}

/// Run the benchmark to completion or cancellation.
///
/// The first worker to hit a fatal error trips the stop flag so its siblings
/// wind down at their next iteration boundary; the coordinator reports that
/// error alone. Zero workers or a zero budget completes immediately.
pub fn run<C>(client: &C, config: &BenchConfig, stop: &StopFlag) -> Result<BenchReport, BenchError>
where
    C: KvCluster + Sync,
{
    if config.workers == 0 || config.total_operations == 0 {
        return Ok(BenchReport {
            per_worker: vec![0; config.workers],
            elapsed: Duration::ZERO,
        });
    }

    let started = Instant::now();
    let results: Vec<Result<u64, BenchError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.workers)
            .map(|index| scope.spawn(move || worker_loop(index, client, config, stop)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("benchmark worker panicked"))
            .collect()
    });
    let elapsed = started.elapsed();

    let mut per_worker = Vec::with_capacity(config.workers);
    let mut first_error = None;
    for result in results {
        match result {
            Ok(done) => per_worker.push(done),
            Err(err) if first_error.is_none() => first_error = Some(err),
            Err(_) => {}
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(BenchReport { per_worker, elapsed }),
    }
}

fn worker_loop<C: KvCluster>(
    index: usize,
    client: &C,
    config: &BenchConfig,
    stop: &StopFlag,
) -> Result<u64, BenchError> {
    let quota = operations_for_worker(config.total_operations, config.workers, index);
    let mut done = 0;
    for i in 0..quota {
        if stop.is_set() {
            break;
        }
        let result = match config.kind {
            // A missing key reads as Ok(None): the benchmark key may not
            // have been written yet.
            OperationKind::Read => client.read(&config.key).map(|_| ()),
            OperationKind::Write => client.write(&config.key, &config.value),
        };
        if let Err(source) = result {
            stop.trigger();
            return Err(BenchError {
                worker: index,
                kind: config.kind,
                key: config.key.clone(),
                source,
            });
        }
        done = i + 1;
    }
    debug!(worker = index, done, quota, "worker finished");
    Ok(done)
}

/// Persist the throughput number: a single decimal value, no trailing
/// newline.
pub fn write_ops_per_sec(path: &Path, ops_per_sec: f64) -> io::Result<()> {
    fs::write(path, format!("{}", ops_per_sec))
}
