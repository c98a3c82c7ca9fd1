//! Throughput benchmark: hammers one key with concurrent readers or writers
//! and reports operations per second.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;

use kvprobe::bench::{self, BenchConfig, OperationKind};
use kvprobe::client::HttpClient;
use kvprobe::cluster::AddressList;
use kvprobe::deadline::{DeadlineTimer, StopFlag};
use kvprobe::logging;

/// Key every worker reads or writes.
const BENCH_KEY: &str = "/bench";
/// Per-request timeout, independent of the overall run deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OpType {
    Read,
    Write,
}

impl From<OpType> for OperationKind {
    fn from(kind: OpType) -> OperationKind {
        match kind {
            OpType::Read => OperationKind::Read,
            OpType::Write => OperationKind::Write,
        }
    }
}

/// Measure read or write throughput against a key-value cluster.
#[derive(Debug, Parser)]
#[command(name = "kvprobe-benchmark")]
struct Args {
    /// Cluster members as a comma-separated host:port list.
    #[arg(long, default_value = "localhost:5254")]
    cluster: String,

    /// Size of the value written, in bytes.
    #[arg(long, default_value_t = 1024)]
    size: usize,

    /// Number of concurrent worker threads.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Operation each worker repeats.
    #[arg(long = "operation-type", value_enum, default_value = "read")]
    operation_type: OpType,

    /// Overall run deadline; workers stop at the next iteration boundary.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Total operations, split across the workers.
    #[arg(long, default_value_t = 1000)]
    operations: u64,

    /// If set, the measured operations per second are written here as a
    /// single decimal number.
    #[arg(long = "opsPerSecFile")]
    ops_per_sec_file: Option<PathBuf>,

    /// Log filter directive, e.g. "info" or "kvprobe=debug".
    #[arg(long, default_value = "info")]
    verbosity: String,
}

fn main() -> ExitCode {
    // clap exits 2 on bad arguments by default; this tool reserves 2-free
    // exit codes (0 success, 1 failure), so parse errors are mapped by hand.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    logging::init(&args.verbosity)?;

    let targets = AddressList::parse(&args.cluster)?;
    let client = HttpClient::connect(targets, REQUEST_TIMEOUT)?;

    let config = BenchConfig {
        workers: args.threads,
        total_operations: args.operations,
        kind: args.operation_type.into(),
        key: BENCH_KEY.to_string(),
        value: "v".repeat(args.size),
    };
    info!(
        threads = config.workers,
        operations = config.total_operations,
        kind = %config.kind,
        timeout = %humantime::format_duration(args.timeout),
        "starting benchmark"
    );

    let stop = StopFlag::new();
    let timer = DeadlineTimer::start(args.timeout, stop.clone());
    let result = bench::run(&client, &config, &stop);
    timer.stop();
    let report = result?;

    info!(
        "Benchmark took {} ms to do {} operations",
        report.elapsed.as_millis(),
        report.total_operations()
    );
    let ops_per_sec = report.ops_per_sec();
    info!("{:.1} operations per second", ops_per_sec);

    if let Some(path) = &args.ops_per_sec_file {
        bench::write_ops_per_sec(path, ops_per_sec)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
