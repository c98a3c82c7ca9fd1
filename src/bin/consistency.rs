//! Consistency probe: partitions the current leader away from its peers,
//! writes through the replacement leader, then reads back through the old
//! one. Exit code 0 means the run completed (with or without a violation —
//! the violation itself is the probe's designed output), 1 means a client
//! failure, 2 means the isolated former leader still claimed leadership.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use kvprobe::client::HttpConnector;
use kvprobe::cluster::AddressList;
use kvprobe::fault::{CleanupGuard, NetworkFaults};
use kvprobe::logging;
use kvprobe::verify::{self, Verdict, VerifyReport};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Check that a leader cut off from its peers cannot serve stale data.
#[derive(Debug, Parser)]
#[command(name = "kvprobe-consistency")]
struct Args {
    /// Cluster members as a comma-separated host:port list.
    #[arg(long, default_value = "localhost:5254")]
    cluster: String,

    /// Log filter directive, e.g. "info" or "kvprobe=debug".
    #[arg(long, default_value = "info")]
    verbosity: String,
}

fn main() -> ExitCode {
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
        Ok(report) => conclude(&report),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<VerifyReport> {
    logging::init(&args.verbosity)?;

    let cluster = AddressList::parse(&args.cluster)?;
    let injector = NetworkFaults::new();
    // Held for the whole run: every exit path below tears the rules down.
    let _cleanup = CleanupGuard::new(&injector);

    injector.throttle(&cluster);

    let connector = HttpConnector::new(REQUEST_TIMEOUT);
    let report = verify::run(&connector, &injector, &cluster)?;
    Ok(report)
}

fn conclude(report: &VerifyReport) -> ExitCode {
    match &report.verdict {
        Verdict::Consistent => info!("consistency check passed"),
        Verdict::Violation { expected, observed } => warn!(
            %expected,
            ?observed,
            "consistency violation: the old leader served stale data"
        ),
    }
    if report.stale_leader {
        warn!("old leader failed to relinquish leadership");
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
