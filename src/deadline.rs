//! Run deadline tracking.
//!
//! A shared one-shot stop flag plus a background timer thread that trips the
//! flag once the configured wall-clock duration has elapsed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the timer thread re-checks the clock and the flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancellation flag. Transitions false to true at most once per run;
/// the flag is monotonic, so concurrent triggers and relaxed reads are
/// harmless. Workers read it at iteration boundaries only, never mid
/// operation.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        StopFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Background timer that trips a `StopFlag` after a fixed duration.
///
/// The thread sleeps in short increments rather than one long sleep so that
/// `stop` can wind it down promptly. A zero duration fires on the first poll.
pub struct DeadlineTimer {
    flag: StopFlag,
    thread: JoinHandle<()>,
}

impl DeadlineTimer {
    pub fn start(duration: Duration, flag: StopFlag) -> Self {
        let timer_flag = flag.clone();
        let thread = thread::spawn(move || {
            let started = Instant::now();
            while !timer_flag.is_set() {
                if started.elapsed() >= duration {
                    timer_flag.trigger();
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        });
        DeadlineTimer { flag, thread }
    }

    /// Trip the flag immediately and wait for the timer thread to observe it
    /// and exit.
    pub fn stop(self) {
        self.flag.trigger();
        let _ = self.thread.join();
    }
}
