//! Worker-side inactivity watchdog.
//!
//! An activity flag is raised by every protocol byte in either direction. A
//! background task wakes once per timeout interval; if the flag was not
//! raised since the last wake, the process exits. The task is independent of
//! the request-handling loop, so a hang inside the extraction engine cannot
//! keep the watchdog from firing.
//!
//! This bounds the lifetime of an idle, forgotten, or orphaned worker: no
//! process outlives its last protocol traffic by more than two intervals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Environment variable carrying the watchdog timeout in milliseconds.
/// Set at launch; the worker cannot receive it over the protocol before its
/// own main loop starts.
pub const WATCHDOG_ENV: &str = "FORKLET_WATCHDOG_MS";

/// Default watchdog timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Process exit code used when the watchdog fires.
pub const WATCHDOG_EXIT_CODE: i32 = 17;

/// Cloneable activity tracker shared between the request loop and the
/// watchdog task.
#[derive(Debug, Clone)]
pub struct Watchdog {
    active: Arc<AtomicBool>,
    timeout: Duration,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            // Starts active: the interval begins at construction, not at the
            // first byte.
            active: Arc::new(AtomicBool::new(true)),
            timeout,
        }
    }

    /// Timeout from `FORKLET_WATCHDOG_MS`, falling back to the default.
    pub fn timeout_from_env() -> Duration {
        std::env::var(WATCHDOG_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record protocol activity, pushing the deadline forward.
    pub fn refresh(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Consume the activity flag. Returns true if no activity occurred since
    /// the previous check.
    pub fn expired(&self) -> bool {
        !self.active.swap(false, Ordering::AcqRel)
    }

    /// Spawn the background task that terminates the process after a full
    /// interval without traffic. The exit is abrupt by design: a worker stuck
    /// inside the engine cannot unwind gracefully.
    pub fn spawn(&self) -> JoinHandle<()> {
        let watchdog = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(watchdog.timeout);
            // First tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if watchdog.expired() {
                    tracing::error!(
                        timeout_ms = watchdog.timeout.as_millis() as u64,
                        "no protocol traffic within watchdog interval, exiting"
                    );
                    std::process::exit(WATCHDOG_EXIT_CODE);
                }
            }
        })
    }
}
