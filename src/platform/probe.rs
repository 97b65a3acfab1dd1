//! Stats probing with a hard per-call deadline.
//!
//! A hung network filesystem can block `statvfs` indefinitely. Each probe runs
//! on a short-lived helper thread; if it misses the deadline the caller gets
//! [`LdsmError::ProbeTimeout`] and the helper is left to finish on its own.
//! While a helper for a path is still outstanding, further probes of that path
//! time out immediately, so a stuck mount holds at most one helper thread.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use parking_lot::Mutex;

use crate::core::errors::{LdsmError, Result};
use crate::platform::pal::{BlockStats, StatsProbe};

/// [`StatsProbe`] decorator that bounds every call by `timeout`.
pub struct TimedStatsProbe {
    inner: Arc<dyn StatsProbe>,
    timeout: Duration,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Removes a path from the in-flight set when its helper thread finishes.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.path);
    }
}

impl TimedStatsProbe {
    #[must_use]
    pub fn new(inner: Arc<dyn StatsProbe>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of helper threads that have not returned yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn timed_out(&self, path: &Path) -> LdsmError {
        LdsmError::ProbeTimeout {
            path: path.to_path_buf(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn run<T, F>(&self, path: &Path, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StatsProbe, &Path) -> Result<T> + Send + 'static,
    {
        if !self.in_flight.lock().insert(path.to_path_buf()) {
            return Err(self.timed_out(path));
        }
        let guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            path: path.to_path_buf(),
        };

        let (tx, rx) = bounded(1);
        let inner = Arc::clone(&self.inner);

        thread::Builder::new()
            .name("ldsm-probe".to_string())
            .spawn(move || {
                let outcome = call(inner.as_ref(), &guard.path);
                drop(guard);
                // Receiver is gone once the deadline passed.
                let _ = tx.send(outcome);
            })
            .map_err(|error| LdsmError::FsStats {
                path: path.to_path_buf(),
                details: format!("failed to spawn probe thread: {error}"),
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out(path)),
            Err(RecvTimeoutError::Disconnected) => Err(LdsmError::FsStats {
                path: path.to_path_buf(),
                details: "probe thread exited without a result".to_string(),
            }),
        }
    }
}

impl StatsProbe for TimedStatsProbe {
    fn block_stats(&self, path: &Path) -> Result<BlockStats> {
        self.run(path, |probe, path| probe.block_stats(path))
    }

    fn filesystem_id(&self, path: &Path) -> Result<u64> {
        self.run(path, |probe, path| probe.filesystem_id(path))
    }
}
