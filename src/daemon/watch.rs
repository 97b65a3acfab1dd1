//! Polling watchers that turn external changes into [`MonitorEvent`]s.
//!
//! Watchers only produce events; all state lives on the monitor thread. A
//! change is reported at most once per poll interval, and a change that
//! cannot be queued because the channel is full is retried on the next poll.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError, bounded};

use crate::core::config::{ChangeStamp, ConfigProvider};
use crate::core::errors::{LdsmError, Result};
use crate::platform::pal::MountSource;

/// Everything that can wake the monitor thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The live mount table changed.
    MountsChanged,
    /// Settings changed (file edit or SIGHUP).
    ConfigChanged,
    /// Run a check now (SIGUSR1).
    CheckNow,
    Shutdown { reason: String },
}

/// Handle to a running watcher thread. Stops the thread when dropped.
pub struct Watcher {
    name: &'static str,
    stop_tx: Option<Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl Watcher {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the thread to exit and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop_tx.take();
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            eprintln!("[LDSM-WATCH] {} watcher panicked", self.name);
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn a thread that calls `poll` every `interval` until stopped or until
/// `poll` returns `false`.
fn spawn_poller<F>(name: &'static str, interval: Duration, mut poll: F) -> Result<Watcher>
where
    F: FnMut() -> bool + Send + 'static,
{
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let join = thread::Builder::new()
        .name(format!("ldsm-{name}-watch"))
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !poll() {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .map_err(|e| LdsmError::Runtime {
            details: format!("failed to spawn {name} watcher: {e}"),
        })?;

    Ok(Watcher {
        name,
        stop_tx: Some(stop_tx),
        join: Some(join),
    })
}

/// Queue `event`. Returns `Some(true)` when sent, `Some(false)` when the
/// channel is full, `None` when the receiver is gone.
fn offer(tx: &Sender<MonitorEvent>, event: MonitorEvent) -> Option<bool> {
    match tx.try_send(event) {
        Ok(()) => Some(true),
        Err(TrySendError::Full(_)) => Some(false),
        Err(TrySendError::Disconnected(_)) => None,
    }
}

/// Watch the live mount table fingerprint.
pub fn spawn_mount_watcher(
    source: Arc<dyn MountSource>,
    interval: Duration,
    tx: Sender<MonitorEvent>,
) -> Result<Watcher> {
    let mut last = source.mount_table_fingerprint().ok();
    let mut read_failed = false;

    spawn_poller("mount", interval, move || {
        let current = match source.mount_table_fingerprint() {
            Ok(fingerprint) => {
                read_failed = false;
                fingerprint
            }
            Err(error) => {
                if !read_failed {
                    eprintln!("[LDSM-WATCH] cannot read mount table: {error}");
                    read_failed = true;
                }
                return true;
            }
        };

        if last == Some(current) {
            return true;
        }
        match offer(&tx, MonitorEvent::MountsChanged) {
            Some(true) => {
                last = Some(current);
                true
            }
            Some(false) => true,
            None => false,
        }
    })
}

/// Watch the configuration source for changes.
pub fn spawn_config_watcher(
    provider: Arc<dyn ConfigProvider>,
    interval: Duration,
    tx: Sender<MonitorEvent>,
) -> Result<Watcher> {
    let mut last: Option<ChangeStamp> = provider.change_stamp();

    spawn_poller("config", interval, move || {
        let current = provider.change_stamp();
        if current == last {
            return true;
        }
        match offer(&tx, MonitorEvent::ConfigChanged) {
            Some(true) => {
                last = current;
                true
            }
            Some(false) => true,
            None => false,
        }
    })
}
