//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP config reload,
//! SIGUSR1 immediate check.
//!
//! Uses `signal-hook` for safe registration. A dedicated thread turns each
//! delivered signal into a [`MonitorEvent`] so the monitor thread wakes up
//! immediately instead of polling flags.

#![allow(missing_docs)]

use std::thread;

use crossbeam_channel::Sender;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::{Handle, Signals};

use crate::core::errors::{LdsmError, Result};
use crate::daemon::watch::MonitorEvent;

const HANDLED_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGHUP, SIGUSR1];

/// Map a delivered signal to the event the monitor should see.
#[must_use]
pub fn event_for_signal(signal: i32) -> Option<MonitorEvent> {
    match signal {
        SIGTERM => Some(MonitorEvent::Shutdown {
            reason: "SIGTERM".to_string(),
        }),
        SIGINT => Some(MonitorEvent::Shutdown {
            reason: "SIGINT".to_string(),
        }),
        SIGHUP => Some(MonitorEvent::ConfigChanged),
        SIGUSR1 => Some(MonitorEvent::CheckNow),
        _ => None,
    }
}

/// Owns the signal registration and the forwarding thread.
///
/// Dropping the handler unregisters nothing (signal-hook keeps the hooks for
/// the life of the process) but stops forwarding.
pub struct SignalHandler {
    handle: Handle,
    join: Option<thread::JoinHandle<()>>,
}

impl SignalHandler {
    /// Register SIGTERM, SIGINT, SIGHUP and SIGUSR1 and start forwarding them.
    pub fn install(tx: Sender<MonitorEvent>) -> Result<Self> {
        let mut signals = Signals::new(HANDLED_SIGNALS).map_err(|e| LdsmError::Runtime {
            details: format!("failed to register signal handlers: {e}"),
        })?;
        let handle = signals.handle();

        let join = thread::Builder::new()
            .name("ldsm-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    let Some(event) = event_for_signal(signal) else {
                        continue;
                    };
                    eprintln!("[LDSM-SIGNAL] received signal {signal} -> {event:?}");
                    // Blocking send: a shutdown request must never be dropped.
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| LdsmError::Runtime {
                details: format!("failed to spawn signal thread: {e}"),
            })?;

        Ok(Self {
            handle,
            join: Some(join),
        })
    }

    /// Stop forwarding and join the thread.
    pub fn stop(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.handle.close();
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            eprintln!("[LDSM-SIGNAL] signal thread panicked");
        }
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.close();
    }
}
