//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Everyone else holds an
//! [`ActivityLoggerHandle`] and sends [`ActivityEvent`]s over a bounded
//! crossbeam channel with `try_send`, so the monitor never blocks on logging.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{LdsmError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 256;

/// Events recorded in the activity log.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        notifier: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    CheckCompleted {
        mounts_checked: usize,
        mounts_low: usize,
        duration_ms: u64,
    },
    /// A warning was attempted; `response` is `None` when it was not shown.
    LowSpaceNotified {
        mount_point: String,
        free_ratio: f64,
        free_bytes: u64,
        response: Option<String>,
    },
    MountRecovered {
        mount_point: String,
        free_ratio: f64,
    },
    MountsChanged {
        purged: Vec<String>,
    },
    ConfigReloaded {
        config_hash: String,
        purged: Vec<String>,
    },
    ConfigClamped {
        key: String,
        value: f64,
        fallback: f64,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

impl ActivityEvent {
    /// Build an `Error` event from a crate error.
    #[must_use]
    pub fn from_error(error: &LdsmError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Cheaply cloneable sender side of the activity logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Non-blocking send; a full channel drops the event and counts it.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Options for the activity logger.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread and return a handle plus its join handle.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let jsonl_config = config.jsonl;
    let join = thread::Builder::new()
        .name("ldsm-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl_config, &dropped))
        .map_err(|e| LdsmError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));
        jsonl.flush();
    }

    jsonl.flush();
    jsonl.fsync();
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            notifier,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} notifier={notifier}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::CheckCompleted {
            mounts_checked,
            mounts_low,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::CheckComplete, Severity::Info);
            e.mounts_checked = Some(*mounts_checked);
            e.mounts_low = Some(*mounts_low);
            e.duration_ms = Some(*duration_ms);
            e
        }
        ActivityEvent::LowSpaceNotified {
            mount_point,
            free_ratio,
            free_bytes,
            response,
        } => {
            let mut e = LogEntry::new(EventType::LowSpaceNotified, Severity::Warning);
            e.mount_point = Some(mount_point.clone());
            e.free_ratio = Some(*free_ratio);
            e.free_bytes = Some(*free_bytes);
            e.response = Some(response.clone().unwrap_or_else(|| "not_shown".to_string()));
            e.ok = Some(response.is_some());
            e
        }
        ActivityEvent::MountRecovered {
            mount_point,
            free_ratio,
        } => {
            let mut e = LogEntry::new(EventType::MountRecovered, Severity::Info);
            e.mount_point = Some(mount_point.clone());
            e.free_ratio = Some(*free_ratio);
            e
        }
        ActivityEvent::MountsChanged { purged } => {
            let mut e = LogEntry::new(EventType::MountsChanged, Severity::Info);
            e.purged = Some(purged.clone());
            e
        }
        ActivityEvent::ConfigReloaded {
            config_hash,
            purged,
        } => {
            let mut e = LogEntry::new(EventType::ConfigReload, Severity::Info);
            e.details = Some(format!("config_hash={config_hash}"));
            e.purged = Some(purged.clone());
            e
        }
        ActivityEvent::ConfigClamped {
            key,
            value,
            fallback,
        } => {
            let mut e = LogEntry::new(EventType::ConfigClamped, Severity::Warning);
            e.details = Some(format!("{key}={value} out of range, using {fallback}"));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config(dir: &Path, capacity: usize) -> ActivityLoggerConfig {
        ActivityLoggerConfig {
            jsonl: JsonlConfig {
                path: dir.join("activity.jsonl"),
                fallback_path: None,
                max_size_bytes: 10 * 1024 * 1024,
                max_rotated_files: 3,
                fsync_interval_secs: 60,
            },
            channel_capacity: capacity,
        }
    }

    fn read_lines(dir: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(dir.join("activity.jsonl"))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 64)).unwrap();
        handle.send(ActivityEvent::DaemonStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc".to_string(),
            notifier: "journal".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let lines = read_lines(dir.path());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event"], "daemon_start");
    }

    #[test]
    fn monitor_events_map_to_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 64)).unwrap();
        let h2 = handle.clone();

        handle.send(ActivityEvent::LowSpaceNotified {
            mount_point: "/data".to_string(),
            free_ratio: 0.04,
            free_bytes: 4096,
            response: None,
        });
        h2.send(ActivityEvent::MountsChanged {
            purged: vec!["/mnt/usb".to_string()],
        });
        handle.send(ActivityEvent::from_error(&LdsmError::Runtime {
            details: "boom".to_string(),
        }));
        handle.shutdown();
        join.join().unwrap();

        let lines = read_lines(dir.path());
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["response"], "not_shown");
        assert_eq!(lines[0]["ok"], false);
        assert_eq!(lines[1]["purged"][0], "/mnt/usb");
        assert_eq!(lines[2]["error_code"], "LDSM-3900");
    }

    #[test]
    fn dropped_counter_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 1)).unwrap();
        assert_eq!(handle.dropped_events(), 0);
        handle.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn thread_exits_when_all_handles_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 8)).unwrap();
        handle.send(ActivityEvent::CheckCompleted {
            mounts_checked: 3,
            mounts_low: 1,
            duration_ms: 2,
        });
        drop(handle);
        join.join().unwrap();
        assert_eq!(read_lines(dir.path())[0]["mounts_low"], 1);
    }
}
