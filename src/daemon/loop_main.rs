//! Main monitoring loop: periodic checks, event coalescing, config reload,
//! graceful shutdown.
//!
//! Architecture: the monitor thread owns every piece of mutable state and
//! waits on one bounded crossbeam channel. Watcher threads, the signal thread
//! and callers holding [`MonitorDaemon::event_sender`] only produce
//! [`MonitorEvent`]s. The periodic check is the `recv_timeout` deadline.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::core::config::{
    Config, ConfigProvider, MAX_CHECK_INTERVAL_SECS, NotifierConfig, ThresholdClamp,
};
use crate::core::errors::{LdsmError, Result};
use crate::daemon::notifications::{AnalyzerLauncher, NotificationDispatcher, build_notifier};
use crate::daemon::signals::SignalHandler;
use crate::daemon::watch::{MonitorEvent, Watcher, spawn_config_watcher, spawn_mount_watcher};
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::monitor::check::{CheckReport, DiskSpaceMonitor};
use crate::platform::pal::{Platform, detect_platform};
use crate::platform::probe::TimedStatsProbe;

/// Monitor event channel capacity. Watchers retry when it is full.
const EVENT_CHANNEL_CAP: usize = 64;

// ──────────────────── options ────────────────────

/// Which optional subsystems `run` starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonOptions {
    /// Forward SIGTERM/SIGINT/SIGHUP/SIGUSR1 into the event loop.
    pub handle_signals: bool,
    /// Write the JSONL activity log.
    pub activity_log: bool,
    pub watch_mounts: bool,
    pub watch_config: bool,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            handle_signals: true,
            activity_log: true,
            watch_mounts: true,
            watch_config: true,
        }
    }
}

impl DaemonOptions {
    /// Everything off: events only arrive through `event_sender`.
    #[must_use]
    pub fn headless() -> Self {
        Self {
            handle_signals: false,
            activity_log: false,
            watch_mounts: false,
            watch_config: false,
        }
    }
}

// ──────────────────── event batching ────────────────────

/// Events drained in one wake-up, collapsed to what needs doing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct EventBatch {
    shutdown: Option<String>,
    config_changed: bool,
    mounts_changed: bool,
    check_now: bool,
}

impl EventBatch {
    fn collect(first: MonitorEvent, rest: impl Iterator<Item = MonitorEvent>) -> Self {
        let mut batch = Self::default();
        batch.absorb(first);
        for event in rest {
            batch.absorb(event);
        }
        batch
    }

    fn absorb(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::MountsChanged => self.mounts_changed = true,
            MonitorEvent::ConfigChanged => self.config_changed = true,
            MonitorEvent::CheckNow => self.check_now = true,
            MonitorEvent::Shutdown { reason } => {
                // First reason wins.
                self.shutdown.get_or_insert(reason);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaemonState {
    Ready,
    Running,
    Stopped,
}

// ──────────────────── main daemon struct ────────────────────

/// The low-disk-space daemon.
pub struct MonitorDaemon {
    config: Config,
    provider: Arc<dyn ConfigProvider>,
    platform: Arc<dyn Platform>,
    monitor: DiskSpaceMonitor,
    options: DaemonOptions,
    logger_handle: Option<ActivityLoggerHandle>,
    logger_join: Option<thread::JoinHandle<()>>,
    events_tx: Sender<MonitorEvent>,
    events_rx: Receiver<MonitorEvent>,
    state: DaemonState,
    start_time: Instant,
    checks_run: u64,
}

impl MonitorDaemon {
    /// Build the daemon for the host platform with the configured notifier.
    pub fn init(
        config: Config,
        provider: Arc<dyn ConfigProvider>,
        options: DaemonOptions,
    ) -> Result<Self> {
        let platform = detect_platform(&config.paths)?;
        let dispatcher = NotificationDispatcher::from_config(&config.notifier);
        Self::with_parts(config, provider, platform, dispatcher, options)
    }

    /// Build the daemon from explicit parts.
    pub fn with_parts(
        config: Config,
        provider: Arc<dyn ConfigProvider>,
        platform: Arc<dyn Platform>,
        dispatcher: NotificationDispatcher,
        options: DaemonOptions,
    ) -> Result<Self> {
        let (logger_handle, logger_join) = if options.activity_log {
            let (handle, join) = spawn_logger(ActivityLoggerConfig {
                jsonl: JsonlConfig::for_path(config.paths.activity_log.clone()),
                ..ActivityLoggerConfig::default()
            })?;
            (Some(handle), Some(join))
        } else {
            (None, None)
        };

        let (thresholds, clamps) = config.thresholds();
        let probe = TimedStatsProbe::new(
            Arc::clone(&platform).into_stats_probe(),
            config.scheduler.probe_timeout(),
        );
        let mut monitor = DiskSpaceMonitor::new(
            Arc::clone(&platform).into_mount_source(),
            Arc::new(probe),
            thresholds,
            dispatcher,
        );
        if let Some(handle) = &logger_handle {
            monitor = monitor.with_activity(handle.clone());
        }

        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAP);
        let daemon = Self {
            config,
            provider,
            platform,
            monitor,
            options,
            logger_handle,
            logger_join,
            events_tx,
            events_rx,
            state: DaemonState::Ready,
            start_time: Instant::now(),
            checks_run: 0,
        };
        daemon.log_clamps(&clamps);
        Ok(daemon)
    }

    /// A sender that can wake the loop (tests, embedding applications).
    #[must_use]
    pub fn event_sender(&self) -> Sender<MonitorEvent> {
        self.events_tx.clone()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn monitor(&self) -> &DiskSpaceMonitor {
        &self.monitor
    }

    /// Number of check cycles run so far.
    #[must_use]
    pub fn checks_run(&self) -> u64 {
        self.checks_run
    }

    /// Run the monitoring loop until shutdown is requested.
    ///
    /// A daemon runs once: its watchers and logger are torn down on exit.
    pub fn run(&mut self) -> Result<()> {
        if self.state != DaemonState::Ready {
            return Err(LdsmError::Runtime {
                details: "monitor already started; build a new daemon to run again".to_string(),
            });
        }
        self.state = DaemonState::Running;
        self.start_time = Instant::now();

        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.log(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config_hash.clone(),
            notifier: self.monitor.dispatcher().notifier_name().to_string(),
        });
        eprintln!(
            "[LDSM-DAEMON] started (version={} config_hash={config_hash} notifier={})",
            env!("CARGO_PKG_VERSION"),
            self.monitor.dispatcher().notifier_name()
        );

        let (watchers, signals) = match self.start_producers() {
            Ok(producers) => producers,
            Err(error) => {
                self.log(ActivityEvent::from_error(&error));
                self.finish("startup failed");
                return Err(error);
            }
        };

        if self.config.scheduler.check_on_start {
            self.run_check();
        }
        let reason = self.event_loop();

        for watcher in watchers {
            watcher.stop();
        }
        if let Some(signals) = signals {
            signals.stop();
        }
        self.finish(&reason);
        Ok(())
    }

    // ──────────────────── loop ────────────────────

    fn event_loop(&mut self) -> String {
        let mut next_check = self.next_deadline();

        loop {
            let timeout = next_check.saturating_duration_since(Instant::now());
            let batch = match self.events_rx.recv_timeout(timeout) {
                Ok(first) => EventBatch::collect(first, self.events_rx.try_iter()),
                Err(RecvTimeoutError::Timeout) => EventBatch::default(),
                Err(RecvTimeoutError::Disconnected) => {
                    return "event channel closed".to_string();
                }
            };

            if let Some(reason) = batch.shutdown {
                eprintln!("[LDSM-DAEMON] shutdown requested ({reason})");
                return reason;
            }

            if batch.config_changed {
                self.reload_config();
                next_check = next_check.min(self.next_deadline());
            }

            let due = Instant::now() >= next_check;
            if batch.mounts_changed {
                let (purged, report) = self.monitor.on_mounts_changed(Instant::now());
                if !purged.is_empty() {
                    eprintln!("[LDSM-DAEMON] mounts changed, purged {}", join_paths(&purged));
                }
                self.after_check(&report);
            } else if batch.check_now || due {
                self.run_check();
            } else {
                continue;
            }
            next_check = self.next_deadline();
        }
    }

    /// Deadline of the next periodic check. Saturates at one day when the
    /// configured interval would overflow `Instant`.
    fn next_deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.scheduler.check_interval())
            .unwrap_or_else(|| now + Duration::from_secs(MAX_CHECK_INTERVAL_SECS))
    }

    fn run_check(&mut self) -> CheckReport {
        let report = self.monitor.check_all_mounts(Instant::now());
        self.after_check(&report);
        report
    }

    fn after_check(&mut self, report: &CheckReport) {
        self.checks_run += 1;
        for path in &report.recovered {
            eprintln!("[LDSM-CHECK] {} recovered", path.display());
        }
        for (path, outcome) in report.notifications() {
            eprintln!("[LDSM-CHECK] warned about {}: {outcome:?}", path.display());
        }
    }

    fn start_producers(&self) -> Result<(Vec<Watcher>, Option<SignalHandler>)> {
        let mut watchers = Vec::new();
        if self.options.watch_mounts {
            watchers.push(spawn_mount_watcher(
                Arc::clone(&self.platform).into_mount_source(),
                self.config.scheduler.mount_poll_interval(),
                self.events_tx.clone(),
            )?);
        }
        if self.options.watch_config {
            watchers.push(spawn_config_watcher(
                Arc::clone(&self.provider),
                self.config.scheduler.config_poll_interval(),
                self.events_tx.clone(),
            )?);
        }
        let signals = if self.options.handle_signals {
            Some(SignalHandler::install(self.events_tx.clone())?)
        } else {
            None
        };
        Ok((watchers, signals))
    }

    // ──────────────────── config reload ────────────────────

    fn reload_config(&mut self) {
        let new_config = match self.provider.load() {
            Ok(config) => config,
            Err(error) => {
                eprintln!("[LDSM-CONFIG] reload failed, keeping previous settings: {error}");
                self.log(ActivityEvent::from_error(&error));
                return;
            }
        };

        let old_hash = self.config.stable_hash().unwrap_or_default();
        let new_hash = new_config.stable_hash().unwrap_or_default();
        if old_hash == new_hash {
            eprintln!("[LDSM-CONFIG] config unchanged, skipping reload");
            return;
        }

        let (thresholds, clamps) = new_config.thresholds();
        self.log_clamps(&clamps);
        let purged = self.monitor.apply_thresholds(thresholds);
        self.apply_notifier_config(&new_config.notifier);

        if new_config.paths != self.config.paths
            || new_config.scheduler.mount_poll_interval_ms
                != self.config.scheduler.mount_poll_interval_ms
            || new_config.scheduler.config_poll_interval_ms
                != self.config.scheduler.config_poll_interval_ms
            || new_config.scheduler.probe_timeout_ms != self.config.scheduler.probe_timeout_ms
        {
            eprintln!("[LDSM-CONFIG] path, poll and probe settings take effect after restart");
        }

        self.log(ActivityEvent::ConfigReloaded {
            config_hash: new_hash.clone(),
            purged: purged
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        });
        eprintln!("[LDSM-CONFIG] config reloaded ({old_hash} -> {new_hash})");
        self.config = new_config;
    }

    fn apply_notifier_config(&mut self, next: &NotifierConfig) {
        let current = &self.config.notifier;
        let dispatcher = self.monitor.dispatcher_mut();
        if next.backend != current.backend
            || next.desktop_timeout_secs != current.desktop_timeout_secs
        {
            dispatcher.set_notifier(build_notifier(next));
        }
        if next.analyzer_program != current.analyzer_program {
            dispatcher.set_analyzer(AnalyzerLauncher::new(next.analyzer_program.clone()));
        }
    }

    fn log_clamps(&self, clamps: &[ThresholdClamp]) {
        for clamp in clamps {
            eprintln!("[LDSM-CONFIG] {clamp}");
            self.log(ActivityEvent::ConfigClamped {
                key: clamp.key.to_string(),
                value: clamp.value,
                fallback: clamp.fallback,
            });
        }
    }

    // ──────────────────── shutdown ────────────────────

    fn finish(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();

        // A dialog still on screen belongs to a notifier call that has
        // already returned; nothing here can interrupt it.
        self.monitor.clear_state();

        self.log(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        if let Some(handle) = self.logger_handle.take() {
            handle.shutdown();
        }
        if let Some(join) = self.logger_join.take()
            && join.join().is_err()
        {
            eprintln!("[LDSM-DAEMON] logger thread panicked");
        }

        self.state = DaemonState::Stopped;
        eprintln!(
            "[LDSM-DAEMON] shutdown complete (reason={reason} uptime={uptime_secs}s checks={})",
            self.checks_run
        );
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(handle) = &self.logger_handle {
            handle.send(event);
        }
    }
}

impl Drop for MonitorDaemon {
    fn drop(&mut self) {
        if let Some(handle) = self.logger_handle.take() {
            handle.shutdown();
        }
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }
}

fn join_paths(paths: &[std::path::PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ──────────────────── tests ────────────────────
