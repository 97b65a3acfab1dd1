//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use low_disk_monitor::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, ConfigProvider, FileConfigProvider, Thresholds};
pub use crate::core::errors::{LdsmError, Result};

// Platform
pub use crate::platform::pal::{
    BlockStats, LiveMount, MockPlatform, MountSource, Platform, StatsProbe, detect_platform,
};
pub use crate::platform::probe::TimedStatsProbe;

// Monitor
pub use crate::monitor::check::{CheckReport, DiskSpaceMonitor, Evaluation, MountStatus};
pub use crate::monitor::mounts::{MountCandidate, SkipReason, enumerate};
pub use crate::monitor::space::is_sufficient;
pub use crate::monitor::tracker::{DispatchOutcome, LowDecision, NotificationTracker, Response};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{DaemonOptions, MonitorDaemon};
pub use crate::daemon::notifications::{
    DialogGate, LowSpaceInfo, NotificationDispatcher, Notifier,
};
pub use crate::daemon::watch::MonitorEvent;
