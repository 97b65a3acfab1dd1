//! Configuration system: TOML file + env var overrides + smart defaults.
//!
//! Threshold values are never fatal: anything outside its documented domain is
//! replaced by the default and reported as a [`ThresholdClamp`] so the caller
//! can log it. Structural settings (intervals, analyzer name) are validated and
//! rejected at load time.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::errors::{LdsmError, Result};

/// One gibibyte, the unit of `free_size_gb_no_notify`.
pub const GIGABYTE: u64 = 1024 * 1024 * 1024;

/// Fallback for an out-of-range `free_percent_notify`.
pub const DEFAULT_FREE_PERCENT_NOTIFY: f64 = 0.05;
/// Fallback for an out-of-range `free_percent_notify_again`.
pub const DEFAULT_FREE_PERCENT_NOTIFY_AGAIN: f64 = 0.01;

/// Upper bound for `scheduler.check_interval_secs` (one day).
pub const MAX_CHECK_INTERVAL_SECS: u64 = 86_400;
/// Upper bound for the watcher poll intervals (one hour).
pub const MAX_POLL_INTERVAL_MS: u64 = 3_600_000;
/// Upper bound for `scheduler.probe_timeout_ms` (one minute).
pub const MAX_PROBE_TIMEOUT_MS: u64 = 60_000;

/// Full monitor configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub thresholds: ThresholdsConfig,
    pub scheduler: SchedulerConfig,
    pub notifier: NotifierConfig,
    pub paths: PathsConfig,
}

/// Raw threshold knobs as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Free ratio (0..1) at or below which a mount counts as low.
    pub free_percent_notify: f64,
    /// Further drop in free ratio required before notifying again.
    pub free_percent_notify_again: f64,
    /// Mounts with more free space than this many GiB are never low.
    pub free_size_gb_no_notify: u64,
    /// Minimum minutes between two notifications for the same mount.
    pub min_notify_period_minutes: u64,
    /// Mount paths excluded from monitoring (exact match).
    pub ignore_paths: Vec<String>,
}

/// Timer and watcher cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub check_interval_secs: u64,
    /// Poll cadence of the mount table watcher; doubles as the rate limit for
    /// mounts-changed events.
    pub mount_poll_interval_ms: u64,
    pub config_poll_interval_ms: u64,
    /// Upper bound on a single `statvfs` call.
    pub probe_timeout_ms: u64,
    /// Run one check immediately at startup instead of waiting a full interval.
    pub check_on_start: bool,
}

/// Which notifier presents low-space warnings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifierBackend {
    /// Desktop notification with actions via `notify-send --wait`.
    Desktop,
    /// Structured stderr line only; always reported as dismissed.
    Journal,
}

/// Notifier and analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifierConfig {
    pub backend: NotifierBackend,
    /// Disk-usage analyzer launched with the mount path as its argument.
    pub analyzer_program: String,
    /// Desktop notification expiry; 0 waits for the user.
    pub desktop_timeout_secs: u64,
}

/// Filesystem paths used by ldsm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
    /// Static mount table.
    pub fstab: PathBuf,
    /// Live mount table.
    pub mounts_table: PathBuf,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            free_percent_notify: DEFAULT_FREE_PERCENT_NOTIFY,
            free_percent_notify_again: DEFAULT_FREE_PERCENT_NOTIFY_AGAIN,
            free_size_gb_no_notify: 2,
            min_notify_period_minutes: 10,
            ignore_paths: Vec::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            mount_poll_interval_ms: 1_000,
            config_poll_interval_ms: 2_000,
            probe_timeout_ms: 2_000,
            check_on_start: true,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            backend: NotifierBackend::Desktop,
            analyzer_program: "baobab".to_string(),
            desktop_timeout_secs: 0,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[LDSM-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("ldsm").join("config.toml"),
            activity_log: home_dir
                .join(".local")
                .join("share")
                .join("ldsm")
                .join("activity.jsonl"),
            fstab: PathBuf::from("/etc/fstab"),
            mounts_table: PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    #[must_use]
    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mount_poll_interval_ms)
    }

    #[must_use]
    pub fn config_poll_interval(&self) -> Duration {
        Duration::from_millis(self.config_poll_interval_ms)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

// ──────────────────── effective thresholds ────────────────────

/// Validated thresholds consumed by the evaluator and tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub free_percent_notify: f64,
    pub free_percent_notify_again: f64,
    pub free_bytes_no_notify: u64,
    pub min_notify_period: Duration,
    pub ignore_paths: BTreeSet<String>,
}

impl Default for Thresholds {
    fn default() -> Self {
        ThresholdsConfig::default().resolve().0
    }
}

impl Thresholds {
    /// Exact-match lookup against the ignore list.
    #[must_use]
    pub fn is_ignored(&self, mount_path: &str) -> bool {
        self.ignore_paths.contains(mount_path)
    }
}

/// A threshold that was out of range and replaced by its default.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdClamp {
    pub key: &'static str,
    pub value: f64,
    pub fallback: f64,
}

impl std::fmt::Display for ThresholdClamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid {} = {}, must be in [0, 1); using {}",
            self.key, self.value, self.fallback
        )
    }
}

impl ThresholdsConfig {
    /// Derive effective thresholds, clamping out-of-range fractions.
    #[must_use]
    pub fn resolve(&self) -> (Thresholds, Vec<ThresholdClamp>) {
        let mut clamps = Vec::new();
        let free_percent_notify = clamp_fraction(
            "free_percent_notify",
            self.free_percent_notify,
            DEFAULT_FREE_PERCENT_NOTIFY,
            &mut clamps,
        );
        let free_percent_notify_again = clamp_fraction(
            "free_percent_notify_again",
            self.free_percent_notify_again,
            DEFAULT_FREE_PERCENT_NOTIFY_AGAIN,
            &mut clamps,
        );

        let thresholds = Thresholds {
            free_percent_notify,
            free_percent_notify_again,
            free_bytes_no_notify: self.free_size_gb_no_notify.saturating_mul(GIGABYTE),
            min_notify_period: Duration::from_secs(
                self.min_notify_period_minutes.saturating_mul(60),
            ),
            ignore_paths: self.ignore_paths.iter().cloned().collect(),
        };
        (thresholds, clamps)
    }
}

fn clamp_fraction(
    key: &'static str,
    value: f64,
    fallback: f64,
    clamps: &mut Vec<ThresholdClamp>,
) -> f64 {
    if (0.0..1.0).contains(&value) {
        value
    } else {
        clamps.push(ThresholdClamp {
            key,
            value,
            fallback,
        });
        fallback
    }
}

// ──────────────────── loading ────────────────────

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| LdsmError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(LdsmError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Effective thresholds plus any clamps applied while deriving them.
    #[must_use]
    pub fn thresholds(&self) -> (Thresholds, Vec<ThresholdClamp>) {
        self.thresholds.resolve()
    }

    /// Deterministic hash of the effective config for logging and reload
    /// short-circuiting.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // thresholds
        if let Some(raw) = lookup("LDSM_FREE_PERCENT_NOTIFY") {
            self.thresholds.free_percent_notify = parse_env("LDSM_FREE_PERCENT_NOTIFY", &raw)?;
        }
        if let Some(raw) = lookup("LDSM_FREE_PERCENT_NOTIFY_AGAIN") {
            self.thresholds.free_percent_notify_again =
                parse_env("LDSM_FREE_PERCENT_NOTIFY_AGAIN", &raw)?;
        }
        if let Some(raw) = lookup("LDSM_FREE_SIZE_GB_NO_NOTIFY") {
            self.thresholds.free_size_gb_no_notify =
                parse_env("LDSM_FREE_SIZE_GB_NO_NOTIFY", &raw)?;
        }
        if let Some(raw) = lookup("LDSM_MIN_NOTIFY_PERIOD_MINUTES") {
            self.thresholds.min_notify_period_minutes =
                parse_env("LDSM_MIN_NOTIFY_PERIOD_MINUTES", &raw)?;
        }
        if let Some(raw) = lookup("LDSM_IGNORE_PATHS") {
            self.thresholds.ignore_paths = raw
                .split(':')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect();
        }

        // scheduler
        if let Some(raw) = lookup("LDSM_CHECK_INTERVAL_SECS") {
            self.scheduler.check_interval_secs = parse_env("LDSM_CHECK_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("LDSM_PROBE_TIMEOUT_MS") {
            self.scheduler.probe_timeout_ms = parse_env("LDSM_PROBE_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("LDSM_CHECK_ON_START") {
            self.scheduler.check_on_start = parse_env("LDSM_CHECK_ON_START", &raw)?;
        }

        // notifier
        if let Some(raw) = lookup("LDSM_NOTIFIER_BACKEND") {
            self.notifier.backend = match raw.to_ascii_lowercase().as_str() {
                "desktop" => NotifierBackend::Desktop,
                "journal" => NotifierBackend::Journal,
                other => {
                    return Err(LdsmError::ConfigParse {
                        context: "env",
                        details: format!(
                            "LDSM_NOTIFIER_BACKEND={other:?}: expected desktop or journal"
                        ),
                    });
                }
            };
        }
        if let Some(raw) = lookup("LDSM_ANALYZER_PROGRAM") {
            self.notifier.analyzer_program = raw;
        }

        // paths
        if let Some(raw) = lookup("LDSM_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Normalize ignore paths so they compare equal to kernel-reported mount
    /// paths: trailing slashes stripped (root kept), duplicates dropped.
    fn normalize_paths(&mut self) {
        let mut seen = BTreeSet::new();
        self.thresholds.ignore_paths = self
            .thresholds
            .ignore_paths
            .drain(..)
            .map(|entry| {
                if entry.len() > 1 {
                    entry.trim_end_matches('/').to_string()
                } else {
                    entry
                }
            })
            .filter(|entry| !entry.is_empty() && seen.insert(entry.clone()))
            .collect();
    }

    fn validate(&self) -> Result<()> {
        for (name, val, max) in [
            (
                "check_interval_secs",
                self.scheduler.check_interval_secs,
                MAX_CHECK_INTERVAL_SECS,
            ),
            (
                "mount_poll_interval_ms",
                self.scheduler.mount_poll_interval_ms,
                MAX_POLL_INTERVAL_MS,
            ),
            (
                "config_poll_interval_ms",
                self.scheduler.config_poll_interval_ms,
                MAX_POLL_INTERVAL_MS,
            ),
            (
                "probe_timeout_ms",
                self.scheduler.probe_timeout_ms,
                MAX_PROBE_TIMEOUT_MS,
            ),
        ] {
            if val == 0 || val > max {
                return Err(LdsmError::InvalidConfig {
                    details: format!("scheduler.{name} must be in 1..={max}, got {val}"),
                });
            }
        }

        if self.notifier.analyzer_program.trim().is_empty() {
            return Err(LdsmError::InvalidConfig {
                details: "notifier.analyzer_program must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| LdsmError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

// ──────────────────── provider ────────────────────

/// Opaque marker that changes whenever the underlying settings change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeStamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// Source of configuration with change detection.
///
/// The daemon reloads through [`ConfigProvider::load`] whenever
/// [`ConfigProvider::change_stamp`] differs from the previous poll.
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<Config>;
    /// `None` when the settings source does not exist (defaults in effect).
    fn change_stamp(&self) -> Option<ChangeStamp>;
}

/// File-backed provider around [`Config::load`].
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
    explicit: bool,
}

impl FileConfigProvider {
    #[must_use]
    pub fn new(path: Option<&Path>) -> Self {
        Self {
            path: path.map_or_else(Config::default_path, Path::to_path_buf),
            explicit: path.is_some(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfigProvider {
    fn load(&self) -> Result<Config> {
        Config::load(self.explicit.then_some(self.path.as_path()))
    }

    fn change_stamp(&self) -> Option<ChangeStamp> {
        let meta = fs::metadata(&self.path).ok()?;
        Some(ChangeStamp {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}
