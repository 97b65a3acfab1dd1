//! Low-space warning delivery: desktop and journal notifiers, the process-wide
//! dialog gate, and the disk-usage analyzer launcher.
//!
//! A desktop warning blocks until the user picks an action or the notification
//! closes. Only one warning may be pending at a time; a dispatch attempted while
//! another is pending is reported as not shown.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde::Serialize;

use crate::core::config::{NotifierBackend, NotifierConfig};
use crate::core::errors::{LdsmError, Result};
use crate::monitor::tracker::{DispatchOutcome, Response};

// ──────────────────── presented info ────────────────────

/// Everything a notifier needs to present one warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowSpaceInfo {
    pub mount_path: PathBuf,
    pub display_name: String,
    pub free_bytes: u64,
    pub has_trash: bool,
    pub has_analyzer: bool,
    /// More than one mount is monitored this cycle.
    pub multiple_volumes: bool,
    /// At least one monitored mount still has enough space.
    pub other_usable_volumes: bool,
}

impl LowSpaceInfo {
    #[must_use]
    pub fn title(&self) -> String {
        if self.multiple_volumes {
            format!("Low Disk Space on \"{}\"", self.display_name)
        } else {
            "Low Disk Space".to_string()
        }
    }

    #[must_use]
    pub fn body(&self) -> String {
        let free = format_bytes(self.free_bytes);
        let remaining = if self.multiple_volumes {
            format!(
                "The volume \"{}\" has only {free} disk space remaining.",
                self.display_name
            )
        } else {
            format!("This computer has only {free} disk space remaining.")
        };
        let advice = match (self.has_trash, self.other_usable_volumes) {
            (true, true) => {
                "You can free up disk space by emptying the Trash, removing unused programs or files, or moving files to another disk or partition."
            }
            (true, false) => {
                "You can free up disk space by emptying the Trash, removing unused programs or files, or moving files to an external disk."
            }
            (false, true) => {
                "You can free up disk space by removing unused programs or files, or by moving files to another disk or partition."
            }
            (false, false) => {
                "You can free up disk space by removing unused programs or files, or by moving files to an external disk."
            }
        };
        format!("{remaining} {advice}")
    }
}

/// Human name for a mount: the root is "Filesystem root", anything else is
/// its last path component.
#[must_use]
pub fn guess_display_name(mount_path: &Path) -> String {
    if mount_path == Path::new("/") {
        return "Filesystem root".to_string();
    }
    mount_path.file_name().map_or_else(
        || mount_path.to_string_lossy().into_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Format a byte count with a binary unit suffix.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

// ──────────────────── notifiers ────────────────────

/// Presents a warning and waits for the user's decision.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn show(&self, info: &LowSpaceInfo) -> Result<Response>;
}

// ──── Desktop (notify-send --wait) ────

const ACTION_CANCEL: &str = "cancel";
const ACTION_ANALYZE: &str = "analyze";
const ACTION_EMPTY_TRASH: &str = "empty-trash";

/// Desktop notification with action buttons via `notify-send --wait`.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
    timeout_secs: u64,
}

impl DesktopNotifier {
    #[must_use]
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            program: "notify-send".to_string(),
            timeout_secs,
        }
    }

    /// Use a different `notify-send`-compatible executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, info: &LowSpaceInfo) -> Vec<String> {
        let mut args = vec![
            "--app-name=ldsm".to_string(),
            "--urgency=critical".to_string(),
            "--icon=drive-harddisk".to_string(),
            "--wait".to_string(),
            format!("--action={ACTION_CANCEL}=Ignore"),
        ];
        if self.timeout_secs > 0 {
            args.push(format!(
                "--expire-time={}",
                self.timeout_secs.saturating_mul(1000)
            ));
        }
        if info.has_analyzer {
            args.push(format!("--action={ACTION_ANALYZE}=Examine"));
        }
        if info.has_trash {
            args.push(format!("--action={ACTION_EMPTY_TRASH}=Empty Trash"));
        }
        args.push(info.title());
        args.push(info.body());
        args
    }
}

/// Map the action key printed by `notify-send --wait` to a response.
fn parse_action(stdout: &str) -> Response {
    match stdout.trim() {
        ACTION_CANCEL => Response::Cancelled,
        ACTION_ANALYZE => Response::AnalyzeRequested,
        ACTION_EMPTY_TRASH => Response::EmptyTrashRequested,
        _ => Response::Dismissed,
    }
}

impl Notifier for DesktopNotifier {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn show(&self, info: &LowSpaceInfo) -> Result<Response> {
        let output = Command::new(&self.program)
            .args(self.args(info))
            .stdin(Stdio::null())
            .output()
            .map_err(|error| LdsmError::Notifier {
                notifier: "desktop",
                details: format!("failed to run {}: {error}", self.program),
            })?;

        if !output.status.success() {
            return Err(LdsmError::Notifier {
                notifier: "desktop",
                details: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(parse_action(&String::from_utf8_lossy(&output.stdout)))
    }
}

// ──── Journal (stderr) ────

/// Writes the warning to stderr for journald and reports it as dismissed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalNotifier;

impl Notifier for JournalNotifier {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn show(&self, info: &LowSpaceInfo) -> Result<Response> {
        eprintln!(
            "[LDSM-NOTIFY] [WARNING] {}: {} free on {}",
            info.title(),
            format_bytes(info.free_bytes),
            info.mount_path.display()
        );
        Ok(Response::Dismissed)
    }
}

/// Notifier selected by configuration.
#[must_use]
pub fn build_notifier(config: &NotifierConfig) -> Box<dyn Notifier> {
    match config.backend {
        NotifierBackend::Desktop => Box::new(DesktopNotifier::new(config.desktop_timeout_secs)),
        NotifierBackend::Journal => Box::new(JournalNotifier),
    }
}

// ──────────────────── dialog gate ────────────────────

/// Process-wide "a warning is pending" flag.
#[derive(Debug, Clone, Default)]
pub struct DialogGate {
    active: Arc<AtomicBool>,
}

/// Clears the gate when dropped.
#[derive(Debug)]
pub struct DialogGuard {
    active: Arc<AtomicBool>,
}

impl DialogGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate, or `None` if a warning is already pending.
    #[must_use]
    pub fn try_acquire(&self) -> Option<DialogGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DialogGuard {
                active: Arc::clone(&self.active),
            })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for DialogGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

// ──────────────────── analyzer ────────────────────

/// Fire-and-forget launcher for the disk-usage analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerLauncher {
    program: String,
}

impl AnalyzerLauncher {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the analyzer resolves on `PATH` (or as a path).
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    /// Start `<program> <mount_path>` without waiting for it.
    pub fn launch(&self, mount_path: &Path) -> Result<()> {
        let mut child = Command::new(&self.program)
            .arg(mount_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| LdsmError::AnalyzerLaunch {
                program: self.program.clone(),
                details: error.to_string(),
            })?;

        // Reap in the background so the analyzer does not linger as a zombie.
        thread::Builder::new()
            .name("ldsm-analyzer-reaper".to_string())
            .spawn(move || {
                let _ = child.wait();
            })
            .map_err(|error| LdsmError::AnalyzerLaunch {
                program: self.program.clone(),
                details: format!("failed to spawn reaper thread: {error}"),
            })?;
        Ok(())
    }
}

// ──────────────────── dispatcher ────────────────────

/// Routes one warning through the gate, the notifier, and the analyzer.
pub struct NotificationDispatcher {
    notifier: Box<dyn Notifier>,
    gate: DialogGate,
    analyzer: AnalyzerLauncher,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(notifier: Box<dyn Notifier>, gate: DialogGate, analyzer: AnalyzerLauncher) -> Self {
        Self {
            notifier,
            gate,
            analyzer,
        }
    }

    #[must_use]
    pub fn from_config(config: &NotifierConfig) -> Self {
        Self::new(
            build_notifier(config),
            DialogGate::new(),
            AnalyzerLauncher::new(config.analyzer_program.clone()),
        )
    }

    #[must_use]
    pub fn gate(&self) -> &DialogGate {
        &self.gate
    }

    #[must_use]
    pub fn analyzer(&self) -> &AnalyzerLauncher {
        &self.analyzer
    }

    #[must_use]
    pub fn notifier_name(&self) -> &'static str {
        self.notifier.name()
    }

    pub fn set_analyzer(&mut self, analyzer: AnalyzerLauncher) {
        self.analyzer = analyzer;
    }

    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifier = notifier;
    }

    /// Show one warning unless another is pending. Notifier failures are
    /// logged and reported as not shown; analyzer failures are logged only.
    pub fn dispatch(&self, info: &LowSpaceInfo) -> DispatchOutcome {
        let Some(_guard) = self.gate.try_acquire() else {
            return DispatchOutcome::NotShown;
        };

        let response = match self.notifier.show(info) {
            Ok(response) => response,
            Err(error) => {
                eprintln!("[LDSM-NOTIFY] {error}");
                return DispatchOutcome::NotShown;
            }
        };

        if response == Response::AnalyzeRequested
            && let Err(error) = self.analyzer.launch(&info.mount_path)
        {
            eprintln!("[LDSM-NOTIFY] {error}");
        }

        DispatchOutcome::Shown(response)
    }
}

// ──────────────────── tests ────────────────────
