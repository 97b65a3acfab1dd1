#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use low_disk_monitor::core::config::Thresholds;
use low_disk_monitor::core::errors::{LdsmError, Result};
use low_disk_monitor::daemon::notifications::{
    AnalyzerLauncher, DialogGate, LowSpaceInfo, NotificationDispatcher, Notifier,
};
use low_disk_monitor::monitor::check::DiskSpaceMonitor;
use low_disk_monitor::monitor::tracker::Response;
use low_disk_monitor::monitor::trash::TrashLocator;
use low_disk_monitor::platform::pal::{BlockStats, MockPlatform, MountSource, StatsProbe};

// ──────────────────── CLI harness ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_ldsm") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "ldsm.exe" } else { "ldsm" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve ldsm binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run the binary with `HOME` pointed at a scratch directory so the user's
/// own config never leaks into a test.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("ldsm-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");
    let home = root.join(format!("home-{}-{}", sanitize(case_name), now_millis()));
    fs::create_dir_all(&home).expect("create scratch home");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", &home)
        .env_remove("XDG_DATA_HOME")
        .env("RUST_BACKTRACE", "1")
        .envs(env.iter().copied())
        .output()
        .expect("execute ldsm command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── monitor harness ────────────────────

/// Notifier that answers from a script and records what it was asked.
///
/// An empty script answers `Dismissed`; a scripted `None` fails the call.
#[derive(Clone, Default)]
pub struct ScriptedNotifier {
    script: Arc<Mutex<VecDeque<Option<Response>>>>,
    shown: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptedNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Response) {
        self.script.lock().push_back(Some(response));
    }

    pub fn push_failure(&self) {
        self.script.lock().push_back(None);
    }

    pub fn shown(&self) -> Vec<PathBuf> {
        self.shown.lock().clone()
    }

    pub fn take_shown(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.shown.lock())
    }
}

impl Notifier for ScriptedNotifier {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn show(&self, info: &LowSpaceInfo) -> Result<Response> {
        self.shown.lock().push(info.mount_path.clone());
        match self.script.lock().pop_front() {
            Some(Some(response)) => Ok(response),
            Some(None) => Err(LdsmError::Notifier {
                notifier: "scripted",
                details: "scripted failure".to_string(),
            }),
            None => Ok(Response::Dismissed),
        }
    }
}

pub fn blocks(total: u64, available: u64) -> BlockStats {
    BlockStats {
        total_blocks: total,
        available_blocks: available,
        fragment_size: 4096,
    }
}

pub fn dispatcher(notifier: &ScriptedNotifier) -> NotificationDispatcher {
    NotificationDispatcher::new(
        Box::new(notifier.clone()),
        DialogGate::new(),
        AnalyzerLauncher::new("ldsm-test-no-analyzer"),
    )
}

pub fn monitor_with(
    mock: &Arc<MockPlatform>,
    notifier: &ScriptedNotifier,
    thresholds: Thresholds,
) -> DiskSpaceMonitor {
    DiskSpaceMonitor::new(
        Arc::clone(mock) as Arc<dyn MountSource>,
        Arc::clone(mock) as Arc<dyn StatsProbe>,
        thresholds,
        dispatcher(notifier),
    )
    .with_trash_locator(TrashLocator::new("/nonexistent/ldsm-data", 1000))
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}
