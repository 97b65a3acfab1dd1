//! Mount enumeration and eligibility filtering.
//!
//! Walks the static mount table and keeps only mounts that are live, writable,
//! not user-ignored, not on the fs-type/device denylists, and that report real
//! block statistics. Every rejected mount carries a [`SkipReason`].

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::config::Thresholds;
use crate::platform::pal::{BlockStats, MountSource, StatsProbe};

/// Filesystem types that are never monitored (network, pseudo, RAM-backed).
pub const IGNORED_FS_TYPES: &[&str] = &[
    "adfs",
    "afs",
    "auto",
    "autofs",
    "autofs4",
    "cifs",
    "cxfs",
    "devfs",
    "devpts",
    "ecryptfs",
    "fdescfs",
    "gfs",
    "gfs2",
    "kernfs",
    "linprocfs",
    "linsysfs",
    "lustre",
    "lustre_lite",
    "ncpfs",
    "nfs",
    "nfs4",
    "nfsd",
    "ocfs2",
    "proc",
    "procfs",
    "ptyfs",
    "rpc_pipefs",
    "selinuxfs",
    "smbfs",
    "sysfs",
    "tmpfs",
    "usbfs",
    "zfs",
];

/// Device names that are never monitored (exact match).
pub const IGNORED_DEVICES: &[&str] = &["none", "sunrpc", "devpts", "nfsd"];

/// Device prefixes that are never monitored (loopback and vnode devices).
pub const IGNORED_DEVICE_PREFIXES: &[&str] = &["/dev/loop", "/dev/vn"];

#[must_use]
pub fn is_ignored_fs_type(fs_type: &str) -> bool {
    IGNORED_FS_TYPES.contains(&fs_type)
}

#[must_use]
pub fn is_ignored_device(device: &str) -> bool {
    IGNORED_DEVICES.contains(&device)
        || IGNORED_DEVICE_PREFIXES
            .iter()
            .any(|prefix| device.starts_with(prefix))
}

/// A mount that passed every filter this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountCandidate {
    pub path: PathBuf,
    pub fs_type: String,
    pub device: String,
    pub read_only: bool,
    pub stats: BlockStats,
}

/// Why a statically configured mount point was not monitored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    NotMounted,
    ReadOnly,
    UserIgnored,
    IgnoredFsType(String),
    IgnoredDevice(String),
    StatFailed(String),
    /// Zero total blocks.
    Virtual,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMounted => write!(f, "not mounted"),
            Self::ReadOnly => write!(f, "read-only"),
            Self::UserIgnored => write!(f, "ignored by configuration"),
            Self::IgnoredFsType(fs_type) => write!(f, "ignored filesystem type {fs_type}"),
            Self::IgnoredDevice(device) => write!(f, "ignored device {device}"),
            Self::StatFailed(details) => write!(f, "stats unavailable: {details}"),
            Self::Virtual => write!(f, "virtual filesystem (0 blocks)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMount {
    pub path: PathBuf,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Outcome of one enumeration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnumerationReport {
    /// Eligible mounts, ordered by mount path.
    pub candidates: Vec<MountCandidate>,
    pub skipped: Vec<SkippedMount>,
    /// Set when the static table itself could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
}

impl EnumerationReport {
    #[must_use]
    pub fn candidate_paths(&self) -> Vec<&Path> {
        self.candidates.iter().map(|c| c.path.as_path()).collect()
    }
}

/// Produce this cycle's eligible mounts. Never fails as a whole.
#[must_use]
pub fn enumerate(
    source: &dyn MountSource,
    probe: &dyn StatsProbe,
    thresholds: &Thresholds,
) -> EnumerationReport {
    let mut report = EnumerationReport::default();

    let static_points = match source.static_mount_points() {
        Ok(points) => points,
        Err(error) => {
            report.source_error = Some(error.to_string());
            return report;
        }
    };

    // Byte-lexicographic order with duplicates collapsed.
    let ordered: BTreeSet<OsString> = static_points
        .into_iter()
        .map(PathBuf::into_os_string)
        .collect();

    for raw in ordered {
        let path = PathBuf::from(raw);
        match classify(source, probe, thresholds, &path) {
            Ok(candidate) => report.candidates.push(candidate),
            Err(reason) => report.skipped.push(SkippedMount { path, reason }),
        }
    }

    report
}

fn classify(
    source: &dyn MountSource,
    probe: &dyn StatsProbe,
    thresholds: &Thresholds,
    path: &Path,
) -> std::result::Result<MountCandidate, SkipReason> {
    let live = source
        .resolve_live_mount(path)
        .ok_or(SkipReason::NotMounted)?;

    if live.read_only {
        return Err(SkipReason::ReadOnly);
    }
    if thresholds.is_ignored(&live.path.to_string_lossy()) {
        return Err(SkipReason::UserIgnored);
    }
    if is_ignored_fs_type(&live.fs_type) {
        return Err(SkipReason::IgnoredFsType(live.fs_type));
    }
    if is_ignored_device(&live.device) {
        return Err(SkipReason::IgnoredDevice(live.device));
    }

    let stats = probe
        .block_stats(&live.path)
        .map_err(|error| SkipReason::StatFailed(error.to_string()))?;
    if stats.total_blocks == 0 {
        return Err(SkipReason::Virtual);
    }

    Ok(MountCandidate {
        path: live.path,
        fs_type: live.fs_type,
        device: live.device,
        read_only: live.read_only,
        stats,
    })
}
