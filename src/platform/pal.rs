//! PAL traits and the Linux implementation: static mount table, live mount
//! table, and `statvfs`-backed block statistics.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::core::config::PathsConfig;
use crate::core::errors::{LdsmError, Result};

/// Raw block counters for one filesystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockStats {
    pub total_blocks: u64,
    pub available_blocks: u64,
    pub fragment_size: u64,
}

/// One row of the live mount table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveMount {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
    pub read_only: bool,
}

/// Where mount points come from.
pub trait MountSource: Send + Sync {
    /// Statically configured mount points, in table order.
    fn static_mount_points(&self) -> Result<Vec<PathBuf>>;

    /// Everything currently mounted, in table order.
    fn live_mounts(&self) -> Result<Vec<LiveMount>>;

    /// Cheap value that changes whenever the live mount table changes.
    fn mount_table_fingerprint(&self) -> Result<u64>;

    /// Live entry mounted exactly at `path`; the last (topmost) entry wins
    /// when mounts are stacked. `None` when not mounted or unreadable.
    fn resolve_live_mount(&self, path: &Path) -> Option<LiveMount> {
        let live = self.live_mounts().ok()?;
        live.into_iter().rev().find(|mount| mount.path == path)
    }
}

/// Filesystem statistics queries.
pub trait StatsProbe: Send + Sync {
    fn block_stats(&self, path: &Path) -> Result<BlockStats>;

    /// Identifier of the filesystem containing `path` (device number).
    fn filesystem_id(&self, path: &Path) -> Result<u64>;
}

/// Full OS abstraction used by the monitor.
pub trait Platform: MountSource + StatsProbe {
    fn into_mount_source(self: Arc<Self>) -> Arc<dyn MountSource>;
    fn into_stats_probe(self: Arc<Self>) -> Arc<dyn StatsProbe>;
}

impl<T: MountSource + StatsProbe + 'static> Platform for T {
    fn into_mount_source(self: Arc<Self>) -> Arc<dyn MountSource> {
        self
    }

    fn into_stats_probe(self: Arc<Self>) -> Arc<dyn StatsProbe> {
        self
    }
}

/// Linux platform implementation using `/etc/fstab`, `/proc/self/mounts`
/// and `statvfs`.
#[derive(Debug)]
pub struct LinuxPlatform {
    fstab: PathBuf,
    mounts_table: PathBuf,
    // Parsed live table keyed by the fingerprint of its raw contents.
    mounts_cache: RwLock<Option<(u64, Arc<Vec<LiveMount>>)>>,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::from_paths(&PathsConfig::default())
    }
}

impl LinuxPlatform {
    #[must_use]
    pub fn new(fstab: impl Into<PathBuf>, mounts_table: impl Into<PathBuf>) -> Self {
        Self {
            fstab: fstab.into(),
            mounts_table: mounts_table.into(),
            mounts_cache: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(paths.fstab.clone(), paths.mounts_table.clone())
    }

    fn read_mounts_table(&self) -> Result<String> {
        fs::read_to_string(&self.mounts_table).map_err(|source| LdsmError::Io {
            path: self.mounts_table.clone(),
            source,
        })
    }

    fn cached_live_mounts(&self) -> Result<Arc<Vec<LiveMount>>> {
        let raw = self.read_mounts_table()?;
        let fingerprint = fnv1a(raw.as_bytes());
        {
            let cache = self.mounts_cache.read();
            if let Some((cached_fp, mounts)) = &*cache
                && *cached_fp == fingerprint
            {
                return Ok(Arc::clone(mounts));
            }
        }

        let mounts = Arc::new(parse_proc_mounts(&raw));
        *self.mounts_cache.write() = Some((fingerprint, Arc::clone(&mounts)));
        Ok(mounts)
    }
}

impl MountSource for LinuxPlatform {
    fn static_mount_points(&self) -> Result<Vec<PathBuf>> {
        let raw = fs::read_to_string(&self.fstab).map_err(|source| LdsmError::Io {
            path: self.fstab.clone(),
            source,
        })?;
        Ok(parse_fstab(&raw))
    }

    fn live_mounts(&self) -> Result<Vec<LiveMount>> {
        Ok(self.cached_live_mounts()?.as_ref().clone())
    }

    fn mount_table_fingerprint(&self) -> Result<u64> {
        Ok(fnv1a(self.read_mounts_table()?.as_bytes()))
    }

    fn resolve_live_mount(&self, path: &Path) -> Option<LiveMount> {
        let live = self.cached_live_mounts().ok()?;
        live.iter().rev().find(|mount| mount.path == path).cloned()
    }
}

#[cfg(unix)]
impl StatsProbe for LinuxPlatform {
    fn block_stats(&self, path: &Path) -> Result<BlockStats> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| LdsmError::FsStats {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        Ok(BlockStats {
            total_blocks: stat.blocks(),
            available_blocks: stat.blocks_available(),
            fragment_size: stat.fragment_size(),
        })
    }

    fn filesystem_id(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::stat::stat(path).map_err(|error| LdsmError::FsStats {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        Ok(stat.st_dev)
    }
}

/// In-memory mock implementation for deterministic tests.
///
/// Interior mutability lets a test reshape the mount table between cycles
/// while the monitor holds a shared handle.
#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    static_points: Vec<PathBuf>,
    live: Vec<LiveMount>,
    stats: HashMap<PathBuf, BlockStats>,
    fs_ids: HashMap<PathBuf, u64>,
    generation: u64,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mounted, writable filesystem listed in the static table.
    pub fn add_mount(&self, path: &str, fs_type: &str, device: &str, stats: BlockStats) {
        let mut state = self.state.lock();
        let path = PathBuf::from(path);
        state.static_points.push(path.clone());
        state.live.push(LiveMount {
            path: path.clone(),
            device: device.to_string(),
            fs_type: fs_type.to_string(),
            read_only: false,
        });
        state.stats.insert(path, stats);
        state.generation += 1;
    }

    pub fn add_static_point(&self, path: &str) {
        let mut state = self.state.lock();
        state.static_points.push(PathBuf::from(path));
    }

    pub fn add_live_mount(&self, mount: LiveMount) {
        let mut state = self.state.lock();
        state.live.push(mount);
        state.generation += 1;
    }

    /// Unmount `path`; it stays in the static table.
    pub fn unmount(&self, path: &str) {
        let mut state = self.state.lock();
        state.live.retain(|mount| mount.path != Path::new(path));
        state.generation += 1;
    }

    pub fn set_stats(&self, path: &str, stats: BlockStats) {
        self.state.lock().stats.insert(PathBuf::from(path), stats);
    }

    /// Make `block_stats` fail for `path`.
    pub fn remove_stats(&self, path: &str) {
        self.state.lock().stats.remove(Path::new(path));
    }

    pub fn set_filesystem_id(&self, path: impl Into<PathBuf>, id: u64) {
        self.state.lock().fs_ids.insert(path.into(), id);
    }
}

impl MountSource for MockPlatform {
    fn static_mount_points(&self) -> Result<Vec<PathBuf>> {
        Ok(self.state.lock().static_points.clone())
    }

    fn live_mounts(&self) -> Result<Vec<LiveMount>> {
        Ok(self.state.lock().live.clone())
    }

    fn mount_table_fingerprint(&self) -> Result<u64> {
        Ok(self.state.lock().generation)
    }
}

impl StatsProbe for MockPlatform {
    fn block_stats(&self, path: &Path) -> Result<BlockStats> {
        self.state
            .lock()
            .stats
            .get(path)
            .copied()
            .ok_or_else(|| LdsmError::FsStats {
                path: path.to_path_buf(),
                details: "mock stats not found".to_string(),
            })
    }

    fn filesystem_id(&self, path: &Path) -> Result<u64> {
        let state = self.state.lock();
        path.ancestors()
            .find_map(|ancestor| state.fs_ids.get(ancestor).copied())
            .ok_or_else(|| LdsmError::FsStats {
                path: path.to_path_buf(),
                details: "mock filesystem id not found".to_string(),
            })
    }
}

/// Detect active platform implementation.
pub fn detect_platform(paths: &PathsConfig) -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::from_paths(paths)))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = paths;
        Err(LdsmError::UnsupportedPlatform {
            details: "only Linux is currently implemented".to_string(),
        })
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn parse_proc_mounts(raw: &str) -> Vec<LiveMount> {
    let mut mounts = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            eprintln!("[LDSM-PAL] warning: skipping malformed mount table line: {line}");
            continue;
        }
        mounts.push(LiveMount {
            path: unescape_mount_path(fields[1]),
            device: unescape_mount_path(fields[0]).to_string_lossy().into_owned(),
            fs_type: fields[2].to_string(),
            read_only: fields[3].split(',').any(|option| option == "ro"),
        });
    }
    mounts
}

fn parse_fstab(raw: &str) -> Vec<PathBuf> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().nth(1))
        // swap entries use "none"/"swap" as their mount point
        .filter(|mount_point| mount_point.starts_with('/'))
        .map(unescape_mount_path)
        .collect()
}

#[cfg(test)]
fn unescape_mount_field(raw: &str) -> String {
    unescape_mount_path(raw).to_string_lossy().into_owned()
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel and fstab.
/// Returns a PathBuf via OsString to preserve raw bytes (e.g. invalid UTF-8).
fn unescape_mount_path(raw: &str) -> PathBuf {
    let mut bytes = Vec::with_capacity(raw.len());
    let raw_bytes = raw.as_bytes();
    let mut i = 0;
    while i < raw_bytes.len() {
        if raw_bytes[i] == b'\\' && i + 3 < raw_bytes.len() {
            let a = raw_bytes[i + 1];
            let b = raw_bytes[i + 2];
            let c = raw_bytes[i + 3];
            if (b'0'..=b'3').contains(&a)
                && (b'0'..=b'7').contains(&b)
                && (b'0'..=b'7').contains(&c)
            {
                bytes.push((a - b'0') * 64 + (b - b'0') * 8 + (c - b'0'));
                i += 4;
                continue;
            }
        }
        bytes.push(raw_bytes[i]);
        i += 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}
