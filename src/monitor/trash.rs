//! Trash directory lookup for a mount.
//!
//! Mounts on the same filesystem as the user data directory share the home
//! trash (`<data>/Trash/files`). Other mounts keep a per-user trash at
//! `<mount>/.Trash/<uid>/files` or, failing that, `<mount>/.Trash-<uid>/files`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::platform::pal::StatsProbe;

/// Resolves trash directories for the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashLocator {
    data_dir: PathBuf,
    uid: u32,
}

impl TrashLocator {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, uid: u32) -> Self {
        Self {
            data_dir: data_dir.into(),
            uid,
        }
    }

    /// Locator for the running user: `$XDG_DATA_HOME`, else `~/.local/share`.
    #[must_use]
    pub fn for_current_user() -> Self {
        let data_dir = env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .filter(|dir| dir.is_absolute())
            .or_else(|| {
                env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
            })
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        Self::new(data_dir, current_uid())
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Trash `files` directory that applies to `mount_path`, if any exists.
    #[must_use]
    pub fn trash_files_dir(&self, probe: &dyn StatsProbe, mount_path: &Path) -> Option<PathBuf> {
        if self.shares_filesystem(probe, mount_path) {
            let home_trash = self.data_dir.join("Trash").join("files");
            return home_trash.is_dir().then_some(home_trash);
        }

        let shared = mount_path
            .join(".Trash")
            .join(self.uid.to_string())
            .join("files");
        if shared.is_dir() {
            return Some(shared);
        }
        let per_user = mount_path.join(format!(".Trash-{}", self.uid)).join("files");
        per_user.is_dir().then_some(per_user)
    }

    /// True when the applicable trash directory holds at least one entry.
    #[must_use]
    pub fn has_trash(&self, probe: &dyn StatsProbe, mount_path: &Path) -> bool {
        self.trash_files_dir(probe, mount_path)
            .is_some_and(|dir| dir_has_entries(&dir))
    }

    fn shares_filesystem(&self, probe: &dyn StatsProbe, mount_path: &Path) -> bool {
        match (
            probe.filesystem_id(&self.data_dir),
            probe.filesystem_id(mount_path),
        ) {
            (Ok(data_id), Ok(mount_id)) => data_id == mount_id,
            _ => false,
        }
    }
}

fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::MockPlatform;

    #[test]
    fn home_filesystem_uses_data_dir_trash() {
        let home = tempfile::tempdir().unwrap();
        let files = home.path().join("Trash").join("files");
        fs::create_dir_all(&files).unwrap();

        let mock = MockPlatform::new();
        mock.set_filesystem_id(home.path(), 7);
        mock.set_filesystem_id("/home", 7);

        let locator = TrashLocator::new(home.path(), 1000);
        assert_eq!(
            locator.trash_files_dir(&mock, Path::new("/home")),
            Some(files.clone())
        );
        assert!(!locator.has_trash(&mock, Path::new("/home")));

        fs::write(files.join("old.iso"), b"x").unwrap();
        assert!(locator.has_trash(&mock, Path::new("/home")));
    }

    #[test]
    fn other_filesystem_prefers_shared_trash_then_per_user() {
        let mount = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.set_filesystem_id(data.path(), 1);
        mock.set_filesystem_id(mount.path(), 2);
        let locator = TrashLocator::new(data.path(), 1000);

        assert_eq!(locator.trash_files_dir(&mock, mount.path()), None);
        assert!(!locator.has_trash(&mock, mount.path()));

        let per_user = mount.path().join(".Trash-1000").join("files");
        fs::create_dir_all(&per_user).unwrap();
        fs::write(per_user.join("a"), b"x").unwrap();
        assert_eq!(
            locator.trash_files_dir(&mock, mount.path()),
            Some(per_user)
        );
        assert!(locator.has_trash(&mock, mount.path()));

        let shared = mount.path().join(".Trash").join("1000").join("files");
        fs::create_dir_all(&shared).unwrap();
        assert_eq!(locator.trash_files_dir(&mock, mount.path()), Some(shared));
        // shared trash wins and is empty
        assert!(!locator.has_trash(&mock, mount.path()));
    }

    #[test]
    fn unknown_filesystem_ids_fall_back_to_mount_trash() {
        let mount = tempfile::tempdir().unwrap();
        let per_user = mount.path().join(".Trash-42").join("files");
        fs::create_dir_all(&per_user).unwrap();
        fs::write(per_user.join("b"), b"x").unwrap();

        let locator = TrashLocator::new("/nonexistent/data", 42);
        assert!(locator.has_trash(&MockPlatform::new(), mount.path()));
    }
}
