//! Free-space evaluation for a single mount.

use crate::core::config::Thresholds;
use crate::monitor::mounts::MountCandidate;
use crate::platform::pal::BlockStats;

impl BlockStats {
    /// Available fraction of the filesystem; 0.0 for a zero-sized one.
    #[must_use]
    pub fn free_ratio(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.available_blocks as f64 / self.total_blocks as f64
        }
    }

    /// Bytes available to unprivileged users.
    #[must_use]
    pub const fn free_bytes(&self) -> u64 {
        self.fragment_size.saturating_mul(self.available_blocks)
    }
}

/// A mount has enough space if either its free ratio is above the notify
/// threshold or its absolute free space is above the no-notify floor.
#[must_use]
pub fn is_sufficient(candidate: &MountCandidate, thresholds: &Thresholds) -> bool {
    let stats = &candidate.stats;
    stats.free_ratio() > thresholds.free_percent_notify
        || stats.free_bytes() > thresholds.free_bytes_no_notify
}

/// Split candidates into (low, sufficient), preserving order.
#[must_use]
pub fn partition<'a>(
    candidates: &'a [MountCandidate],
    thresholds: &Thresholds,
) -> (Vec<&'a MountCandidate>, Vec<&'a MountCandidate>) {
    candidates
        .iter()
        .partition(|candidate| !is_sufficient(candidate, thresholds))
}
