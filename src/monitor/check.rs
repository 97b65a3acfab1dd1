//! One low-disk-space check cycle and the state that survives between cycles.
//!
//! [`DiskSpaceMonitor`] owns the thresholds, the hysteresis tracker and the
//! notification dispatcher. It is driven from a single thread: the daemon loop
//! in production, the test directly in integration tests.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::core::config::Thresholds;
use crate::daemon::notifications::{LowSpaceInfo, NotificationDispatcher, guess_display_name};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::mounts::{EnumerationReport, MountCandidate, SkipReason, enumerate};
use crate::monitor::space::{self, is_sufficient};
use crate::monitor::tracker::{DispatchOutcome, LowDecision, NotificationTracker};
use crate::monitor::trash::TrashLocator;
use crate::platform::pal::{MountSource, StatsProbe};

/// Classification of one candidate, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MountStatus {
    pub path: PathBuf,
    pub fs_type: String,
    pub device: String,
    pub free_ratio: f64,
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub low: bool,
}

impl MountStatus {
    fn new(candidate: &MountCandidate, low: bool) -> Self {
        let stats = &candidate.stats;
        Self {
            path: candidate.path.clone(),
            fs_type: candidate.fs_type.clone(),
            device: candidate.device.clone(),
            free_ratio: stats.free_ratio(),
            free_bytes: stats.free_bytes(),
            total_bytes: stats.fragment_size.saturating_mul(stats.total_blocks),
            low,
        }
    }
}

/// Enumeration plus classification, without touching notification state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Evaluation {
    pub enumeration: EnumerationReport,
    pub statuses: Vec<MountStatus>,
}

impl Evaluation {
    #[must_use]
    pub fn low_count(&self) -> usize {
        self.statuses.iter().filter(|s| s.low).count()
    }
}

/// What one check cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub evaluation: Evaluation,
    /// Mounts whose hysteresis state was dropped because they recovered.
    pub recovered: Vec<PathBuf>,
    pub decisions: Vec<LowDecision>,
    pub duration_ms: u64,
}

impl CheckReport {
    /// Outcomes of the notify attempts made this cycle, in order.
    #[must_use]
    pub fn notifications(&self) -> Vec<(PathBuf, DispatchOutcome)> {
        self.decisions
            .iter()
            .filter_map(|d| d.outcome().map(|o| (d.path().to_path_buf(), o)))
            .collect()
    }
}

/// Stateful low-disk-space monitor.
pub struct DiskSpaceMonitor {
    mounts: Arc<dyn MountSource>,
    probe: Arc<dyn StatsProbe>,
    thresholds: Thresholds,
    tracker: NotificationTracker,
    dispatcher: NotificationDispatcher,
    trash: TrashLocator,
    activity: Option<ActivityLoggerHandle>,
}

impl DiskSpaceMonitor {
    #[must_use]
    pub fn new(
        mounts: Arc<dyn MountSource>,
        probe: Arc<dyn StatsProbe>,
        thresholds: Thresholds,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            mounts,
            probe,
            thresholds,
            tracker: NotificationTracker::new(),
            dispatcher,
            trash: TrashLocator::for_current_user(),
            activity: None,
        }
    }

    #[must_use]
    pub fn with_trash_locator(mut self, trash: TrashLocator) -> Self {
        self.trash = trash;
        self
    }

    #[must_use]
    pub fn with_activity(mut self, activity: ActivityLoggerHandle) -> Self {
        self.activity = Some(activity);
        self
    }

    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    #[must_use]
    pub fn tracker(&self) -> &NotificationTracker {
        &self.tracker
    }

    #[must_use]
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut NotificationDispatcher {
        &mut self.dispatcher
    }

    /// Enumerate and classify without notifying or touching state.
    #[must_use]
    pub fn evaluate(&self) -> Evaluation {
        let enumeration = enumerate(
            self.mounts.as_ref(),
            self.probe.as_ref(),
            &self.thresholds,
        );
        let statuses = enumeration
            .candidates
            .iter()
            .map(|c| MountStatus::new(c, !is_sufficient(c, &self.thresholds)))
            .collect();
        Evaluation {
            enumeration,
            statuses,
        }
    }

    /// Run one full check cycle at time `now`.
    pub fn check_all_mounts(&mut self, now: Instant) -> CheckReport {
        let started = Instant::now();
        let evaluation = self.evaluate();

        for skipped in &evaluation.enumeration.skipped {
            if let SkipReason::StatFailed(details) = &skipped.reason {
                eprintln!(
                    "[LDSM-CHECK] skipping {}: {details}",
                    skipped.path.display()
                );
            }
        }
        if let Some(error) = &evaluation.enumeration.source_error {
            eprintln!("[LDSM-CHECK] static mount table unavailable: {error}");
        }

        let candidates = &evaluation.enumeration.candidates;
        let (low, sufficient) = space::partition(candidates, &self.thresholds);

        let recovered = self.tracker.forget_recovered(&sufficient);
        for path in &recovered {
            if let Some(candidate) = sufficient.iter().find(|c| &c.path == path) {
                self.log(ActivityEvent::MountRecovered {
                    mount_point: path.to_string_lossy().into_owned(),
                    free_ratio: candidate.stats.free_ratio(),
                });
            }
        }

        let multiple_volumes = candidates.len() > 1;
        let other_usable_volumes = candidates.len() > low.len();
        let dispatcher = &self.dispatcher;
        let trash = &self.trash;
        let probe = self.probe.as_ref();
        let activity = self.activity.as_ref();

        let decisions = self
            .tracker
            .process_low(&low, &self.thresholds, now, |candidate| {
                let info = LowSpaceInfo {
                    mount_path: candidate.path.clone(),
                    display_name: guess_display_name(&candidate.path),
                    free_bytes: candidate.stats.free_bytes(),
                    has_trash: trash.has_trash(probe, &candidate.path),
                    has_analyzer: dispatcher.analyzer().is_available(),
                    multiple_volumes,
                    other_usable_volumes,
                };
                let outcome = dispatcher.dispatch(&info);
                if let Some(activity) = activity {
                    activity.send(ActivityEvent::LowSpaceNotified {
                        mount_point: candidate.path.to_string_lossy().into_owned(),
                        free_ratio: candidate.stats.free_ratio(),
                        free_bytes: info.free_bytes,
                        response: match outcome {
                            DispatchOutcome::NotShown => None,
                            DispatchOutcome::Shown(response) => Some(response.as_str().to_string()),
                        },
                    });
                }
                outcome
            });

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.log(ActivityEvent::CheckCompleted {
            mounts_checked: candidates.len(),
            mounts_low: low.len(),
            duration_ms,
        });

        CheckReport {
            evaluation,
            recovered,
            decisions,
            duration_ms,
        }
    }

    /// Drop state for mounts that are no longer live. Returns purged paths.
    pub fn purge_vanished(&mut self) -> Vec<PathBuf> {
        let live = match self.mounts.live_mounts() {
            Ok(live) => live,
            Err(error) => {
                // Without a live table nothing can be judged vanished.
                eprintln!("[LDSM-CHECK] live mount table unavailable: {error}");
                return Vec::new();
            }
        };
        let purged = self
            .tracker
            .retain_live(|path| live.iter().any(|mount| mount.path == path));
        if !purged.is_empty() {
            self.log(ActivityEvent::MountsChanged {
                purged: purged
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect(),
            });
        }
        purged
    }

    /// Handle a mounts-changed event: purge vanished mounts, then check.
    pub fn on_mounts_changed(&mut self, now: Instant) -> (Vec<PathBuf>, CheckReport) {
        let purged = self.purge_vanished();
        let report = self.check_all_mounts(now);
        (purged, report)
    }

    /// Install new thresholds and drop state for paths that became ignored.
    pub fn apply_thresholds(&mut self, thresholds: Thresholds) -> Vec<PathBuf> {
        self.thresholds = thresholds;
        self.tracker.forget_ignored(&self.thresholds)
    }

    /// Forget all hysteresis state.
    pub fn clear_state(&mut self) {
        self.tracker.clear();
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(activity) = &self.activity {
            activity.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ThresholdsConfig;
    use crate::daemon::notifications::{AnalyzerLauncher, DialogGate, JournalNotifier};
    use crate::platform::pal::{BlockStats, MockPlatform};
    use std::path::Path;
    use std::time::Duration;

    fn stats(available: u64) -> BlockStats {
        BlockStats {
            total_blocks: 1000,
            available_blocks: available,
            fragment_size: 4096,
        }
    }

    fn monitor(mock: &Arc<MockPlatform>) -> DiskSpaceMonitor {
        let dispatcher = NotificationDispatcher::new(
            Box::new(JournalNotifier),
            DialogGate::new(),
            AnalyzerLauncher::new("ldsm-test-no-analyzer"),
        );
        DiskSpaceMonitor::new(
            Arc::clone(mock) as Arc<dyn MountSource>,
            Arc::clone(mock) as Arc<dyn StatsProbe>,
            Thresholds::default(),
            dispatcher,
        )
        .with_trash_locator(TrashLocator::new("/nonexistent/ldsm-data", 1000))
    }

    #[test]
    fn evaluate_classifies_without_state() {
        let mock = Arc::new(MockPlatform::new());
        mock.add_mount("/data", "ext4", "/dev/sdb1", stats(40));
        mock.add_mount("/home", "ext4", "/dev/sda2", stats(900));
        let m = monitor(&mock);

        let eval = m.evaluate();
        assert_eq!(eval.statuses.len(), 2);
        assert_eq!(eval.low_count(), 1);
        assert!(eval.statuses[0].low);
        assert_eq!(eval.statuses[0].total_bytes, 4096 * 1000);
        assert!(m.tracker().is_empty());
    }

    #[test]
    fn check_notifies_first_low_mount_and_records_state() {
        let mock = Arc::new(MockPlatform::new());
        mock.add_mount("/data", "ext4", "/dev/sdb1", stats(40));
        mock.add_mount("/scratch", "ext4", "/dev/sdc1", stats(30));
        let mut m = monitor(&mock);

        let report = m.check_all_mounts(Instant::now());
        let shown = report.notifications();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].0, Path::new("/data"));
        assert!(matches!(report.decisions[1], LowDecision::Deferred { .. }));
        assert_eq!(m.tracker().paths(), vec![PathBuf::from("/data")]);
    }

    #[test]
    fn only_low_mounts_reach_the_tracker_in_mount_order() {
        let mock = Arc::new(MockPlatform::new());
        mock.add_mount("/a", "ext4", "/dev/sdb1", stats(40));
        mock.add_mount("/b", "ext4", "/dev/sdc1", stats(900));
        mock.add_mount("/c", "ext4", "/dev/sdd1", stats(20));
        let mut m = monitor(&mock);

        let report = m.check_all_mounts(Instant::now());
        let decided: Vec<&Path> = report.decisions.iter().map(LowDecision::path).collect();
        assert_eq!(decided, vec![Path::new("/a"), Path::new("/c")]);
        assert!(report.recovered.is_empty());
    }

    #[test]
    fn recovery_is_reported_and_clears_state() {
        let mock = Arc::new(MockPlatform::new());
        mock.add_mount("/data", "ext4", "/dev/sdb1", stats(40));
        let mut m = monitor(&mock);
        let t0 = Instant::now();
        m.check_all_mounts(t0);

        mock.set_stats("/data", stats(500));
        let report = m.check_all_mounts(t0 + Duration::from_secs(60));
        assert_eq!(report.recovered, vec![PathBuf::from("/data")]);
        assert!(m.tracker().is_empty());
    }

    #[test]
    fn mounts_changed_purges_vanished_entries_before_checking() {
        let mock = Arc::new(MockPlatform::new());
        mock.add_mount("/data", "ext4", "/dev/sdb1", stats(40));
        mock.add_mount("/mnt/usb", "vfat", "/dev/sdd1", stats(10));
        let mut m = monitor(&mock);
        // First cycle warns about /data, second about /mnt/usb.
        let t0 = Instant::now();
        m.check_all_mounts(t0);
        m.check_all_mounts(t0 + Duration::from_secs(1));
        assert_eq!(m.tracker().len(), 2);

        mock.unmount("/data");
        let (purged, report) = m.on_mounts_changed(t0 + Duration::from_secs(2));
        assert_eq!(purged, vec![PathBuf::from("/data")]);
        assert_eq!(report.evaluation.enumeration.candidates.len(), 1);
        assert_eq!(m.tracker().paths(), vec![PathBuf::from("/mnt/usb")]);
    }

    #[test]
    fn applying_thresholds_purges_newly_ignored_paths() {
        let mock = Arc::new(MockPlatform::new());
        mock.add_mount("/data", "ext4", "/dev/sdb1", stats(40));
        let mut m = monitor(&mock);
        m.check_all_mounts(Instant::now());
        assert_eq!(m.tracker().len(), 1);

        let ignoring = ThresholdsConfig {
            ignore_paths: vec!["/data".to_string()],
            ..ThresholdsConfig::default()
        }
        .resolve()
        .0;
        assert_eq!(m.apply_thresholds(ignoring), vec![PathBuf::from("/data")]);
        assert!(m.tracker().is_empty());
        assert!(m.evaluate().statuses.is_empty());
    }

    #[test]
    fn pending_dialog_leaves_entry_without_handling() {
        let mock = Arc::new(MockPlatform::new());
        mock.add_mount("/data", "ext4", "/dev/sdb1", stats(40));
        let mut m = monitor(&mock);
        let _pending = m.dispatcher().gate().try_acquire().expect("gate");

        let report = m.check_all_mounts(Instant::now());
        assert_eq!(
            report.notifications(),
            vec![(PathBuf::from("/data"), DispatchOutcome::NotShown)]
        );
        assert_eq!(m.tracker().len(), 1);
    }
}
