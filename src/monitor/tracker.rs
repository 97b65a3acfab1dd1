//! Per-mount notification hysteresis.
//!
//! A mount is either unnotified (no entry) or notified with the ratio and time
//! of the last warning. Re-notification needs both a further drop of more than
//! `free_percent_notify_again` and more than `min_notify_period` since the last
//! warning. Recovery deletes the entry, so the next drop is a first warning.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::core::config::Thresholds;
use crate::monitor::mounts::MountCandidate;

/// What the user chose in response to a low-space warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Cancelled,
    AnalyzeRequested,
    EmptyTrashRequested,
    /// Closed or timed out without choosing an action.
    Dismissed,
}

impl Response {
    /// Whether this response ends warnings for the current cycle.
    ///
    /// Emptying the trash and dismissing count as handled; cancelling and
    /// asking for the analyzer leave other low mounts eligible this cycle.
    #[must_use]
    pub const fn is_handled(self) -> bool {
        matches!(self, Self::EmptyTrashRequested | Self::Dismissed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::AnalyzeRequested => "analyze_requested",
            Self::EmptyTrashRequested => "empty_trash_requested",
            Self::Dismissed => "dismissed",
        }
    }
}

/// Result of one notify attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "response", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Another warning was already pending, or the notifier failed.
    NotShown,
    Shown(Response),
}

impl DispatchOutcome {
    #[must_use]
    pub const fn is_handled(self) -> bool {
        match self {
            Self::NotShown => false,
            Self::Shown(response) => response.is_handled(),
        }
    }
}

/// State kept for a mount that has been warned about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotifiedRecord {
    pub ratio: f64,
    pub notified_at: Instant,
}

/// What the tracker did with one low mount.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LowDecision {
    /// An earlier warning this cycle was handled; state untouched.
    Deferred { path: PathBuf },
    /// No prior entry: entry created and a warning attempted.
    FirstWarning {
        path: PathBuf,
        ratio: f64,
        outcome: DispatchOutcome,
    },
    /// Both hysteresis gates passed: entry refreshed and a warning attempted.
    Rewarned {
        path: PathBuf,
        ratio: f64,
        outcome: DispatchOutcome,
    },
    /// Dropped far enough but too soon: ratio tracked, time kept.
    RatioLowered {
        path: PathBuf,
        from: f64,
        to: f64,
    },
    /// No significant further drop.
    Unchanged { path: PathBuf },
}

impl LowDecision {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Deferred { path }
            | Self::FirstWarning { path, .. }
            | Self::Rewarned { path, .. }
            | Self::RatioLowered { path, .. }
            | Self::Unchanged { path } => path,
        }
    }

    /// Outcome of the notify attempt, if one was made.
    #[must_use]
    pub const fn outcome(&self) -> Option<DispatchOutcome> {
        match self {
            Self::FirstWarning { outcome, .. } | Self::Rewarned { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }
}

/// Owner of the path → [`NotifiedRecord`] map.
#[derive(Debug, Default)]
pub struct NotificationTracker {
    entries: HashMap<PathBuf, NotifiedRecord>,
}

impl NotificationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&NotifiedRecord> {
        self.entries.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracked paths in sorted order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Run the hysteresis rules over this cycle's low mounts, in order.
    ///
    /// `notify` is invoked for each mount that qualifies for a warning until
    /// one warning is shown and handled; later mounts are deferred untouched.
    pub fn process_low<F>(
        &mut self,
        low: &[&MountCandidate],
        thresholds: &Thresholds,
        now: Instant,
        mut notify: F,
    ) -> Vec<LowDecision>
    where
        F: FnMut(&MountCandidate) -> DispatchOutcome,
    {
        let mut handled_this_cycle = false;
        let mut decisions = Vec::with_capacity(low.len());

        for candidate in low {
            let path = candidate.path.clone();
            if handled_this_cycle {
                decisions.push(LowDecision::Deferred { path });
                continue;
            }

            let ratio = candidate.stats.free_ratio();
            let Some(prior) = self.entries.get_mut(&path) else {
                self.entries.insert(
                    path.clone(),
                    NotifiedRecord {
                        ratio,
                        notified_at: now,
                    },
                );
                let outcome = notify(candidate);
                handled_this_cycle = outcome.is_handled();
                decisions.push(LowDecision::FirstWarning {
                    path,
                    ratio,
                    outcome,
                });
                continue;
            };

            let delta = prior.ratio - ratio;
            if delta <= thresholds.free_percent_notify_again {
                decisions.push(LowDecision::Unchanged { path });
                continue;
            }

            let elapsed = now.saturating_duration_since(prior.notified_at);
            if elapsed > thresholds.min_notify_period {
                *prior = NotifiedRecord {
                    ratio,
                    notified_at: now,
                };
                let outcome = notify(candidate);
                handled_this_cycle = outcome.is_handled();
                decisions.push(LowDecision::Rewarned {
                    path,
                    ratio,
                    outcome,
                });
            } else {
                let from = prior.ratio;
                prior.ratio = ratio;
                decisions.push(LowDecision::RatioLowered {
                    path,
                    from,
                    to: ratio,
                });
            }
        }

        decisions
    }

    /// Delete entries for mounts that are sufficient again. Returns the
    /// recovered paths.
    pub fn forget_recovered(&mut self, sufficient: &[&MountCandidate]) -> Vec<PathBuf> {
        sufficient
            .iter()
            .filter(|candidate| self.entries.remove(&candidate.path).is_some())
            .map(|candidate| candidate.path.clone())
            .collect()
    }

    /// Keep only entries whose mount is still live. Returns purged paths.
    pub fn retain_live<F>(&mut self, mut is_live: F) -> Vec<PathBuf>
    where
        F: FnMut(&Path) -> bool,
    {
        self.purge_where(|path| !is_live(path))
    }

    /// Drop entries for paths that are now user-ignored. Returns purged paths.
    pub fn forget_ignored(&mut self, thresholds: &Thresholds) -> Vec<PathBuf> {
        self.purge_where(|path| thresholds.is_ignored(&path.to_string_lossy()))
    }

    fn purge_where<F>(&mut self, mut should_purge: F) -> Vec<PathBuf>
    where
        F: FnMut(&Path) -> bool,
    {
        let mut purged: Vec<PathBuf> = self
            .entries
            .keys()
            .filter(|path| should_purge(path))
            .cloned()
            .collect();
        for path in &purged {
            self.entries.remove(path);
        }
        purged.sort();
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ThresholdsConfig;
    use crate::platform::pal::BlockStats;
    use proptest::prelude::*;
    use std::time::Duration;

    fn low_mount(path: &str, available: u64) -> MountCandidate {
        MountCandidate {
            path: path.into(),
            fs_type: "ext4".to_string(),
            device: "/dev/sdb1".to_string(),
            read_only: false,
            stats: BlockStats {
                total_blocks: 1000,
                available_blocks: available,
                fragment_size: 4096,
            },
        }
    }

    fn dismissing(
        calls: &mut Vec<PathBuf>,
    ) -> impl FnMut(&MountCandidate) -> DispatchOutcome + '_ {
        move |candidate: &MountCandidate| {
            calls.push(candidate.path.clone());
            DispatchOutcome::Shown(Response::Dismissed)
        }
    }

    #[test]
    fn response_handled_asymmetry() {
        assert!(Response::Dismissed.is_handled());
        assert!(Response::EmptyTrashRequested.is_handled());
        assert!(!Response::Cancelled.is_handled());
        assert!(!Response::AnalyzeRequested.is_handled());
        assert!(!DispatchOutcome::NotShown.is_handled());
    }

    #[test]
    fn first_low_classification_notifies_and_records() {
        let mut tracker = NotificationTracker::new();
        let t0 = Instant::now();
        let data = low_mount("/data", 40);
        let mut calls = Vec::new();

        let decisions =
            tracker.process_low(&[&data], &Thresholds::default(), t0, dismissing(&mut calls));
        assert_eq!(calls, vec![PathBuf::from("/data")]);
        assert!(matches!(decisions[0], LowDecision::FirstWarning { .. }));
        let record = tracker.get(Path::new("/data")).unwrap();
        assert!((record.ratio - 0.04).abs() < 1e-12);
        assert_eq!(record.notified_at, t0);
    }

    #[test]
    fn not_shown_keeps_entry_and_allows_next_mount() {
        let mut tracker = NotificationTracker::new();
        let a = low_mount("/a", 10);
        let b = low_mount("/b", 10);
        let mut seen = Vec::new();
        tracker.process_low(&[&a, &b], &Thresholds::default(), Instant::now(), |c| {
            seen.push(c.path.clone());
            DispatchOutcome::NotShown
        });
        assert_eq!(seen.len(), 2);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn cancelled_response_lets_next_mount_warn() {
        let mut tracker = NotificationTracker::new();
        let a = low_mount("/a", 10);
        let b = low_mount("/b", 10);
        let c = low_mount("/c", 10);
        let mut responses = vec![Response::Cancelled, Response::Dismissed].into_iter();
        let decisions = tracker.process_low(
            &[&a, &b, &c],
            &Thresholds::default(),
            Instant::now(),
            |_| DispatchOutcome::Shown(responses.next().unwrap_or(Response::Dismissed)),
        );
        assert!(matches!(decisions[0], LowDecision::FirstWarning { .. }));
        assert!(matches!(decisions[1], LowDecision::FirstWarning { .. }));
        assert!(matches!(decisions[2], LowDecision::Deferred { .. }));
        assert!(tracker.get(Path::new("/c")).is_none());
    }

    #[test]
    fn both_gates_required_for_rewarning() {
        let t = Thresholds::default();
        let t0 = Instant::now();
        let mut tracker = NotificationTracker::new();
        let mut calls = Vec::new();
        tracker.process_low(&[&low_mount("/data", 100)], &t, t0, dismissing(&mut calls));

        // Large drop, too soon.
        let d = tracker.process_low(
            &[&low_mount("/data", 50)],
            &t,
            t0 + Duration::from_secs(60),
            dismissing(&mut calls),
        );
        assert!(matches!(d[0], LowDecision::RatioLowered { .. }));

        // Long wait, small drop relative to the lowered ratio.
        let d = tracker.process_low(
            &[&low_mount("/data", 45)],
            &t,
            t0 + Duration::from_secs(3600),
            dismissing(&mut calls),
        );
        assert!(matches!(d[0], LowDecision::Unchanged { .. }));
        assert_eq!(calls.len(), 1);

        // Both.
        let d = tracker.process_low(
            &[&low_mount("/data", 20)],
            &t,
            t0 + Duration::from_secs(3600),
            dismissing(&mut calls),
        );
        assert!(matches!(d[0], LowDecision::Rewarned { .. }));
        assert_eq!(calls.len(), 2);
        assert_eq!(
            tracker.get(Path::new("/data")).unwrap().notified_at,
            t0 + Duration::from_secs(3600)
        );
    }

    #[test]
    fn elapsed_equal_to_period_does_not_rewarn() {
        let t = Thresholds::default();
        let t0 = Instant::now();
        let mut tracker = NotificationTracker::new();
        let mut calls = Vec::new();
        tracker.process_low(&[&low_mount("/data", 40)], &t, t0, dismissing(&mut calls));
        let d = tracker.process_low(
            &[&low_mount("/data", 10)],
            &t,
            t0 + t.min_notify_period,
            dismissing(&mut calls),
        );
        assert!(matches!(d[0], LowDecision::RatioLowered { .. }));
    }

    #[test]
    fn recovery_resets_hysteresis() {
        let t = Thresholds::default();
        let t0 = Instant::now();
        let mut tracker = NotificationTracker::new();
        let mut calls = Vec::new();
        tracker.process_low(&[&low_mount("/data", 40)], &t, t0, dismissing(&mut calls));

        let recovered = low_mount("/data", 900);
        assert_eq!(tracker.forget_recovered(&[&recovered]), vec![PathBuf::from("/data")]);
        assert!(tracker.is_empty());

        let t1 = t0 + Duration::from_secs(5);
        let d = tracker.process_low(&[&low_mount("/data", 40)], &t, t1, dismissing(&mut calls));
        assert!(matches!(d[0], LowDecision::FirstWarning { .. }));
        assert_eq!(tracker.get(Path::new("/data")).unwrap().notified_at, t1);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn retain_live_and_forget_ignored_purge_entries() {
        let mut tracker = NotificationTracker::new();
        let now = Instant::now();
        tracker.process_low(
            &[&low_mount("/a", 1), &low_mount("/b", 1), &low_mount("/c", 1)],
            &Thresholds::default(),
            now,
            |_| DispatchOutcome::NotShown,
        );

        let purged = tracker.retain_live(|path| path != Path::new("/b"));
        assert_eq!(purged, vec![PathBuf::from("/b")]);

        let ignoring_c = ThresholdsConfig {
            ignore_paths: vec!["/c".to_string()],
            ..ThresholdsConfig::default()
        }
        .resolve()
        .0;
        assert_eq!(tracker.forget_ignored(&ignoring_c), vec![PathBuf::from("/c")]);
        assert_eq!(tracker.paths(), vec![PathBuf::from("/a")]);
    }

    #[test]
    fn decision_serializes_with_tag() {
        let decision = LowDecision::FirstWarning {
            path: "/data".into(),
            ratio: 0.04,
            outcome: DispatchOutcome::Shown(Response::Dismissed),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "first_warning");
        assert_eq!(json["outcome"]["response"], "dismissed");
    }

    proptest! {
        // With handling responses, at most one warning surfaces per cycle.
        #[test]
        fn at_most_one_handled_warning_per_cycle(
            availability in prop::collection::vec(0u64..50, 1..8),
            trash in any::<bool>(),
        ) {
            let mounts: Vec<MountCandidate> = availability
                .iter()
                .enumerate()
                .map(|(i, avail)| low_mount(&format!("/m{i}"), *avail))
                .collect();
            let refs: Vec<&MountCandidate> = mounts.iter().collect();
            let response = if trash { Response::EmptyTrashRequested } else { Response::Dismissed };
            let mut tracker = NotificationTracker::new();
            let mut shown = 0;
            tracker.process_low(&refs, &Thresholds::default(), Instant::now(), |_| {
                shown += 1;
                DispatchOutcome::Shown(response)
            });
            prop_assert_eq!(shown, 1);
            prop_assert_eq!(tracker.len(), 1);
        }

        #[test]
        fn rewarning_requires_drop_and_period(
            first in 0u64..50,
            second in 0u64..50,
            elapsed_secs in 0u64..1_200,
        ) {
            let t = Thresholds::default();
            let t0 = Instant::now();
            let mut tracker = NotificationTracker::new();
            tracker.process_low(&[&low_mount("/data", first)], &t, t0, |_| {
                DispatchOutcome::Shown(Response::Dismissed)
            });

            let mut rewarned = false;
            let now = t0 + Duration::from_secs(elapsed_secs);
            tracker.process_low(&[&low_mount("/data", second)], &t, now, |_| {
                rewarned = true;
                DispatchOutcome::Shown(Response::Dismissed)
            });

            #[allow(clippy::cast_precision_loss)]
            let delta = first as f64 / 1000.0 - second as f64 / 1000.0;
            let expected = delta > t.free_percent_notify_again
                && Duration::from_secs(elapsed_secs) > t.min_notify_period;
            prop_assert_eq!(rewarned, expected);
        }
    }
}
