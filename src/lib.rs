#![forbid(unsafe_code)]

//! Low Disk Space Monitor (ldsm): a background service that watches mounted
//! filesystems and warns the user, at most once per cycle and with
//! hysteresis, when one runs low on free space.
//!
//! The pieces:
//! 1. **Mount enumeration**: static table ∩ live table, minus read-only,
//!    ignored, virtual and pseudo filesystems.
//! 2. **Space evaluation**: free ratio against a threshold, with an absolute
//!    free-bytes floor that suppresses warnings on large volumes.
//! 3. **Notification tracking**: per-mount state so a warning repeats only
//!    after a further drop and a minimum quiet period.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use low_disk_monitor::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use low_disk_monitor::core::config::Config;
//! use low_disk_monitor::monitor::tracker::NotificationTracker;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod platform;
