//! Daemon subsystem: main monitoring loop, change watchers, signal handling,
//! and user-facing notifications.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod notifications;
#[cfg(feature = "daemon")]
pub mod signals;
pub mod watch;
