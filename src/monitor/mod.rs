//! Low-disk-space monitoring: mount enumeration, space evaluation, notification
//! hysteresis, trash lookup, and the check cycle tying them together.

pub mod check;
pub mod mounts;
pub mod space;
pub mod tracker;
pub mod trash;
