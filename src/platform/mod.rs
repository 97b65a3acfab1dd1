//! Platform abstraction: mount tables and filesystem statistics.

pub mod pal;
pub mod probe;
