//! Activity logging: JSONL writer plus the dedicated logger thread.

pub mod activity;
pub mod jsonl;
