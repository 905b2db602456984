//! Database access for cellar-ingest
//!
//! Tables are created by `cellar_common::db::init`; these modules hold the
//! per-table queries used by recognition, sync and the outbox.

pub mod attempts;
pub mod catalog;
pub mod logs;
pub mod outbox;
pub mod sessions;
pub mod settings;
pub mod sync_lock;
pub mod sync_runs;
