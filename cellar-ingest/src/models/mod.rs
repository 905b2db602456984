//! Data models for cellar-ingest
//!
//! - Label extraction and catalog candidates (recognition)
//! - Recognition attempt audit records
//! - Sync runs, reimport policies and external inventory records
//! - Outbox jobs and the counting sessions they are built from

pub mod attempt;
pub mod candidate;
pub mod counting_session;
pub mod external;
pub mod extraction;
pub mod outbox_job;
pub mod sync_run;

pub use attempt::{AttemptCompletion, AttemptStatus, RecognitionAttempt, RecognitionFeedback};
pub use candidate::{CandidateProduct, CatalogProduct, MatchedProduct, RetrievalMethod};
pub use counting_session::{CountingSession, SessionTotal};
pub use external::{
    ExternalCategory, ExternalId, ExternalPrice, ExternalProduct, ExternalStock, ExternalStore,
    ExternalUnit,
};
pub use extraction::{ExtractionRecord, ParseFailure};
pub use outbox_job::{DispatchResult, JobType, OutboxJob, OutboxStatus};
pub use sync_run::{ReimportPolicy, SyncRun, SyncRunType, SyncStage, SyncStats, SyncStatus};
