//! Service modules for label recognition and inventory synchronization
//!
//! Recognition pipeline:
//! - `vision_client`: label attribute extraction through a vision model
//! - `candidate_retriever`: trigram, embedding and substring candidate search
//! - `candidate_scorer`: heuristic scoring and vintage refinement
//! - `match_engine`: threshold decision and the attempt audit record
//!
//! External inventory system:
//! - `inventory_client`: session-based HTTP client
//! - `sync_engine`: catalog reconciliation with hash-based change detection
//! - `outbox_dispatcher`: idempotent delivery of approved counts

pub mod candidate_retriever;
pub mod candidate_scorer;
pub mod catalog_embedder;
pub mod embedding_client;
pub mod inventory_client;
pub mod match_engine;
pub mod outbox_dispatcher;
pub mod sync_engine;
pub mod trigram;
pub mod vision_client;

pub use candidate_retriever::CandidateRetriever;
pub use catalog_embedder::{refresh_embeddings, EmbeddingRefresh};
pub use embedding_client::{EmbeddingClient, EmbeddingError, EmbeddingProvider};
pub use inventory_client::{
    DeliveryReceipt, EntityKind, InventoryClient, InventoryError, InventorySession, InventorySystem,
};
pub use match_engine::{
    MatchEngine, MatchOutcome, RecognitionError, RecognitionMode, RecognitionRequest,
    RecognitionResult,
};
pub use outbox_dispatcher::{Enqueued, OutboxDispatcher, OutboxError};
pub use sync_engine::{SyncEngine, SyncError};
pub use vision_client::{ExtractionError, LabelImage, LabelVision, VisionClient, VisionReply};
