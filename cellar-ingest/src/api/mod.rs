//! HTTP API handlers for cellar-ingest
//!
//! REST endpoints for recognition, sync and outbox, plus SSE at `/events`.

pub mod auth;
pub mod catalog;
pub mod extract;
pub mod health;
pub mod outbox;
pub mod recognition;
pub mod settings;
pub mod sse;
pub mod sync;

pub use catalog::catalog_routes;
pub use health::health_routes;
pub use outbox::outbox_routes;
pub use recognition::recognition_routes;
pub use settings::settings_routes;
pub use sse::event_stream;
pub use sync::sync_routes;
