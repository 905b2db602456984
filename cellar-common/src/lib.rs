//! # Cellarcount Common Library
//!
//! Shared code for the Cellarcount services including:
//! - Database initialization (all tables)
//! - Event types (CellarEvent enum) and the broadcast EventBus
//! - Configuration loading and root folder resolution
//! - Content hashing for change detection
//! - SSE helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod hash;
pub mod sse;

pub use error::{Error, Result};
pub use hash::content_hash;
