//! # marginalia-core
//!
//! Core types, ports, and error taxonomy for the marginalia AI core.
//!
//! This crate provides:
//! - The summary lifecycle ([`SummaryStatus`]) with transition validation
//! - Chat pipeline data ([`DecisionResult`], [`GenerationResult`], [`ChatTurn`])
//! - Storage, history, and filesystem ports ([`traits`])
//! - An in-memory reference store and a local filesystem store
//! - Shared defaults

pub mod defaults;
pub mod error;
pub mod files;
pub mod models;
pub mod store;
pub mod traits;

pub use error::{Error, Result};
pub use files::LocalFileStore;
pub use models::*;
pub use store::MemoryStore;
pub use traits::*;
