//! # marginalia-jobs
//!
//! Supervised background summarization of note attachments.
//!
//! This crate provides:
//! - One background task per `start`/`regenerate`, bounded by a semaphore
//! - Guarded status writes, so a cancelled or superseded job never
//!   overwrites a newer state
//! - Cooperative cancellation and shutdown via cancellation tokens
//! - Lifecycle events on a broadcast channel
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use marginalia_core::{LocalFileStore, MemoryStore};
//! use marginalia_jobs::{SummaryConfig, SummaryJobController};
//!
//! let controller = SummaryJobController::new(
//!     Arc::new(store.clone()),
//!     Arc::new(LocalFileStore::new()),
//!     model_client,
//!     SummaryConfig::from_env(),
//! );
//!
//! controller.start(record.id, &record.file_path, record.file_kind).await?;
//! let mut events = controller.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! ```

pub mod controller;
mod job;

pub use controller::{SummaryConfig, SummaryEvent, SummaryJobController};
