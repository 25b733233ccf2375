//! Ports consumed by the AI core.
//!
//! Storage, file access, and chat history belong to the surrounding notes
//! application; the core only sees them through these traits.

use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    AttachmentId, AttachmentRecord, AttachmentSummary, ChatTurn, StatusGuard, SummaryStatus,
};
use crate::Result;

// =============================================================================
// ATTACHMENT STORAGE
// =============================================================================

/// Attachment summary storage used by the summary job controller.
#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    /// Fetch an attachment by ID.
    async fn fetch(&self, id: AttachmentId) -> Result<Option<AttachmentRecord>>;

    /// Reset an attachment to `pending` with no summary, owned by `cycle`.
    ///
    /// Any previous cycle loses the right to write.
    async fn begin_cycle(&self, id: AttachmentId, cycle: Uuid) -> Result<AttachmentRecord>;

    /// Guarded status write.
    ///
    /// Applies `status` (and `summary`, when given) only if `guard` matches
    /// the stored record at write time. Returns `Ok(false)` when the guard
    /// does not match; returns `Error::InvalidTransition` when it matches but
    /// the lifecycle forbids the step.
    async fn set_status_if(
        &self,
        id: AttachmentId,
        guard: &StatusGuard,
        status: SummaryStatus,
        summary: Option<String>,
    ) -> Result<bool>;
}

/// Read port listing a note's attachments for the decision phase.
#[async_trait]
pub trait AttachmentSummaryReader: Send + Sync {
    /// Attachments of a note in display order (1-based numbering follows it).
    async fn list_attachment_summaries(&self, note_id: Uuid) -> Result<Vec<AttachmentSummary>>;
}

/// Read port for a note's chat history.
#[async_trait]
pub trait ChatHistoryReader: Send + Sync {
    /// The most recent `limit` turns, oldest first.
    async fn recent_turns(&self, note_id: Uuid, limit: usize) -> Result<Vec<ChatTurn>>;
}

// =============================================================================
// FILES
// =============================================================================

/// Filesystem port.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Whether a regular file exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Read the full contents of a non-empty file.
    ///
    /// Missing and zero-length files are `Error::FileUnavailable`.
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;
}
