//! In-memory reference implementation of the storage ports.
//!
//! Used by the CLI host and by tests. The compare-and-set happens under a
//! single write lock, so a guarded write observes the status as of the write
//! itself, not as of some earlier read.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AttachmentId, AttachmentRecord, AttachmentSummary, ChatTurn, FileKind, StatusGuard,
    SummaryStatus,
};
use crate::traits::{AttachmentRepository, AttachmentSummaryReader, ChatHistoryReader};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    next_id: AttachmentId,
    attachments: BTreeMap<AttachmentId, AttachmentRecord>,
    status_log: HashMap<AttachmentId, Vec<SummaryStatus>>,
    chats: HashMap<Uuid, Vec<ChatTurn>>,
}

/// Thread-safe in-memory store for attachments and chat history.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uploaded attachment as `pending` and return it.
    pub async fn add_attachment(
        &self,
        note_id: Uuid,
        filename: impl Into<String>,
        file_path: impl Into<PathBuf>,
        file_kind: FileKind,
    ) -> AttachmentRecord {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        let record = AttachmentRecord::new(id, note_id, filename, file_path, file_kind);
        inner.attachments.insert(id, record.clone());
        inner.status_log.insert(id, vec![SummaryStatus::Pending]);
        record
    }

    /// Delete an attachment; running jobs for it become no-ops.
    pub async fn remove_attachment(&self, id: AttachmentId) -> Option<AttachmentRecord> {
        let mut inner = self.inner.write().await;
        inner.status_log.remove(&id);
        inner.attachments.remove(&id)
    }

    /// Append a chat turn to a note's history.
    pub async fn append_turn(&self, note_id: Uuid, turn: ChatTurn) {
        let mut inner = self.inner.write().await;
        inner.chats.entry(note_id).or_default().push(turn);
    }

    /// Every status an attachment has held, in order (resets included).
    pub async fn status_log(&self, id: AttachmentId) -> Vec<SummaryStatus> {
        self.inner
            .read()
            .await
            .status_log
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AttachmentRepository for MemoryStore {
    async fn fetch(&self, id: AttachmentId) -> Result<Option<AttachmentRecord>> {
        Ok(self.inner.read().await.attachments.get(&id).cloned())
    }

    async fn begin_cycle(&self, id: AttachmentId, cycle: Uuid) -> Result<AttachmentRecord> {
        let mut inner = self.inner.write().await;
        let record = inner
            .attachments
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("attachment {id}")))?;
        record.reset(cycle);
        let snapshot = record.clone();
        inner
            .status_log
            .entry(id)
            .or_default()
            .push(SummaryStatus::Pending);
        Ok(snapshot)
    }

    async fn set_status_if(
        &self,
        id: AttachmentId,
        guard: &StatusGuard,
        status: SummaryStatus,
        summary: Option<String>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.attachments.get_mut(&id) else {
            debug!(attachment_id = id, "Guarded write on missing attachment");
            return Ok(false);
        };
        if !guard.matches(record) {
            debug!(
                attachment_id = id,
                current = %record.status,
                requested = %status,
                "Guarded write rejected"
            );
            return Ok(false);
        }
        record.transition(status, summary)?;
        inner.status_log.entry(id).or_default().push(status);
        Ok(true)
    }
}

#[async_trait]
impl AttachmentSummaryReader for MemoryStore {
    async fn list_attachment_summaries(&self, note_id: Uuid) -> Result<Vec<AttachmentSummary>> {
        let records: Vec<AttachmentRecord> = self
            .inner
            .read()
            .await
            .attachments
            .values()
            .filter(|r| r.note_id == note_id)
            .cloned()
            .collect();

        let mut summaries = Vec::with_capacity(records.len());
        for record in records {
            let mut summary = record.to_summary();
            if tokio::fs::metadata(&record.file_path).await.is_err() {
                summary.file_path = None;
            }
            summaries.push(summary);
        }
        Ok(summaries)
    }
}

#[async_trait]
impl ChatHistoryReader for MemoryStore {
    async fn recent_turns(&self, note_id: Uuid, limit: usize) -> Result<Vec<ChatTurn>> {
        let inner = self.inner.read().await;
        let turns = inner.chats.get(&note_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }
}
