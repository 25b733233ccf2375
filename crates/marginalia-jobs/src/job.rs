//! Background execution of a single summary job.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use marginalia_core::{defaults, AttachmentId, FileKind, Result, StatusGuard, SummaryStatus};

use crate::controller::{Shared, SummaryEvent};

/// One job cycle for one attachment.
pub(crate) struct SummaryJob {
    pub(crate) shared: Arc<Shared>,
    pub(crate) attachment_id: AttachmentId,
    pub(crate) cycle: Uuid,
    pub(crate) file_path: PathBuf,
    pub(crate) file_kind: FileKind,
    pub(crate) token: CancellationToken,
}

/// Truncate an error for storage as the failed summary text.
pub(crate) fn failure_message(error: &impl std::fmt::Display, max_chars: usize) -> String {
    let detail: String = error.to_string().chars().take(max_chars).collect();
    format!("{}{detail}", defaults::SUMMARY_FAILED_PREFIX)
}

impl SummaryJob {
    pub(crate) async fn run(self) {
        let attachment_id = self.attachment_id;
        let cycle = self.cycle;

        let permit = tokio::select! {
            _ = self.token.cancelled() => {
                debug!(attachment_id, %cycle, "Summary job cancelled while queued");
                self.shared.finish(attachment_id, cycle).await;
                return;
            }
            permit = self.shared.permits.clone().acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            warn!(attachment_id, %cycle, "Summary job slots closed");
            self.shared.finish(attachment_id, cycle).await;
            return;
        };

        if let Err(e) = self.execute().await {
            warn!(attachment_id, %cycle, error = %e, "Summary job storage error");
        }
        self.shared.finish(attachment_id, cycle).await;
    }

    async fn execute(&self) -> Result<()> {
        if self.token.is_cancelled() {
            debug!(attachment_id = self.attachment_id, cycle = %self.cycle, "Summary job cancelled before start");
            return Ok(());
        }

        if !self
            .write(SummaryStatus::Pending, SummaryStatus::Processing, None)
            .await?
        {
            return Ok(());
        }
        self.shared.emit(SummaryEvent::Started {
            attachment_id: self.attachment_id,
            cycle: self.cycle,
        });

        let started = std::time::Instant::now();
        let outcome = self.summarize().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(summary) => {
                if self
                    .write(
                        SummaryStatus::Processing,
                        SummaryStatus::Complete,
                        Some(summary),
                    )
                    .await?
                {
                    info!(
                        attachment_id = self.attachment_id,
                        cycle = %self.cycle,
                        duration_ms,
                        "Summary complete"
                    );
                    self.shared.emit(SummaryEvent::Completed {
                        attachment_id: self.attachment_id,
                        cycle: self.cycle,
                    });
                }
            }
            Err(e) => {
                let message = failure_message(&e, self.shared.config.error_max_chars);
                if self
                    .write(
                        SummaryStatus::Processing,
                        SummaryStatus::Failed,
                        Some(message),
                    )
                    .await?
                {
                    warn!(
                        attachment_id = self.attachment_id,
                        cycle = %self.cycle,
                        duration_ms,
                        error = %e,
                        "Summary failed"
                    );
                    self.shared.emit(SummaryEvent::Failed {
                        attachment_id: self.attachment_id,
                        cycle: self.cycle,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn summarize(&self) -> Result<String> {
        let bytes = self.shared.files.read_bytes(&self.file_path).await?;
        let mime_type = self.file_kind.mime_type(&self.file_path, &bytes);
        self.shared
            .model
            .summarize_document(bytes, self.file_kind, &mime_type)
            .await
    }

    /// Guarded write for this cycle. Emits `Discarded` when the guard fails.
    async fn write(
        &self,
        expected: SummaryStatus,
        next: SummaryStatus,
        summary: Option<String>,
    ) -> Result<bool> {
        let written = self
            .shared
            .repo
            .set_status_if(
                self.attachment_id,
                &StatusGuard::job(self.cycle, expected),
                next,
                summary,
            )
            .await?;
        if !written {
            debug!(
                attachment_id = self.attachment_id,
                cycle = %self.cycle,
                attempted = %next,
                "Discarding stale summary write"
            );
            self.shared.emit(SummaryEvent::Discarded {
                attachment_id: self.attachment_id,
                cycle: self.cycle,
                attempted: next,
            });
        }
        Ok(written)
    }
}
