//! Summary job controller: start, cancel, regenerate and poll.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use marginalia_core::{
    defaults, AttachmentId, AttachmentRepository, Error, FileKind, FileStore, Result,
    StatusGuard, StatusSnapshot, SummaryStatus,
};
use marginalia_inference::ModelClient;

use crate::job::SummaryJob;

/// Configuration for the summary job controller.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// Maximum number of summaries generated at once.
    pub max_concurrent: usize,
    /// Maximum characters of the error message kept in a failed summary.
    pub error_max_chars: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::SUMMARY_MAX_CONCURRENT,
            error_max_chars: defaults::SUMMARY_ERROR_MAX_CHARS,
            event_capacity: defaults::EVENT_BUS_CAPACITY,
        }
    }
}

impl SummaryConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SUMMARY_MAX_CONCURRENT` | `4` | Max summaries in flight |
    /// | `SUMMARY_ERROR_MAX_CHARS` | `100` | Error text kept in a failed summary |
    pub fn from_env() -> Self {
        let max_concurrent = std::env::var(defaults::ENV_SUMMARY_MAX_CONCURRENT)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::SUMMARY_MAX_CONCURRENT)
            .max(1);

        let error_max_chars = std::env::var(defaults::ENV_SUMMARY_ERROR_MAX_CHARS)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::SUMMARY_ERROR_MAX_CHARS);

        Self {
            max_concurrent,
            error_max_chars,
            ..Self::default()
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_error_max_chars(mut self, max: usize) -> Self {
        self.error_max_chars = max;
        self
    }
}

/// Event emitted by summary jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryEvent {
    /// A job was created and is waiting for a slot.
    Queued { attachment_id: AttachmentId, cycle: Uuid },
    /// The job moved the attachment to `processing`.
    Started { attachment_id: AttachmentId, cycle: Uuid },
    /// The summary was written.
    Completed { attachment_id: AttachmentId, cycle: Uuid },
    /// The failure message was written.
    Failed {
        attachment_id: AttachmentId,
        cycle: Uuid,
        error: String,
    },
    /// The attachment was cancelled by a caller.
    Cancelled { attachment_id: AttachmentId },
    /// A job's write was rejected because the attachment moved on
    /// (cancelled, regenerated, or deleted).
    Discarded {
        attachment_id: AttachmentId,
        cycle: Uuid,
        attempted: SummaryStatus,
    },
}

struct ActiveJob {
    cycle: Uuid,
    token: CancellationToken,
}

pub(crate) struct Shared {
    pub(crate) repo: Arc<dyn AttachmentRepository>,
    pub(crate) files: Arc<dyn FileStore>,
    pub(crate) model: ModelClient,
    pub(crate) config: SummaryConfig,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) events: broadcast::Sender<SummaryEvent>,
    active: Mutex<HashMap<AttachmentId, ActiveJob>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Shared {
    pub(crate) fn emit(&self, event: SummaryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Forget the job's token, unless a newer cycle has replaced it.
    pub(crate) async fn finish(&self, attachment_id: AttachmentId, cycle: Uuid) {
        let mut active = self.active.lock().await;
        if active.get(&attachment_id).is_some_and(|job| job.cycle == cycle) {
            active.remove(&attachment_id);
        }
    }
}

/// Runs attachment summarization as supervised background jobs.
///
/// Each `start`/`regenerate` mints a new job cycle. Every background write is
/// guarded by that cycle and the expected prior status, so only the newest
/// job can ever write, and only along legal lifecycle transitions.
#[derive(Clone)]
pub struct SummaryJobController {
    shared: Arc<Shared>,
}

impl SummaryJobController {
    pub fn new(
        repo: Arc<dyn AttachmentRepository>,
        files: Arc<dyn FileStore>,
        model: ModelClient,
        config: SummaryConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            shared: Arc::new(Shared {
                repo,
                files,
                model,
                config,
                permits,
                events,
                active: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Subscribe to job events.
    pub fn events(&self) -> broadcast::Receiver<SummaryEvent> {
        self.shared.events.subscribe()
    }

    /// Create a job for an attachment and return its cycle id.
    ///
    /// Fails fast with `FileUnavailable` (no job created, status untouched)
    /// when the file is not on disk. Otherwise the attachment is reset to
    /// `pending` with no summary and a background task is spawned.
    #[instrument(skip(self, file_path))]
    pub async fn start(
        &self,
        attachment_id: AttachmentId,
        file_path: &Path,
        file_kind: FileKind,
    ) -> Result<Uuid> {
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::Internal(
                "summary controller is shut down".to_string(),
            ));
        }
        if !self.shared.files.exists(file_path).await {
            return Err(Error::FileUnavailable(format!(
                "{} does not exist",
                file_path.display()
            )));
        }

        let cycle = Uuid::new_v4();
        let token = self.shared.shutdown.child_token();
        {
            // Held across begin_cycle so two concurrent starts cannot leave
            // the map pointing at the older cycle.
            let mut active = self.shared.active.lock().await;
            self.shared.repo.begin_cycle(attachment_id, cycle).await?;
            if let Some(previous) = active.insert(
                attachment_id,
                ActiveJob {
                    cycle,
                    token: token.clone(),
                },
            ) {
                debug!(
                    attachment_id,
                    previous_cycle = %previous.cycle,
                    "Superseding running summary job"
                );
                previous.token.cancel();
            }
        }

        self.shared.emit(SummaryEvent::Queued {
            attachment_id,
            cycle,
        });
        info!(attachment_id, %cycle, %file_kind, "Summary job queued");

        let job = SummaryJob {
            shared: self.shared.clone(),
            attachment_id,
            cycle,
            file_path: PathBuf::from(file_path),
            file_kind,
            token,
        };
        self.shared.tracker.spawn(job.run());
        Ok(cycle)
    }

    /// Cancel a pending or processing summary.
    ///
    /// The status becomes `cancelled` immediately. An in-flight model call is
    /// not interrupted; its write-back is rejected by the status guard.
    #[instrument(skip(self))]
    pub async fn cancel(&self, attachment_id: AttachmentId) -> Result<StatusSnapshot> {
        let record = self
            .shared
            .repo
            .fetch(attachment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("attachment {attachment_id}")))?;
        if !record.status.is_cancellable() {
            return Err(Error::InvalidTransition {
                from: record.status,
                to: SummaryStatus::Cancelled,
            });
        }

        let written = self
            .shared
            .repo
            .set_status_if(
                attachment_id,
                &StatusGuard::any_cycle(&[SummaryStatus::Pending, SummaryStatus::Processing]),
                SummaryStatus::Cancelled,
                Some(defaults::SUMMARY_CANCELLED_MESSAGE.to_string()),
            )
            .await?;

        if !written {
            // The job finished between the read and the write.
            let current = self.poll_status(attachment_id).await?;
            return Err(Error::InvalidTransition {
                from: current.status,
                to: SummaryStatus::Cancelled,
            });
        }

        if let Some(job) = self.shared.active.lock().await.remove(&attachment_id) {
            job.token.cancel();
        }
        self.shared.emit(SummaryEvent::Cancelled { attachment_id });
        info!(attachment_id, "Summary cancelled");

        self.poll_status(attachment_id).await
    }

    /// Reset an attachment to `pending` and summarize it again.
    ///
    /// Allowed from any status. A job still running for an earlier cycle
    /// keeps running but can no longer write.
    #[instrument(skip(self))]
    pub async fn regenerate(&self, attachment_id: AttachmentId) -> Result<Uuid> {
        let record = self
            .shared
            .repo
            .fetch(attachment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("attachment {attachment_id}")))?;
        info!(attachment_id, previous = %record.status, "Regenerating summary");
        self.start(attachment_id, &record.file_path, record.file_kind)
            .await
    }

    /// Current status and summary of an attachment.
    pub async fn poll_status(&self, attachment_id: AttachmentId) -> Result<StatusSnapshot> {
        self.shared
            .repo
            .fetch(attachment_id)
            .await?
            .map(|record| record.snapshot())
            .ok_or_else(|| Error::NotFound(format!("attachment {attachment_id}")))
    }

    /// Number of jobs that have not finished yet.
    pub fn running_jobs(&self) -> usize {
        self.shared.tracker.len()
    }

    /// Wait until every spawned job has finished.
    pub async fn wait_idle(&self) {
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.tracker.reopen();
    }

    /// Cancel every outstanding job token and wait for the tasks to exit.
    ///
    /// Jobs still queued for a slot exit without writing. Jobs already
    /// talking to the model finish their call and write as usual.
    pub async fn shutdown(&self) {
        info!(running = self.running_jobs(), "Shutting down summary jobs");
        self.shared.shutdown.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.active.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_config_default() {
        let config = SummaryConfig::default();
        assert_eq!(config.max_concurrent, defaults::SUMMARY_MAX_CONCURRENT);
        assert_eq!(config.error_max_chars, 100);
        assert_eq!(config.event_capacity, defaults::EVENT_BUS_CAPACITY);
    }

    #[test]
    fn test_summary_config_builders() {
        let config = SummaryConfig::default()
            .with_max_concurrent(0)
            .with_error_max_chars(20);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.error_max_chars, 20);
    }

    #[test]
    fn test_summary_config_from_env_defaults() {
        std::env::remove_var(defaults::ENV_SUMMARY_MAX_CONCURRENT);
        std::env::remove_var(defaults::ENV_SUMMARY_ERROR_MAX_CHARS);
        let config = SummaryConfig::from_env();
        assert_eq!(config.max_concurrent, defaults::SUMMARY_MAX_CONCURRENT);
        assert_eq!(config.error_max_chars, defaults::SUMMARY_ERROR_MAX_CHARS);
    }

    #[test]
    fn test_event_equality() {
        let cycle = Uuid::new_v4();
        assert_eq!(
            SummaryEvent::Started {
                attachment_id: 1,
                cycle
            },
            SummaryEvent::Started {
                attachment_id: 1,
                cycle
            }
        );
        assert_ne!(
            SummaryEvent::Cancelled { attachment_id: 1 },
            SummaryEvent::Cancelled { attachment_id: 2 }
        );
    }
}
