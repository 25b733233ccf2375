//! Integration tests for the summary job controller.
//!
//! Uses the in-memory store, real files in a temp directory, and the mock
//! generation backend. A hold gate on the mock keeps a model call in flight
//! so cancellation and regeneration races can be driven deterministically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use marginalia_core::{
    defaults, AttachmentRecord, Error, FileKind, FileStore, LocalFileStore, MemoryStore, Result,
    SummaryStatus,
};
use marginalia_inference::{
    CooldownGate, GenerateRequest, GenerationBackend, MockGenerationBackend, ModelClient,
};
use marginalia_jobs::{SummaryConfig, SummaryEvent, SummaryJobController};

struct Harness {
    store: MemoryStore,
    mock: MockGenerationBackend,
    controller: SummaryJobController,
    dir: tempfile::TempDir,
    note: Uuid,
}

impl Harness {
    fn new(mock: MockGenerationBackend, config: SummaryConfig) -> Self {
        let store = MemoryStore::new();
        let model = ModelClient::new(Arc::new(mock.clone()), Arc::new(CooldownGate::disabled()));
        let controller = SummaryJobController::new(
            Arc::new(store.clone()),
            Arc::new(LocalFileStore::new()),
            model,
            config,
        );
        Self {
            store,
            mock,
            controller,
            dir: tempfile::tempdir().unwrap(),
            note: Uuid::new_v4(),
        }
    }

    async fn attachment(&self, name: &str, kind: FileKind) -> AttachmentRecord {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"%PDF-1.4 fake content").unwrap();
        self.store.add_attachment(self.note, name, path, kind).await
    }

    async fn start(&self, record: &AttachmentRecord) -> Uuid {
        self.controller
            .start(record.id, &record.file_path, record.file_kind)
            .await
            .unwrap()
    }
}

async fn wait_for_calls(mock: &MockGenerationBackend, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while mock.call_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("model calls did not start in time");
}

async fn recv_until(
    rx: &mut broadcast::Receiver<SummaryEvent>,
    pred: impl Fn(&SummaryEvent) -> bool,
) -> SummaryEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event not received")
}

fn is_legal_step(from: SummaryStatus, to: SummaryStatus) -> bool {
    // Resets to pending come from start/regenerate.
    to == SummaryStatus::Pending || from.can_transition_to(to)
}

#[tokio::test]
async fn test_start_completes_summary() {
    let mock = MockGenerationBackend::new().with_default_response(" A one-page invoice. ");
    let h = Harness::new(mock, SummaryConfig::default());
    let record = h.attachment("invoice.pdf", FileKind::Pdf).await;
    let mut events = h.controller.events();

    let cycle = h.start(&record).await;
    h.controller.wait_idle().await;

    let status = h.controller.poll_status(record.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Complete);
    assert_eq!(status.summary.as_deref(), Some("A one-page invoice."));
    assert_eq!(status.filename, "invoice.pdf");

    assert_eq!(
        h.store.status_log(record.id).await,
        vec![
            SummaryStatus::Pending,
            SummaryStatus::Pending,
            SummaryStatus::Processing,
            SummaryStatus::Complete,
        ]
    );

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            SummaryEvent::Queued {
                attachment_id: record.id,
                cycle
            },
            SummaryEvent::Started {
                attachment_id: record.id,
                cycle
            },
            SummaryEvent::Completed {
                attachment_id: record.id,
                cycle
            },
        ]
    );

    let calls = h.mock.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].parts[0].is_blob());
}

#[tokio::test]
async fn test_image_summary_uses_image_prompt() {
    let h = Harness::new(MockGenerationBackend::new(), SummaryConfig::default());
    let record = h.attachment("photo.png", FileKind::Image).await;

    h.start(&record).await;
    h.controller.wait_idle().await;

    let calls = h.mock.calls();
    assert!(calls[0].text().contains("this image"));
    match &calls[0].parts[0] {
        marginalia_core::ContentPart::Blob { mime_type, .. } => assert_eq!(mime_type, "image/png"),
        other => panic!("expected blob part, got {other:?}"),
    }
}

#[tokio::test]
async fn test_start_missing_file_fails_fast() {
    let h = Harness::new(MockGenerationBackend::new(), SummaryConfig::default());
    let record = h
        .store
        .add_attachment(h.note, "gone.pdf", h.dir.path().join("gone.pdf"), FileKind::Pdf)
        .await;

    let err = h
        .controller
        .start(record.id, &record.file_path, record.file_kind)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileUnavailable(_)));
    assert_eq!(h.controller.running_jobs(), 0);
    assert_eq!(h.store.status_log(record.id).await, vec![SummaryStatus::Pending]);
    assert_eq!(h.mock.call_count(), 0);
}

#[tokio::test]
async fn test_model_failure_stores_truncated_message() {
    let mock = MockGenerationBackend::new();
    mock.push_failure("q".repeat(300));
    let h = Harness::new(mock, SummaryConfig::default());
    let record = h.attachment("report.pdf", FileKind::Pdf).await;
    let mut events = h.controller.events();

    h.start(&record).await;
    h.controller.wait_idle().await;

    let status = h.controller.poll_status(record.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Failed);
    let summary = status.summary.unwrap();
    assert!(summary.starts_with(defaults::SUMMARY_FAILED_PREFIX));
    assert_eq!(
        summary.chars().count(),
        defaults::SUMMARY_FAILED_PREFIX.chars().count() + defaults::SUMMARY_ERROR_MAX_CHARS
    );

    let failed = recv_until(&mut events, |e| matches!(e, SummaryEvent::Failed { .. })).await;
    assert!(matches!(failed, SummaryEvent::Failed { error, .. } if error.contains("qqq")));
}

#[tokio::test]
async fn test_empty_model_reply_fails() {
    let mock = MockGenerationBackend::new().with_default_response("   ");
    let h = Harness::new(mock, SummaryConfig::default());
    let record = h.attachment("blank.pdf", FileKind::Pdf).await;

    h.start(&record).await;
    h.controller.wait_idle().await;

    let status = h.controller.poll_status(record.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Failed);
    assert!(status.summary.unwrap().contains("Empty result"));
}

#[tokio::test]
async fn test_file_removed_after_start_fails_job() {
    let gate = Arc::new(Semaphore::new(0));
    let mock = MockGenerationBackend::new().with_hold(gate.clone());
    let h = Harness::new(mock, SummaryConfig::default().with_max_concurrent(1));
    let first = h.attachment("first.pdf", FileKind::Pdf).await;
    let second = h.attachment("second.pdf", FileKind::Pdf).await;

    h.start(&first).await;
    wait_for_calls(&h.mock, 1).await;
    h.start(&second).await;
    std::fs::remove_file(&second.file_path).unwrap();

    gate.add_permits(1);
    h.controller.wait_idle().await;

    let status = h.controller.poll_status(second.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Failed);
    assert!(status.summary.unwrap().contains("File unavailable"));
    assert_eq!(h.mock.call_count(), 1);
}

#[tokio::test]
async fn test_cancel_while_processing_discards_result() {
    let gate = Arc::new(Semaphore::new(0));
    let mock = MockGenerationBackend::new()
        .with_hold(gate.clone())
        .with_default_response("late summary");
    let h = Harness::new(mock, SummaryConfig::default());
    let record = h.attachment("slow.pdf", FileKind::Pdf).await;
    let mut events = h.controller.events();

    let cycle = h.start(&record).await;
    wait_for_calls(&h.mock, 1).await;
    assert_eq!(
        h.controller.poll_status(record.id).await.unwrap().status,
        SummaryStatus::Processing
    );

    let cancelled = h.controller.cancel(record.id).await.unwrap();
    assert_eq!(cancelled.status, SummaryStatus::Cancelled);
    assert_eq!(
        cancelled.summary.as_deref(),
        Some(defaults::SUMMARY_CANCELLED_MESSAGE)
    );

    gate.add_permits(1);
    h.controller.wait_idle().await;

    let status = h.controller.poll_status(record.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Cancelled);
    assert_eq!(status.summary.as_deref(), Some(defaults::SUMMARY_CANCELLED_MESSAGE));

    let discarded = recv_until(&mut events, |e| matches!(e, SummaryEvent::Discarded { .. })).await;
    assert_eq!(
        discarded,
        SummaryEvent::Discarded {
            attachment_id: record.id,
            cycle,
            attempted: SummaryStatus::Complete,
        }
    );
}

#[tokio::test]
async fn test_cancel_while_queued_never_calls_model() {
    let gate = Arc::new(Semaphore::new(0));
    let mock = MockGenerationBackend::new().with_hold(gate.clone());
    let h = Harness::new(mock, SummaryConfig::default().with_max_concurrent(1));
    let busy = h.attachment("busy.pdf", FileKind::Pdf).await;
    let queued = h.attachment("queued.pdf", FileKind::Pdf).await;

    h.start(&busy).await;
    wait_for_calls(&h.mock, 1).await;
    h.start(&queued).await;

    let snapshot = h.controller.cancel(queued.id).await.unwrap();
    assert_eq!(snapshot.status, SummaryStatus::Cancelled);

    gate.add_permits(1);
    h.controller.wait_idle().await;

    assert_eq!(h.mock.call_count(), 1);
    assert_eq!(
        h.store.status_log(queued.id).await,
        vec![
            SummaryStatus::Pending,
            SummaryStatus::Pending,
            SummaryStatus::Cancelled,
        ]
    );
}

#[tokio::test]
async fn test_cancel_terminal_is_rejected() {
    let h = Harness::new(MockGenerationBackend::new(), SummaryConfig::default());
    let record = h.attachment("done.pdf", FileKind::Pdf).await;
    h.start(&record).await;
    h.controller.wait_idle().await;

    let err = h.controller.cancel(record.id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: SummaryStatus::Complete,
            to: SummaryStatus::Cancelled
        }
    ));
    assert_eq!(
        h.controller.poll_status(record.id).await.unwrap().status,
        SummaryStatus::Complete
    );
}

#[tokio::test]
async fn test_cancel_unknown_attachment() {
    let h = Harness::new(MockGenerationBackend::new(), SummaryConfig::default());
    assert!(matches!(
        h.controller.cancel(999).await.unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(matches!(
        h.controller.poll_status(999).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn test_regenerate_while_processing_only_latest_writes() {
    let gate = Arc::new(Semaphore::new(0));
    let mock = MockGenerationBackend::new().with_hold(gate.clone());
    mock.push_response("stale summary");
    mock.push_response("fresh summary");
    let h = Harness::new(mock, SummaryConfig::default());
    let record = h.attachment("notes.pdf", FileKind::Pdf).await;
    let mut events = h.controller.events();

    let old_cycle = h.start(&record).await;
    wait_for_calls(&h.mock, 1).await;

    let new_cycle = h.controller.regenerate(record.id).await.unwrap();
    assert_ne!(old_cycle, new_cycle);
    wait_for_calls(&h.mock, 2).await;

    // Release the stale call first; its completion must be discarded.
    gate.add_permits(1);
    let discarded = recv_until(&mut events, |e| matches!(e, SummaryEvent::Discarded { .. })).await;
    assert_eq!(
        discarded,
        SummaryEvent::Discarded {
            attachment_id: record.id,
            cycle: old_cycle,
            attempted: SummaryStatus::Complete,
        }
    );
    assert_eq!(
        h.controller.poll_status(record.id).await.unwrap().status,
        SummaryStatus::Processing
    );

    gate.add_permits(1);
    h.controller.wait_idle().await;

    let status = h.controller.poll_status(record.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Complete);
    assert_eq!(status.summary.as_deref(), Some("fresh summary"));
}

/// Backend whose n-th call blocks on its own gate, so calls can be released
/// in any order. The reply names the call that produced it.
struct GatedBackend {
    gates: Vec<Arc<Semaphore>>,
    calls: std::sync::Mutex<usize>,
}

impl GatedBackend {
    fn new(calls: usize) -> Self {
        Self {
            gates: (0..calls).map(|_| Arc::new(Semaphore::new(0))).collect(),
            calls: std::sync::Mutex::new(0),
        }
    }

    fn release(&self, call: usize) {
        self.gates[call].add_permits(1);
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    async fn wait_for_calls(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.call_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("model calls did not start in time");
    }
}

#[async_trait]
impl GenerationBackend for GatedBackend {
    async fn generate_content(&self, _request: &GenerateRequest) -> Result<String> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls - 1
        };
        let gate = self
            .gates
            .get(call)
            .ok_or_else(|| Error::Service(format!("unexpected model call {call}")))?;
        let _permit = gate
            .acquire()
            .await
            .map_err(|_| Error::Service("gate closed".to_string()))?;
        Ok(format!("summary from call {call}"))
    }

    fn model_name(&self) -> &str {
        "gated"
    }
}

#[tokio::test]
async fn test_regenerate_twice_newest_result_wins_when_finishing_first() {
    let backend = Arc::new(GatedBackend::new(3));
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("draft.pdf");
    std::fs::write(&path, b"%PDF-1.4 fake content").unwrap();
    let record = store
        .add_attachment(Uuid::new_v4(), "draft.pdf", path, FileKind::Pdf)
        .await;
    let controller = SummaryJobController::new(
        Arc::new(store.clone()),
        Arc::new(LocalFileStore::new()),
        ModelClient::new(backend.clone(), Arc::new(CooldownGate::disabled())),
        SummaryConfig::default(),
    );
    let mut events = controller.events();

    let first = controller
        .start(record.id, &record.file_path, record.file_kind)
        .await
        .unwrap();
    backend.wait_for_calls(1).await;
    let second = controller.regenerate(record.id).await.unwrap();
    backend.wait_for_calls(2).await;
    let third = controller.regenerate(record.id).await.unwrap();
    backend.wait_for_calls(3).await;

    // Newest first: the latest cycle writes, the two older ones are rejected.
    backend.release(2);
    let completed =
        recv_until(&mut events, |e| matches!(e, SummaryEvent::Completed { .. })).await;
    assert_eq!(
        completed,
        SummaryEvent::Completed {
            attachment_id: record.id,
            cycle: third,
        }
    );
    backend.release(1);
    backend.release(0);
    controller.wait_idle().await;

    let status = controller.poll_status(record.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Complete);
    assert_eq!(status.summary.as_deref(), Some("summary from call 2"));

    let log = store.status_log(record.id).await;
    assert_eq!(log.last(), Some(&SummaryStatus::Complete));
    assert_eq!(
        log.iter().filter(|s| s.is_terminal()).count(),
        1,
        "more than one terminal write: {log:?}"
    );

    let mut discarded = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SummaryEvent::Discarded {
                cycle, attempted, ..
            } => {
                assert_eq!(attempted, SummaryStatus::Complete);
                discarded.push(cycle);
            }
            SummaryEvent::Completed { cycle, .. } => panic!("second completion for {cycle}"),
            _ => {}
        }
    }
    discarded.sort();
    let mut stale = vec![first, second];
    stale.sort();
    assert_eq!(discarded, stale);
}

#[tokio::test]
async fn test_regenerate_after_failure() {
    let mock = MockGenerationBackend::new().with_default_response("second try worked");
    mock.push_failure("quota exhausted");
    let h = Harness::new(mock, SummaryConfig::default());
    let record = h.attachment("retry.pdf", FileKind::Pdf).await;

    h.start(&record).await;
    h.controller.wait_idle().await;
    assert_eq!(
        h.controller.poll_status(record.id).await.unwrap().status,
        SummaryStatus::Failed
    );

    h.controller.regenerate(record.id).await.unwrap();
    h.controller.wait_idle().await;

    let status = h.controller.poll_status(record.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Complete);
    assert_eq!(status.summary.as_deref(), Some("second try worked"));
}

#[tokio::test]
async fn test_regenerate_missing_file_leaves_status() {
    let h = Harness::new(MockGenerationBackend::new(), SummaryConfig::default());
    let record = h.attachment("vanishing.pdf", FileKind::Pdf).await;
    h.start(&record).await;
    h.controller.wait_idle().await;

    std::fs::remove_file(&record.file_path).unwrap();
    let err = h.controller.regenerate(record.id).await.unwrap_err();
    assert!(matches!(err, Error::FileUnavailable(_)));

    let status = h.controller.poll_status(record.id).await.unwrap();
    assert_eq!(status.status, SummaryStatus::Complete);
    assert!(status.summary.is_some());
}

#[tokio::test]
async fn test_status_log_only_legal_transitions() {
    let gate = Arc::new(Semaphore::new(0));
    let mock = MockGenerationBackend::new().with_hold(gate.clone());
    mock.push_failure("boom");
    let h = Harness::new(mock, SummaryConfig::default().with_max_concurrent(2));

    let a = h.attachment("a.pdf", FileKind::Pdf).await;
    let b = h.attachment("b.png", FileKind::Image).await;
    let c = h.attachment("c.pdf", FileKind::Pdf).await;

    h.start(&a).await;
    h.start(&b).await;
    wait_for_calls(&h.mock, 2).await;
    h.start(&c).await;
    h.controller.cancel(b.id).await.unwrap();
    h.controller.regenerate(a.id).await.unwrap();

    gate.add_permits(16);
    h.controller.wait_idle().await;

    for record in [&a, &b, &c] {
        let log = h.store.status_log(record.id).await;
        for pair in log.windows(2) {
            assert!(
                is_legal_step(pair[0], pair[1]),
                "illegal step {} -> {} for {}",
                pair[0],
                pair[1],
                record.filename
            );
        }
    }
    assert_eq!(
        h.controller.poll_status(b.id).await.unwrap().status,
        SummaryStatus::Cancelled
    );
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let gate = Arc::new(Semaphore::new(0));
    let mock = MockGenerationBackend::new().with_hold(gate.clone());
    let h = Harness::new(mock, SummaryConfig::default().with_max_concurrent(2));

    let mut records = Vec::new();
    for i in 0..4 {
        records.push(h.attachment(&format!("f{i}.pdf"), FileKind::Pdf).await);
    }
    for record in &records {
        h.start(record).await;
    }

    wait_for_calls(&h.mock, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.mock.call_count(), 2);
    assert_eq!(h.controller.running_jobs(), 4);

    gate.add_permits(4);
    h.controller.wait_idle().await;
    assert_eq!(h.mock.call_count(), 4);
    for record in &records {
        assert_eq!(
            h.controller.poll_status(record.id).await.unwrap().status,
            SummaryStatus::Complete
        );
    }
}

#[tokio::test]
async fn test_shutdown_exits_queued_jobs_without_writing() {
    let gate = Arc::new(Semaphore::new(0));
    let mock = MockGenerationBackend::new().with_hold(gate.clone());
    let h = Harness::new(mock, SummaryConfig::default().with_max_concurrent(1));
    let running = h.attachment("running.pdf", FileKind::Pdf).await;
    let queued = h.attachment("queued.pdf", FileKind::Pdf).await;

    h.start(&running).await;
    wait_for_calls(&h.mock, 1).await;
    h.start(&queued).await;

    tokio::join!(h.controller.shutdown(), async {
        tokio::task::yield_now().await;
        gate.add_permits(1);
    });

    assert_eq!(h.mock.call_count(), 1);
    assert_eq!(
        h.controller.poll_status(running.id).await.unwrap().status,
        SummaryStatus::Complete
    );
    assert_eq!(
        h.controller.poll_status(queued.id).await.unwrap().status,
        SummaryStatus::Pending
    );

    let err = h
        .controller
        .start(queued.id, &queued.file_path, queued.file_kind)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

#[tokio::test]
async fn test_deleted_attachment_write_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let mock = MockGenerationBackend::new().with_hold(gate.clone());
    let h = Harness::new(mock, SummaryConfig::default());
    let record = h.attachment("deleted.pdf", FileKind::Pdf).await;
    let mut events = h.controller.events();

    h.start(&record).await;
    wait_for_calls(&h.mock, 1).await;
    h.store.remove_attachment(record.id).await;

    gate.add_permits(1);
    h.controller.wait_idle().await;

    let event = recv_until(&mut events, |e| matches!(e, SummaryEvent::Discarded { .. })).await;
    assert!(matches!(
        event,
        SummaryEvent::Discarded {
            attempted: SummaryStatus::Complete,
            ..
        }
    ));
}

// =============================================================================
// COOLDOWN ACROSS JOBS (virtual clock)
// =============================================================================

/// File store backed by a map, so the paused clock never races real I/O.
#[derive(Default)]
struct MemoryFiles {
    files: HashMap<PathBuf, Vec<u8>>,
}

#[async_trait]
impl FileStore for MemoryFiles {
    async fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        match self.files.get(path) {
            Some(bytes) if !bytes.is_empty() => Ok(bytes.clone()),
            _ => Err(Error::FileUnavailable(path.display().to_string())),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_jobs_respects_cooldown() {
    let store = MemoryStore::new();
    let mock = MockGenerationBackend::new().with_latency(Duration::from_millis(300));
    let mut files = MemoryFiles::default();
    let note = Uuid::new_v4();

    let mut records = Vec::new();
    for i in 0..4 {
        let path = PathBuf::from(format!("/uploads/{i}.pdf"));
        files.files.insert(path.clone(), b"%PDF".to_vec());
        records.push(
            store
                .add_attachment(note, format!("{i}.pdf"), path, FileKind::Pdf)
                .await,
        );
    }

    let model = ModelClient::new(
        Arc::new(mock.clone()),
        Arc::new(CooldownGate::new(Duration::from_millis(2_500))),
    );
    let controller = SummaryJobController::new(
        Arc::new(store.clone()),
        Arc::new(files),
        model,
        SummaryConfig::default().with_max_concurrent(4),
    );

    for record in &records {
        controller
            .start(record.id, &record.file_path, record.file_kind)
            .await
            .unwrap();
    }
    controller.wait_idle().await;

    let mut times = mock.call_times();
    assert_eq!(times.len(), 4);
    times.sort();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(2_500));
    }
    for record in &records {
        assert_eq!(
            controller.poll_status(record.id).await.unwrap().status,
            SummaryStatus::Complete
        );
    }
}
