//! The `summarize` and `chat` commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use marginalia_chat::{ChatConfig, ChatOutcome, ChatPipeline, ChatRequest};
use marginalia_core::{
    AttachmentRecord, ConfirmationMode, EditChange, FileKind, GenerationResult, LocalFileStore,
    MemoryStore, StatusSnapshot, SummaryStatus,
};
use marginalia_inference::{
    BraveSearchConfig, BraveSearchProvider, CooldownGate, GeminiBackend, ModelClient,
};
use marginalia_jobs::{SummaryConfig, SummaryEvent, SummaryJobController};

pub struct ChatArgs {
    pub note: PathBuf,
    pub message: String,
    pub attachments: Vec<PathBuf>,
    pub selected: Option<String>,
    pub mode: ConfirmationMode,
    pub web_search: bool,
    pub output: Option<PathBuf>,
    pub json: bool,
}

/// Gemini backend behind the shared cooldown, with Brave search when a key is set.
fn build_model() -> anyhow::Result<ModelClient> {
    let backend = GeminiBackend::from_env().context("failed to configure the Gemini backend")?;
    let gate = CooldownGate::from_env();
    info!(
        model = backend.config().model.as_str(),
        cooldown_ms = gate.min_delay().as_millis() as u64,
        "Model client configured"
    );

    let mut client = ModelClient::new(Arc::new(backend), Arc::new(gate));
    if let Some(config) = BraveSearchConfig::from_env() {
        let provider =
            BraveSearchProvider::new(config).context("failed to configure web search")?;
        client = client.with_search(Arc::new(provider));
        info!("Web search enabled");
    }
    Ok(client)
}

/// In-memory note with its attachments and a summary controller over them.
struct Session {
    store: MemoryStore,
    files: Arc<LocalFileStore>,
    controller: SummaryJobController,
    note_id: Uuid,
}

impl Session {
    fn new(model: ModelClient) -> Self {
        let store = MemoryStore::new();
        let files = Arc::new(LocalFileStore::new());
        let controller = SummaryJobController::new(
            Arc::new(store.clone()),
            files.clone(),
            model,
            SummaryConfig::from_env(),
        );
        Self {
            store,
            files,
            controller,
            note_id: Uuid::new_v4(),
        }
    }

    async fn attach_all(&self, paths: &[PathBuf]) -> anyhow::Result<Vec<AttachmentRecord>> {
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let (filename, kind) = classify(path)?;
            records.push(
                self.store
                    .add_attachment(self.note_id, filename, path.clone(), kind)
                    .await,
            );
        }
        Ok(records)
    }

    /// Start a summary for every record and wait for all of them.
    ///
    /// Ctrl-C cancels whatever is still pending or processing.
    async fn summarize_all(
        &self,
        records: &[AttachmentRecord],
    ) -> anyhow::Result<Vec<StatusSnapshot>> {
        let mut events = self.controller.events();
        let reporter = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Summary event reporter fell behind")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        for record in records {
            if let Err(e) = self
                .controller
                .start(record.id, &record.file_path, record.file_kind)
                .await
            {
                warn!(attachment_id = record.id, filename = %record.filename, error = %e, "Summary not started");
            }
        }

        tokio::select! {
            _ = self.controller.wait_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling summaries");
                for record in records {
                    if let Err(e) = self.controller.cancel(record.id).await {
                        info!(attachment_id = record.id, error = %e, "Nothing to cancel");
                    }
                }
                self.controller.shutdown().await;
            }
        }
        reporter.abort();

        let mut snapshots = Vec::with_capacity(records.len());
        for record in records {
            snapshots.push(self.controller.poll_status(record.id).await?);
        }
        Ok(snapshots)
    }
}

fn classify(path: &Path) -> anyhow::Result<(String, FileKind)> {
    let kind = FileKind::from_path(path).with_context(|| {
        format!(
            "unsupported attachment type: {} (expected a PDF or an image)",
            path.display()
        )
    })?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))?;
    Ok((filename, kind))
}

fn log_event(event: &SummaryEvent) {
    match event {
        SummaryEvent::Failed {
            attachment_id,
            error,
            ..
        } => warn!(attachment_id, error = %error, "Summary failed"),
        other => info!(event = ?other, "Summary job event"),
    }
}

pub async fn summarize(paths: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let session = Session::new(build_model()?);
    let records = session.attach_all(paths).await?;
    let snapshots = session.summarize_all(&records).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else {
        print!("{}", render_statuses(&snapshots));
    }

    let failed = snapshots
        .iter()
        .filter(|s| s.status != SummaryStatus::Complete)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} summaries did not complete", snapshots.len());
    }
    Ok(())
}

fn render_statuses(snapshots: &[StatusSnapshot]) -> String {
    let mut out = String::new();
    for snapshot in snapshots {
        out.push_str(&format!(
            "[{}] {} ({})\n",
            snapshot.status, snapshot.filename, snapshot.file_kind
        ));
        if let Some(summary) = snapshot.summary.as_deref() {
            for line in summary.lines() {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

#[derive(Serialize)]
struct ChatReport<'a> {
    #[serde(flatten)]
    outcome: &'a ChatOutcome,
    final_html: &'a str,
    skipped_changes: &'a [usize],
}

pub async fn chat(args: ChatArgs) -> anyhow::Result<()> {
    let note_html = tokio::fs::read_to_string(&args.note)
        .await
        .with_context(|| format!("failed to read note {}", args.note.display()))?;

    let model = build_model()?;
    let session = Session::new(model.clone());
    let records = session.attach_all(&args.attachments).await?;
    if !records.is_empty() {
        session.summarize_all(&records).await?;
    }

    let pipeline = ChatPipeline::new(
        model,
        Arc::new(session.store.clone()),
        Arc::new(session.store.clone()),
        session.files.clone(),
        ChatConfig::from_env(),
    );
    let mut request = ChatRequest::new(session.note_id, args.message, note_html.as_str())
        .with_confirmation_mode(args.mode)
        .with_web_search(args.web_search);
    if let Some(selected) = args.selected {
        request = request.with_selected_text(selected);
    }

    let outcome = pipeline.chat(&request).await?;
    let (final_html, skipped) = resolve_html(&note_html, &outcome.result);
    if !skipped.is_empty() {
        warn!(skipped = ?skipped, "Some edits no longer match the note");
    }

    if let Some(output) = &args.output {
        tokio::fs::write(output, &final_html)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;
        info!(path = %output.display(), "Updated note written");
    }

    if args.json {
        let report = ChatReport {
            outcome: &outcome,
            final_html: &final_html,
            skipped_changes: &skipped,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", outcome.result.response_text);
        if !outcome.result.analyzed_files.is_empty() {
            println!(
                "\nFiles analyzed: {}",
                outcome.result.analyzed_files.join(", ")
            );
        }
        if outcome.result.requires_confirmation && final_html != note_html {
            println!("\nThe edit should be reviewed before it is applied.");
        }
    }
    Ok(())
}

/// Note HTML after the reply: fine-grained edits win over the full rewrite.
fn resolve_html(original: &str, result: &GenerationResult) -> (String, Vec<usize>) {
    match result.changes.as_deref() {
        Some(changes) if !changes.is_empty() => {
            let outcome = EditChange::apply_all(original, changes);
            (outcome.html, outcome.skipped)
        }
        _ => (result.updated_html.clone(), Vec::new()),
    }
}
