//! Domain models for attachment summaries and AI chat.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

/// Attachment identifier, owned by the storage layer.
pub type AttachmentId = i64;

// =============================================================================
// SUMMARY STATUS
// =============================================================================

/// Lifecycle of an attachment summary.
///
/// Valid job transitions are `pending -> processing -> complete | failed`.
/// `pending` and `processing` can additionally be forced to `cancelled`.
/// A regenerate resets any status back to `pending` under a new job cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Failed,
    Cancelled,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No job will write to an attachment in a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Whether a user may cancel from this status.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: SummaryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Complete)
                | (Self::Processing, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::InvalidInput(format!("unknown summary status: {other}"))),
        }
    }
}

// =============================================================================
// FILE KIND
// =============================================================================

/// Kind of an uploaded attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    /// Classify a file by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" => Some(Self::Image),
            _ => None,
        }
    }

    /// MIME type sent to the model for a file of this kind.
    ///
    /// Images are typed by extension first, then by magic bytes, and fall
    /// back to JPEG.
    pub fn mime_type(&self, path: &Path, bytes: &[u8]) -> String {
        match self {
            Self::Pdf => "application/pdf".to_string(),
            Self::Image => image_mime_from_extension(path)
                .map(str::to_string)
                .or_else(|| {
                    infer::get(bytes)
                        .map(|t| t.mime_type())
                        .filter(|m| m.starts_with("image/"))
                        .map(str::to_string)
                })
                .unwrap_or_else(|| defaults::DEFAULT_IMAGE_MIME.to_string()),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => f.write_str("pdf"),
            Self::Image => f.write_str("image"),
        }
    }
}

fn image_mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// Stored attachment with its summary state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: AttachmentId,
    pub note_id: Uuid,
    pub filename: String,
    pub file_path: PathBuf,
    pub file_kind: FileKind,
    pub status: SummaryStatus,
    pub summary: Option<String>,
    /// Job cycle currently allowed to write; replaced by every start/regenerate.
    pub cycle: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl AttachmentRecord {
    /// A freshly uploaded attachment, pending and not yet owned by any job.
    pub fn new(
        id: AttachmentId,
        note_id: Uuid,
        filename: impl Into<String>,
        file_path: impl Into<PathBuf>,
        file_kind: FileKind,
    ) -> Self {
        Self {
            id,
            note_id,
            filename: filename.into(),
            file_path: file_path.into(),
            file_kind,
            status: SummaryStatus::Pending,
            summary: None,
            cycle: None,
            updated_at: Utc::now(),
        }
    }

    /// Apply a lifecycle transition, rejecting illegal steps.
    pub fn transition(&mut self, next: SummaryStatus, summary: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if summary.is_some() {
            self.summary = summary;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Start a new job cycle: back to pending with the summary cleared.
    pub fn reset(&mut self, cycle: Uuid) {
        self.status = SummaryStatus::Pending;
        self.summary = None;
        self.cycle = Some(cycle);
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            attachment_id: self.id,
            filename: self.filename.clone(),
            file_kind: self.file_kind,
            status: self.status,
            summary: self.summary.clone(),
        }
    }

    pub fn to_summary(&self) -> AttachmentSummary {
        AttachmentSummary {
            filename: self.filename.clone(),
            file_path: Some(self.file_path.clone()),
            file_kind: self.file_kind,
            status: self.status,
            summary: self.summary.clone(),
        }
    }
}

/// Condition a guarded write must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusGuard {
    /// When set, the attachment's current job cycle must match.
    pub cycle: Option<Uuid>,
    /// The current status must be one of these.
    pub expected: Vec<SummaryStatus>,
}

impl StatusGuard {
    /// Guard for a write issued by a specific job cycle.
    pub fn job(cycle: Uuid, expected: SummaryStatus) -> Self {
        Self {
            cycle: Some(cycle),
            expected: vec![expected],
        }
    }

    /// Guard for an external write that does not care which cycle is running.
    pub fn any_cycle(expected: &[SummaryStatus]) -> Self {
        Self {
            cycle: None,
            expected: expected.to_vec(),
        }
    }

    pub fn matches(&self, record: &AttachmentRecord) -> bool {
        let cycle_ok = match self.cycle {
            Some(cycle) => record.cycle == Some(cycle),
            None => true,
        };
        cycle_ok && self.expected.contains(&record.status)
    }
}

/// Status snapshot returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub attachment_id: AttachmentId,
    pub filename: String,
    pub file_kind: FileKind,
    #[serde(rename = "summaryStatus")]
    pub status: SummaryStatus,
    pub summary: Option<String>,
}

/// Attachment as seen by the chat decision phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentSummary {
    pub filename: String,
    /// `None` when the file is no longer on disk.
    pub file_path: Option<PathBuf>,
    pub file_kind: FileKind,
    pub status: SummaryStatus,
    pub summary: Option<String>,
}

/// A file whose full bytes are sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub filename: String,
    pub file_path: PathBuf,
    pub file_kind: FileKind,
}

// =============================================================================
// CHAT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// One message of a note's chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// How the model should set `requires_confirmation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationMode {
    /// Apply edits without asking.
    Always,
    /// Always ask before applying.
    Never,
    /// Ask for major changes only.
    #[default]
    Think,
}

impl ConfirmationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Never => "never",
            Self::Think => "think",
        }
    }
}

impl FromStr for ConfirmationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "think" => Ok(Self::Think),
            other => Err(Error::InvalidInput(format!(
                "unknown confirmation mode: {other}"
            ))),
        }
    }
}

/// Outcome of the need-files decision phase.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecisionResult {
    #[serde(default, alias = "needFiles")]
    pub need_files: bool,
    /// 1-based indices into the attachment list given to the decision.
    #[serde(default, alias = "fileNumbers")]
    pub file_numbers: Vec<usize>,
    #[serde(default)]
    pub reason: String,
}

impl DecisionResult {
    pub fn no_files(reason: impl Into<String>) -> Self {
        Self {
            need_files: false,
            file_numbers: Vec::new(),
            reason: reason.into(),
        }
    }

    /// Drop out-of-range and duplicate file numbers, keeping order.
    ///
    /// A decision that ends up with no files does not need files.
    pub fn normalized(mut self, attachment_count: usize) -> Self {
        let mut seen = Vec::with_capacity(self.file_numbers.len());
        for n in self.file_numbers {
            if (1..=attachment_count).contains(&n) && !seen.contains(&n) {
                seen.push(n);
            }
        }
        self.file_numbers = seen;
        if self.file_numbers.is_empty() {
            self.need_files = false;
        } else if !self.need_files {
            self.file_numbers.clear();
        }
        self
    }
}

/// A single find/replace edit on the note HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditChange {
    pub find: String,
    pub replace: String,
}

/// Result of applying a list of edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutcome {
    pub html: String,
    pub applied: usize,
    /// Indices of edits whose `find` text was not present.
    pub skipped: Vec<usize>,
}

impl EditChange {
    /// Apply edits in order, replacing the first occurrence of each `find`.
    ///
    /// Edits whose anchor text is gone (e.g. the user changed it meanwhile)
    /// are skipped rather than clobbering the document.
    pub fn apply_all(html: &str, changes: &[EditChange]) -> ChangeOutcome {
        let mut out = html.to_string();
        let mut applied = 0;
        let mut skipped = Vec::new();
        for (i, change) in changes.iter().enumerate() {
            if change.find.is_empty() {
                skipped.push(i);
                continue;
            }
            match out.find(&change.find) {
                Some(pos) => {
                    out.replace_range(pos..pos + change.find.len(), &change.replace);
                    applied += 1;
                }
                None => skipped.push(i),
            }
        }
        ChangeOutcome {
            html: out,
            applied,
            skipped,
        }
    }
}

/// Final answer of the chat pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub response_text: String,
    pub updated_html: String,
    #[serde(default = "default_true", deserialize_with = "bool_or_string")]
    pub requires_confirmation: bool,
    /// Fine-grained edits, preferred over `updated_html` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<EditChange>>,
    /// Filenames whose full bytes were sent to the model.
    #[serde(default)]
    pub analyzed_files: Vec<String>,
}

impl GenerationResult {
    /// Error-flavoured answer that leaves the document untouched.
    pub fn fallback(error: &impl fmt::Display, original_html: &str) -> Self {
        Self {
            response_text: format!("Sorry, I encountered an error: {error}"),
            updated_html: original_html.to_string(),
            requires_confirmation: true,
            changes: None,
            analyzed_files: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Accept `true`, `"true"`, `"True"` and friends; the model is not always
/// consistent about JSON booleans.
fn bool_or_string<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean string: {other}"
            ))),
        },
    }
}

// =============================================================================
// MODEL INPUT
// =============================================================================

/// One part of a multimodal model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Blob { mime_type: String, data: Vec<u8> },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn blob(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::Blob {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob { .. })
    }
}
