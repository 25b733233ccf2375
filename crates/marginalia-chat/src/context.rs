//! File selection, file loading and the search results block.

use marginalia_core::{AttachmentSummary, ContentPart, FileRef, FileStore};
use marginalia_inference::SearchHit;
use tracing::{debug, warn};

/// Resolve 1-based file numbers against the attachment list.
///
/// Out-of-range numbers, duplicates, and attachments whose file is gone are
/// skipped.
pub fn select_files(attachments: &[AttachmentSummary], file_numbers: &[usize]) -> Vec<FileRef> {
    let mut selected: Vec<FileRef> = Vec::new();
    let mut seen = Vec::new();
    for &number in file_numbers {
        if seen.contains(&number) {
            continue;
        }
        seen.push(number);

        let Some(attachment) = number
            .checked_sub(1)
            .and_then(|index| attachments.get(index))
        else {
            warn!(file_number = number, attachments = attachments.len(), "Skipping out-of-range file number");
            continue;
        };
        let Some(path) = attachment.file_path.clone() else {
            warn!(file_number = number, filename = %attachment.filename, "Skipping attachment without a file on disk");
            continue;
        };
        selected.push(FileRef {
            filename: attachment.filename.clone(),
            file_path: path,
            file_kind: attachment.file_kind,
        });
    }
    selected
}

/// File contents ready to send, with the names of the files that made it.
#[derive(Debug, Default)]
pub struct LoadedFiles {
    pub parts: Vec<ContentPart>,
    pub analyzed: Vec<String>,
}

/// Read each file and turn it into a blob part.
///
/// Missing and empty files are skipped; the request goes on without them.
pub async fn load_files(files: &dyn FileStore, refs: &[FileRef]) -> LoadedFiles {
    let mut loaded = LoadedFiles::default();
    for file in refs {
        match files.read_bytes(&file.file_path).await {
            Ok(bytes) => {
                let mime_type = file.file_kind.mime_type(&file.file_path, &bytes);
                debug!(filename = %file.filename, %mime_type, size = bytes.len(), "Attaching file");
                loaded.parts.push(ContentPart::blob(mime_type, bytes));
                loaded.analyzed.push(file.filename.clone());
            }
            Err(e) => {
                warn!(filename = %file.filename, error = %e, "Skipping unreadable file");
            }
        }
    }
    loaded
}

const SEARCH_FOOTER: &str = "----------------------";

/// Labeled block of search results for the final prompt.
pub fn search_results_block(hits: &[SearchHit]) -> String {
    let body = if hits.is_empty() {
        "No results found.".to_string()
    } else {
        hits.iter()
            .map(|hit| format!("- {}: {}", hit.title, hit.url))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("--- SEARCH RESULTS ---\n{body}\n{SEARCH_FOOTER}")
}

/// Block shown when the search itself failed.
pub fn search_error_block(error: &impl std::fmt::Display) -> String {
    format!("--- SEARCH RESULTS ---\nAn error occurred during search: {error}\n{SEARCH_FOOTER}")
}

/// Block shown when the model asked for a search without a query.
pub const SEARCH_QUERY_MISSING_BLOCK: &str = "--- SEARCH FAILED: Query missing ---";
