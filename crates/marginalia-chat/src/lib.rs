//! # marginalia-chat
//!
//! Chat over a note, its attachments, and optionally the web.
//!
//! A message goes through two model calls:
//!
//! 1. **Decide**: given the attachment summaries, does the answer need the
//!    full content of any file? Returns [`DecisionResult`] with 1-based file
//!    numbers.
//! 2. **Respond**: the chosen files are loaded and sent with the note,
//!    selection, and recent history. The model returns a reply, the updated
//!    note HTML, and whether the user should confirm the edit.
//!
//! When web search is enabled an extra tool-use decision runs before
//! respond, and the search results are appended to the final prompt.
//!
//! [`DecisionResult`]: marginalia_core::DecisionResult

pub mod context;
pub mod pipeline;
pub mod prompts;

pub use context::{load_files, select_files, LoadedFiles};
pub use pipeline::{ChatConfig, ChatOutcome, ChatPipeline, ChatRequest};
