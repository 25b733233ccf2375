//! Prompt assembly for the chat pipeline.

use std::fmt::Write;

use marginalia_core::{AttachmentSummary, ChatTurn, ConfirmationMode, SummaryStatus};

/// Default styling and content rules for note edits.
pub const BASE_CAPABILITIES: &str = "\
### CAPABILITY GUIDES ###

**1. HTML STYLING:**
When asked to beautify, format, or style, use these tags:
- Headings: `<h2>` and `<h3>`.
- Emphasis: `<b>` or `<strong>`.
- Lists: `<ul>` and `<li>`.
- Colors: `<span style='color: #hexcode'>`. Palette: #60a5fa (blue), #a78bfa (purple), #f472b6 (pink), #34d399 (green), #fbbf24 (yellow).
- Highlights: `<mark style=\"background-color: #ffc078; color: black;\">`.
- Boxed paragraphs: a `<div>` with `style=\"border: 1px solid #4b5563; padding: 10px; border-radius: 5px; background-color: #1f2937;\"`.

**2. CONTENT MANIPULATION:**
- You can re-order content by moving HTML elements.
- A table of contents is a plain unordered list of the `<h2>`/`<h3>` texts inserted at the top, without links.
- A pros and cons list uses two lists under `<h2>` headings \"Pros\" and \"Cons\", or a two-column table.

**3. CONTENT TRANSFORMATION:**
- Tone changes and translations rewrite the text while keeping the HTML structure and tags.

**4. MATH FORMATTING:**
- Put every formula on its own line using block LaTeX `$$...$$`.
- Use inline `$...$` only when a formula cannot be separated from its sentence.";

const NO_SELECTION: &str = "No text selected";

fn quoted_selection(selected_text: Option<&str>) -> &str {
    selected_text
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SELECTION)
}

/// Numbered attachment lines with the summary, or a status placeholder.
pub fn attachment_listing(attachments: &[AttachmentSummary]) -> String {
    let mut out = String::new();
    for (i, attachment) in attachments.iter().enumerate() {
        let summary = match (attachment.status, attachment.summary.as_deref()) {
            (SummaryStatus::Complete, Some(text)) if !text.trim().is_empty() => text.trim(),
            (SummaryStatus::Complete, _) => "[summary empty]",
            (SummaryStatus::Pending, _) => "[summary pending]",
            (SummaryStatus::Processing, _) => "[summary processing]",
            (SummaryStatus::Failed, _) => "[summary failed]",
            (SummaryStatus::Cancelled, _) => "[summary cancelled]",
        };
        let _ = writeln!(out, "{}. {} — {}", i + 1, attachment.filename, summary);
    }
    out
}

/// Oldest-first transcript, one `User:`/`Assistant:` line per turn.
pub fn render_history(history: &[ChatTurn]) -> String {
    if history.is_empty() {
        return "No previous messages.".to_string();
    }
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.sender.label(), turn.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decide_prompt(
    message: &str,
    note_html: &str,
    selected_text: Option<&str>,
    attachments: &[AttachmentSummary],
) -> String {
    format!(
        r#"You are helping a user with a note. Decide whether answering their request requires reading the FULL content of any attached files, or whether the short summaries below are enough.

ATTACHED FILES:
{listing}
Return a single, valid JSON object with ONLY this schema, and nothing else:
{{ "need_files": true or false, "file_numbers": [list of file numbers to read], "reason": "one short sentence" }}

Only request files that are clearly relevant. If the summaries or the note already answer the request, set "need_files" to false.

USER'S REQUEST:
"{message}"

CURRENT NOTE CONTENT:
```html
{note_html}
```

USER SELECTED TEXT:
"{selection}""#,
        listing = attachment_listing(attachments),
        selection = quoted_selection(selected_text),
    )
}

pub fn tool_prompt(
    message: &str,
    note_html: &str,
    selected_text: Option<&str>,
    file_names: &[String],
) -> String {
    format!(
        r#"You are a powerful writing assistant. Your first job is to decide whether you can respond to the user's request directly, or whether you need a tool.

You have one tool available:
- `web_search`: find current information, facts, or data you don't know.

If you need to search, return a single, valid JSON object with ONLY this schema:
{{ "action": "tool_use", "tool": "web_search", "query": "your search query here" }}
If you can respond directly from the note, the attached files and your own knowledge, return ONLY:
{{ "action": "generate_response" }}

USER'S REQUEST:
"{message}"

CURRENT NOTE CONTENT:
```html
{note_html}
```

USER SELECTED TEXT:
"{selection}"

ATTACHED FILES:
{files}"#,
        selection = quoted_selection(selected_text),
        files = file_listing(file_names),
    )
}

fn file_listing(file_names: &[String]) -> String {
    if file_names.is_empty() {
        "No files attached.".to_string()
    } else {
        format!(
            "The full content of these files is attached: {}",
            file_names.join(", ")
        )
    }
}

fn confirmation_rule(mode: ConfirmationMode) -> &'static str {
    match mode {
        ConfirmationMode::Always => "The user's preference is `always`: set `requires_confirmation` to false.",
        ConfirmationMode::Never => "The user's preference is `never`: set `requires_confirmation` to true.",
        ConfirmationMode::Think => {
            "The user's preference is `think`: set `requires_confirmation` to true for major changes \
             (summaries, translations, major reformatting, tables of contents, significant content \
             manipulation) and to false for minor changes (fixing typos, bolding a word, coloring a phrase)."
        }
    }
}

/// Inputs for the final generation prompt.
pub struct GenerateContext<'a> {
    pub message: &'a str,
    pub note_html: &'a str,
    pub selected_text: Option<&'a str>,
    pub history: &'a [ChatTurn],
    pub file_names: &'a [String],
    pub confirmation_mode: ConfirmationMode,
    pub searched: bool,
    pub capabilities: &'a str,
}

pub fn generate_prompt(ctx: &GenerateContext<'_>) -> String {
    let search_note = if ctx.searched {
        " (Mention that you searched for information.)"
    } else {
        ""
    };
    format!(
        r#"You are an expert writing assistant integrated into a notes application.
Your task is to analyze the user's request and the current note content, and then perform the requested action.
{capabilities}

You MUST return a single, valid JSON object with the following exact schema:
{{
  "response_text": "A short, conversational reply to the user confirming the action you took.{search_note}",
  "updated_html": "The full, new HTML content of the note after your modifications.",
  "requires_confirmation": true or false,
  "changes": [{{ "find": "exact existing HTML snippet", "replace": "its replacement" }}]
}}
`changes` is optional: include it when your edit is a few localized replacements, listing them in document order.

CHAT HISTORY (oldest first):
{history}

USER'S REQUEST:
"{message}"

CURRENT NOTE CONTENT (in HTML):
```html
{note_html}
```

USER SELECTED TEXT (the user might be referring to this):
"{selection}"

ATTACHED FILES:
{files}

INSTRUCTIONS:
1. Understand the user's goal by matching it to the capability guides. Incorporate search results if provided.
2. Apply the changes to the HTML content.
3. {confirmation}
4. Write a brief reply.
5. Return ONLY the valid JSON object."#,
        capabilities = ctx.capabilities,
        history = render_history(ctx.history),
        message = ctx.message,
        note_html = ctx.note_html,
        selection = quoted_selection(ctx.selected_text),
        files = file_listing(ctx.file_names),
        confirmation = confirmation_rule(ctx.confirmation_mode),
    )
}
