//! Fixed prompts for the single-shot capabilities of the model client.
//!
//! Chat prompts are assembled per request by `marginalia-chat`.

use marginalia_core::FileKind;

/// Summary instructions for a PDF attachment.
pub const PDF_SUMMARY_PROMPT: &str = "\
Provide a concise 50-100 word summary of this document.
Focus on describing WHAT this document contains (topics, subjects, key information).
Do NOT provide a detailed analysis. Just describe the content so someone can decide if it's relevant to their question.
Keep it brief and factual.";

/// Summary instructions for an image attachment.
pub const IMAGE_SUMMARY_PROMPT: &str = "\
Provide a concise 50-100 word summary of this image.
Focus on describing WHAT this image contains (objects, scenes, text, key visual elements).
Do NOT provide a detailed analysis. Just describe the content so someone can decide if it's relevant to their question.
Keep it brief and factual.";

/// Turns an image into a short web search query.
pub const IMAGE_SEARCH_QUERY_PROMPT: &str = "\
Describe this image in a concise search query (max 5-7 words) to find similar images on the web. \
Return ONLY the search query.";

/// Verbatim transcription of a voice memo.
pub const TRANSCRIPTION_PROMPT: &str = "\
Transcribe this audio recording verbatim.
Return ONLY the transcribed text, without timestamps, speaker labels, or commentary.
If nothing intelligible is said, return an empty string.";

pub fn summary_prompt(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Pdf => PDF_SUMMARY_PROMPT,
        FileKind::Image => IMAGE_SUMMARY_PROMPT,
    }
}
