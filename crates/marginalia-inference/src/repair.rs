//! Repair of model output that is supposed to be JSON.
//!
//! The model is asked for strict JSON but routinely wraps it in markdown
//! fences and writes LaTeX commands (`\frac`, `\alpha`) with single
//! backslashes, which are invalid JSON escapes. Repair runs in two stages:
//!
//! 1. [`repair`] fixes the text structurally so `serde_json` accepts it.
//! 2. [`format_latex_markup`] rewrites LaTeX delimiters in the parsed HTML
//!    into the editor's math elements.
//!
//! Both stages are idempotent.

use std::fmt::Write;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;

use marginalia_core::{Error, Result};

const PREVIEW_CHARS: usize = 120;

/// Remove leading ```` ``` ```` fences (with optional language tag) and
/// trailing ```` ``` ```` fences, however deeply they are stacked.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    loop {
        let before = text.len();
        if let Some(rest) = text.strip_prefix("```") {
            let tag_len = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            text = rest[tag_len..].trim();
        }
        if let Some(rest) = text.strip_suffix("```") {
            text = rest.trim();
        }
        if text.len() == before {
            return text;
        }
    }
}

/// Rewrite backslashes and raw control characters so the text parses as JSON.
///
/// Kept as-is: `\"`, `\\`, `\/`, `\n`, `\r` and `\uXXXX`. Every other
/// backslash is doubled, including a trailing one. Raw control characters
/// inside string literals become `\n`, `\r` or `\u00XX`.
pub fn repair_json_text(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => match chars.get(i + 1).copied() {
                Some(next @ ('"' | '\\' | '/' | 'n' | 'r')) => {
                    out.push('\\');
                    out.push(next);
                    i += 2;
                    continue;
                }
                Some('u') if is_unicode_escape(&chars, i) => {
                    out.extend(&chars[i..i + 6]);
                    i += 6;
                    continue;
                }
                _ => out.push_str("\\\\"),
            },
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            c if in_string && (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

fn is_unicode_escape(chars: &[char], backslash: usize) -> bool {
    chars
        .get(backslash + 2..backslash + 6)
        .is_some_and(|hex| hex.iter().all(|c| c.is_ascii_hexdigit()))
}

/// Full structural repair: fences, then escapes.
pub fn repair(raw: &str) -> String {
    repair_json_text(strip_code_fences(raw))
}

/// Repair and deserialize model output.
///
/// Failure is [`Error::MalformedResponse`] carrying a short preview of the
/// repaired text.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let repaired = repair(raw);
    serde_json::from_str(&repaired).map_err(|e| {
        let preview: String = repaired.chars().take(PREVIEW_CHARS).collect();
        Error::MalformedResponse(format!("{e} (response starts with: {preview})"))
    })
}

// =============================================================================
// LATEX REWRITING
// =============================================================================

/// Math delimiters in priority order. An element this module already emitted
/// matches first and is copied through, so its `data-latex` is never
/// rewritten again.
static MATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"<(?:div|span) data-type="(?:block|inline)-math" data-latex="[^"]*"></(?:div|span)>"#,
        r"|(?s:\$\$(.+?)\$\$)",
        r"|(?s:\\\[(.+?)\\\])",
        r"|(?s:\\\((.+?)\\\))",
        r"|\$([^$\n]+?)\$",
    ))
    .expect("valid math delimiter regex")
});

fn escape_attr(latex: &str) -> String {
    let mut out = String::with_capacity(latex.len());
    for c in latex.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn math_element(caps: &Captures) -> String {
    let (tag, kind, latex) = if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
        ("div", "block", m.as_str())
    } else if let Some(m) = caps.get(3).or_else(|| caps.get(4)) {
        ("span", "inline", m.as_str())
    } else {
        return caps[0].to_string();
    };
    format!(
        r#"<{tag} data-type="{kind}-math" data-latex="{}"></{tag}>"#,
        escape_attr(latex.trim())
    )
}

/// Convert `$$…$$` / `\[…\]` into block math and `$…$` / `\(…\)` into inline
/// math elements.
///
/// One left-to-right pass: delimiters nested inside a matched span stay part
/// of its LaTeX, and `$$` is never read as two empty inline spans.
pub fn format_latex_markup(html: &str) -> String {
    MATH.replace_all(html, math_element).into_owned()
}
