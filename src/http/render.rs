//! HTML rendering of a session transcript.

use crate::transcript::{EntryKind, TranscriptEntry};

/// Escape text for safe embedding in HTML element content.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Render a session transcript as a standalone HTML page.
#[must_use]
pub fn transcript_page(token: &str, entries: &[TranscriptEntry]) -> String {
    let mut body = String::new();
    for entry in entries {
        let class = match entry.kind {
            EntryKind::Input => "input",
            EntryKind::Output => "output",
        };
        let stamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        body.push_str(&format!(
            "    <div class=\"entry {class}\">\n      <span class=\"ts\">{stamp}</span>\n      <pre>{}</pre>\n    </div>\n",
            escape_html(&entry.content)
        ));
    }
    if entries.is_empty() {
        body.push_str("    <p class=\"empty\">No transcript yet. POST a script to this URL.</p>\n");
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"utf-8\">\n  <title>repl {token}</title>\n  <style>\n    body {{ font-family: monospace; margin: 2em; }}\n    .entry {{ margin-bottom: 0.5em; }}\n    .entry.input pre {{ color: #005; }}\n    .entry.output pre {{ color: #050; }}\n    .ts {{ color: #888; font-size: 0.8em; }}\n    pre {{ margin: 0; white-space: pre-wrap; }}\n  </style>\n</head>\n<body>\n  <h1>session {token}</h1>\n  <div class=\"transcript\">\n{body}  </div>\n</body>\n</html>\n",
        token = escape_html(token),
    )
}
