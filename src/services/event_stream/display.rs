use once_cell::sync::Lazy;
use regex::Regex;

use super::extractor::{normalize_escapes, strip_event_tags};

static TRAILING_BACKSLASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)\\+$").unwrap());
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Everything the agent said during one session, kept verbatim so the
/// readable answer can be re-rendered at any point of the stream.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    raw: String,
}

impl Transcript {
    pub fn push(&mut self, chunk: &str) {
        self.raw.push_str(chunk);
    }

    #[cfg(test)]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn render(&self) -> String {
        render_display_text(&self.raw)
    }
}

pub fn render_display_text(raw: &str) -> String {
    let normalized = normalize_escapes(raw);
    let without_events = strip_event_tags(&normalized);
    let without_backslashes = TRAILING_BACKSLASH_RE.replace_all(&without_events, "");
    BLANK_RUN_RE
        .replace_all(&without_backslashes, "\n\n")
        .trim()
        .to_string()
}
