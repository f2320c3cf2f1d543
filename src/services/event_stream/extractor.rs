use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

pub(super) const ESCAPED_NEWLINE: &str = "\\n";
const TAG_OPEN: &str = "<event";

static EVENT_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<event\s+type=\\?"([^"\\]+)\\?"[^>]*>(.*?)</event>"#).unwrap()
});

/// One complete `<event>` unit, body already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ExtractedEvent {
    pub event: RawEvent,
    /// Exclusive end of the match, as an offset into the escaped buffer.
    pub raw_end: usize,
}

/// Matching copy of the escaped buffer. Remembers where every escape was
/// collapsed so offsets found in `text` can be mapped back.
pub(super) struct NormalizedView<'a> {
    text: Cow<'a, str>,
    escapes: Vec<usize>,
}

impl<'a> NormalizedView<'a> {
    pub fn new(raw: &'a str) -> Self {
        if !raw.contains(ESCAPED_NEWLINE) {
            return Self {
                text: Cow::Borrowed(raw),
                escapes: Vec::new(),
            };
        }

        let mut text = String::with_capacity(raw.len());
        let mut escapes = Vec::new();
        let mut rest = raw;
        while let Some(idx) = rest.find(ESCAPED_NEWLINE) {
            text.push_str(&rest[..idx]);
            escapes.push(text.len());
            text.push('\n');
            rest = &rest[idx + ESCAPED_NEWLINE.len()..];
        }
        text.push_str(rest);

        Self {
            text: Cow::Owned(text),
            escapes,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn raw_offset(&self, normalized: usize) -> usize {
        normalized + self.escapes.partition_point(|&pos| pos < normalized)
    }
}

pub fn normalize_escapes(raw: &str) -> Cow<'_, str> {
    if raw.contains(ESCAPED_NEWLINE) {
        Cow::Owned(raw.replace(ESCAPED_NEWLINE, "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

/// Every complete event currently present in `raw`, in buffer order.
/// Collected in full before the caller dispatches anything.
pub(super) fn extract_complete_events(raw: &str) -> Vec<ExtractedEvent> {
    let view = NormalizedView::new(raw);
    EVENT_TAG_RE
        .captures_iter(view.as_str())
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = caps.get(1)?.as_str().to_string();
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
            Some(ExtractedEvent {
                event: RawEvent { kind, body },
                raw_end: view.raw_offset(whole.end()),
            })
        })
        .collect()
}

/// First offset at or after `from` where an event could still begin: a full
/// `<event` or a trailing prefix of it. Everything before it is dead text.
pub(super) fn retention_start(raw: &str, from: usize) -> usize {
    let tail = &raw[from..];
    let mut search = 0;
    while let Some(idx) = tail[search..].find('<') {
        let start = search + idx;
        let candidate = &tail[start..];
        if candidate.starts_with(TAG_OPEN) || TAG_OPEN.starts_with(candidate) {
            return from + start;
        }
        search = start + 1;
    }
    raw.len()
}

pub fn strip_event_tags(text: &str) -> Cow<'_, str> {
    EVENT_TAG_RE.replace_all(text, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_view_maps_offsets_back_to_raw() {
        let raw = "a\\nb\\nc";
        let view = NormalizedView::new(raw);

        assert_eq!(view.as_str(), "a\nb\nc");
        assert_eq!(view.raw_offset(0), 0);
        assert_eq!(view.raw_offset(1), 1);
        assert_eq!(view.raw_offset(2), 3);
        assert_eq!(view.raw_offset(4), 6);
        assert_eq!(view.raw_offset(5), raw.len());
    }

    #[test]
    fn normalize_escapes_borrows_when_nothing_to_replace() {
        assert!(matches!(normalize_escapes("plain"), Cow::Borrowed("plain")));
        assert_eq!(normalize_escapes("x\\ny"), "x\ny");
    }

    #[test]
    fn extract_finds_all_complete_events_in_order() {
        let raw = concat!(
            "intro <event type=\"geocode\">1,2,A</event> mid ",
            "<event type=\"windy\">3,4</event> tail <event type=\"cctv\">5,6"
        );
        let events = extract_complete_events(raw);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.kind, "geocode");
        assert_eq!(events[0].event.body, "1,2,A");
        assert_eq!(events[1].event.kind, "windy");
        assert_eq!(&raw[events[1].raw_end..], " tail <event type=\"cctv\">5,6");
    }

    #[test]
    fn extract_tolerates_stray_backslashes_and_extra_attributes() {
        let raw = r#"<event type=\"example2\" id="7">{"level":1,"alert":"Y"}</event>"#;
        let events = extract_complete_events(raw);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.kind, "example2");
        assert_eq!(events[0].event.body, r#"{"level":1,"alert":"Y"}"#);
    }

    #[test]
    fn extract_decodes_escaped_newlines_and_maps_end_into_raw_buffer() {
        let raw = "<event type=\"address\">line one\\nline two</event>rest";
        let events = extract_complete_events(raw);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.body, "line one\nline two");
        assert_eq!(&raw[events[0].raw_end..], "rest");
    }

    #[test]
    fn extract_is_non_greedy_across_adjacent_events() {
        let raw = "<event type=\"a\">1</event><event type=\"b\">2</event>";
        let kinds: Vec<String> = extract_complete_events(raw)
            .into_iter()
            .map(|item| item.event.kind)
            .collect();

        assert_eq!(kinds, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn extract_ignores_incomplete_tags() {
        assert!(extract_complete_events("<event type=\"geo").is_empty());
        assert!(extract_complete_events("<event type=\"geocode\">1,2</event").is_empty());
        assert!(extract_complete_events("<event type=\"\">1,2</event>").is_empty());
    }

    #[test]
    fn retention_start_keeps_partial_tag_prefixes() {
        assert_eq!(retention_start("chatter only", 0), 12);
        assert_eq!(retention_start("chatter <ev", 0), 8);
        assert_eq!(retention_start("a < b <event type", 0), 6);
        assert_eq!(retention_start("x<", 0), 1);
        assert_eq!(retention_start("done</event> <eve", 12), 13);
    }

    #[test]
    fn strip_event_tags_removes_complete_units_only() {
        let text = "before <event type=\"a\">x</event> after <event type=\"b\">y";
        assert_eq!(strip_event_tags(text), "before  after <event type=\"b\">y");
    }
}
