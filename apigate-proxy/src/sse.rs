//! Server-Sent Events parsing for `response_field` metering (§4.6, GLOSSARY).
//!
//! Grammar: `[event: NAME]\ndata: LINE*\n[id: ID]\n\n`. Comment lines
//! (leading `:`) are ignored; multiple `data:` lines join with `\n`; a
//! blank line terminates the event.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parses a full SSE byte stream into its component events. Used by tests
/// and by the tee reader's incremental variant (`SseAccumulator`).
pub fn parse_sse_events(raw: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut current = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut has_content = false;

    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if has_content {
                current.data = data_lines.join("\n");
                events.push(std::mem::take(&mut current));
                data_lines.clear();
                has_content = false;
            }
            continue;
        }
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            current.event = Some(rest.trim_start().to_string());
            has_content = true;
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
            has_content = true;
        } else if let Some(rest) = line.strip_prefix("id:") {
            current.id = Some(rest.trim_start().to_string());
            has_content = true;
        }
    }
    if has_content {
        current.data = data_lines.join("\n");
        events.push(current);
    }
    events
}

/// Returns the last complete event's joined `data:` field, or `None` if the
/// stream contains no complete (blank-line-terminated) event.
pub fn extract_sse_last_data(raw: &str) -> Option<String> {
    parse_sse_events(raw).pop().map(|e| e.data)
}

/// Reads a numeric field from a dotted JSON path (e.g. `usage.tokens`)
/// against a JSON value. Missing or non-numeric → `None` (§4.6: logged and
/// treated as 0 by the caller).
pub fn read_dotted_numeric(value: &Value, dotted_path: &str) -> Option<f64> {
    let mut cursor = value;
    for segment in dotted_path.split('.') {
        cursor = cursor.get(segment)?;
    }
    cursor.as_f64()
}

/// Incremental accumulator fed chunk-by-chunk from the tee reader so the
/// last complete SSE event is known without buffering the whole response.
#[derive(Default)]
pub struct SseAccumulator {
    buffer: String,
    last_complete: Option<String>,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        // Re-parse only the unterminated tail on each feed; cheap enough
        // for the event sizes SSE streams use in practice.
        if let Some(last_blank) = self.buffer.rfind("\n\n") {
            let complete_region = &self.buffer[..last_blank];
            if let Some(event) = parse_sse_events(complete_region).pop() {
                self.last_complete = Some(event.data);
            }
            self.buffer = self.buffer[last_blank + 2..].to_string();
        }
    }

    pub fn last_data(&self) -> Option<&str> {
        self.last_complete.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event_with_name_and_id() {
        let raw = "event: update\ndata: {\"x\":1}\nid: 5\n\n";
        let events = parse_sse_events(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("update"));
        assert_eq!(events[0].data, "{\"x\":1}");
        assert_eq!(events[0].id.as_deref(), Some("5"));
    }

    #[test]
    fn joins_multiline_data_fields() {
        let raw = "data: line1\ndata: line2\n\n";
        let events = parse_sse_events(raw);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn ignores_comment_lines() {
        let raw = ": this is a comment\ndata: payload\n\n";
        let events = parse_sse_events(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "payload");
    }

    #[test]
    fn extracts_last_event_from_multiple() {
        let raw = "data: one\n\ndata: two\n\ndata: three\n\n";
        assert_eq!(extract_sse_last_data(raw), Some("three".to_string()));
    }

    #[test]
    fn serialize_then_parse_roundtrips() {
        let events = vec![
            SseEvent { event: Some("a".into()), data: "x".into(), id: None },
            SseEvent { event: None, data: "y\nz".into(), id: Some("2".into()) },
        ];
        let mut raw = String::new();
        for e in &events {
            if let Some(name) = &e.event {
                raw.push_str(&format!("event: {name}\n"));
            }
            for line in e.data.split('\n') {
                raw.push_str(&format!("data: {line}\n"));
            }
            if let Some(id) = &e.id {
                raw.push_str(&format!("id: {id}\n"));
            }
            raw.push('\n');
        }
        assert_eq!(parse_sse_events(&raw), events);
    }

    #[test]
    fn incomplete_trailing_event_is_not_returned() {
        assert_eq!(extract_sse_last_data("data: partial\n"), None);
    }

    #[test]
    fn read_dotted_numeric_resolves_nested_path() {
        let value = serde_json::json!({"usage": {"tokens": 42}});
        assert_eq!(read_dotted_numeric(&value, "usage.tokens"), Some(42.0));
    }

    #[test]
    fn read_dotted_numeric_missing_or_non_numeric_is_none() {
        let value = serde_json::json!({"usage": {"tokens": "many"}});
        assert_eq!(read_dotted_numeric(&value, "usage.tokens"), None);
        assert_eq!(read_dotted_numeric(&value, "usage.missing"), None);
    }

    #[test]
    fn accumulator_tracks_last_complete_event_across_feeds() {
        let mut acc = SseAccumulator::new();
        acc.feed("data: {\"usage\":{\"tokens\":10}}\n\ndata: {\"usage\"");
        assert_eq!(acc.last_data(), Some("{\"usage\":{\"tokens\":10}}"));
        acc.feed(":{\"tokens\":20}}\n\n");
        assert_eq!(acc.last_data(), Some("{\"usage\":{\"tokens\":20}}"));
    }
}
