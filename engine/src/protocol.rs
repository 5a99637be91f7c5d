//! Wire protocol definitions.
//!
//! The server pushes a Server-Sent Events stream. Every frame carries a JSON
//! body; field names are camelCase except `subjectID`.
//!
//! ```text
//! event: connected
//! retry: 5000
//! data: {"clientId":"4f1c...","timestamp":1706745600000}
//!
//! id: 42
//! event: stage_change
//! data: {"eventType":"stage_change","data":{"stage":"paint"},"subjectID":"ORD-1","timestamp":1706745600123}
//!
//! event: heartbeat
//! data: {"timestamp":1706745630000}
//! ```

use crate::{canonicalize, error::Result, ClientId, Error, SubjectId, Timestamp};
use serde::{Deserialize, Serialize};

/// Name of the frame sent once per accepted connection.
pub const CONNECTED_EVENT: &str = "connected";

/// Name of the keep-alive frame.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Event name an SSE frame has when it carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// Body of a domain event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Canonical event type; falls back to the SSE event name when absent
    #[serde(default)]
    pub event_type: String,
    /// Domain payload
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(rename = "subjectID", default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
    /// Server generation time
    #[serde(default)]
    pub timestamp: Timestamp,
}

/// Body of the `connected` acknowledgment frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedFrame {
    pub client_id: ClientId,
    pub timestamp: Timestamp,
}

/// Body of a `heartbeat` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatFrame {
    #[serde(default)]
    pub timestamp: Timestamp,
}

/// One Server-Sent Events frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field
    pub event: Option<String>,
    /// `id:` field of this frame
    pub id: Option<String>,
    /// Concatenated `data:` lines
    pub data: String,
    /// `retry:` reconnection hint in milliseconds
    pub retry: Option<u64>,
}

impl SseFrame {
    /// A named frame with a JSON body.
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            ..Self::default()
        }
    }

    /// Attach an id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The event name, defaulting to `message`.
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT)
    }

    /// Encode as SSE text, terminated by a blank line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {retry}\n"));
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Incremental SSE parser.
///
/// Feed it arbitrary byte chunks; it returns every frame completed by the
/// chunk. Lines end in `\n` or `\r\n`. Comment lines (`:`) are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the frames it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event,
            id,
            data,
            retry,
        })
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The server accepted the connection
    Connected(ConnectedFrame),
    /// Keep-alive
    Heartbeat(HeartbeatFrame),
    /// A domain event; `id` is the resumption token
    Event { id: Option<String>, frame: EventFrame },
}

impl InboundMessage {
    /// Decode a frame's JSON body according to its event name.
    pub fn parse(frame: &SseFrame) -> Result<Self> {
        let name = frame.event_name();
        match name {
            CONNECTED_EVENT => serde_json::from_str(&frame.data)
                .map(InboundMessage::Connected)
                .map_err(|e| malformed(name, e)),
            HEARTBEAT_EVENT => {
                // Some intermediaries rewrite heartbeats with an empty body.
                let body = serde_json::from_str(&frame.data).unwrap_or_default();
                Ok(InboundMessage::Heartbeat(body))
            }
            _ => {
                if frame.data.trim().is_empty() {
                    return Err(Error::InvalidFrame(format!("empty '{name}' frame")));
                }
                let mut body: EventFrame =
                    serde_json::from_str(&frame.data).map_err(|e| malformed(name, e))?;
                if body.event_type.trim().is_empty() {
                    if name == DEFAULT_EVENT {
                        return Err(Error::UnknownFrame(
                            "unnamed frame without eventType".to_string(),
                        ));
                    }
                    body.event_type = name.to_string();
                }
                body.event_type = canonicalize(&body.event_type);
                Ok(InboundMessage::Event {
                    id: frame.id.clone(),
                    frame: body,
                })
            }
        }
    }
}

fn malformed(event: &str, err: serde_json::Error) -> Error {
    Error::MalformedPayload {
        event: event.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_frame_serialization() {
        let frame = EventFrame {
            event_type: "stage_change".into(),
            data: json!({"stage": "paint"}),
            subject_id: Some("ORD-1".into()),
            timestamp: 1_706_745_600_123,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            r#"{"eventType":"stage_change","data":{"stage":"paint"},"subjectID":"ORD-1","timestamp":1706745600123}"#
        );
    }

    #[test]
    fn encode_multiline_data() {
        let frame = SseFrame::named("note", "a\nb").with_id("7");
        assert_eq!(frame.encode(), "id: 7\nevent: note\ndata: a\ndata: b\n\n");
    }

    #[test]
    fn decode_across_chunk_boundaries() {
        let text = SseFrame::named("stage_change", r#"{"eventType":"stage_change"}"#)
            .with_id("3")
            .encode();
        let bytes = text.as_bytes();

        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(5) {
            frames.extend(decoder.feed(chunk));
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_name(), "stage_change");
        assert_eq!(frames[0].id.as_deref(), Some("3"));
        assert_eq!(frames[0].data, r#"{"eventType":"stage_change"}"#);
    }

    #[test]
    fn decode_crlf_comments_and_retry() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(
            b": keep-alive\r\nevent: connected\r\nretry: 5000\r\ndata: {}\r\n\r\ndata:x\n\n",
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event_name(), CONNECTED_EVENT);
        assert_eq!(frames[0].retry, Some(5000));
        assert_eq!(frames[1].event_name(), DEFAULT_EVENT);
        assert_eq!(frames[1].data, "x");
    }

    #[test]
    fn blank_line_without_data_dispatches_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: heartbeat\n\n").is_empty());
        // The dangling event name must not leak into the next frame.
        let frames = decoder.feed(b"data: 1\n\n");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn parse_connected() {
        let frame = SseFrame::named(CONNECTED_EVENT, r#"{"clientId":"c-1","timestamp":10}"#);
        let msg = InboundMessage::parse(&frame).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Connected(ConnectedFrame {
                client_id: "c-1".into(),
                timestamp: 10
            })
        );
    }

    #[test]
    fn parse_event_canonicalizes_type() {
        let frame = SseFrame::named(
            "stage_changed",
            r#"{"eventType":"stage_changed","data":{"stage":"qa"},"subjectID":"ORD-1","timestamp":5}"#,
        )
        .with_id("12");
        match InboundMessage::parse(&frame).unwrap() {
            InboundMessage::Event { id, frame } => {
                assert_eq!(id.as_deref(), Some("12"));
                assert_eq!(frame.event_type, "stage_change");
                assert_eq!(frame.subject_id.as_deref(), Some("ORD-1"));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn parse_event_type_falls_back_to_frame_name() {
        let frame = SseFrame::named("order_created", r#"{"data":{"id":1},"timestamp":5}"#);
        match InboundMessage::parse(&frame).unwrap() {
            InboundMessage::Event { frame, .. } => assert_eq!(frame.event_type, "order_created"),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_parse_errors() {
        let bad_json = SseFrame::named("stage_change", "{not json");
        let err = InboundMessage::parse(&bad_json).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        assert!(err.is_parse_error());

        let bad_connected = SseFrame::named(CONNECTED_EVENT, "[]");
        assert!(InboundMessage::parse(&bad_connected).is_err());

        let anonymous = SseFrame {
            data: r#"{"data":1}"#.into(),
            ..SseFrame::default()
        };
        assert!(matches!(
            InboundMessage::parse(&anonymous),
            Err(Error::UnknownFrame(_))
        ));
    }

    #[test]
    fn heartbeat_tolerates_empty_body() {
        let frame = SseFrame::named(HEARTBEAT_EVENT, "");
        assert_eq!(
            InboundMessage::parse(&frame).unwrap(),
            InboundMessage::Heartbeat(HeartbeatFrame::default())
        );
    }
}
