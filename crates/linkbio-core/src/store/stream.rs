//! Server-sent event parsing for the Realtime Database streaming API.
//!
//! The stream sends `put`/`patch` events carrying `{"path", "data"}` relative
//! to the subscribed location. We keep a local mirror of that location and
//! hand out the full collection after each change.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::StoreError;
use crate::models::RawCollection;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Feed it raw chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Consume a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=newline).collect::<Vec<u8>>();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Result of applying one stream event to the mirror.
#[derive(Debug, PartialEq)]
pub enum StreamUpdate {
    /// The mirror changed; here is the full collection.
    Changed(RawCollection),
    /// Nothing to deliver (keep-alive, unknown event).
    Unchanged,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

/// Apply one event to `mirror`.
///
/// `cancel` and `auth_revoked` end the stream and are returned as errors.
pub fn apply_stream_event(mirror: &mut Value, event: &SseEvent) -> Result<StreamUpdate, StoreError> {
    match event.event.as_str() {
        "put" => {
            let payload = parse_payload(&event.data)?;
            set_at_path(mirror, &split_path(&payload.path), payload.data);
            Ok(StreamUpdate::Changed(RawCollection::from_value(mirror.clone())))
        }
        "patch" => {
            let payload = parse_payload(&event.data)?;
            let Value::Object(children) = payload.data else {
                return Err(StoreError::InvalidPayload(
                    "patch data must be an object".to_string(),
                ));
            };
            let base = split_path(&payload.path);
            for (key, value) in children {
                let mut segments = base.clone();
                segments.extend(split_path(&key));
                set_at_path(mirror, &segments, value);
            }
            Ok(StreamUpdate::Changed(RawCollection::from_value(mirror.clone())))
        }
        "keep-alive" => Ok(StreamUpdate::Unchanged),
        "cancel" => Err(StoreError::PermissionDenied(describe_cancel(&event.data))),
        "auth_revoked" => Err(StoreError::PermissionDenied(
            "auth token is no longer valid".to_string(),
        )),
        other => {
            tracing::debug!("Ignoring unknown stream event '{}'", other);
            Ok(StreamUpdate::Unchanged)
        }
    }
}

fn parse_payload(data: &str) -> Result<StreamPayload, StoreError> {
    serde_json::from_str(data).map_err(|error| StoreError::InvalidPayload(error.to_string()))
}

fn describe_cancel(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(reason)) => reason,
        _ if data.trim().is_empty() || data.trim() == "null" => {
            "subscription cancelled by server".to_string()
        }
        _ => data.trim().to_string(),
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Write `value` at `segments`. `null` deletes, and emptied objects collapse
/// to `null` the way the database reports them.
fn set_at_path(node: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        let mut emptied = false;
        if let Value::Object(children) = node {
            if rest.is_empty() {
                children.remove(first);
            } else if let Some(child) = children.get_mut(first) {
                set_at_path(child, rest, Value::Null);
                if child.is_null() {
                    children.remove(first);
                }
            }
            emptied = children.is_empty();
        }
        if emptied {
            *node = Value::Null;
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(children) = node {
        let child = children.entry(first.clone()).or_insert(Value::Null);
        set_at_path(child, rest, value);
    }
}
