//! The ordered record of frames received while a command runs.

use crate::protocol::{self, frame_type};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Presentation class of an execution frame, derived from its `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeviceConnected,
    DeviceDisconnected,
    CommandOutput,
    CommandError,
    CommandComplete,
    Unknown,
}

impl EventKind {
    pub fn classify(raw: &Value) -> Self {
        match frame_type(raw) {
            Some(protocol::DEVICE_CONNECTED) => EventKind::DeviceConnected,
            Some(protocol::DEVICE_DISCONNECTED) => EventKind::DeviceDisconnected,
            Some(protocol::COMMAND_OUTPUT) => EventKind::CommandOutput,
            Some(protocol::COMMAND_ERROR) => EventKind::CommandError,
            Some(protocol::COMMAND_COMPLETE) => EventKind::CommandComplete,
            _ => EventKind::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::DeviceConnected => "Device Connected",
            EventKind::DeviceDisconnected => "Device Disconnected",
            EventKind::CommandOutput => "Command Output",
            EventKind::CommandError => "Command Error",
            EventKind::CommandComplete => "Command Complete",
            EventKind::Unknown => "Message",
        }
    }
}

/// One frame as it arrived, plus its classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionEvent {
    pub kind: EventKind,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(payload: Value) -> Self {
        Self {
            kind: EventKind::classify(&payload),
            payload,
            received_at: Utc::now(),
        }
    }

    /// A single display line for the event.
    pub fn summary(&self) -> String {
        let field = |name: &str| {
            self.payload
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        match self.kind {
            EventKind::CommandOutput => format!("{} -> {}", field("command"), field("output")),
            EventKind::CommandError => format!("{} -> {}", field("command"), field("error")),
            EventKind::CommandComplete => {
                let success = self.payload.get("success").and_then(Value::as_bool);
                match success {
                    Some(true) => format!("{} (ok)", field("command")),
                    Some(false) => format!("{} (failed)", field("command")),
                    None => field("command"),
                }
            }
            EventKind::DeviceConnected | EventKind::DeviceDisconnected => {
                let first = self
                    .payload
                    .get("data")
                    .and_then(Value::as_array)
                    .and_then(|list| list.first());
                match first {
                    Some(machine) => format!(
                        "{} is {}",
                        machine.get("name").and_then(Value::as_str).unwrap_or("?"),
                        machine.get("status").and_then(Value::as_str).unwrap_or("?")
                    ),
                    None => "no machines".to_string(),
                }
            }
            EventKind::Unknown => self.payload.to_string(),
        }
    }
}

/// Append-only, arrival-ordered sequence of execution events.
///
/// Frames are never dropped, deduplicated or reordered here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionLog {
    events: Vec<ExecutionEvent>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, payload: Value) -> &ExecutionEvent {
        self.events.push(ExecutionEvent::new(payload));
        &self.events[self.events.len() - 1]
    }

    pub fn first(&self) -> Option<&ExecutionEvent> {
        self.events.first()
    }

    pub fn events(&self) -> &[ExecutionEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_by_type() {
        assert_eq!(
            EventKind::classify(&json!({"type": "command_output"})),
            EventKind::CommandOutput
        );
        assert_eq!(
            EventKind::classify(&json!({"type": "command_error"})),
            EventKind::CommandError
        );
        assert_eq!(
            EventKind::classify(&json!({"type": "device_connected"})),
            EventKind::DeviceConnected
        );
        assert_eq!(
            EventKind::classify(&json!({"type": "machines_list"})),
            EventKind::Unknown
        );
        assert_eq!(EventKind::classify(&json!({"no": "type"})), EventKind::Unknown);
    }

    #[test]
    fn test_preserves_arrival_order_and_duplicates() {
        let mut log = ExecutionLog::new();
        let frames: Vec<Value> = (0..5)
            .map(|i| json!({"type": "command_output", "command": "seq", "output": i.to_string()}))
            .collect();
        for frame in &frames {
            log.append(frame.clone());
        }
        log.append(frames[0].clone());

        let outputs: Vec<&str> = log
            .events()
            .iter()
            .map(|e| e.payload["output"].as_str().unwrap())
            .collect();
        assert_eq!(outputs, vec!["0", "1", "2", "3", "4", "0"]);
        assert_eq!(log.first().unwrap().payload, frames[0]);
    }

    #[test]
    fn test_summaries() {
        let output = ExecutionEvent::new(
            json!({"type": "command_output", "command": "df -h", "output": "/dev/sda1 40%"}),
        );
        assert_eq!(output.summary(), "df -h -> /dev/sda1 40%");
        assert_eq!(output.kind.label(), "Command Output");

        let complete = ExecutionEvent::new(
            json!({"type": "command_complete", "command": "df -h", "status": 1, "success": false}),
        );
        assert_eq!(complete.summary(), "df -h (failed)");

        let connected = ExecutionEvent::new(
            json!({"type": "device_connected", "data": [{"name": "pi", "status": "connected"}]}),
        );
        assert_eq!(connected.summary(), "pi is connected");
    }

    #[test]
    fn test_clear() {
        let mut log = ExecutionLog::new();
        log.append(json!({"type": "x"}));
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(log.is_empty());
        assert!(log.first().is_none());
    }
}
