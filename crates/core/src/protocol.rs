//! Defines the JSON frame protocol spoken on the operator's session channel.
//!
//! Inbound frames are decoded in two steps. [`parse_object`] turns raw text
//! into a JSON object (anything else is a parse error and the frame is
//! dropped). [`InboundFrame::decode`] then validates the payload that belongs
//! to the frame's `type`; unknown types become [`InboundFrame::Unknown`] so
//! newer servers never break older clients.

use crate::error::Error;
use crate::machine::Machine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MACHINES_LIST: &str = "machines_list";
pub const DEVICE_CONNECTED: &str = "device_connected";
pub const DEVICE_DISCONNECTED: &str = "device_disconnected";
pub const ERROR: &str = "error";
pub const COMMAND_OUTPUT: &str = "command_output";
pub const COMMAND_ERROR: &str = "command_error";
pub const COMMAND_COMPLETE: &str = "command_complete";

/// Frames sent from the backend to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Authoritative snapshot of the operator's machines.
    MachinesList(Vec<Machine>),
    /// A machine came online. Carries the complete current list, not a delta.
    DeviceConnected(Vec<Machine>),
    /// A machine went offline. Carries the complete current list, not a delta.
    DeviceDisconnected(Vec<Machine>),
    /// Registry or channel level error reported by the backend.
    Error { message: String },
    /// A line of output from a running command.
    CommandOutput {
        machine_id: Option<String>,
        command: String,
        output: String,
    },
    /// A command failed or wrote to stderr.
    CommandError {
        machine_id: Option<String>,
        command: String,
        error: String,
    },
    /// The machine finished a command batch.
    CommandComplete {
        command: String,
        status: Option<i64>,
        success: Option<bool>,
    },
    /// Any frame type this client does not understand, kept verbatim.
    Unknown { kind: String, raw: Value },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownFrame {
    MachinesList {
        data: Vec<Machine>,
    },
    DeviceConnected {
        data: Vec<Machine>,
    },
    DeviceDisconnected {
        data: Vec<Machine>,
    },
    Error {
        message: Option<String>,
    },
    CommandOutput {
        machine_id: Option<String>,
        command: String,
        output: String,
    },
    CommandError {
        machine_id: Option<String>,
        command: String,
        error: String,
    },
    CommandComplete {
        command: String,
        status: Option<i64>,
        success: Option<bool>,
    },
}

impl From<KnownFrame> for InboundFrame {
    fn from(frame: KnownFrame) -> Self {
        match frame {
            KnownFrame::MachinesList { data } => InboundFrame::MachinesList(data),
            KnownFrame::DeviceConnected { data } => InboundFrame::DeviceConnected(data),
            KnownFrame::DeviceDisconnected { data } => InboundFrame::DeviceDisconnected(data),
            KnownFrame::Error { message } => InboundFrame::Error {
                message: message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "An error occurred".to_string()),
            },
            KnownFrame::CommandOutput {
                machine_id,
                command,
                output,
            } => InboundFrame::CommandOutput {
                machine_id,
                command,
                output,
            },
            KnownFrame::CommandError {
                machine_id,
                command,
                error,
            } => InboundFrame::CommandError {
                machine_id,
                command,
                error,
            },
            KnownFrame::CommandComplete {
                command,
                status,
                success,
            } => InboundFrame::CommandComplete {
                command,
                status,
                success,
            },
        }
    }
}

/// Parses channel text into a JSON object.
pub fn parse_object(text: &str) -> Result<Value, Error> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::Parse(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(Error::Parse("frame is not a JSON object".to_string()));
    }
    Ok(value)
}

/// Returns the `type` discriminator of a raw frame, if it has one.
pub fn frame_type(raw: &Value) -> Option<&str> {
    raw.get("type").and_then(Value::as_str)
}

impl InboundFrame {
    /// Validates a raw frame against the payload shape its `type` promises.
    pub fn decode(raw: &Value) -> Result<Self, Error> {
        let kind = frame_type(raw)
            .ok_or_else(|| Error::Parse("frame has no string `type`".to_string()))?;
        match kind {
            MACHINES_LIST | DEVICE_CONNECTED | DEVICE_DISCONNECTED | ERROR | COMMAND_OUTPUT
            | COMMAND_ERROR | COMMAND_COMPLETE => serde_json::from_value::<KnownFrame>(raw.clone())
                .map(InboundFrame::from)
                .map_err(|e| Error::Parse(format!("malformed `{kind}` frame: {e}"))),
            other => Ok(InboundFrame::Unknown {
                kind: other.to_string(),
                raw: raw.clone(),
            }),
        }
    }

    /// Convenience for [`parse_object`] followed by [`InboundFrame::decode`].
    pub fn parse(text: &str) -> Result<Self, Error> {
        Self::decode(&parse_object(text)?)
    }

    /// The wire name of this frame's type.
    pub fn kind(&self) -> &str {
        match self {
            InboundFrame::MachinesList(_) => MACHINES_LIST,
            InboundFrame::DeviceConnected(_) => DEVICE_CONNECTED,
            InboundFrame::DeviceDisconnected(_) => DEVICE_DISCONNECTED,
            InboundFrame::Error { .. } => ERROR,
            InboundFrame::CommandOutput { .. } => COMMAND_OUTPUT,
            InboundFrame::CommandError { .. } => COMMAND_ERROR,
            InboundFrame::CommandComplete { .. } => COMMAND_COMPLETE,
            InboundFrame::Unknown { kind, .. } => kind,
        }
    }
}

/// Frames sent from the operator to the backend.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Requests a `machines_list` snapshot. Sent on every (re)connect.
    GetMachines { email: String },
    /// Asks a machine to run a structured command.
    Execute(Map<String, Value>),
}

impl OutboundFrame {
    pub fn to_text(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Parse(e.to_string()))
    }
}
