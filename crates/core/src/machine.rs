//! Remote machines as reported by the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of a machine, as last reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineStatus::Connected => write!(f, "connected"),
            MachineStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A device agent that can receive commands and stream results back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MachineWire")]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub status: MachineStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Empty until the registry stamps it with the channel's operator id.
    pub owner_id: String,
}

impl Machine {
    pub fn is_connected(&self) -> bool {
        self.status == MachineStatus::Connected
    }
}

/// The backend stores machines as documents, so the same field can arrive
/// under a storage name (`_id`, `created_at`) or a client name.
#[derive(Deserialize)]
struct MachineWire {
    id: Option<String>,
    #[serde(rename = "_id")]
    object_id: Option<String>,
    name: String,
    status: MachineStatus,
    last_seen_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    #[serde(alias = "ownerId")]
    owner_id: Option<String>,
}

impl TryFrom<MachineWire> for Machine {
    type Error = String;

    fn try_from(wire: MachineWire) -> Result<Self, Self::Error> {
        if wire.name.trim().is_empty() {
            return Err("machine name must not be empty".to_string());
        }
        let id = wire
            .id
            .or(wire.object_id)
            .unwrap_or_else(|| wire.name.clone());
        Ok(Self {
            id,
            name: wire.name,
            status: wire.status,
            last_seen_at: wire.last_seen_at.or(wire.created_at),
            owner_id: wire.owner_id.unwrap_or_default(),
        })
    }
}
