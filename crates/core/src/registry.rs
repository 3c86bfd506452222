//! Projection of channel frames into the operator's current machine set.

use crate::machine::Machine;
use crate::protocol::InboundFrame;
use tracing::{debug, info};

pub const CONNECTION_LOST: &str = "Connection lost. Reconnecting...";
pub const CONNECTION_ERROR: &str = "WebSocket connection error";

/// Current machines for one operator's channel.
///
/// Every list-carrying frame replaces the whole set in server order. After a
/// reconnect the set is stale until the next replacement arrives.
#[derive(Debug, Clone)]
pub struct MachineRegistry {
    owner_id: String,
    machines: Vec<Machine>,
    error: Option<String>,
    stale: bool,
}

impl MachineRegistry {
    /// An empty registry that has not yet received a snapshot.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            machines: Vec::new(),
            error: None,
            stale: true,
        }
    }

    /// Applies one inbound frame. Returns `true` if anything observable changed.
    pub fn apply(&mut self, frame: &InboundFrame) -> bool {
        match frame {
            InboundFrame::MachinesList(list)
            | InboundFrame::DeviceConnected(list)
            | InboundFrame::DeviceDisconnected(list) => {
                self.replace(list);
                info!(kind = frame.kind(), count = self.machines.len(), "Machine set replaced");
                true
            }
            InboundFrame::Error { message } => {
                self.error = Some(message.clone());
                true
            }
            InboundFrame::Unknown { kind, .. } => {
                debug!(%kind, "Registry ignoring unknown frame type");
                false
            }
            _ => false,
        }
    }

    fn replace(&mut self, list: &[Machine]) {
        let mut next: Vec<Machine> = Vec::with_capacity(list.len());
        for machine in list {
            let mut machine = machine.clone();
            if machine.owner_id.is_empty() {
                machine.owner_id = self.owner_id.clone();
            }
            match next.iter_mut().find(|m| m.name == machine.name) {
                Some(existing) => *existing = machine,
                None => next.push(machine),
            }
        }
        self.machines = next;
        self.error = None;
        self.stale = false;
    }

    /// A new channel connection opened; prior machines are no longer current.
    pub fn on_channel_open(&mut self) {
        self.stale = true;
        self.error = None;
    }

    /// The channel dropped and a reconnect is pending.
    pub fn on_channel_lost(&mut self) {
        self.stale = true;
        self.error = Some(CONNECTION_LOST.to_string());
    }

    /// The channel failed with a transport error; a reconnect is pending.
    pub fn on_channel_error(&mut self) {
        self.stale = true;
        self.error = Some(CONNECTION_ERROR.to_string());
    }

    /// Channel teardown removes every machine.
    pub fn clear(&mut self) {
        self.machines.clear();
        self.stale = true;
    }

    /// Machines safe to present as current, or `None` while stale.
    pub fn current(&self) -> Option<&[Machine]> {
        (!self.stale).then_some(self.machines.as_slice())
    }

    /// Last known machines regardless of staleness.
    pub fn last_known(&self) -> &[Machine] {
        &self.machines
    }

    pub fn get(&self, name: &str) -> Option<&Machine> {
        self.current()?.iter().find(|m| m.name == name)
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineStatus;

    fn machine(name: &str, status: MachineStatus) -> Machine {
        Machine {
            id: format!("id-{name}"),
            name: name.to_string(),
            status,
            last_seen_at: None,
            owner_id: String::new(),
        }
    }

    fn names(registry: &MachineRegistry) -> Vec<(String, MachineStatus)> {
        registry
            .current()
            .unwrap()
            .iter()
            .map(|m| (m.name.clone(), m.status))
            .collect()
    }

    #[test]
    fn test_snapshot_with_two_machines() {
        let mut registry = MachineRegistry::new("ada");
        registry.apply(&InboundFrame::MachinesList(vec![
            machine("A", MachineStatus::Connected),
            machine("B", MachineStatus::Disconnected),
        ]));

        assert_eq!(
            names(&registry),
            vec![
                ("A".to_string(), MachineStatus::Connected),
                ("B".to_string(), MachineStatus::Disconnected)
            ]
        );
        assert_eq!(registry.error(), None);
        assert!(registry.current().unwrap().iter().all(|m| m.owner_id == "ada"));
    }

    #[test]
    fn test_every_list_frame_fully_replaces() {
        let frames = vec![
            InboundFrame::MachinesList(vec![
                machine("A", MachineStatus::Connected),
                machine("B", MachineStatus::Connected),
            ]),
            InboundFrame::DeviceConnected(vec![machine("C", MachineStatus::Connected)]),
            InboundFrame::DeviceDisconnected(vec![
                machine("C", MachineStatus::Disconnected),
                machine("A", MachineStatus::Connected),
            ]),
            InboundFrame::DeviceConnected(vec![]),
        ];
        let mut registry = MachineRegistry::new("ada");
        for frame in &frames {
            registry.apply(frame);
            let expected: Vec<(String, MachineStatus)> = match frame {
                InboundFrame::MachinesList(list)
                | InboundFrame::DeviceConnected(list)
                | InboundFrame::DeviceDisconnected(list) => {
                    list.iter().map(|m| (m.name.clone(), m.status)).collect()
                }
                _ => unreachable!(),
            };
            assert_eq!(names(&registry), expected);
        }
    }

    #[test]
    fn test_duplicate_names_last_write_wins() {
        let mut registry = MachineRegistry::new("ada");
        registry.apply(&InboundFrame::MachinesList(vec![
            machine("A", MachineStatus::Connected),
            machine("B", MachineStatus::Connected),
            machine("A", MachineStatus::Disconnected),
        ]));
        assert_eq!(
            names(&registry),
            vec![
                ("A".to_string(), MachineStatus::Disconnected),
                ("B".to_string(), MachineStatus::Connected)
            ]
        );
    }

    #[test]
    fn test_error_frame_keeps_machines() {
        let mut registry = MachineRegistry::new("ada");
        registry.apply(&InboundFrame::MachinesList(vec![machine(
            "A",
            MachineStatus::Connected,
        )]));
        registry.apply(&InboundFrame::Error {
            message: "Invalid JSON format".into(),
        });
        assert_eq!(registry.error(), Some("Invalid JSON format"));
        assert_eq!(registry.current().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_and_execution_frames_are_ignored() {
        let mut registry = MachineRegistry::new("ada");
        assert!(!registry.apply(&InboundFrame::Unknown {
            kind: "heartbeat".into(),
            raw: serde_json::json!({"type": "heartbeat"}),
        }));
        assert!(!registry.apply(&InboundFrame::CommandOutput {
            machine_id: None,
            command: "ls".into(),
            output: "a".into(),
        }));
        assert!(registry.is_stale());
    }

    #[test]
    fn test_transport_error_marks_stale() {
        let mut registry = MachineRegistry::new("ada");
        registry.apply(&InboundFrame::MachinesList(vec![machine(
            "A",
            MachineStatus::Connected,
        )]));
        registry.on_channel_error();
        assert!(registry.is_stale());
        assert_eq!(registry.error(), Some(CONNECTION_ERROR));
    }

    #[test]
    fn test_reconnect_hides_machines_until_snapshot() {
        let mut registry = MachineRegistry::new("ada");
        registry.apply(&InboundFrame::MachinesList(vec![machine(
            "A",
            MachineStatus::Connected,
        )]));

        registry.on_channel_lost();
        assert!(registry.current().is_none());
        assert_eq!(registry.error(), Some(CONNECTION_LOST));
        assert_eq!(registry.last_known().len(), 1);

        registry.on_channel_open();
        assert!(registry.current().is_none());
        assert_eq!(registry.get("A"), None);
        assert_eq!(registry.error(), None);

        registry.apply(&InboundFrame::MachinesList(vec![machine(
            "B",
            MachineStatus::Connected,
        )]));
        assert_eq!(registry.get("B").map(|m| m.id.as_str()), Some("id-B"));
    }
}
