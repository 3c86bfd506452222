use crate::error::Error;
use crate::protocol::OutboundFrame;
use serde::Serialize;
use serde_json::{Map, Value};

/// A machine-actionable command produced from an utterance.
///
/// `structured` is whatever the translation service returned; this crate
/// only routes it. It never carries its own `type` key, the frame tag is
/// always `execute`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub intent_text: String,
    pub target_machine: String,
    pub structured: Map<String, Value>,
}

impl Command {
    pub fn from_translation(
        intent_text: impl Into<String>,
        target_machine: impl Into<String>,
        translated: Value,
    ) -> Result<Self, Error> {
        let Value::Object(mut structured) = translated else {
            return Err(Error::Translation(
                "translation service did not return a JSON object".to_string(),
            ));
        };
        structured.remove("type");
        Ok(Self {
            intent_text: intent_text.into(),
            target_machine: target_machine.into(),
            structured,
        })
    }

    /// The frame that asks the target machine to run this command.
    pub fn execute_frame(&self) -> OutboundFrame {
        OutboundFrame::Execute(self.structured.clone())
    }

    /// How many `command_complete` frames a finished run produces.
    ///
    /// The machine runs each category of `execution_plan.categories` that
    /// has at least one non-empty command as one batch and reports each
    /// batch separately. `None` when the command carries no such plan.
    pub fn expected_completions(&self) -> Option<usize> {
        let categories = self
            .structured
            .get("execution_plan")?
            .get("categories")?
            .as_array()?;
        let batches = categories
            .iter()
            .filter(|category| {
                category
                    .get("commands")
                    .and_then(Value::as_array)
                    .is_some_and(|commands| {
                        commands.iter().any(|c| {
                            c.get("command")
                                .and_then(Value::as_str)
                                .is_some_and(|text| !text.is_empty())
                        })
                    })
            })
            .count();
        (batches > 0).then_some(batches)
    }

    /// The body posted to the REST dispatch route, identical to the frame.
    pub fn execute_payload(&self) -> Value {
        let mut body = Map::with_capacity(self.structured.len() + 1);
        body.insert("type".to_string(), Value::String("execute".to_string()));
        body.extend(self.structured.clone());
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_payload_merges_type() {
        let command = Command::from_translation(
            "turn on the light",
            "lab-pi",
            json!({"device": "light", "action": "on"}),
        )
        .unwrap();
        assert_eq!(
            command.execute_payload(),
            json!({"type": "execute", "device": "light", "action": "on"})
        );
        assert_eq!(
            serde_json::to_value(command.execute_frame()).unwrap(),
            command.execute_payload()
        );
    }

    #[test]
    fn test_execute_tag_wins_over_translated_type() {
        let command =
            Command::from_translation("x", "m", json!({"type": "shell", "cmd": "ls"})).unwrap();
        assert_eq!(command.execute_payload()["type"], "execute");
        assert!(!command.structured.contains_key("type"));
    }

    #[test]
    fn test_expected_completions_counts_runnable_categories() {
        let plan = json!({
            "execution_plan": {
                "categories": [
                    {"name": "network", "commands": [{"command": "ip a"}, {"command": "ping -c1 host"}]},
                    {"name": "empty", "commands": [{"command": ""}]},
                    {"name": "disk", "commands": [{"command": "df -h"}]},
                ]
            }
        });
        let command = Command::from_translation("check things", "lab-pi", plan).unwrap();
        assert_eq!(command.expected_completions(), Some(2));

        let flat = Command::from_translation("x", "m", json!({"device": "light"})).unwrap();
        assert_eq!(flat.expected_completions(), None);

        let idle = Command::from_translation(
            "x",
            "m",
            json!({"execution_plan": {"categories": [{"commands": []}]}}),
        )
        .unwrap();
        assert_eq!(idle.expected_completions(), None);
    }

    #[test]
    fn test_rejects_non_object_translation() {
        let err = Command::from_translation("x", "m", json!(["ls"])).unwrap_err();
        assert!(matches!(err, Error::Translation(_)));
    }
}
