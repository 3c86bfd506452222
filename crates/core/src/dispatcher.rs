//! Turns a committed utterance into a command delivered to a machine.

use crate::command::Command;
use crate::error::Error;
use crate::identity::OperatorIdentity;
use crate::services::{CommandSink, CommandTranslator};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Translates utterances and submits the resulting commands.
///
/// Dispatch is not idempotent: every call starts a new execution on the
/// machine. Callers gate repeated sends through the interaction state.
#[derive(Clone)]
pub struct CommandDispatcher {
    translator: Arc<dyn CommandTranslator>,
    sink: Arc<dyn CommandSink>,
}

impl CommandDispatcher {
    pub fn new(translator: Arc<dyn CommandTranslator>, sink: Arc<dyn CommandSink>) -> Self {
        Self { translator, sink }
    }

    /// Translates `utterance` and submits it to `target_machine`.
    ///
    /// Returns as soon as the command is submitted; results arrive on the
    /// session channel. Nothing is retried.
    #[instrument(name = "dispatch", skip(self, operator), fields(operator = %operator.id))]
    pub async fn dispatch(
        &self,
        operator: &OperatorIdentity,
        utterance: &str,
        target_machine: &str,
    ) -> Result<Command, Error> {
        let translated = self.translator.translate(utterance).await.map_err(|e| {
            warn!(error = %e, "Translation failed");
            match e {
                Error::Translation(_) => e,
                other => Error::Translation(other.to_string()),
            }
        })?;

        let command = Command::from_translation(utterance, target_machine, translated)?;

        self.sink.submit(operator, &command).await.map_err(|e| {
            warn!(error = %e, "Command submission failed");
            match e {
                Error::Dispatch(_) => e,
                other => Error::Dispatch(other.to_string()),
            }
        })?;

        info!(target = %target_machine, "Command submitted");
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockCommandSink, MockCommandTranslator};
    use serde_json::json;

    fn operator() -> OperatorIdentity {
        OperatorIdentity::from_email("ada@example.com").unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_translates_then_submits() {
        let mut translator = MockCommandTranslator::new();
        translator
            .expect_translate()
            .withf(|intent| intent == "turn on the light")
            .times(1)
            .returning(|_| Ok(json!({"device": "light", "action": "on"})));

        let mut sink = MockCommandSink::new();
        sink.expect_submit()
            .withf(|op, command| {
                op.id == "ada"
                    && command.target_machine == "lab-pi"
                    && command.execute_payload()
                        == json!({"type": "execute", "device": "light", "action": "on"})
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let dispatcher = CommandDispatcher::new(Arc::new(translator), Arc::new(sink));
        let command = dispatcher
            .dispatch(&operator(), "turn on the light", "lab-pi")
            .await
            .unwrap();
        assert_eq!(command.intent_text, "turn on the light");
    }

    #[tokio::test]
    async fn test_translation_failure_skips_submission() {
        let mut translator = MockCommandTranslator::new();
        translator
            .expect_translate()
            .returning(|_| Err(Error::Transport("connection refused".into())));
        let mut sink = MockCommandSink::new();
        sink.expect_submit().times(0);

        let dispatcher = CommandDispatcher::new(Arc::new(translator), Arc::new(sink));
        let err = dispatcher
            .dispatch(&operator(), "reboot", "lab-pi")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::Translation("transport error: connection refused".into())
        );
    }

    #[tokio::test]
    async fn test_submission_failure_is_dispatch_error() {
        let mut translator = MockCommandTranslator::new();
        translator
            .expect_translate()
            .returning(|_| Ok(json!({"execution_plan": {"categories": []}})));
        let mut sink = MockCommandSink::new();
        sink.expect_submit()
            .returning(|_, _| Err(Error::Dispatch("machine offline".into())));

        let dispatcher = CommandDispatcher::new(Arc::new(translator), Arc::new(sink));
        let err = dispatcher
            .dispatch(&operator(), "list disks", "lab-pi")
            .await
            .unwrap_err();
        assert_eq!(err, Error::Dispatch("machine offline".into()));
    }
}
