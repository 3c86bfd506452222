//! Error taxonomy shared by every stage of an operator session.
//!
//! Only [`Error::Transport`] is recovered locally (by the channel's reconnect
//! loop). Everything else is surfaced to the interaction state machine, which
//! decides whether it ends the current cycle.

use crate::interaction::InteractionState;

/// Failures produced while running an interaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The session channel could not be opened or a frame could not be written.
    #[error("transport error: {0}")]
    Transport(String),
    /// The command-translation service rejected or failed the utterance.
    #[error("translation failed: {0}")]
    Translation(String),
    /// The structured command could not be delivered to the machine.
    #[error("dispatch failed: {0}")]
    Dispatch(String),
    /// An inbound frame or a log entry did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
    /// The report-persistence service failed to store or fetch a report.
    #[error("report persistence failed: {0}")]
    Persistence(String),
}

impl Error {
    /// Whether this failure ends the current interaction cycle.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(self, Error::Translation(_) | Error::Dispatch(_))
    }
}

/// An operator action that is not valid in the current state.
///
/// Rejections never mutate the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: InteractionState,
    },
    #[error("speech recognition is not available in this environment")]
    SpeechUnavailable,
    #[error("nothing was captured to send")]
    EmptyUtterance,
    #[error("no target machine selected")]
    NoTarget,
    #[error("a command is already in flight")]
    DispatchInFlight,
    #[error("a report is already being stored")]
    ReportInFlight,
    #[error("cannot create report: {0}")]
    Unreportable(String),
}
