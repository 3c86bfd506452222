//! The interaction state machine: one capture → dispatch → execute → report
//! cycle, and the single source of truth the presentation layer reads.
//!
//! ```text
//! Idle ──start_capture──▶ Listening ──stop_capture──▶ Reviewing ──send──▶ Sending
//! Sending ──dispatch accepted──▶ Executing ──last command_complete | complete | report──▶ Completed
//! any ──dispatch failed──▶ Errored
//! any ──reset──▶ Idle
//! ```
//!
//! The session never performs I/O. Operations that need the network hand out
//! a ticket stamped with the current generation; the result is applied only
//! if the generation still matches, so nothing from a reset or superseded
//! cycle leaks into the next one.

use crate::command::Command;
use crate::error::{Error, TransitionError};
use crate::execution::{EventKind, ExecutionLog};
use crate::report::{ReportRef, report_entry};
use crate::transcript::{RecognitionResult, SpeechCapability, TranscriptAssembler, TranscriptState};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    #[default]
    Idle,
    Listening,
    Reviewing,
    Sending,
    Executing,
    Completed,
    Errored,
}

impl InteractionState {
    /// A dispatch has been started and not yet finished.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, InteractionState::Sending | InteractionState::Executing)
    }

    /// `Completed` and `Errored` end a cycle; only a new capture or a reset leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InteractionState::Completed | InteractionState::Errored)
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InteractionState::Idle => "idle",
            InteractionState::Listening => "listening",
            InteractionState::Reviewing => "reviewing",
            InteractionState::Sending => "sending",
            InteractionState::Executing => "executing",
            InteractionState::Completed => "completed",
            InteractionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Everything needed to run one dispatch outside the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTicket {
    pub generation: u64,
    pub utterance: String,
    pub target_machine: String,
}

/// Everything needed to persist one report outside the session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTicket {
    pub generation: u64,
    pub machine_name: String,
    pub entry: Value,
}

/// How an asynchronous result was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Accepted,
    /// The result belongs to an earlier generation and was discarded.
    Stale,
}

/// What happened to an inbound frame offered to the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// No command is executing; the frame is not part of this interaction.
    Ignored,
    /// Arrived before the dispatch was acknowledged; held until it is.
    Held,
    Appended,
    /// Appended, and it reported the last batch of the command.
    Completed,
}

/// The aggregate root of one operator interaction.
#[derive(Debug, Clone)]
pub struct InteractionSession {
    generation: u64,
    state: InteractionState,
    transcript: TranscriptAssembler,
    target_machine: Option<String>,
    command: Option<Command>,
    log: ExecutionLog,
    error: Option<String>,
    report: Option<ReportRef>,
    report_pending: bool,
    /// Frames seen while `Sending`, in arrival order.
    held: Vec<Value>,
    completions: usize,
}

impl InteractionSession {
    pub fn new(capability: SpeechCapability) -> Self {
        Self {
            generation: 0,
            state: InteractionState::Idle,
            transcript: TranscriptAssembler::new(capability),
            target_machine: None,
            command: None,
            log: ExecutionLog::new(),
            error: None,
            report: None,
            report_pending: false,
            held: Vec::new(),
            completions: 0,
        }
    }

    fn reject<T>(&self, action: &'static str) -> Result<T, TransitionError> {
        Err(TransitionError::InvalidState {
            action,
            state: self.state,
        })
    }

    fn clear_cycle(&mut self) {
        self.generation += 1;
        self.transcript.clear();
        self.command = None;
        self.log.clear();
        self.error = None;
        self.report = None;
        self.report_pending = false;
        self.held.clear();
        self.completions = 0;
    }

    /// Begins a new capture cycle, discarding the previous one.
    pub fn start_capture(&mut self) -> Result<(), TransitionError> {
        match self.state {
            InteractionState::Idle
            | InteractionState::Reviewing
            | InteractionState::Completed
            | InteractionState::Errored => {}
            InteractionState::Sending | InteractionState::Executing => {
                return Err(TransitionError::DispatchInFlight);
            }
            InteractionState::Listening => return self.reject("start capture"),
        }
        if !self.transcript.is_input_enabled() {
            return Err(TransitionError::SpeechUnavailable);
        }
        self.clear_cycle();
        self.transcript.start()?;
        self.state = InteractionState::Listening;
        debug!(generation = self.generation, "Capture started");
        Ok(())
    }

    /// Feeds a recognizer event. Returns `false` when not listening.
    pub fn on_transcript(&mut self, results: &[RecognitionResult]) -> bool {
        if self.state != InteractionState::Listening {
            return false;
        }
        self.transcript.on_results(results);
        true
    }

    /// Ends capture and freezes the utterance for review.
    pub fn stop_capture(&mut self) -> Result<Option<String>, TransitionError> {
        if self.state != InteractionState::Listening {
            return self.reject("stop capture");
        }
        let utterance = self.transcript.stop();
        self.state = InteractionState::Reviewing;
        Ok(utterance)
    }

    /// Chooses the machine the next dispatch goes to.
    pub fn select_target(&mut self, machine_name: impl Into<String>) {
        self.target_machine = Some(machine_name.into());
    }

    /// Starts a dispatch of the reviewed utterance.
    ///
    /// At most one dispatch is in flight per interaction; a second `send`
    /// while sending or executing is rejected and changes nothing.
    pub fn begin_send(&mut self) -> Result<DispatchTicket, TransitionError> {
        if self.state.is_in_flight() {
            return Err(TransitionError::DispatchInFlight);
        }
        if self.state != InteractionState::Reviewing {
            return self.reject("send");
        }
        let utterance = self
            .transcript
            .utterance()
            .ok_or(TransitionError::EmptyUtterance)?
            .to_string();
        let target_machine = self
            .target_machine
            .clone()
            .ok_or(TransitionError::NoTarget)?;
        self.state = InteractionState::Sending;
        info!(generation = self.generation, target = %target_machine, "Sending utterance");
        Ok(DispatchTicket {
            generation: self.generation,
            utterance,
            target_machine,
        })
    }

    /// The command was submitted; execution frames are now accepted.
    ///
    /// Frames held while sending are logged first, in the order they came.
    pub fn dispatch_accepted(&mut self, generation: u64, command: Command) -> Applied {
        if generation != self.generation || self.state != InteractionState::Sending {
            debug!(generation, current = self.generation, "Discarding stale dispatch result");
            return Applied::Stale;
        }
        self.command = Some(command);
        self.state = InteractionState::Executing;
        for raw in std::mem::take(&mut self.held) {
            if self.state != InteractionState::Executing {
                break;
            }
            self.record(raw);
        }
        Applied::Accepted
    }

    /// Translation or submission failed; the cycle ends in `Errored`.
    pub fn dispatch_failed(&mut self, generation: u64, error: &Error) -> Applied {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Discarding stale dispatch failure");
            return Applied::Stale;
        }
        warn!(%error, "Interaction errored");
        if !self.held.is_empty() {
            debug!(frames = self.held.len(), "Dropping frames held for a failed dispatch");
            self.held.clear();
        }
        self.error = Some(error.to_string());
        self.state = InteractionState::Errored;
        Applied::Accepted
    }

    /// Offers an inbound frame to the execution log.
    pub fn on_frame(&mut self, raw: Value) -> LogOutcome {
        match self.state {
            InteractionState::Executing => self.record(raw),
            InteractionState::Sending => {
                self.held.push(raw);
                LogOutcome::Held
            }
            _ => LogOutcome::Ignored,
        }
    }

    /// Appends a frame and finishes execution once every batch of the
    /// command has reported. Without a batch count only the operator can
    /// finish it.
    fn record(&mut self, raw: Value) -> LogOutcome {
        if self.log.append(raw).kind != EventKind::CommandComplete {
            return LogOutcome::Appended;
        }
        self.completions += 1;
        let expected = self.command.as_ref().and_then(Command::expected_completions);
        match expected {
            Some(expected) if self.completions >= expected => {
                self.state = InteractionState::Completed;
                info!(events = self.log.len(), batches = expected, "Machine reported completion");
                LogOutcome::Completed
            }
            _ => {
                debug!(completions = self.completions, ?expected, "Batch finished");
                LogOutcome::Appended
            }
        }
    }

    /// The operator declares the execution finished.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        if self.state != InteractionState::Executing {
            return self.reject("complete");
        }
        self.state = InteractionState::Completed;
        Ok(())
    }

    /// Completes the interaction (if still executing) and prepares a report
    /// from the first logged frame.
    pub fn begin_report(&mut self) -> Result<ReportTicket, TransitionError> {
        match self.state {
            InteractionState::Executing | InteractionState::Completed => {}
            _ => return self.reject("create report"),
        }
        if self.report_pending {
            return Err(TransitionError::ReportInFlight);
        }
        let machine_name = self
            .command
            .as_ref()
            .map(|c| c.target_machine.clone())
            .or_else(|| self.target_machine.clone())
            .ok_or(TransitionError::NoTarget)?;
        self.state = InteractionState::Completed;
        let entry = report_entry(&self.log).map_err(|e| {
            warn!(error = %e, "Report skipped");
            TransitionError::Unreportable(e.to_string())
        })?;
        self.report_pending = true;
        Ok(ReportTicket {
            generation: self.generation,
            machine_name,
            entry,
        })
    }

    pub fn report_stored(&mut self, generation: u64, report: ReportRef) -> Applied {
        if generation != self.generation {
            return Applied::Stale;
        }
        self.report_pending = false;
        self.error = None;
        self.report = Some(report);
        Applied::Accepted
    }

    /// Persistence failed. The log stays intact so the operator can retry.
    pub fn report_failed(&mut self, generation: u64, error: &Error) -> Applied {
        if generation != self.generation {
            return Applied::Stale;
        }
        self.report_pending = false;
        self.error = Some(error.to_string());
        Applied::Accepted
    }

    /// Returns to `Idle` from any state, discarding the whole cycle.
    pub fn reset(&mut self) {
        self.clear_cycle();
        self.state = InteractionState::Idle;
        debug!(generation = self.generation, "Interaction reset");
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn transcript(&self) -> &TranscriptState {
        self.transcript.state()
    }

    pub fn utterance(&self) -> Option<&str> {
        self.transcript.utterance()
    }

    pub fn is_input_enabled(&self) -> bool {
        self.transcript.is_input_enabled()
    }

    pub fn target_machine(&self) -> Option<&str> {
        self.target_machine.as_deref()
    }

    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn report(&self) -> Option<&ReportRef> {
        self.report.as_ref()
    }

    pub fn is_report_pending(&self) -> bool {
        self.report_pending
    }
}
