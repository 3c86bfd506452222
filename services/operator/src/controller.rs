//! The operator session's single owner of state.
//!
//! One task runs [`Controller::run`]. It is the only mutator of the
//! interaction session and the machine registry: channel events, operator
//! actions and results of spawned network calls all arrive on channels and
//! are applied in order. After each step a fresh [`SessionSnapshot`] is
//! published for presentation.

use crate::channel::{ChannelEvent, ChannelEvents, ChannelState, SessionChannel};
use serde::Serialize;
use sticktator_core::command::Command;
use sticktator_core::dispatcher::CommandDispatcher;
use sticktator_core::error::Error;
use sticktator_core::execution::ExecutionEvent;
use sticktator_core::identity::OperatorIdentity;
use sticktator_core::interaction::{
    Applied, DispatchTicket, InteractionSession, InteractionState, LogOutcome, ReportTicket,
};
use sticktator_core::machine::Machine;
use sticktator_core::protocol::{InboundFrame, OutboundFrame};
use sticktator_core::registry::MachineRegistry;
use sticktator_core::report::{ReportFinalizer, ReportRef};
use sticktator_core::transcript::{RecognitionResult, SpeechCapability, TranscriptState};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// Something the operator asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorAction {
    /// Ask the backend for a fresh machine snapshot.
    RefreshMachines,
    SelectMachine(String),
    StartCapture,
    /// A recognizer event: the full result list for the current capture.
    Recognized(Vec<RecognitionResult>),
    StopCapture,
    Send,
    /// The operator declares the command finished.
    Complete,
    CreateReport,
    Reset,
    Shutdown,
}

/// Result of a network call spawned by the controller.
#[derive(Debug)]
pub enum Completion {
    Dispatched {
        generation: u64,
        result: Result<Command, Error>,
    },
    ReportStored {
        generation: u64,
        result: Result<ReportRef, Error>,
    },
}

/// Everything the presentation layer needs, as one immutable value.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub state: InteractionState,
    pub channel: ChannelState,
    pub input_enabled: bool,
    pub transcript: TranscriptState,
    pub utterance: Option<String>,
    pub target_machine: Option<String>,
    /// `None` while the registry is stale.
    pub machines: Option<Vec<Machine>>,
    pub registry_error: Option<String>,
    pub log: Vec<ExecutionEvent>,
    pub last_error: Option<String>,
    pub report: Option<ReportRef>,
    pub report_pending: bool,
    /// Why the most recent operator action was refused.
    pub notice: Option<String>,
}

pub struct Controller {
    operator: OperatorIdentity,
    session: InteractionSession,
    registry: MachineRegistry,
    channel: SessionChannel,
    dispatcher: CommandDispatcher,
    finalizer: ReportFinalizer,
    completions: mpsc::UnboundedSender<Completion>,
    snapshots: watch::Sender<SessionSnapshot>,
    notice: Option<String>,
}

impl Controller {
    pub fn new(
        operator: OperatorIdentity,
        capability: SpeechCapability,
        channel: SessionChannel,
        dispatcher: CommandDispatcher,
        finalizer: ReportFinalizer,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completions, completions_rx) = mpsc::unbounded_channel();
        let session = InteractionSession::new(capability);
        let registry = MachineRegistry::new(operator.id.clone());
        let (snapshots, _) = watch::channel(SessionSnapshot {
            generation: session.generation(),
            state: session.state(),
            channel: channel.state(),
            input_enabled: session.is_input_enabled(),
            transcript: TranscriptState::default(),
            utterance: None,
            target_machine: None,
            machines: None,
            registry_error: None,
            log: Vec::new(),
            last_error: None,
            report: None,
            report_pending: false,
            notice: None,
        });
        (
            Self {
                operator,
                session,
                registry,
                channel,
                dispatcher,
                finalizer,
                completions,
                snapshots,
                notice: None,
            },
            completions_rx,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Preselects a target machine before the loop starts.
    pub fn with_target(mut self, machine_name: Option<String>) -> Self {
        if let Some(name) = machine_name {
            self.session.select_target(name);
        }
        self
    }

    #[instrument(name = "controller", skip_all, fields(operator = %self.operator.id))]
    pub async fn run(
        mut self,
        mut events: ChannelEvents,
        mut actions: mpsc::Receiver<OperatorAction>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!("Operator session started");
        self.publish();
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.on_channel_event(event),
                Some(done) = completions.recv() => self.on_completion(done),
                action = actions.recv() => match action {
                    Some(OperatorAction::Shutdown) | None => break,
                    Some(action) => self.on_action(action),
                },
            }
            self.publish();
        }
        self.channel.close();
        self.registry.clear();
        self.publish();
        info!("Operator session finished");
    }

    pub fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => self.registry.on_channel_open(),
            ChannelEvent::Lost => self.registry.on_channel_lost(),
            ChannelEvent::Failed(error) => {
                debug!(%error, "Channel transport error");
                self.registry.on_channel_error();
            }
            ChannelEvent::Frame(raw) => {
                match InboundFrame::decode(&raw) {
                    Ok(frame) => {
                        self.registry.apply(&frame);
                    }
                    Err(e) => warn!(error = %e, "Registry skipping frame"),
                }
                match self.session.on_frame(raw) {
                    LogOutcome::Completed => info!("Execution finished"),
                    LogOutcome::Held => debug!("Holding frame until dispatch is acknowledged"),
                    LogOutcome::Appended | LogOutcome::Ignored => {}
                }
            }
        }
    }

    pub fn on_action(&mut self, action: OperatorAction) {
        self.notice = None;
        let outcome = match action {
            OperatorAction::RefreshMachines => {
                let frame = OutboundFrame::GetMachines {
                    email: self.operator.display_email.clone(),
                };
                if self.channel.send(&frame) {
                    Ok(())
                } else {
                    Err(format!("session channel is {}", self.channel.state()))
                }
            }
            OperatorAction::SelectMachine(name) => self.select_machine(name),
            OperatorAction::StartCapture => self.session.start_capture().map_err(|e| e.to_string()),
            OperatorAction::Recognized(results) => {
                if !self.session.on_transcript(&results) {
                    debug!("Recognizer result outside capture ignored");
                }
                Ok(())
            }
            OperatorAction::StopCapture => match self.session.stop_capture() {
                Ok(Some(_)) => Ok(()),
                Ok(None) => Err("nothing was captured".to_string()),
                Err(e) => Err(e.to_string()),
            },
            OperatorAction::Send => self
                .session
                .begin_send()
                .map(|ticket| self.spawn_dispatch(ticket))
                .map_err(|e| e.to_string()),
            OperatorAction::Complete => self.session.complete().map_err(|e| e.to_string()),
            OperatorAction::CreateReport => self
                .session
                .begin_report()
                .map(|ticket| self.spawn_report(ticket))
                .map_err(|e| e.to_string()),
            OperatorAction::Reset => {
                self.session.reset();
                Ok(())
            }
            OperatorAction::Shutdown => Ok(()),
        };
        if let Err(notice) = outcome {
            debug!(%notice, "Action refused");
            self.notice = Some(notice);
        }
    }

    fn select_machine(&mut self, name: String) -> Result<(), String> {
        match self.registry.current() {
            Some(machines) if !machines.iter().any(|m| m.name == name) => {
                Err(format!("no machine named '{}'", name))
            }
            _ => {
                self.session.select_target(name);
                Ok(())
            }
        }
    }

    pub fn on_completion(&mut self, completion: Completion) {
        let applied = match completion {
            Completion::Dispatched {
                generation,
                result: Ok(command),
            } => self.session.dispatch_accepted(generation, command),
            Completion::Dispatched {
                generation,
                result: Err(e),
            } => self.session.dispatch_failed(generation, &e),
            Completion::ReportStored {
                generation,
                result: Ok(report),
            } => self.session.report_stored(generation, report),
            Completion::ReportStored {
                generation,
                result: Err(e),
            } => self.session.report_failed(generation, &e),
        };
        if applied == Applied::Stale {
            debug!("Discarded result from an earlier interaction");
        }
    }

    fn spawn_dispatch(&self, ticket: DispatchTicket) {
        let dispatcher = self.dispatcher.clone();
        let operator = self.operator.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = dispatcher
                .dispatch(&operator, &ticket.utterance, &ticket.target_machine)
                .await;
            let _ = completions.send(Completion::Dispatched {
                generation: ticket.generation,
                result,
            });
        });
    }

    fn spawn_report(&self, ticket: ReportTicket) {
        let finalizer = self.finalizer.clone();
        let operator = self.operator.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = finalizer
                .submit(&operator, &ticket.machine_name, &ticket.entry)
                .await;
            let _ = completions.send(Completion::ReportStored {
                generation: ticket.generation,
                result,
            });
        });
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.session.generation(),
            state: self.session.state(),
            channel: self.channel.state(),
            input_enabled: self.session.is_input_enabled(),
            transcript: self.session.transcript().clone(),
            utterance: self.session.utterance().map(str::to_string),
            target_machine: self.session.target_machine().map(str::to_string),
            machines: self.registry.current().map(<[Machine]>::to_vec),
            registry_error: self.registry.error().map(str::to_string),
            log: self.session.log().events().to_vec(),
            last_error: self.session.error().map(str::to_string),
            report: self.session.report().cloned(),
            report_pending: self.session.is_report_pending(),
            notice: self.notice.clone(),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}
