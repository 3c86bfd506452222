pub mod command;
pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod identity;
pub mod interaction;
pub mod machine;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod services;
pub mod transcript;

pub use command::Command;
pub use dispatcher::CommandDispatcher;
pub use error::{Error, TransitionError};
pub use execution::{EventKind, ExecutionEvent, ExecutionLog};
pub use identity::{IdentityError, OperatorIdentity};
pub use interaction::{InteractionSession, InteractionState};
pub use machine::{Machine, MachineStatus};
pub use protocol::{InboundFrame, OutboundFrame};
pub use registry::MachineRegistry;
pub use report::{ReportDetail, ReportFinalizer, ReportRef, ReportSummary};
pub use transcript::{RecognitionResult, SpeechCapability, TranscriptAssembler, TranscriptState};
