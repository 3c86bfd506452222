//! Contracts for the external collaborators of an operator session.
//!
//! Each trait has a network implementation in the operator service and is
//! mocked in tests, so the session logic never depends on a live backend.

use crate::command::Command;
use crate::error::Error;
use crate::identity::OperatorIdentity;
use crate::report::{ReportDetail, ReportRef, ReportSummary};
use async_trait::async_trait;
use serde_json::Value;

/// Turns free-text intent into a structured command.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandTranslator: Send + Sync {
    /// Translates `user_intent`. Failures are [`Error::Translation`].
    async fn translate(&self, user_intent: &str) -> Result<Value, Error>;
}

/// Delivers a command to its target machine.
///
/// Implementations exist for the session channel and for the REST side
/// route; both are the same logical action.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Submits `command`. Failures are [`Error::Dispatch`].
    async fn submit(&self, operator: &OperatorIdentity, command: &Command) -> Result<(), Error>;
}

/// Durable storage for execution reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Stores a report generated from `entry`. Failures are [`Error::Persistence`].
    async fn generate(
        &self,
        operator: &OperatorIdentity,
        machine_name: &str,
        entry: &Value,
    ) -> Result<ReportRef, Error>;

    /// Lists the operator's reports, newest first.
    async fn list(&self, operator: &OperatorIdentity) -> Result<Vec<ReportSummary>, Error>;

    /// Fetches one report.
    async fn get(&self, operator: &OperatorIdentity, report_id: &str)
    -> Result<ReportDetail, Error>;
}
