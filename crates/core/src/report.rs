//! Report finalization and report history types.

use crate::error::Error;
use crate::execution::ExecutionLog;
use crate::identity::OperatorIdentity;
use crate::services::ReportStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Where a stored report can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRef {
    #[serde(default, alias = "reportId", alias = "report_id")]
    pub id: Option<String>,
    pub url: String,
}

impl ReportRef {
    /// The identifier a history view navigates to.
    pub fn navigable_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.url)
    }
}

/// One entry of the operator's report history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    #[serde(alias = "_id")]
    pub id: String,
    pub machine_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

/// A stored report, including where its markdown body lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDetail {
    pub machine_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    pub markdown_report_s3_url: String,
}

/// Extracts the payload a report is generated from: the first logged frame.
///
/// Devices sometimes deliver the frame as a JSON-encoded string, which is
/// decoded here. Anything that is not an object is a parse error.
pub fn report_entry(log: &ExecutionLog) -> Result<Value, Error> {
    let first = log
        .first()
        .ok_or_else(|| Error::Parse("execution log is empty".to_string()))?;
    match &first.payload {
        Value::Object(_) => Ok(first.payload.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) => Err(Error::Parse("first log entry is not an object".to_string())),
            Err(e) => Err(Error::Parse(format!("first log entry is not JSON: {e}"))),
        },
        _ => Err(Error::Parse("first log entry is not an object".to_string())),
    }
}

/// Submits finished interactions to the report store.
#[derive(Clone)]
pub struct ReportFinalizer {
    store: Arc<dyn ReportStore>,
}

impl ReportFinalizer {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    /// Persists a report built from an already extracted entry.
    pub async fn submit(
        &self,
        operator: &OperatorIdentity,
        machine_name: &str,
        entry: &Value,
    ) -> Result<ReportRef, Error> {
        match self.store.generate(operator, machine_name, entry).await {
            Ok(report) => {
                info!(machine = %machine_name, report = %report.navigable_id(), "Report stored");
                Ok(report)
            }
            Err(e) => {
                warn!(machine = %machine_name, error = %e, "Report could not be stored");
                Err(e)
            }
        }
    }

    /// Extracts the first log entry and persists it.
    pub async fn finalize(
        &self,
        operator: &OperatorIdentity,
        machine_name: &str,
        log: &ExecutionLog,
    ) -> Result<ReportRef, Error> {
        let entry = report_entry(log)?;
        self.submit(operator, machine_name, &entry).await
    }

    pub async fn history(&self, operator: &OperatorIdentity) -> Result<Vec<ReportSummary>, Error> {
        self.store.list(operator).await
    }

    pub async fn detail(
        &self,
        operator: &OperatorIdentity,
        report_id: &str,
    ) -> Result<ReportDetail, Error> {
        self.store.get(operator, report_id).await
    }
}
