//! REST client for the backend's translation, dispatch and report routes.
//!
//! Every route answers with a `{status, message?, data?}` envelope. A
//! `status: false` envelope, a non-2xx response, or a network failure all
//! map to the error class of the calling operation.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sticktator_core::command::Command;
use sticktator_core::error::Error;
use sticktator_core::identity::OperatorIdentity;
use sticktator_core::report::{ReportDetail, ReportRef, ReportSummary};
use sticktator_core::services::{CommandSink, CommandTranslator, ReportStore};
use std::time::Duration;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Option<T>, String> {
        if self.status {
            Ok(self.data)
        } else {
            Err(self
                .message
                .unwrap_or_else(|| "backend reported failure".to_string()))
        }
    }
}

/// Decodes an envelope body, taking the HTTP status into account.
fn open_envelope<T: DeserializeOwned>(http_ok: bool, status: &str, body: &str) -> Result<Option<T>, String> {
    match serde_json::from_str::<Envelope<T>>(body) {
        Ok(envelope) if http_ok => envelope.into_data(),
        Ok(envelope) => Err(envelope
            .message
            .unwrap_or_else(|| format!("backend returned {}", status))),
        Err(_) if !http_ok => Err(format!("backend returned {}: {}", status, body.trim())),
        Err(e) => Err(format!("unexpected response body: {}", e)),
    }
}

/// Backend REST API bound to one base URL (`http(s)://<host>/api/v1/`).
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    api_base: Url,
}

impl HttpBackend {
    pub fn new(api_base: &str) -> Result<Self, Error> {
        let api_base = Url::parse(api_base)
            .map_err(|e| Error::Transport(format!("invalid API base '{}': {}", api_base, e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client, api_base })
    }

    /// Appends percent-encoded path segments to the base URL.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| format!("'{}' cannot be a base URL", self.api_base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, String> {
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        debug!(%status, bytes = body.len(), "Backend responded");
        open_envelope(status.is_success(), &status.to_string(), &body)
    }
}

#[async_trait]
impl CommandTranslator for HttpBackend {
    #[instrument(skip(self))]
    async fn translate(&self, user_intent: &str) -> Result<Value, Error> {
        let url = self
            .endpoint(&["machines", "get-commands"])
            .map_err(Error::Translation)?;
        let request = self
            .client
            .post(url)
            .json(&json!({ "user_intent": user_intent }));
        self.call::<Value>(request)
            .await
            .map_err(Error::Translation)?
            .ok_or_else(|| Error::Translation("response carried no command".to_string()))
    }
}

/// Submits through `POST machines/send_message/<operator>`.
#[async_trait]
impl CommandSink for HttpBackend {
    async fn submit(&self, operator: &OperatorIdentity, command: &Command) -> Result<(), Error> {
        let url = self
            .endpoint(&["machines", "send_message", &operator.id])
            .map_err(Error::Dispatch)?;
        let request = self.client.post(url).json(&command.execute_payload());
        self.call::<Value>(request).await.map_err(Error::Dispatch)?;
        Ok(())
    }
}

#[async_trait]
impl ReportStore for HttpBackend {
    async fn generate(
        &self,
        operator: &OperatorIdentity,
        machine_name: &str,
        entry: &Value,
    ) -> Result<ReportRef, Error> {
        let url = self
            .endpoint(&["report", "generate-report", &operator.id, machine_name])
            .map_err(Error::Persistence)?;
        self.call::<ReportRef>(self.client.post(url).json(entry))
            .await
            .map_err(Error::Persistence)?
            .ok_or_else(|| Error::Persistence("response carried no report location".to_string()))
    }

    async fn list(&self, operator: &OperatorIdentity) -> Result<Vec<ReportSummary>, Error> {
        let url = self
            .endpoint(&["report", "reports", &operator.id])
            .map_err(Error::Persistence)?;
        let reports = self
            .call::<Vec<ReportSummary>>(self.client.get(url))
            .await
            .map_err(Error::Persistence)?;
        Ok(reports.unwrap_or_default())
    }

    async fn get(&self, operator: &OperatorIdentity, report_id: &str) -> Result<ReportDetail, Error> {
        let url = self
            .endpoint(&["report", "reports", &operator.id, report_id])
            .map_err(Error::Persistence)?;
        self.call::<ReportDetail>(self.client.get(url))
            .await
            .map_err(Error::Persistence)?
            .ok_or_else(|| Error::Persistence(format!("report '{}' not found", report_id)))
    }
}
