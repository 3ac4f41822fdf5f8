//! Waiting on server-side requests.
//!
//! Commands that start long-running work get a request id back. The command
//! is not done until that request reaches a terminal state.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use wizard_core::ajax::{AjaxRequest, Dispatcher};
use wizard_error::{WizardError, WizardResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Queued,
    InProgress,
    Completed,
    Failed,
    Aborted,
    TimedOut,
}

impl RequestState {
    pub fn parse(raw: &str) -> Option<Self> {
        let state = match raw {
            "PENDING" => RequestState::Pending,
            "QUEUED" => RequestState::Queued,
            "IN_PROGRESS" => RequestState::InProgress,
            "COMPLETED" => RequestState::Completed,
            "FAILED" => RequestState::Failed,
            "ABORTED" => RequestState::Aborted,
            "TIMEDOUT" => RequestState::TimedOut,
            _ => return None,
        };
        Some(state)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Pending => "PENDING",
            RequestState::Queued => "QUEUED",
            RequestState::InProgress => "IN_PROGRESS",
            RequestState::Completed => "COMPLETED",
            RequestState::Failed => "FAILED",
            RequestState::Aborted => "ABORTED",
            RequestState::TimedOut => "TIMEDOUT",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RequestState::Failed | RequestState::Aborted | RequestState::TimedOut
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestSnapshot {
    pub request_id: u64,
    pub state: RequestState,
    pub progress: u8,
}

impl RequestSnapshot {
    pub fn from_body(request_id: u64, body: &Value) -> WizardResult<Self> {
        let requests = body.get("Requests").ok_or_else(|| WizardError::UnexpectedResponse {
            request: "background_operations.get_by_request".to_string(),
            reason: format!("request {} has no Requests block", request_id),
        })?;
        let raw = requests
            .get("request_status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let state = RequestState::parse(raw).ok_or_else(|| WizardError::UnexpectedResponse {
            request: "background_operations.get_by_request".to_string(),
            reason: format!("unknown request_status {:?}", raw),
        })?;
        let progress = requests
            .get("progress_percent")
            .and_then(Value::as_f64)
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(0);
        Ok(Self {
            request_id,
            state,
            progress,
        })
    }
}

#[async_trait]
pub trait Pollable: Send {
    fn dispatcher(&self) -> &dyn Dispatcher;

    fn poll_interval(&self) -> Duration;

    fn on_poll_progress(&mut self, _percent: u8) {}

    /// Polls until the request completes; failure states become errors.
    async fn poll_request(&mut self, request_id: u64) -> WizardResult<()> {
        loop {
            let response = self
                .dispatcher()
                .send(
                    AjaxRequest::new("background_operations.get_by_request")
                        .with("requestId", request_id),
                )
                .await?;
            let snapshot = RequestSnapshot::from_body(request_id, &response.body)?;
            self.on_poll_progress(snapshot.progress);

            if snapshot.state == RequestState::Completed {
                log::debug!("Request {} completed", request_id);
                return Ok(());
            }
            if snapshot.state.is_failure() {
                log::error!("Request {} finished as {}", request_id, snapshot.state.as_str());
                return Err(WizardError::RequestFailed {
                    request_id,
                    status: snapshot.state.as_str().to_string(),
                });
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}
