use std::io;
use thiserror::Error;

pub type RequestResult<T> = Result<T, RequestError>;
pub type WizardResult<T> = Result<T, WizardError>;

/// Exception class the server names when a deleted resource is already gone.
pub const NO_SUCH_RESOURCE: &str = "org.apache.ambari.server.controller.spi.NoSuchResourceException";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Unknown request name: {0}")]
    UnknownRequest(String),

    #[error("{method} {url} failed with status {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{method} {url} timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        url: String,
        timeout_ms: u64,
    },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response text, when the server answered at all.
    pub fn response_text(&self) -> Option<&str> {
        match self {
            RequestError::Status { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn mentions(&self, needle: &str) -> bool {
        self.response_text()
            .map(|text| text.contains(needle))
            .unwrap_or(false)
    }

    /// True when the server reports the target resource no longer exists.
    pub fn is_missing_resource(&self) -> bool {
        self.mentions(NO_SUCH_RESOURCE)
    }
}

#[derive(Error, Debug)]
pub enum WizardError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Wizard {wizard} is missing required data: {key}")]
    MissingData { wizard: String, key: String },

    #[error("Step {step} could not be loaded: {reason}")]
    StepLoad { step: usize, reason: String },

    #[error("Server request {request_id} finished as {status}")]
    RequestFailed { request_id: u64, status: String },

    #[error("Unexpected response for {request}: {reason}")]
    UnexpectedResponse { request: String, reason: String },

    #[error("No failed task to retry")]
    NothingToRetry,

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("{0}")]
    Other(String),
}

impl WizardError {
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            WizardError::Request(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16, body: &str) -> RequestError {
        RequestError::Status {
            method: "DELETE".to_string(),
            url: "/api/v1/clusters/c1".to_string(),
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn missing_resource_is_detected_from_response_text() {
        let err = status_error(
            404,
            "{\"message\":\"org.apache.ambari.server.controller.spi.NoSuchResourceException: gone\"}",
        );
        assert!(err.is_missing_resource());
        assert!(!status_error(500, "Server Error").is_missing_resource());
    }

    #[test]
    fn timeouts_carry_no_status() {
        let err = RequestError::Timeout {
            method: "GET".to_string(),
            url: "/api/v1/clusters".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.status(), None);
        assert!(!err.is_conflict());
        assert!(status_error(409, "").is_conflict());
    }

    #[test]
    fn wizard_error_exposes_request_error() {
        let err: WizardError = status_error(500, "boom").into();
        assert_eq!(err.request_error().and_then(RequestError::status), Some(500));
        assert!(err.to_string().contains("boom"));
    }
}
