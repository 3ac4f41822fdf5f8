//! Request dispatching by symbolic name.
//!
//! Commands never build URLs themselves: they name a registry entry and pass
//! a data map. The registry turns that into method, URL and body; a
//! [`Dispatcher`] implementation performs the call.

pub mod fake;
pub mod http;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use wizard_error::RequestResult;

pub use fake::{FakeDispatcher, RecordedRequest};
pub use http::HttpDispatcher;
pub use registry::{Endpoint, Method, ResolvedRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct AjaxRequest {
    pub name: String,
    pub data: Map<String, Value>,
}

impl AjaxRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Map::new(),
        }
    }

    /// Adds one data entry. Values that fail to serialize are stored as null.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AjaxResponse {
    pub status: u16,
    pub body: Value,
}

impl AjaxResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// `Requests.id` of a server-side request started by this call, if any.
    pub fn request_id(&self) -> Option<u64> {
        self.body
            .get("Requests")
            .and_then(|r| r.get("id"))
            .and_then(Value::as_u64)
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, request: AjaxRequest) -> RequestResult<AjaxResponse>;
}
