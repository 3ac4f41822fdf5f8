//! Fake dispatcher for tests and dry runs.
//!
//! Records every request without touching the network. Replies come from
//! one-shot queued results first, then per-name responders, then `200 null`.

use super::registry::{self, ResolvedRequest};
use super::{AjaxRequest, AjaxResponse, Dispatcher};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use wizard_error::{RequestError, RequestResult};

type Responder = Arc<dyn Fn(&AjaxRequest) -> RequestResult<AjaxResponse> + Send + Sync>;

/// A request as the fake saw it, after cluster-name injection.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub name: String,
    pub data: Map<String, Value>,
    pub resolved: ResolvedRequest,
}

impl RecordedRequest {
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[derive(Default)]
struct FakeState {
    requests: Vec<RecordedRequest>,
    responders: HashMap<String, Responder>,
    queued: HashMap<String, VecDeque<RequestResult<AjaxResponse>>>,
    cluster_name: Option<String>,
}

#[derive(Clone, Default)]
pub struct FakeDispatcher {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_name(self, name: impl Into<String>) -> Self {
        self.lock().cluster_name = Some(name.into());
        self
    }

    /// Server-side requests report COMPLETED on the first poll.
    pub fn with_completed_requests(self) -> Self {
        self.respond_ok(
            "background_operations.get_by_request",
            json!({"Requests": {"request_status": "COMPLETED", "progress_percent": 100.0}}),
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn respond_with<F>(&self, name: &str, responder: F)
    where
        F: Fn(&AjaxRequest) -> RequestResult<AjaxResponse> + Send + Sync + 'static,
    {
        self.lock()
            .responders
            .insert(name.to_string(), Arc::new(responder));
    }

    pub fn respond_ok(&self, name: &str, body: Value) {
        self.respond_with(name, move |_| Ok(AjaxResponse::ok(body.clone())));
    }

    pub fn fail_with(&self, name: &str, status: u16, body: &str) {
        let body = body.to_string();
        let request_name = name.to_string();
        self.respond_with(name, move |_| {
            Err(RequestError::Status {
                method: "FAKE".to_string(),
                url: request_name.clone(),
                status,
                body: body.clone(),
            })
        });
    }

    /// Queues a one-shot result consumed before any responder.
    pub fn enqueue(&self, name: &str, result: RequestResult<AjaxResponse>) {
        self.lock()
            .queued
            .entry(name.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn requests_named(&self, name: &str) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn send(&self, mut request: AjaxRequest) -> RequestResult<AjaxResponse> {
        let responder = {
            let mut state = self.lock();
            if !request.data.contains_key("clusterName") {
                if let Some(name) = &state.cluster_name {
                    request
                        .data
                        .insert("clusterName".to_string(), Value::String(name.clone()));
                }
            }
            let resolved = registry::resolve(&request)?;
            state.requests.push(RecordedRequest {
                name: request.name.clone(),
                data: request.data.clone(),
                resolved,
            });
            if let Some(result) = state
                .queued
                .get_mut(&request.name)
                .and_then(VecDeque::pop_front)
            {
                return result;
            }
            state.responders.get(&request.name).cloned()
        };
        match responder {
            Some(respond) => respond(&request),
            None => Ok(AjaxResponse::ok(Value::Null)),
        }
    }
}
