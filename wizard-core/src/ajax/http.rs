use super::registry::{self, Method};
use super::{AjaxRequest, AjaxResponse, Dispatcher};
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;
use wizard_error::{RequestError, RequestResult};

/// Dispatcher that talks to a live cluster-management server.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    api_root: String,
    cluster_name: Option<String>,
    requested_by: String,
    default_timeout_ms: u64,
}

impl HttpDispatcher {
    pub fn new(cfg: &ServerConfig) -> Result<Self> {
        let base = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid server base url {:?}", cfg.base_url))?;
        let client = reqwest::Client::builder()
            .user_agent("ambari-wizard/0.3")
            .build()
            .context("failed to build HTTP client")?;
        let api_root = format!(
            "{}{}",
            base.as_str().trim_end_matches('/'),
            cfg.api_prefix.trim_end_matches('/')
        );
        Ok(Self {
            client,
            api_root,
            cluster_name: cfg.cluster_name.clone(),
            requested_by: cfg.requested_by.clone(),
            default_timeout_ms: cfg.timeout_ms,
        })
    }

    pub fn set_cluster_name(&mut self, name: impl Into<String>) {
        self.cluster_name = Some(name.into());
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn url_for(&self, path: &str) -> RequestResult<Url> {
        let raw = format!("{}{}", self.api_root, path);
        Url::parse(&raw).map_err(|e| RequestError::Transport {
            url: raw.clone(),
            message: e.to_string(),
        })
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn transport_error(method: Method, url: &Url, timeout_ms: u64, err: reqwest::Error) -> RequestError {
    if err.is_timeout() {
        RequestError::Timeout {
            method: method.to_string(),
            url: url.to_string(),
            timeout_ms,
        }
    } else {
        RequestError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, mut request: AjaxRequest) -> RequestResult<AjaxResponse> {
        if !request.data.contains_key("clusterName") {
            if let Some(name) = &self.cluster_name {
                request
                    .data
                    .insert("clusterName".to_string(), Value::String(name.clone()));
            }
        }

        let resolved = registry::resolve(&request)?;
        let url = self.url_for(&resolved.path)?;
        let timeout_ms = resolved.timeout_ms.unwrap_or(self.default_timeout_ms);
        log::debug!("{} {} [{}]", resolved.method, url, resolved.name);

        let mut builder = self
            .client
            .request(reqwest_method(resolved.method), url.clone())
            .timeout(Duration::from_millis(timeout_ms))
            .header("X-Requested-By", self.requested_by.as_str());
        if let Some(body) = &resolved.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(resolved.method, &url, timeout_ms, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(resolved.method, &url, timeout_ms, e))?;

        if !status.is_success() {
            log::warn!(
                "{} {} [{}] returned {}",
                resolved.method,
                url,
                resolved.name,
                status.as_u16()
            );
            return Err(RequestError::Status {
                method: resolved.method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| RequestError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?
        };
        Ok(AjaxResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn dispatcher_for(server: &MockServer, timeout_ms: u64) -> HttpDispatcher {
        let cfg = ServerConfig {
            base_url: server.base_url(),
            cluster_name: Some("c1".to_string()),
            timeout_ms,
            ..ServerConfig::default()
        };
        HttpDispatcher::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn delete_uses_default_cluster_name_and_header() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/api/v1/clusters/c1/hosts/host1/host_components/C1")
                    .header("X-Requested-By", "ambari");
                then.status(200);
            })
            .await;

        let dispatcher = dispatcher_for(&server, 1_000);
        let response = dispatcher
            .send(
                AjaxRequest::new("common.delete.host_component")
                    .with("hostName", "host1")
                    .with("componentName", "C1"),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.body, Value::Null);
    }

    #[tokio::test]
    async fn error_status_keeps_response_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/mpacks");
                then.status(409).body("{\"message\":\"already exists\"}");
            })
            .await;

        let dispatcher = dispatcher_for(&server, 1_000);
        let err = dispatcher
            .send(AjaxRequest::new("mpack.download").with("url", "http://repo/m.json"))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(err.mentions("already exists"));
    }

    #[tokio::test]
    async fn body_is_posted_as_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/mpacks")
                    .json_body(json!({"MpackInfo": {"mpack_uri": "http://repo/m.json"}}));
                then.status(201).json_body(json!({"id": 3}));
            })
            .await;

        let dispatcher = dispatcher_for(&server, 1_000);
        let response = dispatcher
            .send(AjaxRequest::new("mpack.download").with("url", "http://repo/m.json"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 201);
        assert_eq!(response.body["id"], 3);
    }

    #[tokio::test]
    async fn slow_server_maps_to_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/clusters/c1");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({}));
            })
            .await;

        let dispatcher = dispatcher_for(&server, 50);
        let err = dispatcher
            .send(AjaxRequest::new("config.tags"))
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Timeout { timeout_ms: 50, .. }));
    }

    #[tokio::test]
    async fn unknown_request_never_reaches_the_server() {
        let server = MockServer::start_async().await;
        let dispatcher = dispatcher_for(&server, 1_000);
        let err = dispatcher
            .send(AjaxRequest::new("not.registered"))
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::UnknownRequest("not.registered".to_string()));
    }
}
