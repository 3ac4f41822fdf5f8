//! Named REST endpoints.
//!
//! Every request a wizard can issue is listed here once. Templates use
//! `{key}` placeholders filled from the request data; a missing or empty
//! value becomes the empty string.

use super::AjaxRequest;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use wizard_error::{RequestError, RequestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type BodyFormat = fn(&Map<String, Value>) -> Value;

#[derive(Clone, Copy)]
pub struct Endpoint {
    pub real: &'static str,
    pub method: Method,
    pub format: Option<BodyFormat>,
    /// Overrides the dispatcher's default timeout.
    pub timeout_ms: Option<u64>,
}

impl Endpoint {
    fn get(real: &'static str) -> Self {
        Self {
            real,
            method: Method::Get,
            format: None,
            timeout_ms: None,
        }
    }

    fn with_body(real: &'static str, method: Method, format: BodyFormat) -> Self {
        Self {
            real,
            method,
            format: Some(format),
            timeout_ms: None,
        }
    }

    fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("real", &self.real)
            .field("method", &self.method)
            .field("has_body", &self.format.is_some())
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub name: String,
    pub method: Method,
    /// Path relative to the API prefix, query string included.
    pub path: String,
    pub body: Option<Value>,
    pub timeout_ms: Option<u64>,
}

fn field(data: &Map<String, Value>, key: &str) -> Value {
    data.get(key).cloned().unwrap_or(Value::Null)
}

fn host_component_update_body(data: &Map<String, Value>) -> Value {
    json!({
        "RequestInfo": {
            "context": field(data, "context"),
            "operation_level": {
                "level": "HOST_COMPONENT",
                "cluster_name": field(data, "clusterName"),
                "host_name": field(data, "hostName"),
                "service_name": field(data, "serviceName"),
            }
        },
        "Body": { "HostRoles": field(data, "HostRoles") }
    })
}

fn host_components_update_body(data: &Map<String, Value>) -> Value {
    let level = data
        .get("level")
        .cloned()
        .unwrap_or_else(|| Value::String("CLUSTER".to_string()));
    json!({
        "RequestInfo": {
            "context": field(data, "context"),
            "operation_level": {
                "level": level,
                "cluster_name": field(data, "clusterName"),
            },
            "query": field(data, "query"),
        },
        "Body": { "HostRoles": field(data, "HostRoles") }
    })
}

fn passive_state_body(data: &Map<String, Value>) -> Value {
    json!({
        "RequestInfo": { "context": field(data, "requestInfo") },
        "Body": { "HostRoles": { "maintenance_state": field(data, "passive_state") } }
    })
}

fn services_update_body(data: &Map<String, Value>) -> Value {
    json!({
        "RequestInfo": {
            "context": field(data, "context"),
            "operation_level": {
                "level": "CLUSTER",
                "cluster_name": field(data, "clusterName"),
            }
        },
        "Body": { "ServiceInfo": field(data, "ServiceInfo") }
    })
}

fn create_component_body(data: &Map<String, Value>) -> Value {
    json!({
        "host_components": [
            { "HostRoles": { "component_name": field(data, "componentName") } }
        ]
    })
}

fn raw_data_body(data: &Map<String, Value>) -> Value {
    field(data, "data")
}

fn mysql_command_body(command: &str, context: &str, data: &Map<String, Value>) -> Value {
    json!({
        "RequestInfo": {
            "context": context,
            "command": command,
        },
        "Requests/resource_filters": [{
            "service_name": "HIVE",
            "component_name": "MYSQL_SERVER",
            "hosts": field(data, "host"),
        }]
    })
}

fn mysql_clean_body(data: &Map<String, Value>) -> Value {
    mysql_command_body("CLEAN", "Clean MYSQL Server", data)
}

fn mysql_configure_body(data: &Map<String, Value>) -> Value {
    mysql_command_body("CONFIGURE", "Configure MYSQL Server", data)
}

fn restart_host_components_body(data: &Map<String, Value>) -> Value {
    json!({
        "RequestInfo": {
            "command": "RESTART",
            "context": field(data, "context"),
            "operation_level": field(data, "operation_level"),
        },
        "Requests/resource_filters": field(data, "resource_filters")
    })
}

fn custom_action_body(data: &Map<String, Value>) -> Value {
    let mut request_info = json!({
        "context": "Check host",
        "action": "check_host",
        "parameters": {}
    });
    if let (Some(target), Some(Value::Object(extra))) =
        (request_info.as_object_mut(), data.get("requestInfo"))
    {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    let hosts = data
        .get("filteredHosts")
        .and_then(Value::as_array)
        .map(|hosts| {
            hosts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    json!({
        "RequestInfo": request_info,
        "Requests/resource_filters": [{ "hosts": hosts }]
    })
}

fn persist_body(data: &Map<String, Value>) -> Value {
    let key = data
        .get("key")
        .and_then(Value::as_str)
        .unwrap_or("CLUSTER_CURRENT_STATUS")
        .to_string();
    let value = field(data, "value");
    let serialized = match value {
        Value::String(s) => s,
        other => other.to_string(),
    };
    let mut body = Map::new();
    body.insert(key, Value::String(serialized));
    Value::Object(body)
}

fn mpack_download_body(data: &Map<String, Value>) -> Value {
    json!({ "MpackInfo": { "mpack_uri": field(data, "url") } })
}

pub static REGISTRY: Lazy<HashMap<&'static str, Endpoint>> = Lazy::new(|| {
    let entries = [
        (
            "common.delete.host_component",
            Endpoint {
                real: "/clusters/{clusterName}/hosts/{hostName}/host_components/{componentName}",
                method: Method::Delete,
                format: None,
                timeout_ms: None,
            },
        ),
        (
            "common.host.host_component.passive",
            Endpoint::with_body(
                "/clusters/{clusterName}/hosts/{hostName}/host_components/{componentName}",
                Method::Put,
                passive_state_body,
            ),
        ),
        (
            "common.host.host_component.update",
            Endpoint::with_body(
                "/clusters/{clusterName}/hosts/{hostName}/host_components/{componentName}?{urlParams}",
                Method::Put,
                host_component_update_body,
            ),
        ),
        (
            "common.host_components.update",
            Endpoint::with_body(
                "/clusters/{clusterName}/host_components?{urlParams}",
                Method::Put,
                host_components_update_body,
            ),
        ),
        (
            "common.services.update",
            Endpoint::with_body(
                "/clusters/{clusterName}/services?{urlParams}",
                Method::Put,
                services_update_body,
            ),
        ),
        (
            "admin.high_availability.create_component",
            Endpoint::with_body(
                "/clusters/{clusterName}/hosts?Hosts/host_name={hostName}",
                Method::Post,
                create_component_body,
            ),
        ),
        (
            "config.tags",
            Endpoint::get("/clusters/{clusterName}?fields=Clusters/desired_configs"),
        ),
        (
            "reassign.load_configs",
            Endpoint::get("/clusters/{clusterName}/configurations?{urlParams}"),
        ),
        (
            "common.across.services.configurations",
            Endpoint::with_body("/clusters/{clusterName}", Method::Put, raw_data_body),
        ),
        (
            "service.mysql.clean",
            Endpoint::with_body("/clusters/{clusterName}/requests", Method::Post, mysql_clean_body),
        ),
        (
            "service.mysql.configure",
            Endpoint::with_body(
                "/clusters/{clusterName}/requests",
                Method::Post,
                mysql_configure_body,
            ),
        ),
        (
            "restart.hostComponents",
            Endpoint::with_body(
                "/clusters/{clusterName}/requests",
                Method::Post,
                restart_host_components_body,
            ),
        ),
        (
            "cluster.custom_action.create",
            Endpoint::with_body("/clusters/{clusterName}/requests", Method::Post, custom_action_body),
        ),
        (
            "custom_action.request",
            Endpoint::get("/clusters/{clusterName}/requests/{requestId}/tasks/{taskId}"),
        ),
        (
            "background_operations.get_by_request",
            Endpoint::get(
                "/clusters/{clusterName}/requests/{requestId}?fields=Requests/request_status,Requests/progress_percent&minimal_response=true",
            ),
        ),
        (
            "cluster.load_cluster_name",
            Endpoint::get("/clusters").timeout(5000),
        ),
        (
            "cluster.state",
            Endpoint::with_body("/persist", Method::Post, persist_body),
        ),
        ("persist.get", Endpoint::get("/persist/{key}")),
        (
            "wizard.stacks_versions",
            Endpoint::get(
                "/stacks/{stackName}/versions?fields=StackVersion,operating_systems/OperatingSystems,operating_systems/repositories/Repositories",
            ),
        ),
        (
            "registry.all",
            Endpoint::get(
                "/registries?fields=mpacks/*,mpacks/versions/RegistryMpackVersionInfo/*,scenarios/*",
            ),
        ),
        (
            "mpack.download",
            Endpoint::with_body("/mpacks", Method::Post, mpack_download_body),
        ),
    ];
    entries.into_iter().collect()
});

pub fn lookup(name: &str) -> RequestResult<&'static Endpoint> {
    REGISTRY
        .get(name)
        .ok_or_else(|| RequestError::UnknownRequest(name.to_string()))
}

/// Replaces each `{word}` placeholder with the matching data value.
///
/// Missing, null, false, zero and empty values all become the empty string.
pub fn format_url(template: &str, data: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close)
                if close > 0
                    && after[..close]
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                out.push_str(&placeholder_value(data.get(&after[..close])));
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn placeholder_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| placeholder_value(Some(item)))
            .collect::<Vec<_>>()
            .join(","),
        Some(other) => other.to_string(),
    }
}

pub fn resolve(request: &AjaxRequest) -> RequestResult<ResolvedRequest> {
    let endpoint = lookup(&request.name)?;
    Ok(ResolvedRequest {
        name: request.name.clone(),
        method: endpoint.method,
        path: format_url(endpoint.real, &request.data),
        body: endpoint.format.map(|format| format(&request.data)),
        timeout_ms: endpoint.timeout_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn placeholders_are_filled_and_missing_ones_emptied() {
        let url = format_url(
            "/clusters/{clusterName}/services?{urlParams}",
            &data(json!({"clusterName": "c1"})),
        );
        assert_eq!(url, "/clusters/c1/services?");
    }

    #[test]
    fn falsy_values_render_empty() {
        let url = format_url("/a/{x}/{y}/{z}", &data(json!({"x": 0, "y": false, "z": 7})));
        assert_eq!(url, "/a///7");
    }

    #[test]
    fn non_placeholder_braces_are_kept() {
        let url = format_url("/a/{not closed", &Map::new());
        assert_eq!(url, "/a/{not closed");
        assert_eq!(format_url("/a/{}", &Map::new()), "/a/{}");
    }

    #[test]
    fn delete_host_component_resolves_to_delete() {
        let request = AjaxRequest::new("common.delete.host_component")
            .with("clusterName", "c1")
            .with("hostName", "host1")
            .with("componentName", "C1");
        let resolved = resolve(&request).unwrap();
        assert_eq!(resolved.method, Method::Delete);
        assert_eq!(resolved.path, "/clusters/c1/hosts/host1/host_components/C1");
        assert!(resolved.body.is_none());
    }

    #[test]
    fn passive_state_body_carries_maintenance_state() {
        let request = AjaxRequest::new("common.host.host_component.passive")
            .with("hostName", "h")
            .with("componentName", "NAMENODE")
            .with("passive_state", "ON");
        let body = resolve(&request).unwrap().body.unwrap();
        assert_eq!(body["Body"]["HostRoles"]["maintenance_state"], "ON");
    }

    #[test]
    fn persist_body_serializes_value_under_key() {
        let request = AjaxRequest::new("cluster.state").with("value", json!({"clusterState": "X"}));
        let body = resolve(&request).unwrap().body.unwrap();
        let stored = body["CLUSTER_CURRENT_STATUS"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(stored).unwrap()["clusterState"], "X");
    }

    #[test]
    fn custom_action_merges_request_info_and_hosts() {
        let request = AjaxRequest::new("cluster.custom_action.create")
            .with("requestInfo", json!({"parameters": {"threshold": 60}}))
            .with("filteredHosts", vec!["h1", "h2"]);
        let body = resolve(&request).unwrap().body.unwrap();
        assert_eq!(body["RequestInfo"]["action"], "check_host");
        assert_eq!(body["RequestInfo"]["parameters"]["threshold"], 60);
        assert_eq!(body["Requests/resource_filters"][0]["hosts"], "h1,h2");
    }

    #[test]
    fn cluster_name_lookup_has_short_timeout() {
        assert_eq!(lookup("cluster.load_cluster_name").unwrap().timeout_ms, Some(5000));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = resolve(&AjaxRequest::new("no.such.request")).unwrap_err();
        assert_eq!(err, RequestError::UnknownRequest("no.such.request".to_string()));
    }
}
