//! Command bodies shared by the concrete wizards.

use crate::barrier::{join_requests, MultiTaskCounter};
use crate::task_runner::{CommandContext, CommandResult};
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use wizard_core::ajax::AjaxRequest;
use wizard_core::task::TaskCommand;
use wizard_error::{WizardError, WizardResult};

pub const STATE_INSTALLED: &str = "INSTALLED";
pub const STATE_STARTED: &str = "STARTED";

/// One configuration type as loaded from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteConfig {
    pub site: String,
    pub tag: String,
    pub properties: Map<String, Value>,
}

pub async fn create_components<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    components: &[String],
    host: &str,
    counter: &mut MultiTaskCounter,
) -> CommandResult {
    let requests = components
        .iter()
        .map(|component| {
            AjaxRequest::new("admin.high_availability.create_component")
                .with("hostName", host)
                .with("componentName", component)
        })
        .collect();
    // A component that already exists on the host is fine.
    join_requests(ctx.dispatcher(), requests, counter, |e| e.is_conflict()).await?;
    Ok(())
}

pub async fn set_maintenance_mode<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    components: &[String],
    host: &str,
    on: bool,
    counter: &mut MultiTaskCounter,
) -> CommandResult {
    let state = if on { "ON" } else { "OFF" };
    let requests = components
        .iter()
        .map(|component| {
            AjaxRequest::new("common.host.host_component.passive")
                .with("hostName", host)
                .with("componentName", component)
                .with("passive_state", state)
                .with(
                    "requestInfo",
                    format!("Turn {} Maintenance Mode for {}", state, component),
                )
        })
        .collect();
    join_requests(ctx.dispatcher(), requests, counter, |_| false).await?;
    Ok(())
}

pub async fn delete_components<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    components: &[String],
    host: &str,
    counter: &mut MultiTaskCounter,
) -> CommandResult {
    let requests = components
        .iter()
        .map(|component| {
            AjaxRequest::new("common.delete.host_component")
                .with("hostName", host)
                .with("componentName", component)
        })
        .collect();
    join_requests(ctx.dispatcher(), requests, counter, |e| {
        e.is_missing_resource()
    })
    .await?;
    Ok(())
}

/// Moves `component` on `hosts` to `state` and waits for the request.
pub async fn update_component<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    component: &str,
    hosts: &[String],
    context: &str,
    state: &str,
) -> CommandResult {
    if hosts.is_empty() {
        return Err(WizardError::Precondition(format!(
            "no hosts to {} {}",
            context.to_lowercase(),
            component
        )));
    }
    let query = format!(
        "HostRoles/component_name={}&HostRoles/host_name.in({})&HostRoles/maintenance_state=OFF",
        component,
        hosts.join(",")
    );
    let request = AjaxRequest::new("common.host_components.update")
        .with("context", format!("{} {}", context, component))
        .with("query", query)
        .with("HostRoles", json!({ "state": state }));
    ctx.send_and_wait(request).await
}

pub async fn install_components<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    components: &[String],
    hosts: &[String],
) -> CommandResult {
    for component in components {
        update_component(ctx, component, hosts, "Install", STATE_INSTALLED).await?;
    }
    Ok(())
}

fn services_filter(services: &[String]) -> String {
    format!("ServiceInfo/service_name.in({})", services.join(","))
}

/// Stops the listed services, or every running service for `None`.
pub async fn stop_services<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    services: Option<&[String]>,
) -> CommandResult {
    let url_params = match services {
        Some(list) => services_filter(list),
        None => "ServiceInfo/state=STARTED".to_string(),
    };
    let request = AjaxRequest::new("common.services.update")
        .with("context", "Stop required services")
        .with("urlParams", url_params)
        .with("ServiceInfo", json!({ "state": STATE_INSTALLED }));
    ctx.send_and_wait(request).await
}

/// Starts the listed services, or every stopped service for `None`.
pub async fn start_services<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    services: Option<&[String]>,
) -> CommandResult {
    let (context, url_params) = match services {
        Some(list) => ("Start required services", services_filter(list)),
        None => (
            "Start all services",
            "ServiceInfo/state=INSTALLED&params/run_smoke_test=false&params/reconfigure_client=false"
                .to_string(),
        ),
    };
    let request = AjaxRequest::new("common.services.update")
        .with("context", context)
        .with("urlParams", url_params)
        .with("ServiceInfo", json!({ "state": STATE_STARTED }));
    ctx.send_and_wait(request).await
}

/// Current tag of every desired configuration type.
pub async fn load_config_tags<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
) -> WizardResult<Map<String, Value>> {
    let response = ctx.send(AjaxRequest::new("config.tags")).await?;
    let desired = response
        .body
        .get("Clusters")
        .and_then(|c| c.get("desired_configs"))
        .and_then(Value::as_object)
        .ok_or_else(|| WizardError::UnexpectedResponse {
            request: "config.tags".to_string(),
            reason: "no Clusters.desired_configs".to_string(),
        })?;
    Ok(desired
        .iter()
        .filter_map(|(site, entry)| {
            entry
                .get("tag")
                .cloned()
                .map(|tag| (site.clone(), tag))
        })
        .collect())
}

/// Loads the current properties of `sites`. Sites without a tag are skipped.
pub async fn load_site_configs<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    sites: &[&str],
) -> WizardResult<Vec<SiteConfig>> {
    let tags = load_config_tags(ctx).await?;
    let filters: Vec<String> = sites
        .iter()
        .filter_map(|site| {
            tags.get(*site)
                .and_then(Value::as_str)
                .map(|tag| format!("(type={}&tag={})", site, tag))
        })
        .collect();
    if filters.is_empty() {
        log::warn!("None of {:?} has a desired tag", sites);
        return Ok(Vec::new());
    }

    let response = ctx
        .send(AjaxRequest::new("reassign.load_configs").with("urlParams", filters.join("|")))
        .await?;
    let items = response
        .body
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(items
        .into_iter()
        .filter_map(|item| {
            let site = item.get("type")?.as_str()?;
            if !sites.contains(&site) {
                return None;
            }
            Some(SiteConfig {
                site: site.to_string(),
                tag: item.get("tag")?.as_str()?.to_string(),
                properties: item
                    .get("properties")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            })
        })
        .collect())
}

/// Tag for a newly saved configuration version.
pub fn new_config_tag() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("version{}", millis)
}

/// Saves `configs` as new desired configurations in one call.
pub async fn save_site_configs<C: TaskCommand>(
    ctx: &mut CommandContext<'_, C>,
    configs: &[SiteConfig],
    note: &str,
) -> CommandResult {
    if configs.is_empty() {
        return Ok(());
    }
    let tag = new_config_tag();
    let desired: Vec<Value> = configs
        .iter()
        .map(|config| {
            json!({
                "type": config.site,
                "tag": tag,
                "properties": config.properties,
                "service_config_version_note": note,
            })
        })
        .collect();
    let data = json!([{ "Clusters": { "desired_config": desired } }]);
    ctx.send(AjaxRequest::new("common.across.services.configurations").with("data", data))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wizard_core::ajax::{FakeDispatcher, Dispatcher};
    use wizard_core::task::Task;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Probe;

    impl TaskCommand for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn from_name(name: &str) -> Option<Self> {
            (name == "probe").then_some(Probe)
        }
    }

    #[tokio::test]
    async fn update_component_builds_host_filter_and_waits() {
        let fake = FakeDispatcher::new().with_cluster_name("c1");
        fake.respond_ok("common.host_components.update", json!({"Requests": {"id": 12}}));
        fake.respond_ok(
            "background_operations.get_by_request",
            json!({"Requests": {"request_status": "COMPLETED", "progress_percent": 100}}),
        );
        let mut task = Task::new(0, Probe, "probe");
        let dispatcher: &dyn Dispatcher = &fake;
        let mut ctx = CommandContext::new(dispatcher, &mut task, None, Duration::from_millis(1));

        update_component(&mut ctx, "ZKFC", &["h1".into(), "h2".into()], "Start", STATE_STARTED)
            .await
            .unwrap();

        let sent = fake.requests_named("common.host_components.update");
        assert_eq!(
            sent[0].data_str("query"),
            Some("HostRoles/component_name=ZKFC&HostRoles/host_name.in(h1,h2)&HostRoles/maintenance_state=OFF")
        );
        assert_eq!(sent[0].resolved.body.as_ref().unwrap()["Body"]["HostRoles"]["state"], "STARTED");
        assert_eq!(fake.requests_named("background_operations.get_by_request").len(), 1);
    }

    #[tokio::test]
    async fn site_configs_are_loaded_by_current_tag() {
        let fake = FakeDispatcher::new();
        fake.respond_ok(
            "config.tags",
            json!({"Clusters": {"desired_configs": {
                "hdfs-site": {"tag": "v3"},
                "core-site": {"tag": "v1"}
            }}}),
        );
        fake.respond_ok(
            "reassign.load_configs",
            json!({"items": [{"type": "hdfs-site", "tag": "v3", "properties": {"a": "b"}}]}),
        );
        let mut task = Task::new(0, Probe, "probe");
        let mut ctx = CommandContext::new(&fake, &mut task, None, Duration::from_millis(1));

        let configs = load_site_configs(&mut ctx, &["hdfs-site", "core-site", "yarn-site"])
            .await
            .unwrap();

        let sent = fake.requests_named("reassign.load_configs");
        assert_eq!(
            sent[0].data_str("urlParams"),
            Some("(type=hdfs-site&tag=v3)|(type=core-site&tag=v1)")
        );
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].properties["a"], "b");
    }
}
