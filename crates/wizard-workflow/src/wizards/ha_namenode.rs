//! Final progress step of enabling NameNode high availability.

use super::common::{self, STATE_STARTED};
use crate::barrier::{join_requests, MultiTaskCounter};
use crate::task_runner::{CommandContext, CommandResult, ProgressPage};
use crate::wizard::{LoadEntry, LoadMap, WizardController, WizardServices};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wizard_core::ajax::AjaxRequest;
use wizard_core::task::TaskCommand;
use wizard_error::{WizardError, WizardResult};

pub const WIZARD_NAME: &str = "highAvailabilityWizard";
pub const PLAN_KEY: &str = "nameNodeHa";
pub const TOTAL_STEPS: usize = 9;
pub const PROGRESS_STEP: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaFinalizeCommand {
    StartSecondNameNode,
    InstallZkfc,
    StartZkfc,
    InstallPxf,
    ReconfigureHBase,
    ReconfigureAccumulo,
    DeleteSecondaryNameNode,
    StopHdfs,
    StartAllServices,
}

const ALL_COMMANDS: [HaFinalizeCommand; 9] = [
    HaFinalizeCommand::StartSecondNameNode,
    HaFinalizeCommand::InstallZkfc,
    HaFinalizeCommand::StartZkfc,
    HaFinalizeCommand::InstallPxf,
    HaFinalizeCommand::ReconfigureHBase,
    HaFinalizeCommand::ReconfigureAccumulo,
    HaFinalizeCommand::DeleteSecondaryNameNode,
    HaFinalizeCommand::StopHdfs,
    HaFinalizeCommand::StartAllServices,
];

impl TaskCommand for HaFinalizeCommand {
    fn name(&self) -> &'static str {
        match self {
            HaFinalizeCommand::StartSecondNameNode => "startSecondNameNode",
            HaFinalizeCommand::InstallZkfc => "installZKFC",
            HaFinalizeCommand::StartZkfc => "startZKFC",
            HaFinalizeCommand::InstallPxf => "installPXF",
            HaFinalizeCommand::ReconfigureHBase => "reconfigureHBase",
            HaFinalizeCommand::ReconfigureAccumulo => "reconfigureAccumulo",
            HaFinalizeCommand::DeleteSecondaryNameNode => "deleteSNameNode",
            HaFinalizeCommand::StopHdfs => "stopHDFS",
            HaFinalizeCommand::StartAllServices => "startAllServices",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        ALL_COMMANDS.into_iter().find(|c| c.name() == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HaPlan {
    pub name_service_id: String,
    /// Host of the NameNode that already ran before HA.
    pub current_namenode_host: String,
    pub additional_namenode_host: String,
    pub secondary_namenode_host: String,
    pub installed_services: Vec<String>,
}

impl HaPlan {
    pub fn from_wizard(wizard: &WizardController) -> WizardResult<Self> {
        let plan: Self = serde_json::from_value(wizard.require(PLAN_KEY)?.clone())?;
        if plan.name_service_id.is_empty() || plan.additional_namenode_host.is_empty() {
            return Err(WizardError::Precondition(
                "NameNode HA needs a nameservice id and an additional NameNode host".to_string(),
            ));
        }
        Ok(plan)
    }

    pub fn is_installed(&self, service: &str) -> bool {
        self.installed_services.iter().any(|s| s == service)
    }

    pub fn namenode_hosts(&self) -> Vec<String> {
        vec![
            self.current_namenode_host.clone(),
            self.additional_namenode_host.clone(),
        ]
    }
}

/// Swaps the authority of an `hdfs://host:port/path` URI for the nameservice.
pub fn point_at_nameservice(uri: &str, name_service_id: &str) -> String {
    match uri.find("//") {
        Some(start) => {
            let authority_start = start + 2;
            let rest = &uri[authority_start..];
            let authority_end = rest.find('/').unwrap_or(rest.len());
            format!(
                "{}{}{}",
                &uri[..authority_start],
                name_service_id,
                &rest[authority_end..]
            )
        }
        None => uri.to_string(),
    }
}

pub fn wizard(services: WizardServices) -> WizardController {
    let load_map = LoadMap::new().step(
        PROGRESS_STEP,
        vec![
            LoadEntry::async_("clusterName", super::load_cluster_name),
            LoadEntry::sync(PLAN_KEY, |w| {
                w.load::<HaPlan>(PLAN_KEY)?;
                HaPlan::from_wizard(w).map(|_| ())
            }),
        ],
    );
    WizardController::new(WIZARD_NAME, TOTAL_STEPS, services)
        .with_cluster_state("HIGH_AVAILABILITY_DEPLOY")
        .with_load_map(load_map)
}

pub struct HaFinalizePage {
    plan: HaPlan,
    multi_task_counter: MultiTaskCounter,
}

impl HaFinalizePage {
    pub fn new(plan: HaPlan) -> Self {
        Self {
            plan,
            multi_task_counter: MultiTaskCounter::default(),
        }
    }

    pub fn from_wizard(wizard: &WizardController) -> WizardResult<Self> {
        Ok(Self::new(HaPlan::from_wizard(wizard)?))
    }

    async fn create_and_install(
        &mut self,
        ctx: &mut CommandContext<'_, HaFinalizeCommand>,
        component: &str,
        hosts: &[String],
    ) -> CommandResult {
        let requests = hosts
            .iter()
            .map(|host| {
                AjaxRequest::new("admin.high_availability.create_component")
                    .with("hostName", host)
                    .with("componentName", component)
            })
            .collect();
        join_requests(
            ctx.dispatcher(),
            requests,
            &mut self.multi_task_counter,
            |e| e.is_conflict(),
        )
        .await?;
        common::install_components(ctx, &[component.to_string()], hosts).await
    }

    async fn reconfigure_uri(
        &self,
        ctx: &mut CommandContext<'_, HaFinalizeCommand>,
        site: &str,
        property: &str,
    ) -> CommandResult {
        let mut configs = common::load_site_configs(ctx, &[site]).await?;
        let Some(config) = configs.iter_mut().find(|c| c.site == site) else {
            return Err(WizardError::MissingData {
                wizard: WIZARD_NAME.to_string(),
                key: site.to_string(),
            });
        };
        if let Some(uri) = config.properties.get(property).and_then(Value::as_str) {
            let updated = point_at_nameservice(uri, &self.plan.name_service_id);
            config
                .properties
                .insert(property.to_string(), Value::String(updated));
        }
        common::save_site_configs(ctx, &configs, "Enable NameNode HA").await
    }
}

#[async_trait]
impl ProgressPage for HaFinalizePage {
    type Command = HaFinalizeCommand;

    fn name(&self) -> &str {
        WIZARD_NAME
    }

    fn commands(&self) -> Vec<HaFinalizeCommand> {
        ALL_COMMANDS.to_vec()
    }

    fn task_title(&self, command: HaFinalizeCommand) -> String {
        match command {
            HaFinalizeCommand::StartSecondNameNode => "Start Additional NameNode",
            HaFinalizeCommand::InstallZkfc => "Install Failover Controllers",
            HaFinalizeCommand::StartZkfc => "Start Failover Controllers",
            HaFinalizeCommand::InstallPxf => "Install PXF",
            HaFinalizeCommand::ReconfigureHBase => "Reconfigure HBase",
            HaFinalizeCommand::ReconfigureAccumulo => "Reconfigure Accumulo",
            HaFinalizeCommand::DeleteSecondaryNameNode => "Delete Secondary NameNode",
            HaFinalizeCommand::StopHdfs => "Stop HDFS",
            HaFinalizeCommand::StartAllServices => "Start All Services",
        }
        .to_string()
    }

    fn unneeded_commands(&self) -> Vec<HaFinalizeCommand> {
        let mut unneeded = Vec::new();
        if !self.plan.is_installed("PXF") {
            unneeded.push(HaFinalizeCommand::InstallPxf);
        }
        if !self.plan.is_installed("HBASE") {
            unneeded.push(HaFinalizeCommand::ReconfigureHBase);
        }
        if !self.plan.is_installed("ACCUMULO") {
            unneeded.push(HaFinalizeCommand::ReconfigureAccumulo);
        }
        unneeded
    }

    fn rollback_allowed(&self, command: HaFinalizeCommand) -> bool {
        command != HaFinalizeCommand::StartAllServices
    }

    async fn execute(
        &mut self,
        command: HaFinalizeCommand,
        ctx: &mut CommandContext<'_, HaFinalizeCommand>,
    ) -> CommandResult {
        match command {
            HaFinalizeCommand::StartSecondNameNode => {
                let host = [self.plan.additional_namenode_host.clone()];
                common::update_component(ctx, "NAMENODE", &host, "Start", STATE_STARTED).await
            }
            HaFinalizeCommand::InstallZkfc => {
                let hosts = self.plan.namenode_hosts();
                self.create_and_install(ctx, "ZKFC", &hosts).await
            }
            HaFinalizeCommand::StartZkfc => {
                let hosts = self.plan.namenode_hosts();
                common::update_component(ctx, "ZKFC", &hosts, "Start", STATE_STARTED).await
            }
            HaFinalizeCommand::InstallPxf => {
                let host = [self.plan.additional_namenode_host.clone()];
                self.create_and_install(ctx, "PXF", &host).await
            }
            HaFinalizeCommand::ReconfigureHBase => {
                self.reconfigure_uri(ctx, "hbase-site", "hbase.rootdir").await
            }
            HaFinalizeCommand::ReconfigureAccumulo => {
                self.reconfigure_uri(ctx, "accumulo-site", "instance.volumes").await
            }
            HaFinalizeCommand::DeleteSecondaryNameNode => {
                if self.plan.secondary_namenode_host.is_empty() {
                    log::info!("No Secondary NameNode to delete");
                    return Ok(());
                }
                let host = self.plan.secondary_namenode_host.clone();
                common::delete_components(
                    ctx,
                    &["SECONDARY_NAMENODE".to_string()],
                    &host,
                    &mut self.multi_task_counter,
                )
                .await
            }
            HaFinalizeCommand::StopHdfs => {
                common::stop_services(ctx, Some(&["HDFS".to_string()][..])).await
            }
            HaFinalizeCommand::StartAllServices => common::start_services(ctx, None).await,
        }
    }
}
