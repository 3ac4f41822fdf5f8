//! Move a master component from one host to another.

use super::common::{self, SiteConfig, STATE_STARTED};
use crate::barrier::MultiTaskCounter;
use crate::polling::Pollable;
use crate::task_runner::{CommandContext, CommandResult, ProgressPage};
use crate::wizard::{LoadEntry, LoadMap, MasterComponentHost, WizardController, WizardServices};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use wizard_core::ajax::AjaxRequest;
use wizard_core::task::TaskCommand;
use wizard_error::{WizardError, WizardResult};

pub const WIZARD_NAME: &str = "reassignMasterController";
pub const PLAN_KEY: &str = "reassign";
pub const TOTAL_STEPS: usize = 7;
pub const PROGRESS_STEP: usize = 4;

const REPLACE_VALUE: &str = "<replace-value>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignCommand {
    StopRequiredServices,
    CleanMySqlServer,
    CreateHostComponents,
    PutHostComponentsInMaintenanceMode,
    Reconfigure,
    InstallHostComponents,
    StartZooKeeperServers,
    StartNameNode,
    DeleteHostComponents,
    ConfigureMySqlServer,
    StartMySqlServer,
    RestartMySqlServer,
    TestDbConnection,
    StartNewMySqlServer,
    StartRequiredServices,
}

const ALL_COMMANDS: [ReassignCommand; 15] = [
    ReassignCommand::StopRequiredServices,
    ReassignCommand::CleanMySqlServer,
    ReassignCommand::CreateHostComponents,
    ReassignCommand::PutHostComponentsInMaintenanceMode,
    ReassignCommand::Reconfigure,
    ReassignCommand::InstallHostComponents,
    ReassignCommand::StartZooKeeperServers,
    ReassignCommand::StartNameNode,
    ReassignCommand::DeleteHostComponents,
    ReassignCommand::ConfigureMySqlServer,
    ReassignCommand::StartMySqlServer,
    ReassignCommand::RestartMySqlServer,
    ReassignCommand::TestDbConnection,
    ReassignCommand::StartNewMySqlServer,
    ReassignCommand::StartRequiredServices,
];

impl TaskCommand for ReassignCommand {
    fn name(&self) -> &'static str {
        match self {
            ReassignCommand::StopRequiredServices => "stopRequiredServices",
            ReassignCommand::CleanMySqlServer => "cleanMySqlServer",
            ReassignCommand::CreateHostComponents => "createHostComponents",
            ReassignCommand::PutHostComponentsInMaintenanceMode => {
                "putHostComponentsInMaintenanceMode"
            }
            ReassignCommand::Reconfigure => "reconfigure",
            ReassignCommand::InstallHostComponents => "installHostComponents",
            ReassignCommand::StartZooKeeperServers => "startZooKeeperServers",
            ReassignCommand::StartNameNode => "startNameNode",
            ReassignCommand::DeleteHostComponents => "deleteHostComponents",
            ReassignCommand::ConfigureMySqlServer => "configureMySqlServer",
            ReassignCommand::StartMySqlServer => "startMySqlServer",
            ReassignCommand::RestartMySqlServer => "restartMySqlServer",
            ReassignCommand::TestDbConnection => "testDBConnection",
            ReassignCommand::StartNewMySqlServer => "startNewMySqlServer",
            ReassignCommand::StartRequiredServices => "startRequiredServices",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        ALL_COMMANDS.into_iter().find(|c| c.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    pub db_type: String,
    pub is_remote: bool,
    pub connection_url: String,
    pub user_name: String,
    pub password: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            db_type: "mysql".to_string(),
            is_remote: false,
            connection_url: String::new(),
            user_name: String::new(),
            password: String::new(),
        }
    }
}

/// What to move and where, as stored under [`PLAN_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReassignPlan {
    pub component_name: String,
    pub service_name: String,
    pub source_host: String,
    pub target_host: String,
    pub has_manual_steps: bool,
    pub namenode_ha: bool,
    pub installed_services: Vec<String>,
    pub master_component_hosts: Vec<MasterComponentHost>,
    pub database: DatabaseSettings,
}

impl ReassignPlan {
    pub fn from_wizard(wizard: &WizardController) -> WizardResult<Self> {
        let raw = wizard.require(PLAN_KEY)?.clone();
        let plan: Self = serde_json::from_value(raw)?;
        if plan.component_name.is_empty() || plan.target_host.is_empty() {
            return Err(WizardError::Precondition(
                "reassign plan needs a component and a target host".to_string(),
            ));
        }
        if plan.source_host == plan.target_host {
            return Err(WizardError::Precondition(format!(
                "{} is already on {}",
                plan.component_name, plan.target_host
            )));
        }
        Ok(plan)
    }

    pub fn has_db(&self) -> bool {
        matches!(
            self.component_name.as_str(),
            "HIVE_SERVER" | "HIVE_METASTORE" | "OOZIE_SERVER"
        )
    }

    fn is_namenode_ha(&self) -> bool {
        self.component_name == "NAMENODE" && self.namenode_ha
    }

    /// Components created, installed and deleted together.
    pub fn host_components(&self) -> Vec<String> {
        if self.is_namenode_ha() {
            vec!["NAMENODE".to_string(), "ZKFC".to_string()]
        } else {
            vec![self.component_name.clone()]
        }
    }

    /// Services stopped before and started after the move; `None` means all.
    pub fn required_services(&self) -> Option<Vec<String>> {
        let unrelated = unrelated_services(&self.component_name)?;
        if self.installed_services.is_empty() {
            return None;
        }
        Some(
            self.installed_services
                .iter()
                .filter(|s| !unrelated.contains(&s.as_str()))
                .cloned()
                .collect(),
        )
    }

    pub fn hosts_of(&self, component: &str) -> Vec<String> {
        self.master_component_hosts
            .iter()
            .filter(|m| m.component == component)
            .map(|m| m.host_name.clone())
            .collect()
    }

    fn mysql_host(&self) -> WizardResult<String> {
        if self.component_name == "MYSQL_SERVER" {
            return Ok(self.target_host.clone());
        }
        self.hosts_of("MYSQL_SERVER")
            .into_iter()
            .next()
            .ok_or_else(|| WizardError::Precondition("no MYSQL_SERVER host known".to_string()))
    }
}

fn unrelated_services(component: &str) -> Option<&'static [&'static str]> {
    const HADOOP_ONLY: &[&str] = &["HDFS", "ZOOKEEPER", "HBASE", "FLUME", "SQOOP", "STORM"];
    match component {
        "JOBTRACKER" | "RESOURCEMANAGER" | "APP_TIMELINE_SERVER" | "WEBHCAT_SERVER"
        | "HIVE_SERVER" | "HIVE_METASTORE" | "MYSQL_SERVER" => Some(HADOOP_ONLY),
        "OOZIE_SERVER" => Some(&["ZOOKEEPER", "HBASE", "FLUME", "SQOOP", "STORM", "HIVE"]),
        _ => None,
    }
}

fn config_sites(component: &str) -> &'static [&'static str] {
    match component {
        "NAMENODE" | "SECONDARY_NAMENODE" => &["hdfs-site", "core-site"],
        "JOBTRACKER" | "HISTORYSERVER" => &["mapred-site"],
        "RESOURCEMANAGER" => &["yarn-site"],
        "WEBHCAT_SERVER" => &["webhcat-site"],
        "APP_TIMELINE_SERVER" => &["yarn-site", "yarn-env"],
        "OOZIE_SERVER" => &["oozie-site", "core-site", "oozie-env"],
        "HIVE_SERVER" | "HIVE_METASTORE" => &["hive-site", "webhcat-site", "hive-env", "core-site"],
        "MYSQL_SERVER" => &["hive-site"],
        _ => &[],
    }
}

/// `(site, property, template)` rewritten to point at the new host.
fn additional_configs(component: &str, namenode_ha: bool) -> Vec<(&'static str, &'static str, &'static str)> {
    match component {
        "NAMENODE" => {
            let mut configs = vec![
                ("hdfs-site", "dfs.namenode.http-address", "<replace-value>:50070"),
                ("hdfs-site", "dfs.namenode.https-address", "<replace-value>:50470"),
            ];
            if !namenode_ha {
                configs.push(("hdfs-site", "dfs.namenode.rpc-address", "<replace-value>:8020"));
                configs.push(("core-site", "fs.defaultFS", "hdfs://<replace-value>:8020"));
            }
            configs
        }
        "SECONDARY_NAMENODE" => vec![(
            "hdfs-site",
            "dfs.namenode.secondary.http-address",
            "<replace-value>:50090",
        )],
        "RESOURCEMANAGER" => vec![
            ("yarn-site", "yarn.resourcemanager.address", "<replace-value>:8050"),
            ("yarn-site", "yarn.resourcemanager.admin.address", "<replace-value>:8141"),
            (
                "yarn-site",
                "yarn.resourcemanager.resource-tracker.address",
                "<replace-value>:8025",
            ),
            ("yarn-site", "yarn.resourcemanager.scheduler.address", "<replace-value>:8030"),
            ("yarn-site", "yarn.resourcemanager.webapp.address", "<replace-value>:8088"),
            ("yarn-site", "yarn.resourcemanager.hostname", "<replace-value>"),
        ],
        "APP_TIMELINE_SERVER" => vec![
            ("yarn-site", "yarn.timeline-service.webapp.address", "<replace-value>:8188"),
            ("yarn-site", "yarn.timeline-service.webapp.https.address", "<replace-value>:8190"),
            ("yarn-site", "yarn.timeline-service.address", "<replace-value>:10200"),
        ],
        "OOZIE_SERVER" => vec![
            ("oozie-site", "oozie.base.url", "http://<replace-value>:11000/oozie"),
            ("core-site", "hadoop.proxyuser.oozie.hosts", "<replace-value>"),
        ],
        "MYSQL_SERVER" => vec![(
            "hive-site",
            "javax.jdo.option.ConnectionURL",
            "jdbc:mysql://<replace-value>/hive?createDatabaseIfNotExist=true",
        )],
        "HISTORYSERVER" => vec![
            ("mapred-site", "mapreduce.jobhistory.webapp.address", "<replace-value>:19888"),
            ("mapred-site", "mapreduce.jobhistory.address", "<replace-value>:10020"),
        ],
        _ => Vec::new(),
    }
}

/// Points the loaded configs at `target_host`.
pub fn apply_additional_configs(
    configs: &mut [SiteConfig],
    component: &str,
    namenode_ha: bool,
    target_host: &str,
) {
    for (site, property, template) in additional_configs(component, namenode_ha) {
        if let Some(config) = configs.iter_mut().find(|c| c.site == site) {
            config.properties.insert(
                property.to_string(),
                Value::String(template.replace(REPLACE_VALUE, target_host)),
            );
        }
    }
}

/// A reassign wizard whose progress step needs the cluster name and a plan.
pub fn wizard(services: WizardServices) -> WizardController {
    let load_map = LoadMap::new().step(
        PROGRESS_STEP,
        vec![
            LoadEntry::async_("clusterName", super::load_cluster_name),
            LoadEntry::sync(PLAN_KEY, |w| {
                w.load::<ReassignPlan>(PLAN_KEY)?;
                ReassignPlan::from_wizard(w).map(|_| ())
            }),
        ],
    );
    WizardController::new(WIZARD_NAME, TOTAL_STEPS, services)
        .with_cluster_state("REASSIGN_MASTER_INSTALLING")
        .with_load_map(load_map)
}

/// Progress step of the reassign wizard.
pub struct ReassignMasterPage {
    plan: ReassignPlan,
    multi_task_counter: MultiTaskCounter,
    service_properties: Map<String, Value>,
}

impl ReassignMasterPage {
    pub fn new(plan: ReassignPlan) -> Self {
        Self {
            plan,
            multi_task_counter: MultiTaskCounter::default(),
            service_properties: Map::new(),
        }
    }

    pub fn from_wizard(wizard: &WizardController) -> WizardResult<Self> {
        Ok(Self::new(ReassignPlan::from_wizard(wizard)?))
    }

    pub fn plan(&self) -> &ReassignPlan {
        &self.plan
    }

    pub fn multi_task_counter(&self) -> &MultiTaskCounter {
        &self.multi_task_counter
    }

    /// Site properties written by the reconfigure command, keyed by site.
    pub fn service_properties(&self) -> &Map<String, Value> {
        &self.service_properties
    }

    async fn reconfigure(&mut self, ctx: &mut CommandContext<'_, ReassignCommand>) -> CommandResult {
        let sites = config_sites(&self.plan.component_name);
        let mut configs = common::load_site_configs(ctx, sites).await?;
        apply_additional_configs(
            &mut configs,
            &self.plan.component_name,
            self.plan.namenode_ha,
            &self.plan.target_host,
        );
        let note = format!(
            "Reassign {} to {}",
            self.plan.component_name, self.plan.target_host
        );
        common::save_site_configs(ctx, &configs, &note).await?;
        for config in configs {
            self.service_properties
                .insert(config.site, Value::Object(config.properties));
        }
        Ok(())
    }

    async fn mysql_command(
        &self,
        ctx: &mut CommandContext<'_, ReassignCommand>,
        request_name: &str,
    ) -> CommandResult {
        let host = self.plan.mysql_host()?;
        ctx.send_and_wait(AjaxRequest::new(request_name).with("host", host))
            .await
    }

    async fn start_mysql_on(
        &self,
        ctx: &mut CommandContext<'_, ReassignCommand>,
        host: String,
    ) -> CommandResult {
        let request = AjaxRequest::new("common.host.host_component.update")
            .with("context", "Start MySQL Server")
            .with("hostName", host)
            .with("serviceName", "HIVE")
            .with("componentName", "MYSQL_SERVER")
            .with("HostRoles", json!({ "state": STATE_STARTED }));
        ctx.send_and_wait(request).await
    }

    async fn restart_mysql(&self, ctx: &mut CommandContext<'_, ReassignCommand>) -> CommandResult {
        let host = self.plan.mysql_host()?;
        let request = AjaxRequest::new("restart.hostComponents")
            .with("context", "Restart MySql Server")
            .with(
                "resource_filters",
                json!([{
                    "component_name": "MYSQL_SERVER",
                    "hosts": host,
                    "service_name": "HIVE",
                }]),
            )
            .with(
                "operation_level",
                json!({
                    "level": "HOST_COMPONENT",
                    "service_name": "HIVE",
                    "hostcomponent_name": "MYSQL_SERVER",
                    "host_name": host,
                }),
            );
        ctx.send_and_wait(request).await
    }

    async fn test_db_connection(
        &self,
        ctx: &mut CommandContext<'_, ReassignCommand>,
    ) -> CommandResult {
        let db = &self.plan.database;
        let request = AjaxRequest::new("cluster.custom_action.create")
            .with(
                "requestInfo",
                json!({
                    "context": format!("Check {} connectivity", db.db_type),
                    "parameters": {
                        "check_execute_list": "db_connection_check",
                        "db_name": db.db_type,
                        "db_connection_url": db.connection_url,
                        "user_name": db.user_name,
                        "user_passwd": db.password,
                    }
                }),
            )
            .with("filteredHosts", vec![self.plan.target_host.clone()]);
        let response = ctx.send(request).await?;
        let request_id = response.request_id().ok_or_else(|| WizardError::UnexpectedResponse {
            request: "cluster.custom_action.create".to_string(),
            reason: "no Requests.id".to_string(),
        })?;

        loop {
            let response = ctx
                .send(
                    AjaxRequest::new("custom_action.request")
                        .with("requestId", request_id)
                        .with("taskId", ""),
                )
                .await?;
            let task = response
                .body
                .get("items")
                .and_then(|items| items.get(0))
                .and_then(|item| item.get("Tasks"))
                .or_else(|| response.body.get("Tasks"))
                .cloned()
                .unwrap_or(Value::Null);
            match task.get("status").and_then(Value::as_str).unwrap_or_default() {
                "COMPLETED" => {
                    let exit_code = task
                        .pointer("/structured_out/db_connection_check/exit_code")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    if exit_code != 0 {
                        let message = task
                            .pointer("/structured_out/db_connection_check/message")
                            .and_then(Value::as_str)
                            .unwrap_or("database connection check failed");
                        return Err(WizardError::Other(message.to_string()));
                    }
                    return Ok(());
                }
                status @ ("FAILED" | "ABORTED" | "TIMEDOUT") => {
                    return Err(WizardError::RequestFailed {
                        request_id,
                        status: status.to_string(),
                    });
                }
                _ => tokio::time::sleep(ctx.poll_interval()).await,
            }
        }
    }
}

#[async_trait]
impl ProgressPage for ReassignMasterPage {
    type Command = ReassignCommand;

    fn name(&self) -> &str {
        WIZARD_NAME
    }

    fn commands(&self) -> Vec<ReassignCommand> {
        use ReassignCommand::*;
        if self.plan.has_db() {
            vec![
                CreateHostComponents,
                InstallHostComponents,
                ConfigureMySqlServer,
                RestartMySqlServer,
                TestDbConnection,
                StopRequiredServices,
                CleanMySqlServer,
                PutHostComponentsInMaintenanceMode,
                Reconfigure,
                DeleteHostComponents,
                ConfigureMySqlServer,
                StartRequiredServices,
            ]
        } else {
            vec![
                StopRequiredServices,
                CleanMySqlServer,
                CreateHostComponents,
                PutHostComponentsInMaintenanceMode,
                Reconfigure,
                InstallHostComponents,
                StartZooKeeperServers,
                StartNameNode,
                DeleteHostComponents,
                ConfigureMySqlServer,
                StartMySqlServer,
                StartNewMySqlServer,
                StartRequiredServices,
            ]
        }
    }

    fn task_title(&self, command: ReassignCommand) -> String {
        let component = &self.plan.component_name;
        match command {
            ReassignCommand::StopRequiredServices => "Stop required services".to_string(),
            ReassignCommand::CleanMySqlServer => "Clean MySQL Server".to_string(),
            ReassignCommand::CreateHostComponents => format!("Create {}", component),
            ReassignCommand::PutHostComponentsInMaintenanceMode => {
                format!("Disable {}", component)
            }
            ReassignCommand::Reconfigure => format!("Reconfigure {}", component),
            ReassignCommand::InstallHostComponents => format!("Install {}", component),
            ReassignCommand::StartZooKeeperServers => "Start ZooKeeper Servers".to_string(),
            ReassignCommand::StartNameNode => "Start NameNode".to_string(),
            ReassignCommand::DeleteHostComponents => format!("Delete disabled {}", component),
            ReassignCommand::ConfigureMySqlServer => "Configure MySQL Server".to_string(),
            ReassignCommand::StartMySqlServer => "Start MySQL Server".to_string(),
            ReassignCommand::RestartMySqlServer => "Restart MySQL Server".to_string(),
            ReassignCommand::TestDbConnection => "Test database connection".to_string(),
            ReassignCommand::StartNewMySqlServer => "Start new MySQL Server".to_string(),
            ReassignCommand::StartRequiredServices => "Start required services".to_string(),
        }
    }

    fn unneeded_commands(&self) -> Vec<ReassignCommand> {
        use ReassignCommand::*;
        let plan = &self.plan;
        let mut unneeded = Vec::new();
        if plan.has_db() {
            if plan.database.is_remote || plan.database.db_type != "mysql" {
                unneeded.extend([
                    ConfigureMySqlServer,
                    StartMySqlServer,
                    RestartMySqlServer,
                    CleanMySqlServer,
                    ConfigureMySqlServer,
                ]);
            }
            if plan.database.db_type == "derby" {
                unneeded.push(TestDbConnection);
            }
        }
        if plan.component_name != "MYSQL_SERVER" && !plan.has_db() {
            unneeded.extend([
                ConfigureMySqlServer,
                StartMySqlServer,
                RestartMySqlServer,
                CleanMySqlServer,
                StartNewMySqlServer,
                ConfigureMySqlServer,
            ]);
        }
        if plan.component_name == "MYSQL_SERVER" {
            unneeded.push(CleanMySqlServer);
        }
        if plan.has_manual_steps {
            if plan.is_namenode_ha() {
                unneeded.extend([DeleteHostComponents, StartRequiredServices]);
            } else {
                unneeded.extend([
                    StartZooKeeperServers,
                    StartNameNode,
                    DeleteHostComponents,
                    StartRequiredServices,
                ]);
            }
        } else {
            unneeded.extend([StartZooKeeperServers, StartNameNode]);
        }
        if plan.component_name == "METRICS_COLLECTOR" {
            unneeded.push(Reconfigure);
        }
        unneeded
    }

    fn rollback_allowed(&self, command: ReassignCommand) -> bool {
        !matches!(
            command,
            ReassignCommand::DeleteHostComponents | ReassignCommand::StartRequiredServices
        )
    }

    async fn execute(
        &mut self,
        command: ReassignCommand,
        ctx: &mut CommandContext<'_, ReassignCommand>,
    ) -> CommandResult {
        let components = self.plan.host_components();
        match command {
            ReassignCommand::StopRequiredServices => {
                let services = self.plan.required_services();
                common::stop_services(ctx, services.as_deref()).await
            }
            ReassignCommand::StartRequiredServices => {
                let services = self.plan.required_services();
                common::start_services(ctx, services.as_deref()).await
            }
            ReassignCommand::CreateHostComponents => {
                common::create_components(
                    ctx,
                    &components,
                    &self.plan.target_host,
                    &mut self.multi_task_counter,
                )
                .await
            }
            ReassignCommand::PutHostComponentsInMaintenanceMode => {
                common::set_maintenance_mode(
                    ctx,
                    &components,
                    &self.plan.source_host,
                    true,
                    &mut self.multi_task_counter,
                )
                .await
            }
            ReassignCommand::DeleteHostComponents => {
                common::delete_components(
                    ctx,
                    &components,
                    &self.plan.source_host,
                    &mut self.multi_task_counter,
                )
                .await
            }
            ReassignCommand::InstallHostComponents => {
                let target = [self.plan.target_host.clone()];
                common::install_components(ctx, &components, &target).await
            }
            ReassignCommand::Reconfigure => self.reconfigure(ctx).await,
            ReassignCommand::StartZooKeeperServers => {
                let hosts = self.plan.hosts_of("ZOOKEEPER_SERVER");
                common::update_component(ctx, "ZOOKEEPER_SERVER", &hosts, "Start", STATE_STARTED)
                    .await
            }
            ReassignCommand::StartNameNode => {
                let hosts: Vec<String> = self
                    .plan
                    .hosts_of("NAMENODE")
                    .into_iter()
                    .filter(|h| *h != self.plan.source_host)
                    .collect();
                common::update_component(ctx, "NAMENODE", &hosts, "Start", STATE_STARTED).await
            }
            ReassignCommand::CleanMySqlServer => self.mysql_command(ctx, "service.mysql.clean").await,
            ReassignCommand::ConfigureMySqlServer => {
                self.mysql_command(ctx, "service.mysql.configure").await
            }
            ReassignCommand::StartMySqlServer => {
                let host = self.plan.mysql_host()?;
                self.start_mysql_on(ctx, host).await
            }
            ReassignCommand::StartNewMySqlServer => {
                let host = self.plan.target_host.clone();
                self.start_mysql_on(ctx, host).await
            }
            ReassignCommand::RestartMySqlServer => self.restart_mysql(ctx).await,
            ReassignCommand::TestDbConnection => self.test_db_connection(ctx).await,
        }
    }
}
