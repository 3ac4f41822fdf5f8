use super::common::SiteConfig;
use super::ha_namenode::{self, HaFinalizeCommand, HaFinalizePage, HaPlan};
use super::reassign_master::{
    self, apply_additional_configs, DatabaseSettings, ReassignCommand, ReassignMasterPage,
    ReassignPlan,
};
use super::{advance_if_succeeded, task_runner_for};
use crate::task_runner::{CommandContext, ProgressPage, RunStatus, TaskRunner};
use crate::wizard::{MasterComponentHost, WizardServices};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use wizard_core::ajax::{AjaxResponse, FakeDispatcher};
use wizard_core::cluster_status::InMemoryClusterStatus;
use wizard_core::local_store::MemoryStore;
use wizard_core::mapper::RecordStore;
use wizard_core::task::{Task, TaskCommand, TaskStatus};
use wizard_error::{WizardError, NO_SUCH_RESOURCE};

/// Everything in memory, requests answered by `dispatcher`.
fn in_memory(dispatcher: FakeDispatcher) -> WizardServices {
    WizardServices {
        dispatcher: Arc::new(dispatcher),
        local_store: Arc::new(MemoryStore::new()),
        cluster_status: Arc::new(InMemoryClusterStatus::new()),
        records: RecordStore::shared(),
    }
}

fn plan(component: &str) -> ReassignPlan {
    ReassignPlan {
        component_name: component.to_string(),
        service_name: "HDFS".to_string(),
        source_host: "host1".to_string(),
        target_host: "host2".to_string(),
        installed_services: vec!["HDFS".to_string(), "YARN".to_string(), "HIVE".to_string()],
        master_component_hosts: vec![
            master("NAMENODE", "host1"),
            master("NAMENODE", "host3"),
            master("ZOOKEEPER_SERVER", "host3"),
            master("MYSQL_SERVER", "host4"),
        ],
        ..ReassignPlan::default()
    }
}

fn master(component: &str, host: &str) -> MasterComponentHost {
    MasterComponentHost {
        component: component.to_string(),
        host_name: host.to_string(),
        service_id: String::new(),
        is_installed: true,
    }
}

fn task_names<P: ProgressPage>(page: P) -> Vec<&'static str> {
    let mut runner = TaskRunner::new(page, Arc::new(FakeDispatcher::new()));
    runner.initialize_tasks().unwrap();
    runner.tasks().iter().map(|t| t.command.name()).collect()
}

fn configs_fake() -> FakeDispatcher {
    let fake = FakeDispatcher::new().with_cluster_name("c1").with_completed_requests();
    fake.respond_ok(
        "config.tags",
        json!({"Clusters": {"desired_configs": {
            "hdfs-site": {"tag": "t1"},
            "core-site": {"tag": "t2"},
            "hbase-site": {"tag": "t3"}
        }}}),
    );
    fake.respond_ok(
        "reassign.load_configs",
        json!({"items": [
            {"type": "hdfs-site", "tag": "t1", "properties": {
                "dfs.namenode.http-address": "host1:50070",
                "dfs.replication": "3"
            }},
            {"type": "core-site", "tag": "t2", "properties": {"fs.defaultFS": "hdfs://host1:8020"}},
            {"type": "hbase-site", "tag": "t3", "properties": {
                "hbase.rootdir": "hdfs://host1:8020/apps/hbase/data"
            }}
        ]}),
    );
    fake.respond_ok("common.services.update", json!({"Requests": {"id": 31}}));
    fake
}

#[test]
fn plain_master_keeps_core_commands_in_order() {
    assert_eq!(
        task_names(ReassignMasterPage::new(plan("NAMENODE"))),
        vec![
            "stopRequiredServices",
            "createHostComponents",
            "putHostComponentsInMaintenanceMode",
            "reconfigure",
            "installHostComponents",
            "deleteHostComponents",
            "startRequiredServices",
        ]
    );
}

#[test]
fn namenode_ha_with_manual_steps_keeps_restart_commands() {
    let mut p = plan("NAMENODE");
    p.namenode_ha = true;
    p.has_manual_steps = true;
    assert_eq!(
        task_names(ReassignMasterPage::new(p)),
        vec![
            "stopRequiredServices",
            "createHostComponents",
            "putHostComponentsInMaintenanceMode",
            "reconfigure",
            "installHostComponents",
            "startZooKeeperServers",
            "startNameNode",
        ]
    );
}

#[test]
fn local_mysql_hive_uses_the_database_command_list() {
    assert_eq!(
        task_names(ReassignMasterPage::new(plan("HIVE_SERVER"))),
        vec![
            "createHostComponents",
            "installHostComponents",
            "configureMySqlServer",
            "restartMySqlServer",
            "testDBConnection",
            "stopRequiredServices",
            "cleanMySqlServer",
            "putHostComponentsInMaintenanceMode",
            "reconfigure",
            "deleteHostComponents",
            "configureMySqlServer",
            "startRequiredServices",
        ]
    );
}

#[test]
fn remote_database_drops_every_mysql_command() {
    let mut p = plan("OOZIE_SERVER");
    p.database = DatabaseSettings {
        db_type: "postgres".to_string(),
        is_remote: true,
        ..DatabaseSettings::default()
    };
    assert_eq!(
        task_names(ReassignMasterPage::new(p)),
        vec![
            "createHostComponents",
            "installHostComponents",
            "testDBConnection",
            "stopRequiredServices",
            "putHostComponentsInMaintenanceMode",
            "reconfigure",
            "deleteHostComponents",
            "startRequiredServices",
        ]
    );
}

#[test]
fn derby_skips_the_connection_test() {
    let mut p = plan("OOZIE_SERVER");
    p.database.db_type = "derby".to_string();
    let names = task_names(ReassignMasterPage::new(p));
    assert!(!names.contains(&"testDBConnection"));
    assert!(!names.contains(&"configureMySqlServer"));
}

#[test]
fn moving_mysql_keeps_mysql_commands_but_not_clean() {
    assert_eq!(
        task_names(ReassignMasterPage::new(plan("MYSQL_SERVER"))),
        vec![
            "stopRequiredServices",
            "createHostComponents",
            "putHostComponentsInMaintenanceMode",
            "reconfigure",
            "installHostComponents",
            "deleteHostComponents",
            "configureMySqlServer",
            "startMySqlServer",
            "startNewMySqlServer",
            "startRequiredServices",
        ]
    );
}

#[test]
fn unrelated_services_stay_up() {
    let p = plan("RESOURCEMANAGER");
    assert_eq!(
        p.required_services(),
        Some(vec!["YARN".to_string(), "HIVE".to_string()])
    );
    assert_eq!(plan("NAMENODE").required_services(), None);
}

#[tokio::test]
async fn delete_of_one_component_completes_after_one_request() {
    let fake = FakeDispatcher::new().with_cluster_name("c1");
    let mut page = ReassignMasterPage::new(plan("C1"));
    let mut task = Task::new(0, ReassignCommand::DeleteHostComponents, "Delete");
    let mut ctx = CommandContext::new(&fake, &mut task, None, Duration::from_millis(1));

    page.execute(ReassignCommand::DeleteHostComponents, &mut ctx)
        .await
        .unwrap();

    let sent = fake.requests_named("common.delete.host_component");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data_str("hostName"), Some("host1"));
    assert_eq!(sent[0].data_str("componentName"), Some("C1"));
    assert_eq!(page.multi_task_counter().count(), 1);
    assert!(page.multi_task_counter().is_complete());
}

#[tokio::test]
async fn already_deleted_component_counts_as_success() {
    let fake = FakeDispatcher::new();
    fake.fail_with(
        "common.delete.host_component",
        404,
        &format!("{}: component not found", NO_SUCH_RESOURCE),
    );
    let mut p = plan("NAMENODE");
    p.namenode_ha = true;
    let mut page = ReassignMasterPage::new(p);
    let mut task = Task::new(0, ReassignCommand::DeleteHostComponents, "Delete");
    let mut ctx = CommandContext::new(&fake, &mut task, None, Duration::from_millis(1));

    page.execute(ReassignCommand::DeleteHostComponents, &mut ctx)
        .await
        .unwrap();
    assert_eq!(fake.requests_named("common.delete.host_component").len(), 2);
    assert_eq!(page.multi_task_counter().count(), 2);
}

#[test]
fn ha_namenode_keeps_rpc_address_and_default_fs() {
    let site = |name: &str, props: Value| SiteConfig {
        site: name.to_string(),
        tag: "t".to_string(),
        properties: match props {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    };
    let mut configs = vec![
        site("hdfs-site", json!({"dfs.namenode.rpc-address": "host1:8020"})),
        site("core-site", json!({"fs.defaultFS": "hdfs://ns1"})),
    ];
    apply_additional_configs(&mut configs, "NAMENODE", true, "host2");
    assert_eq!(configs[0].properties["dfs.namenode.rpc-address"], "host1:8020");
    assert_eq!(configs[0].properties["dfs.namenode.http-address"], "host2:50070");
    assert_eq!(configs[1].properties["fs.defaultFS"], "hdfs://ns1");

    apply_additional_configs(&mut configs, "NAMENODE", false, "host2");
    assert_eq!(configs[1].properties["fs.defaultFS"], "hdfs://host2:8020");
}

#[tokio::test]
async fn reassign_runs_to_completion_and_advances_the_wizard() {
    let fake = configs_fake();
    let services = in_memory(fake.clone());
    let mut wizard = reassign_master::wizard(services);
    wizard.save_cluster_name("c1").unwrap();
    wizard.save(reassign_master::PLAN_KEY, &plan("NAMENODE")).unwrap();
    wizard.load_step(reassign_master::PROGRESS_STEP).await.unwrap();
    wizard
        .set_current_step(reassign_master::PROGRESS_STEP, false)
        .await
        .unwrap();

    let page = ReassignMasterPage::from_wizard(&wizard).unwrap();
    let mut runner = task_runner_for(&wizard, page).with_poll_interval(Duration::from_millis(1));
    let status = runner.run().await.unwrap();

    assert_eq!(status, RunStatus::Succeeded);
    assert!(runner.tasks().iter().all(|t| t.status == TaskStatus::Completed));
    // Stop and start both waited on request 31.
    assert_eq!(fake.requests_named("background_operations.get_by_request").len(), 2);

    let saved = fake.requests_named("common.across.services.configurations");
    assert_eq!(saved.len(), 1);
    let desired = &saved[0].data["data"][0]["Clusters"]["desired_config"];
    let core = desired
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["type"] == "core-site")
        .unwrap();
    assert_eq!(core["properties"]["fs.defaultFS"], "hdfs://host2:8020");

    let properties = runner.page().service_properties().clone();
    wizard.save_service_config_properties(&properties).unwrap();
    advance_if_succeeded(&mut wizard, status).await.unwrap();
    assert_eq!(wizard.current_step(), reassign_master::PROGRESS_STEP + 1);
    assert_eq!(
        wizard.load_service_config_properties().unwrap().unwrap()["hdfs-site"]["dfs.replication"],
        "3"
    );
}

#[tokio::test]
async fn missing_plan_blocks_the_progress_step() {
    let fake = FakeDispatcher::new();
    let mut wizard = reassign_master::wizard(in_memory(fake.clone()));
    wizard.save_cluster_name("c1").unwrap();

    let err = wizard
        .load_step(reassign_master::PROGRESS_STEP)
        .await
        .unwrap_err();
    assert!(matches!(err, WizardError::StepLoad { .. }));
    assert!(!wizard.is_step_ready(reassign_master::PROGRESS_STEP));
    assert_eq!(fake.request_count(), 0);
}

#[tokio::test]
async fn failed_connection_check_fails_the_task() {
    let fake = FakeDispatcher::new();
    fake.respond_ok("cluster.custom_action.create", json!({"Requests": {"id": 5}}));
    fake.enqueue(
        "custom_action.request",
        Ok(AjaxResponse::ok(json!({"items": [{"Tasks": {"status": "IN_PROGRESS"}}]}))),
    );
    fake.enqueue(
        "custom_action.request",
        Ok(AjaxResponse::ok(json!({"items": [{"Tasks": {
            "status": "COMPLETED",
            "structured_out": {"db_connection_check": {"exit_code": 1, "message": "Access denied"}}
        }}]}))),
    );
    let mut page = ReassignMasterPage::new(plan("HIVE_METASTORE"));
    let mut task = Task::new(0, ReassignCommand::TestDbConnection, "Test");
    let mut ctx = CommandContext::new(&fake, &mut task, None, Duration::from_millis(1));

    let err = page
        .execute(ReassignCommand::TestDbConnection, &mut ctx)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Access denied"));
    let polls = fake.requests_named("custom_action.request");
    assert_eq!(polls.len(), 2);
    assert!(polls[0].resolved.path.contains("/requests/5/tasks/"));
}

#[tokio::test]
async fn failing_maintenance_mode_blocks_later_tasks_until_retry() {
    let fake = configs_fake();
    fake.fail_with("common.host.host_component.passive", 500, "Server Error");
    let services = in_memory(fake.clone());
    let mut wizard = reassign_master::wizard(services);
    wizard.save(reassign_master::PLAN_KEY, &plan("NAMENODE")).unwrap();
    let page = ReassignMasterPage::from_wizard(&wizard).unwrap();
    let mut runner = task_runner_for(&wizard, page).with_poll_interval(Duration::from_millis(1));

    assert_eq!(runner.run().await.unwrap(), RunStatus::Failed);
    let failed = &runner.tasks()[2];
    assert_eq!(failed.command, ReassignCommand::PutHostComponentsInMaintenanceMode);
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.show_retry && failed.show_rollback);
    assert!(runner.tasks()[3..].iter().all(|t| t.status == TaskStatus::Pending));
    assert!(fake.requests_named("config.tags").is_empty());

    fake.respond_ok("common.host.host_component.passive", Value::Null);
    assert_eq!(runner.retry().await.unwrap(), RunStatus::Succeeded);
    assert!(runner.tasks().iter().all(|t| t.status == TaskStatus::Completed));
}

fn ha_plan(services: &[&str]) -> HaPlan {
    HaPlan {
        name_service_id: "ns1".to_string(),
        current_namenode_host: "nn1".to_string(),
        additional_namenode_host: "nn2".to_string(),
        secondary_namenode_host: "snn".to_string(),
        installed_services: services.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn ha_finalize_points_hbase_at_the_nameservice() {
    let fake = configs_fake();
    fake.fail_with("common.delete.host_component", 404, NO_SUCH_RESOURCE);
    let services = in_memory(fake.clone());
    let mut wizard = ha_namenode::wizard(services);
    wizard.save(ha_namenode::PLAN_KEY, &ha_plan(&["HDFS", "HBASE"])).unwrap();
    wizard.save_cluster_name("c1").unwrap();
    wizard.load_step(ha_namenode::PROGRESS_STEP).await.unwrap();

    let page = HaFinalizePage::from_wizard(&wizard).unwrap();
    let mut runner = task_runner_for(&wizard, page).with_poll_interval(Duration::from_millis(1));
    assert_eq!(runner.run().await.unwrap(), RunStatus::Succeeded);

    let commands: Vec<HaFinalizeCommand> = runner.tasks().iter().map(|t| t.command).collect();
    assert!(!commands.contains(&HaFinalizeCommand::InstallPxf));
    assert!(commands.contains(&HaFinalizeCommand::ReconfigureHBase));

    let created = fake.requests_named("admin.high_availability.create_component");
    let hosts: Vec<_> = created.iter().filter_map(|r| r.data_str("hostName")).collect();
    assert_eq!(created.len(), 2);
    assert!(hosts.contains(&"nn1") && hosts.contains(&"nn2"));

    let saved = fake.requests_named("common.across.services.configurations");
    let hbase = &saved[0].data["data"][0]["Clusters"]["desired_config"][0];
    assert_eq!(hbase["type"], "hbase-site");
    assert_eq!(hbase["properties"]["hbase.rootdir"], "hdfs://ns1/apps/hbase/data");
}
