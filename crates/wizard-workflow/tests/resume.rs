use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use wizard_core::ajax::FakeDispatcher;
use wizard_core::cluster_status::InMemoryClusterStatus;
use wizard_core::local_store::FileStore;
use wizard_core::mapper::RecordStore;
use wizard_core::task::{TaskCommand, TaskStatus};
use wizard_workflow::wizards::reassign_master::{self, ReassignMasterPage, ReassignPlan};
use wizard_workflow::wizards::task_runner_for;
use wizard_workflow::{RunStatus, WizardServices};

fn services(dir: &Path, fake: &FakeDispatcher) -> WizardServices {
    WizardServices {
        dispatcher: Arc::new(fake.clone()),
        local_store: Arc::new(FileStore::new(dir)),
        cluster_status: Arc::new(InMemoryClusterStatus::new()),
        records: RecordStore::shared(),
    }
}

fn fake() -> FakeDispatcher {
    let fake = FakeDispatcher::new().with_cluster_name("c1").with_completed_requests();
    fake.respond_ok(
        "config.tags",
        json!({"Clusters": {"desired_configs": {"yarn-site": {"tag": "t1"}}}}),
    );
    fake.respond_ok(
        "reassign.load_configs",
        json!({"items": [{"type": "yarn-site", "tag": "t1", "properties": {}}]}),
    );
    fake
}

#[tokio::test]
async fn restarted_wizard_resumes_at_the_failed_task() {
    let dir = tempdir().unwrap();
    let plan = ReassignPlan {
        component_name: "RESOURCEMANAGER".to_string(),
        service_name: "YARN".to_string(),
        source_host: "rm1".to_string(),
        target_host: "rm2".to_string(),
        installed_services: vec!["HDFS".to_string(), "YARN".to_string()],
        ..ReassignPlan::default()
    };

    let first = fake();
    first.fail_with("common.host_components.update", 500, "agent lost");
    {
        let mut wizard = reassign_master::wizard(services(dir.path(), &first));
        wizard.save_cluster_name("c1").unwrap();
        wizard.save(reassign_master::PLAN_KEY, &plan).unwrap();
        wizard.load_step(reassign_master::PROGRESS_STEP).await.unwrap();

        let page = ReassignMasterPage::from_wizard(&wizard).unwrap();
        let mut runner =
            task_runner_for(&wizard, page).with_poll_interval(Duration::from_millis(1));
        assert_eq!(runner.run().await.unwrap(), RunStatus::Failed);
        assert_eq!(runner.tasks()[4].command.name(), "installHostComponents");
    }

    let second = fake();
    let mut wizard = reassign_master::wizard(services(dir.path(), &second));
    wizard.restore().unwrap();
    wizard.load_step(reassign_master::PROGRESS_STEP).await.unwrap();
    let page = ReassignMasterPage::from_wizard(&wizard).unwrap();
    assert_eq!(page.plan(), &plan);

    let mut runner = task_runner_for(&wizard, page).with_poll_interval(Duration::from_millis(1));
    runner.initialize_tasks().unwrap();
    let statuses: Vec<TaskStatus> = runner.tasks().iter().map(|t| t.status).collect();
    assert_eq!(
        statuses[..5],
        [
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ]
    );

    // Nothing runs past a failed task without a retry.
    assert_eq!(runner.run().await.unwrap(), RunStatus::Failed);
    assert_eq!(second.request_count(), 0);

    assert_eq!(runner.retry().await.unwrap(), RunStatus::Succeeded);
    assert!(second
        .requests_named("admin.high_availability.create_component")
        .is_empty());
    let started = second.requests_named("common.services.update");
    assert_eq!(started.len(), 1);
    assert_eq!(
        started[0].data_str("urlParams"),
        Some("ServiceInfo/service_name.in(YARN)")
    );
    assert_eq!(started[0].data["ServiceInfo"], json!({"state": "STARTED"}));
}

#[tokio::test]
async fn new_plan_in_the_same_state_dir_starts_from_the_first_task() {
    let dir = tempdir().unwrap();
    let plan = |target: &str| ReassignPlan {
        component_name: "RESOURCEMANAGER".to_string(),
        service_name: "YARN".to_string(),
        source_host: "rm1".to_string(),
        target_host: target.to_string(),
        installed_services: vec!["HDFS".to_string(), "YARN".to_string()],
        ..ReassignPlan::default()
    };

    let first = fake();
    first.fail_with("common.host_components.update", 500, "agent lost");
    {
        let mut wizard = reassign_master::wizard(services(dir.path(), &first));
        wizard.save_cluster_name("c1").unwrap();
        assert!(wizard.submit_plan(reassign_master::PLAN_KEY, &plan("rm2")).unwrap());
        wizard.load_step(reassign_master::PROGRESS_STEP).await.unwrap();
        let page = ReassignMasterPage::from_wizard(&wizard).unwrap();
        let mut runner =
            task_runner_for(&wizard, page).with_poll_interval(Duration::from_millis(1));
        assert_eq!(runner.run().await.unwrap(), RunStatus::Failed);
    }

    let second = fake();
    second.respond_ok(
        "cluster.load_cluster_name",
        json!({"items": [{"Clusters": {"cluster_name": "c1"}}]}),
    );
    let mut wizard = reassign_master::wizard(services(dir.path(), &second));
    wizard.restore().unwrap();
    assert!(wizard.submit_plan(reassign_master::PLAN_KEY, &plan("rm3")).unwrap());
    wizard.load_step(reassign_master::PROGRESS_STEP).await.unwrap();

    let page = ReassignMasterPage::from_wizard(&wizard).unwrap();
    assert_eq!(page.plan(), &plan("rm3"));
    let mut runner = task_runner_for(&wizard, page).with_poll_interval(Duration::from_millis(1));
    runner.initialize_tasks().unwrap();
    assert!(runner
        .tasks()
        .iter()
        .all(|t| t.status == TaskStatus::Pending));

    assert_eq!(runner.run().await.unwrap(), RunStatus::Succeeded);
    let created = second.requests_named("admin.high_availability.create_component");
    assert!(!created.is_empty());
    assert!(created.iter().all(|r| r.data_str("hostName") == Some("rm3")));
    // Services are stopped before the move and started after it.
    assert_eq!(second.requests_named("common.services.update").len(), 2);
}
