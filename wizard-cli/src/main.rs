use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use wizard_core::ajax::{AjaxRequest, Dispatcher, FakeDispatcher, HttpDispatcher};
use wizard_core::cluster_status::{ClusterStatus, InMemoryClusterStatus, PersistedClusterStatus};
use wizard_core::config::ConsoleConfig;
use wizard_core::local_store::{FileStore, LocalStore, MemoryStore};
use wizard_core::logging;
use wizard_core::mapper::mpack::{select_mpacks, RegistryMpackMapper};
use wizard_core::mapper::stack_version::{StackVersionMapper, OS_MODEL, REPO_MODEL, STACK_MODEL};
use wizard_core::mapper::{Mapper, RecordStore};
use wizard_workflow::task_store::{NamespaceTaskStore, StateStore};
use wizard_workflow::wizards::ha_namenode::{self, HaFinalizePage, HaPlan};
use wizard_workflow::wizards::mpack_download::MpackDownloadController;
use wizard_workflow::wizards::reassign_master::{
    self, DatabaseSettings, ReassignMasterPage, ReassignPlan,
};
use wizard_workflow::wizards::{advance_if_succeeded, task_runner_for};
use wizard_workflow::{
    MasterComponentHost, ProgressPage, RunStatus, TaskEvent, WizardController, WizardServices,
};

mod cli;

use cli::{Cli, Command, WizardKind};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref());

    let mut config = ConsoleConfig::load_from(&cli.config)?;
    if let Some(dir) = cli.state_dir.clone() {
        config.storage.state_dir = dir;
    }
    config.validate()?;

    let services = build_services(&config, cli.dry_run).await?;
    let interval = if cli.dry_run {
        Duration::from_millis(10)
    } else {
        config.polling.interval()
    };

    match cli.command {
        Command::Reassign {
            component,
            service,
            source_host,
            target_host,
            manual_steps,
            namenode_ha,
            installed_services,
            master_hosts,
            db_type,
            remote_db,
        } => {
            let plan = ReassignPlan {
                component_name: component,
                service_name: service,
                source_host,
                target_host,
                has_manual_steps: manual_steps,
                namenode_ha,
                installed_services,
                master_component_hosts: master_hosts
                    .into_iter()
                    .map(|(component, host_name)| MasterComponentHost {
                        component,
                        host_name,
                        service_id: String::new(),
                        is_installed: true,
                    })
                    .collect(),
                database: DatabaseSettings {
                    db_type,
                    is_remote: remote_db,
                    ..DatabaseSettings::default()
                },
            };
            let mut wizard = reassign_master::wizard(services);
            wizard.restore()?;
            wizard.submit_plan(reassign_master::PLAN_KEY, &plan)?;
            run_reassign(&mut wizard, interval, false).await
        }
        Command::EnableHa {
            nameservice,
            current_namenode,
            additional_namenode,
            secondary_namenode,
            installed_services,
        } => {
            let plan = HaPlan {
                name_service_id: nameservice,
                current_namenode_host: current_namenode,
                additional_namenode_host: additional_namenode,
                secondary_namenode_host: secondary_namenode.unwrap_or_default(),
                installed_services,
            };
            let mut wizard = ha_namenode::wizard(services);
            wizard.restore()?;
            wizard.submit_plan(ha_namenode::PLAN_KEY, &plan)?;
            run_enable_ha(&mut wizard, interval, false).await
        }
        Command::Retry { wizard: kind } => {
            let mut wizard = open_wizard(kind, services)?;
            match kind {
                WizardKind::Reassign => run_reassign(&mut wizard, interval, true).await,
                WizardKind::EnableHa => run_enable_ha(&mut wizard, interval, true).await,
            }
        }
        Command::Status { wizard: kind } => show_status(&open_wizard(kind, services)?),
        Command::Reset { wizard: kind } => {
            let mut wizard = open_wizard(kind, services)?;
            wizard.clear_all_steps()?;
            println!("{} reset", wizard.name());
            Ok(())
        }
        Command::MapStacks { file, stack } => map_stacks(&services, file.as_deref(), &stack).await,
        Command::DownloadMpacks {
            registry_file,
            mpacks,
        } => download_mpacks(&services, registry_file.as_deref(), &mpacks).await,
    }
}

async fn build_services(config: &ConsoleConfig, dry_run: bool) -> Result<WizardServices> {
    let records = RecordStore::shared();
    if dry_run {
        log::info!("Dry run: requests are answered locally and state is kept in memory");
        let cluster = config
            .server
            .cluster_name
            .clone()
            .unwrap_or_else(|| "dry-run".to_string());
        return Ok(WizardServices {
            dispatcher: Arc::new(dry_run_dispatcher(&cluster)),
            local_store: Arc::new(MemoryStore::new()),
            cluster_status: Arc::new(InMemoryClusterStatus::new()),
            records,
        });
    }

    let mut http = HttpDispatcher::new(&config.server).context("Failed to build HTTP client")?;
    if config.server.cluster_name.is_none() {
        let response = http
            .send(AjaxRequest::new("cluster.load_cluster_name"))
            .await
            .context("Failed to look up the cluster name")?;
        let name = response
            .body
            .pointer("/items/0/Clusters/cluster_name")
            .and_then(Value::as_str)
            .context("The server manages no cluster")?;
        log::info!("Using cluster {}", name);
        http.set_cluster_name(name);
    }
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(http);
    let local_store: Arc<dyn LocalStore> =
        Arc::new(FileStore::new(config.storage.state_dir.clone()));
    let cluster_status: Arc<dyn ClusterStatus> =
        Arc::new(PersistedClusterStatus::new(Arc::clone(&dispatcher)));
    Ok(WizardServices {
        dispatcher,
        local_store,
        cluster_status,
        records,
    })
}

/// Succeeds every request with the smallest body the wizards accept.
fn dry_run_dispatcher(cluster: &str) -> FakeDispatcher {
    let fake = FakeDispatcher::new()
        .with_cluster_name(cluster)
        .with_completed_requests();
    fake.respond_ok(
        "cluster.load_cluster_name",
        json!({"items": [{"Clusters": {"cluster_name": cluster}}]}),
    );
    fake.respond_ok("config.tags", json!({"Clusters": {"desired_configs": {}}}));
    fake.respond_ok("cluster.custom_action.create", json!({"Requests": {"id": 1}}));
    fake.respond_ok("custom_action.request", json!({"Tasks": {"status": "COMPLETED"}}));
    fake
}

fn open_wizard(kind: WizardKind, services: WizardServices) -> Result<WizardController> {
    let mut wizard = match kind {
        WizardKind::Reassign => reassign_master::wizard(services),
        WizardKind::EnableHa => ha_namenode::wizard(services),
    };
    wizard.restore()?;
    Ok(wizard)
}

async fn print_events(mut events: UnboundedReceiver<TaskEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TaskEvent::Started { id, command } => println!("▶ [{}] {}", id, command),
            TaskEvent::Progress { id, percent } => log::debug!("[{}] {}%", id, percent),
            TaskEvent::Completed { id, command } => println!("✅ [{}] {}", id, command),
            TaskEvent::Failed {
                id,
                command,
                message,
            } => println!("❌ [{}] {}: {}", id, command, message),
            TaskEvent::Finished(status) => println!("Run finished: {:?}", status),
        }
    }
}

/// Runs (or retries) a progress page, printing task events as they happen.
async fn drive<P: ProgressPage>(
    wizard: &WizardController,
    page: P,
    interval: Duration,
    retry: bool,
) -> Result<(RunStatus, P)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx));
    let mut runner = task_runner_for(wizard, page)
        .with_events(tx)
        .with_poll_interval(interval);
    let status = if retry {
        runner.retry().await?
    } else {
        runner.run().await?
    };
    let page = runner.into_page();
    printer.await.context("Event printer stopped")?;
    Ok((status, page))
}

async fn run_reassign(wizard: &mut WizardController, interval: Duration, retry: bool) -> Result<()> {
    wizard.load_step(reassign_master::PROGRESS_STEP).await?;
    wizard
        .set_current_step(reassign_master::PROGRESS_STEP, false)
        .await?;
    let page = ReassignMasterPage::from_wizard(wizard)?;
    let (status, page) = drive(wizard, page, interval, retry).await?;
    if !page.service_properties().is_empty() {
        wizard.save_service_config_properties(page.service_properties())?;
    }
    finish_run(wizard, status).await
}

async fn run_enable_ha(wizard: &mut WizardController, interval: Duration, retry: bool) -> Result<()> {
    wizard.load_step(ha_namenode::PROGRESS_STEP).await?;
    wizard
        .set_current_step(ha_namenode::PROGRESS_STEP, false)
        .await?;
    let page = HaFinalizePage::from_wizard(wizard)?;
    let (status, _) = drive(wizard, page, interval, retry).await?;
    finish_run(wizard, status).await
}

async fn finish_run(wizard: &mut WizardController, status: RunStatus) -> Result<()> {
    match status {
        RunStatus::Succeeded => {
            advance_if_succeeded(wizard, status).await?;
            wizard.finish().await?;
            println!("🎉 {} completed", wizard.name());
            Ok(())
        }
        other => bail!(
            "{} stopped ({:?}); fix the cause and run `ambari-wizard retry`",
            wizard.name(),
            other
        ),
    }
}

fn show_status(wizard: &WizardController) -> Result<()> {
    println!(
        "{}: step {} of {}",
        wizard.name(),
        wizard.current_step(),
        wizard.total_steps()
    );
    let store = NamespaceTaskStore::new(Arc::clone(&wizard.services().local_store), wizard.name());
    match store.load()? {
        Some(state) => {
            for task in &state.tasks {
                println!("  [{}] {:<36} {}", task.id, task.command, task.status);
            }
        }
        None => println!("  no tasks have run yet"),
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn fetch_or_read(
    services: &WizardServices,
    file: Option<&Path>,
    request: AjaxRequest,
) -> Result<Value> {
    match file {
        Some(path) => read_json(path),
        None => Ok(services.dispatcher.send(request).await?.body),
    }
}

fn lock_records(services: &WizardServices) -> std::sync::MutexGuard<'_, RecordStore> {
    match services.records.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn map_stacks(services: &WizardServices, file: Option<&Path>, stack: &str) -> Result<()> {
    let json = fetch_or_read(
        services,
        file,
        AjaxRequest::new("wizard.stacks_versions").with("stackName", stack),
    )
    .await?;
    let mut records = lock_records(services);
    let loaded = StackVersionMapper::new().map(&json, &mut *records)?;
    log::info!("Mapped {} records", loaded);
    for stack in records.all(STACK_MODEL) {
        println!("{}", stack.get("id").and_then(Value::as_str).unwrap_or("?"));
    }
    println!(
        "{} stacks, {} operating systems, {} repositories",
        records.count(STACK_MODEL),
        records.count(OS_MODEL),
        records.count(REPO_MODEL)
    );
    Ok(())
}

async fn download_mpacks(
    services: &WizardServices,
    registry_file: Option<&Path>,
    choices: &[(String, String)],
) -> Result<()> {
    let json = fetch_or_read(services, registry_file, AjaxRequest::new("registry.all")).await?;
    let selected = {
        let mut records = lock_records(services);
        RegistryMpackMapper::new().map(&json, &mut *records)?;
        select_mpacks(&*records, choices)?
    };

    let mut controller =
        MpackDownloadController::from_selected(Arc::clone(&services.dispatcher), &selected);
    controller.download_mpacks().await;
    for mpack in controller.mpacks() {
        match (&mpack.failure_message, mpack.succeeded) {
            (_, true) => println!("✅ {} ({})", mpack.display_name, mpack.url),
            (Some(message), false) => println!("❌ {}: {}", mpack.display_name, message),
            (None, false) => println!("… {}", mpack.display_name),
        }
    }
    if controller.is_submit_disabled() {
        bail!("Some management packs could not be downloaded");
    }
    Ok(())
}
