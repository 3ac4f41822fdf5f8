//! Step controller shared by every wizard.
//!
//! A [`WizardController`] owns the wizard's content bag and step pointer,
//! mirrors both into the wizard's namespace in the local store, and runs a
//! step's loaders before the step is considered ready.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use wizard_core::ajax::{AjaxRequest, Dispatcher};
use wizard_core::cluster_status::{ClusterStatus, ClusterStatusSnapshot};
use wizard_core::local_store::LocalStore;
use wizard_core::mapper::SharedRecordStore;
use wizard_error::{WizardError, WizardResult};

pub const CURRENT_STEP_KEY: &str = "currentStep";
pub const CLUSTER_NAME_KEY: &str = "clusterName";
pub const HOSTS_KEY: &str = "hosts";
pub const MASTER_COMPONENT_HOSTS_KEY: &str = "masterComponentHosts";
pub const SERVICE_CONFIG_PROPERTIES_KEY: &str = "serviceConfigProperties";

/// Collaborators a wizard is wired with.
#[derive(Clone)]
pub struct WizardServices {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub local_store: Arc<dyn LocalStore>,
    pub cluster_status: Arc<dyn ClusterStatus>,
    pub records: SharedRecordStore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterComponentHost {
    pub component: String,
    pub host_name: String,
    pub service_id: String,
    #[serde(default)]
    pub is_installed: bool,
}

pub type LoadFuture<'a> = BoxFuture<'a, WizardResult<()>>;
type SyncLoader = Box<dyn Fn(&mut WizardController) -> WizardResult<()> + Send + Sync>;
type AsyncLoader = Box<dyn for<'a> Fn(&'a mut WizardController) -> LoadFuture<'a> + Send + Sync>;

pub enum LoadEntry {
    Sync { name: &'static str, run: SyncLoader },
    Async { name: &'static str, run: AsyncLoader },
}

impl LoadEntry {
    pub fn sync<F>(name: &'static str, run: F) -> Self
    where
        F: Fn(&mut WizardController) -> WizardResult<()> + Send + Sync + 'static,
    {
        LoadEntry::Sync {
            name,
            run: Box::new(run),
        }
    }

    pub fn async_<F>(name: &'static str, run: F) -> Self
    where
        F: for<'a> Fn(&'a mut WizardController) -> LoadFuture<'a> + Send + Sync + 'static,
    {
        LoadEntry::Async {
            name,
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoadEntry::Sync { name, .. } | LoadEntry::Async { name, .. } => name,
        }
    }
}

impl fmt::Debug for LoadEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            LoadEntry::Sync { .. } => "sync",
            LoadEntry::Async { .. } => "async",
        };
        write!(f, "{}({})", kind, self.name())
    }
}

/// Loaders to run, in order, before each step is ready.
#[derive(Debug, Default)]
pub struct LoadMap {
    steps: BTreeMap<usize, Vec<LoadEntry>>,
}

impl LoadMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: usize, entries: Vec<LoadEntry>) -> Self {
        self.steps.entry(step).or_default().extend(entries);
        self
    }

    pub fn entries(&self, step: usize) -> &[LoadEntry] {
        self.steps.get(&step).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Namespaced persistence of named attributes.
pub trait Persistable {
    fn namespace(&self) -> &str;

    fn local_store(&self) -> &dyn LocalStore;

    fn set_db_property<T: Serialize>(&self, key: &str, value: &T) -> WizardResult<()> {
        let value = serde_json::to_value(value)?;
        self.local_store()
            .set(self.namespace(), key, value)
            .map_err(persistence_error)
    }

    fn get_db_property<T: DeserializeOwned>(&self, key: &str) -> WizardResult<Option<T>> {
        match self
            .local_store()
            .get(self.namespace(), key)
            .map_err(persistence_error)?
        {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn reset_db_namespace(&self) -> WizardResult<()> {
        self.local_store()
            .clear(self.namespace())
            .map_err(persistence_error)
    }
}

fn persistence_error(err: anyhow::Error) -> WizardError {
    WizardError::Persistence(format!("{:#}", err))
}

pub struct WizardController {
    name: String,
    total_steps: usize,
    current_step: usize,
    cluster_state: String,
    content: Map<String, Value>,
    load_map: Arc<LoadMap>,
    ready_step: Option<usize>,
    step_warning: Option<String>,
    services: WizardServices,
}

impl Persistable for WizardController {
    fn namespace(&self) -> &str {
        &self.name
    }

    fn local_store(&self) -> &dyn LocalStore {
        self.services.local_store.as_ref()
    }
}

impl WizardController {
    pub fn new(name: impl Into<String>, total_steps: usize, services: WizardServices) -> Self {
        Self {
            name: name.into(),
            total_steps,
            current_step: 0,
            cluster_state: "DEFAULT".to_string(),
            content: Map::new(),
            load_map: Arc::new(LoadMap::new()),
            ready_step: None,
            step_warning: None,
            services,
        }
    }

    pub fn with_load_map(mut self, load_map: LoadMap) -> Self {
        self.load_map = Arc::new(load_map);
        self
    }

    /// State reported to the cluster while this wizard is running.
    pub fn with_cluster_state(mut self, state: impl Into<String>) -> Self {
        self.cluster_state = state.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.content
    }

    pub fn services(&self) -> &WizardServices {
        &self.services
    }

    pub fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.services.dispatcher)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// Content value that must be present (and not null) to continue.
    pub fn require(&self, key: &str) -> WizardResult<&Value> {
        match self.content.get(key) {
            Some(Value::Null) | None => Err(WizardError::MissingData {
                wizard: self.name.clone(),
                key: key.to_string(),
            }),
            Some(value) => Ok(value),
        }
    }

    pub fn is_step_ready(&self, step: usize) -> bool {
        self.ready_step == Some(step)
    }

    pub fn step_warning(&self) -> Option<&str> {
        self.step_warning.as_deref()
    }

    /// Runs the step's loaders in order; the step is ready only when all succeed.
    ///
    /// A failing loader leaves the step not ready with a warning; nothing is retried.
    pub async fn load_step(&mut self, step: usize) -> WizardResult<()> {
        self.ready_step = None;
        self.step_warning = None;
        let load_map = Arc::clone(&self.load_map);
        for entry in load_map.entries(step) {
            log::debug!("{}: step {} loading {:?}", self.name, step, entry);
            let outcome = match entry {
                LoadEntry::Sync { run, .. } => run(self),
                LoadEntry::Async { run, .. } => run(self).await,
            };
            if let Err(err) = outcome {
                let reason = format!("{} failed: {}", entry.name(), err);
                log::warn!("{}: step {} not ready: {}", self.name, step, reason);
                self.step_warning = Some(reason.clone());
                return Err(WizardError::StepLoad { step, reason });
            }
        }
        self.ready_step = Some(step);
        Ok(())
    }

    /// Moves the step pointer and reports it cluster-wide.
    pub async fn set_current_step(&mut self, step: usize, completed: bool) -> WizardResult<()> {
        if step > self.total_steps {
            return Err(WizardError::Precondition(format!(
                "{} has {} steps, cannot move to {}",
                self.name, self.total_steps, step
            )));
        }
        self.current_step = step;
        self.set_db_property(CURRENT_STEP_KEY, &step)?;
        let snapshot = ClusterStatusSnapshot {
            cluster_name: self.get_str(CLUSTER_NAME_KEY).unwrap_or_default().to_string(),
            cluster_state: self.cluster_state.clone(),
            wizard_controller_name: self.name.clone(),
            current_step: step,
            completed,
        };
        self.services.cluster_status.set_cluster_status(snapshot).await?;
        log::info!("{}: current step {}", self.name, step);
        Ok(())
    }

    pub fn save<T: Serialize>(&mut self, key: &str, value: &T) -> WizardResult<()> {
        let json = serde_json::to_value(value)?;
        self.set_db_property(key, &json)?;
        self.content.insert(key.to_string(), json);
        Ok(())
    }

    /// Stores a newly submitted plan under `key`.
    ///
    /// A plan that differs from the stored one starts the wizard over, so the
    /// task statuses of an earlier run never apply to it. Returns `true` when
    /// the wizard was reset.
    pub fn submit_plan<T: Serialize>(&mut self, key: &str, plan: &T) -> WizardResult<bool> {
        let incoming = serde_json::to_value(plan)?;
        let stored: Option<Value> = self.get_db_property(key)?;
        let reset = stored.as_ref() != Some(&incoming);
        if reset {
            if stored.is_some() {
                log::info!("{}: new {} submitted, discarding the previous run", self.name, key);
            }
            self.clear_all_steps()?;
        } else {
            log::info!("{}: {} unchanged, resuming", self.name, key);
        }
        self.save(key, &incoming)?;
        Ok(reset)
    }

    /// Reads `key` back from the store into content.
    pub fn load<T: DeserializeOwned>(&mut self, key: &str) -> WizardResult<Option<T>> {
        let stored: Option<Value> = self.get_db_property(key)?;
        match stored {
            Some(value) => {
                let typed = serde_json::from_value(value.clone())?;
                self.content.insert(key.to_string(), value);
                Ok(Some(typed))
            }
            None => {
                self.content.remove(key);
                Ok(None)
            }
        }
    }

    pub fn save_cluster_name(&mut self, name: &str) -> WizardResult<()> {
        self.save(CLUSTER_NAME_KEY, &name)
    }

    pub fn load_cluster_name(&mut self) -> WizardResult<Option<String>> {
        self.load(CLUSTER_NAME_KEY)
    }

    pub fn save_hosts(&mut self, hosts: &[String]) -> WizardResult<()> {
        self.save(HOSTS_KEY, &hosts)
    }

    pub fn load_hosts(&mut self) -> WizardResult<Option<Vec<String>>> {
        self.load(HOSTS_KEY)
    }

    pub fn save_master_component_hosts(&mut self, hosts: &[MasterComponentHost]) -> WizardResult<()> {
        self.save(MASTER_COMPONENT_HOSTS_KEY, &hosts)
    }

    pub fn load_master_component_hosts(&mut self) -> WizardResult<Option<Vec<MasterComponentHost>>> {
        self.load(MASTER_COMPONENT_HOSTS_KEY)
    }

    pub fn save_service_config_properties(&mut self, properties: &Map<String, Value>) -> WizardResult<()> {
        self.save(SERVICE_CONFIG_PROPERTIES_KEY, properties)
    }

    pub fn load_service_config_properties(&mut self) -> WizardResult<Option<Map<String, Value>>> {
        self.load(SERVICE_CONFIG_PROPERTIES_KEY)
    }

    /// Reloads the step pointer and every persisted key after a restart.
    pub fn restore(&mut self) -> WizardResult<()> {
        let mut entries = self
            .local_store()
            .entries(&self.name)
            .map_err(persistence_error)?;
        self.current_step = match entries.remove(CURRENT_STEP_KEY) {
            Some(value) => serde_json::from_value(value)?,
            None => 0,
        };
        self.content = entries;
        log::info!(
            "{}: restored step {} with {} keys",
            self.name,
            self.current_step,
            self.content.len()
        );
        Ok(())
    }

    pub fn clear_all_steps(&mut self) -> WizardResult<()> {
        self.content.clear();
        self.current_step = 0;
        self.ready_step = None;
        self.step_warning = None;
        self.reset_db_namespace()
    }

    /// Clears the wizard and asks the cluster-wide state to refresh.
    pub async fn finish(&mut self) -> WizardResult<()> {
        self.clear_all_steps()?;
        self.services.cluster_status.refresh().await?;
        log::info!("{}: finished", self.name);
        Ok(())
    }

    pub async fn load_cluster_name_from_server(&mut self) -> WizardResult<String> {
        let response = self
            .services
            .dispatcher
            .send(AjaxRequest::new("cluster.load_cluster_name"))
            .await?;
        let name = response
            .body
            .get("items")
            .and_then(|items| items.get(0))
            .and_then(|item| item.get("Clusters"))
            .and_then(|c| c.get("cluster_name"))
            .and_then(Value::as_str)
            .ok_or_else(|| WizardError::MissingData {
                wizard: self.name.clone(),
                key: "Clusters.cluster_name".to_string(),
            })?
            .to_string();
        self.save_cluster_name(&name)?;
        Ok(name)
    }
}
