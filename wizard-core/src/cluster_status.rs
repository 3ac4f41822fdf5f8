//! Cluster-wide wizard status shared with other console sessions.

use crate::ajax::{AjaxRequest, Dispatcher};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wizard_error::{WizardError, WizardResult};

pub const CLUSTER_STATUS_KEY: &str = "CLUSTER_CURRENT_STATUS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatusSnapshot {
    pub cluster_name: String,
    pub cluster_state: String,
    pub wizard_controller_name: String,
    pub current_step: usize,
    pub completed: bool,
}

#[async_trait]
pub trait ClusterStatus: Send + Sync {
    async fn set_cluster_status(&self, snapshot: ClusterStatusSnapshot) -> WizardResult<()>;

    /// Re-reads cluster-wide state after a wizard finishes.
    async fn refresh(&self) -> WizardResult<()>;
}

/// Stores the snapshot on the server's persist endpoint.
pub struct PersistedClusterStatus {
    dispatcher: Arc<dyn Dispatcher>,
    last: Mutex<Option<ClusterStatusSnapshot>>,
}

impl PersistedClusterStatus {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            last: Mutex::new(None),
        }
    }

    pub fn last(&self) -> Option<ClusterStatusSnapshot> {
        match self.last.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remember(&self, snapshot: Option<ClusterStatusSnapshot>) {
        let mut guard = match self.last.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = snapshot;
    }
}

#[async_trait]
impl ClusterStatus for PersistedClusterStatus {
    async fn set_cluster_status(&self, snapshot: ClusterStatusSnapshot) -> WizardResult<()> {
        let value = serde_json::to_string(&snapshot)?;
        self.dispatcher
            .send(
                AjaxRequest::new("cluster.state")
                    .with("key", CLUSTER_STATUS_KEY)
                    .with("value", value),
            )
            .await?;
        log::info!(
            "Cluster status: {} step {} ({})",
            snapshot.wizard_controller_name,
            snapshot.current_step,
            snapshot.cluster_state
        );
        self.remember(Some(snapshot));
        Ok(())
    }

    async fn refresh(&self) -> WizardResult<()> {
        let response = self
            .dispatcher
            .send(AjaxRequest::new("persist.get").with("key", CLUSTER_STATUS_KEY))
            .await?;
        let snapshot = match response.body {
            Value::Null => None,
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some(serde_json::from_str(&text)?),
            other => Some(serde_json::from_value(other).map_err(|e| {
                WizardError::UnexpectedResponse {
                    request: "persist.get".to_string(),
                    reason: e.to_string(),
                }
            })?),
        };
        self.remember(snapshot);
        Ok(())
    }
}

/// Keeps snapshots in memory; used for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryClusterStatus {
    snapshots: Mutex<Vec<ClusterStatusSnapshot>>,
    refreshes: AtomicUsize,
}

impl InMemoryClusterStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<ClusterStatusSnapshot> {
        match self.snapshots.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterStatus for InMemoryClusterStatus {
    async fn set_cluster_status(&self, snapshot: ClusterStatusSnapshot) -> WizardResult<()> {
        let mut guard = match self.snapshots.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(snapshot);
        Ok(())
    }

    async fn refresh(&self) -> WizardResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
