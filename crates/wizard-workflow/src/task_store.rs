//! Persisted task statuses, so a restarted wizard resumes where it stopped.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use wizard_core::local_store::LocalStore;
use wizard_core::task::{Task, TaskCommand, TaskStatus};

pub const TASKS_STATUSES_KEY: &str = "tasksStatuses";

pub trait StateStore<S>: Send + Sync {
    fn load(&self) -> Result<Option<S>>;
    fn save(&self, state: &S) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTask {
    pub id: usize,
    pub command: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunState {
    pub version: u32,
    pub current_task: Option<usize>,
    pub tasks: Vec<PersistedTask>,
}

impl TaskRunState {
    pub fn capture<C: TaskCommand>(tasks: &[Task<C>]) -> Self {
        let current_task = tasks
            .iter()
            .find(|t| t.status == TaskStatus::InProgress)
            .map(|t| t.id);
        Self {
            version: 1,
            current_task,
            tasks: tasks
                .iter()
                .map(|t| PersistedTask {
                    id: t.id,
                    command: t.command.name().to_string(),
                    status: t.status,
                })
                .collect(),
        }
    }

    /// Status saved for the task with this id and command, if any.
    pub fn status_of<C: TaskCommand>(&self, task: &Task<C>) -> Option<TaskStatus> {
        self.tasks
            .iter()
            .find(|p| p.id == task.id && p.command == task.command.name())
            .map(|p| p.status)
    }

    pub fn is_completed<C: TaskCommand>(&self, task: &Task<C>) -> bool {
        self.status_of(task) == Some(TaskStatus::Completed)
    }
}

/// Keeps run state under [`TASKS_STATUSES_KEY`] in a wizard namespace.
#[derive(Clone)]
pub struct NamespaceTaskStore {
    store: Arc<dyn LocalStore>,
    namespace: String,
}

impl NamespaceTaskStore {
    pub fn new(store: Arc<dyn LocalStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }
}

impl StateStore<TaskRunState> for NamespaceTaskStore {
    fn load(&self) -> Result<Option<TaskRunState>> {
        match self.store.get(&self.namespace, TASKS_STATUSES_KEY)? {
            Some(value) => {
                let state = serde_json::from_value(value).with_context(|| {
                    format!("Failed to parse task statuses for {}", self.namespace)
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    fn save(&self, state: &TaskRunState) -> Result<()> {
        let value = serde_json::to_value(state).context("Failed to serialize task statuses")?;
        self.store.set(&self.namespace, TASKS_STATUSES_KEY, value)
    }
}
