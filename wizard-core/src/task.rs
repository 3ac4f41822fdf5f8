//! Task records shown on a wizard progress page.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// A named step of a wizard's execution plan.
///
/// `name` is the stable identifier persisted between runs, so renaming a
/// variant's name breaks resume of in-flight wizards.
pub trait TaskCommand: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task<C> {
    pub id: usize,
    pub command: C,
    pub title: String,
    pub status: TaskStatus,
    pub show_retry: bool,
    pub show_rollback: bool,
    pub progress: u8,
}

impl<C: TaskCommand> Task<C> {
    pub fn new(id: usize, command: C, title: impl Into<String>) -> Self {
        Self {
            id,
            command,
            title: title.into(),
            status: TaskStatus::Pending,
            show_retry: false,
            show_rollback: false,
            progress: 0,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
        self.show_retry = false;
        self.show_rollback = false;
        self.progress = 0;
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
    }

    pub fn fail(&mut self, allow_rollback: bool) {
        self.status = TaskStatus::Failed;
        self.show_retry = true;
        self.show_rollback = allow_rollback;
    }

    /// Back to PENDING so the runner picks it up again.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.show_retry = false;
        self.show_rollback = false;
        self.progress = 0;
    }

    pub fn set_progress(&mut self, percent: u8) {
        self.progress = percent.min(100);
    }
}
