//! Sequential execution of a progress page's command list.
//!
//! Invariants kept by [`TaskRunner`]:
//! * at most one task is IN_PROGRESS;
//! * tasks run in list order, each command once per attempt;
//! * a FAILED task blocks every later task until it is retried.

use crate::polling::Pollable;
use crate::task_store::{StateStore, TaskRunState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use wizard_core::ajax::{AjaxRequest, AjaxResponse, Dispatcher};
use wizard_core::config::DEFAULT_POLL_INTERVAL_MS;
use wizard_core::task::{Task, TaskCommand, TaskStatus};
use wizard_error::{RequestResult, WizardError, WizardResult};

pub type CommandResult = WizardResult<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started { id: usize, command: &'static str },
    Progress { id: usize, percent: u8 },
    Completed { id: usize, command: &'static str },
    Failed { id: usize, command: &'static str, message: String },
    Finished(RunStatus),
}

/// The command list and command bodies of one progress step.
#[async_trait]
pub trait ProgressPage: Send {
    type Command: TaskCommand;

    /// Wizard name used in logs.
    fn name(&self) -> &str;

    fn commands(&self) -> Vec<Self::Command>;

    fn task_title(&self, command: Self::Command) -> String {
        command.name().to_string()
    }

    /// Commands dropped before the run because their preconditions do not
    /// hold. Each entry removes the first remaining task with that command.
    fn unneeded_commands(&self) -> Vec<Self::Command> {
        Vec::new()
    }

    fn rollback_allowed(&self, _command: Self::Command) -> bool {
        false
    }

    async fn execute(
        &mut self,
        command: Self::Command,
        ctx: &mut CommandContext<'_, Self::Command>,
    ) -> CommandResult;
}

/// What a running command may touch: the dispatcher and its own task.
pub struct CommandContext<'a, C> {
    dispatcher: &'a dyn Dispatcher,
    task: &'a mut Task<C>,
    events: Option<&'a UnboundedSender<TaskEvent>>,
    poll_interval: Duration,
}

impl<'a, C: TaskCommand> CommandContext<'a, C> {
    pub fn new(
        dispatcher: &'a dyn Dispatcher,
        task: &'a mut Task<C>,
        events: Option<&'a UnboundedSender<TaskEvent>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            task,
            events,
            poll_interval,
        }
    }

    pub fn dispatcher(&self) -> &'a dyn Dispatcher {
        self.dispatcher
    }

    pub fn task(&self) -> &Task<C> {
        self.task
    }

    pub async fn send(&self, request: AjaxRequest) -> RequestResult<AjaxResponse> {
        self.dispatcher.send(request).await
    }

    pub fn set_progress(&mut self, percent: u8) {
        self.task.set_progress(percent);
        if let Some(tx) = self.events {
            let _ = tx.send(TaskEvent::Progress {
                id: self.task.id,
                percent: self.task.progress,
            });
        }
    }

    /// Sends `request` and waits for the server-side request it starts.
    ///
    /// A response without a request id means there was nothing to do.
    pub async fn send_and_wait(&mut self, request: AjaxRequest) -> CommandResult {
        let response = self.dispatcher.send(request).await?;
        self.wait_for(&response).await
    }

    pub async fn wait_for(&mut self, response: &AjaxResponse) -> CommandResult {
        match response.request_id() {
            Some(request_id) => self.poll_request(request_id).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<'a, C: TaskCommand> Pollable for CommandContext<'a, C> {
    fn dispatcher(&self) -> &dyn Dispatcher {
        self.dispatcher
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn on_poll_progress(&mut self, percent: u8) {
        self.set_progress(percent);
    }
}

pub struct TaskRunner<P: ProgressPage> {
    page: P,
    tasks: Vec<Task<P::Command>>,
    dispatcher: Arc<dyn Dispatcher>,
    store: Option<Box<dyn StateStore<TaskRunState>>>,
    events: Option<UnboundedSender<TaskEvent>>,
    poll_interval: Duration,
    initialized: bool,
}

impl<P: ProgressPage> TaskRunner<P> {
    pub fn new(page: P, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            page,
            tasks: Vec::new(),
            dispatcher,
            store: None,
            events: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            initialized: false,
        }
    }

    pub fn with_store(mut self, store: impl StateStore<TaskRunState> + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<TaskEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut P {
        &mut self.page
    }

    /// Drops the runner (closing its event channel) and hands back the page.
    pub fn into_page(self) -> P {
        self.page
    }

    pub fn tasks(&self) -> &[Task<P::Command>] {
        &self.tasks
    }

    /// Builds one PENDING task per command, drops unneeded ones and
    /// restores statuses saved by an earlier run.
    pub fn initialize_tasks(&mut self) -> WizardResult<()> {
        self.tasks = self
            .page
            .commands()
            .into_iter()
            .enumerate()
            .map(|(id, command)| Task::new(id, command, self.page.task_title(command)))
            .collect();
        let unneeded = self.page.unneeded_commands();
        self.remove_tasks(&unneeded);
        self.restore_statuses()?;
        self.initialized = true;
        log::info!(
            "{}: {} tasks [{}]",
            self.page.name(),
            self.tasks.len(),
            self.tasks
                .iter()
                .map(|t| t.command.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Removes the first remaining task for each listed command.
    pub fn remove_tasks(&mut self, commands: &[P::Command]) {
        for command in commands {
            if let Some(index) = self.tasks.iter().position(|t| t.command == *command) {
                self.tasks.remove(index);
            }
        }
    }

    fn restore_statuses(&mut self) -> WizardResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(saved) = store.load().map_err(persistence_error)? else {
            return Ok(());
        };
        for task in &mut self.tasks {
            match saved.status_of(task) {
                Some(TaskStatus::Completed) => task.complete(),
                Some(TaskStatus::Failed) => task.fail(false),
                // Interrupted mid-command: run it again.
                Some(TaskStatus::InProgress) | Some(TaskStatus::Pending) | None => {}
            }
        }
        Ok(())
    }

    fn persist(&self) -> WizardResult<()> {
        if let Some(store) = &self.store {
            store
                .save(&TaskRunState::capture(&self.tasks))
                .map_err(persistence_error)?;
        }
        Ok(())
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            RunStatus::Failed
        } else if self.tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            if self.initialized {
                RunStatus::Succeeded
            } else {
                RunStatus::NotStarted
            }
        } else if self.tasks.iter().any(|t| t.status != TaskStatus::Pending) {
            RunStatus::InProgress
        } else {
            RunStatus::NotStarted
        }
    }

    /// Runs PENDING tasks in order until all complete or one fails.
    pub async fn run(&mut self) -> WizardResult<RunStatus> {
        if !self.initialized {
            self.initialize_tasks()?;
        }
        if let Some(failed) = self.tasks.iter().find(|t| t.status == TaskStatus::Failed) {
            log::warn!(
                "{}: task {} ({}) failed earlier; retry it first",
                self.page.name(),
                failed.id,
                failed.command.name()
            );
            return Ok(RunStatus::Failed);
        }

        while let Some(index) = self
            .tasks
            .iter()
            .position(|t| t.status == TaskStatus::Pending)
        {
            let command = self.tasks[index].command;
            self.tasks[index].start();
            self.persist()?;
            self.emit(TaskEvent::Started {
                id: self.tasks[index].id,
                command: command.name(),
            });
            log::info!("{}: {} started", self.page.name(), command.name());

            let result = {
                let mut ctx = CommandContext::new(
                    self.dispatcher.as_ref(),
                    &mut self.tasks[index],
                    self.events.as_ref(),
                    self.poll_interval,
                );
                self.page.execute(command, &mut ctx).await
            };

            match result {
                Ok(()) => self.on_task_completed(index)?,
                Err(err) => {
                    self.on_task_error(index, &err)?;
                    self.emit(TaskEvent::Finished(RunStatus::Failed));
                    return Ok(RunStatus::Failed);
                }
            }
        }

        self.emit(TaskEvent::Finished(RunStatus::Succeeded));
        log::info!("{}: all tasks completed", self.page.name());
        Ok(RunStatus::Succeeded)
    }

    pub fn on_task_completed(&mut self, index: usize) -> WizardResult<()> {
        let task = &mut self.tasks[index];
        task.complete();
        let event = TaskEvent::Completed {
            id: task.id,
            command: task.command.name(),
        };
        log::info!("{}: {} completed", self.page.name(), task.command.name());
        self.persist()?;
        self.emit(event);
        Ok(())
    }

    pub fn on_task_error(&mut self, index: usize, err: &WizardError) -> WizardResult<()> {
        let command = self.tasks[index].command;
        let allow_rollback = self.page.rollback_allowed(command);
        let task = &mut self.tasks[index];
        task.fail(allow_rollback);
        log::error!("{}: {} failed: {}", self.page.name(), command.name(), err);
        let event = TaskEvent::Failed {
            id: task.id,
            command: command.name(),
            message: err.to_string(),
        };
        self.persist()?;
        self.emit(event);
        Ok(())
    }

    /// Resets the failed task and resumes the run from it.
    pub async fn retry(&mut self) -> WizardResult<RunStatus> {
        if !self.initialized {
            self.initialize_tasks()?;
        }
        let index = self
            .tasks
            .iter()
            .position(|t| t.status == TaskStatus::Failed)
            .ok_or(WizardError::NothingToRetry)?;
        log::info!(
            "{}: retrying {}",
            self.page.name(),
            self.tasks[index].command.name()
        );
        self.tasks[index].reset();
        self.persist()?;
        self.run().await
    }
}

fn persistence_error(err: anyhow::Error) -> WizardError {
    WizardError::Persistence(format!("{:#}", err))
}
