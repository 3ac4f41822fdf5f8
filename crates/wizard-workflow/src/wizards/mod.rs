//! Concrete wizards built on the controller and the task runner.

pub mod common;
pub mod ha_namenode;
pub mod mpack_download;
pub mod reassign_master;

#[cfg(test)]
mod tests;

use crate::task_runner::{ProgressPage, RunStatus, TaskRunner};
use crate::task_store::NamespaceTaskStore;
use crate::wizard::{LoadFuture, WizardController};
use std::sync::Arc;
use wizard_error::WizardResult;

/// Loader that keeps a stored cluster name or asks the server for one.
pub fn load_cluster_name(wizard: &mut WizardController) -> LoadFuture<'_> {
    Box::pin(async move {
        if wizard.load_cluster_name()?.is_none() {
            wizard.load_cluster_name_from_server().await?;
        }
        Ok(())
    })
}

/// A runner for `page` whose task statuses live in the wizard's namespace.
pub fn task_runner_for<P: ProgressPage>(wizard: &WizardController, page: P) -> TaskRunner<P> {
    let store = NamespaceTaskStore::new(Arc::clone(&wizard.services().local_store), wizard.name());
    TaskRunner::new(page, wizard.dispatcher()).with_store(store)
}

/// Moves the wizard past its progress step once every task has completed.
pub async fn advance_if_succeeded(
    wizard: &mut WizardController,
    status: RunStatus,
) -> WizardResult<()> {
    if status == RunStatus::Succeeded {
        let next = wizard.current_step() + 1;
        wizard.set_current_step(next.min(wizard.total_steps()), false).await?;
    }
    Ok(())
}
