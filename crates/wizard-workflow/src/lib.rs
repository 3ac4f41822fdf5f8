//! Wizard orchestration.
//!
//! A [`wizard::WizardController`] owns a wizard's persisted content and step
//! pointer. Its progress steps hand an ordered command list to a
//! [`task_runner::TaskRunner`], which executes one command at a time against
//! the server and turns failures into task status.

pub mod barrier;
pub mod polling;
pub mod task_runner;
pub mod task_store;
pub mod wizard;
pub mod wizards;

pub use barrier::MultiTaskCounter;
pub use polling::Pollable;
pub use task_runner::{CommandContext, CommandResult, ProgressPage, RunStatus, TaskEvent, TaskRunner};
pub use wizard::{
    LoadEntry, LoadFuture, LoadMap, MasterComponentHost, Persistable, WizardController,
    WizardServices,
};
