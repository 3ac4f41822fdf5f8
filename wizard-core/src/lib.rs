//! Core library for the cluster wizard console.
//!
//! Holds the data model shared by every wizard (tasks, persisted content),
//! the REST request dispatcher and the JSON-to-record mappers.

pub mod ajax;
pub mod cluster_status;
pub mod config;
pub mod errors;
pub mod local_store;
pub mod logging;
pub mod mapper;
pub mod task;

pub use ajax::{AjaxRequest, AjaxResponse, Dispatcher};
pub use errors::{RequestError, RequestResult, WizardError, WizardResult};
pub use task::{Task, TaskCommand, TaskStatus};
