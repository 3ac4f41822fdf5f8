pub use wizard_error::{
    RequestError, RequestResult, WizardError, WizardResult, NO_SUCH_RESOURCE,
};

/// Result type alias for glue code (config loading, persistence, CLI).
pub type Result<T> = anyhow::Result<T>;
