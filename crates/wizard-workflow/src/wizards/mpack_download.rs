//! Downloading the management packs chosen in the install wizard.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use wizard_core::ajax::{AjaxRequest, Dispatcher};
use wizard_core::mapper::mpack::SelectedMpack;
use wizard_error::{RequestError, WizardError, WizardResult};

/// Download state of one pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MpackDownload {
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub in_progress: bool,
    pub failed: bool,
    pub succeeded: bool,
    pub failure_message: Option<String>,
}

impl MpackDownload {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            url: url.into(),
            in_progress: false,
            failed: false,
            succeeded: false,
            failure_message: None,
        }
    }

    fn begin(&mut self) {
        self.in_progress = true;
        self.failed = false;
        self.succeeded = false;
        self.failure_message = None;
    }
}

impl From<&SelectedMpack> for MpackDownload {
    fn from(selected: &SelectedMpack) -> Self {
        Self::new(
            selected.name.clone(),
            selected.display_name.clone(),
            selected.download_url.clone(),
        )
    }
}

fn failure_message(err: &RequestError) -> String {
    // The server wraps its reason in {"status": .., "message": ..}.
    err.response_text()
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
        .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| err.to_string())
}

pub struct MpackDownloadController {
    dispatcher: Arc<dyn Dispatcher>,
    mpacks: Vec<MpackDownload>,
}

impl MpackDownloadController {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, mpacks: Vec<MpackDownload>) -> Self {
        Self { dispatcher, mpacks }
    }

    pub fn from_selected(dispatcher: Arc<dyn Dispatcher>, selected: &[SelectedMpack]) -> Self {
        Self::new(dispatcher, selected.iter().map(MpackDownload::from).collect())
    }

    pub fn mpacks(&self) -> &[MpackDownload] {
        &self.mpacks
    }

    pub fn mpack(&self, name: &str) -> Option<&MpackDownload> {
        self.mpacks.iter().find(|m| m.name == name)
    }

    fn mpack_mut(&mut self, name: &str) -> WizardResult<&mut MpackDownload> {
        self.mpacks
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| WizardError::Precondition(format!("{} is not selected", name)))
    }

    /// Starts every download that has not succeeded yet, all at once.
    pub async fn download_mpacks(&mut self) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut pending = FuturesUnordered::new();
        for mpack in self.mpacks.iter_mut().filter(|m| !m.succeeded) {
            mpack.begin();
            let request = AjaxRequest::new("mpack.download")
                .with("name", &mpack.name)
                .with("url", &mpack.url);
            let name = mpack.name.clone();
            let dispatcher = Arc::clone(&dispatcher);
            pending.push(async move { (name, dispatcher.send(request).await) });
        }

        while let Some((name, result)) = pending.next().await {
            match result {
                Ok(_) => self.download_mpack_success(&name),
                Err(err) => self.download_mpack_error(&name, &err),
            }
        }
    }

    pub fn download_mpack_success(&mut self, name: &str) {
        if let Ok(mpack) = self.mpack_mut(name) {
            mpack.in_progress = false;
            mpack.failed = false;
            mpack.succeeded = true;
            log::info!("Downloaded mpack {}", name);
        }
    }

    /// A 409 means the pack is already on the server.
    pub fn download_mpack_error(&mut self, name: &str, err: &RequestError) {
        if err.is_conflict() {
            log::info!("Mpack {} already present", name);
            self.download_mpack_success(name);
            return;
        }
        let message = failure_message(err);
        if let Ok(mpack) = self.mpack_mut(name) {
            log::error!("Downloading mpack {} failed: {}", name, message);
            mpack.in_progress = false;
            mpack.succeeded = false;
            mpack.failed = true;
            mpack.failure_message = Some(message);
        }
    }

    pub async fn retry_download(&mut self, name: &str) -> WizardResult<()> {
        let mpack = self.mpack_mut(name)?;
        if !mpack.failed {
            return Err(WizardError::NothingToRetry);
        }
        mpack.begin();
        let request = AjaxRequest::new("mpack.download")
            .with("name", &mpack.name)
            .with("url", &mpack.url);
        match self.dispatcher.send(request).await {
            Ok(_) => self.download_mpack_success(name),
            Err(err) => self.download_mpack_error(name, &err),
        }
        Ok(())
    }

    pub fn is_submit_disabled(&self) -> bool {
        self.mpacks.iter().any(|m| !m.succeeded)
    }
}
