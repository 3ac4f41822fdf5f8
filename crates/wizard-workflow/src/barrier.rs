//! Join barrier for commands that fan out over several targets.

use futures::stream::{FuturesUnordered, StreamExt};
use wizard_core::ajax::{AjaxRequest, AjaxResponse, Dispatcher};
use wizard_error::{RequestError, WizardError, WizardResult};

/// Counts sub-request successes until the expected number is reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiTaskCounter {
    count: usize,
    expected: usize,
}

impl MultiTaskCounter {
    pub fn new(expected: usize) -> Self {
        Self { count: 0, expected }
    }

    pub fn reset(&mut self, expected: usize) {
        self.count = 0;
        self.expected = expected;
    }

    /// Returns true exactly once: on the success that meets the target.
    pub fn record_success(&mut self) -> bool {
        self.count += 1;
        self.count == self.expected
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.expected
    }
}

/// Sends every request concurrently and counts successes into `counter`.
///
/// Errors for which `treat_as_success` holds count like successes. Any other
/// error fails the whole join after the remaining requests have settled.
/// Returns the bodies of the requests that actually succeeded.
pub async fn join_requests<F>(
    dispatcher: &dyn Dispatcher,
    requests: Vec<AjaxRequest>,
    counter: &mut MultiTaskCounter,
    treat_as_success: F,
) -> WizardResult<Vec<AjaxResponse>>
where
    F: Fn(&RequestError) -> bool,
{
    counter.reset(requests.len());
    if counter.is_complete() {
        return Ok(Vec::new());
    }

    let mut pending: FuturesUnordered<_> = requests
        .into_iter()
        .map(|request| {
            let name = request.name.clone();
            async move { (name, dispatcher.send(request).await) }
        })
        .collect();

    let mut responses = Vec::new();
    let mut first_error: Option<RequestError> = None;
    while let Some((name, result)) = pending.next().await {
        match result {
            Ok(response) => {
                responses.push(response);
                counter.record_success();
            }
            Err(err) if treat_as_success(&err) => {
                log::info!("{} treated as done: {}", name, err);
                counter.record_success();
            }
            Err(err) => {
                log::error!("{} failed: {}", name, err);
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(WizardError::Request(err)),
        None if counter.is_complete() => Ok(responses),
        None => Err(WizardError::Other(format!(
            "only {} of {} requests completed",
            counter.count(),
            counter.expected()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wizard_core::ajax::FakeDispatcher;

    #[test]
    fn counter_fires_once_at_target() {
        let mut counter = MultiTaskCounter::new(2);
        assert!(!counter.record_success());
        assert!(counter.record_success());
        assert!(!counter.record_success());
        assert!(counter.is_complete());
    }

    #[tokio::test]
    async fn empty_join_completes_immediately() {
        let fake = FakeDispatcher::new();
        let mut counter = MultiTaskCounter::new(5);
        let responses = join_requests(&fake, Vec::new(), &mut counter, |_| false)
            .await
            .unwrap();
        assert!(responses.is_empty());
        assert_eq!(counter.expected(), 0);
        assert_eq!(fake.request_count(), 0);
    }

    #[tokio::test]
    async fn tolerated_errors_count_toward_the_target() {
        let fake = FakeDispatcher::new();
        fake.fail_with("common.delete.host_component", 404, "NoSuchResourceException");
        let requests = vec![
            AjaxRequest::new("common.delete.host_component").with("componentName", "A"),
            AjaxRequest::new("common.delete.host_component").with("componentName", "B"),
        ];
        let mut counter = MultiTaskCounter::default();
        join_requests(&fake, requests, &mut counter, |e| {
            e.mentions("NoSuchResourceException")
        })
        .await
        .unwrap();
        assert_eq!(counter.count(), 2);
    }

    #[tokio::test]
    async fn hard_error_fails_after_all_requests_settle() {
        let fake = FakeDispatcher::new();
        fake.fail_with("common.host.host_component.passive", 500, "boom");
        let requests = vec![
            AjaxRequest::new("common.host.host_component.passive"),
            AjaxRequest::new("common.host.host_component.passive"),
        ];
        let mut counter = MultiTaskCounter::default();
        let err = join_requests(&fake, requests, &mut counter, |_| false)
            .await
            .unwrap_err();
        assert!(matches!(err, WizardError::Request(_)));
        assert_eq!(fake.request_count(), 2);
        assert_eq!(counter.count(), 0);
    }
}
