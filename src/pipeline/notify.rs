use tracing::{error, warn};
use uuid::Uuid;

use crate::error::PipelineError;

use super::RunResult;

/// A stage attempt failed and will be retried
#[derive(Debug)]
pub struct RetryEvent<'a> {
    pub run_id: Uuid,
    pub stage: &'a str,
    /// The attempt that just failed, starting at 1
    pub attempt: u32,
    pub max_retries: u32,
    pub error: &'a PipelineError,
}

/// Receives retry and failure events. Delivery (mail, paging) is up to the
/// implementation.
pub trait Notifier: Send + Sync {
    fn on_retry(&self, event: &RetryEvent<'_>);
    fn on_failure(&self, run: &RunResult);
}

/// When and to whom notifications go
#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub owner: String,
    pub email: Vec<String>,
    pub on_failure: bool,
    pub on_retry: bool,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            owner: "toll-etl".to_string(),
            email: vec![],
            on_failure: true,
            on_retry: true,
        }
    }
}

/// Emits notifications as log events addressed to the owner
#[derive(Debug, Clone)]
pub struct LogNotifier {
    owner: String,
    email: Vec<String>,
}

impl LogNotifier {
    pub fn new(settings: &NotifySettings) -> Self {
        Self {
            owner: settings.owner.clone(),
            email: settings.email.clone(),
        }
    }
}

impl Notifier for LogNotifier {
    fn on_retry(&self, event: &RetryEvent<'_>) {
        warn!(
            run_id = %event.run_id,
            owner = %self.owner,
            email = ?self.email,
            "Stage {} attempt {} failed, retrying ({} retries allowed): {}",
            event.stage,
            event.attempt,
            event.max_retries,
            event.error
        );
    }

    fn on_failure(&self, run: &RunResult) {
        match run.failure() {
            Some(failure) => error!(
                run_id = %run.run_id,
                owner = %self.owner,
                email = ?self.email,
                "Run {} failed at stage {} after {} attempt(s) [{:?}]: {}",
                run.pipeline,
                failure.stage,
                failure.attempts,
                failure.kind,
                failure.message
            ),
            None => error!(
                run_id = %run.run_id,
                owner = %self.owner,
                "Run {} failed",
                run.pipeline
            ),
        }
    }
}
