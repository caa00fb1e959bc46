use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::io::{ArtifactWriter, discard_artifacts};

use super::{
    Notifier, NotifySettings, RetryEvent, RunResult, RunState, StageError, StageOutput,
    StageReport, StageState,
};

/// Bounded retry with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Wait before each retry
    pub retry_delay: Duration,
    /// Wall-clock budget per attempt
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay: Duration::from_secs(5 * 60),
            timeout: None,
        }
    }
}

/// Handed to each stage attempt; lets an abandoned attempt notice it was
/// abandoned.
///
/// Cancellation is cooperative. A body blocked inside a single read only sees
/// the flag once that read returns, and the runtime waits for it on shutdown.
#[derive(Debug, Clone)]
pub struct StageContext {
    stage: String,
    timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl StageContext {
    pub fn new(stage: &str, timeout: Option<Duration>) -> Self {
        Self {
            stage: stage.to_string(),
            timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail fast once the attempt has been abandoned
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    /// Publish an artifact, unless the attempt has been abandoned.
    ///
    /// The flag is checked after the rename; an attempt abandoned while
    /// committing removes what it just published.
    pub fn commit(&self, writer: ArtifactWriter) -> Result<PathBuf> {
        let path = writer.commit()?;
        if self.is_cancelled() {
            let _ = std::fs::remove_file(&path);
            return Err(self.timeout_error());
        }
        Ok(path)
    }

    fn timeout_error(&self) -> PipelineError {
        PipelineError::StageTimeout {
            stage: self.stage.clone(),
            timeout: self.timeout.unwrap_or_default(),
        }
    }
}

/// Body of a stage. Runs on the blocking pool.
pub type StageFn = Arc<dyn Fn(&StageContext) -> Result<StageOutput> + Send + Sync>;

/// One link of the chain: a name, its outputs, its retry policy, its body
#[derive(Clone)]
pub struct StageDescriptor {
    pub name: String,
    /// Artifacts this stage owns; discarded after a failed attempt
    pub outputs: Vec<PathBuf>,
    pub retry: RetryPolicy,
    run: StageFn,
}

impl StageDescriptor {
    pub fn new<F>(name: &str, outputs: Vec<PathBuf>, retry: RetryPolicy, run: F) -> Self
    where
        F: Fn(&StageContext) -> Result<StageOutput> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            outputs,
            retry,
            run: Arc::new(run),
        }
    }
}

impl std::fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("outputs", &self.outputs)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Work run once before the chain, without retries
pub type PrerequisiteFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Sequential runner over an ordered list of stages.
///
/// Each stage must succeed before the next starts. A failed attempt is
/// retried only for transient errors and only within the stage's policy;
/// once a stage fails terminally the run is `Failed` and nothing downstream
/// runs.
pub struct Pipeline {
    name: String,
    prerequisite: Option<(String, PrerequisiteFn)>,
    stages: Vec<StageDescriptor>,
    notifier: Arc<dyn Notifier>,
    notify: NotifySettings,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("prerequisite", &self.prerequisite.as_ref().map(|(name, _)| name))
            .field("stages", &self.stages)
            .field("notify", &self.notify)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(name: &str, notifier: Arc<dyn Notifier>, notify: NotifySettings) -> Self {
        Self {
            name: name.to_string(),
            prerequisite: None,
            stages: Vec::new(),
            notifier,
            notify,
        }
    }

    pub fn with_prerequisite<F>(mut self, name: &str, run: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.prerequisite = Some((name.to_string(), Arc::new(run)));
        self
    }

    pub fn stage(mut self, stage: StageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Execute the chain once
    pub async fn run(&self) -> RunResult {
        self.execute(0).await
    }

    /// Execute the chain starting at `stage`.
    ///
    /// Earlier stages and the prerequisite are reported as skipped; `stage`
    /// reads whatever artifacts they committed in a previous run.
    pub async fn run_from(&self, stage: &str) -> Result<RunResult> {
        let start = self
            .stages
            .iter()
            .position(|s| s.name == stage)
            .ok_or_else(|| PipelineError::InvalidConfig {
                reason: format!("pipeline '{}' has no stage named '{}'", self.name, stage),
            })?;
        Ok(self.execute(start).await)
    }

    async fn execute(&self, start: usize) -> RunResult {
        let mut result = RunResult::new(&self.name, self.stages.iter().map(|s| s.name.clone()));
        result.state = RunState::Running;
        info!(
            run_id = %result.run_id,
            "Starting run of {} at stage {} of {}",
            self.name,
            start + 1,
            self.stages.len()
        );

        for report in &mut result.stages[..start] {
            report.state = StageState::Skipped;
        }

        let mut ok = match &self.prerequisite {
            Some((name, _)) if start > 0 => {
                let mut report = StageReport::pending(name);
                report.state = StageState::Skipped;
                result.prerequisite = Some(report);
                true
            }
            Some((name, run)) => {
                let report = run_prerequisite(name, Arc::clone(run)).await;
                let ok = report.state == StageState::Succeeded;
                result.prerequisite = Some(report);
                ok
            }
            None => true,
        };

        if ok {
            for (stage, report) in self
                .stages
                .iter()
                .zip(result.stages.iter_mut())
                .skip(start)
            {
                if !self.run_stage(result.run_id, stage, report).await {
                    ok = false;
                    break;
                }
            }
        }

        result.state = if ok { RunState::Succeeded } else { RunState::Failed };
        result.finished_at = Some(Utc::now());

        match result.failure() {
            None => info!(run_id = %result.run_id, "Run of {} succeeded", self.name),
            Some(failure) => error!(
                run_id = %result.run_id,
                "Run of {} failed at {} after {} attempt(s): {}",
                self.name,
                failure.stage,
                failure.attempts,
                failure.message
            ),
        }

        if !ok && self.notify.on_failure {
            self.notifier.on_failure(&result);
        }

        result
    }

    /// Drive one stage through its attempts; true when it succeeded
    async fn run_stage(
        &self,
        run_id: uuid::Uuid,
        stage: &StageDescriptor,
        report: &mut StageReport,
    ) -> bool {
        loop {
            report.attempts += 1;
            report.state = StageState::Running;
            info!(
                "Stage {}: attempt {} of {}",
                stage.name,
                report.attempts,
                stage.retry.max_retries.saturating_add(1)
            );

            match run_attempt(stage).await {
                Ok(output) => {
                    info!("Stage {}: {} rows written", stage.name, output.rows);
                    report.state = StageState::Succeeded;
                    report.output = Some(output);
                    report.error = None;
                    return true;
                }
                Err(err) => {
                    discard_artifacts(&stage.outputs);
                    report.error = Some(StageError::from(&err));

                    let retries_used = report.attempts - 1;
                    if !err.is_retryable() || retries_used >= stage.retry.max_retries {
                        error!("Stage {} failed: {}", stage.name, err);
                        report.state = StageState::FailedTerminal;
                        return false;
                    }

                    report.state = StageState::FailedRetrying;
                    warn!(
                        "Stage {} failed ({}), retrying in {:?}",
                        stage.name, err, stage.retry.retry_delay
                    );
                    if self.notify.on_retry {
                        self.notifier.on_retry(&RetryEvent {
                            run_id,
                            stage: &stage.name,
                            attempt: report.attempts,
                            max_retries: stage.retry.max_retries,
                            error: &err,
                        });
                    }
                    tokio::time::sleep(stage.retry.retry_delay).await;
                }
            }
        }
    }
}

/// Run a stage body on the blocking pool, abandoning it on timeout
async fn run_attempt(stage: &StageDescriptor) -> Result<StageOutput> {
    let ctx = StageContext::new(&stage.name, stage.retry.timeout);
    let run = Arc::clone(&stage.run);
    let task_ctx = ctx.clone();
    let handle = tokio::task::spawn_blocking(move || run(&task_ctx));

    let joined = match stage.retry.timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                ctx.cancel();
                return Err(ctx.timeout_error());
            }
        },
        None => handle.await,
    };

    joined.unwrap_or_else(|e| {
        Err(PipelineError::StageAborted {
            stage: stage.name.clone(),
            message: e.to_string(),
        })
    })
}

async fn run_prerequisite(name: &str, run: PrerequisiteFn) -> StageReport {
    let mut report = StageReport::pending(name);
    report.state = StageState::Running;
    report.attempts = 1;
    info!("Prerequisite {}: running", name);

    let outcome = tokio::task::spawn_blocking(move || run())
        .await
        .unwrap_or_else(|e| {
            Err(PipelineError::StageAborted {
                stage: name.to_string(),
                message: e.to_string(),
            })
        });

    match outcome {
        Ok(()) => report.state = StageState::Succeeded,
        Err(err) => {
            error!("Prerequisite {} failed: {}", name, err);
            report.state = StageState::FailedTerminal;
            report.error = Some(StageError::from(&err));
        }
    }
    report
}
