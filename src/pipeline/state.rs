use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError};

/// Lifecycle of one stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    /// Failed, another attempt is scheduled
    FailedRetrying,
    /// Failed with no attempts left, or with an error retrying cannot fix
    FailedTerminal,
    /// Not run: the run was restarted from a later stage
    Skipped,
}

/// Lifecycle of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Error captured in a report
#[derive(Debug, Clone, Serialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for StageError {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// What a stage produced on success
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageOutput {
    /// Data rows written, excluding headers
    pub rows: usize,
    /// Artifacts committed by the stage
    pub artifacts: Vec<PathBuf>,
    /// Rows discarded per input artifact (positional truncation)
    pub dropped_rows: Vec<(String, usize)>,
}

/// Outcome of one stage within a run
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub state: StageState,
    pub attempts: u32,
    pub output: Option<StageOutput>,
    pub error: Option<StageError>,
}

impl StageReport {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StageState::Pending,
            attempts: 0,
            output: None,
            error: None,
        }
    }
}

/// Which stage sank a run, and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure<'a> {
    pub stage: &'a str,
    pub kind: ErrorKind,
    pub attempts: u32,
    pub message: &'a str,
}

/// Result of one pipeline invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Correlates log lines of this run; not persisted anywhere else
    pub run_id: Uuid,
    pub pipeline: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Work done once before the chain (e.g. unpacking the source bundle)
    pub prerequisite: Option<StageReport>,
    pub stages: Vec<StageReport>,
}

impl RunResult {
    pub fn new(pipeline: &str, stage_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.to_string(),
            state: RunState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            prerequisite: None,
            stages: stage_names
                .into_iter()
                .map(|name| StageReport::pending(&name))
                .collect(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// The stage that failed terminally, if any
    pub fn failure(&self) -> Option<RunFailure<'_>> {
        self.prerequisite
            .iter()
            .chain(self.stages.iter())
            .find(|s| s.state == StageState::FailedTerminal)
            .map(|s| {
                let (kind, message) = s
                    .error
                    .as_ref()
                    .map(|e| (e.kind, e.message.as_str()))
                    .unwrap_or((ErrorKind::Internal, ""));
                RunFailure {
                    stage: &s.name,
                    kind,
                    attempts: s.attempts,
                    message,
                }
            })
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write JSON")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_pending() {
        let run = RunResult::new("toll", ["a".to_string(), "b".to_string()]);
        assert_eq!(run.state, RunState::Pending);
        assert!(run.stages.iter().all(|s| s.state == StageState::Pending));
        assert!(run.failure().is_none());
    }

    #[test]
    fn test_failure_reports_stage_kind_and_attempts() {
        let mut run = RunResult::new("toll", ["extract_csv".to_string(), "consolidate".to_string()]);
        run.state = RunState::Failed;
        run.stages[1].state = StageState::FailedTerminal;
        run.stages[1].attempts = 2;
        run.stages[1].error = Some(StageError {
            kind: ErrorKind::IoFailure,
            message: "disk full".to_string(),
        });

        let failure = run.failure().unwrap();
        assert_eq!(failure.stage, "consolidate");
        assert_eq!(failure.kind, ErrorKind::IoFailure);
        assert_eq!(failure.attempts, 2);
    }

    #[test]
    fn test_report_serializes_states_snake_case() {
        let mut run = RunResult::new("toll", ["transform".to_string()]);
        run.stages[0].state = StageState::FailedRetrying;
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["stages"][0]["state"], "failed_retrying");
        assert_eq!(json["state"], "pending");
    }
}
