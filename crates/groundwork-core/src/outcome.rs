use chrono::{DateTime, Utc};
use groundwork_runtime::InitReport;
use groundwork_schema::ConfigSource;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Workflow stages in execution order. `Apply` and `Destroy` are the two
/// branches of the final provisioning step; `DeleteBucket` follows `Destroy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CheckAuth,
    EnsureDeclarationFiles,
    ResolveBucketName,
    EnsureBucket,
    Init,
    Apply,
    Destroy,
    DeleteBucket,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::CheckAuth => "check-auth",
            Stage::EnsureDeclarationFiles => "ensure-declaration-files",
            Stage::ResolveBucketName => "resolve-bucket-name",
            Stage::EnsureBucket => "ensure-bucket",
            Stage::Init => "init",
            Stage::Apply => "apply",
            Stage::Destroy => "destroy",
            Stage::DeleteBucket => "delete-bucket",
        }
    }

    /// Whether a failure of this stage halts the run.
    pub fn is_fatal(self) -> bool {
        !matches!(self, Stage::DeleteBucket)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    Running,
    Completed,
    Failed { stage: Stage, error: String },
}

/// Result of the teardown branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub infrastructure_destroyed: bool,
    pub storage_removed: bool,
    pub objects_deleted: usize,
    pub failing_object: Option<String>,
    pub storage_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowOutcome {
    pub project_id: String,
    pub destroy: bool,
    pub status: RunStatus,
    /// Last stage that was started.
    pub stage_reached: Option<Stage>,
    pub completed: Vec<Stage>,
    pub scaffolded: Vec<PathBuf>,
    pub bucket: Option<String>,
    pub bucket_source: Option<ConfigSource>,
    pub bucket_created: Option<bool>,
    pub bucket_region: Option<String>,
    pub init: Option<InitReport>,
    pub teardown: Option<TeardownReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowOutcome {
    pub fn new(project_id: &str, destroy: bool) -> Self {
        Self {
            project_id: project_id.to_owned(),
            destroy,
            status: RunStatus::Running,
            stage_reached: None,
            completed: Vec::new(),
            scaffolded: Vec::new(),
            bucket: None,
            bucket_source: None,
            bucket_created: None,
            bucket_region: None,
            init: None,
            teardown: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        self.stage_reached = Some(stage);
    }

    pub(crate) fn complete(&mut self, stage: Stage) {
        self.completed.push(stage);
    }

    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// No fatal stage failed. A teardown whose bucket could not be removed
    /// still counts as a success; see [`TeardownReport::storage_removed`].
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.status {
            RunStatus::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn has_completed(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
