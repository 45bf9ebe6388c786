use crate::logsink::LogSink;
use crate::outcome::{RunStatus, Stage, TeardownReport, WorkflowOutcome};
use crate::services::Services;
use crate::CoreError;
use groundwork_remote::{EnsureOutcome, StateBucketManager};
use groundwork_runtime::{AuthGate, AuthPolicy, EscalationTier, ProvisionOptions, ProvisionRunner};
use groundwork_schema::{
    declaration_files, write_default_files, ConfigResolver, ResolvedValue, WorkflowConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Name of the backend variable holding the state bucket.
pub const BUCKET_VARIABLE: &str = "bucket";

/// Conventional file names used when the config does not name them.
const DEFAULT_VAR_FILE: &str = "variables.tfvars";
const DEFAULT_BACKEND_VARS_FILE: &str = "backend.tfvars";

/// Readiness policy derived from the `[auth]` section.
pub fn auth_policy(config: &WorkflowConfig) -> AuthPolicy {
    AuthPolicy {
        require_daemon: config.auth.require_daemon,
        require_identity: config.auth.require_identity,
        require_adc: config.auth.require_adc,
        expected_project: config
            .auth
            .align_project
            .then(|| config.project_id.clone()),
        timeout: Duration::from_secs(config.auth.timeout_secs),
        interval: Duration::from_secs(config.auth.interval_secs),
        daemon_launch: config.auth.daemon_launch.clone(),
    }
}

/// One provisioning workflow: readiness, declaration files, state bucket,
/// `terraform init`, then apply or destroy.
///
/// Stages run strictly in order and never undo one another. Every stage is
/// fatal except deleting the state bucket after a successful destroy.
pub struct Workflow {
    config: WorkflowConfig,
    auth: AuthGate,
    resolver: ConfigResolver,
    buckets: StateBucketManager,
    provision: ProvisionRunner,
}

struct StageFailure {
    stage: Stage,
    error: CoreError,
}

impl Workflow {
    pub fn new(config: WorkflowConfig, services: &Services) -> Self {
        let auth = AuthGate::new(
            services.runner.clone(),
            services.identity.clone(),
            auth_policy(&config),
        );
        let resolver = ConfigResolver::new(&config.terraform_dir)
            .with_backend_type(&config.backend_type);
        let buckets = StateBucketManager::new(services.storage.clone()).with_region(&config.region);
        let provision = ProvisionRunner::new(services.runner.clone());
        Self {
            config,
            auth,
            resolver,
            buckets,
            provision,
        }
    }

    #[must_use]
    pub fn with_ladder(mut self, ladder: Vec<EscalationTier>) -> Self {
        self.provision = self.provision.with_ladder(ladder);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Terraform options for this run. Unset variable files fall back to the
    /// conventional names when those files exist in the working directory.
    pub fn provision_options(&self) -> ProvisionOptions {
        let dir = &self.config.terraform_dir;
        let fallback = |configured: &Option<String>, name: &str| {
            configured
                .clone()
                .or_else(|| dir.join(name).is_file().then(|| name.to_owned()))
        };
        ProvisionOptions {
            dir: dir.clone(),
            var_file: fallback(&self.config.var_file, DEFAULT_VAR_FILE),
            backend_vars_file: fallback(&self.config.backend_vars_file, DEFAULT_BACKEND_VARS_FILE),
            destroy: self.config.destroy,
            vars: self.config.vars.clone(),
        }
    }

    /// Run the readiness checks only.
    pub fn check_auth(&self) -> Result<(), CoreError> {
        self.auth.run().map_err(CoreError::from)
    }

    /// Resolve the state bucket name from the working directory.
    pub fn resolve_bucket(&self) -> Result<ResolvedValue, CoreError> {
        self.resolver
            .resolve(BUCKET_VARIABLE)
            .ok_or_else(|| CoreError::UnresolvedVariable {
                name: BUCKET_VARIABLE.to_owned(),
                dir: self.config.terraform_dir.clone(),
            })
    }

    /// Run every stage with `sink` installed for the duration of the run.
    pub fn run(&self, sink: &LogSink) -> WorkflowOutcome {
        sink.scope(|| self.execute())
    }

    /// Run every stage under whatever subscriber is current.
    pub fn execute(&self) -> WorkflowOutcome {
        let mut outcome = WorkflowOutcome::new(&self.config.project_id, self.config.destroy);
        info!(
            project = %self.config.project_id,
            dir = %self.config.terraform_dir.display(),
            destroy = self.config.destroy,
            "starting workflow"
        );
        match self.run_stages(&mut outcome) {
            Ok(()) => {
                info!("workflow completed");
                outcome.finish(RunStatus::Completed);
            }
            Err(StageFailure { stage, error }) => {
                error!(%stage, "workflow halted: {error}");
                outcome.finish(RunStatus::Failed {
                    stage,
                    error: error.to_string(),
                });
            }
        }
        outcome
    }

    fn run_stages(&self, outcome: &mut WorkflowOutcome) -> Result<(), StageFailure> {
        run_stage(outcome, Stage::CheckAuth, || self.check_auth())?;

        let scaffolded = run_stage(outcome, Stage::EnsureDeclarationFiles, || {
            self.ensure_declaration_files()
        })?;
        outcome.scaffolded = scaffolded;

        // Resolved once; reused by both ensure and delete.
        let bucket = run_stage(outcome, Stage::ResolveBucketName, || self.resolve_bucket())?;
        outcome.bucket = Some(bucket.value.clone());
        outcome.bucket_source = Some(bucket.source);
        let bucket = bucket.value;

        let ensured = run_stage(outcome, Stage::EnsureBucket, || {
            Ok(self.buckets.ensure(&self.config.project_id, &bucket)?)
        })?;
        let target = self.buckets.descriptor(&self.config.project_id, &bucket);
        outcome.bucket_created = Some(ensured == EnsureOutcome::Created);
        outcome.bucket_region = Some(match ensured {
            EnsureOutcome::Existing(attrs) if !attrs.location.is_empty() => attrs.location,
            _ => target.region,
        });

        let options = self.provision_options();
        let init = run_stage(outcome, Stage::Init, || {
            Ok(self
                .provision
                .init(&options.dir, options.backend_vars_file.as_deref())?)
        })?;
        outcome.init = Some(init);

        if options.destroy {
            run_stage(outcome, Stage::Destroy, || {
                Ok(self
                    .provision
                    .destroy(&options.dir, options.var_file.as_deref())?)
            })?;
            outcome.teardown = Some(self.delete_bucket(outcome, &bucket));
        } else {
            run_stage(outcome, Stage::Apply, || {
                Ok(self.provision.apply(
                    &options.dir,
                    options.var_file.as_deref(),
                    &options.vars,
                )?)
            })?;
        }
        Ok(())
    }

    fn ensure_declaration_files(&self) -> Result<Vec<PathBuf>, CoreError> {
        let dir = &self.config.terraform_dir;
        let existing = declaration_files(dir);
        if !existing.is_empty() {
            info!(files = existing.len(), "declaration files present");
            return Ok(Vec::new());
        }
        warn!(dir = %dir.display(), "no .tf files found, generating defaults");
        Ok(write_default_files(
            dir,
            &self.config.project_id,
            &self.config.region,
        )?)
    }

    /// Non-fatal: failures are logged and recorded in the report.
    fn delete_bucket(&self, outcome: &mut WorkflowOutcome, bucket: &str) -> TeardownReport {
        outcome.enter(Stage::DeleteBucket);
        let mut report = TeardownReport {
            infrastructure_destroyed: true,
            ..TeardownReport::default()
        };
        match self.buckets.delete(&self.config.project_id, bucket) {
            Ok(deleted) => {
                outcome.complete(Stage::DeleteBucket);
                report.storage_removed = true;
                report.objects_deleted = deleted;
            }
            Err(e) => {
                warn!(bucket, "state bucket not removed: {e}");
                report.failing_object = e.failing_object().map(str::to_owned);
                report.storage_error = Some(e.to_string());
            }
        }
        report
    }
}

fn run_stage<T>(
    outcome: &mut WorkflowOutcome,
    stage: Stage,
    f: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, StageFailure> {
    outcome.enter(stage);
    info!(%stage, "stage started");
    match f() {
        Ok(value) => {
            outcome.complete(stage);
            Ok(value)
        }
        Err(error) => Err(StageFailure { stage, error }),
    }
}
