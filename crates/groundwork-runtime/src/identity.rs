use crate::command::CommandRunner;
use crate::RuntimeError;
use std::sync::Arc;
use tracing::info;

/// Cloud identity operations needed before any provisioning can happen.
pub trait CloudIdentity: Send + Sync {
    /// Accounts with an active interactive session.
    fn active_accounts(&self) -> Result<Vec<String>, RuntimeError>;

    fn access_token(&self) -> Result<String, RuntimeError>;

    /// Token of the application-default credentials used by Terraform and SDKs.
    fn adc_token(&self) -> Result<String, RuntimeError>;

    fn login(&self) -> Result<(), RuntimeError>;

    fn adc_login(&self) -> Result<(), RuntimeError>;

    fn current_project(&self) -> Result<String, RuntimeError>;

    fn set_project(&self, project_id: &str) -> Result<(), RuntimeError>;
}

/// [`CloudIdentity`] backed by the `gcloud` CLI.
pub struct Gcloud {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl Gcloud {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "gcloud".to_owned(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        self.runner.execute(&self.program, args, None)
    }
}

impl CloudIdentity for Gcloud {
    fn active_accounts(&self) -> Result<Vec<String>, RuntimeError> {
        let out = self.run(&[
            "auth",
            "list",
            "--filter=status:ACTIVE",
            "--format=value(account)",
        ])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn access_token(&self) -> Result<String, RuntimeError> {
        self.run(&["auth", "print-access-token"])
            .map(|t| t.trim().to_owned())
    }

    fn adc_token(&self) -> Result<String, RuntimeError> {
        self.run(&["auth", "application-default", "print-access-token"])
            .map(|t| t.trim().to_owned())
    }

    fn login(&self) -> Result<(), RuntimeError> {
        info!("not authenticated, running gcloud auth login");
        self.run(&["auth", "login"]).map(drop)
    }

    fn adc_login(&self) -> Result<(), RuntimeError> {
        info!("application default credentials missing, running gcloud auth application-default login");
        self.run(&["auth", "application-default", "login"]).map(drop)
    }

    fn current_project(&self) -> Result<String, RuntimeError> {
        self.run(&["config", "get-value", "project"])
            .map(|p| p.trim().to_owned())
    }

    fn set_project(&self, project_id: &str) -> Result<(), RuntimeError> {
        info!(project = project_id, "switching gcp project");
        self.run(&["config", "set", "project", project_id]).map(drop)
    }
}
