use crate::command::CommandRunner;
use crate::RuntimeError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const TERRAFORM: &str = "terraform";

/// One rung of the `terraform init` retry ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationTier {
    pub label: String,
    pub extra_flags: Vec<String>,
}

impl EscalationTier {
    pub fn new(label: &str, extra_flags: &[&str]) -> Self {
        Self {
            label: label.to_owned(),
            extra_flags: extra_flags.iter().map(|&f| f.to_owned()).collect(),
        }
    }
}

/// Plain init, then `-reconfigure`, then `-migrate-state`.
pub fn default_init_ladder() -> Vec<EscalationTier> {
    vec![
        EscalationTier::new("init", &[]),
        EscalationTier::new("reconfigure", &["-reconfigure"]),
        EscalationTier::new("migrate-state", &["-migrate-state"]),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOptions {
    pub dir: PathBuf,
    pub var_file: Option<String>,
    pub backend_vars_file: Option<String>,
    pub destroy: bool,
    pub vars: BTreeMap<String, String>,
}

/// Which tier of the ladder succeeded, and after how many attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub tier: String,
    pub attempts: usize,
}

/// Runs `terraform` actions in a working directory.
pub struct ProvisionRunner {
    runner: Arc<dyn CommandRunner>,
    program: String,
    ladder: Vec<EscalationTier>,
}

impl ProvisionRunner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: TERRAFORM.to_owned(),
            ladder: default_init_ladder(),
        }
    }

    #[must_use]
    pub fn with_ladder(mut self, ladder: Vec<EscalationTier>) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn ladder(&self) -> &[EscalationTier] {
        &self.ladder
    }

    /// Try each tier in order as an independent invocation; stop at the first
    /// success. If every tier fails, the last tier's error is returned.
    pub fn init(
        &self,
        dir: &Path,
        backend_vars_file: Option<&str>,
    ) -> Result<InitReport, RuntimeError> {
        info!(dir = %dir.display(), "initializing terraform");
        let mut base = vec![
            "init".to_owned(),
            "-upgrade".to_owned(),
            "-input=false".to_owned(),
        ];
        if let Some(file) = backend_vars_file {
            base.push(format!("-backend-config={file}"));
        }

        let mut last_err = RuntimeError::EmptyLadder;
        for (attempt, tier) in self.ladder.iter().enumerate() {
            if attempt > 0 {
                warn!(tier = %tier.label, "previous init failed, escalating");
            }
            let mut args = base.clone();
            args.extend(tier.extra_flags.iter().cloned());
            match self.terraform(dir, &args) {
                Ok(_) => {
                    info!(tier = %tier.label, "terraform init succeeded");
                    return Ok(InitReport {
                        tier: tier.label.clone(),
                        attempts: attempt + 1,
                    });
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    pub fn apply(
        &self,
        dir: &Path,
        var_file: Option<&str>,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, RuntimeError> {
        info!("running terraform apply");
        let mut args = vec!["apply".to_owned(), "-auto-approve".to_owned()];
        if let Some(file) = var_file {
            args.push(format!("-var-file={file}"));
        }
        for (key, value) in vars {
            args.push("-var".to_owned());
            args.push(format!("{key}={value}"));
        }
        self.terraform(dir, &args)
    }

    pub fn destroy(&self, dir: &Path, var_file: Option<&str>) -> Result<String, RuntimeError> {
        info!("running terraform destroy");
        let mut args = vec!["destroy".to_owned(), "-auto-approve".to_owned()];
        if let Some(file) = var_file {
            args.push(format!("-var-file={file}"));
        }
        self.terraform(dir, &args)
    }

    fn terraform(&self, dir: &Path, args: &[String]) -> Result<String, RuntimeError> {
        let mut argv: Vec<&str> = args.iter().map(String::as_str).collect();
        argv.push("-no-color");
        self.runner.execute(&self.program, &argv, Some(dir))
    }
}
