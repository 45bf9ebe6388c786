use crate::resolver::DEFAULT_BACKEND_TYPE;
use crate::scaffold::DEFAULT_REGION;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "groundwork.toml";

/// Events each log observer can queue before it starts missing them.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 100;

/// Parameters of one workflow run, usually read from `groundwork.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    pub project_id: String,
    #[serde(default = "default_terraform_dir")]
    pub terraform_dir: PathBuf,
    #[serde(default)]
    pub var_file: Option<String>,
    #[serde(default)]
    pub backend_vars_file: Option<String>,
    #[serde(default)]
    pub destroy: bool,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_backend_type")]
    pub backend_type: String,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    #[serde(default)]
    pub require_daemon: bool,
    #[serde(default = "default_true")]
    pub require_identity: bool,
    #[serde(default = "default_true")]
    pub require_adc: bool,
    #[serde(default = "default_true")]
    pub align_project: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Command used to start the container daemon when it is not running,
    /// e.g. `["systemctl", "--user", "start", "docker"]`.
    #[serde(default)]
    pub daemon_launch: Vec<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            require_daemon: false,
            require_identity: true,
            require_adc: true,
            align_project: true,
            timeout_secs: default_timeout_secs(),
            interval_secs: default_interval_secs(),
            daemon_launch: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    #[serde(default = "default_storage_endpoint")]
    pub endpoint: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            endpoint: default_storage_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default = "default_observer_capacity")]
    pub observer_capacity: usize,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            observer_capacity: default_observer_capacity(),
        }
    }
}

fn default_terraform_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_region() -> String {
    DEFAULT_REGION.to_owned()
}

fn default_backend_type() -> String {
    DEFAULT_BACKEND_TYPE.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_interval_secs() -> u64 {
    2
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_owned()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("groundwork.log")
}

fn default_observer_capacity() -> usize {
    DEFAULT_OBSERVER_CAPACITY
}

impl WorkflowConfig {
    pub fn new(project_id: &str, terraform_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_id: project_id.to_owned(),
            terraform_dir: terraform_dir.into(),
            var_file: None,
            backend_vars_file: None,
            destroy: false,
            region: default_region(),
            backend_type: default_backend_type(),
            vars: BTreeMap::new(),
            auth: AuthSection::default(),
            storage: StorageSection::default(),
            log: LogSection::default(),
        }
    }

    /// Relative `terraform_dir` and `log.file` are resolved against `base`.
    #[must_use]
    pub fn relative_to(mut self, base: &Path) -> Self {
        if self.terraform_dir.is_relative() {
            self.terraform_dir = base.join(&self.terraform_dir);
        }
        if self.log.file.is_relative() {
            self.log.file = base.join(&self.log.file);
        }
        self
    }

    fn validate(self) -> Result<Self, SchemaError> {
        if self.project_id.trim().is_empty() {
            return Err(SchemaError::InvalidConfig(
                "project_id must not be empty".to_owned(),
            ));
        }
        if self.auth.interval_secs == 0 {
            return Err(SchemaError::InvalidConfig(
                "auth.interval_secs must be at least 1".to_owned(),
            ));
        }
        if self.log.observer_capacity == 0 {
            return Err(SchemaError::InvalidConfig(
                "log.observer_capacity must be at least 1".to_owned(),
            ));
        }
        if let Some(key) = self.vars.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(SchemaError::InvalidConfig(format!(
                "invalid variable name '{key}'"
            )));
        }
        Ok(self)
    }
}

pub fn parse_config_str(content: &str) -> Result<WorkflowConfig, SchemaError> {
    let config: WorkflowConfig = toml::from_str(content)?;
    config.validate()
}

/// Load a config file; relative paths inside it are anchored at the file's directory.
pub fn load_config(path: &Path) -> Result<WorkflowConfig, SchemaError> {
    let content = fs::read_to_string(path)?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok(parse_config_str(&content)?.relative_to(base))
}
