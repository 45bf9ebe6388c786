//! Declaration-file reading, variable resolution, and workflow configuration for Groundwork.
//!
//! This crate defines the configuration layer: a reader for the narrow subset of
//! the Terraform declaration language Groundwork needs (`hcl`), prioritized
//! variable resolution across declaration files, backend config files, and the
//! persisted local state (`ConfigResolver`), generation of a default file set
//! for empty working directories (`scaffold`), and the `groundwork.toml`
//! workflow config (`WorkflowConfig`).

pub mod config;
pub mod hcl;
pub mod resolver;
pub mod scaffold;
pub mod source;

pub use config::{
    load_config, parse_config_str, AuthSection, LogSection, StorageSection, WorkflowConfig,
    DEFAULT_CONFIG_FILE, DEFAULT_OBSERVER_CAPACITY,
};
pub use resolver::{declaration_files, ConfigResolver};
pub use scaffold::{default_bucket_name, write_default_files, DEFAULT_REGION};
pub use source::{ConfigSource, ResolvedValue, VariableQuery};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
