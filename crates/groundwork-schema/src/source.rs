use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where a configuration value may be read from, in descending priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// `*.tf` files in the working directory (`terraform { backend "<type>" { ... } }`).
    DeclarationFiles,
    /// Dedicated backend config files such as `backend.tfvars`.
    BackendFiles,
    /// The local `.terraform/terraform.tfstate` written by a previous `init`.
    PersistedState,
}

impl ConfigSource {
    pub const DEFAULT_ORDER: [ConfigSource; 3] = [
        ConfigSource::DeclarationFiles,
        ConfigSource::BackendFiles,
        ConfigSource::PersistedState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::DeclarationFiles => "declaration_files",
            ConfigSource::BackendFiles => "backend_files",
            ConfigSource::PersistedState => "persisted_state",
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "declaration_files" | "tf" => Ok(ConfigSource::DeclarationFiles),
            "backend_files" | "backend" => Ok(ConfigSource::BackendFiles),
            "persisted_state" | "state" => Ok(ConfigSource::PersistedState),
            other => Err(format!(
                "unknown config source '{other}' (expected declaration_files, backend_files, or persisted_state)"
            )),
        }
    }
}

/// A variable lookup: the name and the sources to try, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableQuery {
    pub name: String,
    pub sources: Vec<ConfigSource>,
}

impl VariableQuery {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            sources: ConfigSource::DEFAULT_ORDER.to_vec(),
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: &[ConfigSource]) -> Self {
        if !sources.is_empty() {
            self.sources = sources.to_vec();
        }
        self
    }
}

/// A resolved value and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedValue {
    pub value: String,
    pub source: ConfigSource,
    pub origin: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_is_priority_order() {
        let q = VariableQuery::new("bucket");
        assert_eq!(
            q.sources,
            vec![
                ConfigSource::DeclarationFiles,
                ConfigSource::BackendFiles,
                ConfigSource::PersistedState
            ]
        );
    }

    #[test]
    fn empty_override_keeps_defaults() {
        let q = VariableQuery::new("bucket").with_sources(&[]);
        assert_eq!(q.sources.len(), 3);
        let q = VariableQuery::new("bucket").with_sources(&[ConfigSource::PersistedState]);
        assert_eq!(q.sources, vec![ConfigSource::PersistedState]);
    }

    #[test]
    fn parse_source_names() {
        assert_eq!(
            "backend-files".parse::<ConfigSource>().unwrap(),
            ConfigSource::BackendFiles
        );
        assert_eq!(
            "state".parse::<ConfigSource>().unwrap(),
            ConfigSource::PersistedState
        );
        assert!("registry".parse::<ConfigSource>().is_err());
        for s in ConfigSource::DEFAULT_ORDER {
            assert_eq!(s.to_string().parse::<ConfigSource>().unwrap(), s);
        }
    }
}
