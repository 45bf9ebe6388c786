use crate::hcl::{self, Body};
use crate::source::{ConfigSource, ResolvedValue, VariableQuery};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Candidate backend config files, tried in this order.
pub const BACKEND_FILES: &[&str] = &[
    "backend.tfvars",
    "backend.hcl",
    "config.gcs.tfbackend",
    "backend.tf",
];

/// Local state document written by `terraform init`, relative to the working dir.
pub const PERSISTED_STATE_PATH: &str = ".terraform/terraform.tfstate";

pub const DEFAULT_BACKEND_TYPE: &str = "gcs";

/// Outer block path leading to the backend block, whose label is the backend type.
const BACKEND_BLOCK_PATH: &[&str] = &["terraform", "backend"];

/// Extracts Terraform configuration values from the files of one working directory.
///
/// Lookups never fail: unreadable or malformed files are skipped and the
/// next candidate is tried.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    dir: PathBuf,
    backend_type: String,
}

impl ConfigResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            backend_type: DEFAULT_BACKEND_TYPE.to_owned(),
        }
    }

    #[must_use]
    pub fn with_backend_type(mut self, backend_type: &str) -> Self {
        backend_type.clone_into(&mut self.backend_type);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve `name` from the default source order.
    pub fn resolve(&self, name: &str) -> Option<ResolvedValue> {
        self.resolve_query(&VariableQuery::new(name))
    }

    /// Resolve `name` from `sources` in order; an empty slice means the default order.
    pub fn resolve_from(&self, name: &str, sources: &[ConfigSource]) -> Option<ResolvedValue> {
        self.resolve_query(&VariableQuery::new(name).with_sources(sources))
    }

    pub fn resolve_query(&self, query: &VariableQuery) -> Option<ResolvedValue> {
        debug!(variable = %query.name, "searching for variable");
        for &source in &query.sources {
            if let Some((value, origin)) = self.extract(source, &query.name) {
                info!(
                    variable = %query.name,
                    value = %value,
                    source = %source,
                    origin = %origin.display(),
                    "found variable"
                );
                return Some(ResolvedValue {
                    value,
                    source,
                    origin,
                });
            }
        }
        debug!(variable = %query.name, "variable not found in any source");
        None
    }

    fn extract(&self, source: ConfigSource, name: &str) -> Option<(String, PathBuf)> {
        let found = match source {
            ConfigSource::DeclarationFiles => self.from_declaration_files(name),
            ConfigSource::BackendFiles => self.from_backend_files(name),
            ConfigSource::PersistedState => self.from_persisted_state(name),
        };
        found.filter(|(value, _)| !value.is_empty())
    }

    fn from_declaration_files(&self, name: &str) -> Option<(String, PathBuf)> {
        declaration_files(&self.dir).into_iter().find_map(|path| {
            let body = parse_quietly(&path)?;
            self.backend_value(&body, name)
                .filter(|v| !v.is_empty())
                .map(|v| (v, path))
        })
    }

    fn from_backend_files(&self, name: &str) -> Option<(String, PathBuf)> {
        for file in BACKEND_FILES {
            let path = self.dir.join(file);
            if !path.is_file() {
                continue;
            }
            debug!(file = %path.display(), "found backend config file");
            let Some(body) = parse_quietly(&path) else {
                continue;
            };

            let flat = body.just_attributes().and_then(|attrs| {
                attrs
                    .iter()
                    .find(|a| a.name == name)
                    .and_then(|a| a.value.as_str())
                    .map(str::to_owned)
            });
            if let Some(value) = flat.filter(|v| !v.is_empty()) {
                return Some((value, path));
            }
            if let Some(value) = self.backend_value(&body, name).filter(|v| !v.is_empty()) {
                return Some((value, path));
            }
        }
        None
    }

    fn from_persisted_state(&self, name: &str) -> Option<(String, PathBuf)> {
        let path = self.dir.join(PERSISTED_STATE_PATH);
        let content = fs::read_to_string(&path).ok()?;
        let state: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                debug!(file = %path.display(), "skipping unreadable state file: {e}");
                return None;
            }
        };
        let value = state
            .get("backend")?
            .get("config")?
            .get(name)?
            .as_str()?
            .to_owned();
        Some((value, path))
    }

    fn backend_value(&self, body: &Body, name: &str) -> Option<String> {
        nested_block_value(body, BACKEND_BLOCK_PATH, &self.backend_type, name)
    }
}

/// All `*.tf` files directly inside `dir`, sorted by file name.
pub fn declaration_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "tf"))
        .collect();
    files.sort();
    files
}

/// Walk `path` block by block (first match at each intermediate level), then
/// among the final-level blocks labeled `label` return the string attribute `name`.
pub fn nested_block_value(body: &Body, path: &[&str], label: &str, name: &str) -> Option<String> {
    let (leaf, parents) = path.split_last()?;
    let mut current = body;
    for kind in parents {
        current = &current.blocks_of(kind).next()?.body;
    }
    current
        .blocks_of(leaf)
        .filter(|b| b.labels.first().map(String::as_str) == Some(label))
        .find_map(|b| b.body.string_attribute(name))
        .map(str::to_owned)
}

fn parse_quietly(path: &Path) -> Option<Body> {
    match hcl::parse_file(path) {
        Ok(body) => Some(body),
        Err(e) => {
            debug!(file = %path.display(), "skipping due to parse errors: {e}");
            None
        }
    }
}
