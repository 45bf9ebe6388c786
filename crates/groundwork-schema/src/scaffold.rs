//! Default declaration files written into an empty working directory.

use crate::SchemaError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_REGION: &str = "me-west1";
pub const DEFAULT_STATE_PREFIX: &str = "terraform/state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldFile {
    pub name: &'static str,
    pub contents: String,
}

const BACKEND_TF: &str = r#"terraform {
  backend "gcs" {}
}
"#;

const PROVIDER_TF: &str = r#"provider "google" {
  project = var.project_id
  region  = var.region
}

provider "google-beta" {
  project = var.project_id
  region  = var.region
}
"#;

const MAIN_TF: &str = "# Main resources\n";

/// State bucket name used by generated backend config: `<project>-tfstate`.
pub fn default_bucket_name(project_id: &str) -> String {
    format!("{project_id}-tfstate")
}

/// The generated file set. The backend stanza stays empty; its values come
/// from `backend.tfvars` via `-backend-config`.
pub fn default_files(project_id: &str, region: &str) -> Vec<ScaffoldFile> {
    vec![
        ScaffoldFile {
            name: "backend.tf",
            contents: BACKEND_TF.to_owned(),
        },
        ScaffoldFile {
            name: "backend.tfvars",
            contents: format!(
                "bucket = \"{}\"\nprefix = \"{DEFAULT_STATE_PREFIX}\"\n",
                default_bucket_name(project_id)
            ),
        },
        ScaffoldFile {
            name: "provider.tf",
            contents: PROVIDER_TF.to_owned(),
        },
        ScaffoldFile {
            name: "variables.tf",
            contents: format!(
                "variable \"project_id\" {{\n  type = string\n}}\n\nvariable \"region\" {{\n  type    = string\n  default = \"{region}\"\n}}\n"
            ),
        },
        ScaffoldFile {
            name: "variables.tfvars",
            contents: format!("project_id = \"{project_id}\"\nregion     = \"{region}\"\n"),
        },
        ScaffoldFile {
            name: "main.tf",
            contents: MAIN_TF.to_owned(),
        },
    ]
}

/// Write the default file set into `dir`, creating it if needed.
/// Existing files with the same names are overwritten.
pub fn write_default_files(
    dir: &Path,
    project_id: &str,
    region: &str,
) -> Result<Vec<PathBuf>, SchemaError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for file in default_files(project_id, region) {
        let path = dir.join(file.name);
        fs::write(&path, file.contents)?;
        written.push(path);
    }
    info!(
        project = project_id,
        dir = %dir.display(),
        files = written.len(),
        "generated default terraform files"
    );
    Ok(written)
}
